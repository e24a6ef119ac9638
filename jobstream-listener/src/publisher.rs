//! Outbound side of the pipeline.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::debug;

use jobstream_config::TopicsConfig;
use jobstream_registry::Document;

use crate::error::PipelineError;
use crate::handler::Outcome;
use crate::parser::DocumentParser;
use crate::transport::Transport;

/// Serializes handler outcomes and hands them to the transport.
///
/// Delivery is tracked independently of processing: a failed publish is
/// reported to the caller but never rewrites the job's status.
pub struct ResultPublisher {
    transport: Arc<dyn Transport>,
    parser: Arc<dyn DocumentParser>,
    results_topic: String,
    error_topic: String,
    default_qos: u8,
    default_retain: bool,
}

impl ResultPublisher {
    pub fn new(
        transport: Arc<dyn Transport>,
        parser: Arc<dyn DocumentParser>,
        topics: &TopicsConfig,
    ) -> Self {
        Self {
            transport,
            parser,
            results_topic: topics.results_topic.clone(),
            error_topic: topics.error_topic.clone(),
            default_qos: topics.qos,
            default_retain: topics.retain,
        }
    }

    /// Publish a handler outcome to its topic, or the configured results
    /// topic when it names none.
    pub async fn publish_outcome(&self, outcome: &Outcome) -> Result<(), PipelineError> {
        let bytes = self.parser.serialize(&outcome.payload)?;
        let topic = outcome.topic.as_deref().unwrap_or(&self.results_topic);
        let qos = outcome.qos.unwrap_or(self.default_qos);
        let retain = outcome.retain.unwrap_or(self.default_retain);

        self.transport.publish(topic, bytes, qos, retain).await?;
        debug!(job_id = %outcome.job_id, topic, "published job outcome");
        Ok(())
    }

    /// Publish a failure document for one job to the error topic.
    pub async fn publish_error(&self, job_id: &str, message: &str) -> Result<(), PipelineError> {
        let mut doc = Document::new();
        doc.insert("job_id".to_owned(), json!(job_id));
        doc.insert("error".to_owned(), json!(message));
        doc.insert("timestamp".to_owned(), json!(Utc::now().to_rfc3339()));

        let bytes = self.parser.serialize(&doc)?;
        self.transport
            .publish(&self.error_topic, bytes, self.default_qos, self.default_retain)
            .await?;
        debug!(job_id, topic = %self.error_topic, "published job error");
        Ok(())
    }
}
