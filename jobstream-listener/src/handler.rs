//! Handler contract for user-supplied job processing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use jobstream_registry::Document;

/// The structured result a handler wants published after processing a job.
///
/// `topic`, `qos` and `retain` are optional; the publisher falls back to
/// the configured results topic and default delivery settings.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub payload: Document,
    pub topic: Option<String>,
    pub qos: Option<u8>,
    pub retain: Option<bool>,
    pub job_id: String,
    pub timestamp: DateTime<Utc>,
}

impl Outcome {
    pub fn new(job_id: impl Into<String>, payload: Document) -> Self {
        Self {
            payload,
            topic: None,
            qos: None,
            retain: None,
            job_id: job_id.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn with_qos(mut self, qos: u8) -> Self {
        self.qos = Some(qos);
        self
    }

    pub fn with_retain(mut self, retain: bool) -> Self {
        self.retain = Some(retain);
        self
    }
}

/// Trait for implementing job handlers.
///
/// The handler is called once per dispatched job with the parsed document
/// and the resolved job id. Returning `Ok(None)` completes the job without
/// publishing anything; an error marks it failed.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, input: Document, job_id: &str) -> anyhow::Result<Option<Outcome>>;
}

/// A handler that completes every job without producing an outcome.
///
/// Useful for testing the tracking path in isolation.
#[derive(Debug, Default, Clone)]
pub struct NoOpHandler;

#[async_trait]
impl JobHandler for NoOpHandler {
    async fn handle(&self, _input: Document, _job_id: &str) -> anyhow::Result<Option<Outcome>> {
        Ok(None)
    }
}
