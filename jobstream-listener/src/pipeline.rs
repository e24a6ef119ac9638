//! Per-message processing pipeline.

use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use jobstream_config::JobsConfig;
use jobstream_registry::{Document, JobRegistry, JobStatus, RegistryError};

use crate::error::PipelineError;
use crate::handler::JobHandler;
use crate::parser::DocumentParser;
use crate::policy::{decide, DuplicateDecision};
use crate::publisher::ResultPublisher;
use crate::transport::InboundMessage;

/// How one message ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Handler succeeded; `published` is false when it returned no outcome
    /// and nothing was sent.
    Completed { published: bool },
    /// Handler failed; the job is marked Failed and an error document was
    /// sent to the error topic.
    Failed,
    /// No handler ran: duplicate skip, or a reprocess refused because the
    /// job is still in flight.
    Skipped,
}

/// Runs one inbound message through parse, dedup, dispatch and publish.
///
/// Pipelines for distinct job ids run concurrently; the registry's atomic
/// create and transitions are the only serialization points. No registry
/// lock is ever held across the handler call.
pub struct MessagePipeline {
    registry: Arc<JobRegistry>,
    parser: Arc<dyn DocumentParser>,
    publisher: ResultPublisher,
    handler: Arc<dyn JobHandler>,
    jobs: JobsConfig,
}

impl MessagePipeline {
    pub fn new(
        registry: Arc<JobRegistry>,
        parser: Arc<dyn DocumentParser>,
        publisher: ResultPublisher,
        handler: Arc<dyn JobHandler>,
        jobs: JobsConfig,
    ) -> Self {
        Self {
            registry,
            parser,
            publisher,
            handler,
            jobs,
        }
    }

    /// Process one message end to end.
    ///
    /// Errors are terminal for this message only; handler failures are
    /// captured into the job record and reported as `Disposition::Failed`
    /// rather than an error.
    pub async fn process(&self, message: InboundMessage) -> Result<Disposition, PipelineError> {
        let input = self.parser.parse(&message.payload)?;

        let job_id = match extract_job_id(&input, &self.jobs.job_id_field) {
            Some(id) => id,
            None if self.jobs.allow_job_id_generation => Uuid::new_v4().to_string(),
            None => {
                return Err(PipelineError::MissingJobId {
                    field: self.jobs.job_id_field.clone(),
                })
            }
        };

        let created = self.registry.create(&job_id, input.clone()).await;
        match decide(created, self.jobs.duplicate_action) {
            DuplicateDecision::Proceed => {
                match self
                    .registry
                    .transition(&job_id, JobStatus::Running, None, None)
                    .await
                {
                    Ok(_) => {}
                    // A concurrent duplicate claimed the record between our
                    // create and dispatch; treat it like a skip.
                    Err(RegistryError::InvalidTransition {
                        from: JobStatus::Duplicate,
                        ..
                    }) => {
                        warn!(job_id, "job was marked duplicate before dispatch");
                        return Ok(Disposition::Skipped);
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            DuplicateDecision::Skip => {
                let marker = self.registry.mark_duplicate(&job_id).await?;
                info!(
                    job_id,
                    existing_status = %marker.existing_status,
                    arrivals = marker.arrivals,
                    "duplicate job skipped"
                );
                return Ok(Disposition::Skipped);
            }
            DuplicateDecision::Reprocess => match self.registry.begin_reprocess(&job_id).await {
                Ok(_) => info!(job_id, "reprocessing existing job"),
                Err(RegistryError::InvalidTransition { from, .. }) => {
                    warn!(job_id, status = %from, "job still in flight, reprocess skipped");
                    return Ok(Disposition::Skipped);
                }
                Err(e) => return Err(e.into()),
            },
            DuplicateDecision::Reject => {
                if let Err(e) = self.publisher.publish_error(&job_id, "duplicate job").await {
                    warn!(job_id, error = %e, "failed to publish duplicate-job error");
                }
                return Err(PipelineError::DuplicateJob(job_id));
            }
        }

        info!(job_id, "processing job");
        self.dispatch(&job_id, input).await
    }

    /// Invoke the handler and settle the record. Called with the job already
    /// in Running.
    async fn dispatch(&self, job_id: &str, input: Document) -> Result<Disposition, PipelineError> {
        match self.handler.handle(input, job_id).await {
            Ok(Some(outcome)) => {
                self.registry
                    .transition(
                        job_id,
                        JobStatus::Completed,
                        Some(Value::Object(outcome.payload.clone())),
                        None,
                    )
                    .await?;
                info!(job_id, "job completed");

                // Processing success and delivery success are independent
                // facts: the job stays Completed even when this fails.
                self.publisher.publish_outcome(&outcome).await?;
                Ok(Disposition::Completed { published: true })
            }
            Ok(None) => {
                self.registry
                    .transition(job_id, JobStatus::Completed, None, None)
                    .await?;
                info!(job_id, "job completed with no outcome");
                Ok(Disposition::Completed { published: false })
            }
            Err(err) => {
                let message = format!("{err:#}");
                self.registry
                    .transition(job_id, JobStatus::Failed, None, Some(message.clone()))
                    .await?;
                warn!(job_id, error = %message, "job failed");

                if let Err(e) = self.publisher.publish_error(job_id, &message).await {
                    warn!(job_id, error = %e, "failed to publish job error");
                }
                Ok(Disposition::Failed)
            }
        }
    }
}

/// Pull the job id out of the configured field.
///
/// Scalar values are stringified the way upstream producers expect; a
/// table or array in the id field counts as missing.
fn extract_job_id(input: &Document, field: &str) -> Option<String> {
    match input.get(field)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
