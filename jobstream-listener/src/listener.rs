//! Listener composition and run loop.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use jobstream_config::Config;
use jobstream_registry::{JobRecord, JobRegistry, JobStatus, PruneReport};

use crate::error::TransportError;
use crate::handler::JobHandler;
use crate::parser::{DocumentParser, TomlDocumentParser};
use crate::pipeline::MessagePipeline;
use crate::publisher::ResultPublisher;
use crate::sweeper::CleanupSweeper;
use crate::transport::Transport;

/// Event listener with job tracking.
///
/// Subscribes to the configured topic, spawns one pipeline task per inbound
/// message and a cleanup sweeper alongside, and exposes a query surface over
/// the registry it owns. The registry is plain owned state handed to the
/// pipeline and sweeper; there are no process-wide singletons.
#[derive(Clone)]
pub struct EventListener {
    config: Config,
    registry: Arc<JobRegistry>,
    transport: Arc<dyn Transport>,
    parser: Arc<dyn DocumentParser>,
    cancel: CancellationToken,
}

impl EventListener {
    pub fn new(config: Config, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            registry: Arc::new(JobRegistry::new()),
            transport,
            parser: Arc::new(TomlDocumentParser::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Swap the wire-format parser.
    pub fn with_parser(mut self, parser: Arc<dyn DocumentParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Request shutdown: intake stops, in-flight handlers get the
    /// configured grace period.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    // Query surface over the registry.

    pub async fn get_job(&self, job_id: &str) -> Option<JobRecord> {
        self.registry.get(job_id).await
    }

    pub async fn list_jobs(&self, status: Option<JobStatus>) -> Vec<JobRecord> {
        self.registry.jobs_with_status(status).await
    }

    pub async fn job_count(&self) -> usize {
        self.registry.len().await
    }

    /// Run one cleanup pass outside the sweeper's schedule.
    pub async fn force_cleanup(&self) -> PruneReport {
        let cutoff = Utc::now() - chrono::Duration::seconds(self.config.jobs.job_retention as i64);
        self.registry
            .prune(cutoff, self.config.jobs.max_jobs_in_memory)
            .await
    }

    /// Run the listener until [`stop`](Self::stop) is called or the
    /// transport stream ends.
    pub async fn run(&self, handler: Arc<dyn JobHandler>) -> Result<(), TransportError> {
        let topics = &self.config.topics;
        let mut inbound = self.transport.subscribe(&topics.topic, topics.qos).await?;
        info!(topic = %topics.topic, qos = topics.qos, "listener subscribed");

        let sweeper = CleanupSweeper::from_config(self.registry.clone(), &self.config.jobs)
            .spawn(self.cancel.child_token());

        let publisher = ResultPublisher::new(self.transport.clone(), self.parser.clone(), topics);
        let pipeline = Arc::new(MessagePipeline::new(
            self.registry.clone(),
            self.parser.clone(),
            publisher,
            handler,
            self.config.jobs.clone(),
        ));

        let mut tasks = JoinSet::new();
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("listener stopping");
                    break;
                }
                maybe = inbound.recv() => match maybe {
                    Some(message) => {
                        let pipeline = pipeline.clone();
                        tasks.spawn(async move {
                            match pipeline.process(message).await {
                                Ok(disposition) => debug!(?disposition, "message settled"),
                                Err(e) => warn!(error = %e, "message processing failed"),
                            }
                        });
                        // Reap whatever already finished so the set stays small.
                        while let Some(done) = tasks.try_join_next() {
                            if let Err(e) = done {
                                error!(error = %e, "pipeline task panicked");
                            }
                        }
                    }
                    None => {
                        info!("transport stream closed");
                        break;
                    }
                }
            }
        }

        self.cancel.cancel();
        self.drain(&mut tasks).await;
        let _ = sweeper.await;
        Ok(())
    }

    /// Give in-flight pipelines a bounded grace period, then abort the rest.
    /// Registry mutations made so far are kept as-is.
    async fn drain(&self, tasks: &mut JoinSet<()>) {
        let grace = Duration::from_secs(self.config.jobs.shutdown_grace);
        let all_done = async {
            while let Some(done) = tasks.join_next().await {
                if let Err(e) = done {
                    error!(error = %e, "pipeline task panicked");
                }
            }
        };
        if tokio::time::timeout(grace, all_done).await.is_err() {
            warn!(
                in_flight = tasks.len(),
                grace_secs = self.config.jobs.shutdown_grace,
                "shutdown grace elapsed, aborting in-flight jobs"
            );
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }
    }
}
