//! Message-processing pipeline with job tracking.
//!
//! This crate sits between an inbound transport message and a user-supplied
//! handler: it parses the payload, resolves a job id, enforces the duplicate
//! policy against a bounded in-memory registry, invokes the handler, and
//! republishes the outcome. Terminal jobs are swept out periodically.
//!
//! # Architecture
//!
//! - [`EventListener`] - subscribes, spawns pipelines, owns the registry
//! - [`JobHandler`] - trait for implementing job processing
//! - [`Transport`] / [`DocumentParser`] - seams for the messaging substrate
//!   and the wire format
//! - [`MessagePipeline`] - receive, parse, dedup, dispatch, finalize
//! - [`CleanupSweeper`] - retention-window and capacity eviction
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use jobstream_listener::{
//!     async_trait, Config, Document, EventListener, JobHandler, MemoryTransport, Outcome,
//! };
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl JobHandler for Echo {
//!     async fn handle(&self, input: Document, job_id: &str) -> anyhow::Result<Option<Outcome>> {
//!         Ok(Some(Outcome::new(job_id, input)))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let transport = Arc::new(MemoryTransport::new());
//!     let listener = EventListener::new(Config::default(), transport);
//!     listener.run(Arc::new(Echo)).await.unwrap();
//! }
//! ```

mod error;
mod handler;
mod listener;
mod logging;
mod parser;
mod pipeline;
pub mod policy;
mod publisher;
mod sweeper;
mod transport;

pub use error::{ParseError, PipelineError, TransportError};
pub use handler::{JobHandler, NoOpHandler, Outcome};
pub use listener::EventListener;
pub use logging::install_tracing;
pub use parser::{DocumentParser, TomlDocumentParser, MAX_PAYLOAD_BYTES};
pub use pipeline::{Disposition, MessagePipeline};
pub use publisher::ResultPublisher;
pub use sweeper::CleanupSweeper;
pub use transport::{InboundMessage, MemoryTransport, PublishedMessage, Transport};

pub use jobstream_config::{
    load_config, validate_config, Config, ConfigError, DuplicateAction, JobsConfig, LoggingConfig,
    TopicsConfig, TransportConfig,
};
pub use jobstream_registry::{
    Document, DuplicateMarker, JobRecord, JobRegistry, JobStatus, PruneReport, RegistryError,
};

// Re-export async_trait for convenience when implementing JobHandler
pub use async_trait::async_trait;
