//! Error types for message processing.

use thiserror::Error;

use jobstream_registry::RegistryError;

/// Errors turning raw payload bytes into a document, or back.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("payload too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },

    #[error("invalid document: {0}")]
    Syntax(String),

    #[error("document root must be a table")]
    NotATable,
}

/// Errors surfaced by a transport implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport is not connected")]
    NotConnected,

    #[error("subscribe to {topic} failed: {reason}")]
    Subscribe { topic: String, reason: String },

    #[error("publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },
}

impl TransportError {
    pub fn subscribe(topic: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Subscribe {
            topic: topic.into(),
            reason: reason.into(),
        }
    }

    pub fn publish(topic: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Publish {
            topic: topic.into(),
            reason: reason.into(),
        }
    }
}

/// Per-message processing error.
///
/// Every variant is terminal for a single message only; the run loop logs
/// it and keeps consuming.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to parse message payload: {0}")]
    Parse(#[from] ParseError),

    #[error("no job id in field `{field}` and generation is disabled")]
    MissingJobId { field: String },

    #[error("job {0} already exists")]
    DuplicateJob(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("failed to publish outcome: {0}")]
    Publish(#[from] TransportError),
}
