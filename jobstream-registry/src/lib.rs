//! Bounded in-memory job registry used by the jobstream listener.
//!
//! Every inbound message that carries a job id becomes a [`JobRecord`] held
//! here for the lifetime of its processing and for a configurable retention
//! window afterwards. The registry owns the only shared mutable state in the
//! system and exposes atomic operations over it:
//!
//! - [`JobRegistry::create`] - check-and-insert in a single critical section
//! - [`JobRegistry::transition`] - validated status state machine
//! - [`JobRegistry::mark_duplicate`] - duplicate-arrival bookkeeping
//! - [`JobRegistry::prune`] - retention-window and capacity eviction
//!
//! Locks are held only across the map mutation itself, never while a job
//! handler runs, so a slow handler cannot serialize unrelated jobs.
//!
//! # Example
//!
//! ```rust
//! use jobstream_registry::{Document, JobRegistry, JobStatus};
//!
//! #[tokio::main]
//! async fn main() {
//!     let registry = JobRegistry::new();
//!
//!     let created = registry.create("job-1", Document::new()).await;
//!     assert!(created);
//!
//!     registry
//!         .transition("job-1", JobStatus::Running, None, None)
//!         .await
//!         .unwrap();
//!     registry
//!         .transition("job-1", JobStatus::Completed, None, None)
//!         .await
//!         .unwrap();
//! }
//! ```

mod error;
mod registry;
mod types;

pub use error::RegistryError;
pub use registry::JobRegistry;
pub use types::{Document, DuplicateMarker, JobRecord, JobStatus, PruneReport};
