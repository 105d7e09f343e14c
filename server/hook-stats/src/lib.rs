//! Hook Stats: per-application delivery bookkeeping for the build-hook mailer.
//!
//! Tracks how many registry deliveries each application received today, how
//! many of them failed downstream, and the dedup token that filters duplicate
//! or out-of-order redeliveries. The registry can be flushed to and restored
//! from a JSON snapshot so counters survive restarts.
//!
//! No network, no async runtime; pure bookkeeping + file persistence.

pub mod error;
pub mod locator;
pub mod registry;
pub mod snapshot;
pub mod token;
pub mod types;

pub use error::SnapshotError;
pub use registry::Registry;
pub use snapshot::SnapshotStore;
pub use token::Verdict;
pub use types::{AppRecord, CreateTime, DedupToken, WebhookPayload};
