//! Durable queue façade, worker slots, and startup recovery.

mod recovery;
mod store;
mod worker_pool;

pub use recovery::{prime_checkpoints, QueueRecovery, DEFAULT_STALE_TIMEOUT};
pub use store::{QueueSnapshot, QueueStore, Reordered};
pub use worker_pool::{WorkerPool, MAX_WORKER_SLOTS};
