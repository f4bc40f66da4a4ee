//! Persistent store for tasks, the durable queue, batches, segments and
//! recovery snapshots (SQLite via sqlx).

pub mod db;
pub mod types;

mod batches;
mod queue;
mod segments;
mod snapshots;
mod tasks;

#[cfg(test)]
mod tests;

pub use db::*;
pub use types::*;
