pub mod config;
pub mod logging;

pub mod batch;
pub mod checkpoint;
pub mod context;
pub mod db;
pub mod events;
pub mod pipeline;
pub mod queue;
pub mod scheduler;
