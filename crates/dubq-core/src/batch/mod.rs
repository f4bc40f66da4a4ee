//! Batch ingestion: validate a URL list, create one task per accepted URL,
//! and enqueue them together.

mod create;
mod validate;

pub use create::{BatchCreated, BatchCreator, BatchError};
pub use validate::{
    is_allowed_video_url, AcceptedUrl, BatchInputError, BatchValidator, RejectedUrl,
    ValidationResult, ALLOWED_HOSTS, MAX_BATCH_URLS, REASON_DUPLICATE, REASON_EMPTY,
    REASON_INVALID, REASON_NOT_STRING,
};
