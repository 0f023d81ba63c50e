//! Rust-level error taxonomy. RESP-level user errors (WRONGTYPE, NOAUTH, OOM,
//! arity mismatches) are plain `RespValue::Error` replies, not `ServerError` —
//! they are expected traffic for a command handler, not exceptional control
//! flow. This enum is for the things that close a connection or abort a
//! background job.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("fatal invariant violation: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, ServerError>;
