//! Scaler error types.

use thiserror::Error;

/// Errors surfaced by the Assign/Idle operations.
///
/// Platform failures are deliberately absent: a transient platform error
/// must not fail a waiter that might still be served by another concurrent
/// creation, so those are logged and recovered locally.
#[derive(Debug, Error)]
pub enum ScalerError {
    #[error("assign cancelled for request {0}")]
    Cancelled(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("instance {0} not found")]
    NotFound(String),
}

pub type ScalerResult<T> = Result<T, ScalerError>;
