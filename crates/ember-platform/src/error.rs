//! Platform client error types.

use thiserror::Error;

/// Errors surfaced by platform operations.
///
/// The scaler never propagates these to an Assign caller; they are logged
/// and the caller is served by another creation or times out.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("platform transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("platform rejected {operation} for slot {slot_id}: {message}")]
    Rejected {
        operation: &'static str,
        slot_id: String,
        message: String,
    },
}

pub type PlatformResult<T> = Result<T, PlatformError>;
