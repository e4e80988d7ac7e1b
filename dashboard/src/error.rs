//! Error types for the dashboard engine

use poll_core::ApiError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DashboardError {
    /// Network or backend failure, surfaced to the caller. Idempotent
    /// operations (single-poll fetch, vote check) are safe to retry.
    #[error("Transport error: {0}")]
    Transport(#[from] ApiError),

    /// Rejected before any network call was made
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The session ended while the operation was in flight
    #[error("Session ended before the operation completed")]
    StaleSession,

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, DashboardError>;
