//! Error types for routing engine operations.

use thiserror::Error;

use crate::upstream::UpstreamError;

/// Errors surfaced by the routing engine.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// Lookup exhausted every side the policy allowed.
    #[error("service not found: {0}")]
    NotFound(String),

    /// An upstream call failed where the policy left no fallback.
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, ProxyError>;
