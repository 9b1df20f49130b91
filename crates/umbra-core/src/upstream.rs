//! Upstream registry client capability.
//!
//! The routing engine reaches the authoritative remote registry through this
//! trait. The concrete network client lives with the transport collaborator;
//! the engine only requires the three registry operations. Implementations
//! own their timeout handling: a call that times out must return
//! [`UpstreamError::Timeout`] rather than block indefinitely, since the
//! engine performs no retries of its own.

use async_trait::async_trait;
use thiserror::Error;

/// Errors from calls to the upstream registry.
#[derive(Error, Debug)]
pub enum UpstreamError {
    /// The upstream could not be reached.
    #[error("upstream registry unavailable: {0}")]
    Unavailable(String),

    /// The call exceeded the caller-supplied timeout.
    #[error("upstream registry call timed out")]
    Timeout,

    /// The upstream answered but rejected the call.
    #[error("upstream registry rejected the call: {0}")]
    Rejected(String),
}

/// Client capability for the authoritative upstream registry.
///
/// Calls may block on network I/O; the engine never invokes them while
/// holding the local registry lock.
#[async_trait]
pub trait UpstreamClient: Send + Sync + std::fmt::Debug {
    /// Looks up a provider address for a service.
    ///
    /// Returns `None` when the upstream knows no provider for the name.
    async fn lookup(&self, service: &str) -> Result<Option<String>, UpstreamError>;

    /// Registers a provider with the upstream registry.
    async fn register(
        &self,
        caller_id: &str,
        service: &str,
        address: &str,
        caller_api: &str,
    ) -> Result<(), UpstreamError>;

    /// Unregisters a provider from the upstream registry.
    ///
    /// Returns the number of providers the upstream unregistered (0 or 1).
    async fn unregister(
        &self,
        caller_id: &str,
        service: &str,
        address: &str,
    ) -> Result<u32, UpstreamError>;
}
