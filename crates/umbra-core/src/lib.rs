//! Core routing for Umbra, a local shadow proxy for a service registry.
//!
//! Umbra sits between client processes and an authoritative upstream
//! registry. Per service name, configuration decides whether lookups and
//! registrations are served from the local multi-provider registry, forwarded
//! to the upstream, or tried on one side with fallback to the other:
//!
//! - **Policy**: ordered pattern rules resolving a name to its routing rule
//! - **Heap**: least-used-first provider selection for one service
//! - **Registry**: lock-guarded map of service name to provider heap
//! - **Engine**: lookup/register/unregister with side selection and fallback
//!
//! The wire transport and the concrete upstream client are collaborators
//! outside this crate; the engine consumes the upstream through the
//! [`UpstreamClient`] capability.

pub mod config;
pub mod engine;
pub mod error;
pub mod heap;
pub mod policy;
pub mod registry;
pub mod upstream;

pub use config::{ConfigError, Configuration, ProxyConfig};
pub use engine::{RegisterOutcome, RoutingEngine, UnregisterOutcome};
pub use error::{ProxyError, Result};
pub use heap::ProviderHeap;
pub use policy::{Fallback, PolicyTable, RoutingRule, Side};
pub use registry::{LocalRegistry, RegistryError};
pub use upstream::{UpstreamClient, UpstreamError};
