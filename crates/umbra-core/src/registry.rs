//! In-memory local registry of service providers.
//!
//! Maps service names (exact match, not patterns) to the [`ProviderHeap`]
//! holding that service's registered providers. All mutation and selection
//! goes through one exclusive critical section so the heap's duplicate-free
//! and fairness invariants hold globally across concurrent request handlers,
//! not just per call.

use std::collections::HashMap;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info};

use crate::heap::ProviderHeap;

/// Errors from local registry operations.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// The service is unknown locally or has zero registered providers.
    #[error("no local provider for service: {0}")]
    NoProvider(String),
}

/// Result type for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Concurrency-safe multi-provider registry for this proxy instance.
///
/// Entries are created on first registration for a name and dropped once
/// their provider heap empties.
#[derive(Debug, Default)]
pub struct LocalRegistry {
    services: Mutex<HashMap<String, ProviderHeap>>,
}

impl LocalRegistry {
    /// Creates a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a provider for a service.
    ///
    /// Idempotent: re-registering an identical `(caller_id, address)` pair
    /// is a no-op.
    pub fn register_provider(&self, service: &str, caller_id: &str, address: &str) {
        let mut services = self.services.lock();
        let heap = services.entry(service.to_owned()).or_default();
        if heap.has(caller_id, address) {
            debug!(service = %service, caller_id = %caller_id, "Provider already registered");
            return;
        }
        heap.insert(caller_id, address);
        info!(
            service = %service,
            caller_id = %caller_id,
            address = %address,
            "Provider registered"
        );
    }

    /// Unregisters a provider from a service.
    ///
    /// Returns the number of providers unregistered (0 or 1). The service
    /// entry is dropped when its last provider goes away.
    pub fn unregister_provider(&self, service: &str, caller_id: &str, address: &str) -> usize {
        let mut services = self.services.lock();
        let Some(heap) = services.get_mut(service) else {
            debug!(service = %service, "Unregister for unknown service");
            return 0;
        };

        if !heap.remove(caller_id, address) {
            debug!(
                service = %service,
                caller_id = %caller_id,
                "Provider not found for unregistration"
            );
            return 0;
        }

        if heap.is_empty() {
            services.remove(service);
        }
        info!(
            service = %service,
            caller_id = %caller_id,
            address = %address,
            "Provider unregistered"
        );
        1
    }

    /// Picks the least-used provider for a service and returns its address.
    ///
    /// Selection is stateful: the chosen provider's use count is bumped so
    /// repeated lookups spread across all registered providers.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NoProvider`] when the service is unknown or
    /// has zero providers.
    pub fn select_provider(&self, service: &str) -> Result<String> {
        let mut services = self.services.lock();
        let heap = services
            .get_mut(service)
            .ok_or_else(|| RegistryError::NoProvider(service.to_owned()))?;

        let (caller_id, address) = heap
            .select_next()
            .ok_or_else(|| RegistryError::NoProvider(service.to_owned()))?;

        debug!(
            service = %service,
            caller_id = %caller_id,
            address = %address,
            "Provider selected"
        );
        Ok(address)
    }

    /// Returns true if the exact provider is registered for the service.
    #[must_use]
    pub fn has_provider(&self, service: &str, caller_id: &str, address: &str) -> bool {
        self.services
            .lock()
            .get(service)
            .is_some_and(|heap| heap.has(caller_id, address))
    }

    /// Number of providers currently registered for a service.
    #[must_use]
    pub fn provider_count(&self, service: &str) -> usize {
        self.services
            .lock()
            .get(service)
            .map_or(0, ProviderHeap::len)
    }

    /// Number of services with at least one provider.
    #[must_use]
    pub fn service_count(&self) -> usize {
        self.services.lock().len()
    }

    /// Returns true if no service has any provider.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.lock().is_empty()
    }
}
