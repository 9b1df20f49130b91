//! Routing engine: composes the policy table, the local registry, and the
//! upstream client into lookup/register/unregister with side selection and
//! fallback.
//!
//! Each public operation is a deterministic decision sequence over the
//! immutable configuration and the current registry content. The engine
//! performs no background work, holds no suspended state, and never awaits
//! an upstream call while holding the local registry lock.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::Configuration;
use crate::error::{ProxyError, Result};
use crate::policy::{PolicyTable, Side};
use crate::registry::LocalRegistry;
use crate::upstream::{UpstreamClient, UpstreamError};

/// Outcome of a best-effort dual registration.
///
/// Registration on one side is never rolled back when the other side fails;
/// the caller decides whether a partial registration is acceptable.
#[derive(Debug)]
pub struct RegisterOutcome {
    /// Whether the provider was registered with the local registry.
    pub local: bool,
    /// Upstream attempt, `None` when the rule made the service local-only.
    pub upstream: Option<std::result::Result<(), UpstreamError>>,
}

impl RegisterOutcome {
    /// True when every targeted side accepted the registration.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !matches!(self.upstream, Some(Err(_)))
    }

    /// Collapses the outcome into a hard error when the upstream attempt
    /// failed, for callers that will not accept a partial registration.
    pub fn into_result(self) -> Result<()> {
        match self.upstream {
            Some(Err(error)) => Err(ProxyError::Upstream(error)),
            _ => Ok(()),
        }
    }
}

/// Outcome of a best-effort dual unregistration.
#[derive(Debug)]
pub struct UnregisterOutcome {
    /// Providers removed from the local registry (0 or 1).
    pub local_removed: usize,
    /// Upstream attempt with the upstream's removal count, `None` when the
    /// rule made the service local-only.
    pub upstream: Option<std::result::Result<u32, UpstreamError>>,
}

impl UnregisterOutcome {
    /// Collapses the outcome into the local removal count, or a hard error
    /// when the upstream attempt failed.
    pub fn into_result(self) -> Result<usize> {
        match self.upstream {
            Some(Err(error)) => Err(ProxyError::Upstream(error)),
            _ => Ok(self.local_removed),
        }
    }
}

/// Decision engine routing service operations between the local registry
/// and the authoritative upstream.
#[derive(Debug)]
pub struct RoutingEngine {
    local_side: Side,
    policies: PolicyTable,
    registry: LocalRegistry,
    upstream: Arc<dyn UpstreamClient>,
}

impl RoutingEngine {
    /// Creates an engine from compiled configuration and an upstream client.
    #[must_use]
    pub fn new(configuration: Configuration, upstream: Arc<dyn UpstreamClient>) -> Self {
        Self {
            local_side: configuration.local_side,
            policies: configuration.policies,
            registry: LocalRegistry::new(),
            upstream,
        }
    }

    /// The local registry this engine routes to.
    #[must_use]
    pub fn registry(&self) -> &LocalRegistry {
        &self.registry
    }

    /// Looks up a provider address for a service.
    ///
    /// The rule's preferred side is tried first; the other side is consulted
    /// only when the rule permits fallback. One symmetric primary/secondary
    /// step drives both the prefer-local and prefer-remote cases.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::NotFound`] once every side the policy allows
    /// has been exhausted. Upstream failures during lookup count as "no
    /// provider" on that side.
    pub async fn lookup(&self, service: &str) -> Result<String> {
        let rule = self.policies.resolve(service);
        let primary = if rule.preferred == self.local_side {
            Side::Local
        } else {
            Side::Remote
        };

        if let Some(address) = self.lookup_side(primary, service).await {
            return Ok(address);
        }

        if rule.fallback.is_enabled() {
            debug!(service = %service, from = ?primary, "Primary side empty, falling back");
            if let Some(address) = self.lookup_side(primary.other(), service).await {
                return Ok(address);
            }
        }

        Err(ProxyError::NotFound(service.to_owned()))
    }

    /// Registers a provider on every side the service's rule targets.
    ///
    /// Rules that are not remote-only register locally; rules that are not
    /// local-only register with the upstream. A rule with fallback enabled
    /// therefore registers on both sides, so either side can later serve
    /// the lookup.
    pub async fn register_provider(
        &self,
        service: &str,
        caller_id: &str,
        address: &str,
        caller_api: &str,
    ) -> RegisterOutcome {
        let rule = self.policies.resolve(service);

        let local = if rule.is_remote_only() {
            false
        } else {
            self.registry.register_provider(service, caller_id, address);
            true
        };

        let upstream = if rule.is_local_only() {
            None
        } else {
            let result = self
                .upstream
                .register(caller_id, service, address, caller_api)
                .await;
            if let Err(error) = &result {
                warn!(service = %service, error = %error, "Upstream registration failed");
            }
            Some(result)
        };

        RegisterOutcome { local, upstream }
    }

    /// Unregisters a provider from every side registration would have
    /// targeted. Mirrors [`RoutingEngine::register_provider`].
    pub async fn unregister_provider(
        &self,
        service: &str,
        caller_id: &str,
        address: &str,
    ) -> UnregisterOutcome {
        let rule = self.policies.resolve(service);

        let local_removed = if rule.is_remote_only() {
            0
        } else {
            self.registry.unregister_provider(service, caller_id, address)
        };

        let upstream = if rule.is_local_only() {
            None
        } else {
            let result = self.upstream.unregister(caller_id, service, address).await;
            if let Err(error) = &result {
                warn!(service = %service, error = %error, "Upstream unregistration failed");
            }
            Some(result)
        };

        UnregisterOutcome {
            local_removed,
            upstream,
        }
    }

    async fn lookup_side(&self, side: Side, service: &str) -> Option<String> {
        match side {
            Side::Local => self.registry.select_provider(service).ok(),
            Side::Remote => match self.upstream.lookup(service).await {
                Ok(address) => address.filter(|a| !a.is_empty()),
                Err(error) => {
                    warn!(service = %service, error = %error, "Upstream lookup failed");
                    None
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProxyConfig;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Upstream double: serves a fixed address map and records call counts.
    #[derive(Debug, Default)]
    struct ScriptedUpstream {
        addresses: Mutex<HashMap<String, String>>,
        unavailable: bool,
        lookups: AtomicUsize,
        registrations: AtomicUsize,
    }

    impl ScriptedUpstream {
        fn with_address(service: &str, address: &str) -> Self {
            let upstream = Self::default();
            upstream
                .addresses
                .lock()
                .insert(service.to_owned(), address.to_owned());
            upstream
        }

        fn unavailable() -> Self {
            Self {
                unavailable: true,
                ..Self::default()
            }
        }

        fn lookup_count(&self) -> usize {
            self.lookups.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl UpstreamClient for ScriptedUpstream {
        async fn lookup(&self, service: &str) -> std::result::Result<Option<String>, UpstreamError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            if self.unavailable {
                return Err(UpstreamError::Unavailable("scripted outage".into()));
            }
            Ok(self.addresses.lock().get(service).cloned())
        }

        async fn register(
            &self,
            _caller_id: &str,
            service: &str,
            address: &str,
            _caller_api: &str,
        ) -> std::result::Result<(), UpstreamError> {
            self.registrations.fetch_add(1, Ordering::SeqCst);
            if self.unavailable {
                return Err(UpstreamError::Unavailable("scripted outage".into()));
            }
            self.addresses
                .lock()
                .insert(service.to_owned(), address.to_owned());
            Ok(())
        }

        async fn unregister(
            &self,
            _caller_id: &str,
            service: &str,
            _address: &str,
        ) -> std::result::Result<u32, UpstreamError> {
            if self.unavailable {
                return Err(UpstreamError::Unavailable("scripted outage".into()));
            }
            Ok(u32::from(self.addresses.lock().remove(service).is_some()))
        }
    }

    fn engine_with(config_str: &str, upstream: ScriptedUpstream) -> (RoutingEngine, Arc<ScriptedUpstream>) {
        let configuration = ProxyConfig::parse(config_str).unwrap().compile().unwrap();
        let upstream = Arc::new(upstream);
        let engine = RoutingEngine::new(configuration, Arc::clone(&upstream) as Arc<dyn UpstreamClient>);
        (engine, upstream)
    }

    const LOCAL_NO_FALLBACK: &str = r#"
        local_side = "local"

        [[services]]
        pattern = "sum"
        preferred = "local"
        fallback = false
    "#;

    const LOCAL_WITH_FALLBACK: &str = r#"
        local_side = "local"

        [[services]]
        pattern = "sum"
        preferred = "local"
        fallback = true
    "#;

    #[tokio::test]
    async fn lookup_local_only_without_provider_is_not_found() {
        let (engine, upstream) =
            engine_with(LOCAL_NO_FALLBACK, ScriptedUpstream::with_address("sum", "addr:1234"));

        let result = engine.lookup("sum").await;
        assert!(matches!(result, Err(ProxyError::NotFound(_))));
        // Fallback disabled: the upstream must never be consulted.
        assert_eq!(upstream.lookup_count(), 0);
    }

    #[tokio::test]
    async fn lookup_falls_back_to_upstream() {
        let (engine, upstream) =
            engine_with(LOCAL_WITH_FALLBACK, ScriptedUpstream::with_address("sum", "addr:1234"));

        let address = engine.lookup("sum").await.unwrap();
        assert_eq!(address, "addr:1234");
        assert_eq!(upstream.lookup_count(), 1);
    }

    #[tokio::test]
    async fn lookup_prefers_local_provider_over_upstream() {
        let (engine, upstream) =
            engine_with(LOCAL_WITH_FALLBACK, ScriptedUpstream::with_address("sum", "addr:1234"));

        engine.registry().register_provider("sum", "c1", "local:9000");

        let address = engine.lookup("sum").await.unwrap();
        assert_eq!(address, "local:9000");
        assert_eq!(upstream.lookup_count(), 0);
    }

    #[tokio::test]
    async fn lookup_prefers_remote_then_falls_back_to_local() {
        // Default policy: prefer remote, fallback enabled.
        let (engine, upstream) = engine_with("", ScriptedUpstream::unavailable());

        engine.registry().register_provider("nav", "c1", "local:9000");

        let address = engine.lookup("nav").await.unwrap();
        assert_eq!(address, "local:9000");
        assert_eq!(upstream.lookup_count(), 1);
    }

    #[tokio::test]
    async fn lookup_exhausting_both_sides_is_not_found() {
        let (engine, _) = engine_with("", ScriptedUpstream::unavailable());

        let result = engine.lookup("nowhere").await;
        assert!(matches!(result, Err(ProxyError::NotFound(_))));
    }

    #[tokio::test]
    async fn register_local_only_skips_upstream() {
        let (engine, upstream) = engine_with(LOCAL_NO_FALLBACK, ScriptedUpstream::default());

        let outcome = engine
            .register_provider("sum", "c1", "local:9000", "http://c1:8000")
            .await;

        assert!(outcome.local);
        assert!(outcome.upstream.is_none());
        assert!(outcome.is_complete());
        assert_eq!(upstream.registrations.load(Ordering::SeqCst), 0);
        assert!(engine.registry().has_provider("sum", "c1", "local:9000"));
    }

    #[tokio::test]
    async fn register_with_fallback_targets_both_sides() {
        let (engine, upstream) = engine_with(LOCAL_WITH_FALLBACK, ScriptedUpstream::default());

        let outcome = engine
            .register_provider("sum", "c1", "local:9000", "http://c1:8000")
            .await;

        assert!(outcome.local);
        assert!(matches!(outcome.upstream, Some(Ok(()))));
        assert_eq!(upstream.registrations.load(Ordering::SeqCst), 1);
        assert_eq!(engine.registry().provider_count("sum"), 1);
    }

    #[tokio::test]
    async fn register_remote_only_skips_local() {
        let config = r#"
            local_side = "local"

            [[services]]
            pattern = "get_map"
            preferred = "remote"
            fallback = false
        "#;
        let (engine, _) = engine_with(config, ScriptedUpstream::default());

        let outcome = engine
            .register_provider("get_map", "c1", "local:9000", "http://c1:8000")
            .await;

        assert!(!outcome.local);
        assert!(matches!(outcome.upstream, Some(Ok(()))));
        assert!(engine.registry().is_empty());
    }

    #[tokio::test]
    async fn partial_registration_is_reported_not_rolled_back() {
        let (engine, _) = engine_with(LOCAL_WITH_FALLBACK, ScriptedUpstream::unavailable());

        let outcome = engine
            .register_provider("sum", "c1", "local:9000", "http://c1:8000")
            .await;

        assert!(outcome.local);
        assert!(matches!(
            &outcome.upstream,
            Some(Err(UpstreamError::Unavailable(_)))
        ));
        assert!(!outcome.is_complete());
        // The local side keeps its registration.
        assert!(engine.registry().has_provider("sum", "c1", "local:9000"));

        assert!(matches!(
            outcome.into_result(),
            Err(ProxyError::Upstream(UpstreamError::Unavailable(_)))
        ));
    }

    #[tokio::test]
    async fn unregister_mirrors_registration_targets() {
        let (engine, _) = engine_with(LOCAL_WITH_FALLBACK, ScriptedUpstream::default());

        engine
            .register_provider("sum", "c1", "local:9000", "http://c1:8000")
            .await;
        let outcome = engine.unregister_provider("sum", "c1", "local:9000").await;

        assert_eq!(outcome.local_removed, 1);
        assert!(matches!(outcome.upstream, Some(Ok(1))));
        assert!(engine.registry().is_empty());

        let again = engine.unregister_provider("sum", "c1", "local:9000").await;
        assert_eq!(again.local_removed, 0);
        assert!(matches!(again.upstream, Some(Ok(0))));
    }

    #[tokio::test]
    async fn unregister_local_only_skips_upstream() {
        let (engine, _) = engine_with(LOCAL_NO_FALLBACK, ScriptedUpstream::default());

        engine
            .register_provider("sum", "c1", "local:9000", "http://c1:8000")
            .await;
        let outcome = engine.unregister_provider("sum", "c1", "local:9000").await;

        assert_eq!(outcome.local_removed, 1);
        assert!(outcome.upstream.is_none());
    }

    #[tokio::test]
    async fn lookups_spread_across_local_providers() {
        let (engine, _) = engine_with(LOCAL_NO_FALLBACK, ScriptedUpstream::default());

        for i in 0..3 {
            engine
                .registry()
                .register_provider("sum", "c1", &format!("local:{i}"));
        }

        let mut seen = std::collections::HashSet::new();
        for _ in 0..3 {
            seen.insert(engine.lookup("sum").await.unwrap());
        }
        assert_eq!(seen.len(), 3);
    }
}
