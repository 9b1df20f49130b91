//! Routing rules and the ordered policy table.
//!
//! A [`RoutingRule`] pairs a prefix-anchored name pattern with the routing
//! effects for matching services. The [`PolicyTable`] resolves a service name
//! to its effective rule with first-match-wins semantics and falls back to a
//! fixed default policy when nothing matches. The table is built once at
//! startup and is immutable afterwards, so concurrent readers need no lock.

use regex::Regex;
use serde::Deserialize;

use crate::config::ConfigError;

/// Which registry a rule (or this proxy instance) considers its own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// The registry owned by this proxy instance.
    #[default]
    Local,
    /// The authoritative upstream registry.
    Remote,
}

impl Side {
    /// Returns the opposite side.
    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Self::Local => Self::Remote,
            Self::Remote => Self::Local,
        }
    }
}

/// Whether a lookup may try the non-preferred side after the preferred side
/// fails to resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fallback {
    /// Never consult the other side.
    Disabled,
    /// Try the other side when the preferred side yields nothing.
    Enabled,
    /// Try these alternate service names instead.
    ///
    /// Reserved: the list form parses from configuration but the engine
    /// currently treats it exactly like [`Fallback::Enabled`].
    Alternates(Vec<String>),
}

impl Fallback {
    /// Returns true when falling back to the other side is permitted.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        !matches!(self, Self::Disabled)
    }
}

/// A compiled routing rule: name pattern plus routing effects.
#[derive(Debug, Clone)]
pub struct RoutingRule {
    pattern: Regex,
    /// Side to try first for matching services.
    pub preferred: Side,
    /// Fallback behaviour when the preferred side fails to resolve.
    pub fallback: Fallback,
    /// Whether resolution should recurse through alias chains.
    ///
    /// Reserved: parsed and carried, not consulted by the engine.
    pub recursive: bool,
}

impl RoutingRule {
    /// Compiles a rule from its pattern source.
    ///
    /// Patterns are anchored at the start of the service name but need not
    /// consume the whole name, mirroring prefix-style matching.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidPattern`] if the pattern does not
    /// compile. This is a configuration load error, never a runtime one.
    pub fn new(
        pattern: &str,
        preferred: Side,
        fallback: Fallback,
        recursive: bool,
    ) -> Result<Self, ConfigError> {
        let anchored = format!("^(?:{pattern})");
        let pattern = Regex::new(&anchored).map_err(|source| ConfigError::InvalidPattern {
            pattern: pattern.to_owned(),
            source: Box::new(source),
        })?;

        Ok(Self {
            pattern,
            preferred,
            fallback,
            recursive,
        })
    }

    /// Returns true if the rule's pattern matches the start of `name`.
    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        self.pattern.is_match(name)
    }

    /// Returns the source text of the rule's pattern, without the anchor.
    #[must_use]
    pub fn pattern(&self) -> &str {
        self.pattern
            .as_str()
            .strip_prefix("^(?:")
            .and_then(|s| s.strip_suffix(')'))
            .unwrap_or_else(|| self.pattern.as_str())
    }

    /// True when matching services live only in the local registry:
    /// preferred side is local and fallback is disabled.
    #[must_use]
    pub fn is_local_only(&self) -> bool {
        self.preferred == Side::Local && !self.fallback.is_enabled()
    }

    /// True when matching services are served only by the upstream:
    /// preferred side is remote and fallback is disabled.
    #[must_use]
    pub fn is_remote_only(&self) -> bool {
        self.preferred == Side::Remote && !self.fallback.is_enabled()
    }

    /// The default policy used when no rule matches a name:
    /// prefer remote, fallback enabled, recursive resolution.
    #[must_use]
    pub fn default_rule() -> Self {
        Self {
            // ".*" always compiles
            pattern: Regex::new("^(?:.*)").unwrap_or_else(|_| unreachable!()),
            preferred: Side::Remote,
            fallback: Fallback::Enabled,
            recursive: true,
        }
    }
}

/// Ordered collection of routing rules.
///
/// Insertion order is match-priority order. Resolution never fails: names
/// matched by no rule resolve to [`RoutingRule::default_rule`].
#[derive(Debug)]
pub struct PolicyTable {
    rules: Vec<RoutingRule>,
    default_rule: RoutingRule,
}

impl PolicyTable {
    /// Creates a policy table from rules in match-priority order.
    #[must_use]
    pub fn new(rules: Vec<RoutingRule>) -> Self {
        Self {
            rules,
            default_rule: RoutingRule::default_rule(),
        }
    }

    /// Resolves a service name to its effective rule, first match wins.
    #[must_use]
    pub fn resolve(&self, service: &str) -> &RoutingRule {
        self.rules
            .iter()
            .find(|rule| rule.matches(service))
            .unwrap_or(&self.default_rule)
    }

    /// Returns the number of configured rules, excluding the default.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns true if no rules are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}
