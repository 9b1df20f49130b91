//! Proxy configuration with layered loading.
//!
//! Configuration comes from a TOML document (default `umbra.toml`) merged
//! with `UMBRA_`-prefixed environment variables. The raw [`ProxyConfig`] is
//! plain deserialized data; [`ProxyConfig::compile`] turns it into the
//! immutable [`Configuration`] the engine holds, compiling every rule
//! pattern. A pattern that fails to compile aborts startup — the proxy never
//! runs with an unusable policy table.

use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Toml},
    Error as FigmentError, Figment,
};
use serde::Deserialize;
use thiserror::Error;

use crate::policy::{Fallback, PolicyTable, RoutingRule, Side};

/// Errors that can occur when loading or compiling proxy configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Error from the Figment configuration library.
    #[error("configuration error: {0}")]
    Figment(Box<FigmentError>),

    /// The specified configuration file was not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// A service rule pattern failed to compile.
    #[error("invalid service pattern `{pattern}`: {source}")]
    InvalidPattern {
        pattern: String,
        source: Box<regex::Error>,
    },
}

impl From<FigmentError> for ConfigError {
    fn from(err: FigmentError) -> Self {
        Self::Figment(Box::new(err))
    }
}

/// Top-level proxy configuration, as deserialized.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ProxyConfig {
    /// Which side this proxy instance considers "local". Compared against a
    /// rule's preferred side to decide which registry is tried first.
    #[serde(default)]
    pub local_side: Side,

    /// Upstream registry connection settings.
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Ordered service rules; earlier rules match first.
    #[serde(default)]
    pub services: Vec<RuleConfig>,
}

/// Upstream registry connection settings.
///
/// The engine itself never dials the upstream; these settings are handed to
/// the transport collaborator that implements the upstream client.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// URL of the authoritative upstream registry.
    #[serde(default = "default_upstream_url")]
    pub url: String,

    /// Per-call timeout for upstream requests.
    #[serde(
        default = "default_upstream_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub timeout: Duration,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: default_upstream_url(),
            timeout: default_upstream_timeout(),
        }
    }
}

fn default_upstream_url() -> String {
    "http://127.0.0.1:11311".to_owned()
}

const fn default_upstream_timeout() -> Duration {
    Duration::from_secs(5)
}

/// One service rule, as deserialized. Field defaults mirror the default
/// policy: prefer remote, fallback enabled, recursive resolution.
#[derive(Debug, Clone, Deserialize)]
pub struct RuleConfig {
    /// Pattern matched against the start of service names.
    pub pattern: String,

    /// Side to try first for matching services.
    #[serde(default = "default_preferred")]
    pub preferred: Side,

    /// Boolean fallback switch, or a list of alternate service names
    /// (reserved form).
    #[serde(default)]
    pub fallback: FallbackConfig,

    /// Whether resolution recurses through alias chains (reserved).
    #[serde(default = "default_true")]
    pub recursive: bool,
}

const fn default_preferred() -> Side {
    Side::Remote
}

const fn default_true() -> bool {
    true
}

/// Fallback setting as it appears in configuration: a boolean switch or a
/// list of alternate names.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FallbackConfig {
    /// `true` enables fallback to the other side, `false` disables it.
    Switch(bool),
    /// Alternate service names to try instead (reserved, parsed only).
    Alternates(Vec<String>),
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self::Switch(true)
    }
}

impl From<FallbackConfig> for Fallback {
    fn from(config: FallbackConfig) -> Self {
        match config {
            FallbackConfig::Switch(true) => Self::Enabled,
            FallbackConfig::Switch(false) => Self::Disabled,
            FallbackConfig::Alternates(names) => Self::Alternates(names),
        }
    }
}

impl ProxyConfig {
    /// Loads configuration from the default path (`umbra.toml`).
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("umbra.toml")
    }

    /// Loads configuration from the specified file path.
    ///
    /// Environment variables prefixed with `UMBRA_` override file settings.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let figment = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("UMBRA_").split("__").lowercase(false));

        figment.extract::<Self>().map_err(ConfigError::from)
    }

    /// Parses configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let figment = Figment::new().merge(Toml::string(content));
        figment.extract::<Self>().map_err(ConfigError::from)
    }

    /// Compiles the raw configuration into the immutable form the engine
    /// holds, compiling every rule pattern in table order.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidPattern`] for the first rule whose
    /// pattern does not compile.
    pub fn compile(self) -> Result<Configuration, ConfigError> {
        let rules = self
            .services
            .into_iter()
            .map(|rule| {
                RoutingRule::new(
                    &rule.pattern,
                    rule.preferred,
                    rule.fallback.into(),
                    rule.recursive,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Configuration {
            local_side: self.local_side,
            upstream: self.upstream,
            policies: PolicyTable::new(rules),
        })
    }
}

/// Compiled, immutable configuration for one proxy instance.
///
/// Constructed once at startup and passed into the engine explicitly; there
/// is no process-wide configuration state.
#[derive(Debug)]
pub struct Configuration {
    /// Which side this instance considers "local".
    pub local_side: Side,
    /// Upstream registry connection settings.
    pub upstream: UpstreamConfig,
    /// Compiled policy table.
    pub policies: PolicyTable,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            local_side: Side::Local,
            upstream: UpstreamConfig::default(),
            policies: PolicyTable::default(),
        }
    }
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_duration(&s).map_err(serde::de::Error::custom)
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if let Some(stripped) = s.strip_suffix("ms") {
        let ms: u64 = stripped
            .trim()
            .parse()
            .map_err(|_| format!("invalid duration: {s}"))?;
        Ok(Duration::from_millis(ms))
    } else if let Some(stripped) = s.strip_suffix('s') {
        let secs: u64 = stripped
            .trim()
            .parse()
            .map_err(|_| format!("invalid duration: {s}"))?;
        Ok(Duration::from_secs(secs))
    } else {
        let secs: u64 = s.parse().map_err(|_| format!("invalid duration: {s}"))?;
        Ok(Duration::from_secs(secs))
    }
}
