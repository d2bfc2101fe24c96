//! Configuration types for the DDNS system
//!
//! This module defines all configuration structures used throughout the crate.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Main DDNS configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DdnsConfig {
    /// DNS records to manage
    pub records: Vec<RecordConfig>,

    /// Public IP resolution strategies
    #[serde(default)]
    pub public_ip: PublicIpConfig,

    /// State store configuration
    #[serde(default)]
    pub state_store: StateStoreConfig,

    /// Optional engine settings
    #[serde(default)]
    pub engine: EngineConfig,
}

impl DdnsConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from a JSON document
    pub fn from_json(json: &str) -> Result<Self, crate::Error> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, crate::Error> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::Error::config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    /// Validate the configuration
    ///
    /// Only structural problems are reported here. Per-record settings are
    /// validated by the provider factories when records are built, so one
    /// broken record does not prevent the others from running.
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.records.is_empty() {
            return Err(crate::Error::config("No records configured"));
        }

        for record in &self.records {
            record.validate()?;
        }

        self.public_ip.validate()?;
        self.state_store.validate()?;
        self.engine.validate()?;

        Ok(())
    }
}

/// IP version a record targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpVersion {
    /// IPv4 only (A record)
    #[default]
    #[serde(alias = "ipv4")]
    V4,
    /// IPv6 only (AAAA record)
    #[serde(alias = "ipv6")]
    V6,
    /// Whichever family resolves first, IPv4 preferred
    #[serde(alias = "ipv4 or ipv6")]
    Both,
}

impl IpVersion {
    /// Whether an address belongs to this version
    pub fn matches(&self, ip: &std::net::IpAddr) -> bool {
        match self {
            IpVersion::V4 => ip.is_ipv4(),
            IpVersion::V6 => ip.is_ipv6(),
            IpVersion::Both => true,
        }
    }
}

impl fmt::Display for IpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IpVersion::V4 => "v4",
            IpVersion::V6 => "v6",
            IpVersion::Both => "both",
        };
        f.write_str(s)
    }
}

/// DNS record configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordConfig {
    /// Registered domain (e.g., "example.com")
    pub domain: String,

    /// Host within the domain: "@" for the root, "*" for a wildcard
    #[serde(default = "default_host")]
    pub host: String,

    /// Which address family to keep updated
    #[serde(default)]
    pub ip_version: IpVersion,

    /// Registry name of the provider adapter (e.g., "cloudflare")
    pub provider: String,

    /// Provider-specific settings, interpreted by the provider factory
    #[serde(default)]
    pub settings: serde_json::Value,

    /// Disable the DNS lookup short-circuit for this record
    #[serde(default)]
    pub no_dns_lookup: bool,

    /// Per-record check period, overriding the engine default
    #[serde(default)]
    pub period_secs: Option<u64>,

    /// Whether this record is enabled
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl RecordConfig {
    /// Create a new record configuration
    pub fn new(domain: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            host: default_host(),
            ip_version: IpVersion::default(),
            provider: provider.into(),
            settings: serde_json::Value::Null,
            no_dns_lookup: false,
            period_secs: None,
            enabled: true,
        }
    }

    /// Set the host
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the IP version
    pub fn with_ip_version(mut self, ip_version: IpVersion) -> Self {
        self.ip_version = ip_version;
        self
    }

    /// Set the provider settings
    pub fn with_settings(mut self, settings: serde_json::Value) -> Self {
        self.settings = settings;
        self
    }

    /// Enable or disable the record
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Fully qualified record name
    pub fn fqdn(&self) -> String {
        crate::record::build_fqdn(&self.host, &self.domain)
    }

    /// Parse the provider settings into an adapter-specific type
    pub fn settings_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, crate::Error> {
        serde_json::from_value(self.settings.clone()).map_err(|e| {
            crate::Error::config(format!(
                "Invalid {} settings for {}: {}",
                self.provider, self.domain, e
            ))
        })
    }

    /// Validate fields that do not depend on the provider
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.domain.is_empty() {
            return Err(crate::Error::config("Record domain cannot be empty"));
        }
        if self.provider.is_empty() {
            return Err(crate::Error::config(format!(
                "Record {} has no provider",
                self.domain
            )));
        }
        if self.period_secs == Some(0) {
            return Err(crate::Error::config(format!(
                "Record {} period must be > 0",
                self.domain
            )));
        }
        Ok(())
    }
}

fn default_host() -> String {
    "@".to_string()
}

fn default_enabled() -> bool {
    true
}

/// Public IP resolution configuration
///
/// Strategies are tried in order until one yields an address.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PublicIpConfig {
    #[serde(default)]
    pub strategies: Vec<StrategyConfig>,
}

impl PublicIpConfig {
    /// Validate the strategy list
    pub fn validate(&self) -> Result<(), crate::Error> {
        for strategy in &self.strategies {
            if let StrategyConfig::Http { detectors, .. } = strategy {
                if detectors.is_empty() {
                    return Err(crate::Error::config(
                        "HTTP strategy needs at least one detector",
                    ));
                }
                for detector in detectors {
                    detector.validate()?;
                }
            }
        }
        Ok(())
    }
}

/// One public IP resolution strategy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StrategyConfig {
    /// Inspect the outbound network interface
    Local {
        /// Probe address for IPv4 route selection (no packet is sent)
        #[serde(default)]
        probe_v4: Option<String>,
        /// Probe address for IPv6 route selection (no packet is sent)
        #[serde(default)]
        probe_v6: Option<String>,
    },

    /// Ask a remote echo service, one picked at random per call
    Http {
        detectors: Vec<DetectorConfig>,
        /// Fixed seed for the picker (reproducible selection)
        #[serde(default)]
        seed: Option<u64>,
    },
}

/// Remote public IP detector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DetectorConfig {
    /// Plain HTTP echo service
    Http {
        /// Name used in logs and resolved-IP tags
        name: String,
        /// Dual-stack URL
        #[serde(default)]
        url: Option<String>,
        /// IPv4-only URL
        #[serde(default)]
        url_v4: Option<String>,
        /// IPv6-only URL
        #[serde(default)]
        url_v6: Option<String>,
    },

    /// Custom detector
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl DetectorConfig {
    /// Validate the detector configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            DetectorConfig::Http {
                name,
                url,
                url_v4,
                url_v6,
            } => {
                if name.is_empty() {
                    return Err(crate::Error::config("HTTP detector name cannot be empty"));
                }
                if url.is_none() && url_v4.is_none() && url_v6.is_none() {
                    return Err(crate::Error::config(format!(
                        "HTTP detector {name} has no URL"
                    )));
                }
                Ok(())
            }
            DetectorConfig::Custom { factory, config } => {
                if factory.is_empty() {
                    return Err(crate::Error::config(
                        "Custom detector factory cannot be empty",
                    ));
                }
                if config.is_null() {
                    return Err(crate::Error::config("Custom detector config cannot be null"));
                }
                Ok(())
            }
        }
    }

    /// Get the factory name
    pub fn type_name(&self) -> &str {
        match self {
            DetectorConfig::Http { .. } => "http",
            DetectorConfig::Custom { factory, .. } => factory,
        }
    }
}

/// State store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateStoreConfig {
    /// File-based state store
    File {
        /// Path to the state file
        path: String,
        /// Maximum history entries kept per record (0 = unbounded)
        #[serde(default = "default_history_limit")]
        history_limit: usize,
    },

    /// In-memory state store (not persistent)
    Memory {
        #[serde(default = "default_history_limit")]
        history_limit: usize,
    },

    /// Custom state store
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl Default for StateStoreConfig {
    fn default() -> Self {
        StateStoreConfig::Memory {
            history_limit: default_history_limit(),
        }
    }
}

impl StateStoreConfig {
    /// Validate the state store configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            StateStoreConfig::File { path, .. } if path.is_empty() => {
                Err(crate::Error::config("State file path cannot be empty"))
            }
            StateStoreConfig::Custom { factory, .. } if factory.is_empty() => Err(
                crate::Error::config("Custom state store factory cannot be empty"),
            ),
            _ => Ok(()),
        }
    }

    /// Get the factory name
    pub fn type_name(&self) -> &str {
        match self {
            StateStoreConfig::File { .. } => "file",
            StateStoreConfig::Memory { .. } => "memory",
            StateStoreConfig::Custom { factory, .. } => factory,
        }
    }
}

/// History entries kept per record when not configured
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

fn default_history_limit() -> usize {
    DEFAULT_HISTORY_LIMIT
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Interval between scheduled checks of each record (in seconds)
    #[serde(default = "default_period_secs")]
    pub period_secs: u64,

    /// Minimum time since the last provider call before another one is made
    /// for the same record (in seconds)
    ///
    /// Set to 0 to disable.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    /// Timeout applied to HTTP calls by detectors and adapters
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,

    /// How long `stop` waits for in-flight cycles before abandoning them
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    /// Capacity of the engine event channel
    ///
    /// When full, new events are dropped (with a warning log).
    ///
    /// Default: 1000 events
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            period_secs: default_period_secs(),
            cooldown_secs: default_cooldown_secs(),
            http_timeout_secs: default_http_timeout_secs(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

impl EngineConfig {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Validate the engine settings
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.period_secs == 0 {
            return Err(crate::Error::config("Engine period must be > 0"));
        }
        if self.http_timeout_secs == 0 {
            return Err(crate::Error::config("HTTP timeout must be > 0"));
        }
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("Event channel capacity must be > 0"));
        }
        Ok(())
    }
}

fn default_period_secs() -> u64 {
    600
}

fn default_cooldown_secs() -> u64 {
    300
}

fn default_http_timeout_secs() -> u64 {
    10
}

fn default_shutdown_timeout_secs() -> u64 {
    10
}

fn default_event_channel_capacity() -> usize {
    1000
}
