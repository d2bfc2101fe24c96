// # DNS Provider Trait
//
// Defines the interface for updating one DNS record via a provider API.
//
// ## Implementations
//
// - Cloudflare: `ddns-provider-cloudflare` crate
// - dyndns2 protocol (All-Inkl, Dyn, No-IP style): `ddns-provider-dyndns` crate
//
// ## Usage
//
// ```rust,ignore
// use ddns_core::DnsProvider;
//
// #[tokio::main]
// async fn main() -> anyhow::Result<()> {
//     let provider = /* DnsProvider implementation bound to one record */;
//
//     let confirmed = provider.update("203.0.113.7".parse()?).await?;
//     println!("{} now serves {}", provider.describe(), confirmed);
//
//     Ok(())
// }
// ```

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use crate::config::{IpVersion, RecordConfig};

/// Human-readable summary of what an adapter manages
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderDescription {
    /// Provider name (e.g., "cloudflare")
    pub name: String,
    /// Registered domain
    pub domain: String,
    /// Host within the domain
    pub host: String,
    /// Address family
    pub ip_version: IpVersion,
}

impl ProviderDescription {
    /// Create a description with empty record fields
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            domain: String::new(),
            host: String::new(),
            ip_version: IpVersion::default(),
        }
    }

    /// Attach the record this adapter is bound to
    pub fn for_record(mut self, domain: &str, host: &str, ip_version: IpVersion) -> Self {
        self.domain = domain.to_string();
        self.host = host.to_string();
        self.ip_version = ip_version;
        self
    }
}

impl fmt::Display for ProviderDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}.{} ({})",
            self.name, self.host, self.domain, self.ip_version
        )
    }
}

/// Trait for DNS provider implementations
///
/// An adapter is bound to exactly one record at construction time and is
/// read-only afterwards. Each call to [`update`](DnsProvider::update) maps
/// to one vendor request chain.
///
/// # Thread Safety
///
/// Implementations must be thread-safe and usable across async tasks.
///
/// # Trust Level: Untrusted
///
/// ## Allowed Capabilities
/// - ✅ Perform HTTP/HTTPS API calls to their endpoints only
/// - ✅ Parse provider-specific responses
/// - ✅ Return a confirmed address or a typed failure
///
/// ## Forbidden Capabilities
/// - ❌ Spawn tasks or threads (violates shutdown determinism)
/// - ❌ Implement retry logic or backoff (owned by `DdnsEngine`)
/// - ❌ Access state store (owned by `DdnsEngine`)
/// - ❌ Decide whether an update is needed (owned by `DdnsEngine`)
///
/// ## Cancellation
///
/// The engine cancels an in-flight update by dropping its future.
/// Implementations must not leave work running behind it.
///
/// ## Errors
///
/// Return errors whose [`category`](crate::Error::category) reflects the
/// failure: `Error::auth` for rejected credentials, `Error::rate_limited` for
/// abuse locks, `Error::malformed` for unparseable bodies, `Error::ip_mismatch`
/// or a confirmed address different from the request, `Error::http` for
/// transport and server errors.
#[async_trait]
pub trait DnsProvider: Send + Sync {
    /// Point the record at `ip`
    ///
    /// # Returns
    ///
    /// - `Ok(IpAddr)`: The address the provider confirms as published
    /// - `Err(Error)`: If the update failed
    async fn update(&self, ip: IpAddr) -> Result<IpAddr, crate::Error>;

    /// Check the adapter's settings
    ///
    /// Called once when the record is built; a failure excludes the record
    /// from scheduling.
    fn validate(&self) -> Result<(), crate::Error>;

    /// Describe the record this adapter manages (for logs and status)
    fn describe(&self) -> ProviderDescription;

    /// Get the provider name (for logging/debugging)
    fn provider_name(&self) -> &'static str;

    /// Whether published DNS reflects the address we send
    ///
    /// Providers that publish something else (proxied records, for one)
    /// must return `false` so the engine never skips an update based on a
    /// lookup.
    fn supports_dns_lookup(&self) -> bool {
        true
    }
}

/// Helper trait for constructing DNS providers from configuration
pub trait DnsProviderFactory: Send + Sync {
    /// Create a DnsProvider bound to one record
    ///
    /// Factories parse `config.settings` and must reject empty credentials
    /// and hosts the vendor cannot serve.
    fn create(&self, config: &RecordConfig) -> Result<Arc<dyn DnsProvider>, crate::Error>;
}
