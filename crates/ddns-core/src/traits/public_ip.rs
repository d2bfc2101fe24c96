// # Public IP Traits
//
// Interfaces for finding the host's current public address.
//
// - `PublicIpFetcher`: what the engine consumes (`ip`, `ip4`, `ip6`)
// - `IpDetector`: one remote echo service queried by a single request
//
// ## Implementations
//
// - `PublicIpResolver` in this crate (local interface + detector pool)
// - HTTP detectors: `ddns-ip-http` crate

use async_trait::async_trait;
use std::fmt;
use std::net::IpAddr;

use crate::config::{DetectorConfig, IpVersion};

/// Address family of a resolved IP
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpFamily {
    V4,
    V6,
}

impl IpFamily {
    pub fn of(ip: &IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => IpFamily::V4,
            IpAddr::V6(_) => IpFamily::V6,
        }
    }
}

/// Where a resolved address came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpOrigin {
    /// Outbound network interface
    Local,
    /// Remote detection service, by name
    Remote(String),
}

impl fmt::Display for IpOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpOrigin::Local => f.write_str("local"),
            IpOrigin::Remote(name) => write!(f, "remote:{name}"),
        }
    }
}

/// Outcome of one resolution attempt
///
/// Ephemeral; only the address itself ever reaches the state store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIp {
    pub ip: IpAddr,
    pub family: IpFamily,
    pub origin: IpOrigin,
}

impl ResolvedIp {
    pub fn new(ip: IpAddr, origin: IpOrigin) -> Self {
        Self {
            ip,
            family: IpFamily::of(&ip),
            origin,
        }
    }
}

/// Represents a detected IP address change event
///
/// Fed to [`DdnsEngine::watch_ip_changes`](crate::DdnsEngine::watch_ip_changes)
/// to trigger out-of-band cycles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpChangeEvent {
    /// The new IP address
    pub new_ip: IpAddr,
    /// The previous IP address (if known)
    pub previous_ip: Option<IpAddr>,
    /// Which address family changed
    pub family: IpFamily,
}

impl IpChangeEvent {
    /// Create a new IP change event
    pub fn new(new_ip: IpAddr, previous_ip: Option<IpAddr>) -> Self {
        Self {
            new_ip,
            previous_ip,
            family: IpFamily::of(&new_ip),
        }
    }

    /// Whether records of `version` are affected
    pub fn affects(&self, version: IpVersion) -> bool {
        version.matches(&self.new_ip)
    }
}

/// The host's public address, as the engine sees it
///
/// Every method either returns one address of the requested family or
/// fails with [`Error::NoAddressAvailable`](crate::Error::NoAddressAvailable).
/// Implementations are shared by all record tasks and must be safe for
/// concurrent use.
#[async_trait]
pub trait PublicIpFetcher: Send + Sync {
    /// Any public address, IPv4 preferred
    async fn ip(&self) -> Result<ResolvedIp, crate::Error>;

    /// Public IPv4 address
    async fn ip4(&self) -> Result<ResolvedIp, crate::Error>;

    /// Public IPv6 address
    async fn ip6(&self) -> Result<ResolvedIp, crate::Error>;

    /// Dispatch on a record's IP version
    async fn resolve(&self, version: IpVersion) -> Result<ResolvedIp, crate::Error> {
        match version {
            IpVersion::V4 => self.ip4().await,
            IpVersion::V6 => self.ip6().await,
            IpVersion::Both => self.ip().await,
        }
    }
}

/// A single remote public IP detection service
///
/// # Trust Level: Untrusted
///
/// One request per call. No retries and no caching: the resolver picks a
/// different detector on the next call and the engine retries on its next
/// tick.
#[async_trait]
pub trait IpDetector: Send + Sync {
    /// Ask the service for our address of the given version
    ///
    /// `IpVersion::Both` lets the service answer with whichever family the
    /// connection used.
    async fn detect(&self, version: IpVersion) -> Result<IpAddr, crate::Error>;

    /// Whether this service can answer for `version`
    fn supports(&self, version: IpVersion) -> bool;

    /// Name used in logs and in [`IpOrigin::Remote`]
    fn name(&self) -> &str;
}

/// Helper trait for constructing detectors from configuration
pub trait IpDetectorFactory: Send + Sync {
    fn create(&self, config: &DetectorConfig) -> Result<Box<dyn IpDetector>, crate::Error>;
}
