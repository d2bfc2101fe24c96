// # DNS Lookup Trait
//
// Reads the currently published value of a record so the engine can skip
// provider calls that would change nothing.

use async_trait::async_trait;
use std::net::IpAddr;

use crate::config::IpVersion;

/// Thin wrapper over a resolver
///
/// Implementations return only addresses of the requested version (all
/// families for `IpVersion::Both`). An empty answer is `Ok(vec![])`, not an
/// error. Cancellation happens by dropping the future.
#[async_trait]
pub trait DnsLookup: Send + Sync {
    async fn lookup(&self, hostname: &str, version: IpVersion)
    -> Result<Vec<IpAddr>, crate::Error>;
}
