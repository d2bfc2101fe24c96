//! DNS lookup client backed by hickory-resolver

use async_trait::async_trait;
use hickory_resolver::{
    ResolveError, TokioResolver, config::ResolverConfig, name_server::TokioConnectionProvider,
};
use std::net::IpAddr;

use crate::Error;
use crate::config::IpVersion;
use crate::traits::DnsLookup;

/// Reads published A/AAAA records through the system resolver
///
/// Falls back to hickory's default upstreams when the system configuration
/// cannot be read.
pub struct HickoryLookup {
    resolver: TokioResolver,
}

impl HickoryLookup {
    pub fn new() -> Self {
        let resolver = match TokioResolver::builder_tokio() {
            Ok(builder) => builder.build(),
            Err(e) => {
                tracing::warn!(
                    "Failed to load system DNS configuration, falling back to defaults: {e}"
                );
                TokioResolver::builder_with_config(
                    ResolverConfig::default(),
                    TokioConnectionProvider::default(),
                )
                .build()
            }
        };
        Self { resolver }
    }

    /// Use a preconfigured resolver
    pub fn with_resolver(resolver: TokioResolver) -> Self {
        Self { resolver }
    }

    async fn lookup_v4(&self, hostname: &str) -> Result<Vec<IpAddr>, Error> {
        match self.resolver.ipv4_lookup(hostname).await {
            Ok(response) => Ok(response.iter().map(|a| IpAddr::V4(a.0)).collect()),
            Err(e) => empty_or_error(hostname, "A", e),
        }
    }

    async fn lookup_v6(&self, hostname: &str) -> Result<Vec<IpAddr>, Error> {
        match self.resolver.ipv6_lookup(hostname).await {
            Ok(response) => Ok(response.iter().map(|aaaa| IpAddr::V6(aaaa.0)).collect()),
            Err(e) => empty_or_error(hostname, "AAAA", e),
        }
    }
}

impl Default for HickoryLookup {
    fn default() -> Self {
        Self::new()
    }
}

fn empty_or_error(hostname: &str, rtype: &str, e: ResolveError) -> Result<Vec<IpAddr>, Error> {
    if e.is_no_records_found() || e.is_nx_domain() {
        Ok(Vec::new())
    } else {
        Err(Error::dns_lookup(format!("{rtype} lookup for {hostname} failed: {e}")))
    }
}

#[async_trait]
impl DnsLookup for HickoryLookup {
    async fn lookup(&self, hostname: &str, version: IpVersion) -> Result<Vec<IpAddr>, Error> {
        match version {
            IpVersion::V4 => self.lookup_v4(hostname).await,
            IpVersion::V6 => self.lookup_v6(hostname).await,
            IpVersion::Both => {
                let (v4, v6) = tokio::join!(self.lookup_v4(hostname), self.lookup_v6(hostname));
                let mut all = v4?;
                all.extend(v6?);
                Ok(all)
            }
        }
    }
}
