// # dyndns2 DNS Provider
//
// Provider adapter for the dyndns2 update protocol, spoken by many vendors
// (Dyn, No-IP, ALL-INKL, ...): one authenticated GET carrying the hostname
// and the address, answered by a one-line status such as `good 1.2.3.4`.
//
// ## Trust Level: Untrusted (DNS Provider)
//
// One request per `update`, no retries, no caching. Every non-success
// answer maps onto an error category so the engine can record it.

use async_trait::async_trait;
use ddns_core::config::{IpVersion, RecordConfig};
use ddns_core::traits::{DnsProvider, DnsProviderFactory, ProviderDescription};
use ddns_core::{Error, ProviderRegistry, Result};
use reqwest::StatusCode;
use serde::Deserialize;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

/// User agent; some servers answer `badagent` to generic clients
const USER_AGENT: &str = concat!("ddns-updater/", env!("CARGO_PKG_VERSION"));

/// Record settings from the `settings` object of a record
#[derive(Clone, Deserialize)]
pub struct DynDnsSettings {
    /// Update endpoint, e.g. `https://dyndns.kasserver.com/`
    pub url: String,
    pub username: String,
    pub password: String,
}

/// dyndns2 provider bound to one record
pub struct DynDnsProvider {
    settings: DynDnsSettings,
    domain: String,
    host: String,
    ip_version: IpVersion,
    hostname: String,
    client: reqwest::Client,
}

// Custom Debug implementation that hides the password
impl std::fmt::Debug for DynDnsProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynDnsProvider")
            .field("url", &self.settings.url)
            .field("username", &self.settings.username)
            .field("password", &"<REDACTED>")
            .field("hostname", &self.hostname)
            .field("ip_version", &self.ip_version)
            .finish()
    }
}

impl DynDnsProvider {
    pub fn new(
        settings: DynDnsSettings,
        domain: impl Into<String>,
        host: impl Into<String>,
        ip_version: IpVersion,
        client: reqwest::Client,
    ) -> Self {
        let domain = domain.into();
        let host = host.into();
        let hostname = ddns_core::record::build_fqdn(&host, &domain);
        Self {
            settings,
            domain,
            host,
            ip_version,
            hostname,
            client,
        }
    }
}

#[async_trait]
impl DnsProvider for DynDnsProvider {
    async fn update(&self, ip: IpAddr) -> Result<IpAddr> {
        let ip_param = match ip {
            IpAddr::V4(_) => "myip",
            IpAddr::V6(_) => "myip6",
        };
        let ip_text = ip.to_string();

        tracing::debug!("Sending dyndns2 update for {} to {}", self.hostname, self.settings.url);

        let response = self
            .client
            .get(&self.settings.url)
            .basic_auth(&self.settings.username, Some(&self.settings.password))
            .query(&[("hostname", self.hostname.as_str()), (ip_param, ip_text.as_str())])
            .send()
            .await
            .map_err(|e| Error::http(format!("dyndns request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::http(format!("Failed to read dyndns response: {}", e)))?;

        parse_response(status, &body, ip)
    }

    fn validate(&self) -> Result<()> {
        if self.settings.url.is_empty() {
            return Err(Error::config("dyndns url cannot be empty"));
        }
        if !self.settings.url.starts_with("https://") && !self.settings.url.starts_with("http://") {
            return Err(Error::config(format!(
                "dyndns url must be http(s): {}",
                self.settings.url
            )));
        }
        if self.settings.username.is_empty() {
            return Err(Error::config("dyndns username cannot be empty"));
        }
        if self.settings.password.is_empty() {
            return Err(Error::config("dyndns password cannot be empty"));
        }
        if self.host == "*" || self.host.starts_with("*.") {
            return Err(Error::config("dyndns does not support wildcard hosts"));
        }
        Ok(())
    }

    fn describe(&self) -> ProviderDescription {
        ProviderDescription::new("dyndns").for_record(&self.domain, &self.host, self.ip_version)
    }

    fn provider_name(&self) -> &'static str {
        "dyndns"
    }
}

/// Interpret a dyndns2 answer to an update for `requested`
///
/// Returns the address the server confirmed, which must be `requested`.
pub fn parse_response(status: StatusCode, body: &str, requested: IpAddr) -> Result<IpAddr> {
    let text = body.trim();

    if status != StatusCode::OK {
        let detail = text.lines().next().unwrap_or_default();
        return Err(match status.as_u16() {
            401 | 403 => Error::auth(format!("{}: {}", status, detail)),
            429 => Error::rate_limited(format!("{}: {}", status, detail)),
            500..=599 => Error::http(format!("dyndns server error {}: {}", status, detail)),
            _ => Error::provider("dyndns", format!("{}: {}", status, detail)),
        });
    }

    match text {
        "" => return Err(Error::malformed("empty dyndns response")),
        "911" | "dnserr" => return Err(Error::http("dyndns server-side error")),
        "abuse" => return Err(Error::rate_limited("hostname blocked for abuse")),
        "badagent" => return Err(Error::rate_limited("user agent banned")),
        "badauth" => return Err(Error::auth("bad username or password")),
        "nohost" => return Err(Error::config("hostname does not exist for this account")),
        "notfqdn" => return Err(Error::config("hostname is not a fully qualified name")),
        "numhost" => return Err(Error::config("too many hosts in request")),
        "!donator" => {
            return Err(Error::provider(
                "dyndns",
                "feature not available on this account",
            ));
        }
        _ => {}
    }

    if !text.contains("good") && !text.contains("nochg") {
        return Err(Error::malformed(format!("unknown dyndns response: {}", text)));
    }

    let confirmed = text
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter_map(|token| token.parse::<IpAddr>().ok())
        .find(|ip| ip.is_ipv4() == requested.is_ipv4())
        .ok_or_else(|| Error::malformed(format!("no IP address in dyndns response: {}", text)))?;

    if confirmed != requested {
        return Err(Error::ip_mismatch(requested, confirmed));
    }
    Ok(confirmed)
}

/// Factory for creating dyndns2 providers
pub struct DynDnsFactory {
    client: reqwest::Client,
}

impl DynDnsFactory {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

impl DnsProviderFactory for DynDnsFactory {
    fn create(&self, config: &RecordConfig) -> Result<Arc<dyn DnsProvider>> {
        let settings: DynDnsSettings = config.settings_as()?;

        let provider = DynDnsProvider::new(
            settings,
            config.domain.clone(),
            config.host.clone(),
            config.ip_version,
            self.client.clone(),
        );
        provider.validate()?;

        Ok(Arc::new(provider))
    }
}

/// Register the dyndns2 provider with a registry
pub fn register(registry: &ProviderRegistry, timeout: Duration) -> Result<()> {
    registry.register_provider("dyndns", Box::new(DynDnsFactory::new(timeout)?));
    Ok(())
}
