// # Cloudflare DNS Provider
//
// Provider adapter for the Cloudflare v4 API.
//
// ## Trust Level: Untrusted (DNS Provider)
//
// The adapter is bound to one record at construction. Each `update` is one
// request chain (find the record, then create or overwrite it) with no
// retries, no caching and no background tasks. Retrying is the engine's
// next tick; cancellation is the engine dropping the future.
//
// ## Security
//
// The API token never appears in logs, errors or `Debug` output.
//
// ## API Reference
//
// - List DNS Records: GET `/zones/:zone_id/dns_records?type=A&name=...`
// - Create DNS Record: POST `/zones/:zone_id/dns_records`
// - Overwrite DNS Record: PUT `/zones/:zone_id/dns_records/:record_id`

use async_trait::async_trait;
use ddns_core::config::{IpVersion, RecordConfig};
use ddns_core::traits::{DnsProvider, DnsProviderFactory, ProviderDescription};
use ddns_core::{Error, ProviderRegistry, Result};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

/// Cloudflare API base URL
const CLOUDFLARE_API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// TTL value meaning "automatic"
const AUTO_TTL: u32 = 1;

/// Record settings from the `settings` object of a record
#[derive(Clone, Deserialize)]
pub struct CloudflareSettings {
    /// API token with Zone:DNS:Edit permission
    pub token: String,

    /// Zone identifier
    #[serde(alias = "zone_identifier")]
    pub zone_id: String,

    /// Record TTL in seconds (1 = automatic)
    #[serde(default = "default_ttl")]
    pub ttl: u32,

    /// Serve the record through Cloudflare's proxy
    #[serde(default)]
    pub proxied: bool,
}

fn default_ttl() -> u32 {
    AUTO_TTL
}

/// Cloudflare DNS provider bound to one record
pub struct CloudflareProvider {
    settings: CloudflareSettings,
    domain: String,
    host: String,
    ip_version: IpVersion,
    /// Fully qualified record name
    name: String,
    client: reqwest::Client,
}

// Custom Debug implementation that hides the API token
impl std::fmt::Debug for CloudflareProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudflareProvider")
            .field("token", &"<REDACTED>")
            .field("zone_id", &self.settings.zone_id)
            .field("name", &self.name)
            .field("ip_version", &self.ip_version)
            .field("ttl", &self.settings.ttl)
            .field("proxied", &self.settings.proxied)
            .finish()
    }
}

/// Body of create and overwrite requests
#[derive(Debug, Serialize)]
struct RecordPayload<'a> {
    #[serde(rename = "type")]
    record_type: &'static str,
    name: &'a str,
    content: String,
    proxied: bool,
    ttl: u32,
}

/// Cloudflare response envelope
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct DnsRecord {
    id: String,
    content: String,
}

impl CloudflareProvider {
    /// Bind a provider to `host.domain`
    pub fn new(
        settings: CloudflareSettings,
        domain: impl Into<String>,
        host: impl Into<String>,
        ip_version: IpVersion,
        client: reqwest::Client,
    ) -> Self {
        let domain = domain.into();
        let host = host.into();
        let name = ddns_core::record::build_fqdn(&host, &domain);
        Self {
            settings,
            domain,
            host,
            ip_version,
            name,
            client,
        }
    }

    fn records_url(&self) -> String {
        format!(
            "{}/zones/{}/dns_records",
            CLOUDFLARE_API_BASE, self.settings.zone_id
        )
    }

    /// Find the id of our record for `record_type`, if it exists
    async fn find_record(&self, record_type: &str) -> Result<Option<String>> {
        let response = self
            .client
            .get(self.records_url())
            .bearer_auth(&self.settings.token)
            .query(&[
                ("type", record_type),
                ("name", self.name.as_str()),
                ("page", "1"),
                ("per_page", "1"),
            ])
            .send()
            .await
            .map_err(|e| Error::http(format!("Cloudflare request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::http(format!("Failed to read Cloudflare response: {}", e)))?;

        check_status(status, &body)?;
        parse_record_id(&body)
    }
}

#[async_trait]
impl DnsProvider for CloudflareProvider {
    async fn update(&self, ip: IpAddr) -> Result<IpAddr> {
        let record_type = record_type(ip);

        let existing = self.find_record(record_type).await?;

        let payload = RecordPayload {
            record_type,
            name: &self.name,
            content: ip.to_string(),
            proxied: self.settings.proxied,
            ttl: self.settings.ttl,
        };

        let request = match &existing {
            Some(id) => {
                tracing::debug!("Overwriting Cloudflare record {} ({})", self.name, record_type);
                self.client.put(format!("{}/{}", self.records_url(), id))
            }
            None => {
                tracing::info!("Creating Cloudflare record {} ({})", self.name, record_type);
                self.client.post(self.records_url())
            }
        };

        let response = request
            .bearer_auth(&self.settings.token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::http(format!("Cloudflare request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::http(format!("Failed to read Cloudflare response: {}", e)))?;

        check_status(status, &body)?;
        parse_confirmed_ip(&body)
    }

    fn validate(&self) -> Result<()> {
        if self.settings.token.is_empty() {
            return Err(Error::config("Cloudflare token cannot be empty"));
        }
        if self.settings.zone_id.is_empty() {
            return Err(Error::config("Cloudflare zone_id cannot be empty"));
        }
        if self.settings.ttl == 0 {
            return Err(Error::config("Cloudflare ttl must be at least 1"));
        }
        Ok(())
    }

    fn describe(&self) -> ProviderDescription {
        ProviderDescription::new("cloudflare").for_record(&self.domain, &self.host, self.ip_version)
    }

    fn provider_name(&self) -> &'static str {
        "cloudflare"
    }

    fn supports_dns_lookup(&self) -> bool {
        // Proxied records resolve to Cloudflare edge addresses
        !self.settings.proxied
    }
}

fn record_type(ip: IpAddr) -> &'static str {
    match ip {
        IpAddr::V4(_) => "A",
        IpAddr::V6(_) => "AAAA",
    }
}

/// Map an HTTP status onto an error category
pub fn check_status(status: StatusCode, body: &str) -> Result<()> {
    if status.is_success() {
        return Ok(());
    }

    let detail = api_errors(body).unwrap_or_else(|| single_line(body));

    match status.as_u16() {
        401 | 403 => Err(Error::auth(format!("{}: {}", status, detail))),
        429 => Err(Error::rate_limited(format!("{}: {}", status, detail))),
        500..=599 => Err(Error::http(format!(
            "Cloudflare server error {}: {}",
            status, detail
        ))),
        _ => Err(Error::provider(
            "cloudflare",
            format!("{}: {}", status, detail),
        )),
    }
}

/// Id of the first record of a list response, if any
fn parse_record_id(body: &str) -> Result<Option<String>> {
    let envelope: Envelope<Vec<DnsRecord>> = parse_envelope(body)?;
    Ok(envelope
        .result
        .and_then(|records| records.into_iter().next())
        .map(|record| record.id))
}

/// Address Cloudflare reports as the record's content
pub fn parse_confirmed_ip(body: &str) -> Result<IpAddr> {
    let envelope: Envelope<DnsRecord> = parse_envelope(body)?;
    let record = envelope
        .result
        .ok_or_else(|| Error::malformed("Cloudflare response has no result"))?;

    record.content.parse().map_err(|_| {
        Error::malformed(format!(
            "Cloudflare record content is not an IP address: {}",
            record.content
        ))
    })
}

fn parse_envelope<T: DeserializeOwned>(body: &str) -> Result<Envelope<T>> {
    let envelope: Envelope<T> = serde_json::from_str(body)
        .map_err(|e| Error::malformed(format!("Invalid Cloudflare response: {}", e)))?;

    if !envelope.success {
        let detail = format_errors(&envelope.errors);
        return Err(Error::provider("cloudflare", detail));
    }
    Ok(envelope)
}

fn api_errors(body: &str) -> Option<String> {
    let envelope: Envelope<serde_json::Value> = serde_json::from_str(body).ok()?;
    if envelope.errors.is_empty() {
        return None;
    }
    Some(format_errors(&envelope.errors))
}

fn format_errors(errors: &[ApiMessage]) -> String {
    if errors.is_empty() {
        return "unsuccessful response".to_string();
    }
    errors
        .iter()
        .map(|e| format!("{} (code {})", e.message, e.code))
        .collect::<Vec<_>>()
        .join("; ")
}

fn single_line(body: &str) -> String {
    let line = body.split_whitespace().collect::<Vec<_>>().join(" ");
    if line.len() > 200 {
        let cut = (0..=200).rev().find(|i| line.is_char_boundary(*i)).unwrap_or(0);
        format!("{}...", &line[..cut])
    } else {
        line
    }
}

/// Factory for creating Cloudflare providers
pub struct CloudflareFactory {
    client: reqwest::Client,
}

impl CloudflareFactory {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

impl DnsProviderFactory for CloudflareFactory {
    fn create(&self, config: &RecordConfig) -> Result<Arc<dyn DnsProvider>> {
        let settings: CloudflareSettings = config.settings_as()?;

        let provider = CloudflareProvider::new(
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

/// Register the Cloudflare provider with a registry
///
/// # Example
///
/// ```rust,ignore
/// use ddns_core::ProviderRegistry;
///
/// let registry = ProviderRegistry::new();
/// ddns_provider_cloudflare::register(&registry, Duration::from_secs(10))?;
/// ```
pub fn register(registry: &ProviderRegistry, timeout: Duration) -> Result<()> {
    registry.register_provider("cloudflare", Box::new(CloudflareFactory::new(timeout)?));
    Ok(())
}
