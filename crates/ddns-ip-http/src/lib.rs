// # HTTP Public IP Detectors
//
// Remote detection of the host's public address through plain-text echo
// services (ipify, icanhazip, ident.me, ...).
//
// ## Architecture
//
// Each detector performs exactly one GET per call and parses the body as
// an address. Picking among detectors, checking the address family and
// falling back to other strategies are the resolver's job (see
// `ddns_core::resolver`).
//
// Services usually offer per-family hosts (`api.ipify.org` only answers
// over IPv4, `api6.ipify.org` over IPv6). A detector may also have a
// dual-stack URL answering with whichever family the connection used.

use ddns_core::ProviderRegistry;
use ddns_core::config::{DetectorConfig, IpVersion};
use ddns_core::traits::{IpDetector, IpDetectorFactory};
use ddns_core::{Error, Result};

use std::net::IpAddr;
use std::time::Duration;

/// User agent sent to detection services
const USER_AGENT: &str = concat!("ddns-updater/", env!("CARGO_PKG_VERSION"));

/// Built-in services: (name, IPv4 URL, IPv6 URL)
const DEFAULT_SERVICES: &[(&str, &str, &str)] = &[
    ("ipify", "https://api.ipify.org", "https://api6.ipify.org"),
    (
        "icanhazip",
        "https://ipv4.icanhazip.com",
        "https://ipv6.icanhazip.com",
    ),
    ("ident.me", "https://v4.ident.me", "https://v6.ident.me"),
];

/// One HTTP echo service
pub struct HttpDetector {
    name: String,
    /// Dual-stack URL
    url: Option<String>,
    url_v4: Option<String>,
    url_v6: Option<String>,
    client: reqwest::Client,
}

impl HttpDetector {
    /// Create a detector without URLs; add them with the `with_*` methods
    pub fn new(name: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            name: name.into(),
            url: None,
            url_v4: None,
            url_v6: None,
            client,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_url_v4(mut self, url: impl Into<String>) -> Self {
        self.url_v4 = Some(url.into());
        self
    }

    pub fn with_url_v6(mut self, url: impl Into<String>) -> Self {
        self.url_v6 = Some(url.into());
        self
    }

    /// URL to query for `version`
    ///
    /// Family-specific URLs win; the dual-stack URL is the fallback.
    fn url_for(&self, version: IpVersion) -> Option<&str> {
        let url = match version {
            IpVersion::V4 => self.url_v4.as_ref().or(self.url.as_ref()),
            IpVersion::V6 => self.url_v6.as_ref().or(self.url.as_ref()),
            IpVersion::Both => self
                .url
                .as_ref()
                .or(self.url_v4.as_ref())
                .or(self.url_v6.as_ref()),
        };
        url.map(String::as_str)
    }
}

#[async_trait::async_trait]
impl IpDetector for HttpDetector {
    async fn detect(&self, version: IpVersion) -> Result<IpAddr> {
        let url = self.url_for(version).ok_or_else(|| {
            Error::public_ip(format!("{} has no URL for {}", self.name, version))
        })?;

        tracing::debug!("Querying {} at {}", self.name, url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::http(format!("{}: request failed: {}", self.name, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::http(format!("{}: HTTP {}", self.name, status)));
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::http(format!("{}: failed to read response: {}", self.name, e)))?;

        parse_ip_body(&body)
    }

    fn supports(&self, version: IpVersion) -> bool {
        self.url_for(version).is_some()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Parse an echo service body: one address, surrounding whitespace allowed
pub fn parse_ip_body(body: &str) -> Result<IpAddr> {
    let text = body.trim();
    if text.is_empty() {
        return Err(Error::malformed("empty response body"));
    }
    text.parse()
        .map_err(|_| Error::malformed(format!("not an IP address: {:.64}", text)))
}

/// Build the HTTP client shared by detectors
pub fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))
}

/// The built-in detector pool
pub fn default_detectors(client: &reqwest::Client) -> Vec<Box<dyn IpDetector>> {
    DEFAULT_SERVICES
        .iter()
        .map(|(name, v4, v6)| {
            Box::new(
                HttpDetector::new(*name, client.clone())
                    .with_url_v4(*v4)
                    .with_url_v6(*v6),
            ) as Box<dyn IpDetector>
        })
        .collect()
}

/// Factory for creating HTTP detectors
pub struct HttpDetectorFactory {
    client: reqwest::Client,
}

impl HttpDetectorFactory {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
        })
    }
}

impl IpDetectorFactory for HttpDetectorFactory {
    fn create(&self, config: &DetectorConfig) -> Result<Box<dyn IpDetector>> {
        config.validate()?;

        match config {
            DetectorConfig::Http {
                name,
                url,
                url_v4,
                url_v6,
            } => {
                let mut detector = HttpDetector::new(name.clone(), self.client.clone());
                detector.url = url.clone();
                detector.url_v4 = url_v4.clone();
                detector.url_v6 = url_v6.clone();
                Ok(Box::new(detector))
            }
            _ => Err(Error::config("Invalid config for HTTP detector")),
        }
    }
}

/// Register the HTTP detector with a registry
pub fn register(registry: &ProviderRegistry, timeout: Duration) -> Result<()> {
    registry.register_detector("http", Box::new(HttpDetectorFactory::new(timeout)?));
    Ok(())
}
