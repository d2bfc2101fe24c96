//! Record model
//!
//! A [`Record`] is one (domain, host, IP version) binding kept pointed at the
//! host's public address. Records are built once through a validating
//! constructor and never mutated afterwards; everything that changes over
//! time lives in [`RecordState`], which the engine hands to the state store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::config::IpVersion;
use crate::error::{Error, ErrorCategory, Result};
use crate::traits::DnsProvider;

/// Identity of a record's update stream
///
/// Derived from (domain, host, IP version) in canonical lower-case form,
/// e.g. `www.example.com/v4` or `@.example.com/both`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Build the identity for a (domain, host, version) triple
    pub fn new(domain: &str, host: &str, version: IpVersion) -> Self {
        Self(format!(
            "{}.{}/{}",
            host.to_ascii_lowercase(),
            domain.to_ascii_lowercase(),
            version
        ))
    }

    /// The canonical string form
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A validated DNS record managed by the engine
#[derive(Clone)]
pub struct Record {
    id: RecordId,
    domain: String,
    host: String,
    ip_version: IpVersion,
    provider: Arc<dyn DnsProvider>,
    dns_lookup: bool,
    period: Option<Duration>,
}

impl Record {
    /// Validate and build a record
    ///
    /// Fails with a configuration error when the domain or host is not a
    /// valid DNS name, or when the provider rejects its own settings.
    pub fn new(
        domain: impl Into<String>,
        host: impl Into<String>,
        ip_version: IpVersion,
        provider: Arc<dyn DnsProvider>,
    ) -> Result<Self> {
        let domain = domain.into();
        let host = host.into();

        validate_domain_name(&domain)?;
        validate_host(&host)?;
        provider.validate()?;

        Ok(Self {
            id: RecordId::new(&domain, &host, ip_version),
            domain,
            host,
            ip_version,
            provider,
            dns_lookup: true,
            period: None,
        })
    }

    /// Enable or disable the DNS lookup short-circuit
    pub fn with_dns_lookup(mut self, enabled: bool) -> Self {
        self.dns_lookup = enabled;
        self
    }

    /// Override the engine-wide check period for this record
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = Some(period);
        self
    }

    pub fn id(&self) -> &RecordId {
        &self.id
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn ip_version(&self) -> IpVersion {
        self.ip_version
    }

    pub fn provider(&self) -> &Arc<dyn DnsProvider> {
        &self.provider
    }

    pub fn period(&self) -> Option<Duration> {
        self.period
    }

    /// Fully qualified name of the record (`@` maps to the bare domain)
    pub fn fqdn(&self) -> String {
        build_fqdn(&self.host, &self.domain)
    }

    /// Whether a cycle may consult the published value before updating
    ///
    /// Wildcard records cannot be looked up meaningfully, and some
    /// providers (e.g. proxied records) publish addresses that never match
    /// the host's own.
    pub fn uses_dns_lookup(&self) -> bool {
        self.dns_lookup && !self.is_wildcard() && self.provider.supports_dns_lookup()
    }

    fn is_wildcard(&self) -> bool {
        self.host == "*" || self.host.starts_with("*.")
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("id", &self.id)
            .field("provider", &self.provider.provider_name())
            .field("dns_lookup", &self.dns_lookup)
            .field("period", &self.period)
            .finish()
    }
}

/// Lifecycle of a record's update stream
///
/// `Unset | UpToDate | Fail -> Updating -> UpToDate | Fail`. `Updating` only
/// ever exists inside the engine; stores refuse to persist it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// No attempt yet
    #[default]
    Unset,
    /// Stored IP matches the desired IP
    UpToDate,
    /// A cycle is talking to the provider
    Updating,
    /// Last attempt errored
    Fail,
}

impl RecordStatus {
    /// Whether `self -> next` is an allowed step
    pub fn can_transition_to(self, next: RecordStatus) -> bool {
        use RecordStatus::*;
        matches!(
            (self, next),
            (Unset | UpToDate | Fail, Updating) | (Updating, UpToDate | Fail)
        )
    }

    /// Perform a checked transition
    pub fn transition(self, next: RecordStatus) -> Result<RecordStatus> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(Error::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RecordStatus::Unset => "unset",
            RecordStatus::UpToDate => "up to date",
            RecordStatus::Updating => "updating",
            RecordStatus::Fail => "fail",
        };
        f.write_str(s)
    }
}

/// Result of one provider interaction, as kept in history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure { category: ErrorCategory },
}

/// One entry of a record's update history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub time: DateTime<Utc>,
    /// Confirmed address on success, attempted address on failure
    pub ip: IpAddr,
    pub outcome: Outcome,
}

impl HistoryEvent {
    pub fn success(ip: IpAddr) -> Self {
        Self {
            time: Utc::now(),
            ip,
            outcome: Outcome::Success,
        }
    }

    pub fn failure(ip: IpAddr, category: ErrorCategory) -> Self {
        Self {
            time: Utc::now(),
            ip,
            outcome: Outcome::Failure { category },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success)
    }
}

/// Persisted state of one record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordState {
    pub status: RecordStatus,
    /// Last known good address (only ever set from a confirmed update)
    pub ip: Option<IpAddr>,
    pub message: Option<String>,
    pub error: Option<ErrorCategory>,
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub history: Vec<HistoryEvent>,
}

impl RecordState {
    /// Apply an update, trimming history to `history_limit` entries
    ///
    /// A limit of zero keeps the full history.
    pub fn apply(&mut self, update: StateUpdate, history_limit: usize) -> Result<()> {
        if update.status == RecordStatus::Updating {
            return Err(Error::invalid_input(
                "in-flight status cannot be persisted",
            ));
        }

        self.status = update.status;
        if let Some(ip) = update.ip {
            self.ip = Some(ip);
        }
        self.message = update.message;
        self.error = update.error;
        self.updated_at = Some(update.time);

        if let Some(event) = update.history {
            self.history.push(event);
            if history_limit > 0 && self.history.len() > history_limit {
                let excess = self.history.len() - history_limit;
                self.history.drain(..excess);
            }
        }

        Ok(())
    }

    /// Time of the most recent provider interaction
    pub fn last_attempt(&self) -> Option<DateTime<Utc>> {
        self.history.last().map(|event| event.time)
    }
}

/// A single atomic change to a record's persisted state
#[derive(Debug, Clone, PartialEq)]
pub struct StateUpdate {
    pub status: RecordStatus,
    /// New last-known-good address; `None` leaves the stored one untouched
    pub ip: Option<IpAddr>,
    pub message: Option<String>,
    pub error: Option<ErrorCategory>,
    pub history: Option<HistoryEvent>,
    pub time: DateTime<Utc>,
}

impl StateUpdate {
    /// The provider confirmed `ip`
    pub fn success(ip: IpAddr) -> Self {
        Self {
            status: RecordStatus::UpToDate,
            ip: Some(ip),
            message: Some(format!("changed to {ip}")),
            error: None,
            history: Some(HistoryEvent::success(ip)),
            time: Utc::now(),
        }
    }

    /// Updating to `attempted` failed; the stored address is kept
    pub fn failure(attempted: IpAddr, error: &Error) -> Self {
        let category = error.category();
        Self {
            status: RecordStatus::Fail,
            ip: None,
            message: Some(error.to_string()),
            error: Some(category),
            history: Some(HistoryEvent::failure(attempted, category)),
            time: Utc::now(),
        }
    }
}

/// `host.domain`, with `@` standing for the domain itself
pub fn build_fqdn(host: &str, domain: &str) -> String {
    if host == "@" {
        domain.to_string()
    } else {
        format!("{host}.{domain}")
    }
}

/// Validate that a string is a valid domain name
///
/// Basic RFC 1035 checks: total length, label length, characters and
/// hyphen placement.
pub fn validate_domain_name(domain: &str) -> Result<()> {
    if domain.is_empty() {
        return Err(Error::config("Domain name cannot be empty"));
    }

    if domain.len() > 253 {
        return Err(Error::config(format!(
            "Domain name too long: {} chars (max 253). Got: {}",
            domain.len(),
            domain
        )));
    }

    for label in domain.split('.') {
        validate_label(domain, label)?;
    }

    Ok(())
}

/// Validate a record host: `@`, `*`, or dot-separated labels with an
/// optional leading `*` label
fn validate_host(host: &str) -> Result<()> {
    match host {
        "" => Err(Error::config("Host cannot be empty (use \"@\" for the root)")),
        "@" | "*" => Ok(()),
        _ => {
            let rest = host.strip_prefix("*.").unwrap_or(host);
            for label in rest.split('.') {
                validate_label(host, label)?;
            }
            Ok(())
        }
    }
}

fn validate_label(name: &str, label: &str) -> Result<()> {
    if label.is_empty() {
        return Err(Error::config(format!("Name has empty label: '{name}'")));
    }

    if label.len() > 63 {
        return Err(Error::config(format!(
            "Label too long: {} chars (max 63). Label: '{}'",
            label.len(),
            label
        )));
    }

    if !label
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(Error::config(format!(
            "Label contains invalid characters. Label: '{label}'"
        )));
    }

    if label.starts_with('-') || label.ends_with('-') {
        return Err(Error::config(format!(
            "Label cannot start or end with hyphen. Label: '{label}'"
        )));
    }

    Ok(())
}
