//! Error types for the DDNS system
//!
//! This module defines all error types used throughout the crate, and the
//! coarse [`ErrorCategory`] every error maps onto when it is recorded in a
//! record's status and history.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use thiserror::Error;

use crate::record::RecordStatus;

/// Result type alias for DDNS operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the DDNS system
#[derive(Error, Debug)]
pub enum Error {
    /// Public IP detection errors (a single detector or strategy failed)
    #[error("Public IP error: {0}")]
    PublicIp(String),

    /// No resolution strategy produced an address
    #[error("No public IP address available: {0}")]
    NoAddressAvailable(String),

    /// Published-record lookup errors
    #[error("DNS lookup error: {0}")]
    DnsLookup(String),

    /// State store-related errors
    #[error("State store error: {0}")]
    StateStore(String),

    /// Configuration and validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network-related errors
    #[error("Network error: {0}")]
    Network(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP transport errors (from provider or detector calls)
    #[error("HTTP error: {0}")]
    Http(String),

    /// Authentication errors
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Rate limiting and abuse errors
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// The remote answered with something we cannot interpret
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// The provider confirmed an address other than the one requested
    #[error("IP mismatch: requested {expected}, provider confirmed {received}")]
    IpMismatch {
        /// Address sent to the provider
        expected: IpAddr,
        /// Address the provider reports as published
        received: IpAddr,
    },

    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A status change that the record lifecycle does not allow
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition {
        /// Current status
        from: RecordStatus,
        /// Requested status
        to: RecordStatus,
    },

    /// Provider-specific error
    #[error("Provider error ({provider}): {message}")]
    Provider {
        /// Provider name
        provider: String,
        /// Error message
        message: String,
    },

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Coarse error classes recorded against a failed update
///
/// The engine treats every category the same way (the record goes to
/// `Fail` and is retried on its next tick); categories exist for
/// observability only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Credentials rejected
    Auth,
    /// Rate limited, abuse lock or banned client
    RateLimited,
    /// Unparseable or unexpected response body
    MalformedResponse,
    /// Provider confirmed a different address than requested
    IpMismatch,
    /// Transport failure, timeout or server-side error
    Network,
    /// Invalid configuration detected at update time
    Config,
    /// Anything else
    Other,
}

impl ErrorCategory {
    /// Stable lower-case name, as persisted
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Auth => "auth",
            ErrorCategory::RateLimited => "rate_limited",
            ErrorCategory::MalformedResponse => "malformed_response",
            ErrorCategory::IpMismatch => "ip_mismatch",
            ErrorCategory::Network => "network",
            ErrorCategory::Config => "config",
            ErrorCategory::Other => "other",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Create a public IP error
    pub fn public_ip(msg: impl Into<String>) -> Self {
        Self::PublicIp(msg.into())
    }

    /// Create a "no address available" error
    pub fn no_address(msg: impl Into<String>) -> Self {
        Self::NoAddressAvailable(msg.into())
    }

    /// Create a DNS lookup error
    pub fn dns_lookup(msg: impl Into<String>) -> Self {
        Self::DnsLookup(msg.into())
    }

    /// Create a state store error
    pub fn state_store(msg: impl Into<String>) -> Self {
        Self::StateStore(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an HTTP error
    pub fn http(msg: impl Into<String>) -> Self {
        Self::Http(msg.into())
    }

    /// Create an authentication error
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// Create a rate limit error
    pub fn rate_limited(msg: impl Into<String>) -> Self {
        Self::RateLimited(msg.into())
    }

    /// Create a malformed response error
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedResponse(msg.into())
    }

    /// Create an IP mismatch error
    pub fn ip_mismatch(expected: IpAddr, received: IpAddr) -> Self {
        Self::IpMismatch { expected, received }
    }

    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a provider-specific error
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Map this error onto the category recorded in status and history
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Authentication(_) => ErrorCategory::Auth,
            Error::RateLimited(_) => ErrorCategory::RateLimited,
            Error::MalformedResponse(_) | Error::Json(_) => ErrorCategory::MalformedResponse,
            Error::IpMismatch { .. } => ErrorCategory::IpMismatch,
            Error::PublicIp(_)
            | Error::NoAddressAvailable(_)
            | Error::DnsLookup(_)
            | Error::Network(_)
            | Error::Http(_) => ErrorCategory::Network,
            Error::Config(_) | Error::InvalidInput(_) => ErrorCategory::Config,
            Error::StateStore(_)
            | Error::NotFound(_)
            | Error::InvalidTransition { .. }
            | Error::Provider { .. }
            | Error::Other(_) => ErrorCategory::Other,
        }
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
