//! Core traits for the DDNS system
//!
//! This module defines the abstract interfaces the engine depends on.
//!
//! - [`DnsProvider`]: Update one DNS record via a provider API
//! - [`PublicIpFetcher`] / [`IpDetector`]: Find the host's public address
//! - [`DnsLookup`]: Read the published value of a record
//! - [`StateStore`]: Persistent per-record state and history

pub mod dns_provider;
pub mod lookup;
pub mod public_ip;
pub mod state_store;

pub use dns_provider::{DnsProvider, DnsProviderFactory, ProviderDescription};
pub use lookup::DnsLookup;
pub use public_ip::{
    IpChangeEvent, IpDetector, IpDetectorFactory, IpFamily, IpOrigin, PublicIpFetcher, ResolvedIp,
};
pub use state_store::{StateStore, StateStoreFactory};
