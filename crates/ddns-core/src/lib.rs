// # ddns-core
//
// Core library for the DDNS update orchestration engine.
//
// ## Architecture Overview
//
// This library keeps DNS records pointed at the host's public address:
// - **Record**: One validated (domain, host, IP version) binding plus its adapter
// - **DnsProvider**: Trait for updating one DNS record via a provider API
// - **PublicIpFetcher**: Trait for finding the host's public address
//   (`PublicIpResolver`: local interface and random remote detectors)
// - **DnsLookup**: Trait for reading a record's published value (`HickoryLookup`)
// - **StateStore**: Trait for per-record status, last good IP and history
// - **DdnsEngine**: Per-record periodic cycles, single-flight, cancellable
// - **ProviderRegistry**: Plugin-based registry for providers, detectors and stores
//
// ## Design Principles
//
// 1. **Separation of Concerns**: Vendors live in adapter crates, never in the engine
// 2. **Single-flight**: At most one cycle per record at any instant
// 3. **Plugin-Based**: Components are registered dynamically, no hard-coded if-else
// 4. **Library-First**: All core functionality can be used as a library
// 5. **Truthful state**: Failures never overwrite the last known good IP

pub mod config;
pub mod engine;
pub mod error;
pub mod lookup;
pub mod record;
pub mod registry;
pub mod resolver;
pub mod state;
pub mod traits;

// Re-export core types for convenience
pub use config::{DdnsConfig, EngineConfig, IpVersion, RecordConfig};
pub use engine::{CycleOutcome, DdnsEngine, EngineEvent, ShutdownReport, SkipReason};
pub use error::{Error, ErrorCategory, Result};
pub use lookup::HickoryLookup;
pub use record::{Record, RecordId, RecordState, RecordStatus, StateUpdate};
pub use registry::ProviderRegistry;
pub use resolver::{DetectorPool, LocalInterfaceSource, PublicIpResolver, Strategy};
pub use state::{FileStateStore, MemoryStateStore};
pub use traits::{DnsLookup, DnsProvider, IpDetector, PublicIpFetcher, StateStore};
