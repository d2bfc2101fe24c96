//! Plugin-based provider registry
//!
//! The registry allows DNS providers, public IP detectors and state stores
//! to be registered dynamically at runtime, avoiding hardcoded if-else
//! chains. The engine never sees vendor identity: records are built here and
//! handed over with their adapter already bound.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ddns_core::registry::ProviderRegistry;
//! use ddns_core::config::RecordConfig;
//!
//! let registry = ProviderRegistry::with_builtin_stores();
//! ddns_provider_cloudflare::register(&registry);
//!
//! let config = RecordConfig::new("example.com", "cloudflare")
//!     .with_settings(serde_json::json!({ "token": "...", "zone_id": "..." }));
//! let record = registry.create_record(&config)?;
//! ```
//!
//! ## Registration
//!
//! Implementations should register themselves during initialization:
//!
//! ```rust,ignore
//! // In ddns-provider-cloudflare crate
//! pub fn register(registry: &ProviderRegistry) {
//!     registry.register_provider("cloudflare", Box::new(CloudflareFactory));
//! }
//! ```

use crate::config::{DetectorConfig, RecordConfig, StateStoreConfig};
use crate::error::{Error, Result};
use crate::record::Record;
use crate::state::{FileStateStoreFactory, MemoryStateStoreFactory};
use crate::traits::{DnsProviderFactory, IpDetector, IpDetectorFactory, StateStore, StateStoreFactory};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

/// Provider registry for plugin-based component creation
///
/// ## Thread Safety
///
/// The registry uses interior mutability with RwLock, allowing concurrent
/// reads and exclusive writes.
#[derive(Default)]
pub struct ProviderRegistry {
    /// Registered DNS provider factories
    providers: RwLock<HashMap<String, Box<dyn DnsProviderFactory>>>,

    /// Registered public IP detector factories
    detectors: RwLock<HashMap<String, Box<dyn IpDetectorFactory>>>,

    /// Registered state store factories
    state_stores: RwLock<HashMap<String, Arc<dyn StateStoreFactory>>>,
}

impl ProviderRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the `memory` and `file` state stores registered
    pub fn with_builtin_stores() -> Self {
        let registry = Self::new();
        registry.register_state_store("memory", Box::new(MemoryStateStoreFactory));
        registry.register_state_store("file", Box::new(FileStateStoreFactory));
        registry
    }

    /// Register a DNS provider factory
    ///
    /// # Parameters
    ///
    /// - `name`: Provider type name (e.g., "cloudflare", "dyndns")
    /// - `factory`: Factory object for creating provider instances
    pub fn register_provider(&self, name: impl Into<String>, factory: Box<dyn DnsProviderFactory>) {
        let mut providers = self
            .providers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        providers.insert(name.into(), factory);
    }

    /// Register a public IP detector factory
    pub fn register_detector(&self, name: impl Into<String>, factory: Box<dyn IpDetectorFactory>) {
        let mut detectors = self
            .detectors
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        detectors.insert(name.into(), factory);
    }

    /// Register a state store factory
    pub fn register_state_store(
        &self,
        name: impl Into<String>,
        factory: Box<dyn StateStoreFactory>,
    ) {
        let mut stores = self
            .state_stores
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        stores.insert(name.into(), Arc::from(factory));
    }

    /// Build a validated record from configuration
    ///
    /// The provider factory parses the record's settings; the record then
    /// validates its names and asks the adapter to validate itself.
    ///
    /// # Returns
    ///
    /// - `Ok(Record)`: Ready to be scheduled
    /// - `Err(Error)`: Unknown provider, bad settings or invalid names
    pub fn create_record(&self, config: &RecordConfig) -> Result<Record> {
        config.validate()?;

        let provider = {
            let providers = self
                .providers
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            let factory = providers.get(&config.provider).ok_or_else(|| {
                Error::config(format!("Unknown provider type: {}", config.provider))
            })?;
            factory.create(config)?
        };

        let mut record = Record::new(
            config.domain.clone(),
            config.host.clone(),
            config.ip_version,
            provider,
        )?
        .with_dns_lookup(!config.no_dns_lookup);

        if let Some(secs) = config.period_secs {
            record = record.with_period(Duration::from_secs(secs));
        }

        Ok(record)
    }

    /// Create a public IP detector from configuration
    pub fn create_detector(&self, config: &DetectorConfig) -> Result<Box<dyn IpDetector>> {
        let detector_type = config.type_name();
        let detectors = self
            .detectors
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        let factory = detectors
            .get(detector_type)
            .ok_or_else(|| Error::config(format!("Unknown detector type: {}", detector_type)))?;

        factory.create(config)
    }

    /// Create a state store from configuration
    pub async fn create_state_store(&self, config: &StateStoreConfig) -> Result<Arc<dyn StateStore>> {
        let store_type = config.type_name();

        let factory = {
            let stores = self
                .state_stores
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            stores
                .get(store_type)
                .cloned()
                .ok_or_else(|| Error::config(format!("Unknown state store type: {}", store_type)))?
        };

        // Lock released before the async create
        factory.create(config).await
    }

    /// List all registered provider types
    pub fn list_providers(&self) -> Vec<String> {
        let providers = self
            .providers
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<_> = providers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check if a provider type is registered
    pub fn has_provider(&self, name: &str) -> bool {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Check if a detector type is registered
    pub fn has_detector(&self, name: &str) -> bool {
        self.detectors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Check if a state store type is registered
    pub fn has_state_store(&self, name: &str) -> bool {
        self.state_stores
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }
}
