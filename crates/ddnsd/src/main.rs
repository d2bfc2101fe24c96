// # ddnsd - DDNS Daemon
//
// This daemon is a thin integration layer. All update logic lives in
// ddns-core; the daemon only:
// 1. Reads the record file and environment overrides
// 2. Initializes logging and the runtime
// 3. Registers providers, detectors and state stores
// 4. Starts the engine and stops it on SIGTERM/SIGINT
//
// SIGHUP forces an immediate check of every record.
//
// ## Configuration
//
// Records, public IP strategies and the state store are described in a
// JSON file (see `ddns_core::config::DdnsConfig`). Environment variables
// override the file:
//
// - `DDNS_CONFIG`: Path to the JSON file (default `data/config.json`)
// - `DDNS_PERIOD_SECS`: Seconds between checks of each record
// - `DDNS_COOLDOWN_SECS`: Minimum seconds between provider calls per record
// - `DDNS_HTTP_TIMEOUT_SECS`: Timeout for detector and provider requests
// - `DDNS_SHUTDOWN_TIMEOUT_SECS`: Grace period for in-flight cycles on stop
// - `DDNS_STATE_STORE_TYPE`: `file` or `memory`
// - `DDNS_STATE_STORE_PATH`: Path to the state file (for file store)
// - `DDNS_LOG_LEVEL`: trace, debug, info, warn or error
//
// ## Example
//
// ```bash
// export DDNS_CONFIG=/etc/ddns/config.json
// export DDNS_STATE_STORE_TYPE=file
// export DDNS_STATE_STORE_PATH=/var/lib/ddns/state.json
//
// ddnsd
// ```

use anyhow::{Context, Result};
use ddns_core::config::{DEFAULT_HISTORY_LIMIT, StateStoreConfig};
use ddns_core::{
    DdnsConfig, DdnsEngine, EngineEvent, HickoryLookup, ProviderRegistry, PublicIpResolver, Record,
};
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Default location of the record file
const DEFAULT_CONFIG_PATH: &str = "data/config.json";

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum DdnsExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<DdnsExitCode> for ExitCode {
    fn from(code: DdnsExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Environment overrides
#[derive(Debug, Default)]
struct Settings {
    config_path: PathBuf,
    period_secs: Option<u64>,
    cooldown_secs: Option<u64>,
    http_timeout_secs: Option<u64>,
    shutdown_timeout_secs: Option<u64>,
    state_store_type: Option<String>,
    state_store_path: Option<String>,
    log_level: String,
}

impl Settings {
    /// Load settings from environment variables
    fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load settings through `get`, which maps a variable name to its value
    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let number = |key: &str| -> Result<Option<u64>> {
            match get(key) {
                Some(value) => value
                    .trim()
                    .parse()
                    .map(Some)
                    .with_context(|| format!("{} must be a whole number. Got: {}", key, value)),
                None => Ok(None),
            }
        };

        Ok(Self {
            config_path: get("DDNS_CONFIG")
                .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string())
                .into(),
            period_secs: number("DDNS_PERIOD_SECS")?,
            cooldown_secs: number("DDNS_COOLDOWN_SECS")?,
            http_timeout_secs: number("DDNS_HTTP_TIMEOUT_SECS")?,
            shutdown_timeout_secs: number("DDNS_SHUTDOWN_TIMEOUT_SECS")?,
            state_store_type: get("DDNS_STATE_STORE_TYPE"),
            state_store_path: get("DDNS_STATE_STORE_PATH"),
            log_level: get("DDNS_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Validate the overrides
    fn validate(&self) -> Result<()> {
        check_range("DDNS_PERIOD_SECS", self.period_secs, 10, 86_400)?;
        check_range("DDNS_COOLDOWN_SECS", self.cooldown_secs, 0, 86_400)?;
        check_range("DDNS_HTTP_TIMEOUT_SECS", self.http_timeout_secs, 1, 300)?;
        check_range("DDNS_SHUTDOWN_TIMEOUT_SECS", self.shutdown_timeout_secs, 1, 300)?;

        if let Some(store_type) = &self.state_store_type {
            match store_type.as_str() {
                "file" => {
                    if self.state_store_path.as_ref().is_none_or(|p| p.is_empty()) {
                        anyhow::bail!(
                            "DDNS_STATE_STORE_PATH is required when DDNS_STATE_STORE_TYPE=file. \
                            Set it via: export DDNS_STATE_STORE_PATH=/var/lib/ddns/state.json"
                        );
                    }
                }
                "memory" => {}
                _ => anyhow::bail!(
                    "DDNS_STATE_STORE_TYPE '{}' is not supported. \
                    Supported types: file, memory",
                    store_type
                ),
            }
        }

        self.level()?;
        Ok(())
    }

    fn level(&self) -> Result<Level> {
        match self.log_level.to_lowercase().as_str() {
            "trace" => Ok(Level::TRACE),
            "debug" => Ok(Level::DEBUG),
            "info" => Ok(Level::INFO),
            "warn" => Ok(Level::WARN),
            "error" => Ok(Level::ERROR),
            _ => anyhow::bail!(
                "DDNS_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }
    }

    /// Override file values with the environment
    fn apply(&self, config: &mut DdnsConfig) {
        let engine = &mut config.engine;
        if let Some(secs) = self.period_secs {
            engine.period_secs = secs;
        }
        if let Some(secs) = self.cooldown_secs {
            engine.cooldown_secs = secs;
        }
        if let Some(secs) = self.http_timeout_secs {
            engine.http_timeout_secs = secs;
        }
        if let Some(secs) = self.shutdown_timeout_secs {
            engine.shutdown_timeout_secs = secs;
        }

        let history_limit = match &config.state_store {
            StateStoreConfig::File { history_limit, .. }
            | StateStoreConfig::Memory { history_limit } => *history_limit,
            StateStoreConfig::Custom { .. } => DEFAULT_HISTORY_LIMIT,
        };

        match (self.state_store_type.as_deref(), &self.state_store_path) {
            (Some("memory"), _) => {
                config.state_store = StateStoreConfig::Memory { history_limit };
            }
            (Some("file"), Some(path)) => {
                config.state_store = StateStoreConfig::File {
                    path: path.clone(),
                    history_limit,
                };
            }
            (None, Some(path)) => {
                if let StateStoreConfig::File { path: current, .. } = &mut config.state_store {
                    *current = path.clone();
                }
            }
            _ => {}
        }
    }
}

fn check_range(name: &str, value: Option<u64>, min: u64, max: u64) -> Result<()> {
    if let Some(value) = value
        && !(min..=max).contains(&value)
    {
        anyhow::bail!(
            "{} must be between {} and {}. Got: {}",
            name,
            min,
            max,
            value
        );
    }
    Ok(())
}

/// Read the record file and apply environment overrides
fn load_config(settings: &Settings) -> Result<DdnsConfig> {
    let mut config = DdnsConfig::from_file(&settings.config_path)?;
    settings.apply(&mut config);
    config.validate()?;
    Ok(config)
}

fn main() -> ExitCode {
    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return DdnsExitCode::ConfigError.into();
        }
    };

    if let Err(e) = settings.validate() {
        eprintln!("Configuration validation error: {:#}", e);
        return DdnsExitCode::ConfigError.into();
    }

    let config = match load_config(&settings) {
        Ok(config) => config,
        Err(e) => {
            eprintln!(
                "Configuration error in {}: {:#}",
                settings.config_path.display(),
                e
            );
            return DdnsExitCode::ConfigError.into();
        }
    };

    // Validated above
    let log_level = settings.level().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return DdnsExitCode::ConfigError.into();
    }

    info!("Starting ddnsd daemon");
    info!("Configuration loaded: {} record(s)", config.records.len());

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return DdnsExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        match run_daemon(config).await {
            Ok(()) => DdnsExitCode::CleanShutdown,
            Err(e) => {
                error!("Daemon error: {:#}", e);
                DdnsExitCode::RuntimeError
            }
        }
    });

    result.into()
}

/// Register every compiled-in component
#[cfg_attr(
    not(any(feature = "cloudflare", feature = "dyndns", feature = "http")),
    allow(unused_variables)
)]
fn build_registry(http_timeout: Duration) -> Result<ProviderRegistry> {
    let registry = ProviderRegistry::with_builtin_stores();

    #[cfg(feature = "cloudflare")]
    {
        debug!("Registering Cloudflare provider");
        ddns_provider_cloudflare::register(&registry, http_timeout)?;
    }

    #[cfg(feature = "dyndns")]
    {
        debug!("Registering dyndns provider");
        ddns_provider_dyndns::register(&registry, http_timeout)?;
    }

    #[cfg(feature = "http")]
    {
        debug!("Registering HTTP detectors");
        ddns_ip_http::register(&registry, http_timeout)?;
    }

    Ok(registry)
}

/// Public IP resolver from configuration, or the built-in default
fn build_resolver(config: &DdnsConfig, registry: &ProviderRegistry) -> Result<PublicIpResolver> {
    let resolver = PublicIpResolver::from_config(&config.public_ip, registry)?;
    if !resolver.is_empty() {
        return Ok(resolver);
    }

    #[cfg(feature = "http")]
    {
        info!("No public IP strategy configured, using the built-in HTTP detectors");
        let client = ddns_ip_http::build_client(config.engine.http_timeout())?;
        let pool = ddns_core::DetectorPool::from_entropy(ddns_ip_http::default_detectors(&client));
        Ok(resolver.with_strategy(ddns_core::Strategy::Remote(pool)))
    }

    #[cfg(not(feature = "http"))]
    {
        info!("No public IP strategy configured, using the local interface");
        let local = ddns_core::LocalInterfaceSource::new(None, None)?;
        Ok(resolver.with_strategy(ddns_core::Strategy::Local(local)))
    }
}

/// Build every enabled record, skipping invalid and duplicate entries
fn build_records(config: &DdnsConfig, registry: &ProviderRegistry) -> Vec<Record> {
    let mut records: Vec<Record> = Vec::new();
    for record_config in config.records.iter().filter(|r| r.enabled) {
        match registry.create_record(record_config) {
            Ok(record) if records.iter().any(|r| r.id() == record.id()) => error!(
                "Skipping record {} ({}): duplicate of {}",
                record_config.fqdn(),
                record_config.provider,
                record.id()
            ),
            Ok(record) => {
                info!("Managing record: {}", record.provider().describe());
                records.push(record);
            }
            Err(e) => error!(
                "Skipping record {} ({}): {}",
                record_config.fqdn(),
                record_config.provider,
                e
            ),
        }
    }
    records
}

/// Run the daemon
async fn run_daemon(config: DdnsConfig) -> Result<()> {
    let registry = build_registry(config.engine.http_timeout())?;
    info!("Registered providers: {}", registry.list_providers().join(", "));

    let records = build_records(&config, &registry);
    if records.is_empty() {
        anyhow::bail!("No valid records to manage");
    }

    let resolver = build_resolver(&config, &registry)?;
    let store = registry
        .create_state_store(&config.state_store)
        .await
        .context("Failed to open state store")?;
    info!("State store: {}", config.state_store.type_name());

    let (engine, mut events) = DdnsEngine::new(
        records,
        Arc::new(resolver),
        Arc::new(HickoryLookup::new()),
        store,
        config.engine.clone(),
    )?;

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            log_event(&event);
        }
    });

    engine.run()?;
    info!("Daemon initialized successfully");

    let signal = wait_for_shutdown(&engine).await?;
    info!("Received shutdown signal: {}", signal);

    let report = engine.stop(config.engine.shutdown_timeout()).await;
    if report.abandoned > 0 {
        warn!(
            "{} record task(s) did not finish within {:?}",
            report.abandoned,
            config.engine.shutdown_timeout()
        );
    }

    info!("Shutting down daemon");
    Ok(())
}

fn log_event(event: &EngineEvent) {
    match event {
        EngineEvent::UpdateSucceeded {
            record,
            new_ip,
            previous_ip,
        } => match previous_ip {
            Some(previous) => info!("{}: {} -> {}", record, previous, new_ip),
            None => info!("{}: set to {}", record, new_ip),
        },
        EngineEvent::UpdateFailed {
            record,
            attempted_ip,
            category,
            ..
        } => warn!("{}: update to {} failed ({})", record, attempted_ip, category),
        EngineEvent::PersistFailed {
            record,
            attempted_ip,
            error,
        } => error!("{}: {} was not recorded: {}", record, attempted_ip, error),
        other => debug!("Engine event: {:?}", other),
    }
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
///
/// SIGHUP triggers every record and keeps waiting.
#[cfg(unix)]
async fn wait_for_shutdown(engine: &DdnsEngine) -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;
    let mut sighup = signal(SignalKind::hangup())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGHUP handler: {}", e))?;

    loop {
        tokio::select! {
            _ = sigterm.recv() => return Ok("SIGTERM"),
            _ = sigint.recv() => return Ok("SIGINT"),
            _ = sighup.recv() => {
                info!("Received SIGHUP, checking all records now");
                engine.trigger_all();
            }
        }
    }
}

/// Wait for shutdown signals (SIGINT only)
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown(_engine: &DdnsEngine) -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
