// # Public IP Resolver
//
// Produces the host's current public address for the engine.
//
// ```text
// ┌──────────────────────────────────────────────┐
// │              PublicIpResolver                │
// │                                              │
// │  strategy 1: LocalInterfaceSource ──┐        │
// │                                     │ first  │
// │  strategy 2: DetectorPool           │ success│
// │     ├─ ipify      ┐                 │ wins   │
// │     ├─ icanhazip  ├ one picked  ────┘        │
// │     └─ ident.me   ┘ at random               │
// └──────────────────────────────────────────────┘
// ```
//
// A detector pool never fans out within a call: the picked detector's
// failure is that strategy's failure. Resilience across calls comes from
// the random pick and from the engine retrying on its next tick.

pub mod local;

pub use local::{LocalInterfaceSource, is_public_ip};

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Mutex, PoisonError};

use crate::Error;
use crate::config::{IpVersion, PublicIpConfig, StrategyConfig};
use crate::registry::ProviderRegistry;
use crate::traits::{IpDetector, IpOrigin, PublicIpFetcher, ResolvedIp};

/// Remote detectors with a uniform random pick per call
///
/// The random source is owned by the pool, so two pools never share hidden
/// state and tests can fix the sequence with a seed.
pub struct DetectorPool {
    detectors: Vec<Box<dyn IpDetector>>,
    rng: Mutex<StdRng>,
}

impl DetectorPool {
    /// Pool with an explicit random source
    pub fn new(detectors: Vec<Box<dyn IpDetector>>, rng: StdRng) -> Self {
        Self {
            detectors,
            rng: Mutex::new(rng),
        }
    }

    /// Pool with a deterministic pick sequence
    pub fn with_seed(detectors: Vec<Box<dyn IpDetector>>, seed: u64) -> Self {
        Self::new(detectors, StdRng::seed_from_u64(seed))
    }

    /// Pool seeded from OS entropy
    pub fn from_entropy(detectors: Vec<Box<dyn IpDetector>>) -> Self {
        Self::new(detectors, StdRng::from_os_rng())
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }

    /// Pick one detector able to answer for `version`
    pub fn pick(&self, version: IpVersion) -> Option<&dyn IpDetector> {
        let candidates: Vec<&dyn IpDetector> = self
            .detectors
            .iter()
            .map(|d| d.as_ref())
            .filter(|d| d.supports(version))
            .collect();

        if candidates.is_empty() {
            return None;
        }

        let index = self
            .rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .random_range(0..candidates.len());
        Some(candidates[index])
    }

    /// Ask one randomly picked detector
    pub async fn detect(&self, version: IpVersion) -> Result<ResolvedIp, Error> {
        let detector = self.pick(version).ok_or_else(|| {
            Error::public_ip(format!("no detector supports {version} addresses"))
        })?;

        tracing::debug!("Querying {} for public {} address", detector.name(), version);
        let ip = detector.detect(version).await?;

        if !version.matches(&ip) {
            return Err(Error::public_ip(format!(
                "{} answered {} for a {} request",
                detector.name(),
                ip,
                version
            )));
        }

        Ok(ResolvedIp::new(ip, IpOrigin::Remote(detector.name().to_string())))
    }
}

/// One way of finding the public address
pub enum Strategy {
    Local(LocalInterfaceSource),
    Remote(DetectorPool),
}

impl Strategy {
    fn label(&self) -> &'static str {
        match self {
            Strategy::Local(_) => "local",
            Strategy::Remote(_) => "remote",
        }
    }

    async fn resolve(&self, version: IpVersion) -> Result<ResolvedIp, Error> {
        match self {
            Strategy::Local(source) => {
                let ip = source.detect(version).await?;
                Ok(ResolvedIp::new(ip, IpOrigin::Local))
            }
            Strategy::Remote(pool) => pool.detect(version).await,
        }
    }
}

/// Ordered list of strategies; the first success wins
#[derive(Default)]
pub struct PublicIpResolver {
    strategies: Vec<Strategy>,
}

impl PublicIpResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a strategy (tried after the ones already present)
    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategies.push(strategy);
        self
    }

    /// Build from configuration, creating detectors through the registry
    pub fn from_config(config: &PublicIpConfig, registry: &ProviderRegistry) -> Result<Self, Error> {
        let mut resolver = Self::new();

        for strategy in &config.strategies {
            let strategy = match strategy {
                StrategyConfig::Local { probe_v4, probe_v6 } => Strategy::Local(
                    LocalInterfaceSource::new(probe_v4.as_deref(), probe_v6.as_deref())?,
                ),
                StrategyConfig::Http { detectors, seed } => {
                    let detectors = detectors
                        .iter()
                        .map(|d| registry.create_detector(d))
                        .collect::<Result<Vec<_>, _>>()?;
                    match seed {
                        Some(seed) => Strategy::Remote(DetectorPool::with_seed(detectors, *seed)),
                        None => Strategy::Remote(DetectorPool::from_entropy(detectors)),
                    }
                }
            };
            resolver.strategies.push(strategy);
        }

        Ok(resolver)
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    async fn resolve_version(&self, version: IpVersion) -> Result<ResolvedIp, Error> {
        let mut failures = Vec::new();

        for strategy in &self.strategies {
            match strategy.resolve(version).await {
                Ok(resolved) => {
                    tracing::debug!(
                        "Resolved public {} address {} via {}",
                        version,
                        resolved.ip,
                        resolved.origin
                    );
                    return Ok(resolved);
                }
                Err(e) => {
                    tracing::debug!("{} strategy failed for {}: {}", strategy.label(), version, e);
                    failures.push(format!("{}: {}", strategy.label(), e));
                }
            }
        }

        if failures.is_empty() {
            failures.push("no strategies configured".to_string());
        }

        Err(Error::no_address(format!("{} ({})", version, failures.join("; "))))
    }
}

#[async_trait]
impl PublicIpFetcher for PublicIpResolver {
    async fn ip(&self) -> Result<ResolvedIp, Error> {
        self.resolve_version(IpVersion::Both).await
    }

    async fn ip4(&self) -> Result<ResolvedIp, Error> {
        self.resolve_version(IpVersion::V4).await
    }

    async fn ip6(&self) -> Result<ResolvedIp, Error> {
        self.resolve_version(IpVersion::V6).await
    }
}
