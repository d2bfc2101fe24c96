//! Core DDNS engine
//!
//! The DdnsEngine is responsible for:
//! - Scheduling one periodic check per record, phase-shifted across records
//! - Skipping work the published DNS value proves unnecessary
//! - Resolving the desired IP and comparing it with stored state
//! - Updating DNS records via each record's DnsProvider
//! - Persisting every settled outcome to the StateStore
//!
//! ## Architecture
//!
//! ```text
//!  ticker ─┐   trigger_now ─┐   IpChangeEvent stream ─┐
//!          ▼                ▼                         ▼
//!       ┌──────────────────────────────────────────────────┐
//!       │ DdnsEngine: one task per record, single-flight   │
//!       └──────────────────────────────────────────────────┘
//!          │             │               │              │
//!          ▼             ▼               ▼              ▼
//!   ┌───────────┐ ┌─────────────┐ ┌─────────────┐ ┌────────────┐
//!   │ DnsLookup │ │ PublicIp    │ │ DnsProvider │ │ StateStore │
//!   │ (publish?)│ │ Fetcher     │ │ (update)    │ │ (persist)  │
//!   └───────────┘ └─────────────┘ └─────────────┘ └────────────┘
//! ```
//!
//! ## Cycle
//!
//! 1. Load the record's state (missing means `Unset`)
//! 2. Resolve the public IP for the record's version
//! 3. If the record is `UpToDate` and lookups are allowed, look up the
//!    published value; if it already serves the resolved IP, stop here.
//!    Without a usable lookup, the stored IP stands in for it
//! 4. Last provider call within the cooldown: stop here
//! 5. `Updating`, call the provider, settle to `UpToDate` or `Fail`
//! 6. Persist the settled state and history entry; only then publish the
//!    settled status
//!
//! Failures are never retried inside a cycle; the next tick is the retry.

use crate::config::EngineConfig;
use crate::error::{Error, ErrorCategory, Result};
use crate::record::{Record, RecordId, RecordState, RecordStatus, StateUpdate};
use crate::traits::{DnsLookup, IpChangeEvent, PublicIpFetcher, StateStore};
use std::future::Future;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Notify, mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Events emitted by the DdnsEngine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Engine started
    Started { records_count: usize },

    /// A cycle ended without calling the provider
    CycleSkipped { record: RecordId, reason: SkipReason },

    /// Public IP resolution failed; state untouched
    ResolveFailed { record: RecordId, error: String },

    /// DNS update started
    UpdateStarted { record: RecordId, new_ip: IpAddr },

    /// DNS update succeeded
    UpdateSucceeded {
        record: RecordId,
        new_ip: IpAddr,
        previous_ip: Option<IpAddr>,
    },

    /// DNS update failed; retried on the next tick
    UpdateFailed {
        record: RecordId,
        attempted_ip: IpAddr,
        category: ErrorCategory,
        error: String,
    },

    /// The provider answered but the outcome could not be stored; the
    /// record keeps its previous status
    PersistFailed {
        record: RecordId,
        attempted_ip: IpAddr,
        error: String,
    },

    /// A cycle observed shutdown and exited without writing
    CycleAbandoned { record: RecordId },

    /// Engine stopped
    Stopped { completed: usize, abandoned: usize },
}

/// Why a cycle made no provider call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// DNS already serves the resolved IP
    Published,
    /// Resolved IP equals the stored one and the record is up to date
    Unchanged,
    /// Last provider call is within the cooldown
    CoolingDown,
}

/// Result of one cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Skipped(SkipReason),
    /// Provider confirmed the address
    Updated(IpAddr),
    /// Provider call failed or confirmed another address
    Failed(ErrorCategory),
    /// No public IP could be resolved
    Unresolved,
    /// Shutdown interrupted the cycle; nothing was written
    Abandoned,
}

/// What `stop` observed while shutting down
///
/// Counts cover record tasks only; IP change watchers are not included.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Record tasks that exited within the timeout
    pub completed: usize,
    /// Record tasks aborted when the timeout elapsed
    pub abandoned: usize,
}

/// Per-record runtime state
struct RecordSlot {
    record: Record,
    /// Held for the whole cycle: the single-flight lock
    cycle: tokio::sync::Mutex<()>,
    /// Coalescing out-of-band trigger
    trigger: Notify,
    /// Live status, including `Updating`
    status: watch::Sender<RecordStatus>,
}

impl RecordSlot {
    fn new(record: Record) -> Self {
        let (status, _) = watch::channel(RecordStatus::Unset);
        Self {
            record,
            cycle: tokio::sync::Mutex::new(()),
            trigger: Notify::new(),
            status,
        }
    }
}

/// Publishes `Updating` for its lifetime
///
/// Dropping it unsettled (cancellation, abort, early error) restores the
/// status the record had before the cycle, so `Updating` never outlives
/// its cycle.
struct UpdatingGuard<'a> {
    status: &'a watch::Sender<RecordStatus>,
    previous: RecordStatus,
    settled: bool,
}

impl<'a> UpdatingGuard<'a> {
    fn enter(status: &'a watch::Sender<RecordStatus>, previous: RecordStatus) -> Self {
        status.send_replace(RecordStatus::Updating);
        Self {
            status,
            previous,
            settled: false,
        }
    }

    fn settle(mut self, next: RecordStatus) {
        self.status.send_replace(next);
        self.settled = true;
    }
}

impl Drop for UpdatingGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.status.send_replace(self.previous);
        }
    }
}

/// Result of asking DNS for a record's published value
enum Published {
    Serving(Vec<IpAddr>),
    /// Lookup disabled for the record or failed
    Unknown,
    Abandoned,
}

/// State shared by the engine handle and its record tasks
struct Shared {
    slots: Vec<Arc<RecordSlot>>,
    fetcher: Arc<dyn PublicIpFetcher>,
    lookup: Arc<dyn DnsLookup>,
    store: Arc<dyn StateStore>,
    period: Duration,
    cooldown: Duration,
    cancel: CancellationToken,
    event_tx: mpsc::Sender<EngineEvent>,
}

/// Core DDNS engine
///
/// ## Lifecycle
///
/// 1. Create with [`DdnsEngine::new()`]
/// 2. Start with [`DdnsEngine::run()`] (returns immediately)
/// 3. Optionally feed [`DdnsEngine::trigger_now()`] or an IP change stream
/// 4. Shut down with [`DdnsEngine::stop()`]
///
/// ## Concurrency
///
/// Each record gets its own task and timer. A per-record lock spans the
/// whole cycle, so at most one cycle per record is in flight no matter how
/// ticks, triggers and [`cycle_once`](DdnsEngine::cycle_once) interleave.
/// Records never wait on each other.
///
/// ## Load Resistance
///
/// - **Phase offsets**: record timers start spread over one period
/// - **Coalesced triggers**: any number of triggers during a cycle yields
///   one follow-up cycle
/// - **Bounded event channel**: when full, events are dropped (logged)
pub struct DdnsEngine {
    shared: Arc<Shared>,
    tasks: Mutex<JoinSet<()>>,
    watchers: Mutex<JoinSet<()>>,
    running: AtomicBool,
    stopped: AtomicBool,
}

impl DdnsEngine {
    /// Create a new DDNS engine
    ///
    /// # Parameters
    ///
    /// - `records`: Validated records; ids must be unique
    /// - `fetcher`: Public IP resolver shared by all records
    /// - `lookup`: DNS lookup client for the published-value short-circuit
    /// - `store`: State store, the record of truth
    /// - `config`: Engine settings
    ///
    /// # Returns
    ///
    /// A tuple of (engine, event_receiver) where event_receiver yields engine events
    pub fn new(
        records: Vec<Record>,
        fetcher: Arc<dyn PublicIpFetcher>,
        lookup: Arc<dyn DnsLookup>,
        store: Arc<dyn StateStore>,
        config: EngineConfig,
    ) -> Result<(Self, mpsc::Receiver<EngineEvent>)> {
        config.validate()?;

        if records.is_empty() {
            return Err(Error::config("No records configured"));
        }

        let mut slots: Vec<Arc<RecordSlot>> = Vec::with_capacity(records.len());
        for record in records {
            if slots.iter().any(|s| s.record.id() == record.id()) {
                return Err(Error::config(format!("Duplicate record: {}", record.id())));
            }
            slots.push(Arc::new(RecordSlot::new(record)));
        }

        let (tx, rx) = mpsc::channel(config.event_channel_capacity);

        let shared = Arc::new(Shared {
            slots,
            fetcher,
            lookup,
            store,
            period: config.period(),
            cooldown: config.cooldown(),
            cancel: CancellationToken::new(),
            event_tx: tx,
        });

        let engine = Self {
            shared,
            tasks: Mutex::new(JoinSet::new()),
            watchers: Mutex::new(JoinSet::new()),
            running: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        };

        Ok((engine, rx))
    }

    /// Start one background task per record
    ///
    /// Returns immediately. Record `i` of `n` first fires after
    /// `period * i / n`, then every period. Must be called inside a Tokio
    /// runtime; calling it twice is a no-op.
    pub fn run(&self) -> Result<()> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(Error::invalid_input("engine already stopped"));
        }
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Engine already running");
            return Ok(());
        }

        let count = self.shared.slots.len();
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);

        for (i, slot) in self.shared.slots.iter().enumerate() {
            let period = slot.record.period().unwrap_or(self.shared.period);
            let offset = period.mul_f64(i as f64 / count as f64);
            debug!(
                "Scheduling {} every {:?} (first check in {:?})",
                slot.record.id(),
                period,
                offset
            );
            tasks.spawn(record_task(
                self.shared.clone(),
                slot.clone(),
                period,
                offset,
            ));
        }

        info!("Engine started with {} records", count);
        self.shared.emit(EngineEvent::Started {
            records_count: count,
        });
        Ok(())
    }

    /// Force an out-of-band cycle for one record
    ///
    /// Never blocks. If a cycle is in flight the trigger is coalesced: one
    /// more cycle runs after it, however many triggers arrive meanwhile.
    pub fn trigger_now(&self, id: &RecordId) -> Result<()> {
        let slot = self.shared.slot(id)?;
        slot.trigger.notify_one();
        Ok(())
    }

    /// Trigger every record
    pub fn trigger_all(&self) {
        for slot in &self.shared.slots {
            slot.trigger.notify_one();
        }
    }

    /// Trigger records whenever the host's IP changes
    ///
    /// Each event triggers the records of the affected version. The watcher
    /// ends with the stream or on `stop`.
    pub fn watch_ip_changes<S>(&self, stream: S)
    where
        S: Stream<Item = IpChangeEvent> + Send + 'static,
    {
        let shared = self.shared.clone();
        let mut watchers = self.watchers.lock().unwrap_or_else(PoisonError::into_inner);

        watchers.spawn(async move {
            tokio::pin!(stream);
            loop {
                let event = tokio::select! {
                    biased;
                    _ = shared.cancel.cancelled() => break,
                    event = stream.next() => match event {
                        Some(event) => event,
                        None => break,
                    },
                };

                info!(
                    "IP change detected: {} -> {}",
                    event
                        .previous_ip
                        .map_or_else(|| "unknown".to_string(), |ip| ip.to_string()),
                    event.new_ip
                );

                for slot in &shared.slots {
                    if event.affects(slot.record.ip_version()) {
                        slot.trigger.notify_one();
                    }
                }
            }
            debug!("IP change watcher finished");
        });
    }

    /// Run one cycle for a record inline
    ///
    /// Takes the same per-record lock as scheduled cycles, so it waits for
    /// an in-flight cycle rather than racing it.
    pub async fn cycle_once(&self, id: &RecordId) -> Result<CycleOutcome> {
        let slot = self.shared.slot(id)?;
        self.shared.run_cycle(&slot).await
    }

    /// Live status of a record, `Updating` included
    pub fn status(&self, id: &RecordId) -> Option<RecordStatus> {
        self.shared.slot(id).ok().map(|slot| *slot.status.borrow())
    }

    /// Receive every status change of a record
    pub fn subscribe(&self, id: &RecordId) -> Option<watch::Receiver<RecordStatus>> {
        self.shared.slot(id).ok().map(|slot| slot.status.subscribe())
    }

    /// Ids of all managed records, in configuration order
    pub fn record_ids(&self) -> Vec<RecordId> {
        self.shared
            .slots
            .iter()
            .map(|slot| slot.record.id().clone())
            .collect()
    }

    /// Stop all cycles and wait up to `timeout` for them to exit
    ///
    /// In-flight lookups, resolutions and provider calls are cancelled and
    /// their cycles exit without writing. Tasks still running when the
    /// timeout elapses are aborted. The store is flushed afterwards.
    /// Calling `stop` again returns an empty report.
    pub async fn stop(&self, timeout: Duration) -> ShutdownReport {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return ShutdownReport::default();
        }

        info!("Stopping engine (timeout {:?})", timeout);
        self.shared.cancel.cancel();

        // Watchers only forward triggers
        let mut watchers = {
            let mut guard = self.watchers.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *guard)
        };
        watchers.abort_all();
        while watchers.join_next().await.is_some() {}

        let mut tasks = {
            let mut guard = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *guard)
        };

        let total = tasks.len();
        let mut completed = 0;

        let drained = tokio::time::timeout(timeout, async {
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined
                    && e.is_panic()
                {
                    error!("Record task panicked: {}", e);
                }
                completed += 1;
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                "{} task(s) still running after {:?}, abandoning",
                total - completed,
                timeout
            );
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }

        if let Err(e) = self.shared.store.flush().await {
            error!("Failed to flush state store: {}", e);
        }

        let report = ShutdownReport {
            completed,
            abandoned: total - completed,
        };
        info!(
            "Engine stopped ({} completed, {} abandoned)",
            report.completed, report.abandoned
        );
        self.shared.emit(EngineEvent::Stopped {
            completed: report.completed,
            abandoned: report.abandoned,
        });
        report
    }
}

/// Body of one record's background task
async fn record_task(shared: Arc<Shared>, slot: Arc<RecordSlot>, period: Duration, offset: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + offset, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => break,
            _ = ticker.tick() => {}
            _ = slot.trigger.notified() => {
                debug!("Out-of-band cycle for {}", slot.record.id());
            }
        }

        match shared.run_cycle(&slot).await {
            Ok(CycleOutcome::Abandoned) => break,
            Ok(outcome) => debug!("Cycle for {} finished: {:?}", slot.record.id(), outcome),
            Err(e) => error!("Cycle for {} failed: {}", slot.record.id(), e),
        }
    }

    debug!("Task for {} exited", slot.record.id());
}

impl Shared {
    fn slot(&self, id: &RecordId) -> Result<Arc<RecordSlot>> {
        self.slots
            .iter()
            .find(|slot| slot.record.id() == id)
            .cloned()
            .ok_or_else(|| Error::not_found(id.to_string()))
    }

    /// Run `fut` unless shutdown wins the race
    async fn cancellable<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            output = fut => Some(output),
        }
    }

    async fn run_cycle(&self, slot: &RecordSlot) -> Result<CycleOutcome> {
        let record = &slot.record;
        let id = record.id();

        let Some(_flight) = self.cancellable(slot.cycle.lock()).await else {
            return Ok(self.abandoned(id));
        };

        let state = match self.store.select(id).await {
            Ok(state) => state,
            Err(Error::NotFound(_)) => RecordState::default(),
            Err(e) => return Err(e),
        };

        // Stores never hold Updating; the live status follows the store
        // between cycles
        let settled = match state.status {
            RecordStatus::Updating => RecordStatus::Unset,
            status => status,
        };
        slot.status.send_if_modified(|current| {
            let changed = *current != settled;
            *current = settled;
            changed
        });

        let resolved = match self
            .cancellable(self.fetcher.resolve(record.ip_version()))
            .await
        {
            None => return Ok(self.abandoned(id)),
            Some(Ok(resolved)) => resolved,
            Some(Err(e)) => {
                warn!("Cannot resolve public IP for {}: {}", id, e);
                self.emit(EngineEvent::ResolveFailed {
                    record: id.clone(),
                    error: e.to_string(),
                });
                return Ok(CycleOutcome::Unresolved);
            }
        };
        let target = resolved.ip;

        if settled == RecordStatus::UpToDate {
            match self.published(record).await {
                Published::Abandoned => return Ok(self.abandoned(id)),
                Published::Serving(published) if published.contains(&target) => {
                    debug!("{} already publishes {}, skipping", id, target);
                    return Ok(self.skipped(id, SkipReason::Published));
                }
                Published::Serving(published) => {
                    debug!("{} publishes {:?}, want {}", id, published, target);
                }
                Published::Unknown if state.ip == Some(target) => {
                    debug!("{} already at {}, skipping", id, target);
                    return Ok(self.skipped(id, SkipReason::Unchanged));
                }
                Published::Unknown => {}
            }
        }

        if self.cooling_down(&state) {
            debug!("{} changed to {} but is cooling down", id, target);
            return Ok(self.skipped(id, SkipReason::CoolingDown));
        }

        let updating = settled.transition(RecordStatus::Updating)?;
        let guard = UpdatingGuard::enter(&slot.status, settled);

        info!(
            "Updating {} to {} (from {}, was {:?})",
            record.provider().describe(),
            target,
            resolved.origin,
            state.ip
        );
        self.emit(EngineEvent::UpdateStarted {
            record: id.clone(),
            new_ip: target,
        });

        let Some(result) = self.cancellable(record.provider().update(target)).await else {
            drop(guard);
            return Ok(self.abandoned(id));
        };

        let result = match result {
            Ok(confirmed) if confirmed == target => Ok(target),
            Ok(confirmed) => Err(Error::ip_mismatch(target, confirmed)),
            Err(e) => Err(e),
        };

        let (update, outcome, event) = match result {
            Ok(ip) => {
                info!("Updated {} -> {}", id, ip);
                (
                    StateUpdate::success(ip),
                    CycleOutcome::Updated(ip),
                    EngineEvent::UpdateSucceeded {
                        record: id.clone(),
                        new_ip: ip,
                        previous_ip: state.ip,
                    },
                )
            }
            Err(e) => {
                let category = e.category();
                warn!("Update of {} to {} failed ({}): {}", id, target, category, e);
                (
                    StateUpdate::failure(target, &e),
                    CycleOutcome::Failed(category),
                    EngineEvent::UpdateFailed {
                        record: id.clone(),
                        attempted_ip: target,
                        category,
                        error: e.to_string(),
                    },
                )
            }
        };

        let next = updating.transition(update.status)?;

        if let Err(e) = self.store.update(id, update).await {
            error!("Failed to persist state for {}: {}", id, e);
            drop(guard);
            self.emit(EngineEvent::PersistFailed {
                record: id.clone(),
                attempted_ip: target,
                error: e.to_string(),
            });
            return Err(e);
        }

        guard.settle(next);
        self.emit(event);
        Ok(outcome)
    }

    /// What DNS serves for the record, if it can be asked
    async fn published(&self, record: &Record) -> Published {
        if !record.uses_dns_lookup() {
            return Published::Unknown;
        }
        let fqdn = record.fqdn();
        match self
            .cancellable(self.lookup.lookup(&fqdn, record.ip_version()))
            .await
        {
            None => Published::Abandoned,
            Some(Ok(published)) => Published::Serving(published),
            Some(Err(e)) => {
                warn!("DNS lookup for {} failed: {}", fqdn, e);
                Published::Unknown
            }
        }
    }

    fn cooling_down(&self, state: &RecordState) -> bool {
        if self.cooldown.is_zero() {
            return false;
        }
        let Some(last) = state.last_attempt() else {
            return false;
        };
        let elapsed = chrono::Utc::now().signed_duration_since(last);
        chrono::Duration::from_std(self.cooldown).is_ok_and(|cooldown| elapsed < cooldown)
    }

    fn skipped(&self, id: &RecordId, reason: SkipReason) -> CycleOutcome {
        self.emit(EngineEvent::CycleSkipped {
            record: id.clone(),
            reason,
        });
        CycleOutcome::Skipped(reason)
    }

    fn abandoned(&self, id: &RecordId) -> CycleOutcome {
        debug!("Cycle for {} abandoned on shutdown", id);
        self.emit(EngineEvent::CycleAbandoned { record: id.clone() });
        CycleOutcome::Abandoned
    }

    /// Emit an engine event
    fn emit(&self, event: EngineEvent) {
        // Channel full means the consumer is slower than the engine; drop
        // the event rather than grow without bound
        if self.event_tx.try_send(event).is_err() {
            warn!("Event channel full, dropping event. Consider increasing event_channel_capacity.");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IpVersion;
    use crate::record::HistoryEvent;

    #[test]
    fn test_updating_guard_restores_previous_status() {
        let (status, rx) = watch::channel(RecordStatus::Fail);

        {
            let _guard = UpdatingGuard::enter(&status, RecordStatus::Fail);
            assert_eq!(*rx.borrow(), RecordStatus::Updating);
        }
        assert_eq!(*rx.borrow(), RecordStatus::Fail);

        let guard = UpdatingGuard::enter(&status, RecordStatus::Fail);
        guard.settle(RecordStatus::UpToDate);
        assert_eq!(*rx.borrow(), RecordStatus::UpToDate);
    }

    #[test]
    fn test_cooldown_uses_last_history_entry() {
        let (tx, _rx) = mpsc::channel(1);
        let shared = Shared {
            slots: Vec::new(),
            fetcher: Arc::new(crate::resolver::PublicIpResolver::new()),
            lookup: Arc::new(NoLookup),
            store: Arc::new(crate::state::MemoryStateStore::new(0)),
            period: Duration::from_secs(600),
            cooldown: Duration::from_secs(300),
            cancel: CancellationToken::new(),
            event_tx: tx,
        };

        let mut state = RecordState::default();
        assert!(!shared.cooling_down(&state));

        state.history.push(HistoryEvent::success("1.2.3.4".parse().unwrap()));
        assert!(shared.cooling_down(&state));

        state.history[0].time = chrono::Utc::now() - chrono::Duration::seconds(301);
        assert!(!shared.cooling_down(&state));
    }

    struct NoLookup;

    #[async_trait::async_trait]
    impl DnsLookup for NoLookup {
        async fn lookup(&self, _hostname: &str, _version: IpVersion) -> Result<Vec<IpAddr>> {
            Ok(Vec::new())
        }
    }
}
