//! Live synchronization of one screen's view model.
//!
//! A [`SyncController`] is mounted per screen. It subscribes to change
//! notices for its [`QueryScope`], fetches, builds the view, and answers
//! every notice with a full re-fetch. Results are published through
//! `watch` channels.
//!
//! All work happens on a single driver task: fetch cycles and
//! subscription joins are polled in `FuturesUnordered` sets, notices
//! arrive through a `StreamMap`, and cancellation tears everything down.
//! The first fetch starts at mount, alongside the joins; a change feed
//! that is slow, rejected or closed degrades the screen but never holds
//! back its data. Cycles carry a sequence number
//! and an outcome is applied only if it is newer than the last applied
//! one, so a slow stale fetch never overwrites a fresher view.

mod cycle;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use futures_util::future::BoxFuture;
use futures_util::stream::{self, BoxStream, FuturesUnordered};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::StreamMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backend::{Backend, ChangeFilter, ChangeNotice, RecordSet, Subscription, SubscriptionId};
use crate::config::{RefetchPolicy, SyncConfig};
use crate::error::CoreError;
use crate::liveness::Liveness;
use crate::model::{DeviceId, DeviceKey, LinkTemplate};
use crate::view::{DetailView, FleetView};

use cycle::Fetched;
pub use cycle::{load_detail, load_fleet};

// ── Scope and published state ────────────────────────────────────────

/// Query breadth of a screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryScope {
    /// Every device plus all telemetry.
    Fleet { links: LinkTemplate },
    /// One device plus its newest sample.
    Device { id: DeviceId, links: LinkTemplate },
}

impl QueryScope {
    /// Fleet scope with map links to `/devices/{id}`.
    pub fn fleet() -> Self {
        Self::Fleet {
            links: LinkTemplate::fleet(),
        }
    }

    /// Detail scope with links to `/dashboard/devices/{id}`.
    pub fn device(id: impl Into<DeviceId>) -> Self {
        Self::Device {
            id: id.into(),
            links: LinkTemplate::dashboard(),
        }
    }

    pub fn links(&self) -> &LinkTemplate {
        match self {
            Self::Fleet { links } | Self::Device { links, .. } => links,
        }
    }

    /// Subscriptions established on mount. The detail screen's telemetry
    /// subscription waits until a cycle reveals the device key.
    fn initial_subscriptions(&self) -> Vec<(RecordSet, ChangeFilter)> {
        match self {
            Self::Fleet { .. } => vec![
                (RecordSet::Devices, ChangeFilter::All),
                (RecordSet::Telemetry, ChangeFilter::All),
            ],
            Self::Device { id, .. } => vec![(RecordSet::Devices, ChangeFilter::DeviceId(id.clone()))],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScreenView {
    Fleet(FleetView),
    Detail(DetailView),
}

impl ScreenView {
    pub fn as_fleet(&self) -> Option<&FleetView> {
        match self {
            Self::Fleet(view) => Some(view),
            Self::Detail(_) => None,
        }
    }

    pub fn as_detail(&self) -> Option<&DetailView> {
        match self {
            Self::Detail(view) => Some(view),
            Self::Fleet(_) => None,
        }
    }
}

/// What a screen should show.
///
/// `Loading` only appears before the first cycle settles; afterwards the
/// last settled state stays up while refetches run.
#[derive(Debug, Clone, PartialEq)]
pub enum ScreenState {
    Loading,
    Ready(Arc<ScreenView>),
    Failed { message: String },
    NotFound { id: DeviceId },
}

impl ScreenState {
    pub fn view(&self) -> Option<&ScreenView> {
        match self {
            Self::Ready(view) => Some(view),
            _ => None,
        }
    }
}

/// Controller lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum SyncPhase {
    Idle,
    Loading,
    /// Data loaded while a change subscription is still being joined.
    Ready,
    /// Data loaded and every change subscription is live.
    Subscribed,
    /// Data loaded but at least one subscription failed or was closed.
    Degraded,
    Failed,
}

// ── Clock ────────────────────────────────────────────────────────────

/// Source of `now` for liveness classification.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

// ── SyncController ───────────────────────────────────────────────────

/// Handle to one screen's synchronization.
///
/// Dropping the handle cancels the driver; [`teardown`](Self::teardown)
/// additionally waits until every subscription has been released.
pub struct SyncController {
    state: watch::Receiver<ScreenState>,
    phase: watch::Receiver<SyncPhase>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SyncController {
    /// Mount a controller and start its driver task. Must be called
    /// inside a tokio runtime.
    pub fn mount<B: Backend>(backend: Arc<B>, scope: QueryScope, config: SyncConfig) -> Self {
        Self::mount_with_clock(backend, scope, config, Arc::new(SystemClock))
    }

    pub fn mount_with_clock<B: Backend, C: Clock>(
        backend: Arc<B>,
        scope: QueryScope,
        config: SyncConfig,
        clock: Arc<C>,
    ) -> Self {
        let (state_tx, state) = watch::channel(ScreenState::Loading);
        let (phase_tx, phase) = watch::channel(SyncPhase::Idle);
        let cancel = CancellationToken::new();

        let driver = Driver {
            backend,
            clock,
            scope,
            liveness: Liveness::new(config.liveness_window),
            refetch: config.refetch,
            state_tx,
            phase_tx,
            cancel: cancel.clone(),
            next_seq: 0,
            last_applied: 0,
            last_ok: true,
            dirty: false,
            in_flight: FuturesUnordered::new(),
            next_generation: 0,
            wanted: HashMap::new(),
            joining: FuturesUnordered::new(),
            releasing: FuturesUnordered::new(),
            feeds: StreamMap::new(),
            subscriptions: HashMap::new(),
            failed: HashSet::new(),
            telemetry_key: None,
        };
        let task = tokio::spawn(driver.run());

        Self {
            state,
            phase,
            cancel,
            task: Some(task),
        }
    }

    /// Subscribe to screen state updates.
    pub fn state(&self) -> watch::Receiver<ScreenState> {
        self.state.clone()
    }

    pub fn current(&self) -> ScreenState {
        self.state.borrow().clone()
    }

    pub fn phase(&self) -> watch::Receiver<SyncPhase> {
        self.phase.clone()
    }

    pub fn current_phase(&self) -> SyncPhase {
        *self.phase.borrow()
    }

    /// Stop syncing: drop in-flight cycles unapplied, release both
    /// subscriptions, and wait for the driver to finish.
    pub async fn teardown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "sync driver task failed");
            }
        }
    }
}

impl Drop for SyncController {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ── Driver ───────────────────────────────────────────────────────────

type CycleFuture = BoxFuture<'static, (u64, Result<Fetched, CoreError>)>;
type JoinFuture = BoxFuture<'static, Joined>;

/// Notices from one subscription, followed by `None` once it closes.
type Feed = BoxStream<'static, Option<ChangeNotice>>;

/// Outcome of a subscribe request.
struct Joined {
    record_set: RecordSet,
    generation: u64,
    /// Run one more cycle once the subscription settles.
    refetch: bool,
    result: Result<Subscription, CoreError>,
}

struct Driver<B, C> {
    backend: Arc<B>,
    clock: Arc<C>,
    scope: QueryScope,
    liveness: Liveness,
    refetch: RefetchPolicy,
    state_tx: watch::Sender<ScreenState>,
    phase_tx: watch::Sender<SyncPhase>,
    cancel: CancellationToken,

    // cycles
    next_seq: u64,
    last_applied: u64,
    last_ok: bool,
    dirty: bool,
    in_flight: FuturesUnordered<CycleFuture>,

    // subscriptions
    next_generation: u64,
    wanted: HashMap<RecordSet, u64>,
    joining: FuturesUnordered<JoinFuture>,
    releasing: FuturesUnordered<BoxFuture<'static, ()>>,
    feeds: StreamMap<RecordSet, Feed>,
    subscriptions: HashMap<RecordSet, SubscriptionId>,
    failed: HashSet<RecordSet>,
    telemetry_key: Option<DeviceKey>,
}

impl<B: Backend, C: Clock> Driver<B, C> {
    async fn run(mut self) {
        // the first fetch never waits on the change feed
        self.start_cycle();
        for (record_set, filter) in self.scope.initial_subscriptions() {
            self.subscribe(record_set, filter, false);
        }

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                // notices first, so a burst is fully recorded before the
                // cycle it interrupts is applied
                Some((record_set, notice)) = self.feeds.next(), if !self.feeds.is_empty() => {
                    match notice {
                        Some(notice) => self.on_notice(record_set, &notice),
                        None => self.on_feed_closed(record_set),
                    }
                }
                Some(joined) = self.joining.next(), if !self.joining.is_empty() => {
                    self.on_joined(joined);
                }
                Some(()) = self.releasing.next(), if !self.releasing.is_empty() => {}
                Some((seq, outcome)) = self.in_flight.next(), if !self.in_flight.is_empty() => {
                    self.settle(seq, outcome);
                }
            }
        }

        self.shutdown().await;
    }

    // ── Cycles ───────────────────────────────────────────────────────

    fn start_cycle(&mut self) {
        self.next_seq += 1;
        let seq = self.next_seq;
        let backend = Arc::clone(&self.backend);
        let scope = self.scope.clone();
        debug!(seq, "sync cycle started");

        self.in_flight.push(Box::pin(async move {
            let outcome = cycle::fetch(&*backend, &scope).await;
            (seq, outcome)
        }));
        self.set_phase(SyncPhase::Loading);
    }

    fn on_notice(&mut self, record_set: RecordSet, notice: &ChangeNotice) {
        debug!(%record_set, kind = ?notice.kind, "change notice");
        match self.refetch {
            RefetchPolicy::Coalesce if !self.in_flight.is_empty() => self.dirty = true,
            RefetchPolicy::Independent | RefetchPolicy::Coalesce => self.start_cycle(),
        }
    }

    fn settle(&mut self, seq: u64, outcome: Result<Fetched, CoreError>) {
        if seq <= self.last_applied {
            debug!(seq, last_applied = self.last_applied, "discarding superseded cycle");
        } else {
            self.last_applied = seq;
            self.apply(seq, outcome);
        }

        if self.dirty && self.in_flight.is_empty() {
            self.dirty = false;
            self.start_cycle();
        }
        self.update_phase();
    }

    fn apply(&mut self, seq: u64, outcome: Result<Fetched, CoreError>) {
        match outcome {
            Ok(fetched) => {
                let key = fetched.device_key().cloned();
                let state = cycle::into_state(fetched, self.scope.links(), self.liveness, self.clock.now());
                debug!(seq, "sync cycle applied");
                self.state_tx.send_replace(state);
                self.last_ok = true;
                self.set_phase(SyncPhase::Ready);

                if let Some(key) = key {
                    self.track_key(key);
                }
            }
            Err(e) => {
                warn!(seq, error = %e, "sync cycle failed");
                self.state_tx.send_replace(ScreenState::Failed {
                    message: e.to_string(),
                });
                self.last_ok = false;
            }
        }
    }

    /// Point the telemetry subscription at `key`. A key change means the
    /// old subscription may have missed samples, so one more cycle runs
    /// once the new one settles.
    fn track_key(&mut self, key: DeviceKey) {
        if self.telemetry_key.as_ref() == Some(&key) {
            return;
        }
        let replaced = self.telemetry_key.replace(key.clone()).is_some();
        self.subscribe(RecordSet::Telemetry, ChangeFilter::DeviceKey(key), replaced);
    }

    // ── Subscriptions ────────────────────────────────────────────────

    /// Request a (re)subscription of `record_set`. Only the most recent
    /// request per record set is kept when several overlap.
    fn subscribe(&mut self, record_set: RecordSet, filter: ChangeFilter, refetch: bool) {
        self.next_generation += 1;
        let generation = self.next_generation;
        self.wanted.insert(record_set, generation);

        let backend = Arc::clone(&self.backend);
        self.joining.push(Box::pin(async move {
            let result = backend.subscribe(record_set, filter).await;
            Joined {
                record_set,
                generation,
                refetch,
                result,
            }
        }));
    }

    fn on_joined(&mut self, joined: Joined) {
        let Joined {
            record_set,
            generation,
            refetch,
            result,
        } = joined;

        if self.wanted.get(&record_set) != Some(&generation) {
            debug!(%record_set, generation, "discarding superseded subscription");
            if let Ok(subscription) = result {
                self.release(subscription.id);
            }
            return;
        }
        self.wanted.remove(&record_set);

        let previous = match result {
            Ok(subscription) => {
                debug!(%record_set, subscription = %subscription.id, "subscribed");
                let feed = subscription
                    .changes
                    .map(Some)
                    .chain(stream::once(async { None }))
                    .boxed();
                self.feeds.insert(record_set, feed);
                self.failed.remove(&record_set);
                self.subscriptions.insert(record_set, subscription.id)
            }
            Err(e) => {
                warn!(%record_set, error = %e, "change subscription failed");
                self.failed.insert(record_set);
                self.feeds.remove(&record_set);
                self.subscriptions.remove(&record_set)
            }
        };

        if let Some(previous) = previous {
            self.release(previous);
        }
        if refetch {
            debug!("device key changed, refetching");
            self.start_cycle();
        }
        self.update_phase();
    }

    /// The server closed the channel or the socket gave up. The
    /// subscription id stays recorded so teardown still releases it.
    fn on_feed_closed(&mut self, record_set: RecordSet) {
        warn!(%record_set, "change feed closed, live updates stopped");
        self.failed.insert(record_set);
        self.update_phase();
    }

    fn release(&mut self, id: SubscriptionId) {
        let backend = Arc::clone(&self.backend);
        self.releasing.push(Box::pin(async move { release(&*backend, id).await }));
    }

    // ── Phase ────────────────────────────────────────────────────────

    fn set_phase(&self, phase: SyncPhase) {
        self.phase_tx.send_if_modified(|current| {
            let changed = *current != phase;
            *current = phase;
            changed
        });
    }

    fn update_phase(&self) {
        let phase = match (
            self.in_flight.is_empty(),
            self.last_ok,
            self.failed.is_empty(),
            self.joining.is_empty(),
        ) {
            (false, _, _, _) => SyncPhase::Loading,
            (true, false, _, _) => SyncPhase::Failed,
            (true, true, false, _) => SyncPhase::Degraded,
            (true, true, true, false) => SyncPhase::Ready,
            (true, true, true, true) => SyncPhase::Subscribed,
        };
        self.set_phase(phase);
    }

    async fn shutdown(mut self) {
        // pending cycles are dropped unapplied, unacknowledged joins abandoned
        self.in_flight.clear();
        self.joining.clear();
        self.feeds.clear();
        while self.releasing.next().await.is_some() {}

        let mut subscriptions: Vec<_> = self.subscriptions.drain().collect();
        subscriptions.sort_by_key(|(record_set, _)| *record_set);
        for (_, id) in subscriptions {
            release(&*self.backend, id).await;
        }

        self.set_phase(SyncPhase::Idle);
        debug!("sync controller stopped");
    }
}

async fn release<B: Backend>(backend: &B, id: SubscriptionId) {
    debug!(subscription = %id, "releasing subscription");
    if let Err(e) = backend.unsubscribe(id).await {
        warn!(error = %e, "unsubscribe failed");
    }
}
