#![allow(clippy::unwrap_used)]
// SyncController behaviour against an in-memory backend with gated fetches.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use futures_util::StreamExt;
use pretty_assertions::assert_eq;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;

use fleetwatch_core::{
    ChangeFeed, ChangeFilter, ChangeKind, ChangeNotice, Clock, CoreError, Device, DeviceId,
    DeviceKey, QueryScope, RecordSet, RefetchPolicy, ScreenState, Subscription, SubscriptionId,
    SyncConfig, SyncController, SyncPhase, TelemetrySample, TelemetryStore,
};

// ── Mock backend ────────────────────────────────────────────────────

type Feed = (SubscriptionId, RecordSet, mpsc::UnboundedSender<ChangeNotice>);

#[derive(Default)]
struct MockBackend {
    devices: Mutex<Vec<Device>>,
    samples: Mutex<Vec<TelemetrySample>>,
    /// Each primary fetch (`list_devices` / `get_device`) pops one gate
    /// and waits on it before returning.
    gates: Mutex<VecDeque<oneshot::Receiver<()>>>,
    fail_fetch: AtomicBool,
    fail_subscribe: Mutex<Vec<RecordSet>>,
    /// Subscribes for these record sets never answer.
    hold_subscribe: Mutex<Vec<RecordSet>>,

    list_calls: AtomicUsize,
    get_calls: AtomicUsize,
    latest_calls: AtomicUsize,

    next_sub: AtomicUsize,
    feeds: Mutex<Vec<Feed>>,
    subscribed: Mutex<Vec<(SubscriptionId, RecordSet, ChangeFilter)>>,
    unsubscribed: Mutex<Vec<SubscriptionId>>,
}

impl MockBackend {
    fn with_data(devices: Vec<Device>, samples: Vec<TelemetrySample>) -> Arc<Self> {
        let backend = Self::default();
        *backend.devices.lock().unwrap() = devices;
        *backend.samples.lock().unwrap() = samples;
        Arc::new(backend)
    }

    /// Hold the next primary fetch until the returned sender fires.
    fn gate(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.gates.lock().unwrap().push_back(rx);
        tx
    }

    async fn pass_gate(&self) {
        let gate = self.gates.lock().unwrap().pop_front();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
    }

    fn notify(&self, record_set: RecordSet) {
        for (_, rs, tx) in self.feeds.lock().unwrap().iter() {
            if *rs == record_set {
                let _ = tx.send(ChangeNotice {
                    record_set,
                    kind: ChangeKind::Insert,
                });
            }
        }
    }

    fn set_devices(&self, devices: Vec<Device>) {
        *self.devices.lock().unwrap() = devices;
    }

    fn calls(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    fn subscribed(&self) -> Vec<(SubscriptionId, RecordSet, ChangeFilter)> {
        self.subscribed.lock().unwrap().clone()
    }

    fn unsubscribed(&self) -> Vec<SubscriptionId> {
        self.unsubscribed.lock().unwrap().clone()
    }

    fn failure() -> CoreError {
        CoreError::ConnectionFailed {
            url: "mock".into(),
            reason: "backend unreachable".into(),
        }
    }
}

impl TelemetryStore for MockBackend {
    async fn list_devices(&self) -> Result<Vec<Device>, CoreError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let snapshot = self.devices.lock().unwrap().clone();
        let fail = self.fail_fetch.load(Ordering::SeqCst);
        self.pass_gate().await;
        if fail {
            return Err(Self::failure());
        }
        Ok(snapshot)
    }

    async fn get_device(&self, id: &DeviceId) -> Result<Option<Device>, CoreError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        let found = self.devices.lock().unwrap().iter().find(|d| &d.id == id).cloned();
        let fail = self.fail_fetch.load(Ordering::SeqCst);
        self.pass_gate().await;
        if fail {
            return Err(Self::failure());
        }
        Ok(found)
    }

    async fn list_telemetry(&self) -> Result<Vec<TelemetrySample>, CoreError> {
        let snapshot = self.samples.lock().unwrap().clone();
        Ok(snapshot)
    }

    async fn latest_telemetry(&self, key: &DeviceKey) -> Result<Option<TelemetrySample>, CoreError> {
        self.latest_calls.fetch_add(1, Ordering::SeqCst);
        let latest = self
            .samples
            .lock()
            .unwrap()
            .iter()
            .filter(|s| &s.device_key == key)
            .fold(None::<&TelemetrySample>, |best, s| match best {
                Some(b) if b.created_at >= s.created_at => Some(b),
                _ => Some(s),
            })
            .cloned();
        Ok(latest)
    }
}

impl ChangeFeed for MockBackend {
    async fn subscribe(&self, record_set: RecordSet, filter: ChangeFilter) -> Result<Subscription, CoreError> {
        let held = self.hold_subscribe.lock().unwrap().contains(&record_set);
        if held {
            std::future::pending::<()>().await;
        }
        let rejected = self.fail_subscribe.lock().unwrap().contains(&record_set);
        if rejected {
            return Err(CoreError::SubscriptionFailed {
                record_set: record_set.to_string(),
                reason: "rejected".into(),
            });
        }

        let n = self.next_sub.fetch_add(1, Ordering::SeqCst);
        let id = SubscriptionId::new(format!("{record_set}-{n}"));
        let (tx, rx) = mpsc::unbounded_channel();
        self.feeds.lock().unwrap().push((id.clone(), record_set, tx));
        self.subscribed.lock().unwrap().push((id.clone(), record_set, filter));

        Ok(Subscription {
            id,
            changes: UnboundedReceiverStream::new(rx).boxed(),
        })
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), CoreError> {
        self.feeds.lock().unwrap().retain(|(fid, _, _)| *fid != id);
        self.unsubscribed.lock().unwrap().push(id);
        Ok(())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

const WAIT: Duration = Duration::from_secs(5);

struct FixedClock(DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 11, 2, 12, 0, 0).unwrap()
}

fn device(id: i64, key: &str, name: &str) -> Device {
    Device {
        id: DeviceId::Numeric(id),
        key: DeviceKey::new(key),
        name: name.into(),
        latitude: -6.2,
        longitude: 106.8,
        created_at: None,
    }
}

fn sample(key: &str, age_secs: i64) -> TelemetrySample {
    TelemetrySample {
        device_key: DeviceKey::new(key),
        created_at: now() - TimeDelta::seconds(age_secs),
        humidity: Some(48.0),
        temperature: Some(23.5),
        smoke_level: Some(1.0),
        smoke_status: false,
    }
}

fn mount(backend: &Arc<MockBackend>, scope: QueryScope, refetch: RefetchPolicy) -> SyncController {
    SyncController::mount_with_clock(
        Arc::clone(backend),
        scope,
        SyncConfig {
            refetch,
            ..SyncConfig::default()
        },
        Arc::new(FixedClock(now())),
    )
}

async fn wait_phase(rx: &mut watch::Receiver<SyncPhase>, phase: SyncPhase) {
    tokio::time::timeout(WAIT, rx.wait_for(|p| *p == phase))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for phase {phase}"))
        .unwrap();
}

async fn wait_state(
    rx: &mut watch::Receiver<ScreenState>,
    pred: impl FnMut(&ScreenState) -> bool,
) -> ScreenState {
    let state = tokio::time::timeout(WAIT, rx.wait_for(pred))
        .await
        .expect("timed out waiting for screen state")
        .unwrap();
    state.clone()
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !cond() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("timed out waiting for condition");
}

fn detail_name(state: &ScreenState) -> Option<String> {
    state
        .view()
        .and_then(|v| v.as_detail())
        .map(|d| d.device.device.name.clone())
}

fn fleet_names(state: &ScreenState) -> Vec<String> {
    state
        .view()
        .and_then(|v| v.as_fleet())
        .map(|f| f.devices.iter().map(|d| d.device.name.clone()).collect())
        .unwrap_or_default()
}

// ── Fleet scope ─────────────────────────────────────────────────────

#[tokio::test]
async fn fleet_load_subscribes_both_sets_and_publishes_view() {
    let backend = MockBackend::with_data(
        vec![device(1, "k1", "Warehouse"), device(2, "k2", "Cold Store")],
        vec![sample("k1", 60)],
    );
    let ctrl = mount(&backend, QueryScope::fleet(), RefetchPolicy::Independent);
    wait_phase(&mut ctrl.phase(), SyncPhase::Subscribed).await;

    let state = ctrl.current();
    let fleet = state.view().and_then(|v| v.as_fleet()).unwrap();
    assert_eq!(fleet.devices.len(), 2);
    assert!(fleet.devices[0].is_online);
    assert!(!fleet.devices[1].is_online);
    assert_eq!(fleet.markers[0].link, "/devices/1");
    assert_eq!(fleet.built_at, now());

    let subs: Vec<(RecordSet, ChangeFilter)> = backend
        .subscribed()
        .into_iter()
        .map(|(_, rs, f)| (rs, f))
        .collect();
    assert_eq!(
        subs,
        vec![
            (RecordSet::Devices, ChangeFilter::All),
            (RecordSet::Telemetry, ChangeFilter::All)
        ]
    );
    assert_eq!(MockBackend::calls(&backend.list_calls), 1);

    ctrl.teardown().await;
}

#[tokio::test]
async fn loading_is_visible_until_first_cycle_completes() {
    let backend = MockBackend::with_data(vec![device(1, "k1", "Warehouse")], vec![]);
    let gate = backend.gate();
    let ctrl = mount(&backend, QueryScope::fleet(), RefetchPolicy::Independent);

    wait_until(|| MockBackend::calls(&backend.list_calls) == 1).await;
    assert_eq!(ctrl.current(), ScreenState::Loading);
    assert_eq!(ctrl.current_phase(), SyncPhase::Loading);

    gate.send(()).unwrap();
    wait_phase(&mut ctrl.phase(), SyncPhase::Subscribed).await;
    assert_eq!(fleet_names(&ctrl.current()), vec!["Warehouse".to_string()]);

    ctrl.teardown().await;
}

#[tokio::test]
async fn change_notice_triggers_full_refetch() {
    let backend = MockBackend::with_data(
        vec![device(1, "k1", "Warehouse"), device(2, "k2", "Cold Store")],
        vec![sample("k1", 60)],
    );
    let ctrl = mount(&backend, QueryScope::fleet(), RefetchPolicy::Independent);
    wait_phase(&mut ctrl.phase(), SyncPhase::Subscribed).await;

    backend.samples.lock().unwrap().push(sample("k2", 5));
    backend.notify(RecordSet::Telemetry);

    let state = wait_state(&mut ctrl.state(), |s| {
        s.view()
            .and_then(|v| v.as_fleet())
            .is_some_and(|f| f.devices[1].is_online)
    })
    .await;
    let fleet = state.view().and_then(|v| v.as_fleet()).unwrap();
    assert!(fleet.devices[0].is_online);
    assert_eq!(MockBackend::calls(&backend.list_calls), 2);

    ctrl.teardown().await;
}

#[tokio::test]
async fn stale_cycle_never_overwrites_newer_view() {
    let backend = MockBackend::with_data(vec![device(1, "k1", "Alpha")], vec![]);
    let slow = backend.gate();
    let ctrl = mount(&backend, QueryScope::fleet(), RefetchPolicy::Independent);
    wait_until(|| MockBackend::calls(&backend.list_calls) == 1).await;

    // cycle 2 starts after the data changed and completes first
    backend.set_devices(vec![device(1, "k1", "Beta")]);
    backend.notify(RecordSet::Devices);
    wait_state(&mut ctrl.state(), |s| fleet_names(s) == ["Beta"]).await;
    assert_eq!(ctrl.current_phase(), SyncPhase::Loading);

    // cycle 1 finally returns the old snapshot
    slow.send(()).unwrap();
    wait_phase(&mut ctrl.phase(), SyncPhase::Subscribed).await;
    assert_eq!(fleet_names(&ctrl.current()), vec!["Beta".to_string()]);

    ctrl.teardown().await;
}

#[tokio::test]
async fn stale_failure_does_not_replace_newer_view() {
    let backend = MockBackend::with_data(vec![device(1, "k1", "Alpha")], vec![]);
    backend.fail_fetch.store(true, Ordering::SeqCst);
    let slow = backend.gate();
    let ctrl = mount(&backend, QueryScope::fleet(), RefetchPolicy::Independent);
    wait_until(|| MockBackend::calls(&backend.list_calls) == 1).await;

    backend.fail_fetch.store(false, Ordering::SeqCst);
    backend.notify(RecordSet::Devices);
    wait_state(&mut ctrl.state(), |s| fleet_names(s) == ["Alpha"]).await;

    slow.send(()).unwrap();
    wait_phase(&mut ctrl.phase(), SyncPhase::Subscribed).await;
    assert!(matches!(ctrl.current(), ScreenState::Ready(_)));

    ctrl.teardown().await;
}

#[tokio::test]
async fn teardown_during_fetch_applies_nothing_and_releases_both() {
    let backend = MockBackend::with_data(vec![device(1, "k1", "Warehouse")], vec![]);
    let _held = backend.gate();
    let ctrl = mount(&backend, QueryScope::fleet(), RefetchPolicy::Independent);
    wait_until(|| MockBackend::calls(&backend.list_calls) == 1).await;

    let state = ctrl.state();
    let phase = ctrl.phase();
    ctrl.teardown().await;

    assert_eq!(*state.borrow(), ScreenState::Loading);
    assert_eq!(*phase.borrow(), SyncPhase::Idle);

    let subscribed: Vec<SubscriptionId> = backend.subscribed().into_iter().map(|(id, _, _)| id).collect();
    assert_eq!(subscribed.len(), 2);
    assert_eq!(backend.unsubscribed(), subscribed);
}

#[tokio::test]
async fn dropping_the_controller_releases_subscriptions() {
    let backend = MockBackend::with_data(vec![device(1, "k1", "Warehouse")], vec![]);
    let ctrl = mount(&backend, QueryScope::fleet(), RefetchPolicy::Independent);
    wait_phase(&mut ctrl.phase(), SyncPhase::Subscribed).await;

    drop(ctrl);
    wait_until(|| backend.unsubscribed().len() == 2).await;
}

#[tokio::test]
async fn subscription_failure_degrades_but_keeps_data() {
    let backend = MockBackend::with_data(vec![device(1, "k1", "Warehouse")], vec![sample("k1", 10)]);
    backend.fail_subscribe.lock().unwrap().push(RecordSet::Telemetry);
    let ctrl = mount(&backend, QueryScope::fleet(), RefetchPolicy::Independent);

    wait_phase(&mut ctrl.phase(), SyncPhase::Degraded).await;
    assert_eq!(fleet_names(&ctrl.current()), vec!["Warehouse".to_string()]);
    assert_eq!(backend.subscribed().len(), 1);

    ctrl.teardown().await;
}

#[tokio::test]
async fn unanswered_subscriptions_do_not_hold_back_the_first_fetch() {
    let backend = MockBackend::with_data(vec![device(1, "k1", "Warehouse")], vec![sample("k1", 10)]);
    backend
        .hold_subscribe
        .lock()
        .unwrap()
        .extend([RecordSet::Devices, RecordSet::Telemetry]);
    let ctrl = mount(&backend, QueryScope::fleet(), RefetchPolicy::Independent);

    wait_phase(&mut ctrl.phase(), SyncPhase::Ready).await;
    assert_eq!(fleet_names(&ctrl.current()), vec!["Warehouse".to_string()]);
    assert_eq!(MockBackend::calls(&backend.list_calls), 1);
    assert!(backend.subscribed().is_empty());

    // teardown abandons the pending joins instead of waiting on them
    let phase = ctrl.phase();
    tokio::time::timeout(WAIT, ctrl.teardown()).await.unwrap();
    assert_eq!(*phase.borrow(), SyncPhase::Idle);
    assert!(backend.unsubscribed().is_empty());
}

#[tokio::test]
async fn closed_feeds_degrade_but_keep_data() {
    let backend = MockBackend::with_data(vec![device(1, "k1", "Warehouse")], vec![sample("k1", 10)]);
    let ctrl = mount(&backend, QueryScope::fleet(), RefetchPolicy::Independent);
    wait_phase(&mut ctrl.phase(), SyncPhase::Subscribed).await;

    // server side closes every channel
    backend.feeds.lock().unwrap().clear();

    wait_phase(&mut ctrl.phase(), SyncPhase::Degraded).await;
    assert_eq!(fleet_names(&ctrl.current()), vec!["Warehouse".to_string()]);
    assert_eq!(MockBackend::calls(&backend.list_calls), 1);

    ctrl.teardown().await;
    assert_eq!(backend.unsubscribed().len(), 2);
}

#[tokio::test]
async fn fetch_failure_is_published_and_next_notice_recovers() {
    let backend = MockBackend::with_data(vec![device(1, "k1", "Warehouse")], vec![]);
    backend.fail_fetch.store(true, Ordering::SeqCst);
    let ctrl = mount(&backend, QueryScope::fleet(), RefetchPolicy::Independent);

    wait_phase(&mut ctrl.phase(), SyncPhase::Failed).await;
    match ctrl.current() {
        ScreenState::Failed { message } => assert!(message.contains("backend unreachable")),
        other => panic!("expected Failed, got {other:?}"),
    }
    // no retry on its own
    assert_eq!(MockBackend::calls(&backend.list_calls), 1);

    backend.fail_fetch.store(false, Ordering::SeqCst);
    backend.notify(RecordSet::Devices);
    wait_phase(&mut ctrl.phase(), SyncPhase::Subscribed).await;
    assert_eq!(fleet_names(&ctrl.current()), vec!["Warehouse".to_string()]);

    ctrl.teardown().await;
}

#[tokio::test]
async fn coalesce_collapses_a_burst_into_one_follow_up() {
    let backend = MockBackend::with_data(vec![device(1, "k1", "Alpha")], vec![]);
    let first = backend.gate();
    let ctrl = mount(&backend, QueryScope::fleet(), RefetchPolicy::Coalesce);
    wait_until(|| MockBackend::calls(&backend.list_calls) == 1).await;

    backend.set_devices(vec![device(1, "k1", "Beta")]);
    backend.notify(RecordSet::Devices);
    backend.notify(RecordSet::Telemetry);
    backend.notify(RecordSet::Devices);
    first.send(()).unwrap();

    wait_until(|| MockBackend::calls(&backend.list_calls) == 2).await;
    wait_phase(&mut ctrl.phase(), SyncPhase::Subscribed).await;
    assert_eq!(fleet_names(&ctrl.current()), vec!["Beta".to_string()]);
    assert_eq!(MockBackend::calls(&backend.list_calls), 2);

    ctrl.teardown().await;
}

// ── Device scope ────────────────────────────────────────────────────

#[tokio::test]
async fn detail_not_found_skips_telemetry_lookup() {
    let backend = MockBackend::with_data(vec![device(1, "k1", "Warehouse")], vec![sample("k1", 10)]);
    let ctrl = mount(&backend, QueryScope::device(99_i64), RefetchPolicy::Independent);
    wait_phase(&mut ctrl.phase(), SyncPhase::Subscribed).await;

    assert_eq!(
        ctrl.current(),
        ScreenState::NotFound {
            id: DeviceId::Numeric(99)
        }
    );
    assert_eq!(MockBackend::calls(&backend.latest_calls), 0);

    let subs = backend.subscribed();
    assert_eq!(subs.len(), 1);
    assert_eq!(subs[0].1, RecordSet::Devices);
    assert_eq!(subs[0].2, ChangeFilter::DeviceId(DeviceId::Numeric(99)));

    ctrl.teardown().await;
}

#[tokio::test]
async fn detail_subscribes_telemetry_by_device_key() {
    let backend = MockBackend::with_data(
        vec![device(7, "k7", "Dock 7")],
        vec![sample("k7", 900), sample("k7", 30)],
    );
    let ctrl = mount(&backend, QueryScope::device(7_i64), RefetchPolicy::Independent);
    wait_phase(&mut ctrl.phase(), SyncPhase::Subscribed).await;

    let state = ctrl.current();
    let detail = state.view().and_then(|v| v.as_detail()).unwrap();
    assert!(detail.device.is_online);
    assert_eq!(detail.latest.as_ref().map(|s| s.created_at), Some(now() - TimeDelta::seconds(30)));
    assert_eq!(detail.marker.link, "/dashboard/devices/7");

    let filters: Vec<ChangeFilter> = backend.subscribed().into_iter().map(|(_, _, f)| f).collect();
    assert_eq!(
        filters,
        vec![
            ChangeFilter::DeviceId(DeviceId::Numeric(7)),
            ChangeFilter::DeviceKey(DeviceKey::new("k7"))
        ]
    );

    ctrl.teardown().await;
}

#[tokio::test]
async fn detail_without_samples_is_offline_not_failed() {
    let backend = MockBackend::with_data(vec![device(7, "k7", "Dock 7")], vec![]);
    let ctrl = mount(&backend, QueryScope::device(7_i64), RefetchPolicy::Independent);
    wait_phase(&mut ctrl.phase(), SyncPhase::Subscribed).await;

    let state = ctrl.current();
    let detail = state.view().and_then(|v| v.as_detail()).unwrap();
    assert!(!detail.device.is_online);
    assert!(detail.latest.is_none());

    ctrl.teardown().await;
}

#[tokio::test]
async fn pending_telemetry_join_does_not_stall_refetches() {
    let backend = MockBackend::with_data(vec![device(7, "k7", "Dock 7")], vec![]);
    backend.hold_subscribe.lock().unwrap().push(RecordSet::Telemetry);
    let ctrl = mount(&backend, QueryScope::device(7_i64), RefetchPolicy::Independent);
    wait_phase(&mut ctrl.phase(), SyncPhase::Ready).await;

    let subs = backend.subscribed();
    assert_eq!(subs.len(), 1);
    assert_eq!(subs[0].1, RecordSet::Devices);

    backend.set_devices(vec![device(7, "k7", "Dock 7 North")]);
    backend.notify(RecordSet::Devices);

    wait_state(&mut ctrl.state(), |s| detail_name(s).as_deref() == Some("Dock 7 North")).await;
    assert_eq!(MockBackend::calls(&backend.get_calls), 2);
    wait_phase(&mut ctrl.phase(), SyncPhase::Ready).await;

    let devices_sub = subs[0].0.clone();
    ctrl.teardown().await;
    assert_eq!(backend.unsubscribed(), vec![devices_sub]);
}

#[tokio::test]
async fn detail_key_change_resubscribes_and_refetches() {
    let backend = MockBackend::with_data(vec![device(7, "k7", "Dock 7")], vec![]);
    let ctrl = mount(&backend, QueryScope::device(7_i64), RefetchPolicy::Independent);
    wait_phase(&mut ctrl.phase(), SyncPhase::Subscribed).await;
    let old_telemetry = backend.subscribed()[1].0.clone();

    backend.set_devices(vec![device(7, "k7-replacement", "Dock 7")]);
    backend.notify(RecordSet::Devices);

    // the notice cycle plus one follow-up after re-subscribing
    wait_until(|| MockBackend::calls(&backend.get_calls) == 3).await;
    wait_phase(&mut ctrl.phase(), SyncPhase::Subscribed).await;

    let subs = backend.subscribed();
    assert_eq!(subs.len(), 3);
    assert_eq!(subs[2].2, ChangeFilter::DeviceKey(DeviceKey::new("k7-replacement")));
    assert_eq!(backend.unsubscribed(), vec![old_telemetry]);

    ctrl.teardown().await;
}
