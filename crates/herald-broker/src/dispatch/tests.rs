//! Tests for the dispatcher's per-page algorithm.

use super::*;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;

use crate::protocol::Delivery;
use crate::targets::TargetChannel;
use crate::wakelock::{PowerManager, Timer, TimerHandle, WakeLock};

/// Denies any page whose URL is on the list.
struct DenyList(Vec<String>);

impl PermissionChecker for DenyList {
    fn is_permitted(&self, _msg_type: &str, page: &PageAddress) -> bool {
        !self.0.contains(&page.page_url)
    }
}

#[derive(Clone, Default)]
struct RecordingOpener(Arc<Mutex<Vec<OpenRequest>>>);

impl AppOpener for RecordingOpener {
    fn open(&self, request: OpenRequest) {
        self.0.lock().unwrap().push(request);
    }
}

impl RecordingOpener {
    fn requests(&self) -> Vec<OpenRequest> {
        self.0.lock().unwrap().clone()
    }
}

#[derive(Clone, Default)]
struct MockPower {
    released: Arc<AtomicU32>,
}

struct MockLock {
    released: Arc<AtomicU32>,
}

impl WakeLock for MockLock {
    fn unlock(self: Box<Self>) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

impl PowerManager for MockPower {
    fn new_cpu_wake_lock(&self) -> Box<dyn WakeLock> {
        Box::new(MockLock {
            released: self.released.clone(),
        })
    }
}

/// Timer that never fires; dispatch tests don't exercise expiry.
struct IdleTimer;

impl Timer for IdleTimer {
    fn schedule(&self, _after: Duration, _callback: Box<dyn FnOnce() + Send>) -> TimerHandle {
        TimerHandle::new(|| {})
    }
}

struct Fixture {
    registry: PageRegistry,
    targets: TargetDirectory,
    locks: WakeLockArbiter,
    dispatcher: Dispatcher,
    opener: RecordingOpener,
}

fn fixture_with(denied: Vec<String>, policies: HashMap<String, MessageTypePolicy>) -> Fixture {
    let opener = RecordingOpener::default();
    let (expired_tx, _expired_rx) = mpsc::unbounded_channel();
    Fixture {
        registry: PageRegistry::new(5),
        targets: TargetDirectory::new(),
        locks: WakeLockArbiter::new(
            Arc::new(MockPower::default()),
            Arc::new(IdleTimer),
            Duration::from_secs(30),
            expired_tx,
        ),
        dispatcher: Dispatcher::new(Arc::new(DenyList(denied)), Arc::new(opener.clone()), policies),
        opener,
    }
}

fn fixture() -> Fixture {
    fixture_with(Vec::new(), HashMap::new())
}

fn page() -> PageAddress {
    PageAddress::new("/app.html", "https://x/manifest.json")
}

fn reg_key() -> RegistrationKey {
    RegistrationKey::new("push", page())
}

fn lock_key() -> WakeLockKey {
    WakeLockKey::compute("push", &page())
}

fn live_target(fx: &mut Fixture, p: &PageAddress) -> mpsc::UnboundedReceiver<Delivery> {
    let (tx, rx) = mpsc::unbounded_channel();
    let chan = TargetChannel::new(tx);
    fx.targets.register_target(p, &chan);
    rx
}

fn send(fx: &mut Fixture, msg_type: &str, p: &PageAddress) -> SendOutcome {
    fx.dispatcher.send_message(
        &mut fx.registry,
        &fx.targets,
        &mut fx.locks,
        msg_type,
        &json!({"n": 1}),
        p,
        &json!({}),
    )
}

#[test]
fn denied_send_has_no_side_effects() {
    let mut fx = fixture_with(vec!["/app.html".into()], HashMap::new());
    fx.registry.register("push", &page());

    let outcome = send(&mut fx, "push", &page());

    assert_eq!(outcome, SendOutcome::PermissionDenied);
    assert_eq!(fx.locks.lease_count(), 0);
    assert!(!fx.registry.has_pending(&reg_key()));
    assert!(fx.opener.requests().is_empty());
}

#[test]
fn no_live_target_queues_locks_and_opens() {
    let mut fx = fixture();
    fx.registry.register("push", &page());

    let outcome = send(&mut fx, "push", &page());

    assert_eq!(outcome, SendOutcome::AppNotRunning);
    assert_eq!(fx.registry.find(&reg_key()).unwrap().pending_len(), 1);
    assert_eq!(fx.locks.refcount(&lock_key()), 1);

    let opens = fx.opener.requests();
    assert_eq!(opens.len(), 1);
    assert!(!opens[0].only_show_app);
    assert!(!opens[0].show_app);
    assert!(opens[0].target.is_none());
    assert_eq!(opens[0].msg_type, "push");
}

#[test]
fn live_delivery_carries_the_queued_message_id() {
    let mut fx = fixture();
    fx.registry.register("push", &page());
    let mut rx = live_target(&mut fx, &page());

    let outcome = send(&mut fx, "push", &page());
    assert_eq!(outcome, SendOutcome::Success);

    let delivery = rx.try_recv().unwrap();
    assert_eq!(delivery.payload["n"], 1);

    // Acking with the delivered ID clears the queued entry.
    assert!(fx.registry.has_pending(&reg_key()));
    fx.registry.ack(&reg_key(), &delivery.message_id);
    assert!(!fx.registry.has_pending(&reg_key()));
}

#[test]
fn live_delivery_reaches_every_target() {
    let mut fx = fixture();
    fx.registry.register("push", &page());
    let mut rx_a = live_target(&mut fx, &page());
    let mut rx_b = live_target(&mut fx, &page());

    send(&mut fx, "push", &page());

    let a = rx_a.try_recv().unwrap();
    let b = rx_b.try_recv().unwrap();
    assert_eq!(a.message_id, b.message_id);
}

#[test]
fn success_without_policy_requests_no_open() {
    let mut fx = fixture();
    fx.registry.register("push", &page());
    let _rx = live_target(&mut fx, &page());

    let outcome = send(&mut fx, "push", &page());

    assert_eq!(outcome, SendOutcome::Success);
    assert!(fx.opener.requests().is_empty());
}

#[test]
fn must_show_policy_surfaces_the_app_even_on_live_delivery() {
    let mut policies = HashMap::new();
    policies.insert(
        "push".to_string(),
        MessageTypePolicy {
            must_always_show: true,
        },
    );
    let mut fx = fixture_with(Vec::new(), policies);
    fx.registry.register("push", &page());
    let (tx, _rx) = mpsc::unbounded_channel();
    let chan = TargetChannel::new(tx);
    fx.targets.register_target(&page(), &chan);

    let outcome = send(&mut fx, "push", &page());

    assert_eq!(outcome, SendOutcome::Success);
    let opens = fx.opener.requests();
    assert_eq!(opens.len(), 1);
    assert!(opens[0].show_app);
    assert!(opens[0].only_show_app);
    assert_eq!(opens[0].target, Some(chan.id()));
}

#[test]
fn unregistered_page_locks_but_never_queues_or_opens() {
    let mut fx = fixture();

    let outcome = send(&mut fx, "push", &page());

    assert_eq!(outcome, SendOutcome::AppNotRunning);
    assert_eq!(fx.locks.refcount(&lock_key()), 1);
    assert!(fx.registry.is_empty());
    assert!(fx.opener.requests().is_empty());
}

#[test]
fn unregistered_page_still_gets_live_delivery() {
    let mut fx = fixture();
    let mut rx = live_target(&mut fx, &page());

    let outcome = send(&mut fx, "push", &page());

    assert_eq!(outcome, SendOutcome::Success);
    assert!(rx.try_recv().is_ok());
    assert!(fx.registry.is_empty());
    assert!(fx.opener.requests().is_empty());
}

#[test]
fn broadcast_pages_are_independent() {
    let denied_page = PageAddress::new("/denied.html", "https://x/manifest.json");
    let queued_page = PageAddress::new("/queued.html", "https://y/manifest.json");
    let mut fx = fixture_with(vec!["/denied.html".into()], HashMap::new());
    fx.registry.register("push", &denied_page);
    fx.registry.register("push", &queued_page);

    let outcomes = fx.dispatcher.broadcast_message(
        &mut fx.registry,
        &fx.targets,
        &mut fx.locks,
        "push",
        &json!({}),
        &json!({}),
    );

    assert_eq!(outcomes.len(), 2);
    let outcome_for = |url: &str| {
        outcomes
            .iter()
            .find(|(p, _)| p.page_url == url)
            .map(|(_, o)| *o)
            .unwrap()
    };
    assert_eq!(outcome_for("/denied.html"), SendOutcome::PermissionDenied);
    assert_eq!(outcome_for("/queued.html"), SendOutcome::AppNotRunning);

    // The denial left no trace; the grant queued normally.
    assert!(!fx
        .registry
        .has_pending(&RegistrationKey::new("push", denied_page)));
    assert!(fx
        .registry
        .has_pending(&RegistrationKey::new("push", queued_page)));
}

#[test]
fn broadcast_mixes_live_and_not_running() {
    let live_page = PageAddress::new("/live.html", "https://x/manifest.json");
    let cold_page = PageAddress::new("/cold.html", "https://y/manifest.json");
    let mut fx = fixture();
    fx.registry.register("push", &live_page);
    fx.registry.register("push", &cold_page);
    let mut rx = live_target(&mut fx, &live_page);

    let outcomes = fx.dispatcher.broadcast_message(
        &mut fx.registry,
        &fx.targets,
        &mut fx.locks,
        "push",
        &json!({}),
        &json!({}),
    );

    let outcome_for = |url: &str| {
        outcomes
            .iter()
            .find(|(p, _)| p.page_url == url)
            .map(|(_, o)| *o)
            .unwrap()
    };
    assert_eq!(outcome_for("/live.html"), SendOutcome::Success);
    assert_eq!(outcome_for("/cold.html"), SendOutcome::AppNotRunning);
    assert!(rx.try_recv().is_ok());

    // Independent wake-lock leases per page.
    assert_eq!(fx.locks.lease_count(), 2);
}

#[test]
fn broadcast_outcomes_distinguish_manifests_sharing_a_page_url() {
    // Two apps can both register "/index.html"; only the full address tells
    // their outcomes apart.
    let page_a = PageAddress::new("/index.html", "https://a/manifest.json");
    let page_b = PageAddress::new("/index.html", "https://b/manifest.json");
    let mut fx = fixture();
    fx.registry.register("push", &page_a);
    fx.registry.register("push", &page_b);
    let mut rx = live_target(&mut fx, &page_a);

    let outcomes = fx.dispatcher.broadcast_message(
        &mut fx.registry,
        &fx.targets,
        &mut fx.locks,
        "push",
        &json!({}),
        &json!({}),
    );

    assert_eq!(outcomes.len(), 2);
    let outcome_for = |p: &PageAddress| {
        outcomes
            .iter()
            .find(|(addr, _)| addr == p)
            .map(|(_, o)| *o)
            .unwrap()
    };
    assert_eq!(outcome_for(&page_a), SendOutcome::Success);
    assert_eq!(outcome_for(&page_b), SendOutcome::AppNotRunning);
    assert!(rx.try_recv().is_ok());
}

#[test]
fn broadcast_with_no_registrations_does_nothing() {
    let mut fx = fixture();
    let outcomes = fx.dispatcher.broadcast_message(
        &mut fx.registry,
        &fx.targets,
        &mut fx.locks,
        "push",
        &json!({}),
        &json!({}),
    );
    assert!(outcomes.is_empty());
    assert_eq!(fx.locks.lease_count(), 0);
}
