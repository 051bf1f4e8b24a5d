//! CPU wake-lock arbitration.
//!
//! The broker holds one refcounted lease per (message type, manifest, page)
//! so that a page receiving messages is guaranteed execution time before the
//! device suspends. Each lease carries a single-shot watchdog: a page that
//! never reports completion gets its lease force-released instead of pinning
//! the lock forever. Expiry re-enters through the broker's command stream so
//! arbiter state is only ever touched on the broker task.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use herald_common::PageAddress;
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Dedup key for one wake-lock lease: hex SHA-256 over the three
/// length-prefixed strings. Deterministic and stable within a run; the exact
/// algorithm is not load-bearing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WakeLockKey(String);

impl WakeLockKey {
    pub fn compute(msg_type: &str, page: &PageAddress) -> Self {
        let mut hasher = Sha256::new();
        for part in [msg_type, &page.manifest_url, &page.page_url] {
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
        let digest = hasher.finalize();
        Self(digest.iter().map(|b| format!("{b:02x}")).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// An OS-level lock preventing CPU suspend. Consumed by the single unlock.
pub trait WakeLock: Send {
    fn unlock(self: Box<Self>);
}

pub trait PowerManager: Send + Sync {
    fn new_cpu_wake_lock(&self) -> Box<dyn WakeLock>;
}

/// Cancellation handle for a scheduled timer callback.
pub struct TimerHandle(Option<Box<dyn FnOnce() + Send>>);

impl TimerHandle {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self(Some(Box::new(cancel)))
    }

    pub fn cancel(mut self) {
        if let Some(cancel) = self.0.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("TimerHandle").finish()
    }
}

/// Single-shot timer facility.
pub trait Timer: Send + Sync {
    fn schedule(&self, after: Duration, callback: Box<dyn FnOnce() + Send>) -> TimerHandle;
}

/// Timer backed by a spawned tokio sleep; cancel aborts the task.
pub struct TokioTimer;

impl Timer for TokioTimer {
    fn schedule(&self, after: Duration, callback: Box<dyn FnOnce() + Send>) -> TimerHandle {
        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            callback();
        });
        TimerHandle::new(move || task.abort())
    }
}

struct Lease {
    refcount: u32,
    lock: Box<dyn WakeLock>,
    watchdog: TimerHandle,
    /// Generation of the currently armed watchdog. An expiry tagged with an
    /// older generation raced a reset and must be ignored.
    generation: u64,
}

/// Refcounted wake-lock leases with per-lease watchdogs.
///
/// A lease exists exactly while its refcount is positive; the underlying OS
/// lock is held for the lease's whole lifetime and released exactly once.
pub struct WakeLockArbiter {
    leases: HashMap<WakeLockKey, Lease>,
    power: Arc<dyn PowerManager>,
    timer: Arc<dyn Timer>,
    timeout: Duration,
    expired_tx: mpsc::UnboundedSender<(WakeLockKey, u64)>,
    next_generation: u64,
}

impl WakeLockArbiter {
    pub fn new(
        power: Arc<dyn PowerManager>,
        timer: Arc<dyn Timer>,
        timeout: Duration,
        expired_tx: mpsc::UnboundedSender<(WakeLockKey, u64)>,
    ) -> Self {
        Self {
            leases: HashMap::new(),
            power,
            timer,
            timeout,
            expired_tx,
            next_generation: 0,
        }
    }

    /// Take one reference on the lease for `key`, creating it (and acquiring
    /// the real lock) on first use. A repeat acquire resets the watchdog to
    /// the full timeout — it extends, it does not stack.
    pub fn acquire(&mut self, key: &WakeLockKey) {
        let generation = self.next_generation;
        self.next_generation += 1;
        let watchdog = self.schedule_watchdog(key, generation);
        match self.leases.get_mut(key) {
            Some(lease) => {
                lease.refcount += 1;
                lease.generation = generation;
                let old = std::mem::replace(&mut lease.watchdog, watchdog);
                old.cancel();
                debug!(key = key.as_str(), refcount = lease.refcount, "wake lock re-acquired");
            }
            None => {
                self.leases.insert(
                    key.clone(),
                    Lease {
                        refcount: 1,
                        lock: self.power.new_cpu_wake_lock(),
                        watchdog,
                        generation,
                    },
                );
                debug!(key = key.as_str(), "wake lock acquired");
            }
        }
    }

    /// Drop `count` references. At zero the OS lock is released, the watchdog
    /// cancelled and the lease removed.
    pub fn release(&mut self, key: &WakeLockKey, count: u32) {
        let Some(lease) = self.leases.get_mut(key) else {
            debug!(key = key.as_str(), "release for unknown lease, ignoring");
            return;
        };
        if lease.refcount > count {
            lease.refcount -= count;
            debug!(key = key.as_str(), refcount = lease.refcount, "wake lock released");
            return;
        }
        let lease = self.leases.remove(key).unwrap();
        lease.watchdog.cancel();
        lease.lock.unlock();
        debug!(key = key.as_str(), "wake lock fully released");
    }

    /// Watchdog expiry: force-release the whole lease regardless of the
    /// outstanding count. A page that never finishes handling its messages
    /// must not block device sleep; this is a lossy safety valve, not an
    /// error. No-op if the lease was already released explicitly, or if the
    /// expiry raced a watchdog reset: an expiry only acts on the lease
    /// generation it was armed for.
    pub fn handle_expiry(&mut self, key: &WakeLockKey, generation: u64) {
        match self.leases.get(key) {
            Some(lease) if lease.generation == generation => {}
            Some(_) => {
                debug!(key = key.as_str(), generation, "stale watchdog expiry, ignoring");
                return;
            }
            None => return,
        }
        let lease = self.leases.remove(key).unwrap();
        warn!(
            key = key.as_str(),
            refcount = lease.refcount,
            "wake lock watchdog expired, force-releasing"
        );
        lease.watchdog.cancel();
        lease.lock.unlock();
    }

    pub fn refcount(&self, key: &WakeLockKey) -> u32 {
        self.leases.get(key).map(|l| l.refcount).unwrap_or(0)
    }

    pub fn lease_count(&self) -> usize {
        self.leases.len()
    }

    fn schedule_watchdog(&self, key: &WakeLockKey, generation: u64) -> TimerHandle {
        let tx = self.expired_tx.clone();
        let key = key.clone();
        self.timer.schedule(
            self.timeout,
            Box::new(move || {
                // Broker may already be gone on shutdown.
                let _ = tx.send((key, generation));
            }),
        )
    }
}
