// =============================================================================
// Live State Store — session-wide cache of merged entities and connectivity
// =============================================================================
//
// The single source of truth for everything the live views render. One store
// exists per console session: it is created at session start, handed around
// as `Arc<LiveStateStore>`, and disposed at logout.
//
// Write access is crate-private. Entity writes come from `EntityMerger`,
// connectivity writes from the channel sockets. Consumers only read clones or
// subscribe for change notifications.
//
// Thread safety:
//   - parking_lot::RwLock per collection; a write holds the lock for the whole
//     mutation so a merge is never observed half-applied.
//   - Listeners are invoked after the lock is released, so a listener may read
//     the store freely.
// =============================================================================

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::live::events::OrderEvent;
use crate::live::records::{PositionRecord, WatchlistRecord};
use crate::types::{ChannelName, ConnectivityFlags};

/// What part of the store changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StoreChange {
    Positions,
    Watchlist,
    OrderUpdate,
    Connectivity,
    Disposed,
}

/// Handle returned by [`LiveStateStore::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Arc<dyn Fn(StoreChange) + Send + Sync>;

/// Serialisable view of the whole store, pushed to the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct LiveSnapshot {
    pub session_id: Uuid,
    pub version: u64,
    pub connectivity: ConnectivityFlags,
    pub positions: Vec<PositionRecord>,
    pub watchlist: Vec<WatchlistRecord>,
    pub latest_order_update: Option<OrderEvent>,
    pub server_time: i64,
}

pub struct LiveStateStore {
    session_id: Uuid,
    /// Incremented on every applied write.
    version: AtomicU64,
    disposed: AtomicBool,

    connectivity: RwLock<ConnectivityFlags>,
    positions: RwLock<Vec<PositionRecord>>,
    watchlist: RwLock<Vec<WatchlistRecord>>,
    latest_order: RwLock<Option<OrderEvent>>,

    listeners: Mutex<Vec<(SubscriptionId, Listener)>>,
    next_subscription: AtomicU64,
}

impl LiveStateStore {
    pub fn new() -> Self {
        let session_id = Uuid::new_v4();
        info!(session_id = %session_id, "live state store created");
        Self {
            session_id,
            version: AtomicU64::new(0),
            disposed: AtomicBool::new(false),
            connectivity: RwLock::new(ConnectivityFlags::default()),
            positions: RwLock::new(Vec::new()),
            watchlist: RwLock::new(Vec::new()),
            latest_order: RwLock::new(None),
            listeners: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
        }
    }

    // ── Read accessors ──────────────────────────────────────────────────

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub fn connectivity(&self) -> ConnectivityFlags {
        *self.connectivity.read()
    }

    pub fn positions(&self) -> Vec<PositionRecord> {
        self.positions.read().clone()
    }

    pub fn watchlist(&self) -> Vec<WatchlistRecord> {
        self.watchlist.read().clone()
    }

    pub fn latest_order_update(&self) -> Option<OrderEvent> {
        self.latest_order.read().clone()
    }

    pub fn position(&self, instrument: &str) -> Option<PositionRecord> {
        self.positions
            .read()
            .iter()
            .find(|p| p.instrument == instrument)
            .cloned()
    }

    /// Build a consistent-enough snapshot for the dashboard. Each collection
    /// is read under its own lock.
    pub fn snapshot(&self) -> LiveSnapshot {
        LiveSnapshot {
            session_id: self.session_id,
            version: self.version(),
            connectivity: self.connectivity(),
            positions: self.positions(),
            watchlist: self.watchlist(),
            latest_order_update: self.latest_order_update(),
            server_time: Utc::now().timestamp_millis(),
        }
    }

    // ── Subscriptions ───────────────────────────────────────────────────

    /// Register `listener`; it is called synchronously after every write.
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(StoreChange) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, Arc::new(listener)));
        debug!(subscription = id.0, "store subscriber added");
        id
    }

    /// Remove a listener. Returns `false` if `id` was unknown.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(sid, _)| *sid != id);
        listeners.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.listeners.lock().len()
    }

    // ── Writes (crate-private) ──────────────────────────────────────────

    /// Mutate the position collection. `f` returns whether anything changed;
    /// only then is the version bumped and listeners notified.
    pub(crate) fn write_positions<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut Vec<PositionRecord>) -> bool,
    {
        let changed = self.write_live(&self.positions, f);
        if changed {
            self.commit(StoreChange::Positions);
        }
        changed
    }

    pub(crate) fn write_watchlist<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut Vec<WatchlistRecord>) -> bool,
    {
        let changed = self.write_live(&self.watchlist, f);
        if changed {
            self.commit(StoreChange::Watchlist);
        }
        changed
    }

    pub(crate) fn set_latest_order(&self, event: OrderEvent) {
        let stored = self.write_live(&self.latest_order, |slot| {
            *slot = Some(event);
            true
        });
        if stored {
            self.commit(StoreChange::OrderUpdate);
        }
    }

    pub(crate) fn set_connected(&self, channel: ChannelName, connected: bool) {
        let changed = self.write_live(&self.connectivity, |flags| {
            let was = flags.get(channel);
            flags.set(channel, connected);
            was != connected
        });
        if changed {
            self.commit(StoreChange::Connectivity);
        }
    }

    /// End of session: drop every entity, clear flags and subscribers.
    /// Subscribers get a final `Disposed` notification.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.positions.write().clear();
        self.watchlist.write().clear();
        *self.latest_order.write() = None;
        *self.connectivity.write() = ConnectivityFlags::default();
        self.version.fetch_add(1, Ordering::SeqCst);

        let listeners = std::mem::take(&mut *self.listeners.lock());
        for (_, listener) in &listeners {
            listener(StoreChange::Disposed);
        }
        info!(session_id = %self.session_id, "live state store disposed");
    }

    /// Run `f` under the write guard unless the store is disposed. The flag
    /// is checked with the guard held; `dispose` sets it before clearing, so
    /// a write either lands before the clear or is refused.
    fn write_live<T, F>(&self, lock: &RwLock<T>, f: F) -> bool
    where
        F: FnOnce(&mut T) -> bool,
    {
        let mut guard = lock.write();
        if self.is_disposed() {
            return false;
        }
        f(&mut *guard)
    }

    fn commit(&self, change: StoreChange) {
        if self.is_disposed() {
            return;
        }
        self.version.fetch_add(1, Ordering::SeqCst);
        // Clone the listener list so callbacks run without the lock held.
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        for listener in listeners {
            listener(change);
        }
    }
}

impl Default for LiveStateStore {
    fn default() -> Self {
        Self::new()
    }
}
