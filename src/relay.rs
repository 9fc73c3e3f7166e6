//! Live subscription relay.
//!
//! A [`Subscription`] is a standing query over one tenant collection. Its watcher task
//! re-reads the query whenever the in-process [`ChangeHub`] reports a write to that
//! collection, and on a fixed poll interval so writes made by other processes sharing the
//! database are picked up too. Observers always receive the full ordered result set; a
//! re-read identical to the last delivered snapshot is not delivered again.
//!
//! Dropping (or disposing) the subscription cancels the watcher and detaches the observer.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, TryLockError};
use std::time::Duration;

use metrics::{counter, gauge};
use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

use crate::models::{CollectionPath, Record};
use crate::store::{Snapshot, SnapshotQuery, StoreResult, TenantStore};

static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);
static ACTIVE_SUBSCRIPTIONS: AtomicUsize = AtomicUsize::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

/// Published by the writer after a write to a collection has been committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNotice {
    pub kind: ChangeKind,
    pub record_id: String,
}

/// Per-collection broadcast of change notices within one process.
#[derive(Clone)]
pub struct ChangeHub {
    channels: Arc<Mutex<HashMap<CollectionPath, broadcast::Sender<ChangeNotice>>>>,
    capacity: usize,
}

impl ChangeHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::new(Mutex::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    pub fn watch(&self, path: &CollectionPath) -> broadcast::Receiver<ChangeNotice> {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        channels
            .entry(path.clone())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Returns how many watchers were notified. Channels without watchers are dropped.
    pub fn publish(&self, path: &CollectionPath, notice: ChangeNotice) -> usize {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = channels.get(path) else {
            return 0;
        };
        match sender.send(notice) {
            Ok(receivers) => receivers,
            Err(_) => {
                channels.remove(path);
                0
            }
        }
    }

    /// Drops the channel for `path` once no watcher holds a receiver for it.
    pub fn release(&self, path: &CollectionPath) {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        if channels
            .get(path)
            .is_some_and(|sender| sender.receiver_count() == 0)
        {
            channels.remove(path);
        }
    }

    pub fn is_watched(&self, path: &CollectionPath) -> bool {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(path)
    }
}

impl fmt::Debug for ChangeHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeHub")
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

type Observer = Box<dyn FnMut(Snapshot) + Send + 'static>;
type SharedObserver = Arc<Mutex<Option<Observer>>>;

#[derive(Clone)]
pub struct LiveRelay {
    store: Arc<dyn TenantStore>,
    hub: ChangeHub,
    poll_interval: Duration,
    shutdown: CancellationToken,
}

impl LiveRelay {
    pub fn new(store: Arc<dyn TenantStore>, hub: ChangeHub, poll_interval: Duration) -> Self {
        Self {
            store,
            hub,
            poll_interval,
            shutdown: CancellationToken::new(),
        }
    }

    /// Ends every subscription of this relay when `shutdown` is cancelled.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// One-off read with the same semantics as a subscription's snapshots.
    pub async fn snapshot(
        &self,
        path: &CollectionPath,
        query: &SnapshotQuery,
    ) -> StoreResult<Snapshot> {
        let records = self.store.query(path, query).await?;
        Ok(Snapshot {
            collection: path.collection(),
            records,
        })
    }

    /// Starts observing `path`. The observer is called with the initial snapshot and then
    /// with every changed snapshot until the returned handle is disposed or dropped.
    pub fn subscribe<F>(&self, path: CollectionPath, query: SnapshotQuery, observer: F) -> Subscription
    where
        F: FnMut(Snapshot) + Send + 'static,
    {
        let id = NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed);
        let token = self.shutdown.child_token();
        let observer: SharedObserver = Arc::new(Mutex::new(Some(Box::new(observer))));

        // Registered before the first read so no committed write can slip between them.
        let changes = self.hub.watch(&path);
        let watcher = Watcher {
            id,
            store: Arc::clone(&self.store),
            hub: self.hub.clone(),
            path: path.clone(),
            query,
            poll_interval: self.poll_interval,
            observer: Arc::clone(&observer),
            token: token.clone(),
        };
        tokio::spawn(watcher.run(changes));

        let active = ACTIVE_SUBSCRIPTIONS.fetch_add(1, Ordering::Relaxed) + 1;
        gauge!("relay_active_subscriptions").set(active as f64);
        debug!(subscription_id = id, path = %path, "Subscription started");

        Subscription {
            id,
            path,
            token,
            observer,
        }
    }

    /// Subscription whose snapshots are forwarded to a channel.
    pub fn subscribe_channel(
        &self,
        path: CollectionPath,
        query: SnapshotQuery,
    ) -> (Subscription, mpsc::UnboundedReceiver<Snapshot>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.subscribe(path, query, move |snapshot| {
            let _ = tx.send(snapshot);
        });
        (subscription, rx)
    }
}

impl fmt::Debug for LiveRelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveRelay")
            .field("backend", &self.store.backend_name())
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

/// Handle of a live subscription. Dropping it stops delivery.
pub struct Subscription {
    id: u64,
    path: CollectionPath,
    token: CancellationToken,
    observer: SharedObserver,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &CollectionPath {
        &self.path
    }

    pub fn is_active(&self) -> bool {
        !self.token.is_cancelled()
    }

    /// Stops delivery. No observer call starts after this returns. Safe to call from
    /// inside the observer itself.
    pub fn dispose(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.token.cancel();
        // A held lock means a delivery is running, possibly the one dropping us. The
        // watcher sees the cancelled token and detaches the observer once it returns.
        match self.observer.try_lock() {
            Ok(mut observer) => {
                observer.take();
            }
            Err(TryLockError::Poisoned(poisoned)) => {
                poisoned.into_inner().take();
            }
            Err(TryLockError::WouldBlock) => {}
        }
        if let Ok(previous) =
            ACTIVE_SUBSCRIPTIONS.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                v.checked_sub(1)
            })
        {
            gauge!("relay_active_subscriptions").set(previous.saturating_sub(1) as f64);
        }
        debug!(subscription_id = self.id, path = %self.path, "Subscription disposed");
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("path", &self.path.to_string())
            .field("active", &self.is_active())
            .finish()
    }
}

struct Watcher {
    id: u64,
    store: Arc<dyn TenantStore>,
    hub: ChangeHub,
    path: CollectionPath,
    query: SnapshotQuery,
    poll_interval: Duration,
    observer: SharedObserver,
    token: CancellationToken,
}

impl Watcher {
    #[instrument(name = "relay_watch", skip_all, fields(subscription_id = self.id, path = %self.path))]
    async fn run(self, changes: broadcast::Receiver<ChangeNotice>) {
        let mut changes = Some(changes);
        let mut last_delivered: Option<Vec<Record>> = None;
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            if self.token.is_cancelled() {
                break;
            }

            match self.store.query(&self.path, &self.query).await {
                Ok(records) => {
                    if last_delivered.as_ref() != Some(&records) {
                        if !self.deliver(records.clone()) {
                            break;
                        }
                        last_delivered = Some(records);
                    }
                }
                Err(err) => {
                    warn!(error = %err, "Snapshot query failed, retrying on next wake-up");
                }
            }

            tokio::select! {
                _ = self.token.cancelled() => break,
                notice = next_change(&mut changes) => {
                    if let Some(notice) = notice {
                        trace!(record_id = %notice.record_id, kind = ?notice.kind, "Change notice");
                    }
                }
                _ = ticker.tick() => {}
            }
        }

        // Releases the observer so channel-backed subscriptions see their stream end.
        self.observer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(changes);
        self.hub.release(&self.path);
        debug!("Watcher stopped");
    }

    /// False once the subscription is cancelled or the observer has been detached.
    fn deliver(&self, records: Vec<Record>) -> bool {
        let mut observer = self.observer.lock().unwrap_or_else(PoisonError::into_inner);
        if self.token.is_cancelled() {
            return false;
        }
        let Some(observer) = observer.as_mut() else {
            return false;
        };
        observer(Snapshot {
            collection: self.path.collection(),
            records,
        });
        counter!("relay_snapshots_delivered_total").increment(1);
        true
    }
}

/// Waits for the next notice. Lagging yields `None` (the caller re-reads anyway); a closed
/// hub leaves only the poll timer.
async fn next_change(
    changes: &mut Option<broadcast::Receiver<ChangeNotice>>,
) -> Option<ChangeNotice> {
    let Some(receiver) = changes.as_mut() else {
        return std::future::pending().await;
    };
    let result = receiver.recv().await;
    match result {
        Ok(notice) => Some(notice),
        Err(broadcast::error::RecvError::Lagged(skipped)) => {
            debug!(skipped, "Change notices lagged, re-reading snapshot");
            None
        }
        Err(broadcast::error::RecvError::Closed) => {
            *changes = None;
            None
        }
    }
}
