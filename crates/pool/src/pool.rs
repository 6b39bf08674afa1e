//! Keyed resource pool.

use crate::error::{BoxError, PoolError, PoolResult};
use futures::future::{BoxFuture, FutureExt, Shared};
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::time::DelayQueue;

/// Default lifetime of a pooled resource (30 minutes).
pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

type FactoryFn<K, R> = dyn Fn(K) -> BoxFuture<'static, Result<R, BoxError>> + Send + Sync;
type EvictFn<K, R> =
    dyn Fn(KeyedResourcePool<K, R>, K, R) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync;
type PendingResource<R> = Shared<BoxFuture<'static, PoolResult<R>>>;

/// Bounds shared by every pool key.
pub trait PoolKey: Eq + Hash + Clone + Debug + Send + Sync + 'static {}
impl<T> PoolKey for T where T: Eq + Hash + Clone + Debug + Send + Sync + 'static {}

/// Bounds shared by every pooled resource. Resources are handed out by
/// clone, so they are usually an `Arc` around the real client.
pub trait PoolResource: Clone + Send + Sync + 'static {}
impl<T> PoolResource for T where T: Clone + Send + Sync + 'static {}

enum Slot<R> {
    Pending {
        resource: PendingResource<R>,
        generation: u64,
    },
    Ready {
        resource: R,
        generation: u64,
    },
}

struct ExpiryCommand<K> {
    key: K,
    generation: u64,
}

struct PoolInner<K, R> {
    index: Mutex<HashMap<K, Slot<R>>>,
    factory: Box<FactoryFn<K, R>>,
    on_evict: Option<Box<EvictFn<K, R>>>,
    next_generation: AtomicU64,
    expiry_tx: mpsc::UnboundedSender<ExpiryCommand<K>>,
    cancel: CancellationToken,
    ttl: Duration,
}

/// Cache mapping a key to a lazily constructed resource.
///
/// - Concurrent requests for an absent key share one factory call; every
///   waiter receives the same result, success or failure.
/// - A failed construction caches nothing, so the next request retries.
/// - Entries expire a fixed TTL after they were created. Reads do not
///   extend the lifetime.
/// - A background task removes expired entries and then runs the eviction
///   callback with the pool, the key and the resource. Callback failures
///   are logged and never keep an entry alive.
/// - [`replace`](Self::replace) and [`shutdown`](Self::shutdown) remove
///   entries without running the callback.
///
/// The pool must be built inside a Tokio runtime. Handles are cheap to
/// clone; the background task exits once the last handle is dropped or
/// the pool is shut down.
pub struct KeyedResourcePool<K, R> {
    inner: Arc<PoolInner<K, R>>,
}

impl<K, R> Clone for KeyedResourcePool<K, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: PoolKey, R: PoolResource> Debug for KeyedResourcePool<K, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedResourcePool")
            .field("entries", &self.inner.index.lock().len())
            .field("ttl", &self.inner.ttl)
            .finish_non_exhaustive()
    }
}

/// Builder for [`KeyedResourcePool`].
pub struct PoolBuilder<K, R> {
    factory: Box<FactoryFn<K, R>>,
    on_evict: Option<Box<EvictFn<K, R>>>,
    ttl: Duration,
}

impl<K: PoolKey, R: PoolResource> PoolBuilder<K, R> {
    /// Lifetime of each entry, counted from creation (default: 30 minutes).
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Callback run after an entry expired and was removed.
    pub fn on_evict<F, Fut, E>(mut self, on_evict: F) -> Self
    where
        F: Fn(KeyedResourcePool<K, R>, K, R) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError>,
    {
        self.on_evict = Some(Box::new(
            move |pool: KeyedResourcePool<K, R>, key: K, resource: R| {
                let callback: BoxFuture<'static, Result<(), BoxError>> = on_evict(pool, key, resource)
                    .map(|r| r.map_err(Into::into))
                    .boxed();
                callback
            },
        ));
        self
    }

    /// Build the pool and start its expiry task.
    pub fn build(self) -> KeyedResourcePool<K, R> {
        let (expiry_tx, expiry_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let inner = Arc::new(PoolInner {
            index: Mutex::new(HashMap::new()),
            factory: self.factory,
            on_evict: self.on_evict,
            next_generation: AtomicU64::new(0),
            expiry_tx,
            cancel: cancel.clone(),
            ttl: self.ttl,
        });

        tokio::spawn(run_expiry(
            Arc::downgrade(&inner),
            expiry_rx,
            cancel,
            self.ttl,
        ));

        tracing::debug!(ttl_secs = self.ttl.as_secs(), "Created keyed resource pool");
        KeyedResourcePool { inner }
    }
}

impl<K: PoolKey, R: PoolResource> KeyedResourcePool<K, R> {
    /// Start building a pool around `factory`.
    pub fn builder<F, Fut, E>(factory: F) -> PoolBuilder<K, R>
    where
        F: Fn(K) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
        E: Into<BoxError>,
    {
        PoolBuilder {
            factory: Box::new(move |key: K| {
                let create: BoxFuture<'static, Result<R, BoxError>> =
                    factory(key).map(|r| r.map_err(Into::into)).boxed();
                create
            }),
            on_evict: None,
            ttl: DEFAULT_TTL,
        }
    }

    /// Return the live resource for `key`, creating it if absent.
    pub async fn get_or_create(&self, key: K) -> PoolResult<R> {
        let pending = {
            let mut index = self.inner.index.lock();
            if self.inner.cancel.is_cancelled() {
                return Err(PoolError::Closed);
            }
            match index.get(&key) {
                Some(Slot::Ready { resource, .. }) => return Ok(resource.clone()),
                Some(Slot::Pending { resource, .. }) => resource.clone(),
                None => {
                    let generation = self.inner.next_generation();
                    let resource = self.spawn_create(key.clone(), generation);
                    index.insert(
                        key,
                        Slot::Pending {
                            resource: resource.clone(),
                            generation,
                        },
                    );
                    resource
                }
            }
        };
        pending.await
    }

    /// Install `resource` for `key`, returning the live resource it displaced.
    ///
    /// The displaced resource is handed back to the caller instead of going
    /// through the eviction callback. A construction still in flight for
    /// `key` completes for its waiters but is not cached.
    pub fn replace(&self, key: K, resource: R) -> Option<R> {
        let generation = self.inner.next_generation();
        let previous = {
            let mut index = self.inner.index.lock();
            index.insert(key.clone(), Slot::Ready { resource, generation })
        };
        self.inner.track(key, generation);
        match previous {
            Some(Slot::Ready { resource, .. }) => Some(resource),
            _ => None,
        }
    }

    /// Whether a live resource is cached for `key`.
    pub fn contains(&self, key: &K) -> bool {
        matches!(
            self.inner.index.lock().get(key),
            Some(Slot::Ready { .. })
        )
    }

    /// Number of live resources.
    pub fn len(&self) -> usize {
        self.inner
            .index
            .lock()
            .values()
            .filter(|slot| matches!(slot, Slot::Ready { .. }))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close the pool and hand every live resource to the caller.
    ///
    /// The eviction callback does not run for these entries. Later calls
    /// to [`get_or_create`](Self::get_or_create) fail with [`PoolError::Closed`].
    pub fn shutdown(&self) -> Vec<(K, R)> {
        let drained: Vec<(K, R)> = {
            let mut index = self.inner.index.lock();
            self.inner.cancel.cancel();
            index
                .drain()
                .filter_map(|(key, slot)| match slot {
                    Slot::Ready { resource, .. } => Some((key, resource)),
                    Slot::Pending { .. } => None,
                })
                .collect()
        };
        tracing::debug!(entries = drained.len(), "Keyed resource pool shut down");
        drained
    }

    /// Called with the index lock held, so the factory itself is only
    /// invoked from the spawned task.
    fn spawn_create(&self, key: K, generation: u64) -> PendingResource<R> {
        let weak = Arc::downgrade(&self.inner);
        let task_key = key.clone();

        // The factory runs in its own task so that construction finishes
        // and settles the index even if every waiter is cancelled.
        let handle = tokio::spawn(async move {
            let create = match weak.upgrade() {
                Some(inner) => (inner.factory)(task_key.clone()),
                None => return Err(PoolError::Closed),
            };
            let result = create.await.map_err(PoolError::create);
            if let Some(inner) = weak.upgrade() {
                inner.settle(task_key, generation, &result);
            }
            result
        });

        let weak = Arc::downgrade(&self.inner);
        async move {
            match handle.await {
                Ok(result) => result,
                Err(join_err) => {
                    let result = Err(PoolError::Aborted(join_err.to_string()));
                    if let Some(inner) = weak.upgrade() {
                        inner.settle(key, generation, &result);
                    }
                    result
                }
            }
        }
        .boxed()
        .shared()
    }
}

impl<K: PoolKey, R: PoolResource> PoolInner<K, R> {
    fn next_generation(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::Relaxed)
    }

    fn track(&self, key: K, generation: u64) {
        // Fails only once the expiry task is gone, i.e. after shutdown.
        let _ = self.expiry_tx.send(ExpiryCommand { key, generation });
    }

    /// Record the outcome of the construction for `generation`, unless the
    /// slot has moved on since.
    fn settle(&self, key: K, generation: u64, result: &PoolResult<R>) {
        let mut index = self.index.lock();
        let current = matches!(
            index.get(&key),
            Some(Slot::Pending { generation: g, .. }) if *g == generation
        );
        if !current {
            return;
        }

        match result {
            Ok(resource) => {
                tracing::debug!(key = ?key, "Pooled resource created");
                index.insert(
                    key.clone(),
                    Slot::Ready {
                        resource: resource.clone(),
                        generation,
                    },
                );
                drop(index);
                self.track(key, generation);
            }
            Err(err) => {
                tracing::debug!(key = ?key, error = %err, "Pooled resource creation failed");
                index.remove(&key);
            }
        }
    }

    /// Remove an expired entry and run the eviction callback for it.
    fn expire(self: &Arc<Self>, key: K, generation: u64) {
        let removed = {
            let mut index = self.index.lock();
            let current = matches!(
                index.get(&key),
                Some(Slot::Ready { generation: g, .. }) if *g == generation
            );
            if current { index.remove(&key) } else { None }
        };

        let Some(Slot::Ready { resource, .. }) = removed else {
            return;
        };
        tracing::debug!(key = ?key, "Pooled resource expired");

        if let Some(on_evict) = &self.on_evict {
            let pool = KeyedResourcePool {
                inner: Arc::clone(self),
            };
            let callback = on_evict(pool, key.clone(), resource);
            tokio::spawn(async move {
                if let Err(e) = callback.await {
                    tracing::warn!(key = ?key, error = %e, "Eviction callback failed");
                }
            });
        }
    }
}

/// Expiry loop: waits on a timer wheel of (key, generation) pairs.
async fn run_expiry<K: PoolKey, R: PoolResource>(
    inner: Weak<PoolInner<K, R>>,
    mut commands: mpsc::UnboundedReceiver<ExpiryCommand<K>>,
    cancel: CancellationToken,
    ttl: Duration,
) {
    let mut timers: DelayQueue<(K, u64)> = DelayQueue::new();
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            command = commands.recv() => match command {
                Some(ExpiryCommand { key, generation }) => {
                    timers.insert((key, generation), ttl);
                }
                None => break,
            },
            Some(expired) = timers.next(), if !timers.is_empty() => {
                let (key, generation) = expired.into_inner();
                let Some(pool) = inner.upgrade() else { break };
                pool.expire(key, generation);
            }
        }
    }
}
