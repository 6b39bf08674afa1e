use ferry_pool::{BoxError, KeyedResourcePool};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tokio::time::Duration;

/// Stand-in for an expensive client; `serial` identifies the instance.
#[derive(Debug, PartialEq, Eq)]
pub struct TestClient {
    pub key: String,
    pub serial: usize,
}

/// Factory that counts its invocations, optionally sleeping and failing.
#[allow(dead_code)]
#[derive(Clone, Default)]
pub struct CountingFactory {
    calls: Arc<AtomicUsize>,
    failures_left: Arc<AtomicUsize>,
    delay: Duration,
}

#[allow(dead_code)]
impl CountingFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep for `delay` inside each construction.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail the first `count` constructions.
    pub fn failing_first(self, count: usize) -> Self {
        self.failures_left.store(count, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn create(&self, key: String) -> Result<Arc<TestClient>, BoxError> {
        let serial = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(format!("connect to {key} refused").into());
        }
        Ok(Arc::new(TestClient { key, serial }))
    }

    /// Build a pool backed by this factory.
    pub fn pool(&self, ttl: Duration) -> KeyedResourcePool<String, Arc<TestClient>> {
        let factory = self.clone();
        KeyedResourcePool::builder(move |key: String| {
            let factory = factory.clone();
            async move { factory.create(key).await }
        })
        .ttl(ttl)
        .build()
    }
}

/// Receives every eviction callback invocation.
#[allow(dead_code)]
pub struct EvictionLog {
    pub rx: mpsc::UnboundedReceiver<(String, Arc<TestClient>)>,
}

#[allow(dead_code)]
impl EvictionLog {
    /// Build a pool whose eviction callback reports into the returned log.
    ///
    /// With `fail_callback` the callback reports and then returns an error.
    pub fn pool(
        factory: &CountingFactory,
        ttl: Duration,
        fail_callback: bool,
    ) -> (KeyedResourcePool<String, Arc<TestClient>>, EvictionLog) {
        let (tx, rx) = mpsc::unbounded_channel();
        let factory = factory.clone();
        let pool = KeyedResourcePool::builder(move |key: String| {
            let factory = factory.clone();
            async move { factory.create(key).await }
        })
        .ttl(ttl)
        .on_evict(move |_pool, key: String, client: Arc<TestClient>| {
            let tx = tx.clone();
            async move {
                let _ = tx.send((key, client));
                if fail_callback {
                    Err::<(), BoxError>("close failed".into())
                } else {
                    Ok(())
                }
            }
        })
        .build();
        (pool, EvictionLog { rx })
    }
}
