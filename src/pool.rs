//! Core resource pool implementation

use crate::config::{Capacity, PoolConfiguration};
use crate::errors::{PoolError, PoolResult};
use crate::health::HealthStatus;
use crate::maintainer::{Answer, Handoff, Maintainer, MaintainerHandle, Reply, Request};
use crate::metrics::{MetricsExporter, MetricsTracker, PoolMetrics};

use crossbeam::channel::{self, Sender};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

/// Mutable pool state, only touched under the pool lock
struct PoolState<T> {
    idle: Vec<T>,

    /// Resources attributed to the pool, idle and checked out
    in_use: usize,

    /// Acquires handed to the maintainer and not yet resolved
    waiters: usize,
}

impl<T> PoolState<T> {
    fn checked_out(&self) -> usize {
        self.in_use - self.idle.len()
    }
}

/// Outcome of the locked part of an acquire
enum Acquire<T> {
    Reused(T),
    Construct,
    Wait(Instant),
}

/// State shared between the pool handle and its maintainer
pub(crate) struct Shared<T> {
    state: Mutex<PoolState<T>>,
    pub config: PoolConfiguration,
    pub metrics: MetricsTracker,
    returns: Sender<()>,
}

impl<T> Shared<T> {
    fn acquire(&self) -> Acquire<T> {
        let mut state = self.state.lock();

        if let Some(resource) = state.idle.pop() {
            MetricsTracker::incr(&self.metrics.reused);
            return Acquire::Reused(resource);
        }

        if !self.config.capacity.has_room(state.in_use) {
            state.waiters += 1;
            MetricsTracker::incr(&self.metrics.waited);
            return Acquire::Wait(Instant::now() + self.config.wait_timeout);
        }

        // Counted before construction so concurrent acquires respect the bound.
        state.in_use += 1;
        Acquire::Construct
    }

    /// Frees a construction slot; a waiter may take it over.
    fn rollback_construct(&self) {
        let mut state = self.state.lock();
        state.in_use -= 1;
        let notify = state.waiters > 0;
        drop(state);

        if notify {
            let _ = self.returns.send(());
        }
    }

    fn release(&self, resource: T) -> Result<(), T> {
        let mut state = self.state.lock();

        let returning = state.checked_out() > 0;
        if !returning && !self.config.capacity.has_room(state.in_use) {
            return Err(resource);
        }

        if !returning {
            state.in_use += 1;
        }
        state.idle.push(resource);
        let notify = state.waiters > 0;
        drop(state);

        if notify {
            let _ = self.returns.send(());
        }
        Ok(())
    }

    /// Takes an idle resource, or failing that a free construction slot,
    /// on behalf of a waiter
    pub(crate) fn claim_for_waiter(&self) -> Option<Handoff<T>> {
        let mut state = self.state.lock();
        let handoff = match state.idle.pop() {
            Some(resource) => Handoff::Resource(resource),
            None if self.config.capacity.has_room(state.in_use) => {
                state.in_use += 1;
                Handoff::Construct
            }
            None => return None,
        };
        state.waiters -= 1;
        Some(handoff)
    }

    pub(crate) fn abandon_wait(&self) {
        self.state.lock().waiters -= 1;
    }

    /// Undoes a handoff whose waiter went away
    pub(crate) fn give_back(&self, handoff: Handoff<T>) {
        match handoff {
            Handoff::Resource(resource) => self.restore(resource),
            Handoff::Construct => self.rollback_construct(),
        }
    }

    fn restore(&self, resource: T) {
        let mut state = self.state.lock();
        state.idle.push(resource);
        let notify = state.waiters > 0;
        drop(state);

        if notify {
            let _ = self.returns.send(());
        }
    }

    fn drain_idle(&self) -> Vec<T> {
        let mut state = self.state.lock();
        let drained = std::mem::take(&mut state.idle);
        state.in_use -= drained.len();
        drained
    }

    fn counts(&self) -> (usize, usize) {
        let state = self.state.lock();
        (state.idle.len(), state.checked_out())
    }
}

/// Receiving side of a waiting async acquire. Dropped before the answer is
/// taken, it hands whatever was already granted back to the pool.
struct AsyncWait<'a, T, E> {
    rx: oneshot::Receiver<Answer<T, E>>,
    shared: &'a Shared<T>,
}

impl<T, E> Drop for AsyncWait<'_, T, E> {
    fn drop(&mut self) {
        self.rx.close();
        if let Ok(Ok(handoff)) = self.rx.try_recv() {
            trace!("async acquire dropped after its wait was answered");
            self.shared.give_back(handoff);
        }
    }
}

/// Generic pool of expensive, reusable resources.
///
/// Resources are built lazily by the constructor when nothing idle is
/// available and the capacity allows it. When the pool is saturated, an
/// acquire waits up to the configured timeout for another caller to
/// [`put`](Pool::put) a resource back. Idle resources are handed to the
/// destructor on [`cleanup`](Pool::cleanup); resources still checked out
/// belong to their holders.
///
/// The pool is not `Clone`; share it by reference or behind an `Arc`.
///
/// # Examples
///
/// ```
/// use respool::{Pool, PoolConfiguration};
/// use std::time::Duration;
///
/// let pool = Pool::new(
///     PoolConfiguration::new()
///         .with_max_pool_size(1)
///         .with_wait_timeout(Duration::from_millis(50)),
///     || Ok::<_, std::io::Error>(String::from("channel")),
///     |channel| drop(channel),
/// );
///
/// let channel = pool.get().unwrap();
/// assert!(pool.get().unwrap_err().is_unavailable());
///
/// assert!(pool.put(channel).is_ok());
/// assert_eq!(pool.get().unwrap(), "channel");
/// pool.cleanup();
/// ```
pub struct Pool<T, E> {
    shared: Arc<Shared<T>>,
    maintainer: Option<MaintainerHandle<T, E>>,
    constructor: Box<dyn Fn() -> Result<T, E> + Send + Sync>,
    destructor: Box<dyn Fn(T) + Send + Sync>,
}

impl<T: Send + 'static, E: Send + 'static> Pool<T, E> {
    /// Create a pool and start its maintainer thread
    ///
    /// # Panics
    ///
    /// Panics if the OS refuses to spawn the maintainer thread, as
    /// [`std::thread::spawn`] does.
    pub fn new<C, D>(config: PoolConfiguration, constructor: C, destructor: D) -> Self
    where
        C: Fn() -> Result<T, E> + Send + Sync + 'static,
        D: Fn(T) + Send + Sync + 'static,
    {
        let (returns_tx, returns_rx) = channel::unbounded();
        let state = PoolState {
            idle: Vec::with_capacity(config.initial_idle_capacity()),
            in_use: 0,
            waiters: 0,
        };
        debug!(capacity = ?config.capacity, wait_timeout = ?config.wait_timeout, "creating resource pool");

        let shared = Arc::new(Shared {
            state: Mutex::new(state),
            config,
            metrics: MetricsTracker::new(),
            returns: returns_tx,
        });
        let maintainer = Maintainer::spawn(Arc::clone(&shared), returns_rx);

        Self {
            shared,
            maintainer: Some(maintainer),
            constructor: Box::new(constructor),
            destructor: Box::new(destructor),
        }
    }

    /// Get a resource, blocking up to the wait timeout when the pool is saturated
    pub fn get(&self) -> PoolResult<T, E> {
        match self.shared.acquire() {
            Acquire::Reused(resource) => {
                trace!("reusing idle resource");
                Ok(resource)
            }
            Acquire::Construct => self.construct(),
            Acquire::Wait(deadline) => {
                let (tx, rx) = channel::bounded(1);
                self.submit(deadline, Reply::Blocking(tx))?;
                let handoff = rx.recv().unwrap_or(Err(PoolError::Closed))?;
                self.take_handoff(handoff)
            }
        }
    }

    /// Get a resource without blocking the thread while the pool is saturated.
    ///
    /// The constructor still runs inline. Dropping the future gives up the
    /// wait; a resource already matched to it goes back to the idle set.
    ///
    /// # Examples
    ///
    /// ```
    /// use respool::{Pool, PoolConfiguration};
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// let pool = Pool::new(PoolConfiguration::new(), || Ok::<_, std::io::Error>(42), |_| {});
    /// assert_eq!(pool.get_async().await.unwrap(), 42);
    /// # }
    /// ```
    pub async fn get_async(&self) -> PoolResult<T, E> {
        match self.shared.acquire() {
            Acquire::Reused(resource) => Ok(resource),
            Acquire::Construct => self.construct(),
            Acquire::Wait(deadline) => {
                let (tx, rx) = oneshot::channel();
                self.submit(deadline, Reply::Async(tx))?;
                let mut wait = AsyncWait { rx, shared: &self.shared };
                let handoff = (&mut wait.rx).await.unwrap_or(Err(PoolError::Closed))?;
                self.take_handoff(handoff)
            }
        }
    }

    /// Return a resource to the pool.
    ///
    /// A full pool rejects it and hands it back in `Err`; disposing of a
    /// rejected resource is up to the caller.
    pub fn put(&self, resource: T) -> Result<(), T> {
        match self.shared.release(resource) {
            Ok(()) => {
                MetricsTracker::incr(&self.shared.metrics.returned);
                Ok(())
            }
            Err(resource) => {
                MetricsTracker::incr(&self.shared.metrics.rejected);
                debug!("pool is full, rejecting resource");
                Err(resource)
            }
        }
    }

    /// Stop the maintainer and destroy every idle resource
    pub fn cleanup(mut self) {
        self.teardown();
    }

    fn take_handoff(&self, handoff: Handoff<T>) -> PoolResult<T, E> {
        match handoff {
            Handoff::Resource(resource) => Ok(resource),
            Handoff::Construct => self.construct(),
        }
    }

    fn construct(&self) -> PoolResult<T, E> {
        match (self.constructor)() {
            Ok(resource) => {
                MetricsTracker::incr(&self.shared.metrics.constructed);
                debug!("constructed new resource");
                Ok(resource)
            }
            Err(err) => {
                self.shared.rollback_construct();
                MetricsTracker::incr(&self.shared.metrics.construction_failures);
                warn!("resource constructor failed");
                Err(PoolError::Construct(err))
            }
        }
    }

    fn submit(&self, deadline: Instant, reply: Reply<T, E>) -> PoolResult<(), E> {
        debug!("pool is saturated, waiting for a returned resource");
        let request = Request { deadline, reply };
        let submitted = match &self.maintainer {
            Some(maintainer) => maintainer.submit(request).is_ok(),
            None => false,
        };
        if submitted {
            Ok(())
        } else {
            self.shared.abandon_wait();
            Err(PoolError::Closed)
        }
    }
}

impl<T, E> Pool<T, E> {
    fn teardown(&mut self) {
        let Some(maintainer) = self.maintainer.take() else {
            return;
        };
        maintainer.shutdown();

        let idle = self.shared.drain_idle();
        let destroyed = idle.len();
        for resource in idle {
            (self.destructor)(resource);
        }
        self.shared.metrics.destroyed.fetch_add(destroyed, Ordering::Relaxed);
        debug!(destroyed, "resource pool cleaned up");
    }

    pub fn capacity(&self) -> Capacity {
        self.shared.config.capacity
    }

    pub fn wait_timeout(&self) -> Duration {
        self.shared.config.wait_timeout
    }

    /// Resources sitting idle in the pool
    pub fn idle_count(&self) -> usize {
        self.shared.counts().0
    }

    /// Resources handed out and not yet returned
    pub fn checked_out_count(&self) -> usize {
        self.shared.counts().1
    }

    /// Resources attributed to the pool, idle and checked out
    pub fn in_use_count(&self) -> usize {
        self.shared.state.lock().in_use
    }

    /// Acquires currently waiting on a saturated pool
    pub fn waiting_count(&self) -> usize {
        self.shared.state.lock().waiters
    }

    /// Get pool metrics
    pub fn get_metrics(&self) -> PoolMetrics {
        let (idle, checked_out) = self.shared.counts();
        self.shared
            .metrics
            .get_metrics(idle, checked_out, self.capacity().limit())
    }

    /// Export metrics
    pub fn export_metrics(&self) -> HashMap<String, String> {
        self.get_metrics().export()
    }

    /// Export metrics in Prometheus format
    pub fn export_metrics_prometheus(
        &self,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> String {
        MetricsExporter::export_prometheus(&self.get_metrics(), pool_name, tags)
    }

    /// Get health status
    pub fn get_health_status(&self) -> HealthStatus {
        let (idle, checked_out) = self.shared.counts();
        HealthStatus::new(idle, checked_out, self.capacity().limit())
    }
}

impl<T, E> Drop for Pool<T, E> {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    fn counting_pool(
        max: usize,
        timeout: Duration,
    ) -> (Pool<u32, std::io::Error>, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let constructed = Arc::new(AtomicUsize::new(0));
        let destroyed = Arc::new(AtomicUsize::new(0));
        let (ctr, dtr) = (Arc::clone(&constructed), Arc::clone(&destroyed));
        let pool = Pool::new(
            PoolConfiguration::new()
                .with_max_pool_size(max)
                .with_wait_timeout(timeout),
            move || Ok(ctr.fetch_add(1, Ordering::SeqCst) as u32),
            move |_| {
                dtr.fetch_add(1, Ordering::SeqCst);
            },
        );
        (pool, constructed, destroyed)
    }

    #[test]
    fn test_accounting_follows_resources() {
        let (pool, _, _) = counting_pool(3, Duration::from_millis(50));

        let a = pool.get().unwrap();
        let b = pool.get().unwrap();
        assert_eq!(pool.in_use_count(), 2);
        assert_eq!(pool.checked_out_count(), 2);

        pool.put(a).unwrap();
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(pool.in_use_count(), 2);

        pool.put(b).unwrap();
        // a resource the pool never handed out still fits the bound
        pool.put(99).unwrap();
        assert_eq!(pool.in_use_count(), 3);
        assert_eq!(pool.put(100), Err(100));
        assert_eq!(pool.idle_count(), 3);
    }

    #[test]
    fn test_failed_construction_rolls_back() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let pool: Pool<u8, std::io::Error> = Pool::new(
            PoolConfiguration::new().with_max_pool_size(1),
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "broker down"))
            },
            |_| {},
        );

        let err = pool.get().unwrap_err().into_construct_error().unwrap();
        assert_eq!(err.kind(), std::io::ErrorKind::ConnectionRefused);
        assert_eq!(pool.in_use_count(), 0);

        // room is left for the next attempt, which is not a retry
        assert!(pool.get().is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(pool.get_metrics().construction_failures, 2);
    }

    #[test]
    fn test_waiter_receives_returned_resource() {
        let (pool, constructed, _) = counting_pool(1, Duration::from_secs(5));
        let held = pool.get().unwrap();

        thread::scope(|s| {
            let waiter = s.spawn(|| pool.get());
            while pool.waiting_count() == 0 {
                thread::yield_now();
            }
            pool.put(held).unwrap();
            assert_eq!(waiter.join().unwrap().unwrap(), 0);
        });

        assert_eq!(constructed.load(Ordering::SeqCst), 1);
        assert_eq!(pool.waiting_count(), 0);
        assert_eq!(pool.get_metrics().waits_fulfilled, 1);
    }

    #[test]
    fn test_concurrent_returns_reach_every_waiter() {
        let (pool, constructed, _) = counting_pool(4, Duration::from_secs(5));
        let held: Vec<_> = (0..4).map(|_| pool.get().unwrap()).collect();

        let pool = &pool;
        thread::scope(|s| {
            let waiters: Vec<_> = (0..4).map(|_| s.spawn(move || pool.get())).collect();
            while pool.waiting_count() < 4 {
                thread::yield_now();
            }
            for resource in held {
                s.spawn(move || pool.put(resource).unwrap());
            }
            for waiter in waiters {
                assert!(waiter.join().unwrap().is_ok());
            }
        });

        assert_eq!(constructed.load(Ordering::SeqCst), 4);
        assert_eq!(pool.checked_out_count(), 4);
    }

    #[test]
    fn test_timeout_is_reported_by_metrics() {
        let (pool, _, _) = counting_pool(1, Duration::from_millis(20));
        let _held = pool.get().unwrap();

        let err = pool.get().unwrap_err();
        assert!(matches!(err, PoolError::ResourceUnavailable(t) if t == Duration::from_millis(20)));

        let metrics = pool.get_metrics();
        assert_eq!(metrics.total_waited, 1);
        assert_eq!(metrics.wait_timeouts, 1);
        assert_eq!(pool.waiting_count(), 0);
        assert!(!pool.get_health_status().is_healthy());
    }

    #[test]
    fn test_drop_destroys_idle_resources() {
        let (pool, _, destroyed) = counting_pool(2, Duration::from_millis(20));
        pool.put(1).unwrap();
        pool.put(2).unwrap();
        drop(pool);
        assert_eq!(destroyed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_failed_construction_hands_slot_to_waiter() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let pool: Pool<usize, std::io::Error> = Pool::new(
            PoolConfiguration::new()
                .with_max_pool_size(1)
                .with_wait_timeout(Duration::from_secs(5)),
            move || match counter.fetch_add(1, Ordering::SeqCst) {
                0 => {
                    thread::sleep(Duration::from_millis(200));
                    Err(std::io::Error::other("broker down"))
                }
                attempt => Ok(attempt),
            },
            |_| {},
        );

        let started = Instant::now();
        thread::scope(|s| {
            let first = s.spawn(|| pool.get());
            while pool.in_use_count() == 0 {
                thread::yield_now();
            }
            let second = s.spawn(|| pool.get());

            assert!(first.join().unwrap().is_err());
            assert_eq!(second.join().unwrap().unwrap(), 1);
        });

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(pool.checked_out_count(), 1);
        assert_eq!(pool.waiting_count(), 0);
    }

    #[tokio::test]
    async fn test_dropped_async_get_returns_delivered_resource() {
        let (pool, _, _) = counting_pool(1, Duration::from_secs(5));
        let held = pool.get_async().await.unwrap();

        let mut waiting = Box::pin(pool.get_async());
        assert!(
            tokio::time::timeout(Duration::from_millis(1), &mut waiting)
                .await
                .is_err()
        );

        // answered by the maintainer, never polled again
        pool.put(held).unwrap();
        while pool.waiting_count() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        drop(waiting);

        assert_eq!(pool.idle_count(), 1);
        assert_eq!(pool.checked_out_count(), 0);
        assert_eq!(pool.in_use_count(), 1);
        assert_eq!(pool.get_async().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_async_get_waits_for_return() {
        let (pool, _, _) = counting_pool(1, Duration::from_secs(5));
        let pool = Arc::new(pool);
        let held = pool.get_async().await.unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.get_async().await })
        };
        while pool.waiting_count() == 0 {
            tokio::task::yield_now().await;
        }
        pool.put(held).unwrap();

        assert_eq!(waiter.await.unwrap().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_abandoned_async_wait_keeps_resource() {
        let (pool, _, _) = counting_pool(1, Duration::from_millis(200));
        let held = pool.get_async().await.unwrap();

        let gave_up = tokio::time::timeout(Duration::from_millis(10), pool.get_async()).await;
        assert!(gave_up.is_err());

        pool.put(held).unwrap();
        while pool.waiting_count() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(pool.get_async().await.unwrap(), 0);
    }
}
