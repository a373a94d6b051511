//! Bounded pool of interchangeable model instances
//!
//! Serializes access to non-thread-safe models: each caller borrows an
//! instance for exclusive use and the RAII [`PoolHandle`] returns it on every
//! exit path, so an instance can never be on loan to two callers or returned
//! twice. The pool is pre-warmed to `min_idle` instances at construction so
//! steady-state latency is not paid by the first callers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::config::PoolConfig;
use crate::error::{ModelMuxError, Result};

struct PoolState<T> {
    idle: Vec<(T, Instant)>,
    on_loan: usize,
    closed: bool,
}

/// A bounded pool of interchangeable instances produced by a cloning factory.
pub struct InstancePool<T: Send> {
    factory: Box<dyn Fn() -> Result<T> + Send + Sync>,
    config: PoolConfig,
    state: Mutex<PoolState<T>>,
    returned: Condvar,
    created: AtomicU64,
}

impl<T: Send> std::fmt::Debug for InstancePool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstancePool").finish_non_exhaustive()
    }
}

impl<T: Send> InstancePool<T> {
    /// Build a pool and pre-populate it with `min(min_idle, max_idle,
    /// max_active)` idle instances by borrowing then returning that many.
    /// Fails with a pool-init error if the factory cannot produce an instance.
    pub fn new(
        factory: Box<dyn Fn() -> Result<T> + Send + Sync>,
        config: PoolConfig,
    ) -> Result<Arc<Self>> {
        let pool = Arc::new(Self {
            factory,
            config,
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                on_loan: 0,
                closed: false,
            }),
            returned: Condvar::new(),
            created: AtomicU64::new(0),
        });

        let mut warm = Vec::with_capacity(pool.config.prewarm_count());
        for _ in 0..pool.config.prewarm_count() {
            warm.push(pool.borrow()?);
        }
        drop(warm);

        Ok(pool)
    }

    /// Borrow an instance for exclusive use.
    ///
    /// Returns an idle instance when available, creates a new one while under
    /// `max_active`, and otherwise blocks up to `max_wait` (indefinitely when
    /// unset) for a return. Fails with `PoolExhausted` on timeout and
    /// `PoolClosed` once the pool has been closed.
    pub fn borrow(self: &Arc<Self>) -> Result<PoolHandle<T>> {
        let deadline = self.config.max_wait().map(|wait| Instant::now() + wait);
        let mut state = self.state.lock();

        loop {
            if state.closed {
                return Err(ModelMuxError::PoolClosed);
            }

            if let Some(max_age) = self.config.evict_idle_after() {
                state.idle.retain(|(_, since)| since.elapsed() <= max_age);
            }

            if let Some((instance, _)) = state.idle.pop() {
                state.on_loan += 1;
                return Ok(PoolHandle::new(instance, self));
            }

            let alive = state.on_loan + state.idle.len();
            if self.config.max_active.map_or(true, |max| alive < max) {
                // Reserve the slot, then create outside the lock: cloning a
                // model can be expensive and must not block returns.
                state.on_loan += 1;
                drop(state);
                match self.create() {
                    Ok(instance) => return Ok(PoolHandle::new(instance, self)),
                    Err(e) => {
                        let mut state = self.state.lock();
                        state.on_loan -= 1;
                        drop(state);
                        self.returned.notify_one();
                        return Err(e);
                    }
                }
            }

            match deadline {
                None => self.returned.wait(&mut state),
                Some(deadline) => {
                    if self.returned.wait_until(&mut state, deadline).timed_out() {
                        // One last look before giving up: a return may have
                        // raced the timeout.
                        if state.closed {
                            return Err(ModelMuxError::PoolClosed);
                        }
                        if let Some((instance, _)) = state.idle.pop() {
                            state.on_loan += 1;
                            return Ok(PoolHandle::new(instance, self));
                        }
                        return Err(ModelMuxError::PoolExhausted {
                            waited_ms: self.config.max_wait_ms.unwrap_or(0),
                        });
                    }
                }
            }
        }
    }

    /// Close the pool: wake blocked borrowers with `PoolClosed` and discard
    /// idle instances. Instances on loan drain through their handles, which
    /// become discard-on-drop. Idempotent.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.idle.clear();
        drop(state);
        self.returned.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Instances currently borrowed.
    pub fn on_loan(&self) -> usize {
        self.state.lock().on_loan
    }

    /// Instances currently idle in the pool.
    pub fn idle_count(&self) -> usize {
        self.state.lock().idle.len()
    }

    /// Total instances the factory has produced over the pool's lifetime.
    pub fn created_count(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    fn create(&self) -> Result<T> {
        let instance = (self.factory)()
            .map_err(|e| ModelMuxError::PoolInit(e.to_string()))?;
        self.created.fetch_add(1, Ordering::Relaxed);
        Ok(instance)
    }

    fn return_instance(&self, instance: T) {
        let mut state = self.state.lock();
        state.on_loan = state.on_loan.saturating_sub(1);
        if !state.closed {
            let below_max_idle = self
                .config
                .max_idle
                .map_or(true, |max| state.idle.len() < max);
            if below_max_idle {
                state.idle.push((instance, Instant::now()));
            }
            // Instances beyond max_idle are discarded so the pool shrinks
            // back within policy.
        }
        drop(state);
        self.returned.notify_one();
    }
}

/// Exclusive loan of a pool instance. Dropping the handle returns the
/// instance; after pool close the return becomes a discard.
pub struct PoolHandle<T: Send> {
    instance: Option<T>,
    pool: Weak<InstancePool<T>>,
}

impl<T: Send> std::fmt::Debug for PoolHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolHandle").finish_non_exhaustive()
    }
}

impl<T: Send> PoolHandle<T> {
    fn new(instance: T, pool: &Arc<InstancePool<T>>) -> Self {
        Self {
            instance: Some(instance),
            pool: Arc::downgrade(pool),
        }
    }
}

impl<T: Send> std::ops::Deref for PoolHandle<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.instance.as_ref().expect("pool handle accessed after drop")
    }
}

impl<T: Send> std::ops::DerefMut for PoolHandle<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.instance.as_mut().expect("pool handle accessed after drop")
    }
}

impl<T: Send> Drop for PoolHandle<T> {
    fn drop(&mut self) {
        if let Some(instance) = self.instance.take() {
            if let Some(pool) = self.pool.upgrade() {
                pool.return_instance(instance);
            }
        }
    }
}
