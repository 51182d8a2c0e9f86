use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use super::core::Context;

/// Snapshot of pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContextPoolStats {
    /// Contexts allocated because the free list was empty.
    pub created: u64,
    /// Acquisitions served from the free list.
    pub reused: u64,
    /// Contexts currently parked in the free list.
    pub idle: usize,
}

/// Free list of reusable [`Context`] instances.
///
/// `acquire` never fails; it allocates when the free list is empty. `release`
/// clears every mutable field before parking the instance, so a context handed
/// out by `acquire` never carries params or store entries from an earlier
/// request. The free list is capped at `max_idle`; surplus contexts are dropped.
pub struct ContextPool {
    free: Mutex<Vec<Box<Context>>>,
    max_idle: usize,
    created: AtomicU64,
    reused: AtomicU64,
    drained: AtomicBool,
}

impl std::fmt::Debug for ContextPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextPool")
            .field("max_idle", &self.max_idle)
            .field("stats", &self.stats())
            .finish()
    }
}

impl ContextPool {
    #[must_use]
    pub fn new(max_idle: usize) -> Self {
        Self {
            free: Mutex::new(Vec::with_capacity(max_idle.min(256))),
            max_idle,
            created: AtomicU64::new(0),
            reused: AtomicU64::new(0),
            drained: AtomicBool::new(false),
        }
    }

    /// Take a cleared context from the free list or allocate a new one.
    pub fn acquire(&self) -> Box<Context> {
        if let Some(ctx) = self.free.lock().pop() {
            self.reused.fetch_add(1, Ordering::Relaxed);
            return ctx;
        }
        self.created.fetch_add(1, Ordering::Relaxed);
        Box::new(Context::new())
    }

    /// Clear `ctx` and return it to the free list.
    ///
    /// Taking the box by value makes a second release of the same instance,
    /// or any use after release, a compile error.
    pub fn release(&self, mut ctx: Box<Context>) {
        ctx.clear();
        if self.drained.load(Ordering::Acquire) {
            return;
        }
        let mut free = self.free.lock();
        if free.len() < self.max_idle {
            free.push(ctx);
        }
    }

    /// Acquire a context wrapped in a guard that releases it on drop.
    pub fn acquire_guarded(self: &Arc<Self>) -> PooledContext {
        PooledContext {
            pool: Arc::clone(self),
            ctx: Some(self.acquire()),
        }
    }

    /// Drop every idle context and stop retaining released ones.
    ///
    /// Acquisition keeps working afterwards; it simply allocates.
    pub fn drain(&self) -> usize {
        self.drained.store(true, Ordering::Release);
        let mut free = self.free.lock();
        let dropped = free.len();
        free.clear();
        free.shrink_to_fit();
        debug!(dropped, "Context pool drained");
        dropped
    }

    pub fn is_drained(&self) -> bool {
        self.drained.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> ContextPoolStats {
        ContextPoolStats {
            created: self.created.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            idle: self.free.lock().len(),
        }
    }
}

/// Exclusive handle on a pooled [`Context`].
///
/// Dropping the guard releases the context, including during unwinding, so
/// every exit path of a dispatch returns the instance exactly once.
pub struct PooledContext {
    pool: Arc<ContextPool>,
    ctx: Option<Box<Context>>,
}

impl std::fmt::Debug for PooledContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PooledContext").field(&self.ctx).finish()
    }
}

impl Deref for PooledContext {
    type Target = Context;

    #[allow(clippy::expect_used)]
    fn deref(&self) -> &Context {
        // Only `Drop` takes the box out.
        self.ctx.as_deref().expect("context present until drop")
    }
}

impl DerefMut for PooledContext {
    #[allow(clippy::expect_used)]
    fn deref_mut(&mut self) -> &mut Context {
        self.ctx.as_deref_mut().expect("context present until drop")
    }
}

impl Drop for PooledContext {
    fn drop(&mut self) {
        if let Some(ctx) = self.ctx.take() {
            self.pool.release(ctx);
        }
    }
}
