//! Reference-counted process-wide engine initialization.
//!
//! Every opened shard holds a [`RuntimeLease`]. The first lease runs the
//! engine's `init` hook and dropping the last one runs `fin`.

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use log::debug;
use parking_lot::Mutex;

/// Global setup and teardown of an engine library.
pub trait RuntimeHooks: Send + Sync {
    fn init(&self) -> Result<()>;
    fn fin(&self);
}

struct NoopHooks;

impl RuntimeHooks for NoopHooks {
    fn init(&self) -> Result<()> {
        Ok(())
    }

    fn fin(&self) {}
}

struct RuntimeInner {
    hooks: Box<dyn RuntimeHooks>,
    leases: Mutex<usize>,
}

#[derive(Clone)]
pub struct EngineRuntime {
    inner: Arc<RuntimeInner>,
}

impl EngineRuntime {
    pub fn new<H: RuntimeHooks + 'static>(hooks: H) -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                hooks: Box::new(hooks),
                leases: Mutex::new(0),
            }),
        }
    }

    pub fn noop() -> Self {
        Self::new(NoopHooks)
    }

    /// Takes a lease, initializing the engine if none is outstanding.
    /// A failed `init` leaves the count unchanged.
    pub fn acquire(&self) -> Result<RuntimeLease> {
        let mut leases = self.inner.leases.lock();
        if *leases == 0 {
            debug!("engine runtime init");
            self.inner.hooks.init()?;
        }
        *leases += 1;
        Ok(RuntimeLease {
            runtime: self.clone(),
        })
    }

    pub fn active_leases(&self) -> usize {
        *self.inner.leases.lock()
    }
}

impl Default for EngineRuntime {
    fn default() -> Self {
        Self::noop()
    }
}

impl fmt::Debug for EngineRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineRuntime")
            .field("active_leases", &self.active_leases())
            .finish()
    }
}

/// Keeps the engine runtime initialized while alive.
pub struct RuntimeLease {
    runtime: EngineRuntime,
}

impl Drop for RuntimeLease {
    fn drop(&mut self) {
        let inner = &self.runtime.inner;
        let mut leases = inner.leases.lock();
        *leases = leases.saturating_sub(1);
        if *leases == 0 {
            debug!("engine runtime fin");
            inner.hooks.fin();
        }
    }
}
