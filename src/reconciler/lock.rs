//! Two-level mutual exclusion for reconciliation work.
//!
//! Acquisition order: process-local mutex first, then the database
//! advisory lock keyed by the configured integer. The mutex serializes
//! tasks inside this process; the advisory lock serializes peer processes
//! during rolling deploys. Release runs in reverse. A failure to release
//! the advisory lock leaves the whole fleet blocked, so it escalates to
//! the fatal hook: cancel the process and let the orchestrator restart it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error};

use crate::domain::Error;
use crate::outbound::persistence::{PgConnection, PgRuleStore};

/// Callback invoked when the service must terminate.
pub type FatalHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Proof of exclusive reconciliation access. Hand it back through
/// [`LockManager::release`]; dropping it releases only the process mutex.
pub struct LockGuard {
    process: OwnedMutexGuard<()>,
    conn: PgConnection,
}

#[derive(Clone)]
pub struct LockManager {
    store: PgRuleStore,
    key: i64,
    mutex: Arc<Mutex<()>>,
    slow_mux_lock: Option<Duration>,
    fatal: FatalHook,
}

impl LockManager {
    pub fn new(
        store: PgRuleStore,
        key: i64,
        slow_mux_lock: Option<Duration>,
        fatal: FatalHook,
    ) -> Self {
        Self {
            store,
            key,
            mutex: Arc::new(Mutex::new(())),
            slow_mux_lock,
            fatal,
        }
    }

    /// Acquire both locks. On advisory-lock failure the process mutex is
    /// released again before the error is reported.
    pub async fn acquire(&self) -> Result<LockGuard, Error> {
        if let Some(delay) = self.slow_mux_lock {
            // Diagnostic knob: widen the window before the mutex to
            // surface lock-ordering bugs under test.
            tokio::time::sleep(delay).await;
        }
        let process = self.mutex.clone().lock_owned().await;
        debug!("process mutex locked, acquiring advisory lock");
        match self.store.advisory_lock(self.key).await {
            Ok(conn) => {
                debug!(key = self.key, "advisory lock acquired");
                Ok(LockGuard { process, conn })
            }
            Err(err) => {
                drop(process);
                Err(Error::unavailable(format!(
                    "could not acquire advisory lock: {err}"
                )))
            }
        }
    }

    /// Release both locks in reverse order. An advisory-unlock failure is
    /// fatal: the hook cancels the process rather than risk divergence
    /// between peers behind a stuck lock.
    pub async fn release(&self, guard: LockGuard) {
        let LockGuard { process, conn } = guard;
        drop(process);
        debug!("process mutex unlocked");
        if let Err(err) = self.store.advisory_unlock(&conn, self.key).await {
            error!(error = %err, "could not unlock advisory lock, requesting shutdown to avoid deadlock");
            (self.fatal)(&err.to_string());
        } else {
            debug!(key = self.key, "advisory lock released");
        }
    }
}
