//! The pool manager: one pool, its replenisher, and the shutdown path.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::{JoinHandle, JoinSet};

use crate::error::{ExecError, PoolClosed};
use crate::executor::run_query;
use crate::pool::{Lease, Pool, terminate_logged};
use crate::provisioner::Provisioner;
use crate::replenisher;
use crate::result::QueryResult;
use crate::signal::ShutdownSignal;

/// Pool sizing and replenishment pace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum number of idle instances.
    ///
    /// Default: `4`
    pub capacity: usize,

    /// Pause between replenisher checks.
    ///
    /// Default: `20ms`
    pub poll_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: 4,
            poll_interval: Duration::from_millis(20),
        }
    }
}

/// Owns a pool of disposable instances and serves one query per instance.
///
/// Construct with [`start`](PoolManager::start) inside a tokio runtime, share
/// behind an `Arc`, and call [`shutdown`](PoolManager::shutdown) before the
/// process exits.
pub struct PoolManager<P: Provisioner> {
    provisioner: Arc<P>,
    pool: Arc<Pool<P::Instance>>,
    signal: Arc<ShutdownSignal>,
    replenisher: Mutex<Option<JoinHandle<()>>>,
}

impl<P: Provisioner> PoolManager<P> {
    /// Create the pool and spawn its replenisher.
    ///
    /// A capacity of zero is raised to one.
    pub fn start(provisioner: P, config: PoolConfig) -> Self {
        let capacity = if config.capacity == 0 {
            tracing::warn!("pool capacity must be positive, using 1");
            1
        } else {
            config.capacity
        };

        let provisioner = Arc::new(provisioner);
        let pool = Arc::new(Pool::new(capacity));
        let signal = Arc::new(ShutdownSignal::new());

        let handle = tokio::spawn(replenisher::run(
            Arc::clone(&provisioner),
            Arc::clone(&pool),
            Arc::clone(&signal),
            config.poll_interval,
        ));
        tracing::info!(capacity, "instance pool started");

        Self {
            provisioner,
            pool,
            signal,
            replenisher: Mutex::new(Some(handle)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.pool.capacity()
    }

    /// Momentary number of idle instances.
    pub fn idle_count(&self) -> usize {
        self.pool.idle_count()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.signal.is_triggered()
    }

    /// Wait for an idle instance and take exclusive ownership of it.
    pub async fn borrow(&self) -> Result<Lease<P>, PoolClosed> {
        let instance = self.pool.borrow().await?;
        tracing::debug!(instance = ?instance, idle = self.pool.idle_count(), "instance borrowed");
        Ok(Lease::new(Arc::clone(&self.provisioner), instance))
    }

    /// Run `sql` on a freshly borrowed instance, then terminate the instance.
    ///
    /// Waits while no instance is idle; this is the only admission control.
    /// The instance is terminated whether or not the query succeeds.
    pub async fn execute_query(&self, sql: &str) -> Result<QueryResult, ExecError> {
        let lease = self.borrow().await?;
        let result = run_query(&*self.provisioner, &lease, sql).await;
        if let Err(err) = &result {
            tracing::debug!(error = %err, "query failed");
        }
        lease.finish().await;
        result
    }

    /// Stop replenishing, then terminate every idle instance.
    ///
    /// Instances borrowed by in-flight queries are left to those queries.
    /// Returns the number of idle instances that were terminated. Only the
    /// first call does anything; later calls log and return zero.
    pub async fn shutdown(&self) -> usize {
        if !self.signal.trigger() {
            tracing::warn!("shutdown already requested, ignoring");
            return 0;
        }
        tracing::info!("shutting down instance pool");

        let replenisher = self
            .replenisher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        // The pool is closed by the drain, so a replenisher still finishing a
        // provision discards its instance instead of adding it.
        let drained = self.pool.drain_all();
        let count = drained.len();

        let mut terminations = JoinSet::new();
        for instance in drained {
            let provisioner = Arc::clone(&self.provisioner);
            terminations.spawn(async move { terminate_logged(&*provisioner, instance).await });
        }

        if let Some(handle) = replenisher
            && let Err(err) = handle.await
        {
            tracing::warn!(error = %err, "replenisher task failed");
        }
        while let Some(joined) = terminations.join_next().await {
            if let Err(err) = joined {
                tracing::warn!(error = %err, "termination task failed");
            }
        }

        tracing::info!(terminated = count, "instance pool closed");
        count
    }
}
