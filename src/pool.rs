//! Bounded pool of idle instances.

use std::mem::ManuallyDrop;
use std::ops::Deref;
use std::sync::{Arc, Mutex, PoisonError};

use crossbeam_queue::ArrayQueue;
use tokio::sync::Semaphore;

use crate::error::PoolClosed;
use crate::provisioner::Provisioner;

/// Idle instances waiting to be borrowed.
///
/// Holds at most `capacity` handles. Each handle leaves the pool exactly once,
/// either through [`borrow`](Pool::borrow) or [`drain_all`](Pool::drain_all).
pub struct Pool<I> {
    idle: ArrayQueue<I>,
    /// One permit per handle in `idle`.
    available: Semaphore,
    /// Serializes `try_add` against `drain_all`.
    closed: Mutex<bool>,
}

impl<I> Pool<I> {
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        Self {
            idle: ArrayQueue::new(capacity),
            available: Semaphore::new(0),
            closed: Mutex::new(false),
        }
    }

    pub fn capacity(&self) -> usize {
        self.idle.capacity()
    }

    /// Momentary count of idle handles. May be stale by the time it is read.
    pub fn idle_count(&self) -> usize {
        self.idle.len()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add `handle` unless the pool is full or closed. A rejected handle is
    /// handed back so the caller can dispose of it.
    pub fn try_add(&self, handle: I) -> Result<(), I> {
        let closed = self.closed.lock().unwrap_or_else(PoisonError::into_inner);
        if *closed {
            return Err(handle);
        }
        self.idle.push(handle)?;
        self.available.add_permits(1);
        Ok(())
    }

    /// Wait for an idle handle and take it.
    ///
    /// Fails once the pool has been drained; waiters blocked at that moment
    /// are woken with the same error.
    pub async fn borrow(&self) -> Result<I, PoolClosed> {
        let permit = self.available.acquire().await.map_err(|_| PoolClosed)?;
        permit.forget();
        // A drain racing with this borrow may have taken the handle.
        self.idle.pop().ok_or(PoolClosed)
    }

    /// Close the pool and take every idle handle.
    ///
    /// Nothing can be added afterwards. A second call returns nothing.
    pub fn drain_all(&self) -> Vec<I> {
        let mut closed = self.closed.lock().unwrap_or_else(PoisonError::into_inner);
        *closed = true;
        self.available.close();

        let mut drained = Vec::with_capacity(self.idle.len());
        while let Some(handle) = self.idle.pop() {
            drained.push(handle);
        }
        drained
    }
}

/// Terminate `instance`, logging failure.
pub(crate) async fn terminate_logged<P: Provisioner>(provisioner: &P, instance: P::Instance) {
    let description = format!("{:?}", instance);
    match provisioner.terminate(instance).await {
        Ok(()) => tracing::debug!(instance = %description, "instance terminated"),
        Err(err) => {
            tracing::warn!(instance = %description, error = %err, "failed to terminate instance")
        }
    }
}

/// An instance borrowed for one query.
///
/// The instance is never returned to the pool: [`finish`](Lease::finish)
/// terminates it, and dropping an unfinished lease terminates it on a spawned
/// task.
pub struct Lease<P: Provisioner> {
    provisioner: Arc<P>,
    instance: ManuallyDrop<P::Instance>,
}

impl<P: Provisioner> Lease<P> {
    pub(crate) fn new(provisioner: Arc<P>, instance: P::Instance) -> Self {
        Self {
            provisioner,
            instance: ManuallyDrop::new(instance),
        }
    }

    /// Terminate the instance and wait for it to be gone.
    pub async fn finish(self) {
        let mut this = ManuallyDrop::new(self);
        // SAFETY: `this` is never dropped, so the Arc is moved out exactly once.
        let provisioner = unsafe { std::ptr::read(&this.provisioner) };
        // SAFETY: as above; Drop never runs to take the instance a second time.
        let instance = unsafe { ManuallyDrop::take(&mut this.instance) };
        terminate_logged(&*provisioner, instance).await;
    }
}

impl<P: Provisioner> Deref for Lease<P> {
    type Target = P::Instance;
    fn deref(&self) -> &Self::Target {
        &self.instance
    }
}

impl<P: Provisioner> Drop for Lease<P> {
    fn drop(&mut self) {
        // SAFETY: instance is never accessed after this
        let instance = unsafe { ManuallyDrop::take(&mut self.instance) };
        let provisioner = Arc::clone(&self.provisioner);
        tracing::debug!(instance = ?instance, "lease dropped before finishing, terminating in background");
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    terminate_logged(&*provisioner, instance).await;
                });
            }
            Err(_) => {
                tracing::error!(instance = ?instance, "no runtime to terminate dropped lease");
            }
        }
    }
}
