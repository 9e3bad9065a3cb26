//! Background task keeping the pool topped up.

use std::sync::Arc;
use std::time::Duration;

use crate::pool::{Pool, terminate_logged};
use crate::provisioner::Provisioner;
use crate::signal::ShutdownSignal;

/// Provision instances until the pool holds `capacity` idle ones, polling
/// every `poll_interval`, until `signal` fires.
///
/// Only one instance is provisioned at a time, so in-flight provisioning never
/// overshoots the capacity. Provisioning failures are logged and retried on
/// the next tick.
pub(crate) async fn run<P: Provisioner>(
    provisioner: Arc<P>,
    pool: Arc<Pool<P::Instance>>,
    signal: Arc<ShutdownSignal>,
    poll_interval: Duration,
) {
    let capacity = pool.capacity();
    tracing::debug!(capacity, ?poll_interval, "replenisher started");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(poll_interval) => {}
            _ = signal.triggered() => {}
        }
        if signal.is_triggered() {
            break;
        }
        if pool.idle_count() >= capacity {
            continue;
        }

        let instance = match provisioner.provision().await {
            Ok(instance) => instance,
            Err(err) => {
                tracing::warn!(error = %err, "failed to provision instance");
                continue;
            }
        };

        if signal.is_triggered() {
            tracing::debug!(instance = ?instance, "shutdown began during provisioning, discarding");
            terminate_logged(&*provisioner, instance).await;
            break;
        }

        match pool.try_add(instance) {
            Ok(()) => tracing::info!(idle = pool.idle_count(), capacity, "instance added to pool"),
            Err(instance) => {
                tracing::debug!(instance = ?instance, "pool rejected instance, discarding");
                terminate_logged(&*provisioner, instance).await;
            }
        }
    }

    tracing::debug!("replenisher stopped");
}
