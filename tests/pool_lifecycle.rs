//! Pool replenishment, borrowing and shutdown.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use common::{FakeBackend, FakeProvisioner, eventually};
use pg_sandbox::{ExecStage, PoolClosed, PoolConfig, PoolManager};
use tokio::task::JoinSet;

const WAIT: Duration = Duration::from_secs(5);

fn config(capacity: usize) -> PoolConfig {
    PoolConfig {
        capacity,
        poll_interval: Duration::from_millis(5),
    }
}

#[tokio::test]
async fn fills_to_capacity_and_no_further() {
    let provisioner = FakeProvisioner::new(None);
    let manager = PoolManager::start(provisioner.clone(), config(3));
    assert_eq!(manager.capacity(), 3);

    eventually(WAIT, || manager.idle_count() == 3).await;
    for _ in 0..20 {
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(manager.idle_count() <= 3);
    }
    assert_eq!(provisioner.provisioned(), 3);

    assert_eq!(manager.shutdown().await, 3);
    provisioner.assert_terminated_once();
    assert_eq!(provisioner.terminated().len(), 3);
}

#[tokio::test]
async fn zero_capacity_is_raised_to_one() {
    let manager = PoolManager::start(FakeProvisioner::new(None), config(0));
    assert_eq!(manager.capacity(), 1);
    manager.shutdown().await;
}

#[tokio::test]
async fn second_query_waits_for_replacement() {
    let backend = FakeBackend::start().await;
    let provisioner =
        FakeProvisioner::new(Some(backend.opts())).with_delay(Duration::from_millis(30));
    let manager = PoolManager::start(provisioner.clone(), config(1));

    let first = manager.execute_query("SELECT 1").await.unwrap();
    assert_eq!(provisioner.resolved(), [0]);
    // Gone before the next query can borrow anything.
    assert_eq!(provisioner.terminated(), [0]);

    let second = manager.execute_query("SELECT 1").await.unwrap();
    assert_eq!(first, second);
    assert_eq!(provisioner.resolved(), [0, 1]);
    assert_eq!(provisioner.terminated(), [0, 1]);

    manager.shutdown().await;
    provisioner.assert_terminated_once();
}

#[tokio::test]
async fn query_blocks_while_provisioning_fails() {
    let backend = FakeBackend::start().await;
    let provisioner = FakeProvisioner::new(Some(backend.opts())).failing();
    let manager = Arc::new(PoolManager::start(provisioner.clone(), config(1)));

    let query = tokio::spawn({
        let manager = Arc::clone(&manager);
        async move { manager.execute_query("SELECT 1").await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!query.is_finished());
    assert_eq!(manager.idle_count(), 0);

    // Provisioning recovers and the waiting query goes through.
    provisioner.set_failing(false);
    let result = tokio::time::timeout(WAIT, query).await.unwrap().unwrap();
    assert_eq!(result.unwrap().rows(), [vec!["1".to_string()]]);

    manager.shutdown().await;
}

#[tokio::test]
async fn shutdown_terminates_idle_but_not_borrowed() {
    let provisioner = FakeProvisioner::new(None);
    let manager = PoolManager::start(provisioner.clone(), config(4));
    eventually(WAIT, || manager.idle_count() == 4).await;

    // Keep the pool at three idle instances once one is borrowed.
    provisioner.set_failing(true);
    let lease = manager.borrow().await.unwrap();
    let borrowed = lease.id;
    assert_eq!(manager.idle_count(), 3);

    assert_eq!(manager.shutdown().await, 3);
    assert!(manager.is_shutting_down());
    assert_eq!(provisioner.terminated().len(), 3);
    assert!(!provisioner.terminated().contains(&borrowed));

    // The in-flight borrower still owns its instance and disposes of it.
    lease.finish().await;
    assert!(provisioner.terminated().contains(&borrowed));
    assert_eq!(provisioner.terminated().len(), 4);
    provisioner.assert_terminated_once();
}

#[tokio::test]
async fn shutdown_discards_instance_provisioned_during_shutdown() {
    let provisioner = FakeProvisioner::new(None).with_delay(Duration::from_millis(100));
    let manager = PoolManager::start(provisioner.clone(), config(1));

    // Let the replenisher get into its first provision.
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(manager.shutdown().await, 0);

    assert_eq!(manager.idle_count(), 0);
    assert_eq!(provisioner.terminated().len(), provisioner.provisioned());
    provisioner.assert_terminated_once();
}

#[tokio::test]
async fn second_shutdown_is_ignored() {
    let provisioner = FakeProvisioner::new(None);
    let manager = PoolManager::start(provisioner.clone(), config(2));
    eventually(WAIT, || manager.idle_count() == 2).await;

    assert_eq!(manager.shutdown().await, 2);
    assert_eq!(manager.shutdown().await, 0);
    assert_eq!(provisioner.terminated().len(), 2);
}

#[tokio::test]
async fn borrowing_after_shutdown_fails() {
    let provisioner = FakeProvisioner::new(None);
    let manager = PoolManager::start(provisioner.clone(), config(2));
    manager.shutdown().await;

    assert!(matches!(manager.borrow().await, Err(PoolClosed)));
    let err = manager.execute_query("SELECT 1").await.unwrap_err();
    assert_eq!(err.stage(), ExecStage::Unavailable);
}

#[tokio::test]
async fn waiting_borrower_is_released_by_shutdown() {
    let provisioner = FakeProvisioner::new(None).failing();
    let manager = Arc::new(PoolManager::start(provisioner.clone(), config(1)));

    let waiter = tokio::spawn({
        let manager = Arc::clone(&manager);
        async move { manager.execute_query("SELECT 1").await }
    });
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(!waiter.is_finished());

    manager.shutdown().await;
    let err = tokio::time::timeout(WAIT, waiter)
        .await
        .unwrap()
        .unwrap()
        .unwrap_err();
    assert_eq!(err.stage(), ExecStage::Unavailable);
}

#[tokio::test]
async fn dropped_lease_is_terminated() {
    let provisioner = FakeProvisioner::new(None);
    let manager = PoolManager::start(provisioner.clone(), config(1));

    let lease = manager.borrow().await.unwrap();
    let id = lease.id;
    drop(lease);

    eventually(WAIT, || provisioner.terminated().contains(&id)).await;
    manager.shutdown().await;
    provisioner.assert_terminated_once();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_queries_never_share_an_instance() {
    let backend = FakeBackend::start().await;
    let provisioner = FakeProvisioner::new(Some(backend.opts()));
    let manager = Arc::new(PoolManager::start(provisioner.clone(), config(2)));

    let done = Arc::new(AtomicBool::new(false));
    let sampler = tokio::spawn({
        let manager = Arc::clone(&manager);
        let done = Arc::clone(&done);
        async move {
            let mut max_idle = 0;
            while !done.load(Ordering::SeqCst) {
                max_idle = max_idle.max(manager.idle_count());
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            max_idle
        }
    });

    let mut queries = JoinSet::new();
    for _ in 0..8 {
        let manager = Arc::clone(&manager);
        queries.spawn(async move { manager.execute_query("SELECT 1").await });
    }
    while let Some(joined) = queries.join_next().await {
        assert_eq!(joined.unwrap().unwrap().rows(), [vec!["1".to_string()]]);
    }
    done.store(true, Ordering::SeqCst);
    assert!(sampler.await.unwrap() <= 2);

    let resolved = provisioner.resolved();
    assert_eq!(resolved.len(), 8);
    assert_eq!(resolved.iter().collect::<HashSet<_>>().len(), 8);
    assert_eq!(provisioner.terminated().len(), 8);
    provisioner.assert_terminated_once();

    manager.shutdown().await;
    provisioner.assert_terminated_once();
    assert_eq!(provisioner.terminated().len(), provisioner.provisioned());
}
