//! Runs against a local Docker daemon. `cargo test -- --ignored` to include.

use std::time::Duration;

use pg_sandbox::{
    DockerOptions, DockerProvisioner, ExecStage, PoolConfig, PoolManager, Provisioner,
};

fn provisioner() -> DockerProvisioner {
    DockerProvisioner::new(DockerOptions {
        init_script: Some(concat!(env!("CARGO_MANIFEST_DIR"), "/init-script.sql").into()),
        ..DockerOptions::default()
    })
}

#[tokio::test]
#[ignore = "requires docker"]
async fn container_lifecycle() {
    let provisioner = provisioner();
    let container = provisioner.provision().await.unwrap();
    assert!(!container.id().is_empty());

    let opts = provisioner.endpoint(&container).await.unwrap();
    assert_eq!(opts.host, "127.0.0.1");
    assert_ne!(opts.port, 5432);

    provisioner.terminate(container).await.unwrap();
}

#[tokio::test]
#[ignore = "requires docker"]
async fn queries_see_seeded_data_and_not_each_other() {
    let manager = PoolManager::start(
        provisioner(),
        PoolConfig {
            capacity: 2,
            poll_interval: Duration::from_millis(100),
        },
    );

    let result = manager.execute_query("SELECT * FROM testdb").await.unwrap();
    assert_eq!(result.columns(), ["id", "name"]);
    assert!(!result.rows().is_empty());

    manager
        .execute_query("DROP TABLE testdb")
        .await
        .unwrap();
    // The drop happened on a container that no longer exists.
    let again = manager.execute_query("SELECT * FROM testdb").await.unwrap();
    assert_eq!(again.rows(), result.rows());

    let err = manager.execute_query("SELEC 1").await.unwrap_err();
    assert_eq!(err.stage(), ExecStage::Statement);
    assert_eq!(err.code(), Some("42601"));

    manager.shutdown().await;
}
