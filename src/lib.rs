//! A pool of disposable PostgreSQL instances, one per query.
//!
//! [`PoolManager`] keeps a fixed number of freshly seeded instances warm in
//! the background. Each query borrows one, runs against it over an in-crate
//! sans-I/O protocol client, and the instance is destroyed afterwards, so no
//! query ever sees another query's writes.
//!
//! # Example
//!
//! ```no_run
//! use pg_sandbox::{DockerOptions, DockerProvisioner, PoolConfig, PoolManager};
//!
//! # async fn run() {
//! let provisioner = DockerProvisioner::new(DockerOptions::default());
//! let manager = PoolManager::start(provisioner, PoolConfig::default());
//!
//! match manager.execute_query("SELECT * FROM testdb").await {
//!     Ok(result) => println!("{:?}", result.into_rows()),
//!     Err(err) => eprintln!("{err}"),
//! }
//!
//! manager.shutdown().await;
//! # }
//! ```

pub mod buffer_set;
pub mod client;
pub mod error;
mod executor;
pub mod handler;
#[cfg(feature = "server")]
pub mod http;
pub mod manager;
pub mod opts;
pub mod pool;
pub mod protocol;
pub mod provisioner;
mod replenisher;
pub mod result;
pub mod settings;
pub mod signal;
pub mod state;

pub use buffer_set::BufferSet;
pub use client::Conn;
pub use error::{Error, ErrorFields, ExecError, ExecStage, InstanceError, PoolClosed, Result};
pub use handler::{RowHandler, TextCollector};
pub use manager::{PoolConfig, PoolManager};
pub use opts::{Opts, SslMode};
pub use pool::{Lease, Pool};
pub use provisioner::{Container, DockerOptions, DockerProvisioner, Provisioner};
pub use result::{NULL_MARKER, QueryResult};
pub use settings::Settings;
pub use signal::ShutdownSignal;
pub use state::PreparedStatement;
