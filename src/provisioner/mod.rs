//! Creation and teardown of disposable database instances.

mod docker;

use std::fmt;
use std::future::Future;

use crate::error::InstanceError;
use crate::opts::Opts;

pub use docker::{Container, DockerOptions, DockerProvisioner};

/// Creates isolated, ready-to-query database instances and tears them down.
///
/// Provisioning is slow (seconds) compared to everything the pool does with
/// an instance once it exists.
pub trait Provisioner: Send + Sync + 'static {
    /// Handle to one running instance. Owning it means owning the instance.
    type Instance: fmt::Debug + Send + Sync + 'static;

    /// Start a new instance and wait until it accepts connections.
    fn provision(&self) -> impl Future<Output = Result<Self::Instance, InstanceError>> + Send;

    /// Connection options for `instance`, resolved on demand.
    fn endpoint(
        &self,
        instance: &Self::Instance,
    ) -> impl Future<Output = Result<Opts, InstanceError>> + Send;

    /// Destroy `instance` and everything it stored.
    fn terminate(
        &self,
        instance: Self::Instance,
    ) -> impl Future<Output = Result<(), InstanceError>> + Send;
}
