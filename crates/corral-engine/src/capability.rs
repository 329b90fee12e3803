//! The engine capability trait.
//!
//! This is the seam between the reconciliation core and the container
//! engine: the core depends on this trait only, so tests can substitute a
//! scripted engine and the daemon can wire in [`crate::DockerEngine`].

use crate::error::Result;
use crate::types::{ContainerInspect, ContainerSummary, CreateContainer, ExecInspect};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::AsyncRead;

/// Byte stream of an attached exec session.
///
/// The stream stays open until the command inside the container exits.
/// Read deadlines are applied by the caller, which is the only party that
/// knows the probe budget.
pub type ExecStream = Box<dyn AsyncRead + Send + Unpin>;

/// Narrow adapter over the container engine's API.
///
/// Every operation takes effect against the engine daemon asynchronously;
/// callers treat [`crate::EngineError::NotFound`] and
/// [`crate::EngineError::Conflict`] as sentinels and everything else as a
/// transient failure to be retried on the next reconciliation tick.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Lists containers; `all` includes stopped ones.
    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerSummary>>;

    /// Inspects a container by name or id.
    async fn inspect_container(&self, name: &str) -> Result<ContainerInspect>;

    /// Pulls an image, discarding the progress stream. `auth` is a
    /// pre-encoded registry auth payload.
    async fn pull_image(&self, image: &str, auth: Option<&str>) -> Result<()>;

    /// Creates a container and returns its id.
    async fn create_container(&self, name: &str, spec: CreateContainer) -> Result<String>;

    /// Starts a created or stopped container.
    async fn start_container(&self, id: &str) -> Result<()>;

    /// Stops a container. `timeout` overrides the container's own stop
    /// timeout; `None` keeps the one set at create time.
    async fn stop_container(&self, name: &str, timeout: Option<Duration>) -> Result<()>;

    /// Removes a container.
    async fn remove_container(&self, name: &str, force: bool) -> Result<()>;

    /// Disconnects a container from a network.
    async fn network_disconnect(&self, network: &str, container_id: &str, force: bool)
        -> Result<()>;

    /// Creates an exec session inside a running container.
    async fn exec_create(&self, name: &str, cmd: &[String]) -> Result<String>;

    /// Attaches to an exec session's output.
    async fn exec_attach(&self, exec_id: &str) -> Result<ExecStream>;

    /// Reports whether an exec session is running and its exit code.
    async fn exec_inspect(&self, exec_id: &str) -> Result<ExecInspect>;
}
