//! Container engine abstraction.
//!
//! Providers talk to the engine only through [`ContainerEngine`], so the
//! same provider code runs against the Docker daemon or a recording mock.

pub mod docker;

use std::collections::HashMap;

use async_trait::async_trait;
use berth_common::error::Result;
use berth_common::types::ContainerId;
use tracing::warn;
use berth_graph::resource::Image;
use bollard::container::Config;

pub use docker::DockerEngine;

/// Output from a command executed inside a container.
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    /// Standard output from the command.
    pub stdout: String,
    /// Standard error from the command.
    pub stderr: String,
    /// Exit code returned by the command.
    pub exit_code: i64,
}

impl ExecOutput {
    /// Returns whether the command exited with status zero.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Operations berth needs from a container engine.
///
/// Every method that addresses an existing object reports a missing object
/// as [`berth_common::error::BerthError::NotFound`].
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Returns whether an image is present in the local cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot be queried.
    async fn image_exists(&self, image: &str) -> Result<bool>;

    /// Pulls an image, using its credentials when set.
    ///
    /// # Errors
    ///
    /// Returns an error if the pull fails.
    async fn pull_image(&self, image: &Image) -> Result<()>;

    /// Creates a container detached from every network.
    ///
    /// # Errors
    ///
    /// Returns an error if the container cannot be created.
    async fn create_container(&self, name: &str, config: Config<String>) -> Result<ContainerId>;

    /// Attaches a container to a network.
    ///
    /// # Errors
    ///
    /// Returns an error if the network or container is missing or the
    /// address is unavailable.
    async fn connect_network(
        &self,
        id: &ContainerId,
        network: &str,
        ip_address: Option<&str>,
        aliases: &[String],
    ) -> Result<()>;

    /// Starts a created container.
    ///
    /// # Errors
    ///
    /// Returns an error if the container cannot be started.
    async fn start_container(&self, id: &ContainerId) -> Result<()>;

    /// Force-removes a container and its anonymous volumes.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the container does not exist.
    async fn remove_container(&self, id: &ContainerId) -> Result<()>;

    /// Lists running and stopped containers labelled with `fqdn`.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot be queried.
    async fn find_containers(&self, fqdn: &str) -> Result<Vec<ContainerId>>;

    /// Returns the combined stdout and stderr log of a container.
    ///
    /// # Errors
    ///
    /// Returns an error if the logs cannot be read.
    async fn container_logs(&self, id: &ContainerId) -> Result<String>;

    /// Reads a single file out of a container.
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist or cannot be read.
    async fn copy_from_container(&self, id: &ContainerId, path: &str) -> Result<Vec<u8>>;

    /// Creates a named volume, reusing it when it already exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the volume cannot be created.
    async fn create_volume(&self, name: &str) -> Result<String>;

    /// Creates a bridge network with the given subnet and labels.
    ///
    /// # Errors
    ///
    /// Returns an error if the network cannot be created.
    async fn create_network(
        &self,
        name: &str,
        subnet: &str,
        labels: HashMap<String, String>,
    ) -> Result<String>;

    /// Returns the IDs of networks named exactly `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot be queried.
    async fn find_networks(&self, name: &str) -> Result<Vec<String>>;

    /// Removes a network.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the network does not exist.
    async fn remove_network(&self, id: &str) -> Result<()>;

    /// Exports cached images into `volume` as one archive.
    ///
    /// Returns the archive paths as seen from a container mounting the
    /// volume at the images mount point.
    ///
    /// # Errors
    ///
    /// Returns an error if export, staging, or upload fails.
    async fn copy_images_to_volume(&self, images: &[String], volume: &str) -> Result<Vec<String>>;

    /// Runs a command inside a running container and waits for it.
    ///
    /// # Errors
    ///
    /// Returns an error if the command cannot be started.
    async fn exec(&self, id: &ContainerId, command: &[String]) -> Result<ExecOutput>;
}

/// Starts a freshly created container, removing it when the start fails.
///
/// # Errors
///
/// Returns the start error; a failed removal is only logged.
pub async fn start_or_remove(engine: &dyn ContainerEngine, id: &ContainerId) -> Result<()> {
    let Err(e) = engine.start_container(id).await else {
        return Ok(());
    };
    if let Err(cleanup) = engine.remove_container(id).await {
        warn!(id = %id, error = %cleanup, "could not remove container after failed start");
    }
    Err(e)
}
