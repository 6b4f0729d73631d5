//! Provider for `container` resources.

use std::sync::Arc;

use berth_common::error::Result;
use berth_graph::resource::{ContainerConfig, Resource};
use tracing::info;

use super::ProviderContext;
use crate::tasks::ContainerRequest;

/// Runs a single declared container.
#[derive(Debug)]
pub struct ContainerProvider {
    resource: Arc<Resource>,
    config: ContainerConfig,
    context: ProviderContext,
}

impl ContainerProvider {
    /// Creates the provider.
    #[must_use]
    pub const fn new(resource: Arc<Resource>, config: ContainerConfig, context: ProviderContext) -> Self {
        Self {
            resource,
            config,
            context,
        }
    }

    /// Creates and starts the container.
    ///
    /// # Errors
    ///
    /// Returns the failed step; the container is rolled back on attach or
    /// start failure.
    pub async fn create(&self) -> Result<()> {
        let request = ContainerRequest::for_resource(&self.resource, self.config.clone());
        let id = self.context.tasks.create_container(&request).await?;
        info!(reference = %self.resource.reference(), id = %id, "created container");
        Ok(())
    }

    /// Removes the container if it exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup or removal fails.
    pub async fn destroy(&self) -> Result<()> {
        info!(reference = %self.resource.reference(), "destroying container");
        self.context
            .remove_containers(&self.resource.reference().to_string(), &[self.resource.fqdn()])
            .await
    }

    /// Returns the IDs of the container.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    pub async fn lookup(&self) -> Result<Vec<String>> {
        self.context
            .container_ids(&self.resource.reference().to_string(), &self.resource.fqdn())
            .await
    }
}
