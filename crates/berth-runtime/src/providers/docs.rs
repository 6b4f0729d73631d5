//! Provider for `docs` resources: a static site served from a local path.

use std::sync::Arc;

use berth_common::constants;
use berth_common::error::{BerthError, Result};
use berth_graph::resource::{ContainerConfig, DocsConfig, Image, Port, Resource, Volume};

use super::ProviderContext;
use crate::tasks::ContainerRequest;

const SITE_ROOT: &str = "/usr/share/nginx/html";
const SITE_PORT: u16 = 80;

/// Serves a documentation site.
#[derive(Debug)]
pub struct DocsProvider {
    resource: Arc<Resource>,
    config: DocsConfig,
    context: ProviderContext,
}

impl DocsProvider {
    /// Creates the provider.
    #[must_use]
    pub const fn new(resource: Arc<Resource>, config: DocsConfig, context: ProviderContext) -> Self {
        Self {
            resource,
            config,
            context,
        }
    }

    fn reference(&self) -> String {
        self.resource.reference().to_string()
    }

    fn site_config(&self) -> ContainerConfig {
        ContainerConfig {
            image: self
                .config
                .image
                .clone()
                .unwrap_or_else(|| Image::new(constants::DOCS_IMAGE)),
            networks: self.config.networks.clone(),
            volumes: vec![Volume {
                source: self.config.path.display().to_string(),
                destination: SITE_ROOT.to_string(),
                read_only: true,
                ..Volume::default()
            }],
            ports: vec![Port::published(SITE_PORT, self.config.port)],
            ..ContainerConfig::default()
        }
    }

    /// Starts the site container.
    ///
    /// # Errors
    ///
    /// Returns a provider error if the site directory is missing or the
    /// container cannot be started.
    pub async fn create(&self) -> Result<()> {
        if !self.config.path.is_dir() {
            return Err(BerthError::provider(
                self.reference(),
                "validate",
                BerthError::NotFound {
                    kind: "directory",
                    id: self.config.path.display().to_string(),
                },
            ));
        }
        let request = ContainerRequest::for_resource(&self.resource, self.site_config());
        let _ = self.context.tasks.create_container(&request).await?;
        tracing::info!(reference = %self.reference(), port = self.config.port, "docs served");
        Ok(())
    }

    /// Removes the site container.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup or removal fails.
    pub async fn destroy(&self) -> Result<()> {
        self.context
            .remove_containers(&self.reference(), &[self.resource.fqdn()])
            .await
    }

    /// Returns the IDs of the site container.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    pub async fn lookup(&self) -> Result<Vec<String>> {
        self.context
            .container_ids(&self.reference(), &self.resource.fqdn())
            .await
    }
}
