//! Provider for `ingress` resources.
//!
//! An ingress is a `socat` container that listens on the target port and
//! forwards every connection to the target's address on the container
//! networks. The listening port is published on the host as `local_port`.

use std::sync::Arc;

use berth_common::constants;
use berth_common::error::{BerthError, Result};
use berth_common::types::{Reference, ResourceType};
use berth_graph::resource::{ContainerConfig, Image, IngressConfig, Port, Resource};
use tracing::info;

use super::ProviderContext;
use crate::tasks::ContainerRequest;

/// Returns the host an ingress forwards to.
///
/// Clusters are reached through their server container; any other target
/// through its own FQDN. An explicit `service` wins.
///
/// # Errors
///
/// Returns [`BerthError::InvalidReference`] if `target` is malformed.
pub fn target_host(config: &IngressConfig) -> Result<String> {
    if let Some(service) = &config.service {
        return Ok(service.clone());
    }
    let target: Reference = config.target.parse()?;
    let fqdn = constants::fqdn(target.name(), target.resource_type().as_str());
    Ok(match target.resource_type() {
        ResourceType::K8sCluster | ResourceType::NomadCluster => format!("server.{fqdn}"),
        _ => fqdn,
    })
}

/// Forwards a host port to another resource.
#[derive(Debug)]
pub struct IngressProvider {
    resource: Arc<Resource>,
    config: IngressConfig,
    context: ProviderContext,
}

impl IngressProvider {
    /// Creates the provider.
    #[must_use]
    pub const fn new(resource: Arc<Resource>, config: IngressConfig, context: ProviderContext) -> Self {
        Self {
            resource,
            config,
            context,
        }
    }

    fn reference(&self) -> String {
        self.resource.reference().to_string()
    }

    fn proxy_config(&self, host: &str) -> ContainerConfig {
        let port = self.config.port;
        ContainerConfig {
            image: Image::new(constants::INGRESS_IMAGE),
            networks: self.config.networks.clone(),
            command: vec![
                format!("TCP-LISTEN:{port},fork,reuseaddr"),
                format!("TCP:{host}:{port}"),
            ],
            ports: vec![Port::published(port, self.config.local_port)],
            ..ContainerConfig::default()
        }
    }

    /// Starts the proxy container.
    ///
    /// # Errors
    ///
    /// Returns a provider error if the target is invalid or the container
    /// cannot be started.
    pub async fn create(&self) -> Result<()> {
        let reference = self.reference();
        let host = target_host(&self.config)
            .map_err(|e| BerthError::provider(reference.as_str(), "validate", e))?;
        let request = ContainerRequest::for_resource(&self.resource, self.proxy_config(&host));
        let _ = self.context.tasks.create_container(&request).await?;
        info!(
            reference = %reference,
            target = %host,
            port = self.config.port,
            local_port = self.config.local_port,
            "ingress forwarding"
        );
        Ok(())
    }

    /// Removes the proxy container.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup or removal fails.
    pub async fn destroy(&self) -> Result<()> {
        self.context
            .remove_containers(&self.reference(), &[self.resource.fqdn()])
            .await
    }

    /// Returns the IDs of the proxy container.
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
