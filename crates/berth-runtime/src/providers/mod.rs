//! Providers create, destroy, and look up the runtime objects of a resource.
//!
//! The set of providers is closed: [`Provider`] has one variant per resource
//! type and [`ProviderFactory`] picks the variant from the resource.

pub mod container;
pub mod docs;
pub mod helm;
pub mod ingress;
pub mod k8s_cluster;
pub mod network;
pub mod nomad_cluster;

use std::sync::Arc;

use berth_common::config::BerthConfig;
use berth_common::error::{BerthError, Result};
use berth_common::types::ContainerId;
use berth_graph::resource::{Resource, ResourceKind};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::engine::ContainerEngine;
use crate::helm::Helm;
use crate::kubernetes::KubernetesConnector;
use crate::nomad::NomadApi;
use crate::retry::PollPolicy;
use crate::tasks::ContainerTasks;

pub use container::ContainerProvider;
pub use docs::DocsProvider;
pub use helm::HelmProvider;
pub use ingress::IngressProvider;
pub use k8s_cluster::K8sClusterProvider;
pub use network::NetworkProvider;
pub use nomad_cluster::NomadClusterProvider;

/// Clients and settings shared by every provider.
#[derive(Clone)]
pub struct ProviderContext {
    /// Container operations.
    pub tasks: ContainerTasks,
    /// Kubernetes client factory.
    pub kubernetes: Arc<dyn KubernetesConnector>,
    /// Helm client.
    pub helm: Arc<dyn Helm>,
    /// Nomad API client.
    pub nomad: Arc<dyn NomadApi>,
    /// Global configuration.
    pub config: Arc<BerthConfig>,
    /// Cancels in-flight polls.
    pub cancel: CancellationToken,
}

impl std::fmt::Debug for ProviderContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderContext")
            .field("config", &self.config)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl ProviderContext {
    /// Creates a context.
    #[must_use]
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        kubernetes: Arc<dyn KubernetesConnector>,
        helm: Arc<dyn Helm>,
        nomad: Arc<dyn NomadApi>,
        config: Arc<BerthConfig>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            tasks: ContainerTasks::new(engine, Arc::clone(&config)),
            kubernetes,
            helm,
            nomad,
            config,
            cancel,
        }
    }

    /// Returns the underlying engine.
    #[must_use]
    pub fn engine(&self) -> &Arc<dyn ContainerEngine> {
        self.tasks.engine()
    }

    /// Returns the readiness policy from the configuration.
    #[must_use]
    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy::from_config(&self.config)
    }

    /// Returns the host clients on the engine side use to reach published
    /// ports.
    #[must_use]
    pub fn published_host(&self) -> String {
        self.config
            .remote_engine_host()
            .unwrap_or_else(|| "127.0.0.1".to_string())
    }

    /// Removes every container labelled with one of `fqdns`.
    ///
    /// # Errors
    ///
    /// A failed lookup aborts before anything is removed. Containers that
    /// are already gone are skipped.
    pub(crate) async fn remove_containers(&self, reference: &str, fqdns: &[String]) -> Result<()> {
        let mut ids: Vec<ContainerId> = Vec::new();
        for fqdn in fqdns {
            ids.extend(
                self.tasks
                    .find_containers(fqdn)
                    .await
                    .map_err(|e| BerthError::provider(reference, "lookup", e))?,
            );
        }
        if ids.is_empty() {
            warn!(reference, "no containers to remove");
            return Ok(());
        }
        for id in &ids {
            self.tasks
                .remove_container(id)
                .await
                .map_err(|e| BerthError::provider(reference, "container remove", e))?;
        }
        Ok(())
    }

    /// Returns the IDs of containers labelled with `fqdn`.
    pub(crate) async fn container_ids(&self, reference: &str, fqdn: &str) -> Result<Vec<String>> {
        Ok(self
            .tasks
            .find_containers(fqdn)
            .await
            .map_err(|e| BerthError::provider(reference, "lookup", e))?
            .into_iter()
            .map(|id| id.to_string())
            .collect())
    }
}

/// The provider of one resource.
#[derive(Debug)]
pub enum Provider {
    /// Networks.
    Network(NetworkProvider),
    /// Containers.
    Container(ContainerProvider),
    /// k3s clusters.
    K8sCluster(K8sClusterProvider),
    /// Nomad clusters.
    NomadCluster(NomadClusterProvider),
    /// Helm releases.
    Helm(HelmProvider),
    /// Ingress proxies.
    Ingress(IngressProvider),
    /// Documentation sites.
    Docs(DocsProvider),
}

impl Provider {
    /// Creates the runtime objects of the resource.
    ///
    /// # Errors
    ///
    /// Returns an error naming the resource and the failed step.
    pub async fn create(&self) -> Result<()> {
        match self {
            Self::Network(p) => p.create().await,
            Self::Container(p) => p.create().await,
            Self::K8sCluster(p) => p.create().await,
            Self::NomadCluster(p) => p.create().await,
            Self::Helm(p) => p.create().await,
            Self::Ingress(p) => p.create().await,
            Self::Docs(p) => p.create().await,
        }
    }

    /// Removes the runtime objects of the resource; absent objects are
    /// skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if a lookup or removal fails.
    pub async fn destroy(&self) -> Result<()> {
        match self {
            Self::Network(p) => p.destroy().await,
            Self::Container(p) => p.destroy().await,
            Self::K8sCluster(p) => p.destroy().await,
            Self::NomadCluster(p) => p.destroy().await,
            Self::Helm(p) => p.destroy().await,
            Self::Ingress(p) => p.destroy().await,
            Self::Docs(p) => p.destroy().await,
        }
    }

    /// Returns the identifiers of the runtime objects backing the resource.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    pub async fn lookup(&self) -> Result<Vec<String>> {
        match self {
            Self::Network(p) => p.lookup().await,
            Self::Container(p) => p.lookup().await,
            Self::K8sCluster(p) => p.lookup().await,
            Self::NomadCluster(p) => p.lookup().await,
            Self::Helm(p) => p.lookup().await,
            Self::Ingress(p) => p.lookup().await,
            Self::Docs(p) => p.lookup().await,
        }
    }
}

/// Builds the provider for a resource.
#[derive(Debug, Clone)]
pub struct ProviderFactory {
    context: ProviderContext,
}

impl ProviderFactory {
    /// Creates a factory over a shared context.
    #[must_use]
    pub const fn new(context: ProviderContext) -> Self {
        Self { context }
    }

    /// Returns the shared context.
    #[must_use]
    pub const fn context(&self) -> &ProviderContext {
        &self.context
    }

    /// Returns the provider for `resource`.
    #[must_use]
    pub fn provider(&self, resource: Arc<Resource>) -> Provider {
        let context = self.context.clone();
        match resource.kind().clone() {
            ResourceKind::Network(config) => {
                Provider::Network(NetworkProvider::new(resource, config, context))
            }
            ResourceKind::Container(config) => {
                Provider::Container(ContainerProvider::new(resource, config, context))
            }
            ResourceKind::K8sCluster(config) => {
                Provider::K8sCluster(K8sClusterProvider::new(resource, config, context))
            }
            ResourceKind::NomadCluster(config) => {
                Provider::NomadCluster(NomadClusterProvider::new(resource, config, context))
            }
            ResourceKind::Helm(config) => Provider::Helm(HelmProvider::new(resource, config, context)),
            ResourceKind::Ingress(config) => {
                Provider::Ingress(IngressProvider::new(resource, config, context))
            }
            ResourceKind::Docs(config) => Provider::Docs(DocsProvider::new(resource, config, context)),
        }
    }
}
