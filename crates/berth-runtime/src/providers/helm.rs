//! Provider for `helm` resources.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use berth_common::error::{BerthError, Result};
use berth_common::types::{Reference, ResourceType};
use berth_graph::resource::{HelmConfig, Resource};
use tracing::{info, warn};

use super::ProviderContext;
use crate::helm::HelmRelease;
use crate::kubeconfig::KubeconfigPaths;
use crate::kubernetes::health_check_pods;

/// Installs a chart into a k3s cluster.
#[derive(Debug)]
pub struct HelmProvider {
    resource: Arc<Resource>,
    config: HelmConfig,
    context: ProviderContext,
}

impl HelmProvider {
    /// Creates the provider.
    #[must_use]
    pub const fn new(resource: Arc<Resource>, config: HelmConfig, context: ProviderContext) -> Self {
        Self {
            resource,
            config,
            context,
        }
    }

    fn reference(&self) -> String {
        self.resource.reference().to_string()
    }

    fn kubeconfig(&self) -> Result<PathBuf> {
        let cluster: Reference = self.config.cluster.parse()?;
        if cluster.resource_type() != ResourceType::K8sCluster {
            return Err(BerthError::InvalidReference {
                reference: self.config.cluster.clone(),
                reason: "helm releases target a k8s_cluster",
            });
        }
        Ok(KubeconfigPaths::new(&self.context.config.cache_dir, cluster.name()).local)
    }

    /// Installs the chart and waits for the configured pods.
    ///
    /// # Errors
    ///
    /// Returns a provider error if the install fails, or `Timeout` if the
    /// pods are not ready in time.
    pub async fn create(&self) -> Result<()> {
        let reference = self.reference();
        let kubeconfig = self
            .kubeconfig()
            .map_err(|e| BerthError::provider(reference.as_str(), "validate", e))?;
        let release = HelmRelease {
            name: self.resource.name().to_string(),
            chart: self.config.chart.clone(),
            namespace: self.config.namespace.clone(),
            create_namespace: self.config.create_namespace,
            values: self.config.values.clone(),
            values_string: self.config.values_string.clone(),
            kubeconfig: kubeconfig.clone(),
        };
        self.context
            .helm
            .install(&release)
            .await
            .map_err(|e| BerthError::provider(reference.as_str(), "helm install", e))?;

        let Some(check) = &self.config.health_check else {
            return Ok(());
        };
        let mut policy = self.context.poll_policy();
        if let Some(secs) = check.timeout {
            policy = policy.with_deadline(Duration::from_secs(secs));
        }
        let selectors = if check.pods.is_empty() {
            vec![String::new()]
        } else {
            check.pods.clone()
        };
        let client = self
            .context
            .kubernetes
            .connect(&kubeconfig)
            .await
            .map_err(|e| BerthError::provider(reference.as_str(), "health check", e))?;
        health_check_pods(client.as_ref(), &selectors, policy, &self.context.cancel, &reference).await?;
        info!(reference = %reference, "release healthy");
        Ok(())
    }

    /// Uninstalls the release. A missing release, or a cluster that never
    /// wrote its kubeconfig, is skipped.
    ///
    /// # Errors
    ///
    /// Returns a provider error if `helm uninstall` fails.
    pub async fn destroy(&self) -> Result<()> {
        let reference = self.reference();
        let kubeconfig = self
            .kubeconfig()
            .map_err(|e| BerthError::provider(reference.as_str(), "validate", e))?;
        if !tokio::fs::try_exists(&kubeconfig).await.unwrap_or(false) {
            warn!(reference = %reference, kubeconfig = %kubeconfig.display(), "cluster kubeconfig absent, nothing to uninstall");
            return Ok(());
        }
        match self
            .context
            .helm
            .uninstall(&kubeconfig, self.resource.name(), &self.config.namespace)
            .await
        {
            Err(e) if e.is_not_found() => {
                warn!(reference = %reference, "release already absent");
                Ok(())
            }
            other => other.map_err(|e| BerthError::provider(reference, "helm uninstall", e)),
        }
    }

    /// Returns the release name while the target cluster's kubeconfig
    /// exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the cluster reference is invalid.
    pub async fn lookup(&self) -> Result<Vec<String>> {
        let kubeconfig = self.kubeconfig()?;
        let exists = tokio::fs::try_exists(&kubeconfig).await.unwrap_or(false);
        Ok(if exists {
            vec![self.resource.name().to_string()]
        } else {
            Vec::new()
        })
    }
}
