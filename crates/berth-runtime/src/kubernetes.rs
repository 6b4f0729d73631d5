//! Kubernetes API seam and pod health checks.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use berth_common::error::{BerthError, Result};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::retry::{PollPolicy, poll};

/// Opens API clients from kubeconfig files.
#[async_trait]
pub trait KubernetesConnector: Send + Sync {
    /// Builds a client for the cluster described by `kubeconfig`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or the client cannot be
    /// configured.
    async fn connect(&self, kubeconfig: &Path) -> Result<Arc<dyn Kubernetes>>;
}

/// The part of the Kubernetes API berth uses.
#[async_trait]
pub trait Kubernetes: Send + Sync {
    /// Returns whether at least one pod matches `selector` and every
    /// matching pod is ready. An empty selector matches all pods.
    ///
    /// # Errors
    ///
    /// Returns an error if the pods cannot be listed.
    async fn pods_ready(&self, selector: &str) -> Result<bool>;
}

/// Connector backed by `kube`.
#[derive(Debug, Default, Clone, Copy)]
pub struct KubeConnector;

#[async_trait]
impl KubernetesConnector for KubeConnector {
    async fn connect(&self, kubeconfig: &Path) -> Result<Arc<dyn Kubernetes>> {
        let failed = |e: &dyn std::fmt::Display| BerthError::engine("kubernetes connect", e);
        let raw = Kubeconfig::read_from(kubeconfig).map_err(|e| failed(&e))?;
        let config = kube::Config::from_custom_kubeconfig(raw, &KubeConfigOptions::default())
            .await
            .map_err(|e| failed(&e))?;
        let client = kube::Client::try_from(config).map_err(|e| failed(&e))?;
        debug!(path = %kubeconfig.display(), "connected to cluster");
        Ok(Arc::new(KubeClient { client }))
    }
}

/// A live cluster client.
#[derive(Clone)]
pub struct KubeClient {
    client: kube::Client,
}

impl std::fmt::Debug for KubeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClient").finish_non_exhaustive()
    }
}

fn pod_ready(pod: &Pod) -> bool {
    let Some(status) = pod.status.as_ref() else {
        return false;
    };
    match status.phase.as_deref() {
        Some("Succeeded") => true,
        Some("Running") => status
            .container_statuses
            .as_ref()
            .is_some_and(|cs| cs.iter().all(|c| c.ready)),
        _ => false,
    }
}

#[async_trait]
impl Kubernetes for KubeClient {
    async fn pods_ready(&self, selector: &str) -> Result<bool> {
        let pods: Api<Pod> = Api::all(self.client.clone());
        let params = if selector.is_empty() {
            ListParams::default()
        } else {
            ListParams::default().labels(selector)
        };
        let list = pods
            .list(&params)
            .await
            .map_err(|e| BerthError::engine("list pods", e))?;
        let ready = list.items.iter().filter(|p| pod_ready(p)).count();
        debug!(selector, total = list.items.len(), ready, "pod readiness");
        Ok(!list.items.is_empty() && ready == list.items.len())
    }
}

/// Waits until the pods of every selector are ready.
///
/// API errors while the cluster settles count as not ready.
///
/// # Errors
///
/// Returns a timeout once the policy's deadline elapses, or a cancellation.
pub async fn health_check_pods(
    kubernetes: &dyn Kubernetes,
    selectors: &[String],
    policy: PollPolicy,
    cancel: &CancellationToken,
    reference: &str,
) -> Result<()> {
    for selector in selectors {
        info!(reference, selector = %selector, "waiting for pods");
        poll(policy, cancel, reference, "health check", || async move {
            match kubernetes.pods_ready(selector).await {
                Ok(ready) => Ok(ready),
                Err(e) => {
                    debug!(reference, error = %e, "pod listing failed, retrying");
                    Ok(false)
                }
            }
        })
        .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use berth_common::error::ErrorKind;
    use k8s_openapi::api::core::v1::{ContainerStatus, PodStatus};

    use super::*;
    use crate::testing::MockKubernetes;

    fn pod(phase: &str, ready: &[bool]) -> Pod {
        Pod {
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                container_statuses: Some(
                    ready
                        .iter()
                        .map(|r| ContainerStatus {
                            ready: *r,
                            ..ContainerStatus::default()
                        })
                        .collect(),
                ),
                ..PodStatus::default()
            }),
            ..Pod::default()
        }
    }

    #[test]
    fn pod_readiness_rules() {
        assert!(pod_ready(&pod("Running", &[true, true])));
        assert!(!pod_ready(&pod("Running", &[true, false])));
        assert!(pod_ready(&pod("Succeeded", &[false])));
        assert!(!pod_ready(&pod("Pending", &[])));
        assert!(!pod_ready(&Pod::default()));
    }

    #[tokio::test]
    async fn health_check_checks_each_selector() {
        let kube = MockKubernetes::ready();
        let policy = PollPolicy::new(Duration::from_millis(1), Duration::from_millis(20));
        health_check_pods(
            &kube,
            &["app=consul".into(), "app=vault".into()],
            policy,
            &CancellationToken::new(),
            "helm.consul",
        )
        .await
        .expect("ready");
        assert_eq!(kube.selectors(), vec!["app=consul", "app=vault"]);
    }

    #[tokio::test]
    async fn unready_pods_time_out() {
        let kube = MockKubernetes::never_ready();
        let policy = PollPolicy::new(Duration::from_millis(1), Duration::from_millis(20));
        let err = health_check_pods(
            &kube,
            &[String::new()],
            policy,
            &CancellationToken::new(),
            "k8s_cluster.dev",
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }
}
