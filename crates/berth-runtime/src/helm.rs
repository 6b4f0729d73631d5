//! Helm release management through the `helm` binary.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use berth_common::error::{BerthError, Result};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Serialises every Helm invocation in the process.
static HELM_LOCK: Mutex<()> = Mutex::const_new(());

/// A chart installation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelmRelease {
    /// Release name.
    pub name: String,
    /// Chart path or repository reference.
    pub chart: String,
    /// Target namespace.
    pub namespace: String,
    /// Create the namespace when missing.
    pub create_namespace: bool,
    /// Values file.
    pub values: Option<PathBuf>,
    /// Individual string values.
    pub values_string: BTreeMap<String, String>,
    /// Kubeconfig of the target cluster.
    pub kubeconfig: PathBuf,
}

impl HelmRelease {
    /// Returns the `helm install` arguments for this release.
    #[must_use]
    pub fn install_args(&self) -> Vec<String> {
        let mut args = vec![
            "install".to_string(),
            self.name.clone(),
            self.chart.clone(),
            "--namespace".to_string(),
            self.namespace.clone(),
            "--kubeconfig".to_string(),
            self.kubeconfig.display().to_string(),
        ];
        if self.create_namespace {
            args.push("--create-namespace".to_string());
        }
        if let Some(values) = &self.values {
            args.push("--values".to_string());
            args.push(values.display().to_string());
        }
        for (key, value) in &self.values_string {
            args.push("--set-string".to_string());
            args.push(format!("{key}={value}"));
        }
        args
    }
}

/// Installs and removes Helm releases.
#[async_trait]
pub trait Helm: Send + Sync {
    /// Installs a release.
    ///
    /// # Errors
    ///
    /// Returns an error if the chart cannot be installed.
    async fn install(&self, release: &HelmRelease) -> Result<()>;

    /// Uninstalls a release.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the release does not exist.
    async fn uninstall(&self, kubeconfig: &Path, name: &str, namespace: &str) -> Result<()>;
}

/// [`Helm`] implementation that shells out to the `helm` binary.
#[derive(Debug, Default, Clone, Copy)]
pub struct HelmCli;

impl HelmCli {
    async fn run(operation: &'static str, args: &[String]) -> Result<String> {
        let binary = which::which("helm").map_err(|_| BerthError::NotFound {
            kind: "binary",
            id: "helm".to_string(),
        })?;

        let _guard = HELM_LOCK.lock().await;
        debug!(binary = %binary.display(), args = ?args, "running helm");
        let output = Command::new(&binary)
            .args(args)
            .output()
            .await
            .map_err(|source| BerthError::Io {
                path: binary.clone(),
                source,
            })?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(BerthError::engine(
                operation,
                String::from_utf8_lossy(&output.stderr).trim(),
            ))
        }
    }
}

#[async_trait]
impl Helm for HelmCli {
    async fn install(&self, release: &HelmRelease) -> Result<()> {
        info!(release = %release.name, chart = %release.chart, namespace = %release.namespace, "installing chart");
        let _ = Self::run("helm install", &release.install_args()).await?;
        Ok(())
    }

    async fn uninstall(&self, kubeconfig: &Path, name: &str, namespace: &str) -> Result<()> {
        info!(release = name, namespace, "uninstalling chart");
        let args = [
            "uninstall".to_string(),
            name.to_string(),
            "--namespace".to_string(),
            namespace.to_string(),
            "--kubeconfig".to_string(),
            kubeconfig.display().to_string(),
        ];
        match Self::run("helm uninstall", &args).await {
            Err(BerthError::Engine { message, .. }) if message.contains("not found") => {
                Err(BerthError::NotFound {
                    kind: "release",
                    id: name.to_string(),
                })
            }
            other => other.map(|_| ()),
        }
    }
}
