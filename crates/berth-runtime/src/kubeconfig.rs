//! Kubeconfig extraction and server address rewriting.
//!
//! k3s writes a kubeconfig whose server is `https://127.0.0.1:<api port>`.
//! Two copies are kept per cluster: one for clients on the engine host and
//! one for containers on the cluster's networks.

use std::path::{Path, PathBuf};

use berth_common::constants;
use berth_common::error::{BerthError, Result};
use serde_yaml::Value;

/// Paths of the two kubeconfig files of a cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KubeconfigPaths {
    /// Config for clients on the engine host.
    pub local: PathBuf,
    /// Config for containers on the cluster networks.
    pub docker: PathBuf,
}

impl KubeconfigPaths {
    /// Returns the paths for `cluster` under `cache_dir`.
    #[must_use]
    pub fn new(cache_dir: &Path, cluster: &str) -> Self {
        let dir = constants::cluster_config_dir(cache_dir, cluster);
        Self {
            local: dir.join(constants::KUBECONFIG_FILE),
            docker: dir.join(constants::KUBECONFIG_DOCKER_FILE),
        }
    }
}

/// Replaces the host of every cluster server URL, keeping scheme and port.
///
/// # Errors
///
/// Returns a serialization error if the document is not YAML, or a config
/// error if it is not a kubeconfig.
pub fn rewrite_server(kubeconfig: &str, host: &str) -> Result<String> {
    let invalid = |message: String| BerthError::Config {
        message: format!("invalid kubeconfig: {message}"),
    };
    let mut doc: Value = serde_yaml::from_str(kubeconfig)?;

    let clusters = doc
        .get_mut("clusters")
        .and_then(Value::as_sequence_mut)
        .ok_or_else(|| invalid("missing clusters".into()))?;
    for entry in clusters {
        let server = entry
            .get_mut("cluster")
            .and_then(|c| c.get_mut("server"))
            .ok_or_else(|| invalid("cluster without server".into()))?;
        let url = server
            .as_str()
            .ok_or_else(|| invalid("server is not a string".into()))?;
        *server = Value::String(replace_host(url, host));
    }

    Ok(serde_yaml::to_string(&doc)?)
}

fn replace_host(url: &str, host: &str) -> String {
    let (scheme, rest) = url.split_once("://").unwrap_or(("https", url));
    let (authority, path) = rest
        .find('/')
        .map_or((rest, ""), |i| (&rest[..i], &rest[i..]));
    match authority.rsplit_once(':') {
        Some((_, port)) => format!("{scheme}://{host}:{port}{path}"),
        None => format!("{scheme}://{host}{path}"),
    }
}

/// Writes both kubeconfig copies of a cluster.
///
/// The local copy points at `local_host`; the docker copy points at the
/// server container's FQDN.
///
/// # Errors
///
/// Returns an I/O error if the files cannot be written, or a config error
/// if `raw` is not a kubeconfig.
pub async fn write_kubeconfigs(
    raw: &str,
    paths: &KubeconfigPaths,
    local_host: &str,
    server_fqdn: &str,
) -> Result<()> {
    let local = rewrite_server(raw, local_host)?;
    let docker = rewrite_server(raw, server_fqdn)?;
    for (path, contents) in [(&paths.local, local), (&paths.docker, docker)] {
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await.map_err(|source| BerthError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        tokio::fs::write(path, contents).await.map_err(|source| BerthError::Io {
            path: path.clone(),
            source,
        })?;
    }
    Ok(())
}

#[cfg(test)]
pub(crate) const SAMPLE: &str = r"apiVersion: v1
clusters:
- cluster:
    certificate-authority-data: LS0tLS1CRUdJTg==
    server: https://127.0.0.1:64000
  name: default
contexts:
- context:
    cluster: default
    user: default
  name: default
current-context: default
kind: Config
preferences: {}
users:
- name: default
  user:
    password: secret
    username: admin
";
