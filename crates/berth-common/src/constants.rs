//! System-wide constants and default paths.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application name used in CLI output, labels, and state directories.
pub const APP_NAME: &str = "berth";

/// Binary name for the CLI.
pub const BIN_NAME: &str = "berth";

/// Domain suffix appended to every container, volume, and network FQDN.
pub const DOMAIN: &str = "berth.run";

/// Environment variable overriding the berth home directory.
pub const HOME_ENV: &str = "BERTH_HOME";

/// Environment variable naming a remote container engine.
pub const DOCKER_HOST_ENV: &str = "DOCKER_HOST";

/// Environment variable overriding the cluster start timeout, in seconds.
pub const START_TIMEOUT_ENV: &str = "BERTH_START_TIMEOUT";

/// Environment variable forcing image pulls even when cached.
pub const FORCE_PULL_ENV: &str = "BERTH_FORCE_PULL";

/// Default budget for cluster readiness and pod health checks.
pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(120);

/// Default interval between readiness checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Name of the network every container joins in addition to its own.
pub const DEFAULT_WAN_NETWORK: &str = "wan";

/// Subnet used when the WAN network has to be created.
pub const DEFAULT_WAN_SUBNET: &str = "192.168.200.0/24";

/// Label carrying the FQDN of a managed container.
pub const LABEL_FQDN: &str = "run.berth.fqdn";

/// Label carrying the resource type of a managed container.
pub const LABEL_TYPE: &str = "run.berth.type";

/// Label carrying the resource name of a managed container.
pub const LABEL_NAME: &str = "run.berth.name";

/// Name of the volume used to stage images for cluster import.
pub const IMAGES_VOLUME: &str = "images";

/// Mount point of the images volume inside cluster containers.
pub const IMAGES_MOUNT: &str = "/images";

/// Lower bound of the host port range used for cluster ports.
pub const HIGH_PORT_START: u16 = 64000;

/// Fixed node ports published by every k3s server.
pub const K3S_NODE_PORTS: [u16; 2] = [30000, 30001];

/// Image repository of the k3s server.
pub const K3S_IMAGE: &str = "rancher/k3s";

/// k3s version used when a cluster does not declare one.
pub const K3S_DEFAULT_VERSION: &str = "v1.31.4-k3s1";

/// Log line emitted by k3s once the node agent is running.
pub const K3S_READY_MARKER: &str = "Running kubelet";

/// Path of the kubeconfig written by k3s inside the server container.
pub const K3S_KUBECONFIG_PATH: &str = "/output/kubeconfig.yaml";

/// File name of the host-facing kubeconfig.
pub const KUBECONFIG_FILE: &str = "kubeconfig.yaml";

/// File name of the kubeconfig routable on the container networks.
pub const KUBECONFIG_DOCKER_FILE: &str = "kubeconfig-docker.yaml";

/// Image repository of the Nomad server.
pub const NOMAD_IMAGE: &str = "hashicorp/nomad";

/// Nomad version used when a cluster does not declare one.
pub const NOMAD_DEFAULT_VERSION: &str = "1.9.4";

/// HTTP API port of a Nomad agent.
pub const NOMAD_API_PORT: u16 = 4646;

/// Image running ingress proxies.
pub const INGRESS_IMAGE: &str = "alpine/socat:latest";

/// Image serving documentation sites.
pub const DOCS_IMAGE: &str = "nginx:alpine";

/// Image used for short-lived helper containers.
pub const HELPER_IMAGE: &str = "alpine:latest";

/// Returns the fully qualified name of a managed object.
///
/// ```
/// assert_eq!(berth_common::constants::fqdn("dev", "k8s_cluster"), "dev.k8s_cluster.berth.run");
/// ```
#[must_use]
pub fn fqdn(name: &str, kind: &str) -> String {
    format!("{name}.{kind}.{DOMAIN}")
}

/// Returns the FQDN of a named volume.
#[must_use]
pub fn volume_fqdn(name: &str) -> String {
    fqdn(name, "volume")
}

/// Returns the directory holding a cluster's connection configuration.
#[must_use]
pub fn cluster_config_dir(cache_dir: &Path, cluster: &str) -> PathBuf {
    cache_dir.join(cluster)
}

/// Returns the default home directory: `$HOME/.berth`, or `./.berth`.
#[must_use]
pub fn default_home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map_or_else(|| PathBuf::from("."), PathBuf::from)
        .join(format!(".{APP_NAME}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fqdn_joins_name_type_and_domain() {
        assert_eq!(fqdn("web", "container"), "web.container.berth.run");
        assert_eq!(volume_fqdn("images"), "images.volume.berth.run");
    }

    #[test]
    fn cluster_config_dir_is_keyed_by_cluster() {
        let dir = cluster_config_dir(Path::new("/tmp/cache"), "dev");
        assert_eq!(dir, PathBuf::from("/tmp/cache/dev"));
    }
}
