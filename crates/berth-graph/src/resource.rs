//! Declared resources and their variant-specific configuration.
//!
//! A [`Resource`] pairs a [`Reference`] with a [`ResourceKind`] carrying the
//! attributes of one of the closed set of resource types. Status and children
//! are interior-mutable so the executor and providers can record progress on
//! a resource shared across tasks.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use berth_common::constants;
use berth_common::error::{BerthError, Result};
use berth_common::types::{Reference, ResourceType, Status};
use serde::{Deserialize, Serialize};

/// A container image reference with optional registry credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Image {
    /// Image name including tag, e.g. `consul:1.6.1`.
    pub name: String,
    /// Registry user name.
    pub username: Option<String>,
    /// Registry password.
    pub password: Option<String>,
}

impl Image {
    /// Creates an image reference without credentials.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Attachment of a resource to a declared network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkAttachment {
    /// Reference of the network, e.g. `network.cloud`.
    pub name: String,
    /// Static IPv4 address on that network.
    pub ip_address: Option<String>,
    /// Additional DNS aliases on that network.
    pub aliases: Vec<String>,
}

impl NetworkAttachment {
    /// Creates an attachment to the referenced network.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Kind of volume mounted into a container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeType {
    /// A host path.
    #[default]
    Bind,
    /// A named engine volume.
    Volume,
    /// A memory-backed temporary filesystem.
    Tmpfs,
}

/// Propagation mode of a bind mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindPropagation {
    /// `shared`
    Shared,
    /// `slave`
    Slave,
    /// `private`
    Private,
    /// `rshared`
    Rshared,
    /// `rslave`
    Rslave,
    /// `rprivate`
    Rprivate,
}

/// A volume mounted into a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Volume {
    /// Host path, volume name, or empty for tmpfs.
    pub source: String,
    /// Mount point inside the container.
    pub destination: String,
    /// Kind of mount.
    #[serde(rename = "type")]
    pub volume_type: VolumeType,
    /// Mount read-only.
    pub read_only: bool,
    /// Propagation mode for bind mounts.
    pub bind_propagation: Option<BindPropagation>,
    /// Disable recursive bind mounting.
    pub bind_propagation_non_recursive: bool,
}

/// Transport protocol of a published port.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// TCP
    #[default]
    Tcp,
    /// UDP
    Udp,
}

impl Protocol {
    /// Returns the protocol keyword used by the container engine.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        }
    }
}

/// A single published port.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Port {
    /// Port inside the container.
    pub local: u16,
    /// Port on the host; unpublished when absent.
    pub host: Option<u16>,
    /// Transport protocol.
    pub protocol: Protocol,
}

impl Port {
    /// Creates a TCP port published on the same host port.
    #[must_use]
    pub const fn published(local: u16, host: u16) -> Self {
        Self {
            local,
            host: Some(host),
            protocol: Protocol::Tcp,
        }
    }
}

/// A contiguous range of ports, e.g. `8000-9000`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortRange {
    /// Inclusive range in `start-end` form.
    pub range: String,
    /// Publish every port of the range on the same host port.
    pub enable_host: bool,
    /// Transport protocol.
    pub protocol: Protocol,
}

impl PortRange {
    /// Parses the inclusive bounds of the range.
    ///
    /// # Errors
    ///
    /// Returns a config error if the range is not `start-end` with
    /// `start <= end`.
    pub fn bounds(&self) -> Result<(u16, u16)> {
        let invalid = || BerthError::Config {
            message: format!("invalid port range '{}', expected start-end", self.range),
        };
        let (start, end) = self.range.split_once('-').ok_or_else(invalid)?;
        let start: u16 = start.trim().parse().map_err(|_| invalid())?;
        let end: u16 = end.trim().parse().map_err(|_| invalid())?;
        if start > end {
            return Err(invalid());
        }
        Ok((start, end))
    }
}

/// Resource constraints for a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Resources {
    /// CPU limit where 1000 equals one core.
    pub cpu: Option<u32>,
    /// Cores the container is pinned to.
    pub cpu_pin: Vec<u32>,
    /// Memory ceiling in MiB.
    pub memory: Option<u64>,
}

/// Configuration of a `network` resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Subnet in CIDR notation.
    pub subnet: String,
}

/// Configuration of a `container` resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Networks to attach, in order.
    pub networks: Vec<NetworkAttachment>,
    /// Image to run.
    pub image: Image,
    /// Entrypoint override.
    pub entrypoint: Vec<String>,
    /// Command override.
    pub command: Vec<String>,
    /// Environment variables.
    pub env: BTreeMap<String, String>,
    /// Volumes to mount.
    pub volumes: Vec<Volume>,
    /// Individually published ports.
    pub ports: Vec<Port>,
    /// Published port ranges.
    pub port_ranges: Vec<PortRange>,
    /// Custom DNS servers.
    pub dns: Vec<String>,
    /// Run in privileged mode.
    pub privileged: bool,
    /// Resource constraints.
    pub resources: Option<Resources>,
}

/// Configuration of a `k8s_cluster` resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct K8sClusterConfig {
    /// Cluster driver; only `k3s` is supported.
    pub driver: String,
    /// k3s version tag.
    pub version: Option<String>,
    /// Total node count, server included.
    pub nodes: u32,
    /// Networks to attach the nodes to.
    pub networks: Vec<NetworkAttachment>,
    /// Images to import into the cluster once it is ready.
    pub images: Vec<Image>,
    /// Additional ports published by the server.
    pub ports: Vec<Port>,
    /// Additional port ranges published by the server.
    pub port_ranges: Vec<PortRange>,
    /// Additional volumes mounted into the nodes.
    pub volumes: Vec<Volume>,
    /// Environment variables for the nodes.
    pub env: BTreeMap<String, String>,
}

impl Default for K8sClusterConfig {
    fn default() -> Self {
        Self {
            driver: "k3s".into(),
            version: None,
            nodes: 1,
            networks: Vec::new(),
            images: Vec::new(),
            ports: Vec::new(),
            port_ranges: Vec::new(),
            volumes: Vec::new(),
            env: BTreeMap::new(),
        }
    }
}

/// Configuration of a `nomad_cluster` resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NomadClusterConfig {
    /// Nomad version tag.
    pub version: Option<String>,
    /// Client nodes started in addition to the dev-mode server.
    pub client_nodes: u32,
    /// Networks to attach the nodes to.
    pub networks: Vec<NetworkAttachment>,
    /// Environment variables for the nodes.
    pub env: BTreeMap<String, String>,
    /// Additional volumes mounted into the nodes.
    pub volumes: Vec<Volume>,
}

/// Pod health check run after a resource is installed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheck {
    /// Budget in seconds; the global start timeout when absent.
    pub timeout: Option<u64>,
    /// Pod label selectors that must all be ready.
    pub pods: Vec<String>,
}

/// Configuration of a `helm` resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HelmConfig {
    /// Reference of the target cluster, e.g. `k8s_cluster.dev`.
    pub cluster: String,
    /// Chart path or repository reference.
    pub chart: String,
    /// Values file.
    pub values: Option<PathBuf>,
    /// Individual `--set-string` values.
    pub values_string: BTreeMap<String, String>,
    /// Namespace of the release.
    pub namespace: String,
    /// Create the namespace when missing.
    pub create_namespace: bool,
    /// Pods to wait for after install.
    pub health_check: Option<HealthCheck>,
}

impl Default for HelmConfig {
    fn default() -> Self {
        Self {
            cluster: String::new(),
            chart: String::new(),
            values: None,
            values_string: BTreeMap::new(),
            namespace: "default".into(),
            create_namespace: false,
            health_check: None,
        }
    }
}

/// Configuration of an `ingress` resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngressConfig {
    /// Reference of the resource traffic is forwarded to.
    pub target: String,
    /// Destination host; derived from the target when absent.
    pub service: Option<String>,
    /// Destination port on the target.
    pub port: u16,
    /// Port published on the host.
    pub local_port: u16,
    /// Networks the proxy joins.
    pub networks: Vec<NetworkAttachment>,
}

/// Configuration of a `docs` resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocsConfig {
    /// Local directory holding the built site.
    pub path: PathBuf,
    /// Port published on the host.
    pub port: u16,
    /// Image override for the site server.
    pub image: Option<Image>,
    /// Networks the site joins.
    pub networks: Vec<NetworkAttachment>,
}

impl Default for DocsConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            port: 8080,
            image: None,
            networks: Vec::new(),
        }
    }
}

/// Variant-specific configuration of a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceKind {
    /// A container network.
    Network(NetworkConfig),
    /// A container.
    Container(ContainerConfig),
    /// A k3s cluster.
    K8sCluster(K8sClusterConfig),
    /// A Nomad cluster.
    NomadCluster(NomadClusterConfig),
    /// A Helm release.
    Helm(HelmConfig),
    /// An ingress proxy.
    Ingress(IngressConfig),
    /// A documentation site.
    Docs(DocsConfig),
}

impl ResourceKind {
    /// Returns the resource type of this variant.
    #[must_use]
    pub const fn resource_type(&self) -> ResourceType {
        match self {
            Self::Network(_) => ResourceType::Network,
            Self::Container(_) => ResourceType::Container,
            Self::K8sCluster(_) => ResourceType::K8sCluster,
            Self::NomadCluster(_) => ResourceType::NomadCluster,
            Self::Helm(_) => ResourceType::Helm,
            Self::Ingress(_) => ResourceType::Ingress,
            Self::Docs(_) => ResourceType::Docs,
        }
    }

    /// Returns the references named by type-specific fields.
    ///
    /// These are the implicit dependencies of a resource: network
    /// attachments, the cluster a Helm release targets, and the target of an
    /// ingress.
    #[must_use]
    pub fn referenced_resources(&self) -> Vec<String> {
        let networks = |attachments: &[NetworkAttachment]| {
            attachments.iter().map(|n| n.name.clone()).collect::<Vec<_>>()
        };
        match self {
            Self::Network(_) => Vec::new(),
            Self::Container(c) => networks(&c.networks),
            Self::K8sCluster(c) => networks(&c.networks),
            Self::NomadCluster(c) => networks(&c.networks),
            Self::Docs(c) => networks(&c.networks),
            Self::Helm(c) => vec![c.cluster.clone()],
            Self::Ingress(c) => {
                let mut refs = networks(&c.networks);
                refs.push(c.target.clone());
                refs
            }
        }
    }
}

/// A declared resource shared between the registry, graph, and providers.
#[derive(Debug)]
pub struct Resource {
    reference: Reference,
    depends_on: Vec<String>,
    kind: ResourceKind,
    status: Mutex<Status>,
    children: Mutex<Vec<Arc<Resource>>>,
}

impl Resource {
    /// Creates a top-level resource in the `PendingCreation` state.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            reference: Reference::new(kind.resource_type(), name),
            depends_on: Vec::new(),
            kind,
            status: Mutex::new(Status::PendingCreation),
            children: Mutex::new(Vec::new()),
        }
    }

    /// Scopes the resource to a module.
    #[must_use]
    pub fn in_module(mut self, module: impl Into<String>) -> Self {
        self.reference = self.reference.in_module(module);
        self
    }

    /// Sets the explicit dependencies.
    #[must_use]
    pub fn with_depends_on<I, S>(mut self, depends_on: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = depends_on.into_iter().map(Into::into).collect();
        self
    }

    /// Marks the resource disabled.
    #[must_use]
    pub fn disabled(self) -> Self {
        self.set_status(Status::Disabled);
        self
    }

    /// Returns the unique reference of the resource.
    #[must_use]
    pub const fn reference(&self) -> &Reference {
        &self.reference
    }

    /// Returns the resource name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.reference.name()
    }

    /// Returns the resource type.
    #[must_use]
    pub const fn resource_type(&self) -> ResourceType {
        self.reference.resource_type()
    }

    /// Returns the variant configuration.
    #[must_use]
    pub const fn kind(&self) -> &ResourceKind {
        &self.kind
    }

    /// Returns the explicitly declared dependencies.
    #[must_use]
    pub fn depends_on(&self) -> &[String] {
        &self.depends_on
    }

    /// Returns explicit and implicit dependency strings, without duplicates.
    #[must_use]
    pub fn dependency_references(&self) -> Vec<String> {
        let mut all: Vec<String> = Vec::new();
        for dep in self
            .depends_on
            .iter()
            .cloned()
            .chain(self.kind.referenced_resources())
        {
            if !dep.is_empty() && !all.contains(&dep) {
                all.push(dep);
            }
        }
        all
    }

    /// Returns the fully qualified name of the resource's runtime objects.
    #[must_use]
    pub fn fqdn(&self) -> String {
        constants::fqdn(self.name(), self.resource_type().as_str())
    }

    /// Returns the current status.
    pub fn status(&self) -> Status {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records a status transition.
    pub fn set_status(&self, status: Status) {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = status;
    }

    /// Attaches a child created by this resource's provider.
    pub fn add_child(&self, child: Arc<Self>) {
        self.children
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(child);
    }

    /// Returns the children created so far.
    pub fn children(&self) -> Vec<Arc<Self>> {
        self.children
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_resource_is_pending() {
        let r = Resource::new("cloud", ResourceKind::Network(NetworkConfig::default()));
        assert_eq!(r.status(), Status::PendingCreation);
        assert_eq!(r.reference().to_string(), "network.cloud");
    }

    #[test]
    fn disabled_resource_starts_disabled() {
        let r = Resource::new("chart", ResourceKind::Helm(HelmConfig::default())).disabled();
        assert_eq!(r.status(), Status::Disabled);
    }

    #[test]
    fn container_references_its_networks() {
        let kind = ResourceKind::Container(ContainerConfig {
            networks: vec![
                NetworkAttachment::new("network.cloud"),
                NetworkAttachment::new("network.onprem"),
            ],
            ..ContainerConfig::default()
        });
        assert_eq!(kind.referenced_resources(), vec!["network.cloud", "network.onprem"]);
    }

    #[test]
    fn helm_references_its_cluster() {
        let kind = ResourceKind::Helm(HelmConfig {
            cluster: "k8s_cluster.dev".into(),
            ..HelmConfig::default()
        });
        assert_eq!(kind.referenced_resources(), vec!["k8s_cluster.dev"]);
    }

    #[test]
    fn dependency_references_merge_explicit_and_implicit() {
        let r = Resource::new(
            "web",
            ResourceKind::Ingress(IngressConfig {
                target: "container.api".into(),
                networks: vec![NetworkAttachment::new("network.cloud")],
                ..IngressConfig::default()
            }),
        )
        .with_depends_on(["network.cloud", "container.db"]);
        assert_eq!(
            r.dependency_references(),
            vec!["network.cloud", "container.db", "container.api"]
        );
    }

    #[test]
    fn port_range_bounds() {
        let range = PortRange {
            range: "8000-9000".into(),
            ..PortRange::default()
        };
        assert_eq!(range.bounds().expect("bounds"), (8000, 9000));

        let bad = PortRange {
            range: "9000-8000".into(),
            ..PortRange::default()
        };
        assert!(bad.bounds().is_err());
    }

    #[test]
    fn children_are_recorded() {
        let parent = Resource::new("dev", ResourceKind::K8sCluster(K8sClusterConfig::default()));
        let child = Arc::new(Resource::new(
            "server.dev",
            ResourceKind::Container(ContainerConfig::default()),
        ));
        parent.add_child(Arc::clone(&child));
        assert_eq!(parent.children().len(), 1);
        assert!(Arc::ptr_eq(&parent.children()[0], &child));
    }
}
