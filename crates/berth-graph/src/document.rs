//! YAML document loader.
//!
//! A document is a list of resource declarations:
//!
//! ```yaml
//! resources:
//!   - type: network
//!     name: cloud
//!     subnet: 10.5.0.0/16
//!   - type: container
//!     name: consul
//!     depends_on: [network.cloud]
//!     image: { name: "consul:1.6.1" }
//!     networks: [{ name: network.cloud }]
//! ```
//!
//! The common keys (`type`, `name`, `module`, `disabled`, `depends_on`) are
//! read by the loader; every other key is handed to the configuration type of
//! the declared resource type.

use std::path::{Path, PathBuf};

use berth_common::error::{BerthError, Result};
use berth_common::types::ResourceType;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::registry::Registry;
use crate::resource::{
    ContainerConfig, DocsConfig, HelmConfig, IngressConfig, K8sClusterConfig, NetworkConfig,
    NomadClusterConfig, Resource, ResourceKind, Volume, VolumeType,
};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Document {
    #[serde(default)]
    resources: Vec<Declaration>,
}

#[derive(Debug, Deserialize)]
struct Declaration {
    #[serde(rename = "type")]
    resource_type: ResourceType,
    name: String,
    #[serde(default)]
    module: Option<String>,
    #[serde(default)]
    disabled: bool,
    #[serde(default)]
    depends_on: Vec<String>,
    #[serde(flatten)]
    fields: serde_yaml::Mapping,
}

/// Reads a document from disk and registers every declared resource.
///
/// Relative paths (bind sources, docs paths, Helm values files) are resolved
/// against the document's directory.
///
/// # Errors
///
/// Returns an I/O error if the file cannot be read, a config error if it is
/// not a valid document, or [`BerthError::Conflict`] on duplicate references.
pub fn load_file(path: &Path) -> Result<Registry> {
    let text = std::fs::read_to_string(path).map_err(|source| BerthError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let base = path.parent().map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    let base = std::path::absolute(&base).map_err(|source| BerthError::Io {
        path: base.clone(),
        source,
    })?;
    let registry = load_str(&text, &base)?;
    info!(path = %path.display(), resources = registry.len(), "loaded document");
    Ok(registry)
}

/// Parses a document and registers every declared resource.
///
/// # Errors
///
/// Returns a config error if the text is not a valid document, or
/// [`BerthError::Conflict`] on duplicate references.
pub fn load_str(text: &str, base: &Path) -> Result<Registry> {
    let document: Document = serde_yaml::from_str(text).map_err(|e| BerthError::Config {
        message: format!("invalid document: {e}"),
    })?;

    let mut registry = Registry::new();
    for declaration in document.resources {
        let resource = declaration.into_resource(base)?;
        debug!(reference = %resource.reference(), status = %resource.status(), "declared resource");
        let _ = registry.add(resource)?;
    }
    Ok(registry)
}

impl Declaration {
    fn into_resource(self, base: &Path) -> Result<Resource> {
        let label = format!("{}.{}", self.resource_type, self.name);
        let kind = match self.resource_type {
            ResourceType::Network => ResourceKind::Network(parse::<NetworkConfig>(&label, self.fields)?),
            ResourceType::Container => {
                let mut config: ContainerConfig = parse(&label, self.fields)?;
                absolutize_volumes(&mut config.volumes, base);
                ResourceKind::Container(config)
            }
            ResourceType::K8sCluster => {
                let mut config: K8sClusterConfig = parse(&label, self.fields)?;
                absolutize_volumes(&mut config.volumes, base);
                ResourceKind::K8sCluster(config)
            }
            ResourceType::NomadCluster => {
                let mut config: NomadClusterConfig = parse(&label, self.fields)?;
                absolutize_volumes(&mut config.volumes, base);
                ResourceKind::NomadCluster(config)
            }
            ResourceType::Helm => {
                let mut config: HelmConfig = parse(&label, self.fields)?;
                config.values = config.values.map(|v| base.join(v));
                ResourceKind::Helm(config)
            }
            ResourceType::Ingress => ResourceKind::Ingress(parse(&label, self.fields)?),
            ResourceType::Docs => {
                let mut config: DocsConfig = parse(&label, self.fields)?;
                config.path = base.join(&config.path);
                ResourceKind::Docs(config)
            }
        };

        let mut resource = Resource::new(self.name, kind).with_depends_on(self.depends_on);
        if let Some(module) = self.module {
            resource = resource.in_module(module);
        }
        if self.disabled {
            resource = resource.disabled();
        }
        Ok(resource)
    }
}

fn parse<T: DeserializeOwned>(label: &str, fields: serde_yaml::Mapping) -> Result<T> {
    serde_yaml::from_value(serde_yaml::Value::Mapping(fields)).map_err(|e| BerthError::Config {
        message: format!("{label}: {e}"),
    })
}

fn absolutize_volumes(volumes: &mut [Volume], base: &Path) {
    for volume in volumes
        .iter_mut()
        .filter(|v| v.volume_type == VolumeType::Bind && !v.source.is_empty())
    {
        if Path::new(&volume.source).is_relative() {
            volume.source = base.join(&volume.source).to_string_lossy().into_owned();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use berth_common::types::Status;

    const DOCUMENT: &str = r#"
resources:
  - type: network
    name: cloud
    subnet: 10.5.0.0/16
  - type: k8s_cluster
    name: dev
    nodes: 2
    networks:
      - name: network.cloud
        ip_address: 10.5.0.200
    images:
      - name: "consul:1.6.1"
  - type: helm
    name: vault
    disabled: true
    cluster: k8s_cluster.dev
    chart: ./charts/vault
    values: ./vault-values.yaml
  - type: container
    name: consul
    module: apps
    depends_on: [k8s_cluster.dev]
    image:
      name: "consul:1.6.1"
    command: [consul, agent, -dev]
    env:
      CONSUL_HTTP_ADDR: http://localhost:8500
    volumes:
      - source: ./config
        destination: /config
        read_only: true
      - source: data
        destination: /data
        type: volume
    ports:
      - local: 8500
        host: 18500
    port_ranges:
      - range: 9000-9002
        enable_host: true
        protocol: udp
    resources:
      cpu: 2000
      cpu_pin: [0, 1]
      memory: 1024
"#;

    #[test]
    fn loads_every_resource_type_field() {
        let registry = load_str(DOCUMENT, Path::new("/work")).expect("load");
        assert_eq!(registry.len(), 4);

        let cluster = registry.find("k8s_cluster.dev").expect("cluster");
        let ResourceKind::K8sCluster(config) = cluster.kind() else {
            panic!("wrong kind");
        };
        assert_eq!(config.nodes, 2);
        assert_eq!(config.driver, "k3s");
        assert_eq!(config.networks[0].ip_address.as_deref(), Some("10.5.0.200"));
        assert_eq!(config.images[0].name, "consul:1.6.1");

        let consul = registry.find("container.consul.apps").expect("consul");
        assert_eq!(consul.depends_on(), ["k8s_cluster.dev"]);
        let ResourceKind::Container(config) = consul.kind() else {
            panic!("wrong kind");
        };
        assert_eq!(config.ports[0].host, Some(18500));
        assert_eq!(config.port_ranges[0].bounds().expect("range"), (9000, 9002));
        assert_eq!(
            config.resources.as_ref().and_then(|r| r.memory),
            Some(1024)
        );
    }

    #[test]
    fn disabled_declarations_start_disabled() {
        let registry = load_str(DOCUMENT, Path::new("/work")).expect("load");
        let helm = registry.find("helm.vault").expect("helm");
        assert_eq!(helm.status(), Status::Disabled);
        let ResourceKind::Helm(config) = helm.kind() else {
            panic!("wrong kind");
        };
        assert_eq!(config.namespace, "default");
        assert_eq!(config.values, Some(PathBuf::from("/work/vault-values.yaml")));
    }

    #[test]
    fn relative_bind_sources_become_absolute() {
        let registry = load_str(DOCUMENT, Path::new("/work")).expect("load");
        let consul = registry.find("container.consul.apps").expect("consul");
        let ResourceKind::Container(config) = consul.kind() else {
            panic!("wrong kind");
        };
        assert_eq!(config.volumes[0].source, "/work/./config");
        assert_eq!(config.volumes[1].source, "data");
    }

    #[test]
    fn duplicate_declarations_conflict() {
        let text = r"
resources:
  - type: network
    name: cloud
  - type: network
    name: cloud
";
        let err = load_str(text, Path::new("/")).unwrap_err();
        assert!(matches!(err, BerthError::Conflict { .. }), "got: {err}");
    }

    #[test]
    fn unknown_type_is_a_config_error() {
        let text = r"
resources:
  - type: vm
    name: box
";
        let err = load_str(text, Path::new("/")).unwrap_err();
        assert!(matches!(err, BerthError::Config { .. }), "got: {err}");
    }

    #[test]
    fn load_file_resolves_against_document_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("stack.yaml");
        std::fs::write(
            &path,
            "resources:\n  - type: docs\n    name: site\n    path: ./site\n",
        )
        .expect("write");

        let registry = load_file(&path).expect("load");
        let docs = registry.find("docs.site").expect("docs");
        let ResourceKind::Docs(config) = docs.kind() else {
            panic!("wrong kind");
        };
        assert!(config.path.is_absolute());
        assert!(config.path.starts_with(dir.path()));
        assert_eq!(config.port, 8080);
    }
}
