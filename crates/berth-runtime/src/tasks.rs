//! Transactional container operations shared by every provider.
//!
//! [`ContainerTasks::create_container`] is the only place containers are
//! created. It builds the engine spec from a [`ContainerConfig`], creates the
//! container detached, attaches networks in order, and starts it. If attach
//! or start fails the container is removed before the error is returned.

use std::collections::HashMap;
use std::sync::Arc;

use berth_common::config::BerthConfig;
use berth_common::constants;
use berth_common::error::{BerthError, Result};
use berth_common::types::{ContainerId, Reference, ResourceType};
use berth_graph::resource::{BindPropagation, ContainerConfig, Image, Resource, VolumeType};
use bollard::container::Config;
use bollard::models::{
    HostConfig, Mount, MountBindOptions, MountBindOptionsPropagationEnum, MountTypeEnum,
    PortBinding,
};
use tracing::{debug, info, warn};

use crate::engine::ContainerEngine;

/// Host address published ports bind to.
const PUBLISH_ADDRESS: &str = "0.0.0.0";

/// Everything needed to create one container.
#[derive(Debug, Clone)]
pub struct ContainerRequest {
    /// Reference named in errors, usually the owning resource.
    pub reference: String,
    /// Container name and FQDN label value.
    pub fqdn: String,
    /// Resource name label value.
    pub name: String,
    /// Resource type label value.
    pub resource_type: ResourceType,
    /// Container attributes.
    pub config: ContainerConfig,
}

impl ContainerRequest {
    /// Builds the request for a resource's own container.
    #[must_use]
    pub fn for_resource(resource: &Resource, config: ContainerConfig) -> Self {
        Self {
            reference: resource.reference().to_string(),
            fqdn: resource.fqdn(),
            name: resource.name().to_string(),
            resource_type: resource.resource_type(),
            config,
        }
    }
}

/// Returns the engine network name for a network reference.
///
/// # Errors
///
/// Returns [`BerthError::InvalidReference`] if `reference` is not a network
/// reference.
pub fn network_name(reference: &str) -> Result<String> {
    let parsed: Reference = reference.parse()?;
    if parsed.resource_type() != ResourceType::Network {
        return Err(BerthError::InvalidReference {
            reference: reference.to_string(),
            reason: "expected a network reference",
        });
    }
    Ok(parsed.name().to_string())
}

/// Returns the image name with an explicit tag.
///
/// ```
/// use berth_runtime::tasks::canonical_image;
/// assert_eq!(canonical_image("nginx"), "nginx:latest");
/// assert_eq!(canonical_image("localhost:5000/app"), "localhost:5000/app:latest");
/// assert_eq!(canonical_image("consul:1.6.1"), "consul:1.6.1");
/// ```
#[must_use]
pub fn canonical_image(name: &str) -> String {
    let last = name.rsplit('/').next().unwrap_or(name);
    if last.contains(':') || last.contains('@') {
        name.to_string()
    } else {
        format!("{name}:latest")
    }
}

/// Builds the engine spec for a container request.
///
/// # Errors
///
/// Returns a config error for relative bind sources or malformed port
/// ranges.
pub fn runtime_spec(request: &ContainerRequest) -> Result<Config<String>> {
    let config = &request.config;
    let invalid = |message: String| BerthError::provider(
        request.reference.clone(),
        "runtime spec",
        BerthError::Config { message },
    );

    let env: Vec<String> = config.env.iter().map(|(k, v)| format!("{k}={v}")).collect();

    let labels: HashMap<String, String> = [
        (constants::LABEL_FQDN, request.fqdn.clone()),
        (constants::LABEL_TYPE, request.resource_type.to_string()),
        (constants::LABEL_NAME, request.name.clone()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();

    let mut exposed_ports: HashMap<String, HashMap<(), ()>> = HashMap::new();
    let mut port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
    let mut publish = |local: u16, host: Option<u16>, protocol: &str| {
        let key = format!("{local}/{protocol}");
        let _ = exposed_ports.insert(key.clone(), HashMap::new());
        if let Some(host) = host {
            let _ = port_bindings.insert(
                key,
                Some(vec![PortBinding {
                    host_ip: Some(PUBLISH_ADDRESS.to_string()),
                    host_port: Some(host.to_string()),
                }]),
            );
        }
    };
    for port in &config.ports {
        publish(port.local, port.host, port.protocol.as_str());
    }
    for range in &config.port_ranges {
        let (start, end) = range.bounds().map_err(|e| invalid(e.to_string()))?;
        for port in start..=end {
            publish(port, range.enable_host.then_some(port), range.protocol.as_str());
        }
    }

    let mut mounts = Vec::with_capacity(config.volumes.len());
    for volume in &config.volumes {
        let mount = match volume.volume_type {
            VolumeType::Bind => {
                if !std::path::Path::new(&volume.source).is_absolute() {
                    return Err(invalid(format!(
                        "bind mount source '{}' must be an absolute path",
                        volume.source
                    )));
                }
                Mount {
                    typ: Some(MountTypeEnum::BIND),
                    source: Some(volume.source.clone()),
                    bind_options: Some(MountBindOptions {
                        propagation: volume.bind_propagation.map(propagation),
                        non_recursive: volume.bind_propagation_non_recursive.then_some(true),
                        ..Default::default()
                    }),
                    ..Default::default()
                }
            }
            VolumeType::Volume => Mount {
                typ: Some(MountTypeEnum::VOLUME),
                source: Some(volume.source.clone()),
                ..Default::default()
            },
            VolumeType::Tmpfs => Mount {
                typ: Some(MountTypeEnum::TMPFS),
                ..Default::default()
            },
        };
        mounts.push(Mount {
            target: Some(volume.destination.clone()),
            read_only: Some(volume.read_only),
            ..mount
        });
    }

    let limits = config.resources.as_ref();
    let host_config = HostConfig {
        port_bindings: Some(port_bindings),
        mounts: Some(mounts),
        privileged: Some(config.privileged),
        dns: (!config.dns.is_empty()).then(|| config.dns.clone()),
        nano_cpus: limits.and_then(|r| r.cpu).map(|cpu| i64::from(cpu) * 1_000_000),
        cpuset_cpus: limits.filter(|r| !r.cpu_pin.is_empty()).map(|r| {
            r.cpu_pin
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(",")
        }),
        memory: limits
            .and_then(|r| r.memory)
            .and_then(|mb| i64::try_from(mb.saturating_mul(1024 * 1024)).ok()),
        ..Default::default()
    };

    Ok(Config {
        image: Some(config.image.name.clone()),
        hostname: Some(request.name.replace('.', "-")),
        entrypoint: (!config.entrypoint.is_empty()).then(|| config.entrypoint.clone()),
        cmd: (!config.command.is_empty()).then(|| config.command.clone()),
        env: Some(env),
        labels: Some(labels),
        exposed_ports: Some(exposed_ports),
        host_config: Some(host_config),
        ..Default::default()
    })
}

const fn propagation(mode: BindPropagation) -> MountBindOptionsPropagationEnum {
    match mode {
        BindPropagation::Shared => MountBindOptionsPropagationEnum::SHARED,
        BindPropagation::Slave => MountBindOptionsPropagationEnum::SLAVE,
        BindPropagation::Private => MountBindOptionsPropagationEnum::PRIVATE,
        BindPropagation::Rshared => MountBindOptionsPropagationEnum::RSHARED,
        BindPropagation::Rslave => MountBindOptionsPropagationEnum::RSLAVE,
        BindPropagation::Rprivate => MountBindOptionsPropagationEnum::RPRIVATE,
    }
}

/// Container operations over a shared engine client.
#[derive(Clone)]
pub struct ContainerTasks {
    engine: Arc<dyn ContainerEngine>,
    config: Arc<BerthConfig>,
}

impl std::fmt::Debug for ContainerTasks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerTasks")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ContainerTasks {
    /// Creates the task set.
    #[must_use]
    pub fn new(engine: Arc<dyn ContainerEngine>, config: Arc<BerthConfig>) -> Self {
        Self { engine, config }
    }

    /// Returns the underlying engine.
    #[must_use]
    pub fn engine(&self) -> &Arc<dyn ContainerEngine> {
        &self.engine
    }

    /// Pulls an image unless it is cached and pulls are not forced.
    ///
    /// # Errors
    ///
    /// Returns an engine error if the lookup or pull fails.
    pub async fn pull_image(&self, image: &Image) -> Result<()> {
        let canonical = Image {
            name: canonical_image(&image.name),
            ..image.clone()
        };
        if !self.config.force_pull && self.engine.image_exists(&canonical.name).await? {
            debug!(image = %canonical.name, "image cached, skipping pull");
            return Ok(());
        }
        self.engine.pull_image(&canonical).await
    }

    /// Creates, attaches, and starts a container.
    ///
    /// # Errors
    ///
    /// Returns a provider error naming the failed step. Failures after the
    /// container exists remove it exactly once first.
    pub async fn create_container(&self, request: &ContainerRequest) -> Result<ContainerId> {
        let reference = request.reference.as_str();
        info!(reference, fqdn = %request.fqdn, image = %request.config.image.name, "creating container");

        self.pull_image(&request.config.image)
            .await
            .map_err(|e| BerthError::provider(reference, "image pull", e))?;
        let spec = runtime_spec(request)?;
        let id = self
            .engine
            .create_container(&request.fqdn, spec)
            .await
            .map_err(|e| BerthError::provider(reference, "container create", e))?;

        if let Err(e) = self.attach_and_start(&id, request).await {
            warn!(reference, id = %id, error = %e, "rolling back container");
            if let Err(cleanup) = self.engine.remove_container(&id).await {
                warn!(reference, id = %id, error = %cleanup, "rollback remove failed");
            }
            return Err(e);
        }

        info!(reference, id = %id, "container started");
        Ok(id)
    }

    async fn attach_and_start(&self, id: &ContainerId, request: &ContainerRequest) -> Result<()> {
        let reference = request.reference.as_str();
        for attachment in &request.config.networks {
            let network = network_name(&attachment.name)
                .map_err(|e| BerthError::provider(reference, "network attach", e))?;
            self.engine
                .connect_network(
                    id,
                    &network,
                    attachment.ip_address.as_deref(),
                    &attachment.aliases,
                )
                .await
                .map_err(|e| BerthError::provider(reference, "network attach", e))?;
        }
        if let Some(wan) = &self.config.wan_network {
            self.engine
                .connect_network(id, wan, None, &[])
                .await
                .map_err(|e| BerthError::provider(reference, "network attach", e))?;
        }
        self.engine
            .start_container(id)
            .await
            .map_err(|e| BerthError::provider(reference, "container start", e))
    }

    /// Removes a container; an absent container is not an error.
    ///
    /// # Errors
    ///
    /// Returns an engine error for anything other than a missing container.
    pub async fn remove_container(&self, id: &ContainerId) -> Result<()> {
        match self.engine.remove_container(id).await {
            Err(e) if e.is_not_found() => {
                warn!(id = %id, "container already absent");
                Ok(())
            }
            other => other,
        }
    }

    /// Lists containers labelled with `fqdn`.
    ///
    /// # Errors
    ///
    /// Returns an engine error if the lookup fails.
    pub async fn find_containers(&self, fqdn: &str) -> Result<Vec<ContainerId>> {
        self.engine.find_containers(fqdn).await
    }
}
