//! Provider for `k8s_cluster` resources backed by k3s.
//!
//! A cluster is one privileged k3s server container plus `nodes - 1` agents.
//! Create runs a fixed sequence: pre-check, images volume, server, log
//! readiness, agents, kubeconfig, pod health check, and image import. Every
//! container goes through [`crate::tasks::ContainerTasks`], so a failed
//! attach or start never leaves a half-created container behind.

use std::sync::Arc;

use berth_common::constants;
use berth_common::error::{BerthError, Result};
use berth_common::types::ContainerId;
use berth_graph::resource::{
    ContainerConfig, Image, K8sClusterConfig, Port, Resource, ResourceKind, Volume, VolumeType,
};
use tracing::{debug, info};

use super::ProviderContext;
use crate::kubeconfig::{self, KubeconfigPaths};
use crate::kubernetes::health_check_pods;
use crate::ports;
use crate::retry::poll;
use crate::tasks::ContainerRequest;

const DRIVER: &str = "k3s";

/// Host and container ports of one k3s server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerPorts {
    /// API server port, identical inside and outside the container.
    pub api: u16,
    /// Host ports published for the fixed node ports.
    pub node_ports: [u16; 2],
}

impl ServerPorts {
    /// Reserves free high host ports for a new server.
    ///
    /// # Errors
    ///
    /// Returns an error if no free port is left in the high range.
    pub fn allocate() -> Result<Self> {
        let ports = ports::allocate(3)?;
        Ok(Self {
            api: ports[0],
            node_ports: [ports[1], ports[2]],
        })
    }
}

/// Builds the container configuration of a k3s server.
///
/// Ports are ordered: API port, the fixed node ports, then user ports and
/// ranges.
#[must_use]
pub fn server_config(
    cluster: &K8sClusterConfig,
    ports: ServerPorts,
    server_fqdn: &str,
    token: &str,
) -> ContainerConfig {
    let mut published = vec![Port::published(ports.api, ports.api)];
    published.extend(
        constants::K3S_NODE_PORTS
            .iter()
            .zip(ports.node_ports)
            .map(|(local, host)| Port::published(*local, host)),
    );
    published.extend(cluster.ports.iter().cloned());

    let mut env = cluster.env.clone();
    let _ = env.insert(
        "K3S_KUBECONFIG_OUTPUT".to_string(),
        constants::K3S_KUBECONFIG_PATH.to_string(),
    );

    ContainerConfig {
        image: Image::new(k3s_image(cluster)),
        networks: cluster.networks.clone(),
        command: vec![
            "server".to_string(),
            format!("--https-listen-port={}", ports.api),
            "--disable=traefik".to_string(),
            format!("--tls-san={server_fqdn}"),
            format!("--token={token}"),
        ],
        env,
        volumes: cluster_volumes(cluster),
        ports: published,
        port_ranges: cluster.port_ranges.clone(),
        privileged: true,
        ..ContainerConfig::default()
    }
}

/// Builds the container configuration of a k3s agent joining `server_fqdn`.
#[must_use]
pub fn agent_config(
    cluster: &K8sClusterConfig,
    api_port: u16,
    server_fqdn: &str,
    token: &str,
) -> ContainerConfig {
    ContainerConfig {
        image: Image::new(k3s_image(cluster)),
        networks: cluster.networks.clone(),
        command: vec![
            "agent".to_string(),
            format!("--server=https://{server_fqdn}:{api_port}"),
            format!("--token={token}"),
        ],
        env: cluster.env.clone(),
        volumes: cluster_volumes(cluster),
        privileged: true,
        ..ContainerConfig::default()
    }
}

fn k3s_image(cluster: &K8sClusterConfig) -> String {
    let version = cluster
        .version
        .as_deref()
        .unwrap_or(constants::K3S_DEFAULT_VERSION);
    format!("{}:{version}", constants::K3S_IMAGE)
}

fn cluster_volumes(cluster: &K8sClusterConfig) -> Vec<Volume> {
    let mut volumes = vec![Volume {
        source: constants::volume_fqdn(constants::IMAGES_VOLUME),
        destination: constants::IMAGES_MOUNT.to_string(),
        volume_type: VolumeType::Volume,
        ..Volume::default()
    }];
    volumes.extend(cluster.volumes.iter().cloned());
    volumes
}

/// Runs a k3s cluster.
#[derive(Debug)]
pub struct K8sClusterProvider {
    resource: Arc<Resource>,
    config: K8sClusterConfig,
    context: ProviderContext,
}

impl K8sClusterProvider {
    /// Creates the provider.
    #[must_use]
    pub const fn new(resource: Arc<Resource>, config: K8sClusterConfig, context: ProviderContext) -> Self {
        Self {
            resource,
            config,
            context,
        }
    }

    fn reference(&self) -> String {
        self.resource.reference().to_string()
    }

    /// Returns the FQDN of the server container.
    #[must_use]
    pub fn server_fqdn(&self) -> String {
        format!("server.{}", self.resource.fqdn())
    }

    fn agent_fqdns(&self) -> Vec<String> {
        (1..self.config.nodes.max(1))
            .map(|i| format!("agent-{i}.{}", self.resource.fqdn()))
            .collect()
    }

    fn request(&self, fqdn: String, name: String, config: ContainerConfig) -> ContainerRequest {
        ContainerRequest {
            reference: self.reference(),
            fqdn,
            name,
            resource_type: self.resource.resource_type(),
            config,
        }
    }

    /// Starts the cluster and waits until its pods are healthy.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if a server for this cluster is running,
    /// `Timeout` if readiness or the health check exceeds the start
    /// timeout, or a provider error naming the failed step.
    pub async fn create(&self) -> Result<()> {
        let reference = self.reference();
        if self.config.driver != DRIVER {
            return Err(BerthError::provider(
                reference,
                "validate",
                BerthError::Config {
                    message: format!("unsupported cluster driver '{}'", self.config.driver),
                },
            ));
        }

        let server_fqdn = self.server_fqdn();
        if !self.lookup().await?.is_empty() {
            return Err(BerthError::provider(
                reference,
                "pre-check",
                BerthError::AlreadyExists {
                    kind: "cluster",
                    id: server_fqdn,
                },
            ));
        }

        info!(reference = %reference, version = %k3s_image(&self.config), "creating k3s cluster");
        let volume = self
            .context
            .engine()
            .create_volume(&constants::volume_fqdn(constants::IMAGES_VOLUME))
            .await
            .map_err(|e| BerthError::provider(reference.as_str(), "volume create", e))?;
        debug!(reference = %reference, volume = %volume, "images volume ready");

        let ports = ServerPorts::allocate()
            .map_err(|e| BerthError::provider(reference.as_str(), "port allocation", e))?;
        let token = uuid::Uuid::new_v4().simple().to_string();

        let server = server_config(&self.config, ports, &server_fqdn, &token);
        let server_id = self
            .context
            .tasks
            .create_container(&self.request(
                server_fqdn.clone(),
                format!("server.{}", self.resource.name()),
                server.clone(),
            ))
            .await?;
        self.resource.add_child(Arc::new(Resource::new(
            format!("server.{}", self.resource.name()),
            ResourceKind::Container(server),
        )));

        self.wait_for_server(&server_id).await?;

        for (i, fqdn) in self.agent_fqdns().into_iter().enumerate() {
            let agent = agent_config(&self.config, ports.api, &server_fqdn, &token);
            let name = format!("agent-{}.{}", i + 1, self.resource.name());
            let _ = self
                .context
                .tasks
                .create_container(&self.request(fqdn, name.clone(), agent.clone()))
                .await?;
            self.resource
                .add_child(Arc::new(Resource::new(name, ResourceKind::Container(agent))));
        }

        let paths = self.write_kubeconfig(&server_id, &server_fqdn).await?;
        self.health_check(&paths).await?;
        self.import_images(&server_id).await?;

        info!(reference = %reference, api_port = ports.api, kubeconfig = %paths.local.display(), "cluster ready");
        Ok(())
    }

    async fn wait_for_server(&self, id: &ContainerId) -> Result<()> {
        let reference = self.reference();
        let engine = self.context.engine();
        info!(reference = %reference, id = %id, "waiting for k3s server");
        poll(
            self.context.poll_policy(),
            &self.context.cancel,
            &reference,
            "readiness",
            || async move {
                let logs = engine
                    .container_logs(id)
                    .await
                    .map_err(|e| BerthError::provider(self.reference(), "readiness", e))?;
                Ok(logs.contains(constants::K3S_READY_MARKER))
            },
        )
        .await
    }

    async fn write_kubeconfig(&self, id: &ContainerId, server_fqdn: &str) -> Result<KubeconfigPaths> {
        let reference = self.reference();
        let step = |e: BerthError| BerthError::provider(reference.as_str(), "kubeconfig", e);

        let raw = self
            .context
            .engine()
            .copy_from_container(id, constants::K3S_KUBECONFIG_PATH)
            .await
            .map_err(step)?;
        let raw = String::from_utf8(raw).map_err(|e| {
            step(BerthError::Config {
                message: format!("kubeconfig is not UTF-8: {e}"),
            })
        })?;

        let paths = KubeconfigPaths::new(&self.context.config.cache_dir, self.resource.name());
        kubeconfig::write_kubeconfigs(&raw, &paths, &self.context.published_host(), server_fqdn)
            .await
            .map_err(step)?;
        debug!(reference = %reference, path = %paths.local.display(), "wrote kubeconfig");
        Ok(paths)
    }

    async fn health_check(&self, paths: &KubeconfigPaths) -> Result<()> {
        let reference = self.reference();
        let client = self
            .context
            .kubernetes
            .connect(&paths.local)
            .await
            .map_err(|e| BerthError::provider(reference.as_str(), "health check", e))?;
        health_check_pods(
            client.as_ref(),
            &[String::new()],
            self.context.poll_policy(),
            &self.context.cancel,
            &reference,
        )
        .await
    }

    async fn import_images(&self, server: &ContainerId) -> Result<()> {
        if self.config.images.is_empty() {
            return Ok(());
        }
        let reference = self.reference();
        let step = |e: BerthError| BerthError::provider(reference.as_str(), "image import", e);

        let mut names = Vec::with_capacity(self.config.images.len());
        for image in &self.config.images {
            self.context.tasks.pull_image(image).await.map_err(step)?;
            names.push(crate::tasks::canonical_image(&image.name));
        }

        let archives = self
            .context
            .engine()
            .copy_images_to_volume(&names, &constants::volume_fqdn(constants::IMAGES_VOLUME))
            .await
            .map_err(step)?;
        for archive in archives {
            let command: Vec<String> = ["ctr", "image", "import", archive.as_str()]
                .into_iter()
                .map(String::from)
                .collect();
            let output = self
                .context
                .engine()
                .exec(server, &command)
                .await
                .map_err(step)?;
            if !output.success() {
                return Err(step(BerthError::engine(
                    "ctr image import",
                    format!("exit code {}: {}", output.exit_code, output.stderr.trim()),
                )));
            }
        }
        info!(reference = %reference, images = ?names, "imported images");
        Ok(())
    }

    /// Removes the server and agent containers.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup or a removal fails.
    pub async fn destroy(&self) -> Result<()> {
        let reference = self.reference();
        info!(reference = %reference, "destroying k3s cluster");
        let mut fqdns = vec![self.server_fqdn()];
        fqdns.extend(self.agent_fqdns());
        self.context.remove_containers(&reference, &fqdns).await?;

        let dir = constants::cluster_config_dir(&self.context.config.cache_dir, self.resource.name());
        match tokio::fs::remove_dir_all(&dir).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(BerthError::provider(
                reference,
                "kubeconfig remove",
                BerthError::Io { path: dir, source: e },
            )),
            _ => Ok(()),
        }
    }

    /// Returns the IDs of the server containers.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    pub async fn lookup(&self) -> Result<Vec<String>> {
        self.context
            .container_ids(&self.reference(), &self.server_fqdn())
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use berth_common::error::ErrorKind;
    use berth_graph::resource::{NetworkAttachment, PortRange, Protocol};

    use super::*;
    use crate::testing::{
        self, Call, MockConnector, MockEngine, MockHelm, MockKubernetes, MockNomad,
        test_config_in,
    };

    const SERVER: &str = "server.dev.k8s_cluster.berth.run";

    fn port_pairs(config: &ContainerConfig) -> Vec<(u16, Option<u16>)> {
        config.ports.iter().map(|p| (p.local, p.host)).collect()
    }

    fn cluster() -> K8sClusterConfig {
        K8sClusterConfig {
            networks: vec![NetworkAttachment::new("network.cloud")],
            ..K8sClusterConfig::default()
        }
    }

    fn provider_with(
        engine: &Arc<MockEngine>,
        config: K8sClusterConfig,
        kubernetes: MockKubernetes,
        settings: berth_common::config::BerthConfig,
    ) -> K8sClusterProvider {
        let resource = Arc::new(Resource::new("dev", ResourceKind::K8sCluster(config.clone())));
        let context = testing::context_with(
            Arc::clone(engine),
            Arc::new(MockConnector::new(kubernetes)),
            Arc::new(MockHelm::default()),
            Arc::new(MockNomad::default()),
            settings,
        );
        K8sClusterProvider::new(resource, config, context)
    }

    #[test]
    fn server_ports_start_with_api_then_node_ports() {
        let mut config = cluster();
        config.ports = vec![Port::published(8080, 8080)];
        config.port_ranges = vec![PortRange {
            range: "9000-9002".into(),
            enable_host: true,
            protocol: Protocol::Tcp,
        }];
        let ports = ServerPorts {
            api: 64010,
            node_ports: [64011, 64012],
        };

        let server = server_config(&config, ports, SERVER, "tok");
        assert_eq!(
            port_pairs(&server),
            vec![
                (64010, Some(64010)),
                (30000, Some(64011)),
                (30001, Some(64012)),
                (8080, Some(8080)),
            ]
        );
        assert_eq!(server.port_ranges, config.port_ranges);
        assert!(server.privileged);
        assert_eq!(
            server.command,
            vec![
                "server",
                "--https-listen-port=64010",
                "--disable=traefik",
                format!("--tls-san={SERVER}").as_str(),
                "--token=tok",
            ]
        );
        assert_eq!(server.env["K3S_KUBECONFIG_OUTPUT"], "/output/kubeconfig.yaml");
        assert_eq!(server.volumes[0].destination, "/images");
        assert_eq!(server.volumes[0].volume_type, VolumeType::Volume);
    }

    #[test]
    fn allocated_ports_are_high() {
        let ports = ServerPorts::allocate().expect("ports");
        assert!(ports.api >= constants::HIGH_PORT_START);
        assert!(ports.node_ports.iter().all(|p| *p >= constants::HIGH_PORT_START));
    }

    #[tokio::test]
    async fn existing_server_fails_without_further_calls() {
        let engine = Arc::new(MockEngine::default());
        engine.with_containers(SERVER, &["abc"]);
        let provider = provider_with(&engine, cluster(), MockKubernetes::ready(), testing::test_config());

        let err = provider.create().await.unwrap_err();
        assert!(err.to_string().contains("already exists"), "got: {err}");
        assert_eq!(engine.calls(), vec![Call::FindContainers(SERVER.into())]);
    }

    #[tokio::test]
    async fn lookup_error_aborts_create() {
        let engine = Arc::new(MockEngine::default());
        engine.fail_find();
        let provider = provider_with(&engine, cluster(), MockKubernetes::ready(), testing::test_config());

        let err = provider.create().await.unwrap_err();
        assert!(err.to_string().contains("lookup"), "got: {err}");
        assert_eq!(engine.count(|c| matches!(c, Call::CreateContainer(_))), 0);
    }

    #[tokio::test]
    async fn create_starts_server_and_writes_kubeconfigs() {
        let home = tempfile::tempdir().expect("tempdir");
        let engine = Arc::new(MockEngine::default());
        let settings = test_config_in(home.path());
        let cache = settings.cache_dir.clone();
        let provider = provider_with(&engine, cluster(), MockKubernetes::ready(), settings);

        provider.create().await.expect("create");

        let created = engine.created();
        assert_eq!(created.len(), 1);
        let (name, spec) = &created[0];
        assert_eq!(name, SERVER);
        let command = spec.cmd.clone().expect("cmd");
        let api: u16 = command[1]
            .strip_prefix("--https-listen-port=")
            .and_then(|p| p.parse().ok())
            .expect("api port");
        assert!(api >= constants::HIGH_PORT_START);
        assert_eq!(
            engine.calls_matching(|c| matches!(c, Call::CreateVolume(_))),
            vec![Call::CreateVolume("images.volume.berth.run".into())]
        );

        let local = std::fs::read_to_string(cache.join("dev/kubeconfig.yaml")).expect("local");
        assert!(local.contains("https://127.0.0.1:64000"), "got: {local}");
        let docker = std::fs::read_to_string(cache.join("dev/kubeconfig-docker.yaml")).expect("docker");
        assert!(docker.contains(&format!("https://{SERVER}:64000")), "got: {docker}");

        assert_eq!(provider.resource.children().len(), 1);
        assert_eq!(engine.count(|c| matches!(c, Call::Exec { .. })), 0);
    }

    #[tokio::test]
    async fn kubeconfig_uses_remote_engine_host() {
        let home = tempfile::tempdir().expect("tempdir");
        let engine = Arc::new(MockEngine::default());
        let mut settings = test_config_in(home.path());
        settings.docker_host = Some("tcp://test.com".into());
        let cache = settings.cache_dir.clone();
        let provider = provider_with(&engine, cluster(), MockKubernetes::ready(), settings);

        provider.create().await.expect("create");

        let local = std::fs::read_to_string(cache.join("dev/kubeconfig.yaml")).expect("local");
        assert!(local.contains("https://test.com:64000"), "got: {local}");
        assert!(!local.contains("127.0.0.1"));
    }

    #[tokio::test]
    async fn readiness_times_out_when_kubelet_never_runs() {
        let home = tempfile::tempdir().expect("tempdir");
        let engine = Arc::new(MockEngine::default());
        engine.set_logs("starting\n");
        let mut settings = test_config_in(home.path());
        settings.start_timeout = Duration::from_millis(20);
        let provider = provider_with(&engine, cluster(), MockKubernetes::ready(), settings);

        let err = provider.create().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(err.to_string().contains("readiness"), "got: {err}");
        assert!(err.to_string().contains("k8s_cluster.dev"), "got: {err}");
        assert_eq!(engine.count(|c| matches!(c, Call::CopyFromContainer { .. })), 0);
    }

    #[tokio::test]
    async fn unhealthy_pods_time_out_and_leave_server_running() {
        let home = tempfile::tempdir().expect("tempdir");
        let engine = Arc::new(MockEngine::default());
        let mut settings = test_config_in(home.path());
        settings.start_timeout = Duration::from_millis(20);
        let provider = provider_with(&engine, cluster(), MockKubernetes::never_ready(), settings);

        let err = provider.create().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(err.to_string().contains("health check"), "got: {err}");
        assert_eq!(engine.count(|c| matches!(c, Call::RemoveContainer(_))), 0);
    }

    #[tokio::test]
    async fn extra_nodes_join_as_agents() {
        let home = tempfile::tempdir().expect("tempdir");
        let engine = Arc::new(MockEngine::default());
        let config = K8sClusterConfig {
            nodes: 3,
            ..cluster()
        };
        let provider = provider_with(&engine, config, MockKubernetes::ready(), test_config_in(home.path()));

        provider.create().await.expect("create");

        let names: Vec<String> = engine.created().into_iter().map(|(n, _)| n).collect();
        assert_eq!(
            names,
            vec![
                SERVER.to_string(),
                "agent-1.dev.k8s_cluster.berth.run".to_string(),
                "agent-2.dev.k8s_cluster.berth.run".to_string(),
            ]
        );
        let agent_cmd = engine.created()[1].1.cmd.clone().expect("cmd");
        assert_eq!(agent_cmd[0], "agent");
        assert!(agent_cmd[1].starts_with(&format!("--server=https://{SERVER}:")));
    }

    #[tokio::test]
    async fn images_are_staged_once_and_imported() {
        let home = tempfile::tempdir().expect("tempdir");
        let engine = Arc::new(MockEngine::default());
        let config = K8sClusterConfig {
            images: vec![Image::new("consul:1.6.1"), Image::new("vault")],
            ..cluster()
        };
        let provider = provider_with(&engine, config, MockKubernetes::ready(), test_config_in(home.path()));

        provider.create().await.expect("create");

        assert_eq!(
            engine.calls_matching(|c| matches!(c, Call::CopyImagesToVolume { .. })),
            vec![Call::CopyImagesToVolume {
                images: vec!["consul:1.6.1".into(), "vault:latest".into()],
                volume: "images.volume.berth.run".into(),
            }]
        );
        assert_eq!(
            engine.calls_matching(|c| matches!(c, Call::Exec { .. })),
            vec![Call::Exec {
                id: "id-1".into(),
                command: vec![
                    "ctr".into(),
                    "image".into(),
                    "import".into(),
                    "/images/images-test.tar".into(),
                ],
            }]
        );
    }

    #[tokio::test]
    async fn failed_import_is_an_error() {
        let home = tempfile::tempdir().expect("tempdir");
        let engine = Arc::new(MockEngine::default());
        engine.set_exec_exit_code(1);
        let config = K8sClusterConfig {
            images: vec![Image::new("consul:1.6.1")],
            ..cluster()
        };
        let provider = provider_with(&engine, config, MockKubernetes::ready(), test_config_in(home.path()));

        let err = provider.create().await.unwrap_err();
        assert!(err.to_string().contains("image import"), "got: {err}");
    }

    #[tokio::test]
    async fn unknown_driver_is_rejected() {
        let engine = Arc::new(MockEngine::default());
        let config = K8sClusterConfig {
            driver: "kind".into(),
            ..cluster()
        };
        let provider = provider_with(&engine, config, MockKubernetes::ready(), testing::test_config());

        let err = provider.create().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(engine.calls().is_empty());
    }

    #[tokio::test]
    async fn destroy_without_containers_removes_nothing() {
        let engine = Arc::new(MockEngine::default());
        let provider = provider_with(&engine, cluster(), MockKubernetes::ready(), testing::test_config());

        provider.destroy().await.expect("destroy");
        assert_eq!(engine.count(|c| matches!(c, Call::RemoveContainer(_))), 0);
    }

    #[tokio::test]
    async fn destroy_removes_server_and_agents() {
        let home = tempfile::tempdir().expect("tempdir");
        let engine = Arc::new(MockEngine::default());
        engine.with_containers(SERVER, &["s1"]);
        engine.with_containers("agent-1.dev.k8s_cluster.berth.run", &["a1"]);
        let config = K8sClusterConfig {
            nodes: 2,
            ..cluster()
        };
        let settings = test_config_in(home.path());
        std::fs::create_dir_all(settings.cache_dir.join("dev")).expect("mkdir");
        let cache = settings.cache_dir.clone();
        let provider = provider_with(&engine, config, MockKubernetes::ready(), settings);

        provider.destroy().await.expect("destroy");
        assert_eq!(
            engine.calls_matching(|c| matches!(c, Call::RemoveContainer(_))),
            vec![
                Call::RemoveContainer("s1".into()),
                Call::RemoveContainer("a1".into()),
            ]
        );
        assert!(!cache.join("dev").exists());
    }
}
