//! Recording test doubles for the engine, Kubernetes, Helm, and Nomad seams.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use berth_common::config::BerthConfig;
use berth_common::error::{BerthError, Result};
use berth_common::types::ContainerId;
use berth_graph::resource::Image;
use bollard::container::Config;
use tokio::sync::Notify;

use crate::engine::{ContainerEngine, ExecOutput};
use crate::helm::{Helm, HelmRelease};
use crate::kubernetes::{Kubernetes, KubernetesConnector};
use crate::nomad::NomadApi;

/// Configuration with short timeouts rooted at `home`.
pub fn test_config_in(home: &Path) -> BerthConfig {
    let mut config = BerthConfig::with_home(home.to_path_buf());
    config.poll_interval = Duration::from_millis(2);
    config.start_timeout = Duration::from_millis(200);
    config
}

/// Configuration with short timeouts and a throwaway home.
pub fn test_config() -> BerthConfig {
    test_config_in(Path::new("/nonexistent/berth-test"))
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One recorded engine call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ImageExists(String),
    PullImage(String),
    CreateContainer(String),
    ConnectNetwork {
        id: String,
        network: String,
        ip_address: Option<String>,
    },
    StartContainer(String),
    RemoveContainer(String),
    FindContainers(String),
    ContainerLogs(String),
    CopyFromContainer {
        id: String,
        path: String,
    },
    CreateVolume(String),
    CreateNetwork {
        name: String,
        subnet: String,
    },
    FindNetworks(String),
    RemoveNetwork(String),
    CopyImagesToVolume {
        images: Vec<String>,
        volume: String,
    },
    Exec {
        id: String,
        command: Vec<String>,
    },
}

#[derive(Default)]
struct EngineState {
    calls: Vec<Call>,
    created: Vec<(String, Config<String>)>,
    cached: HashSet<String>,
    containers: HashMap<String, Vec<String>>,
    live: HashSet<String>,
    networks: HashMap<String, Vec<String>>,
    files: HashMap<String, Vec<u8>>,
    logs: String,
    fail_connect: Option<String>,
    fail_start: bool,
    fail_create: bool,
    fail_find: bool,
    fail_remove: bool,
    exec_exit_code: i64,
    held_create: Option<(String, Arc<Notify>)>,
}

/// A [`ContainerEngine`] that records every call.
pub struct MockEngine {
    state: Mutex<EngineState>,
    next_id: AtomicUsize,
}

impl Default for MockEngine {
    fn default() -> Self {
        let state = EngineState {
            logs: "starting\nRunning kubelet\n".into(),
            files: HashMap::from([(
                berth_common::constants::K3S_KUBECONFIG_PATH.to_string(),
                crate::kubeconfig::SAMPLE.as_bytes().to_vec(),
            )]),
            ..EngineState::default()
        };
        Self {
            state: Mutex::new(state),
            next_id: AtomicUsize::new(1),
        }
    }
}

impl MockEngine {
    pub fn cache_image(&self, image: &str) {
        let _ = lock(&self.state).cached.insert(image.to_string());
    }

    pub fn with_containers(&self, fqdn: &str, ids: &[&str]) {
        let mut state = lock(&self.state);
        for id in ids {
            let _ = state.live.insert((*id).to_string());
        }
        let _ = state
            .containers
            .insert(fqdn.to_string(), ids.iter().map(ToString::to_string).collect());
    }

    pub fn with_network(&self, name: &str, id: &str) {
        let _ = lock(&self.state)
            .networks
            .insert(name.to_string(), vec![id.to_string()]);
    }

    pub fn set_logs(&self, logs: &str) {
        lock(&self.state).logs = logs.to_string();
    }

    pub fn fail_connect(&self, network: &str) {
        lock(&self.state).fail_connect = Some(network.to_string());
    }

    pub fn fail_start(&self) {
        lock(&self.state).fail_start = true;
    }

    pub fn fail_create(&self) {
        lock(&self.state).fail_create = true;
    }

    pub fn fail_find(&self) {
        lock(&self.state).fail_find = true;
    }

    pub fn fail_remove(&self) {
        lock(&self.state).fail_remove = true;
    }

    /// Makes `create_container` for `name` wait until the returned gate is
    /// notified.
    pub fn hold_create(&self, name: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        lock(&self.state).held_create = Some((name.to_string(), Arc::clone(&gate)));
        gate
    }

    pub fn set_exec_exit_code(&self, code: i64) {
        lock(&self.state).exec_exit_code = code;
    }

    pub fn calls(&self) -> Vec<Call> {
        lock(&self.state).calls.clone()
    }

    pub fn calls_matching(&self, predicate: impl Fn(&Call) -> bool) -> Vec<Call> {
        self.calls().into_iter().filter(|c| predicate(c)).collect()
    }

    pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| predicate(c)).count()
    }

    /// Returns every container spec passed to `create_container`.
    pub fn created(&self) -> Vec<(String, Config<String>)> {
        lock(&self.state).created.clone()
    }

    fn record(&self, call: Call) {
        lock(&self.state).calls.push(call);
    }
}

fn boom(operation: &'static str) -> BerthError {
    BerthError::engine(operation, "boom")
}

#[async_trait]
impl ContainerEngine for MockEngine {
    async fn image_exists(&self, image: &str) -> Result<bool> {
        self.record(Call::ImageExists(image.to_string()));
        Ok(lock(&self.state).cached.contains(image))
    }

    async fn pull_image(&self, image: &Image) -> Result<()> {
        self.record(Call::PullImage(image.name.clone()));
        Ok(())
    }

    async fn create_container(&self, name: &str, config: Config<String>) -> Result<ContainerId> {
        self.record(Call::CreateContainer(name.to_string()));
        let gate = lock(&self.state)
            .held_create
            .as_ref()
            .filter(|(held, _)| held == name)
            .map(|(_, gate)| Arc::clone(gate));
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let mut state = lock(&self.state);
        if state.fail_create {
            return Err(boom("create container"));
        }
        let id = format!("id-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let _ = state.live.insert(id.clone());
        state.created.push((name.to_string(), config));
        Ok(ContainerId::new(id))
    }

    async fn connect_network(
        &self,
        id: &ContainerId,
        network: &str,
        ip_address: Option<&str>,
        _aliases: &[String],
    ) -> Result<()> {
        self.record(Call::ConnectNetwork {
            id: id.to_string(),
            network: network.to_string(),
            ip_address: ip_address.map(ToString::to_string),
        });
        if lock(&self.state).fail_connect.as_deref() == Some(network) {
            return Err(boom("connect network"));
        }
        Ok(())
    }

    async fn start_container(&self, id: &ContainerId) -> Result<()> {
        self.record(Call::StartContainer(id.to_string()));
        if lock(&self.state).fail_start {
            return Err(boom("start container"));
        }
        Ok(())
    }

    async fn remove_container(&self, id: &ContainerId) -> Result<()> {
        self.record(Call::RemoveContainer(id.to_string()));
        let mut state = lock(&self.state);
        if state.fail_remove {
            return Err(boom("remove container"));
        }
        if state.live.remove(id.as_str()) {
            Ok(())
        } else {
            Err(BerthError::NotFound {
                kind: "container",
                id: id.to_string(),
            })
        }
    }

    async fn find_containers(&self, fqdn: &str) -> Result<Vec<ContainerId>> {
        self.record(Call::FindContainers(fqdn.to_string()));
        let state = lock(&self.state);
        if state.fail_find {
            return Err(boom("list containers"));
        }
        Ok(state
            .containers
            .get(fqdn)
            .map(|ids| ids.iter().map(ContainerId::new).collect())
            .unwrap_or_default())
    }

    async fn container_logs(&self, id: &ContainerId) -> Result<String> {
        self.record(Call::ContainerLogs(id.to_string()));
        Ok(lock(&self.state).logs.clone())
    }

    async fn copy_from_container(&self, id: &ContainerId, path: &str) -> Result<Vec<u8>> {
        self.record(Call::CopyFromContainer {
            id: id.to_string(),
            path: path.to_string(),
        });
        lock(&self.state)
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| BerthError::NotFound {
                kind: "file",
                id: path.to_string(),
            })
    }

    async fn create_volume(&self, name: &str) -> Result<String> {
        self.record(Call::CreateVolume(name.to_string()));
        Ok(name.to_string())
    }

    async fn create_network(
        &self,
        name: &str,
        subnet: &str,
        _labels: HashMap<String, String>,
    ) -> Result<String> {
        self.record(Call::CreateNetwork {
            name: name.to_string(),
            subnet: subnet.to_string(),
        });
        let id = format!("net-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let _ = lock(&self.state)
            .networks
            .insert(name.to_string(), vec![id.clone()]);
        Ok(id)
    }

    async fn find_networks(&self, name: &str) -> Result<Vec<String>> {
        self.record(Call::FindNetworks(name.to_string()));
        let state = lock(&self.state);
        if state.fail_find {
            return Err(boom("list networks"));
        }
        Ok(state.networks.get(name).cloned().unwrap_or_default())
    }

    async fn remove_network(&self, id: &str) -> Result<()> {
        self.record(Call::RemoveNetwork(id.to_string()));
        let mut state = lock(&self.state);
        let before = state.networks.len();
        state.networks.retain(|_, ids| !ids.iter().any(|i| i == id));
        if state.networks.len() == before {
            return Err(BerthError::NotFound {
                kind: "network",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn copy_images_to_volume(&self, images: &[String], volume: &str) -> Result<Vec<String>> {
        self.record(Call::CopyImagesToVolume {
            images: images.to_vec(),
            volume: volume.to_string(),
        });
        Ok(vec!["/images/images-test.tar".to_string()])
    }

    async fn exec(&self, id: &ContainerId, command: &[String]) -> Result<ExecOutput> {
        self.record(Call::Exec {
            id: id.to_string(),
            command: command.to_vec(),
        });
        Ok(ExecOutput {
            exit_code: lock(&self.state).exec_exit_code,
            ..ExecOutput::default()
        })
    }
}

/// A [`Kubernetes`] double with fixed readiness.
#[derive(Default)]
pub struct MockKubernetes {
    ready: bool,
    selectors: Mutex<Vec<String>>,
}

impl MockKubernetes {
    pub fn ready() -> Self {
        Self {
            ready: true,
            ..Self::default()
        }
    }

    pub fn never_ready() -> Self {
        Self::default()
    }

    pub fn selectors(&self) -> Vec<String> {
        let mut seen = lock(&self.selectors).clone();
        seen.dedup();
        seen
    }
}

#[async_trait]
impl Kubernetes for MockKubernetes {
    async fn pods_ready(&self, selector: &str) -> Result<bool> {
        lock(&self.selectors).push(selector.to_string());
        Ok(self.ready)
    }
}

/// A [`KubernetesConnector`] handing out one shared [`MockKubernetes`].
pub struct MockConnector {
    pub kubernetes: Arc<MockKubernetes>,
    pub fail: bool,
    connected: Mutex<Vec<PathBuf>>,
}

impl MockConnector {
    pub fn new(kubernetes: MockKubernetes) -> Self {
        Self {
            kubernetes: Arc::new(kubernetes),
            fail: false,
            connected: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(MockKubernetes::ready())
        }
    }

    pub fn connected(&self) -> Vec<PathBuf> {
        lock(&self.connected).clone()
    }
}

#[async_trait]
impl KubernetesConnector for MockConnector {
    async fn connect(&self, kubeconfig: &Path) -> Result<Arc<dyn Kubernetes>> {
        lock(&self.connected).push(kubeconfig.to_path_buf());
        if self.fail {
            return Err(boom("kubernetes connect"));
        }
        Ok(self.kubernetes.clone())
    }
}

/// A [`Helm`] double recording releases.
#[derive(Default)]
pub struct MockHelm {
    pub fail_install: bool,
    pub missing_release: bool,
    pub(crate) installs: Mutex<Vec<HelmRelease>>,
    pub(crate) uninstalls: Mutex<Vec<String>>,
}

impl MockHelm {
    pub fn installs(&self) -> Vec<HelmRelease> {
        lock(&self.installs).clone()
    }

    pub fn uninstalls(&self) -> Vec<String> {
        lock(&self.uninstalls).clone()
    }
}

#[async_trait]
impl Helm for MockHelm {
    async fn install(&self, release: &HelmRelease) -> Result<()> {
        lock(&self.installs).push(release.clone());
        if self.fail_install {
            return Err(boom("helm install"));
        }
        Ok(())
    }

    async fn uninstall(&self, _kubeconfig: &Path, name: &str, _namespace: &str) -> Result<()> {
        lock(&self.uninstalls).push(name.to_string());
        if self.missing_release {
            return Err(BerthError::NotFound {
                kind: "release",
                id: name.to_string(),
            });
        }
        Ok(())
    }
}

/// A [`NomadApi`] double reporting a fixed ready count.
#[derive(Default)]
pub struct MockNomad {
    pub ready: usize,
    addresses: Mutex<Vec<String>>,
}

impl MockNomad {
    pub fn with_ready(ready: usize) -> Self {
        Self {
            ready,
            ..Self::default()
        }
    }

    pub fn addresses(&self) -> Vec<String> {
        lock(&self.addresses).clone()
    }
}

#[async_trait]
impl NomadApi for MockNomad {
    async fn ready_nodes(&self, address: &str) -> Result<usize> {
        lock(&self.addresses).push(address.to_string());
        Ok(self.ready)
    }
}

/// A provider context over `engine` with ready Kubernetes, Helm, and Nomad
/// doubles.
pub fn context(engine: Arc<MockEngine>) -> crate::providers::ProviderContext {
    context_with(
        engine,
        Arc::new(MockConnector::new(MockKubernetes::ready())),
        Arc::new(MockHelm::default()),
        Arc::new(MockNomad::with_ready(1)),
        test_config(),
    )
}

/// A provider context over explicit doubles.
pub fn context_with(
    engine: Arc<MockEngine>,
    kubernetes: Arc<MockConnector>,
    helm: Arc<MockHelm>,
    nomad: Arc<MockNomad>,
    config: BerthConfig,
) -> crate::providers::ProviderContext {
    crate::providers::ProviderContext::new(
        engine,
        kubernetes,
        helm,
        nomad,
        Arc::new(config),
        tokio_util::sync::CancellationToken::new(),
    )
}
