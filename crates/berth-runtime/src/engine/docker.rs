//! Docker implementation of [`ContainerEngine`] over `bollard`.

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use berth_common::constants;
use berth_common::error::{BerthError, Result};
use berth_common::types::ContainerId;
use berth_graph::resource::Image;
use bollard::Docker;
use bollard::auth::DockerCredentials;
use bollard::container::{
    Config, CreateContainerOptions, DownloadFromContainerOptions, ListContainersOptions,
    LogOutput, LogsOptions, RemoveContainerOptions, StartContainerOptions,
    UploadToContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::{
    EndpointIpamConfig, EndpointSettings, HostConfig, Ipam, IpamConfig, Mount, MountTypeEnum,
};
use bollard::network::{
    ConnectNetworkOptions, CreateNetworkOptions, DisconnectNetworkOptions, ListNetworksOptions,
};
use bollard::volume::CreateVolumeOptions;
use futures::{StreamExt, future};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use super::{ContainerEngine, ExecOutput};

/// Default network the engine attaches new containers to.
const DEFAULT_BRIDGE: &str = "bridge";

/// A [`ContainerEngine`] backed by a Docker daemon.
#[derive(Debug, Clone)]
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    /// Connects to the daemon named by `DOCKER_HOST`, or the local socket.
    ///
    /// # Errors
    ///
    /// Returns an engine error if the client cannot be configured.
    pub fn connect(docker_host: Option<&str>) -> Result<Self> {
        let docker = match docker_host {
            Some(host) if host.starts_with("tcp://") => Docker::connect_with_http_defaults(),
            _ => Docker::connect_with_local_defaults(),
        }
        .map_err(|e| BerthError::engine("connect", e))?;
        Ok(Self { docker })
    }

    /// Wraps an existing client.
    #[must_use]
    pub const fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// Checks that the daemon answers.
    ///
    /// # Errors
    ///
    /// Returns an engine error if the daemon is unreachable.
    pub async fn ping(&self) -> Result<()> {
        let _ = self
            .docker
            .ping()
            .await
            .map_err(|e| BerthError::engine("ping", e))?;
        Ok(())
    }

    async fn export_images(&self, images: &[String], path: &Path) -> Result<()> {
        let names: Vec<&str> = images.iter().map(String::as_str).collect();
        let mut stream = self.docker.export_images(&names);
        let mut file = tokio::fs::File::create(path).await.map_err(io_at(path))?;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| BerthError::engine("export images", e))?;
            file.write_all(&chunk).await.map_err(io_at(path))?;
        }
        file.flush().await.map_err(io_at(path))
    }

    async fn upload_archive(&self, id: &ContainerId, archive: &Path) -> Result<()> {
        let file = tokio::fs::File::open(archive).await.map_err(io_at(archive))?;
        // A read error ends the stream early; the daemon rejects the short tar.
        let body = ReaderStream::new(file)
            .take_while(|chunk| future::ready(chunk.is_ok()))
            .filter_map(|chunk| future::ready(chunk.ok()));
        let options = UploadToContainerOptions {
            path: constants::IMAGES_MOUNT.to_string(),
            ..Default::default()
        };
        self.docker
            .upload_to_container_streaming(id.as_str(), Some(options), body)
            .await
            .map_err(|e| BerthError::engine("upload images", e))
    }

    async fn run_helper(&self, volume: &str) -> Result<ContainerId> {
        if !self.image_exists(constants::HELPER_IMAGE).await? {
            self.pull_image(&Image::new(constants::HELPER_IMAGE)).await?;
        }
        let name = format!("helper-{}.{}", uuid::Uuid::new_v4(), constants::DOMAIN);
        let config = Config {
            image: Some(constants::HELPER_IMAGE.to_string()),
            cmd: Some(vec!["tail".into(), "-f".into(), "/dev/null".into()]),
            host_config: Some(HostConfig {
                mounts: Some(vec![Mount {
                    target: Some(constants::IMAGES_MOUNT.to_string()),
                    source: Some(volume.to_string()),
                    typ: Some(MountTypeEnum::VOLUME),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };
        let id = self.create_container(&name, config).await?;
        super::start_or_remove(self, &id).await?;
        Ok(id)
    }
}

fn engine_error<'a>(
    operation: &'static str,
    kind: &'static str,
    id: &'a str,
) -> impl FnOnce(bollard::errors::Error) -> BerthError + 'a {
    move |e| match e {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        } => BerthError::NotFound {
            kind,
            id: id.to_string(),
        },
        other => BerthError::engine(operation, other),
    }
}

fn io_error(path: &str) -> impl FnOnce(std::io::Error) -> BerthError + '_ {
    move |source| BerthError::Io {
        path: PathBuf::from(path),
        source,
    }
}

/// Returns the archive name for a set of images.
///
/// The name is derived from the image list so repeated imports of the same
/// set reuse one file in the volume.
#[must_use]
pub fn images_archive_name(images: &[String]) -> String {
    let mut hasher = Sha256::new();
    for image in images {
        hasher.update(image.as_bytes());
        hasher.update(b"\n");
    }
    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    format!("images-{hex}.tar")
}

fn io_at(path: &Path) -> impl FnOnce(std::io::Error) -> BerthError + use<> {
    let path = path.to_path_buf();
    move |source| BerthError::Io { path, source }
}

/// Packs the file at `source` into a tar at `archive` under the entry `name`.
///
/// Runs on the blocking pool; the export of a large image set is never held
/// in memory.
async fn pack_archive(name: String, source: PathBuf, archive: PathBuf) -> Result<()> {
    tokio::task::spawn_blocking(move || {
        let mut input = std::fs::File::open(&source).map_err(io_at(&source))?;
        let output = std::fs::File::create(&archive).map_err(io_at(&archive))?;
        let mut builder = tar::Builder::new(output);
        builder
            .append_file(&name, &mut input)
            .map_err(io_at(&archive))?;
        builder.finish().map_err(io_at(&archive))
    })
    .await
    .map_err(|e| BerthError::engine("pack images", e))?
}

fn first_file_in_tar(archive: &[u8], path: &str) -> Result<Vec<u8>> {
    let mut archive = tar::Archive::new(archive);
    for entry in archive.entries().map_err(io_error(path))? {
        let mut entry = entry.map_err(io_error(path))?;
        if entry.header().entry_type().is_file() {
            let mut contents = Vec::new();
            let _ = entry.read_to_end(&mut contents).map_err(io_error(path))?;
            return Ok(contents);
        }
    }
    Err(BerthError::NotFound {
        kind: "file",
        id: path.to_string(),
    })
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn image_exists(&self, image: &str) -> Result<bool> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(e) => {
                let err = engine_error("inspect image", "image", image)(e);
                if err.is_not_found() { Ok(false) } else { Err(err) }
            }
        }
    }

    async fn pull_image(&self, image: &Image) -> Result<()> {
        info!(image = %image.name, "pulling image");
        let options = CreateImageOptions {
            from_image: image.name.as_str(),
            ..Default::default()
        };
        let credentials = image.username.as_ref().map(|username| DockerCredentials {
            username: Some(username.clone()),
            password: image.password.clone(),
            ..Default::default()
        });

        let mut stream = self.docker.create_image(Some(options), None, credentials);
        while let Some(result) = stream.next().await {
            let progress = result.map_err(|e| BerthError::engine("pull image", e))?;
            if let Some(status) = progress.status {
                debug!(image = %image.name, status = %status, "pull progress");
            }
        }
        Ok(())
    }

    async fn create_container(&self, name: &str, config: Config<String>) -> Result<ContainerId> {
        let options = CreateContainerOptions {
            name,
            platform: None,
        };
        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| BerthError::engine("create container", e))?;
        let id = ContainerId::new(response.id);

        // New containers land on the default bridge; berth attaches networks explicitly.
        let detach = DisconnectNetworkOptions {
            container: id.as_str(),
            force: true,
        };
        if let Err(e) = self.docker.disconnect_network(DEFAULT_BRIDGE, detach).await {
            debug!(id = %id, error = %e, "container was not on the default bridge");
        }

        debug!(name, id = %id, "created container");
        Ok(id)
    }

    async fn connect_network(
        &self,
        id: &ContainerId,
        network: &str,
        ip_address: Option<&str>,
        aliases: &[String],
    ) -> Result<()> {
        let endpoint_config = EndpointSettings {
            ipam_config: ip_address.map(|ip| EndpointIpamConfig {
                ipv4_address: Some(ip.to_string()),
                ..Default::default()
            }),
            aliases: (!aliases.is_empty()).then(|| aliases.to_vec()),
            ..Default::default()
        };
        let options = ConnectNetworkOptions {
            container: id.as_str(),
            endpoint_config,
        };
        self.docker
            .connect_network(network, options)
            .await
            .map_err(engine_error("connect network", "network", network))?;
        debug!(id = %id, network, "attached network");
        Ok(())
    }

    async fn start_container(&self, id: &ContainerId) -> Result<()> {
        self.docker
            .start_container(id.as_str(), None::<StartContainerOptions<String>>)
            .await
            .map_err(engine_error("start container", "container", id.as_str()))
    }

    async fn remove_container(&self, id: &ContainerId) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        self.docker
            .remove_container(id.as_str(), Some(options))
            .await
            .map_err(engine_error("remove container", "container", id.as_str()))?;
        debug!(id = %id, "removed container");
        Ok(())
    }

    async fn find_containers(&self, fqdn: &str) -> Result<Vec<ContainerId>> {
        let filters: HashMap<String, Vec<String>> = [(
            "label".to_string(),
            vec![format!("{}={fqdn}", constants::LABEL_FQDN)],
        )]
        .into_iter()
        .collect();
        let options = ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        };
        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| BerthError::engine("list containers", e))?;
        Ok(containers
            .into_iter()
            .filter_map(|c| c.id)
            .map(ContainerId::new)
            .collect())
    }

    async fn container_logs(&self, id: &ContainerId) -> Result<String> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            ..Default::default()
        };
        let mut stream = self.docker.logs(id.as_str(), Some(options));
        let mut output = String::new();
        while let Some(result) = stream.next().await {
            let log = result.map_err(engine_error("container logs", "container", id.as_str()))?;
            output.push_str(&log.to_string());
        }
        Ok(output)
    }

    async fn copy_from_container(&self, id: &ContainerId, path: &str) -> Result<Vec<u8>> {
        let options = DownloadFromContainerOptions { path };
        let mut stream = self.docker.download_from_container(id.as_str(), Some(options));
        let mut archive = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(engine_error("copy from container", "file", path))?;
            archive.extend_from_slice(&chunk);
        }
        first_file_in_tar(&archive, path)
    }

    async fn create_volume(&self, name: &str) -> Result<String> {
        let options = CreateVolumeOptions {
            name,
            ..Default::default()
        };
        let volume = self
            .docker
            .create_volume(options)
            .await
            .map_err(|e| BerthError::engine("create volume", e))?;
        Ok(volume.name)
    }

    async fn create_network(
        &self,
        name: &str,
        subnet: &str,
        labels: HashMap<String, String>,
    ) -> Result<String> {
        let ipam = Ipam {
            config: (!subnet.is_empty()).then(|| {
                vec![IpamConfig {
                    subnet: Some(subnet.to_string()),
                    ..Default::default()
                }]
            }),
            ..Default::default()
        };
        let options = CreateNetworkOptions {
            name: name.to_string(),
            check_duplicate: true,
            driver: "bridge".to_string(),
            attachable: true,
            ipam,
            labels,
            ..Default::default()
        };
        let response = self
            .docker
            .create_network(options)
            .await
            .map_err(|e| BerthError::engine("create network", e))?;
        info!(network = name, id = %response.id, "created network");
        Ok(response.id)
    }

    async fn find_networks(&self, name: &str) -> Result<Vec<String>> {
        let filters: HashMap<String, Vec<String>> = [("name".to_string(), vec![name.to_string()])]
            .into_iter()
            .collect();
        let networks = self
            .docker
            .list_networks(Some(ListNetworksOptions { filters }))
            .await
            .map_err(|e| BerthError::engine("list networks", e))?;
        // The name filter matches substrings.
        Ok(networks
            .into_iter()
            .filter(|n| n.name.as_deref() == Some(name))
            .filter_map(|n| n.id)
            .collect())
    }

    async fn remove_network(&self, id: &str) -> Result<()> {
        self.docker
            .remove_network(id)
            .await
            .map_err(engine_error("remove network", "network", id))
    }

    async fn copy_images_to_volume(&self, images: &[String], volume: &str) -> Result<Vec<String>> {
        let name = images_archive_name(images);
        info!(images = ?images, volume, archive = %name, "staging images");

        let staging = tempfile::tempdir().map_err(io_at(&std::env::temp_dir()))?;
        let exported = staging.path().join("images.export");
        let archive = staging.path().join(&name);
        self.export_images(images, &exported).await?;
        pack_archive(name.clone(), exported, archive.clone()).await?;

        let helper = self.run_helper(volume).await?;
        let upload = self.upload_archive(&helper, &archive).await;
        let removed = self.remove_container(&helper).await;
        upload?;
        removed?;

        Ok(vec![format!("{}/{name}", constants::IMAGES_MOUNT)])
    }

    async fn exec(&self, id: &ContainerId, command: &[String]) -> Result<ExecOutput> {
        debug!(id = %id, cmd = ?command, "executing command");
        let options = CreateExecOptions {
            cmd: Some(command.to_vec()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };
        let exec = self
            .docker
            .create_exec(id.as_str(), options)
            .await
            .map_err(engine_error("create exec", "container", id.as_str()))?;

        let mut output = ExecOutput::default();
        let started = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| BerthError::engine("start exec", e))?;
        if let StartExecResults::Attached { output: mut stream, .. } = started {
            while let Some(result) = stream.next().await {
                match result.map_err(|e| BerthError::engine("exec output", e))? {
                    LogOutput::StdOut { message } => {
                        output.stdout.push_str(&String::from_utf8_lossy(&message));
                    }
                    LogOutput::StdErr { message } => {
                        output.stderr.push_str(&String::from_utf8_lossy(&message));
                    }
                    _ => {}
                }
            }
        }

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| BerthError::engine("inspect exec", e))?;
        output.exit_code = inspect.exit_code.unwrap_or(-1);
        Ok(output)
    }
}
