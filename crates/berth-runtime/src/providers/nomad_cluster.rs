//! Provider for `nomad_cluster` resources.

use std::sync::Arc;

use berth_common::constants;
use berth_common::error::{BerthError, Result};
use berth_graph::resource::{ContainerConfig, Image, NomadClusterConfig, Port, Resource, ResourceKind};
use tracing::{debug, info};

use super::ProviderContext;
use crate::ports;
use crate::retry::poll;
use crate::tasks::ContainerRequest;

/// RPC port Nomad clients use to reach the server.
const RPC_PORT: u16 = 4647;

/// Runs a dev-mode Nomad server with optional client nodes.
#[derive(Debug)]
pub struct NomadClusterProvider {
    resource: Arc<Resource>,
    config: NomadClusterConfig,
    context: ProviderContext,
}

impl NomadClusterProvider {
    /// Creates the provider.
    #[must_use]
    pub const fn new(resource: Arc<Resource>, config: NomadClusterConfig, context: ProviderContext) -> Self {
        Self {
            resource,
            config,
            context,
        }
    }

    fn reference(&self) -> String {
        self.resource.reference().to_string()
    }

    fn image(&self) -> Image {
        let version = self
            .config
            .version
            .as_deref()
            .unwrap_or(constants::NOMAD_DEFAULT_VERSION);
        Image::new(format!("{}:{version}", constants::NOMAD_IMAGE))
    }

    fn server_fqdn(&self) -> String {
        format!("server.{}", self.resource.fqdn())
    }

    fn client_fqdns(&self) -> Vec<String> {
        (1..=self.config.client_nodes)
            .map(|i| format!("client-{i}.{}", self.resource.fqdn()))
            .collect()
    }

    fn node_config(&self, command: Vec<String>, ports: Vec<Port>) -> ContainerConfig {
        ContainerConfig {
            image: self.image(),
            networks: self.config.networks.clone(),
            command,
            env: self.config.env.clone(),
            volumes: self.config.volumes.clone(),
            ports,
            privileged: true,
            ..ContainerConfig::default()
        }
    }

    async fn start_node(&self, fqdn: String, name: String, config: ContainerConfig) -> Result<()> {
        let request = ContainerRequest {
            reference: self.reference(),
            fqdn,
            name: name.clone(),
            resource_type: self.resource.resource_type(),
            config: config.clone(),
        };
        let _ = self.context.tasks.create_container(&request).await?;
        self.resource
            .add_child(Arc::new(Resource::new(name, ResourceKind::Container(config))));
        Ok(())
    }

    /// Starts the server and clients, then waits until every node is ready.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if the server is running, `Timeout` if the
    /// nodes do not report ready in time, or a provider error naming the
    /// failed step.
    pub async fn create(&self) -> Result<()> {
        let reference = self.reference();
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

        let api_port = ports::allocate(1)
            .map_err(|e| BerthError::provider(reference.as_str(), "port allocation", e))?[0];
        info!(reference = %reference, image = %self.image().name, api_port, "creating nomad cluster");

        let server = self.node_config(
            vec!["agent".into(), "-dev".into(), "-bind=0.0.0.0".into()],
            vec![Port::published(constants::NOMAD_API_PORT, api_port)],
        );
        self.start_node(server_fqdn.clone(), format!("server.{}", self.resource.name()), server)
            .await?;

        for (i, fqdn) in self.client_fqdns().into_iter().enumerate() {
            let client = self.node_config(
                vec![
                    "agent".into(),
                    "-client".into(),
                    "-data-dir=/nomad/data".into(),
                    format!("-servers={server_fqdn}:{RPC_PORT}"),
                ],
                Vec::new(),
            );
            self.start_node(fqdn, format!("client-{}.{}", i + 1, self.resource.name()), client)
                .await?;
        }

        let address = format!("http://{}:{api_port}", self.context.published_host());
        let expected = usize::try_from(self.config.client_nodes).map_or(usize::MAX, |n| n + 1);
        let nomad = &self.context.nomad;
        let address_ref = address.as_str();
        poll(
            self.context.poll_policy(),
            &self.context.cancel,
            &reference,
            "readiness",
            || async move {
                match nomad.ready_nodes(address_ref).await {
                    Ok(ready) => Ok(ready >= expected),
                    Err(e) => {
                        debug!(address = address_ref, error = %e, "nomad not reachable yet");
                        Ok(false)
                    }
                }
            },
        )
        .await?;

        info!(reference = %reference, address = %address, nodes = expected, "nomad cluster ready");
        Ok(())
    }

    /// Removes the server and client containers.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup or a removal fails.
    pub async fn destroy(&self) -> Result<()> {
        let mut fqdns = vec![self.server_fqdn()];
        fqdns.extend(self.client_fqdns());
        info!(reference = %self.reference(), "destroying nomad cluster");
        self.context.remove_containers(&self.reference(), &fqdns).await
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

    use super::*;
    use crate::testing::{self, Call, MockConnector, MockEngine, MockHelm, MockKubernetes, MockNomad};

    const SERVER: &str = "server.jobs.nomad_cluster.berth.run";

    fn provider(engine: &Arc<MockEngine>, nomad: &Arc<MockNomad>, clients: u32) -> NomadClusterProvider {
        let config = NomadClusterConfig {
            client_nodes: clients,
            ..NomadClusterConfig::default()
        };
        let resource = Arc::new(Resource::new("jobs", ResourceKind::NomadCluster(config.clone())));
        let mut settings = testing::test_config();
        settings.start_timeout = Duration::from_millis(20);
        let context = testing::context_with(
            Arc::clone(engine),
            Arc::new(MockConnector::new(MockKubernetes::ready())),
            Arc::new(MockHelm::default()),
            Arc::clone(nomad),
            settings,
        );
        NomadClusterProvider::new(resource, config, context)
    }

    #[tokio::test]
    async fn waits_for_server_and_clients() {
        let engine = Arc::new(MockEngine::default());
        let nomad = Arc::new(MockNomad::with_ready(3));
        let provider = provider(&engine, &nomad, 2);

        provider.create().await.expect("create");

        let names: Vec<String> = engine.created().into_iter().map(|(n, _)| n).collect();
        assert_eq!(
            names,
            vec![
                SERVER.to_string(),
                "client-1.jobs.nomad_cluster.berth.run".to_string(),
                "client-2.jobs.nomad_cluster.berth.run".to_string(),
            ]
        );
        let address = nomad.addresses().first().cloned().expect("polled");
        assert!(address.starts_with("http://127.0.0.1:"), "got: {address}");
        assert_eq!(provider.resource.children().len(), 3);
    }

    #[tokio::test]
    async fn too_few_ready_nodes_time_out() {
        let engine = Arc::new(MockEngine::default());
        let nomad = Arc::new(MockNomad::with_ready(1));

        let err = provider(&engine, &nomad, 1).create().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(err.to_string().contains("nomad_cluster.jobs"), "got: {err}");
    }

    #[tokio::test]
    async fn existing_server_is_an_error() {
        let engine = Arc::new(MockEngine::default());
        engine.with_containers(SERVER, &["abc"]);
        let nomad = Arc::new(MockNomad::with_ready(1));

        let err = provider(&engine, &nomad, 0).create().await.unwrap_err();
        assert!(err.to_string().contains("already exists"), "got: {err}");
        assert_eq!(engine.count(|c| matches!(c, Call::CreateContainer(_))), 0);
    }

    #[tokio::test]
    async fn destroy_removes_server_and_clients() {
        let engine = Arc::new(MockEngine::default());
        engine.with_containers(SERVER, &["s1"]);
        engine.with_containers("client-1.jobs.nomad_cluster.berth.run", &["c1"]);
        let nomad = Arc::new(MockNomad::default());

        provider(&engine, &nomad, 1).destroy().await.expect("destroy");
        assert_eq!(engine.count(|c| matches!(c, Call::RemoveContainer(_))), 2);
    }
}
