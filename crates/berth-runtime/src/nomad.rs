//! Nomad HTTP API seam.

use async_trait::async_trait;
use berth_common::error::{BerthError, Result};
use serde::Deserialize;
use tracing::debug;

/// The part of the Nomad API berth uses.
#[async_trait]
pub trait NomadApi: Send + Sync {
    /// Returns the number of nodes reporting `ready` at `address`.
    ///
    /// # Errors
    ///
    /// Returns an error if the API cannot be reached or decoded.
    async fn ready_nodes(&self, address: &str) -> Result<usize>;
}

#[derive(Debug, Deserialize)]
struct NodeStub {
    #[serde(rename = "Status")]
    status: String,
}

/// [`NomadApi`] over `reqwest`.
#[derive(Debug, Clone, Default)]
pub struct HttpNomadApi {
    client: reqwest::Client,
}

impl HttpNomadApi {
    /// Creates a client with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NomadApi for HttpNomadApi {
    async fn ready_nodes(&self, address: &str) -> Result<usize> {
        let url = format!("{address}/v1/nodes");
        let nodes: Vec<NodeStub> = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| BerthError::engine("nomad nodes", e))?
            .json()
            .await
            .map_err(|e| BerthError::engine("nomad nodes", e))?;
        let ready = nodes.iter().filter(|n| n.status == "ready").count();
        debug!(url = %url, total = nodes.len(), ready, "nomad node status");
        Ok(ready)
    }
}
