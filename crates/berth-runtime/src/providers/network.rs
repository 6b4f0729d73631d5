//! Provider for `network` resources.

use std::collections::HashMap;
use std::sync::Arc;

use berth_common::constants;
use berth_common::error::{BerthError, Result};
use berth_graph::resource::{NetworkConfig, Resource};
use tracing::{info, warn};

use super::ProviderContext;

/// Creates a bridge network with a fixed subnet.
#[derive(Debug)]
pub struct NetworkProvider {
    resource: Arc<Resource>,
    config: NetworkConfig,
    context: ProviderContext,
}

impl NetworkProvider {
    /// Creates the provider.
    #[must_use]
    pub const fn new(resource: Arc<Resource>, config: NetworkConfig, context: ProviderContext) -> Self {
        Self {
            resource,
            config,
            context,
        }
    }

    fn reference(&self) -> String {
        self.resource.reference().to_string()
    }

    /// Creates the network.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if a network with the same name is present,
    /// or an engine error if creation fails.
    pub async fn create(&self) -> Result<()> {
        let name = self.resource.name();
        let existing = self
            .context
            .engine()
            .find_networks(name)
            .await
            .map_err(|e| BerthError::provider(self.reference(), "lookup", e))?;
        if !existing.is_empty() {
            return Err(BerthError::provider(
                self.reference(),
                "network create",
                BerthError::AlreadyExists {
                    kind: "network",
                    id: name.to_string(),
                },
            ));
        }

        let labels = HashMap::from([
            (constants::LABEL_FQDN.to_string(), self.resource.fqdn()),
            (constants::LABEL_NAME.to_string(), name.to_string()),
        ]);
        let id = self
            .context
            .engine()
            .create_network(name, &self.config.subnet, labels)
            .await
            .map_err(|e| BerthError::provider(self.reference(), "network create", e))?;
        info!(reference = %self.reference(), id = %id, subnet = %self.config.subnet, "created network");
        Ok(())
    }

    /// Removes the network; a missing network is skipped.
    ///
    /// # Errors
    ///
    /// Returns an engine error if the lookup or removal fails.
    pub async fn destroy(&self) -> Result<()> {
        let ids = self.lookup().await?;
        if ids.is_empty() {
            warn!(reference = %self.reference(), "network already absent");
        }
        for id in ids {
            match self.context.engine().remove_network(&id).await {
                Err(e) if e.is_not_found() => warn!(id = %id, "network already absent"),
                other => other.map_err(|e| BerthError::provider(self.reference(), "network remove", e))?,
            }
        }
        Ok(())
    }

    /// Returns the IDs of networks carrying the resource name.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    pub async fn lookup(&self) -> Result<Vec<String>> {
        self.context
            .engine()
            .find_networks(self.resource.name())
            .await
            .map_err(|e| BerthError::provider(self.reference(), "lookup", e))
    }
}
