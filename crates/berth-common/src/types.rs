//! Domain primitive types used across the berth workspace.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::BerthError;

/// Unique identifier for a container instance in the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId(String);

impl ContainerId {
    /// Creates a new container ID from a string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The closed set of resource types a document may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    /// A container bridge network.
    Network,
    /// A single container.
    Container,
    /// A Kubernetes-compatible cluster (k3s driver).
    K8sCluster,
    /// A Nomad cluster.
    NomadCluster,
    /// A Helm release installed into a k8s cluster.
    Helm,
    /// An ingress proxy exposing a service on the host.
    Ingress,
    /// A documentation site.
    Docs,
}

impl ResourceType {
    /// Every resource type, in declaration order.
    pub const ALL: [Self; 7] = [
        Self::Network,
        Self::Container,
        Self::K8sCluster,
        Self::NomadCluster,
        Self::Helm,
        Self::Ingress,
        Self::Docs,
    ];

    /// Returns the type keyword used in references.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Container => "container",
            Self::K8sCluster => "k8s_cluster",
            Self::NomadCluster => "nomad_cluster",
            Self::Helm => "helm",
            Self::Ingress => "ingress",
            Self::Docs => "docs",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = BerthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| BerthError::InvalidReference {
                reference: s.to_string(),
                reason: "unknown resource type",
            })
    }
}

/// Address of a declared resource: `type.name` or `type.name.module`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Reference {
    resource_type: ResourceType,
    name: String,
    module: Option<String>,
}

impl Reference {
    /// Creates a reference for a resource declared at the top level.
    #[must_use]
    pub fn new(resource_type: ResourceType, name: impl Into<String>) -> Self {
        Self {
            resource_type,
            name: name.into(),
            module: None,
        }
    }

    /// Returns a copy of this reference scoped to `module`.
    #[must_use]
    pub fn in_module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    /// Returns the resource type.
    #[must_use]
    pub const fn resource_type(&self) -> ResourceType {
        self.resource_type
    }

    /// Returns the resource name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the module the resource was declared in, if any.
    #[must_use]
    pub fn module(&self) -> Option<&str> {
        self.module.as_deref()
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource_type, self.name)?;
        if let Some(module) = &self.module {
            write!(f, ".{module}")?;
        }
        Ok(())
    }
}

impl FromStr for Reference {
    type Err = BerthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason| BerthError::InvalidReference {
            reference: s.to_string(),
            reason,
        };
        let parts: Vec<&str> = s.split('.').collect();
        let (kind, name, module) = match parts.as_slice() {
            [kind, name] => (*kind, *name, None),
            [kind, name, module] => (*kind, *name, Some(*module)),
            _ => return Err(invalid("expected type.name or type.name.module")),
        };
        if name.is_empty() || module.is_some_and(str::is_empty) {
            return Err(invalid("empty name segment"));
        }
        let resource_type = kind.parse::<ResourceType>().map_err(|_| invalid("unknown resource type"))?;
        Ok(Self {
            resource_type,
            name: name.to_string(),
            module: module.map(str::to_string),
        })
    }
}

/// Lifecycle status of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    /// Declared, not yet created.
    PendingCreation,
    /// A provider is currently creating the resource.
    Creating,
    /// The resource was created successfully.
    Applied,
    /// Declared disabled; skipped by the executor.
    Disabled,
    /// Creation failed, or a dependency failed.
    Failed,
    /// The resource was torn down.
    Destroyed,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PendingCreation => write!(f, "pending"),
            Self::Creating => write!(f, "creating"),
            Self::Applied => write!(f, "applied"),
            Self::Disabled => write!(f, "disabled"),
            Self::Failed => write!(f, "failed"),
            Self::Destroyed => write!(f, "destroyed"),
        }
    }
}
