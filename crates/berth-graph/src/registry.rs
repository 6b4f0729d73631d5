//! The declared set of resources, keyed by reference.

use std::sync::Arc;

use berth_common::error::{BerthError, Result};
use tracing::debug;

use crate::resource::Resource;

/// An ordered collection of resources with unique references.
#[derive(Debug, Default)]
pub struct Registry {
    resources: Vec<Arc<Resource>>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a resource.
    ///
    /// # Errors
    ///
    /// Returns [`BerthError::Conflict`] if a resource with the same reference
    /// is already registered; the registry is left unchanged.
    pub fn add(&mut self, resource: Resource) -> Result<Arc<Resource>> {
        let reference = resource.reference();
        if self.resources.iter().any(|r| r.reference() == reference) {
            return Err(BerthError::Conflict {
                reference: reference.to_string(),
            });
        }
        debug!(reference = %reference, "registered resource");
        let resource = Arc::new(resource);
        self.resources.push(Arc::clone(&resource));
        Ok(resource)
    }

    /// Finds a resource by its reference string.
    ///
    /// # Errors
    ///
    /// Returns [`BerthError::NotFound`] if no resource has that reference.
    pub fn find(&self, reference: &str) -> Result<Arc<Resource>> {
        self.resources
            .iter()
            .find(|r| r.reference().to_string() == reference)
            .cloned()
            .ok_or_else(|| BerthError::NotFound {
                kind: "resource",
                id: reference.to_string(),
            })
    }

    /// Removes a resource by identity.
    ///
    /// # Errors
    ///
    /// Returns [`BerthError::NotFound`] if this exact resource is not
    /// registered, even when another resource shares its reference.
    pub fn remove(&mut self, resource: &Arc<Resource>) -> Result<()> {
        let index = self
            .resources
            .iter()
            .position(|r| Arc::ptr_eq(r, resource))
            .ok_or_else(|| BerthError::NotFound {
                kind: "resource",
                id: resource.reference().to_string(),
            })?;
        let _ = self.resources.remove(index);
        Ok(())
    }

    /// Returns every resource declared in `module`.
    #[must_use]
    pub fn in_module(&self, module: &str) -> Vec<Arc<Resource>> {
        self.resources
            .iter()
            .filter(|r| r.reference().module() == Some(module))
            .cloned()
            .collect()
    }

    /// Returns every resource in declaration order.
    #[must_use]
    pub fn resources(&self) -> &[Arc<Resource>] {
        &self.resources
    }

    /// Returns the number of registered resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Returns `true` if no resources are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}
