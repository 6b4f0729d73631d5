//! Concurrent graph walks that apply or destroy every resource.
//!
//! Each resource runs as its own tokio task as soon as everything it waits
//! for has finished: its dependencies when applying, its dependents when
//! destroying. Failures never stop independent branches. The walk returns a
//! single [`BerthError::Execution`] listing every failure.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use berth_common::error::{BerthError, Failure, Result};
use berth_common::types::Status;
use berth_graph::graph::ResourceGraph;
use berth_graph::resource::Resource;
use tokio::task::{Id, JoinSet};
use tracing::{error, info, warn};

use crate::providers::ProviderFactory;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Walk {
    Apply,
    Destroy,
}

impl Walk {
    const fn verb(self) -> &'static str {
        match self {
            Self::Apply => "apply",
            Self::Destroy => "destroy",
        }
    }

    /// Resources that must finish before `resource` starts.
    fn waits_on(self, graph: &ResourceGraph, resource: &Resource) -> Vec<Arc<Resource>> {
        match self {
            Self::Apply => graph.dependencies(resource),
            Self::Destroy => graph.dependents(resource),
        }
    }

    /// Resources released when `resource` finishes.
    fn releases(self, graph: &ResourceGraph, resource: &Resource) -> Vec<Arc<Resource>> {
        match self {
            Self::Apply => graph.dependents(resource),
            Self::Destroy => graph.dependencies(resource),
        }
    }

    /// Resources that can no longer run once `reference` failed.
    fn blocked_by(self, graph: &ResourceGraph, reference: &str) -> Vec<Arc<Resource>> {
        match self {
            Self::Apply => graph.descendants(reference),
            Self::Destroy => graph.ancestors(reference),
        }
        .unwrap_or_default()
    }

    /// Returns whether `status` means there is nothing to do.
    const fn skips(self, status: Status) -> bool {
        match self {
            Self::Apply => matches!(status, Status::Disabled | Status::Applied),
            Self::Destroy => matches!(status, Status::Disabled | Status::Destroyed),
        }
    }

    const fn done(self) -> Status {
        match self {
            Self::Apply => Status::Applied,
            Self::Destroy => Status::Destroyed,
        }
    }
}

/// Applies and destroys resource graphs through the providers.
#[derive(Debug, Clone)]
pub struct Executor {
    factory: ProviderFactory,
}

impl Executor {
    /// Creates an executor over a provider factory.
    #[must_use]
    pub const fn new(factory: ProviderFactory) -> Self {
        Self { factory }
    }

    /// Creates every resource in dependency order.
    ///
    /// A resource starts once all of its dependencies are applied or
    /// disabled. Resources that are already applied are not created again.
    ///
    /// # Errors
    ///
    /// Returns [`BerthError::Execution`] listing every failed resource and
    /// every resource skipped because a dependency failed.
    pub async fn apply(&self, graph: &ResourceGraph) -> Result<()> {
        self.walk(graph, Walk::Apply).await
    }

    /// Destroys every resource in reverse dependency order.
    ///
    /// A resource whose destroy fails keeps its dependencies in place.
    ///
    /// # Errors
    ///
    /// Returns [`BerthError::Execution`] listing every failed resource.
    pub async fn destroy(&self, graph: &ResourceGraph) -> Result<()> {
        self.walk(graph, Walk::Destroy).await
    }

    async fn walk(&self, graph: &ResourceGraph, walk: Walk) -> Result<()> {
        let mut order = graph.resources();
        if walk == Walk::Destroy {
            order.reverse();
        }
        info!(resources = order.len(), walk = walk.verb(), "starting graph walk");

        let mut waiting: HashMap<String, usize> = order
            .iter()
            .map(|r| (r.reference().to_string(), walk.waits_on(graph, r).len()))
            .collect();
        let mut ready: VecDeque<Arc<Resource>> = order
            .iter()
            .filter(|r| waiting.get(&r.reference().to_string()) == Some(&0))
            .cloned()
            .collect();
        let mut blocked: HashSet<String> = HashSet::new();
        let mut failures: Vec<Failure> = Vec::new();
        let mut tasks: JoinSet<Result<()>> = JoinSet::new();
        let mut running: HashMap<Id, Arc<Resource>> = HashMap::new();
        let cancel = self.factory.context().cancel.clone();

        loop {
            while let Some(resource) = ready.pop_front() {
                let reference = resource.reference().to_string();
                if blocked.contains(&reference) {
                    continue;
                }
                if walk.skips(resource.status()) {
                    info!(reference = %reference, status = %resource.status(), "skipping");
                    release(graph, walk, &resource, &mut waiting, &mut ready);
                    continue;
                }
                if cancel.is_cancelled() {
                    failures.push(Failure {
                        reference: reference.clone(),
                        error: BerthError::Cancelled {
                            reference,
                            step: walk.verb(),
                        },
                    });
                    continue;
                }

                if walk == Walk::Apply {
                    resource.set_status(Status::Creating);
                }
                info!(reference = %reference, walk = walk.verb(), "starting");
                let provider = self.factory.provider(Arc::clone(&resource));
                let handle = tasks.spawn(async move {
                    match walk {
                        Walk::Apply => provider.create().await,
                        Walk::Destroy => provider.destroy().await,
                    }
                });
                let _ = running.insert(handle.id(), resource);
            }

            let Some(joined) = tasks.join_next_with_id().await else {
                break;
            };
            let (id, result) = match joined {
                Ok((id, result)) => (id, result),
                Err(e) => (e.id(), Err(BerthError::engine("provider task", e))),
            };
            let Some(resource) = running.remove(&id) else {
                continue;
            };
            let reference = resource.reference().to_string();

            match result {
                Ok(()) => {
                    resource.set_status(walk.done());
                    if walk == Walk::Destroy {
                        for child in resource.children() {
                            child.set_status(Status::Destroyed);
                        }
                    }
                    info!(reference = %reference, walk = walk.verb(), "finished");
                    release(graph, walk, &resource, &mut waiting, &mut ready);
                }
                Err(e) => {
                    error!(reference = %reference, error = %e, walk = walk.verb(), "failed");
                    resource.set_status(Status::Failed);
                    failures.push(Failure {
                        reference: reference.clone(),
                        error: e,
                    });
                    for dependent in walk.blocked_by(graph, &reference) {
                        let dependent_ref = dependent.reference().to_string();
                        if !blocked.insert(dependent_ref.clone()) {
                            continue;
                        }
                        match walk {
                            Walk::Apply if dependent.status() == Status::Disabled => {
                                info!(reference = %dependent_ref, dependency = %reference, "disabled, left as is");
                            }
                            Walk::Apply => {
                                dependent.set_status(Status::Failed);
                                failures.push(Failure {
                                    reference: dependent_ref.clone(),
                                    error: BerthError::DependencyFailed {
                                        reference: dependent_ref,
                                        dependency: reference.clone(),
                                    },
                                });
                            }
                            Walk::Destroy => {
                                warn!(reference = %dependent_ref, dependent = %reference, "left in place");
                            }
                        }
                    }
                }
            }
        }

        if failures.is_empty() {
            info!(walk = walk.verb(), "graph walk complete");
            Ok(())
        } else {
            Err(BerthError::Execution { failures })
        }
    }
}

fn release(
    graph: &ResourceGraph,
    walk: Walk,
    resource: &Resource,
    waiting: &mut HashMap<String, usize>,
    ready: &mut VecDeque<Arc<Resource>>,
) {
    for next in walk.releases(graph, resource) {
        if let Some(count) = waiting.get_mut(&next.reference().to_string()) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                ready.push_back(next);
            }
        }
    }
}
