//! # berth-runtime
//!
//! Brings a resource graph to life on a container engine.
//!
//! Handles:
//! - **Engine**: the [`engine::ContainerEngine`] seam and its bollard client.
//! - **Tasks**: transactional container creation with rollback.
//! - **Providers**: create, destroy, and lookup for every resource type.
//! - **Executor**: concurrent apply and destroy walks over the graph.
//! - **Cluster plumbing**: readiness polling, kubeconfig rewriting, and the
//!   Kubernetes, Helm, and Nomad clients.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod engine;
pub mod executor;
pub mod helm;
pub mod kubeconfig;
pub mod kubernetes;
pub mod nomad;
pub mod ports;
pub mod providers;
pub mod retry;
pub mod tasks;

#[cfg(test)]
pub(crate) mod testing;
