//! # berth-graph
//!
//! Resource model and dependency graph for berth environments.
//!
//! Handles:
//! - **Resource**: the closed set of resource types and their configuration.
//! - **Registry**: the declared set of resources, keyed by reference.
//! - **Graph**: dependency resolution and cycle detection with `petgraph`.
//! - **Document**: the YAML loader that fills a registry.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod document;
pub mod graph;
pub mod registry;
pub mod resource;
