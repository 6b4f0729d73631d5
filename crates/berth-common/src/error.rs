//! Unified error types for the berth workspace.
//!
//! Every failure surfaced to a caller names the resource reference it belongs
//! to. Errors are grouped into four kinds (see [`ErrorKind`]) so the executor
//! and callers can decide what is fatal without matching every variant.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Coarse classification of a [`BerthError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Invalid declarations detected before any provider runs.
    Config,
    /// A container engine, cluster SDK, or provider step failed.
    Provider,
    /// A readiness or health poll ran out of time or was cancelled.
    Timeout,
    /// A reference or runtime object does not exist.
    NotFound,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config => write!(f, "config"),
            Self::Provider => write!(f, "provider"),
            Self::Timeout => write!(f, "timeout"),
            Self::NotFound => write!(f, "not found"),
        }
    }
}

/// A single resource failure collected during a graph walk.
#[derive(Debug)]
pub struct Failure {
    /// Reference of the resource that failed.
    pub reference: String,
    /// Error raised by the resource, or the unmet dependency.
    pub error: BerthError,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.reference, self.error)
    }
}

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum BerthError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A reference string does not follow `type.name[.module]`.
    #[error("invalid reference '{reference}': {reason}")]
    InvalidReference {
        /// The offending reference string.
        reference: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// A resource with the same reference is already registered.
    #[error("resource {reference} already exists in the registry")]
    Conflict {
        /// Reference that collided.
        reference: String,
    },

    /// A dependency reference does not resolve to any resource.
    #[error("unable to resolve dependency '{dependency}' declared by {reference}")]
    UnresolvedDependency {
        /// Resource that declared the dependency.
        reference: String,
        /// The dependency string that resolved to nothing.
        dependency: String,
    },

    /// The dependency graph contains a cycle.
    #[error("dependency cycle detected at edge {from} -> {to}")]
    Cycle {
        /// Dependency side of the offending edge.
        from: String,
        /// Dependent side of the offending edge.
        to: String,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// A runtime object that must not exist yet is already present.
    #[error("{kind} already exists: {id}")]
    AlreadyExists {
        /// Type of the existing object.
        kind: &'static str,
        /// Identifier of the existing object.
        id: String,
    },

    /// A container engine call failed.
    #[error("container engine error during {operation}: {message}")]
    Engine {
        /// Engine operation that failed.
        operation: &'static str,
        /// Message reported by the engine.
        message: String,
    },

    /// A provider step failed for a resource.
    #[error("{reference}: {step} failed: {source}")]
    Provider {
        /// Resource the provider was working on.
        reference: String,
        /// Step that failed, e.g. `network attach`.
        step: &'static str,
        /// Underlying failure.
        source: Box<BerthError>,
    },

    /// A poll did not observe the expected state before its deadline.
    #[error("{reference}: {step} timed out after {after:?}")]
    Timeout {
        /// Resource being polled.
        reference: String,
        /// Step that timed out, e.g. `readiness`.
        step: &'static str,
        /// Deadline that elapsed.
        after: Duration,
    },

    /// A poll was cancelled by the caller.
    #[error("{reference}: {step} cancelled")]
    Cancelled {
        /// Resource being polled.
        reference: String,
        /// Step that was cancelled.
        step: &'static str,
    },

    /// A resource was skipped because one of its dependencies failed.
    #[error("{reference} skipped: dependency {dependency} failed")]
    DependencyFailed {
        /// Resource that was skipped.
        reference: String,
        /// Dependency that did not succeed.
        dependency: String,
    },

    /// One or more resources failed during a graph walk.
    #[error("{} resource(s) failed: {}", .failures.len(), join_failures(.failures))]
    Execution {
        /// Every failure collected during the walk.
        failures: Vec<Failure>,
    },

    /// A YAML document read back from a runtime object could not be parsed
    /// or written.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying YAML error.
        #[from]
        source: serde_yaml::Error,
    },
}

fn join_failures(failures: &[Failure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl BerthError {
    /// Wraps `source` as the failure of `step` for the resource `reference`.
    #[must_use]
    pub fn provider(reference: impl Into<String>, step: &'static str, source: Self) -> Self {
        Self::Provider {
            reference: reference.into(),
            step,
            source: Box::new(source),
        }
    }

    /// Builds an engine error from any displayable message.
    #[must_use]
    pub fn engine(operation: &'static str, message: impl fmt::Display) -> Self {
        Self::Engine {
            operation,
            message: message.to_string(),
        }
    }

    /// Returns the coarse kind of this error.
    ///
    /// Provider wrappers report the kind of the failure they wrap, so a
    /// readiness timeout inside a provider step is still a timeout.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config { .. }
            | Self::InvalidReference { .. }
            | Self::Conflict { .. }
            | Self::UnresolvedDependency { .. }
            | Self::Cycle { .. } => ErrorKind::Config,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Timeout { .. } | Self::Cancelled { .. } => ErrorKind::Timeout,
            Self::Provider { source, .. } => match source.kind() {
                ErrorKind::NotFound => ErrorKind::Provider,
                kind => kind,
            },
            Self::Io { .. }
            | Self::AlreadyExists { .. }
            | Self::Engine { .. }
            | Self::DependencyFailed { .. }
            | Self::Execution { .. }
            | Self::Serialization { .. } => ErrorKind::Provider,
        }
    }

    /// Returns whether this error reports a missing reference or object.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, BerthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_names_reference_and_step() {
        let err = BerthError::provider(
            "container.web",
            "network attach",
            BerthError::engine("connect network", "boom"),
        );
        let msg = err.to_string();
        assert!(msg.contains("container.web"), "got: {msg}");
        assert!(msg.contains("network attach"), "got: {msg}");
        assert!(msg.contains("boom"), "got: {msg}");
        assert_eq!(err.kind(), ErrorKind::Provider);
    }

    #[test]
    fn timeout_inside_provider_keeps_timeout_kind() {
        let err = BerthError::provider(
            "k8s_cluster.dev",
            "readiness",
            BerthError::Timeout {
                reference: "k8s_cluster.dev".into(),
                step: "readiness",
                after: Duration::from_secs(1),
            },
        );
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[test]
    fn not_found_is_distinguishable() {
        let err = BerthError::NotFound {
            kind: "resource",
            id: "network.nope".into(),
        };
        assert!(err.is_not_found());
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(!BerthError::Conflict {
            reference: "network.nope".into()
        }
        .is_not_found());
    }

    #[test]
    fn execution_error_lists_every_failure() {
        let err = BerthError::Execution {
            failures: vec![
                Failure {
                    reference: "container.a".into(),
                    error: BerthError::engine("start container", "boom"),
                },
                Failure {
                    reference: "container.b".into(),
                    error: BerthError::DependencyFailed {
                        reference: "container.b".into(),
                        dependency: "container.a".into(),
                    },
                },
            ],
        };
        let msg = err.to_string();
        assert!(msg.starts_with("2 resource(s) failed"), "got: {msg}");
        assert!(msg.contains("container.a"));
        assert!(msg.contains("container.b"));
    }
}
