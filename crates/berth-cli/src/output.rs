//! Formatted output helpers for CLI commands.
//!
//! Provides colored status indicators and the failure report printed when a
//! graph walk does not complete.

use berth_common::error::BerthError;
use berth_common::types::Status;

pub const BOLD: &str = "\x1b[1m";
pub const DIM: &str = "\x1b[2m";
pub const GREEN: &str = "\x1b[32m";
pub const RED: &str = "\x1b[31m";
pub const YELLOW: &str = "\x1b[33m";
pub const RESET: &str = "\x1b[0m";

/// Returns a colored marker for a resource status.
#[must_use]
pub fn status_marker(status: Status) -> String {
    let color = match status {
        Status::Applied => GREEN,
        Status::Failed => RED,
        Status::Disabled | Status::Destroyed => DIM,
        Status::PendingCreation | Status::Creating => YELLOW,
    };
    format!("{color}●{RESET} {status}")
}

/// Returns one line per failed resource, or the error itself when it is not
/// a graph walk failure.
#[must_use]
pub fn failure_lines(err: &BerthError) -> Vec<String> {
    match err {
        BerthError::Execution { failures } => failures
            .iter()
            .map(|f| format!("{RED}✗{RESET} {BOLD}{}{RESET}: {}", f.reference, f.error))
            .collect(),
        other => vec![format!("{RED}✗{RESET} {other}")],
    }
}

#[cfg(test)]
mod tests {
    use berth_common::error::Failure;

    use super::*;

    #[test]
    fn status_marker_includes_label() {
        assert!(status_marker(Status::Applied).ends_with("applied"));
        assert!(status_marker(Status::Failed).contains(RED));
    }

    #[test]
    fn failure_lines_list_each_resource() {
        let err = BerthError::Execution {
            failures: vec![
                Failure {
                    reference: "network.cloud".into(),
                    error: BerthError::engine("create network", "boom"),
                },
                Failure {
                    reference: "container.web".into(),
                    error: BerthError::DependencyFailed {
                        reference: "container.web".into(),
                        dependency: "network.cloud".into(),
                    },
                },
            ],
        };
        let lines = failure_lines(&err);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("network.cloud"));
        assert!(lines[1].contains("dependency network.cloud failed"));
    }

    #[test]
    fn other_errors_are_a_single_line() {
        let err = BerthError::Config {
            message: "bad".into(),
        };
        assert_eq!(failure_lines(&err).len(), 1);
    }
}
