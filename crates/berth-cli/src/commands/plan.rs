//! `berth plan`: print the apply order without touching the engine.

use std::fmt::Write as _;
use std::path::PathBuf;

use berth_graph::graph::ResourceGraph;
use clap::Args;

use crate::output::{BOLD, DIM, RESET};

/// Arguments for the `plan` command.
#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Path to the environment document.
    #[arg(default_value = "berth.yaml")]
    pub file: PathBuf,
}

/// Executes the `plan` command.
///
/// # Errors
///
/// Returns an error if the document is invalid or the graph cannot be built.
pub fn execute(args: &PlanArgs) -> anyhow::Result<()> {
    let graph = super::load_graph(&args.file)?;
    eprintln!("Plan for: {}", args.file.display());
    eprintln!();
    eprint!("{}", render(&graph));
    Ok(())
}

/// Renders the apply order, one resource per line with its dependencies.
#[must_use]
pub fn render(graph: &ResourceGraph) -> String {
    let mut out = String::new();
    let resources = graph.resources();
    for resource in &resources {
        let deps: Vec<String> = graph
            .dependencies(resource)
            .iter()
            .map(|d| d.reference().to_string())
            .collect();
        let _ = write!(out, "  + {BOLD}{}{RESET}", resource.reference());
        if !deps.is_empty() {
            let _ = write!(out, " {DIM}<- {}{RESET}", deps.join(", "));
        }
        let _ = writeln!(out, " {DIM}[{}]{RESET}", resource.status());
    }
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "  {} resource(s), {} dependency edge(s).",
        resources.len(),
        graph.dependency_count()
    );
    out
}
