//! `berth status`: show the runtime objects backing each resource.

use std::path::PathBuf;

use berth_common::config::BerthConfig;
use clap::Args;
use tokio_util::sync::CancellationToken;

use crate::output::{BOLD, DIM, GREEN, RED, RESET};

/// Arguments for the `status` command.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Path to the environment document.
    #[arg(default_value = "berth.yaml")]
    pub file: PathBuf,
}

/// Executes the `status` command.
///
/// # Errors
///
/// Returns an error if the document is invalid or the engine is
/// unreachable. Lookup failures of single resources are printed.
pub async fn execute(args: StatusArgs, config: BerthConfig) -> anyhow::Result<()> {
    let graph = super::load_graph(&args.file)?;
    let factory = super::connect(config, CancellationToken::new()).await?;

    for resource in graph.resources() {
        let reference = resource.reference().to_string();
        match factory.provider(resource).lookup().await {
            Ok(ids) if ids.is_empty() => eprintln!("  {DIM}○ {reference}{RESET}"),
            Ok(ids) => eprintln!("  {GREEN}●{RESET} {BOLD}{reference}{RESET} {DIM}[{}]{RESET}", ids.join(", ")),
            Err(e) => eprintln!("  {RED}✗{RESET} {reference}: {e}"),
        }
    }
    Ok(())
}
