//! `berth down`: destroy every resource in the document.

use std::path::PathBuf;

use berth_common::config::BerthConfig;
use berth_runtime::executor::Executor;
use clap::Args;
use tokio_util::sync::CancellationToken;

use crate::output::{BOLD, GREEN, RESET, failure_lines};

/// Arguments for the `down` command.
#[derive(Args, Debug)]
pub struct DownArgs {
    /// Path to the environment document.
    #[arg(default_value = "berth.yaml")]
    pub file: PathBuf,
}

/// Executes the `down` command.
///
/// # Errors
///
/// Returns an error if the document is invalid, the engine is unreachable,
/// or any resource cannot be removed.
pub async fn execute(args: DownArgs, config: BerthConfig) -> anyhow::Result<()> {
    let graph = super::load_graph(&args.file)?;
    let factory = super::connect(config, CancellationToken::new()).await?;

    if let Err(e) = Executor::new(factory).destroy(&graph).await {
        for line in failure_lines(&e) {
            eprintln!("  {line}");
        }
        return Err(e.into());
    }
    eprintln!("  {GREEN}{BOLD}Destroyed {} resource(s){RESET}", graph.len());
    Ok(())
}
