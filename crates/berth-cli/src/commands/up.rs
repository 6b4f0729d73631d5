//! `berth up`: create every resource in the document.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Instant;

use berth_common::config::BerthConfig;
use berth_common::constants;
use berth_runtime::engine::ContainerEngine;
use berth_runtime::executor::Executor;
use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::output::{BOLD, DIM, GREEN, RED, RESET, failure_lines, status_marker};

/// Arguments for the `up` command.
#[derive(Args, Debug)]
pub struct UpArgs {
    /// Path to the environment document.
    #[arg(default_value = "berth.yaml")]
    pub file: PathBuf,
}

/// Executes the `up` command.
///
/// Ctrl+C cancels readiness polling; resources already created stay.
///
/// # Errors
///
/// Returns an error if the document is invalid, the engine is unreachable,
/// or any resource fails.
pub async fn execute(args: UpArgs, config: BerthConfig) -> anyhow::Result<()> {
    let started = Instant::now();
    let graph = super::load_graph(&args.file)?;
    let wan = config.wan_network.clone().map(|name| (name, config.wan_subnet.clone()));

    let cancel = CancellationToken::new();
    let factory = super::connect(config, cancel.clone()).await?;
    if let Some((name, subnet)) = wan {
        ensure_network(factory.context().engine().as_ref(), &name, &subnet).await?;
    }

    let _signal = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, cancelling");
            cancel.cancel();
        }
    });

    let result = Executor::new(factory).apply(&graph).await;

    eprintln!();
    for resource in graph.resources() {
        eprintln!("  {} {BOLD}{}{RESET}", status_marker(resource.status()), resource.reference());
    }
    eprintln!();
    match result {
        Ok(()) => {
            eprintln!(
                "  {GREEN}{BOLD}Applied {} resource(s){RESET} in {:.1}s",
                graph.len(),
                started.elapsed().as_secs_f64()
            );
            Ok(())
        }
        Err(e) => {
            for line in failure_lines(&e) {
                eprintln!("  {line}");
            }
            eprintln!("  {RED}{BOLD}Apply failed{RESET} {DIM}(run `berth down` to clean up){RESET}");
            Err(e.into())
        }
    }
}

/// Creates the shared WAN network unless it already exists.
async fn ensure_network(engine: &dyn ContainerEngine, name: &str, subnet: &str) -> anyhow::Result<()> {
    if !engine.find_networks(name).await?.is_empty() {
        return Ok(());
    }
    let labels = HashMap::from([(
        constants::LABEL_FQDN.to_string(),
        constants::fqdn(name, "network"),
    )]);
    let id = engine.create_network(name, subnet, labels).await?;
    info!(network = name, id = %id, subnet, "created wan network");
    Ok(())
}
