//! CLI command definitions and dispatch.

pub mod down;
pub mod plan;
pub mod status;
pub mod up;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use berth_common::config::BerthConfig;
use berth_graph::graph::ResourceGraph;
use berth_runtime::engine::DockerEngine;
use berth_runtime::helm::HelmCli;
use berth_runtime::kubernetes::KubeConnector;
use berth_runtime::nomad::HttpNomadApi;
use berth_runtime::providers::{ProviderContext, ProviderFactory};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

/// berth: declarative local cloud environments.
#[derive(Parser, Debug)]
#[command(name = "berth", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Home directory for berth state.
    #[arg(long, global = true)]
    pub home: Option<PathBuf>,

    /// Pull images even when a local copy exists.
    #[arg(long, global = true)]
    pub force_pull: bool,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create every resource in the document.
    Up(up::UpArgs),
    /// Destroy every resource in the document.
    Down(down::DownArgs),
    /// Print the apply order without touching the engine.
    Plan(plan::PlanArgs),
    /// Show the runtime objects backing each resource.
    Status(status::StatusArgs),
}

impl Cli {
    fn config(&self) -> BerthConfig {
        self.apply_overrides(BerthConfig::from_env())
    }

    /// Applies the command-line flags on top of the environment settings.
    fn apply_overrides(&self, mut config: BerthConfig) -> BerthConfig {
        if let Some(home) = &self.home {
            config = config.rehomed(home.clone());
        }
        config.force_pull |= self.force_pull;
        config
    }
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub async fn execute(cli: Cli) -> anyhow::Result<()> {
    let config = cli.config();
    match cli.command {
        Command::Up(args) => up::execute(args, config).await,
        Command::Down(args) => down::execute(args, config).await,
        Command::Plan(args) => plan::execute(&args),
        Command::Status(args) => status::execute(args, config).await,
    }
}

/// Loads a document and builds its dependency graph.
fn load_graph(file: &Path) -> anyhow::Result<ResourceGraph> {
    let registry = berth_graph::document::load_file(file)?;
    Ok(ResourceGraph::build(&registry)?)
}

/// Connects the production clients and returns the provider factory.
async fn connect(config: BerthConfig, cancel: CancellationToken) -> anyhow::Result<ProviderFactory> {
    let engine = DockerEngine::connect(config.docker_host.as_deref())?;
    engine.ping().await?;
    let context = ProviderContext::new(
        Arc::new(engine),
        Arc::new(KubeConnector),
        Arc::new(HelmCli),
        Arc::new(HttpNomadApi::new()),
        Arc::new(config),
        cancel,
    );
    Ok(ProviderFactory::new(context))
}
