//! CLI command definitions and dispatch.

pub mod create;
pub mod exec;
pub mod inspect;
pub mod ps;
pub mod rm;
pub mod start;
pub mod stop;
pub mod update;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use retune_common::config::RetuneConfig;
use retune_runtime::engine::Engine;

/// Retune: change container resource limits without restarting.
#[derive(Parser, Debug)]
#[command(name = "retune", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// JSON configuration file.
    #[arg(long, global = true, env = "RETUNE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding the lifecycle index and committed limits.
    #[arg(long, global = true, env = "RETUNE_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Mount point of the cgroup v1 hierarchy.
    #[arg(long, global = true, env = "RETUNE_CGROUP_ROOT")]
    pub cgroup_root: Option<PathBuf>,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

/// How log lines are rendered on stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per line.
    Json,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a container with initial resource limits.
    Create(create::CreateArgs),
    /// Start a container and enforce its limits.
    Start(start::StartArgs),
    /// Stop running containers.
    Stop(stop::StopArgs),
    /// Remove stopped containers.
    Rm(rm::RmArgs),
    /// List containers.
    Ps(ps::PsArgs),
    /// Change resource limits of a container.
    Update(update::UpdateArgs),
    /// Show a container and its committed limits.
    Inspect(inspect::InspectArgs),
    /// Execute a command inside a running container.
    Exec(exec::ExecArgs),
}

impl Cli {
    /// Resolves the configuration: file first, then flag overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file cannot be loaded.
    pub fn resolve_config(&self) -> anyhow::Result<RetuneConfig> {
        let mut config = match &self.config {
            Some(path) => RetuneConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
            None => RetuneConfig::default(),
        };
        if let Some(dir) = &self.data_dir {
            config.data_dir.clone_from(dir);
        }
        if let Some(root) = &self.cgroup_root {
            config.cgroup_root.clone_from(root);
        }
        Ok(config)
    }

}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub async fn execute(cli: Cli) -> anyhow::Result<()> {
    let config = cli.resolve_config()?;
    let engine = Engine::new(&config).context("initializing engine")?;
    match cli.command {
        Command::Create(args) => create::execute(&engine, args),
        Command::Start(args) => start::execute(&engine, args).await,
        Command::Stop(args) => stop::execute(&engine, &args),
        Command::Rm(args) => rm::execute(&engine, args).await,
        Command::Ps(args) => ps::execute(&engine, &args),
        Command::Update(args) => update::execute(&engine, args).await,
        Command::Inspect(args) => inspect::execute(&engine, &args),
        Command::Exec(args) => exec::execute(&engine, &config, &args),
    }
}
