//! `retune create`: Create a container with initial resource limits.

use clap::Args;
use retune_runtime::backend::ContainerConfig;
use retune_runtime::engine::Engine;

use super::update::ResourceArgs;

/// Arguments for the `create` command.
#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Human-readable container name.
    #[arg(long)]
    pub name: String,

    /// Environment variables as KEY=VALUE.
    #[arg(short, long = "env", value_parser = parse_env)]
    pub env: Vec<(String, String)>,

    #[command(flatten)]
    pub resources: ResourceArgs,

    /// Command to run inside the container.
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

fn parse_env(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got {s:?}"))
}

/// Executes the `create` command and prints the new container ID.
///
/// # Errors
///
/// Returns an error if the limits are invalid or creation fails.
pub fn execute(engine: &Engine, args: CreateArgs) -> anyhow::Result<()> {
    let config = ContainerConfig {
        name: args.name,
        command: args.command,
        env: args.env,
        resources: args.resources.to_request(),
    };
    let id = engine.create(&config)?;
    println!("{id}");
    Ok(())
}
