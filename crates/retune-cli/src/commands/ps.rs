//! `retune ps`: List containers.

use clap::Args;
use retune_common::types::ContainerState;
use retune_runtime::engine::Engine;

use crate::output;

/// Arguments for the `ps` command.
#[derive(Args, Debug)]
pub struct PsArgs {
    /// Show all containers (including stopped).
    #[arg(short, long)]
    pub all: bool,
}

/// Executes the `ps` command.
///
/// Lists containers with their committed memory and CPU limits.
///
/// # Errors
///
/// Returns an error if state loading fails.
pub fn execute(engine: &Engine, args: &PsArgs) -> anyhow::Result<()> {
    let containers = engine.list()?;
    let filtered: Vec<_> = containers
        .into_iter()
        .filter(|c| args.all || c.state == ContainerState::Running)
        .collect();

    if filtered.is_empty() {
        println!("No containers found.");
        return Ok(());
    }

    println!(
        "{:<34} {:<15} {:<10} {:<8} {:<12} {:<12}",
        "CONTAINER ID", "NAME", "STATE", "PID", "MEMORY", "CPU QUOTA"
    );
    for c in &filtered {
        let limits = engine.resources().inspect(&c.id).ok();
        println!(
            "{:<34} {:<15} {:<10} {:<8} {:<12} {:<12}",
            c.id,
            c.name,
            c.state,
            c.pid.map_or_else(|| "-".to_string(), |p| p.to_string()),
            limits.map_or_else(|| "-".to_string(), |l| output::format_limit_bytes(l.memory)),
            limits.map_or_else(|| "-".to_string(), |l| output::format_limit_micros(l.cpu_quota)),
        );
    }

    Ok(())
}
