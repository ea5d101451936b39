//! `retune start`: Start a container and enforce its limits.

use clap::Args;
use retune_common::types::ContainerId;
use retune_runtime::engine::Engine;

/// Arguments for the `start` command.
#[derive(Args, Debug)]
pub struct StartArgs {
    /// Container IDs to start.
    #[arg(required = true)]
    pub containers: Vec<String>,
}

/// Executes the `start` command.
///
/// # Errors
///
/// Returns an error on the first container that fails to start.
pub async fn execute(engine: &Engine, args: StartArgs) -> anyhow::Result<()> {
    for container in &args.containers {
        let id = ContainerId::new(container);
        let pid = engine.start(&id).await?;
        tracing::debug!(id = %id, pid, "started");
        println!("{id}");
    }
    Ok(())
}
