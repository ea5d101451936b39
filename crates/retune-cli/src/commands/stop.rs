//! `retune stop`: Stop running containers.

use clap::Args;
use retune_common::types::{ContainerId, ContainerState};
use retune_runtime::engine::Engine;

/// Arguments for the `stop` command.
#[derive(Args, Debug)]
pub struct StopArgs {
    /// Container IDs to stop. If empty, stops all running containers.
    pub containers: Vec<String>,
}

/// Executes the `stop` command.
///
/// # Errors
///
/// Returns an error if a container cannot be stopped.
pub fn execute(engine: &Engine, args: &StopArgs) -> anyhow::Result<()> {
    let ids: Vec<ContainerId> = if args.containers.is_empty() {
        engine
            .list()?
            .into_iter()
            .filter(|c| c.state == ContainerState::Running)
            .map(|c| c.id)
            .collect()
    } else {
        args.containers.iter().map(ContainerId::new).collect()
    };
    tracing::info!(count = ids.len(), "stopping containers");
    for id in &ids {
        engine.stop(id)?;
        println!("{id}");
    }
    Ok(())
}
