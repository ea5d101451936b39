//! `retune rm`: Remove stopped containers.

use clap::Args;
use retune_common::types::ContainerId;
use retune_runtime::engine::Engine;

/// Arguments for the `rm` command.
#[derive(Args, Debug)]
pub struct RmArgs {
    /// Container IDs to remove.
    #[arg(required = true)]
    pub containers: Vec<String>,

    /// Stop running containers before removing them.
    #[arg(short, long)]
    pub force: bool,
}

/// Executes the `rm` command.
///
/// # Errors
///
/// Returns an error on the first container that cannot be removed.
pub async fn execute(engine: &Engine, args: RmArgs) -> anyhow::Result<()> {
    for container in &args.containers {
        let id = ContainerId::new(container);
        if args.force {
            let _ = engine.stop(&id);
        }
        engine.remove(&id).await?;
        println!("{id}");
    }
    Ok(())
}
