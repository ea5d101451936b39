//! `retune inspect`: Show a container and its committed limits.

use clap::{Args, ValueEnum};
use retune_common::types::ContainerId;
use retune_runtime::engine::Engine;

use crate::output;

/// Output format for `inspect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum InspectFormat {
    /// Docker-style JSON document.
    Json,
    /// Aligned key/value lines.
    Table,
}

/// Arguments for the `inspect` command.
#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Container ID.
    pub container: String,

    /// Output format.
    #[arg(long, value_enum, default_value_t = InspectFormat::Json)]
    pub format: InspectFormat,
}

/// Executes the `inspect` command.
///
/// # Errors
///
/// Returns an error if the container is unknown.
pub fn execute(engine: &Engine, args: &InspectArgs) -> anyhow::Result<()> {
    let inspect = engine.inspect(&ContainerId::new(&args.container))?;
    match args.format {
        InspectFormat::Json => println!("{}", serde_json::to_string_pretty(&inspect)?),
        InspectFormat::Table => {
            println!("{:<12} {}", "ID", inspect.id);
            println!("{:<12} {}", "NAME", inspect.name);
            println!("{:<12} {}", "STATE", inspect.state);
            println!("{:<12} {}", "VERSION", inspect.version);
            print!("{}", output::limits_table(&inspect.resources));
        }
    }
    Ok(())
}
