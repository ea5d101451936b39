//! `retune update`: Change resource limits of a running container.

use anyhow::bail;
use clap::Args;
use retune_common::types::{ContainerId, UpdateRequest};
use retune_runtime::engine::Engine;

use crate::output;

/// Resource flags shared by `create` and `update`.
#[derive(Args, Debug, Clone, Default)]
pub struct ResourceArgs {
    /// Memory limit (e.g. `300MiB`, `1GiB`, plain bytes, or -1 for unlimited).
    #[arg(long, short = 'm', value_parser = output::parse_bytes, allow_hyphen_values = true)]
    pub memory: Option<i64>,

    /// Memory plus swap limit (same format as --memory).
    #[arg(long, value_parser = output::parse_bytes, allow_hyphen_values = true)]
    pub memory_swap: Option<i64>,

    /// CPU CFS quota in microseconds per period, or -1 to clear it.
    #[arg(long, allow_negative_numbers = true)]
    pub cpu_quota: Option<i64>,
}

impl ResourceArgs {
    /// Builds the request; flags that were not given stay untouched.
    pub const fn to_request(&self) -> UpdateRequest {
        UpdateRequest::from_api(self.memory, self.memory_swap, self.cpu_quota)
    }
}

/// Arguments for the `update` command.
#[derive(Args, Debug)]
pub struct UpdateArgs {
    /// Container ID.
    pub container: String,

    #[command(flatten)]
    pub resources: ResourceArgs,
}

/// Executes the `update` command.
///
/// # Errors
///
/// Returns an error if no limit was given or the update fails.
pub async fn execute(engine: &Engine, args: UpdateArgs) -> anyhow::Result<()> {
    let request = args.resources.to_request();
    if request.is_empty() {
        bail!("nothing to update: pass --memory, --memory-swap, or --cpu-quota");
    }
    let id = ContainerId::new(&args.container);
    let limits = engine.update(&id, request).await?;
    println!("{id}");
    print!("{}", output::limits_table(&limits));
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use retune_common::types::FieldUpdate;

    use super::*;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        args: UpdateArgs,
    }

    fn parse(args: &[&str]) -> UpdateArgs {
        Harness::parse_from(std::iter::once("update").chain(args.iter().copied())).args
    }

    #[test]
    fn suffixes_and_sentinels_parse() {
        let args = parse(&["abc", "--memory", "300MiB", "--memory-swap", "-1", "--cpu-quota", "-1"]);
        let request = args.resources.to_request();
        assert_eq!(request.memory, FieldUpdate::Set(300 * 1024 * 1024));
        assert_eq!(request.memory_swap, FieldUpdate::Clear);
        assert_eq!(request.cpu_quota, FieldUpdate::Clear);
    }

    #[test]
    fn omitted_flags_are_kept() {
        let args = parse(&["abc", "--cpu-quota", "15000"]);
        let request = args.resources.to_request();
        assert_eq!(request.memory, FieldUpdate::Keep);
        assert_eq!(request.cpu_quota, FieldUpdate::Set(15000));
    }

    #[test]
    fn bad_size_is_rejected_by_the_parser() {
        let result = Harness::try_parse_from(["update", "abc", "--memory", "lots"]);
        assert!(result.is_err());
    }
}
