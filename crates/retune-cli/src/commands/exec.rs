//! `retune exec`: Run a command inside a running container.
//!
//! Besides arbitrary commands, `--control` reads one limit file from inside
//! the container and prints it next to the committed value, which is how a
//! live update is checked from the container's point of view.

use clap::{Args, ValueEnum};
use retune_common::config::RetuneConfig;
use retune_common::types::{ContainerId, ControlKey};
use retune_core::cgroup::CgroupLayout;
use retune_runtime::engine::Engine;

/// A limit file that `--control` can read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ControlArg {
    /// `memory.limit_in_bytes`
    Memory,
    /// `memory.memsw.limit_in_bytes`
    MemorySwap,
    /// `cpu.cfs_quota_us`
    CpuQuota,
}

impl From<ControlArg> for ControlKey {
    fn from(arg: ControlArg) -> Self {
        match arg {
            ControlArg::Memory => Self::Memory,
            ControlArg::MemorySwap => Self::MemorySwap,
            ControlArg::CpuQuota => Self::CpuQuota,
        }
    }
}

/// Arguments for the `exec` command.
#[derive(Args, Debug)]
pub struct ExecArgs {
    /// Container ID.
    pub container: String,

    /// Read this limit file inside the container instead of running a command.
    #[arg(long, value_enum, conflicts_with = "command")]
    pub control: Option<ControlArg>,

    /// Command to execute.
    #[arg(trailing_var_arg = true, required_unless_present = "control")]
    pub command: Vec<String>,
}

impl ExecArgs {
    /// The argv to run: the given command, or a read of the chosen limit file.
    fn argv(&self, config: &RetuneConfig, id: &ContainerId) -> Vec<String> {
        self.control.map_or_else(
            || self.command.clone(),
            |control| {
                let layout = CgroupLayout::new(&config.cgroup_root, config.cgroup_parent.clone());
                let path = layout.control_path(id, control.into());
                vec!["cat".to_string(), path.display().to_string()]
            },
        )
    }
}

/// Executes the `exec` command.
///
/// Output is forwarded as-is. A failing command ends the CLI with the same
/// exit code.
///
/// # Errors
///
/// Returns an error if the container is not running or namespace joining fails.
#[allow(clippy::print_stderr)]
pub fn execute(engine: &Engine, config: &RetuneConfig, args: &ExecArgs) -> anyhow::Result<()> {
    let id = ContainerId::new(&args.container);
    let output = engine.exec(&id, &args.argv(config, &id))?;
    print!("{}", output.stdout);
    eprint!("{}", output.stderr);

    if !output.success() {
        std::process::exit(output.exit_code);
    }
    if let Some(control) = args.control {
        let key = ControlKey::from(control);
        let committed = engine.resources().inspect(&id)?;
        println!("committed {key}: {}", committed.get(key));
    }
    Ok(())
}
