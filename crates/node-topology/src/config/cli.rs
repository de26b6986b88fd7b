use clap::Parser;
use clap::Subcommand;
use utils::version;

use crate::config::daemon::DaemonArgs;
use crate::config::query::CpuModelArgs;
use crate::config::query::DiffArgs;
use crate::config::query::HintArgs;

#[derive(Parser)]
#[command(about, long_about, version = &**version::VERSION)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the node topology reconciliation daemon
    Daemon(Box<DaemonArgs>),
    /// Print the TSC frequency hint of a virtual machine instance
    Hint(HintArgs),
    /// Print the best matching CPU model for an initial node
    #[command(name = "cpu-model")]
    CpuModel(CpuModelArgs),
    /// Print the label changes the next reconciliation would apply
    Diff(DiffArgs),
}
