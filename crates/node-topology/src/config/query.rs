use clap::Args;
use clap::Parser;

use crate::config::cluster::ClusterArgs;

#[derive(Parser, Clone, Debug)]
pub struct HintArgs {
    #[command(flatten)]
    pub cluster: ClusterArgs,

    #[arg(long, help = "Namespace of the virtual machine instance")]
    pub namespace: String,

    #[arg(long, help = "Name of the virtual machine instance")]
    pub name: String,
}

/// Optional instance whose placement constraints narrow the candidates.
#[derive(Args, Clone, Debug)]
pub struct VmiRef {
    #[arg(long, requires = "name", help = "Namespace of the virtual machine instance")]
    pub namespace: Option<String>,

    #[arg(long, requires = "namespace", help = "Name of the virtual machine instance")]
    pub name: Option<String>,
}

#[derive(Parser, Clone, Debug)]
pub struct CpuModelArgs {
    #[command(flatten)]
    pub cluster: ClusterArgs,

    #[arg(long, help = "Node the instance is initially started on")]
    pub node: String,

    #[command(flatten)]
    pub vmi: VmiRef,
}

#[derive(Parser, Clone, Debug)]
pub struct DiffArgs {
    #[command(flatten)]
    pub cluster: ClusterArgs,
}
