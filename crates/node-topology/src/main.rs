use anyhow::Result;
use clap::Parser;
use node_topology::cmd::run_cpu_model;
use node_topology::cmd::run_daemon;
use node_topology::cmd::run_diff;
use node_topology::cmd::run_hint;
use node_topology::config::Cli;
use node_topology::config::Commands;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_global_hooks();

    let cli = Cli::parse();

    match cli.command {
        Commands::Daemon(daemon_args) => run_daemon(*daemon_args).await,
        Commands::Hint(hint_args) => run_hint(hint_args).await,
        Commands::CpuModel(cpu_model_args) => run_cpu_model(cpu_model_args).await,
        Commands::Diff(diff_args) => run_diff(diff_args).await,
    }
}
