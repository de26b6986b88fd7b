use anyhow::Result;
use utils::version;

use crate::app::ApplicationBuilder;
use crate::config::DaemonArgs;
use crate::infrastructure::logging;

pub async fn run_daemon(daemon_args: DaemonArgs) -> Result<()> {
    let metrics_file = daemon_args
        .enable_metrics
        .then_some(daemon_args.metrics_file.as_path());
    let _guard = logging::init(metrics_file)?;

    tracing::info!("Starting node topology daemon {}", &**version::VERSION);

    let app = ApplicationBuilder::new(daemon_args).build().await?;
    app.run().await
}
