//! provides logging helpers

use std::path::Path;

use tracing::Subscriber;
use tracing_appender::rolling::RollingFileAppender;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::fmt::layer;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

/// When set, human readable logs go to a daily rotated file in this
/// directory instead of stderr.
pub const LOG_PATH_ENV_VAR: &str = "NODE_TOPOLOGY_LOG_PATH";

const LOG_FILE_PREFIX: &str = "node-topology.log";

/// Builds the formatting layer for human readable logs.
///
/// Falls back to stderr if the log directory cannot be used.
pub fn get_fmt_layer<S>(log_path: Option<String>) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a> + 'static,
{
    if let Some(dir) = log_path {
        match RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix(LOG_FILE_PREFIX)
            .max_log_files(3)
            .build(Path::new(&dir))
        {
            Ok(appender) => {
                return layer()
                    .with_writer(appender)
                    .with_ansi(false)
                    .with_target(true)
                    .boxed();
            }
            Err(e) => {
                eprintln!("failed to open log directory {dir}: {e}, logging to stderr");
            }
        }
    }

    layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .boxed()
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;
    use test_log::test;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::registry;

    use super::*;

    #[test]
    fn file_layer_writes_into_log_directory() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let fmt_layer = get_fmt_layer(Some(dir.path().display().to_string()));
        let subscriber = registry().with(fmt_layer);

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("hello from test");
        });

        let files = std::fs::read_dir(dir.path())
            .expect("should read log dir")
            .map(|entry| entry.expect("should read entry").path())
            .collect::<Vec<_>>();
        assert_eq!(files.len(), 1);
        let content = std::fs::read_to_string(&files[0]).expect("should read log file");
        assert!(content.contains("hello from test"));
    }

    #[test]
    fn missing_directory_falls_back_to_stderr() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, b"x").expect("should write file");

        let fmt_layer = get_fmt_layer::<tracing_subscriber::Registry>(Some(
            file.display().to_string(),
        ));
        let subscriber = registry().with(fmt_layer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("still logged");
        });

        assert_eq!(std::fs::read(&file).expect("should read file"), b"x".to_vec());
    }
}
