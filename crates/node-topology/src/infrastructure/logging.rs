//! provides logging helpers

use std::env;
use std::fmt::{self};
use std::path::Path;

use anyhow::Context;
use tracing::field::Field;
use tracing::field::Visit;
use tracing::Event;
use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::filter::FilterExt;
use tracing_subscriber::filter::{self};
use tracing_subscriber::fmt::format;
use tracing_subscriber::fmt::layer;
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::fmt::FormatEvent;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry;
use utils::logging::LOG_PATH_ENV_VAR;

/// Target of events carrying preformatted line protocol.
pub const METRICS_TARGET: &str = "metrics";

/// Writes the raw message of a metrics event, which already is line protocol.
struct InfluxDBFormatter;

struct FieldVisitor {
    msg: String,
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, _: &Field, value: &str) {
        self.msg.push_str(value);
    }

    fn record_debug(&mut self, _: &Field, value: &dyn fmt::Debug) {
        self.msg.push_str(&format!("{value:?}"));
    }
}

impl<S, N> FormatEvent<S, N> for InfluxDBFormatter
where
    S: Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    N: for<'a> tracing_subscriber::fmt::FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut visitor = FieldVisitor { msg: String::new() };
        event.record(&mut visitor);
        write!(writer, "{}", visitor.msg)
    }
}

fn metrics_appender(metrics_file: &Path) -> anyhow::Result<RollingFileAppender> {
    let path = metrics_file
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let file = metrics_file
        .file_name()
        .and_then(|file| file.to_str())
        .with_context(|| format!("invalid metrics file {}", metrics_file.display()))?;

    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(file)
        .max_log_files(3)
        .build(path)
        .context("failed to create rolling file appender")
}

/// initiate the global tracing subscriber
///
/// Metrics events go to `metrics_file` when given and are dropped otherwise.
/// The returned guard flushes the metrics file on drop.
pub fn init(metrics_file: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let log_path = env::var(LOG_PATH_ENV_VAR).ok();
    let fmt_layer = utils::logging::get_fmt_layer(log_path);

    let env_filter = filter::EnvFilter::builder()
        .with_default_directive(filter::LevelFilter::INFO.into())
        .from_env_lossy();

    let fmt_layer = fmt_layer.with_filter(env_filter.and(filter::filter_fn(|metadata| {
        metadata.target() != METRICS_TARGET
    })));

    let (metrics_layer, file_guard) = match metrics_file {
        Some(metrics_file) => {
            let (file_writer, file_guard) =
                tracing_appender::non_blocking(metrics_appender(metrics_file)?);
            let metrics_layer = layer()
                .event_format(InfluxDBFormatter {})
                .fmt_fields(format::DefaultFields::new())
                .with_writer(file_writer)
                .with_ansi(false)
                .with_filter(filter::filter_fn(|metadata| {
                    metadata.target() == METRICS_TARGET
                }));
            (Some(metrics_layer), Some(file_guard))
        }
        None => (None, None),
    };

    registry()
        .with(fmt_layer)
        .with(metrics_layer)
        .try_init()
        .context("failed to install the global tracing subscriber")?;
    Ok(file_guard)
}
