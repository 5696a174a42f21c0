use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info";

pub struct LoggingHandle {
    pub guard: WorkerGuard,
}

/// Log to `~/.portside/logs/cli.log`, keeping the terminal clean for
/// command output. Filter via `PORTSIDE_LOG_FILTER` or `RUST_LOG`;
/// format via `PORTSIDE_LOG_FORMAT` (`json` default, `pretty`).
pub fn init_logging() -> anyhow::Result<LoggingHandle> {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
    let log_dir = std::path::PathBuf::from(home).join(".portside").join("logs");
    std::fs::create_dir_all(&log_dir)?;

    let filter = std::env::var("PORTSIDE_LOG_FILTER")
        .ok()
        .and_then(|value| EnvFilter::try_new(value).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER));

    let file_appender = tracing_appender::rolling::never(&log_dir, "cli.log");
    let (writer, guard) = tracing_appender::non_blocking(file_appender);
    let format = std::env::var("PORTSIDE_LOG_FORMAT").unwrap_or_else(|_| "json".into());

    let registry = tracing_subscriber::registry().with(filter);
    if format.eq_ignore_ascii_case("pretty") {
        registry
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .pretty()
                    .with_target(true),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .json()
                    .flatten_event(true)
                    .with_target(true),
            )
            .init();
    }

    Ok(LoggingHandle { guard })
}
