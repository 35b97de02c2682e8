use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const CRATE_TARGET: &str = "danci_scheduler";
const LOG_FILE_NAME: &str = "scheduler.log";

/// Keeps the non-blocking file writer alive; drop it to flush.
pub struct FileLogGuard {
    _guard: WorkerGuard,
}

pub fn file_logging_enabled() -> bool {
    std::env::var("ENABLE_FILE_LOGS")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false)
}

/// A bare level (`debug`) applies to this crate only, other targets stay at
/// `warn`. Full directives (`a=info,b=trace`) are used as given.
pub fn scheduler_filter(log_level: &str) -> EnvFilter {
    let level = log_level.trim();
    let directives = if level.contains('=') || level.contains(',') {
        level.to_string()
    } else {
        format!("warn,{CRATE_TARGET}={level}")
    };
    EnvFilter::try_new(directives)
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,{CRATE_TARGET}=info")))
}

/// Install the global subscriber. A second call leaves the first in place
/// and returns `None`.
pub fn init_tracing(log_level: &str) -> Option<FileLogGuard> {
    let env_filter = scheduler_filter(log_level);
    let stdout_layer = fmt::layer().with_target(true);

    if file_logging_enabled() {
        let log_dir = std::env::var("LOG_DIR").unwrap_or_else(|_| "./logs".to_string());
        match std::fs::create_dir_all(&log_dir) {
            Ok(()) => {
                let appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, LOG_FILE_NAME);
                let (file_writer, guard) = tracing_appender::non_blocking(appender);
                let file_layer = fmt::layer()
                    .with_writer(file_writer)
                    .with_ansi(false)
                    .with_target(true);

                let installed = tracing_subscriber::registry()
                    .with(env_filter)
                    .with(stdout_layer)
                    .with(file_layer)
                    .try_init()
                    .is_ok();
                if installed {
                    tracing::info!(log_dir = %log_dir, "scheduler file logging enabled");
                }
                return installed.then_some(FileLogGuard { _guard: guard });
            }
            Err(err) => eprintln!("scheduler: cannot create log directory {log_dir}: {err}"),
        }
    }

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .try_init();

    None
}
