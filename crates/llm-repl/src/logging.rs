use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::LogSettings;

pub const LOG_FILE_NAME: &str = "llm-repl.log";

/// Installs the global subscriber: a file layer under `settings.dir`, plus
/// stderr when configured or verbose. The returned guard flushes the file
/// writer when dropped, so `main` keeps it alive for the whole session.
pub fn init_tracing(settings: &LogSettings, verbose: bool) -> Option<WorkerGuard> {
    if let Err(error) = std::fs::create_dir_all(&settings.dir) {
        eprintln!(
            "warning: failed to create log directory {}: {error}",
            settings.dir.display()
        );
        return None;
    }

    let file_writer = tracing_appender::rolling::never(&settings.dir, LOG_FILE_NAME);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_writer);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(settings, verbose)));
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(non_blocking);

    let init_result = if settings.stdout || verbose {
        let stderr_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(std::io::stderr);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .with(stderr_layer)
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .try_init()
    };
    if let Err(error) = init_result {
        eprintln!(
            "warning: failed to initialize tracing subscriber for {}: {error}",
            settings.dir.join(LOG_FILE_NAME).display()
        );
    }
    Some(guard)
}

fn filter_directive(settings: &LogSettings, verbose: bool) -> String {
    if verbose {
        "debug".to_string()
    } else {
        settings.level.clone()
    }
}
