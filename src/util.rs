use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Installs the global subscriber: pretty stdout plus, when `log_dir` is
/// set, a daily-rolling plain-text file. Keep the returned guard alive for
/// the lifetime of the process or buffered file lines are lost.
pub fn setup_logging(log_level: &str, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let level = log_level.parse::<LevelFilter>().unwrap_or_else(|_| {
        eprintln!("Invalid log level {:?}, falling back to info", log_level);
        LevelFilter::INFO
    });

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "roadmesh.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_thread_ids(true)
                .with_target(true)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let result = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true)
                .with_thread_names(true)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .pretty(),
        )
        .with(file_layer)
        .with(
            EnvFilter::from_default_env()
                .add_directive(level.into())
                .add_directive("tokio=info".parse().unwrap())
                .add_directive("runtime=info".parse().unwrap())
                .add_directive("hyper=info".parse().unwrap())
                .add_directive("tower_http=info".parse().unwrap()),
        )
        .try_init();

    if let Err(e) = result {
        eprintln!("Logging already initialized: {}", e);
    }
    guard
}
