use std::backtrace::Backtrace;
use std::panic;
use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

// Held for the life of the process so buffered log lines are flushed.
static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

// Driver chatter drowns out job progress at info level.
const DEFAULT_DIRECTIVES: &str = "info,tokio_postgres=warn,hyper=warn";

fn log_file_writer(app_name: &'static str) -> Option<BoxMakeWriter> {
    let dir = std::path::PathBuf::from(std::env::var_os("RR_LOG_DIR")?);
    if let Err(err) = std::fs::create_dir_all(&dir) {
        // The subscriber is not up yet, so stderr is all we have.
        eprintln!("could not create RR_LOG_DIR {}: {err}", dir.display());
        return None;
    }

    let appender = tracing_appender::rolling::daily(dir, format!("{app_name}.log"));
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);
    let _ = LOG_GUARD.set(guard);
    Some(BoxMakeWriter::new(non_blocking))
}

/// Initialize the process-wide subscriber. Logs go to stdout, or to a
/// daily-rotated `<RR_LOG_DIR>/<app>.log` when `RR_LOG_DIR` is set.
/// `RUST_LOG` overrides the default filter. Calling twice is a no-op.
pub fn init_tracing_subscriber(app_name: &'static str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match log_file_writer(app_name) {
        Some(writer) => {
            let _ = builder.with_writer(writer).try_init();
        }
        None => {
            let _ = builder.try_init();
        }
    }
}

/// Route panics through the subscriber so a crashing scoring task shows
/// up in the same stream as its job's logs. Backtrace capture follows
/// `RUST_BACKTRACE`.
pub fn install_tracing_panic_hook(app_name: &'static str) {
    static INSTALLED: OnceLock<()> = OnceLock::new();

    INSTALLED.get_or_init(|| {
        panic::set_hook(Box::new(move |info| {
            let message = info
                .payload()
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| info.payload().downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            let location = info
                .location()
                .map(|loc| loc.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            let thread = std::thread::current();

            tracing::error!(
                application = app_name,
                thread = thread.name().unwrap_or("unnamed"),
                %location,
                backtrace = %Backtrace::capture(),
                "panic: {message}"
            );
        }));
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init_tracing_subscriber("rr-test");
        init_tracing_subscriber("rr-test");
        install_tracing_panic_hook("rr-test");
        install_tracing_panic_hook("rr-test");
    }
}
