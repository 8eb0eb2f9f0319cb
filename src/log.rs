use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset.
const DEFAULT_FILTER: &str = "scanmerge=info,ingest=info,storage=info";

/// Install the diagnostics subscriber. Diagnostics go to stderr so that
/// console output (and CSV on stdout) stays clean.
pub fn init() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Print an informational line: `[*]` in yellow.
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        println!("[{}] {}", "\x1b[33m*\x1b[0m", format!($($arg)*))
    };
}

/// Print a success line: `[+]` in green.
#[macro_export]
macro_rules! success {
    ($($arg:tt)*) => {
        println!("[{}] {}", "\x1b[32m+\x1b[0m", format!($($arg)*))
    };
}

/// Print a failure line: `[-]` in red.
#[macro_export]
macro_rules! failure {
    ($($arg:tt)*) => {
        eprintln!("[{}] {}", "\x1b[31m-\x1b[0m", format!($($arg)*))
    };
}
