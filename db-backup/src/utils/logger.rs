//! Logging configuration using tracing.
//!
//! Every event is written to the log file; `--verbose` mirrors it on stderr.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Initialize logging to `logfile`, and to stderr as well when `verbose` is set.
pub fn init(logfile: &Path, verbose: bool) -> anyhow::Result<()> {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let file = OpenOptions::new().create(true).append(true).open(logfile)?;

    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_target(true)
        .with_writer(Mutex::new(file));

    let stderr_layer = verbose.then(|| {
        fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed()
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()?;

    Ok(())
}
