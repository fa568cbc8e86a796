use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use anyhow::Context;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Installs the global subscriber: stderr always, plus `log_file` when set.
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_logging(level: &str, log_file: Option<&Path>) -> anyhow::Result<()> {
    let filter = build_filter(level, std::env::var("RUST_LOG").ok())?;
    let file_layer = match log_file {
        Some(path) => Some(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(open_log_file(path)?)),
        ),
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()
        .context("failed to initialize logging")
}

fn build_filter(level: &str, rust_log: Option<String>) -> anyhow::Result<EnvFilter> {
    if let Some(directives) = rust_log.filter(|value| !value.trim().is_empty())
        && let Ok(filter) = EnvFilter::try_new(&directives)
    {
        return Ok(filter);
    }
    EnvFilter::try_new(level).with_context(|| format!("invalid log level: {level}"))
}

fn open_log_file(path: &Path) -> anyhow::Result<File> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create log directory {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log file {}", path.display()))
}
