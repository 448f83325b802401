use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};
use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub const LOG_DIR_ENV: &str = "DESKPILOT_LOG_DIR";
const LOG_FILE: &str = "deskpilot.log";

fn level_from_env() -> Level {
    env::var("LOG_LEVEL")
        .map(|level| match level.to_lowercase().as_str() {
            "error" => Level::ERROR,
            "warn" => Level::WARN,
            "debug" => Level::DEBUG,
            "trace" => Level::TRACE,
            _ => Level::INFO,
        })
        .unwrap_or(Level::INFO)
}

/// Stderr plus a daily rolling file. `RUST_LOG` directives refine the
/// `LOG_LEVEL` default. Returns the directory the file lands in.
pub fn init_logging(default_dir: &Path) -> Result<PathBuf> {
    let log_level = level_from_env();
    let log_dir = env::var(LOG_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| default_dir.to_path_buf());
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("cannot create log directory {}", log_dir.display()))?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, LOG_FILE);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false)
                .with_filter(EnvFilter::from_default_env().add_directive(log_level.into())),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_appender)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .with_filter(EnvFilter::from_default_env().add_directive(log_level.into())),
        )
        .try_init()
        .context("a global tracing subscriber is already installed")?;

    tracing::info!("Log files will be written to: {}", log_dir.display());
    Ok(log_dir)
}
