//! Logging setup
//!
//! - Console: colored, compact
//! - File (optional): daily rotation, no colors, file/line detail
//!
//! `RUST_LOG` takes precedence over the built-in defaults.

use std::path::PathBuf;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const LOG_PREFIX: &str = "capmux";

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Directory for rotated log files; console only when unset
    pub log_dir: Option<PathBuf>,
    /// Level for capmux crates when `RUST_LOG` is not set
    pub level: String,
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: None,
            level: "info".to_string(),
            ansi: true,
        }
    }
}

impl LoggingConfig {
    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }
}

fn default_filter(level: &str) -> anyhow::Result<EnvFilter> {
    let mut filter = EnvFilter::new("warn");
    for target in ["capmux_core", "capmux_gateway", "capmux_mcp", "capmux"] {
        filter = filter.add_directive(format!("{}={}", target, level).parse()?);
    }
    // rmcp logs every frame at debug
    filter = filter.add_directive("rmcp=warn".parse()?);
    Ok(filter)
}

/// Install the global subscriber
///
/// The returned guard flushes the file writer; keep it alive for the whole
/// program.
pub fn init_tracing(config: LoggingConfig) -> anyhow::Result<Option<WorkerGuard>> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => default_filter(&config.level)?,
    };

    let console_layer = fmt::layer()
        .with_ansi(config.ansi)
        .compact()
        .with_line_number(false)
        .with_file(false)
        .with_target(true);

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create log directory {}", dir.display()))?;
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix(LOG_PREFIX)
                .filename_suffix("log")
                .build(dir)
                .context("failed to create log file appender")?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_thread_ids(true)
                .with_line_number(true)
                .with_file(true)
                .with_target(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("a global tracing subscriber is already installed")?;

    Ok(guard)
}
