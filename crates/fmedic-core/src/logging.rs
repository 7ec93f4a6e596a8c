//! Logging configuration using tracing

use std::path::PathBuf;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::Result;

/// Initialize the logging subsystem
///
/// Logs go to stderr and to `~/.local/share/field-medic/logs/`.
/// Log level is controlled by `FMEDIC_LOG` environment variable; without it
/// the level is `info`, or `debug` when `verbose` is set.
///
/// # Examples
/// ```bash
/// FMEDIC_LOG=debug fmedic --platform android --plugin ./my-plugin
/// FMEDIC_LOG=fmedic_daemon=trace fmedic --config ci.toml
/// ```
pub fn init(verbose: bool) -> Result<()> {
    let log_dir = log_directory()?;
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, "fmedic.log");

    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_env("FMEDIC_LOG").unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(file_appender)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(true)
                .with_line_number(true)
                .with_timer(fmt::time::ChronoLocal::new(
                    "%Y-%m-%d %H:%M:%S%.3f".to_string(),
                )),
        )
        .with(
            fmt::layer()
                .compact()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_timer(fmt::time::ChronoLocal::new("%H:%M:%S".to_string())),
        )
        .init();

    Ok(())
}

/// Log a stage banner, e.g. `banner(2, "Open result channel")`
pub fn banner(step: u32, title: &str) {
    tracing::info!("─────────────────────────────────────────────────────────");
    tracing::info!("{}. {}", step, title);
    tracing::info!("─────────────────────────────────────────────────────────");
}

/// Directory holding the daily `fmedic.log.<date>` files
pub fn log_directory() -> Result<PathBuf> {
    let base = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
    Ok(base.join("field-medic").join("logs"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_directory_lives_under_field_medic() {
        let path = log_directory().unwrap();
        assert!(path.ends_with("field-medic/logs"));
    }
}
