//! Application entry: configuration, logging and the session run

use std::path::Path;
use std::sync::Arc;

use fmedic_app::{
    load_config, CliOverrides, CliProjectProvisioner, ConsoleReporter, MedicConfig, Reporters,
    SessionOrchestrator, SessionReport,
};
use fmedic_core::prelude::*;
use fmedic_core::Platform;
use fmedic_daemon::{SystemRunner, ToolPaths};

/// Config file picked up from the working directory when `--config` is absent
pub const DEFAULT_CONFIG_FILE: &str = "fmedic.toml";

/// Merge the config file (explicit, or `./fmedic.toml` if present) with CLI overrides
pub fn load_effective_config(path: Option<&Path>, overrides: CliOverrides) -> Result<MedicConfig> {
    let mut config = match path {
        Some(path) => load_config(path)?,
        None => {
            let default = Path::new(DEFAULT_CONFIG_FILE);
            if default.is_file() {
                load_config(default)?
            } else {
                MedicConfig::default()
            }
        }
    };
    config.apply_overrides(overrides);
    config.resolve_cli();
    Ok(config)
}

/// Run one test session.
///
/// Configuration errors are returned; session failures are reported in the
/// [`SessionReport`].
pub async fn run(config_path: Option<&Path>, overrides: CliOverrides) -> Result<SessionReport> {
    let config = load_effective_config(config_path, overrides)?;

    fmedic_core::logging::init(config.verbose)?;

    info!("═══════════════════════════════════════════════════════");
    info!("Field Medic starting");
    info!("═══════════════════════════════════════════════════════");
    debug!(
        "Log directory: {}",
        fmedic_core::logging::log_directory()?.display()
    );

    config.log_summary();
    config.validate()?;

    let tools = ToolPaths::discover();
    let unavailable = match config.platform()? {
        Platform::Android => tools.android_unavailable_message(),
        Platform::IOS => tools.ios_unavailable_message(),
        _ => None,
    };
    if let Some(message) = unavailable {
        warn!("{}", message);
    }

    let runner = Arc::new(SystemRunner);
    let base_dir = std::env::current_dir()?;
    let provisioner = CliProjectProvisioner::new(Arc::clone(&runner), base_dir);
    let reporters = Reporters::new().with(ConsoleReporter::new());

    let report = SessionOrchestrator::new(config, runner, tools, provisioner, reporters)
        .run()
        .await;

    match &report.error {
        Some(e) => error!("Session ended with {:?}: {}", report.outcome, e),
        None => info!("Session ended with {:?}", report.outcome),
    }
    info!("Field Medic exiting");
    Ok(report)
}
