//! App uninstall from the test target

use std::path::Path;
use std::time::Duration;

use crate::runner::{CommandRunner, CommandSpec};
use crate::tool_availability::ToolPaths;
use fmedic_core::prelude::*;
use fmedic_core::{Platform, Target};

/// Limit for each uninstall command
pub const UNINSTALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Build the uninstall command for `target`, if its platform supports one
pub fn uninstall_command(tools: &ToolPaths, target: &Target, app_id: &str) -> Option<CommandSpec> {
    let id = target.id()?;
    let spec = match target.platform() {
        Platform::Android => CommandSpec::new(tools.adb.as_str(), ["-s", id, "uninstall", app_id]),
        Platform::IOS => {
            let sim_id = target.sim_id()?;
            CommandSpec::new(tools.xcrun.as_str(), ["simctl", "uninstall", sim_id, app_id])
        }
        _ => return None,
    };
    Some(spec.timeout(UNINSTALL_TIMEOUT))
}

/// Uninstall `app_id` from `target`.
///
/// Returns `Ok(false)` when there is nothing to uninstall from.
pub async fn uninstall_app<R: CommandRunner>(
    runner: &R,
    tools: &ToolPaths,
    target: &Target,
    app_id: &str,
    project_dir: &Path,
) -> Result<bool> {
    let Some(spec) = uninstall_command(tools, target, app_id) else {
        debug!("No uninstall step for {}", target);
        return Ok(false);
    };

    info!("Uninstalling {} from {}", app_id, target);
    runner.run(spec.cwd(project_dir)).await?;
    Ok(true)
}
