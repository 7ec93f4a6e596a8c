//! Lingering emulator/simulator process cleanup
//!
//! Best-effort: every failure here is logged and swallowed.

use crate::runner::{CommandRunner, CommandSpec};
use crate::tool_availability::ToolPaths;
use fmedic_core::prelude::*;
use fmedic_core::Platform;

/// Host process names to kill for `platform`
pub fn tasks_for(platform: Platform, windows_host: bool) -> &'static [&'static str] {
    match (platform, windows_host) {
        (Platform::IOS, _) => &["Simulator", "iOS Simulator"],
        (Platform::Android, true) => &["emulator-arm.exe", "qemu-system-i386.exe"],
        (Platform::Android, false) => &[
            "emulator64-x86",
            "emulator64-arm",
            "qemu-system-i386",
            "qemu-system-x86_64",
        ],
        (Platform::Browser, true) => &["chrome.exe"],
        (Platform::Browser, false) => &["chrome"],
        _ => &[],
    }
}

/// `killall -9 <names..>` or `taskkill /t /F /IM <name>..`
pub fn kill_command(tasks: &[&str], windows_host: bool) -> Option<CommandSpec> {
    if tasks.is_empty() {
        return None;
    }

    let args: Vec<String> = if windows_host {
        ["/t", "/F"]
            .into_iter()
            .map(String::from)
            .chain(tasks.iter().flat_map(|t| ["/IM".to_string(), t.to_string()]))
            .collect()
    } else {
        std::iter::once("-9".to_string())
            .chain(tasks.iter().map(|t| t.to_string()))
            .collect()
    };

    let program = if windows_host { "taskkill" } else { "killall" };
    Some(CommandSpec::new(program, args))
}

/// Kill the host processes that back `platform`'s emulator or simulator.
///
/// Android additionally stops the adb server so a wedged device connection
/// does not survive into the next attempt.
pub async fn kill_lingering<R: CommandRunner>(runner: &R, tools: &ToolPaths, platform: Platform) {
    let windows_host = cfg!(windows);
    let tasks = tasks_for(platform, windows_host);

    let Some(spec) = kill_command(tasks, windows_host) else {
        warn!("No known tasks to kill for {}", platform);
        return;
    };

    info!("Killing lingering {} processes: {}", platform, tasks.join(", "));
    match runner.run(spec).await {
        Ok(_) => {}
        Err(Error::ProcessFailed { code, .. }) => {
            warn!("Kill command returned {:?}", code);
        }
        Err(e) => warn!("Kill command failed: {}", e),
    }

    if platform == Platform::Android {
        info!("Killing the adb server");
        match runner
            .run(CommandSpec::new(tools.adb.as_str(), ["kill-server"]))
            .await
        {
            Ok(_) => info!("Killed the adb server."),
            Err(e) => error!("Failed to kill the adb server: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{FakeResponse, FakeRunner};

    #[test]
    fn test_tasks_per_platform() {
        assert_eq!(tasks_for(Platform::IOS, false), ["Simulator", "iOS Simulator"]);
        assert_eq!(tasks_for(Platform::Android, false).len(), 4);
        assert_eq!(
            tasks_for(Platform::Android, true),
            ["emulator-arm.exe", "qemu-system-i386.exe"]
        );
        assert_eq!(tasks_for(Platform::Browser, true), ["chrome.exe"]);
        assert!(tasks_for(Platform::Electron, false).is_empty());
    }

    #[test]
    fn test_kill_command_unix() {
        let spec = kill_command(&["Simulator", "iOS Simulator"], false).unwrap();
        assert_eq!(spec.program, "killall");
        assert_eq!(spec.args, vec!["-9", "Simulator", "iOS Simulator"]);
    }

    #[test]
    fn test_kill_command_windows() {
        let spec = kill_command(&["chrome.exe"], true).unwrap();
        assert_eq!(spec.program, "taskkill");
        assert_eq!(spec.args, vec!["/t", "/F", "/IM", "chrome.exe"]);
    }

    #[test]
    fn test_kill_command_without_tasks() {
        assert!(kill_command(&[], false).is_none());
    }

    #[tokio::test]
    async fn test_android_also_kills_adb_server() {
        let runner = FakeRunner::new();
        kill_lingering(&runner, &ToolPaths::default(), Platform::Android).await;
        assert_eq!(runner.count("adb kill-server"), 1);
        assert_eq!(runner.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_failures_are_swallowed() {
        let runner = FakeRunner::new();
        runner
            .on("killall", FakeResponse::fail(1, "No matching processes"))
            .on("taskkill", FakeResponse::fail(128, "not found"))
            .on("adb kill-server", FakeResponse::fail(1, "boom"));
        kill_lingering(&runner, &ToolPaths::default(), Platform::Android).await;
        assert_eq!(runner.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_pass_through_platform_runs_nothing() {
        let runner = FakeRunner::new();
        kill_lingering(&runner, &ToolPaths::default(), Platform::Electron).await;
        assert!(runner.calls().is_empty());
    }
}
