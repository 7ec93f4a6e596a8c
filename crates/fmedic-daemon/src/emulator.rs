//! Android emulator discovery and boot
//!
//! Running emulators come from `adb devices`; bootable AVDs from
//! `emulator -list-avds`. Boot is fire-and-forget followed by polling
//! `sys.boot_completed` until the device reports ready.

use std::time::Duration;

use crate::runner::{CommandRunner, CommandSpec};
use crate::tool_availability::ToolPaths;
use fmedic_core::prelude::*;

/// Delay between readiness polls while an emulator boots
const BOOT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Per-command limit for the short adb queries issued while polling
const ADB_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Serials of emulators that are attached and in `device` state
pub async fn list_started<R: CommandRunner>(runner: &R, tools: &ToolPaths) -> Result<Vec<String>> {
    let output = runner
        .run(CommandSpec::new(tools.adb.as_str(), ["devices"]).timeout(ADB_QUERY_TIMEOUT))
        .await?;
    Ok(parse_started_emulators(&output.stdout))
}

/// Parse `adb devices` output.
///
/// ```text
/// List of devices attached
/// emulator-5554	device
/// emulator-5556	offline
/// R58M123ABC	device
/// ```
fn parse_started_emulators(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let serial = parts.next()?;
            let state = parts.next()?;
            (serial.starts_with("emulator-") && state == "device").then(|| serial.to_string())
        })
        .collect()
}

/// Names of the AVDs the SDK can boot
pub async fn list_avds<R: CommandRunner>(runner: &R, tools: &ToolPaths) -> Result<Vec<String>> {
    let output = runner
        .run(CommandSpec::new(tools.emulator.as_str(), ["-list-avds"]).timeout(ADB_QUERY_TIMEOUT))
        .await?;
    Ok(parse_avd_list(&output.stdout))
}

/// One AVD name per line; the emulator sometimes prefixes `INFO` chatter
fn parse_avd_list(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("INFO") && !line.contains(' '))
        .map(String::from)
        .collect()
}

/// Pick the AVD to boot: the first whose name contains `hint`, else the first
pub fn choose_avd<'a>(avds: &'a [String], hint: Option<&str>) -> Option<&'a str> {
    hint.and_then(|hint| avds.iter().find(|avd| avd.contains(hint)))
        .or_else(|| avds.first())
        .map(String::as_str)
}

/// Boot `avd` and wait for it to finish booting.
///
/// Returns the serial of the ready emulator, or `None` when `timeout`
/// elapses first. The emulator process is left running either way; the
/// caller decides whether to kill it.
pub async fn boot<R: CommandRunner>(
    runner: &R,
    tools: &ToolPaths,
    avd: &str,
    timeout: Duration,
) -> Result<Option<String>> {
    info!("Booting Android emulator: {}", avd);
    runner
        .spawn_detached(CommandSpec::new(
            tools.emulator.as_str(),
            ["-avd", avd, "-no-snapshot-load"],
        ))
        .await?;

    match tokio::time::timeout(timeout, wait_until_booted(runner, tools)).await {
        Ok(serial) => {
            info!("Emulator {} is ready", serial);
            Ok(Some(serial))
        }
        Err(_) => {
            warn!("Emulator {} did not boot within {:?}", avd, timeout);
            Ok(None)
        }
    }
}

async fn wait_until_booted<R: CommandRunner>(runner: &R, tools: &ToolPaths) -> String {
    loop {
        let started = match list_started(runner, tools).await {
            Ok(started) => started,
            Err(e) => {
                debug!("adb devices failed while waiting for boot: {}", e);
                Vec::new()
            }
        };

        for serial in started {
            if is_boot_completed(runner, tools, &serial).await {
                return serial;
            }
        }

        tokio::time::sleep(BOOT_POLL_INTERVAL).await;
    }
}

async fn is_boot_completed<R: CommandRunner>(runner: &R, tools: &ToolPaths, serial: &str) -> bool {
    let spec = CommandSpec::new(
        tools.adb.as_str(),
        ["-s", serial, "shell", "getprop", "sys.boot_completed"],
    )
    .timeout(ADB_QUERY_TIMEOUT);

    match runner.run(spec).await {
        Ok(output) => output.stdout.trim() == "1",
        Err(e) => {
            trace!("{} not ready yet: {}", serial, e);
            false
        }
    }
}

/// Forward device `tcp:<port>` to the host so `127.0.0.1` reaches the channel
pub async fn reverse_port<R: CommandRunner>(
    runner: &R,
    tools: &ToolPaths,
    serial: &str,
    port: u16,
) -> Result<()> {
    let mapping = format!("tcp:{port}");
    runner
        .run(
            CommandSpec::new(
                tools.adb.as_str(),
                ["-s", serial, "reverse", mapping.as_str(), mapping.as_str()],
            )
            .timeout(ADB_QUERY_TIMEOUT),
        )
        .await?;
    info!("Reverse port forwarding enabled for {} on port {}", serial, port);
    Ok(())
}
