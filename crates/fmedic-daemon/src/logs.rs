//! Device log collection
//!
//! Writes `<platform>_logs.txt` into the output directory. Android logs come
//! from `adb logcat`; iOS logs are copied from the CoreSimulator log folder.

use std::path::{Path, PathBuf};

use crate::runner::{CommandRunner, CommandSpec};
use crate::tool_availability::ToolPaths;
use fmedic_core::prelude::*;
use fmedic_core::{Platform, Target};

/// Collects device logs for one target into an output directory
#[derive(Debug, Clone)]
pub struct LogCollector {
    output_dir: PathBuf,
    simulator_logs_root: Option<PathBuf>,
}

impl LogCollector {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            simulator_logs_root: dirs::home_dir()
                .map(|home| home.join("Library").join("Logs").join("CoreSimulator")),
        }
    }

    /// Override where per-simulator `system.log` files live
    pub fn with_simulator_logs_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.simulator_logs_root = Some(root.into());
        self
    }

    /// Destination file for `platform`
    pub fn log_file(&self, platform: Platform) -> PathBuf {
        self.output_dir.join(format!("{}_logs.txt", platform.id()))
    }

    /// Collect logs for `target`. Returns the written file, if any.
    pub async fn collect<R: CommandRunner>(
        &self,
        runner: &R,
        tools: &ToolPaths,
        target: &Target,
    ) -> Result<Option<PathBuf>> {
        match target.platform() {
            Platform::Android => self.collect_android(runner, tools, target).await,
            Platform::IOS => self.collect_ios(target).await,
            other => {
                info!("Logging is unsupported for {}, skipping...", other);
                Ok(None)
            }
        }
    }

    async fn collect_android<R: CommandRunner>(
        &self,
        runner: &R,
        tools: &ToolPaths,
        target: &Target,
    ) -> Result<Option<PathBuf>> {
        let Some(serial) = target.id() else {
            warn!("There is no target to fetch logs from.");
            return Ok(None);
        };

        let output = runner
            .run(CommandSpec::new(
                tools.adb.as_str(),
                ["-s", serial, "logcat", "-d", "-v", "time"],
            ))
            .await?;

        let path = self.log_file(Platform::Android);
        write_log(&path, output.stdout.as_bytes()).await?;
        info!("Log files written to: {}", path.display());
        Ok(Some(path))
    }

    async fn collect_ios(&self, target: &Target) -> Result<Option<PathBuf>> {
        let Some(sim_id) = target.sim_id() else {
            info!("Missing Simulator ID from target to locate logs.");
            return Ok(None);
        };
        let Some(root) = &self.simulator_logs_root else {
            info!("No home directory; cannot locate simulator logs.");
            return Ok(None);
        };

        let system_log = root.join(sim_id).join("system.log");
        if !tokio::fs::try_exists(&system_log).await.unwrap_or(false) {
            info!("No logs found for the requested Simulator ID.");
            return Ok(None);
        }

        let path = self.log_file(Platform::IOS);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(&system_log, &path).await?;
        info!("Log files written to: {}", path.display());
        Ok(Some(path))
    }
}

async fn write_log(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, contents)
        .await
        .with_context(|| format!("Failed to write logs to {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{FakeResponse, FakeRunner};

    #[tokio::test]
    async fn test_android_logcat_written() {
        let out = tempfile::tempdir().unwrap();
        let runner = FakeRunner::new();
        runner.on(
            "adb -s emulator-5554 logcat",
            FakeResponse::ok("01-01 00:00:00.000 I/chromium: hello\n"),
        );

        let collector = LogCollector::new(out.path());
        let target = Target::device(Platform::Android, "emulator-5554");
        let path = collector
            .collect(&runner, &ToolPaths::default(), &target)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(path, out.path().join("android_logs.txt"));
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.contains("hello"));
        assert_eq!(
            runner.command_lines(),
            vec!["adb -s emulator-5554 logcat -d -v time"]
        );
    }

    #[tokio::test]
    async fn test_ios_system_log_copied() {
        let out = tempfile::tempdir().unwrap();
        let sims = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(sims.path().join("SIM-1")).unwrap();
        std::fs::write(sims.path().join("SIM-1/system.log"), "simulator says hi").unwrap();

        let collector = LogCollector::new(out.path()).with_simulator_logs_root(sims.path());
        let target = Target::simulator("iPhone-15", Some("SIM-1".into()));
        let path = collector
            .collect(&FakeRunner::new(), &ToolPaths::default(), &target)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(path, out.path().join("ios_logs.txt"));
        assert_eq!(std::fs::read_to_string(path).unwrap(), "simulator says hi");
    }

    #[tokio::test]
    async fn test_ios_missing_log_is_skipped() {
        let out = tempfile::tempdir().unwrap();
        let sims = tempfile::tempdir().unwrap();
        let collector = LogCollector::new(out.path()).with_simulator_logs_root(sims.path());

        let target = Target::simulator("iPhone-15", Some("SIM-404".into()));
        let path = collector
            .collect(&FakeRunner::new(), &ToolPaths::default(), &target)
            .await
            .unwrap();
        assert!(path.is_none());

        let target = Target::simulator("iPhone-15", None);
        let path = collector
            .collect(&FakeRunner::new(), &ToolPaths::default(), &target)
            .await
            .unwrap();
        assert!(path.is_none());
    }

    #[tokio::test]
    async fn test_other_platforms_skipped() {
        let out = tempfile::tempdir().unwrap();
        let runner = FakeRunner::new();
        let path = LogCollector::new(out.path())
            .collect(&runner, &ToolPaths::default(), &Target::pass_through(Platform::Browser))
            .await
            .unwrap();
        assert!(path.is_none());
        assert!(runner.calls().is_empty());
    }
}
