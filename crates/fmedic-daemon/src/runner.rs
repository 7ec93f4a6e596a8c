//! Command execution seam
//!
//! Everything that shells out (emulator boot, adb, xcrun, the project CLI)
//! goes through [`CommandRunner`] so target acquisition and teardown can be
//! exercised without an SDK installed.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::process::ProcessSupervisor;
use fmedic_core::prelude::*;

/// Flags appended to every project CLI invocation
pub const COMMON_CLI_ARGS: [&str; 2] = ["--no-telemetry", "--no-update-notifier"];

/// A command to run: program, arguments and execution options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Kill the process and fail with `TimedOut` once this elapses
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            cwd: None,
            timeout: None,
        }
    }

    pub fn cwd(mut self, cwd: impl AsRef<Path>) -> Self {
        self.cwd = Some(cwd.as_ref().to_path_buf());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Append the common project CLI flags
    pub fn with_common_args(mut self) -> Self {
        self.args.extend(COMMON_CLI_ARGS.iter().map(|a| a.to_string()));
        self
    }

    /// Full command line, for logs and error messages
    pub fn command_line(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_line())
    }
}

/// Output of a command that exited with code 0
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    pub code: i32,
}

/// Runs external commands.
///
/// Implementors provide the `Send` variant ([`CommandRunner`]); the local
/// variant comes for free.
#[trait_variant::make(CommandRunner: Send)]
pub trait LocalCommandRunner {
    /// Run to completion, capturing output.
    ///
    /// Fails with `LaunchFailed`, `ProcessFailed` (non-zero exit) or
    /// `TimedOut` (when `spec.timeout` elapses first).
    async fn run(&self, spec: CommandSpec) -> Result<ProcessOutput>;

    /// Start a long-lived process (e.g. an emulator) and return immediately
    async fn spawn_detached(&self, spec: CommandSpec) -> Result<()>;
}

/// Production runner backed by real child processes
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    async fn run(&self, spec: CommandSpec) -> Result<ProcessOutput> {
        ProcessSupervisor::run(&spec).await
    }

    async fn spawn_detached(&self, spec: CommandSpec) -> Result<()> {
        info!("Starting detached: {}", spec);

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }

        let mut child = command
            .spawn()
            .map_err(|e| Error::launch_failed(spec.command_line(), e.to_string()))?;

        // Reap the child in the background so it never turns into a zombie.
        tokio::spawn(async move {
            let _ = child.wait().await;
        });

        Ok(())
    }
}
