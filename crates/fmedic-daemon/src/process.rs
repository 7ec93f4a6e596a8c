//! External process supervision
//!
//! Runs one build/deploy/run command, capturing stdout and stderr, with an
//! optional hard timeout and cooperative cancellation.

use std::process::Stdio;
use std::time::Instant;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::runner::{CommandSpec, ProcessOutput};
use fmedic_core::prelude::*;

/// What the wait task reports once the child is gone
#[derive(Debug)]
struct ExitReport {
    code: Option<i32>,
    stdout: String,
    stderr: String,
    killed: bool,
}

/// Entry point for running supervised commands
pub struct ProcessSupervisor;

impl ProcessSupervisor {
    /// Run `spec` to completion.
    ///
    /// On timeout the child is killed and whatever it printed so far is
    /// discarded; the error carries only the command and the limit.
    pub async fn run(spec: &CommandSpec) -> Result<ProcessOutput> {
        let mut process = Self::spawn(spec)?;

        let Some(limit) = spec.timeout else {
            return process.wait().await;
        };

        match tokio::time::timeout(limit, process.wait_report()).await {
            Ok(report) => process.finish(report?),
            Err(_) => {
                warn!("Command timed out after {:?}: {}", limit, spec);
                process.kill();
                // Output of a killed command is dropped, not joined
                let _ = process.wait_report().await;
                debug!("Discarded output of timed out command: {}", spec);
                Err(Error::TimedOut {
                    command: spec.command_line(),
                    after: limit,
                })
            }
        }
    }

    /// Spawn `spec` and return a handle without waiting.
    ///
    /// The `timeout` field is ignored here; callers racing the process
    /// against their own timers use [`SupervisedProcess::kill`].
    pub fn spawn(spec: &CommandSpec) -> Result<SupervisedProcess> {
        info!("Running command: {}", spec);

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so a kill also reaches descendants holding the pipes
        #[cfg(unix)]
        command.process_group(0);
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }

        let mut child = command.spawn().map_err(|e| {
            let reason = if e.kind() == std::io::ErrorKind::NotFound {
                format!("{} not found in PATH", spec.program)
            } else {
                e.to_string()
            };
            Error::launch_failed(spec.command_line(), reason)
        })?;

        let pid = child.id();
        debug!("Process started with PID: {:?}", pid);

        let stdout = child
            .stdout
            .take()
            .map(|out| tokio::spawn(capture_stream(out, "stdout")));
        let stderr = child
            .stderr
            .take()
            .map(|err| tokio::spawn(capture_stream(err, "stderr")));

        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let (exit_tx, exit_rx) = oneshot::channel::<ExitReport>();

        tokio::spawn(wait_for_exit(
            child,
            pid,
            kill_rx,
            stdout,
            stderr,
            exit_tx,
        ));

        Ok(SupervisedProcess {
            command: spec.command_line(),
            started: Instant::now(),
            kill_tx: Some(kill_tx),
            exit_rx: Some(exit_rx),
        })
    }
}

/// Handle to a running supervised command.
///
/// The `Child` lives in a background wait task; this handle keeps a kill
/// channel and the receiver for the final report. Dropping the handle kills
/// a still-running process.
pub struct SupervisedProcess {
    command: String,
    started: Instant,
    kill_tx: Option<oneshot::Sender<()>>,
    exit_rx: Option<oneshot::Receiver<ExitReport>>,
}

impl SupervisedProcess {
    /// Wait for natural completion
    pub async fn wait(mut self) -> Result<ProcessOutput> {
        let report = self.wait_report().await?;
        self.finish(report)
    }

    /// Ask the wait task to kill the process. Idempotent.
    pub fn kill(&mut self) {
        if let Some(tx) = self.kill_tx.take() {
            info!("Killing process: {}", self.command);
            let _ = tx.send(());
        }
    }

    async fn wait_report(&mut self) -> Result<ExitReport> {
        let rx = self.exit_rx.as_mut().ok_or(Error::ChannelClosed)?;
        let report = rx.await.map_err(|_| Error::ChannelClosed)?;
        self.exit_rx = None;
        Ok(report)
    }

    fn finish(&self, report: ExitReport) -> Result<ProcessOutput> {
        let elapsed = self.started.elapsed().as_millis();
        match report.code {
            Some(0) if !report.killed => {
                info!("Finished running command: \"{}\" in {}ms.", self.command, elapsed);
                Ok(ProcessOutput {
                    stdout: report.stdout,
                    stderr: report.stderr,
                    code: 0,
                })
            }
            code => {
                warn!(
                    "Command failed: \"{}\" in {}ms with code {:?}",
                    self.command, elapsed, code
                );
                Err(Error::ProcessFailed {
                    command: self.command.clone(),
                    code,
                    stdout: report.stdout,
                    stderr: report.stderr,
                })
            }
        }
    }
}

impl Drop for SupervisedProcess {
    fn drop(&mut self) {
        // Also covers an exited child whose descendants still hold the pipes
        if self.exit_rx.is_some() {
            debug!("SupervisedProcess dropped before its report, killing: {}", self.command);
            self.kill();
        }
    }
}

/// Background task: owns `child`, waits for exit or a kill request, then
/// sends the report. Capture tasks are joined after a natural exit and
/// aborted after a kill.
async fn wait_for_exit(
    mut child: Child,
    pid: Option<u32>,
    mut kill_rx: oneshot::Receiver<()>,
    stdout: Option<JoinHandle<String>>,
    stderr: Option<JoinHandle<String>>,
    exit_tx: oneshot::Sender<ExitReport>,
) {
    let (code, killed) = tokio::select! {
        result = child.wait() => match result {
            Ok(status) => (status.code(), false),
            Err(e) => {
                error!("Error waiting for process: {}", e);
                (None, false)
            }
        },
        Ok(()) = &mut kill_rx => {
            kill_process_group(pid);
            if let Err(e) = child.kill().await {
                error!("Failed to kill process: {}", e);
            }
            let code = child.wait().await.ok().and_then(|s| s.code());
            (code, true)
        }
    };

    let (stdout, stderr, killed) = if killed {
        abort_capture(stdout);
        abort_capture(stderr);
        (String::new(), String::new(), true)
    } else {
        // Descendants may still hold the pipes after the child exits
        let joined = async { (join_capture(stdout).await, join_capture(stderr).await) };
        tokio::select! {
            (stdout, stderr) = joined => (stdout, stderr, false),
            Ok(()) = &mut kill_rx => {
                kill_process_group(pid);
                (String::new(), String::new(), true)
            }
        }
    };

    let _ = exit_tx.send(ExitReport {
        code,
        stdout,
        stderr,
        killed,
    });
}

async fn join_capture(handle: Option<JoinHandle<String>>) -> String {
    match handle {
        Some(handle) => handle.await.unwrap_or_default(),
        None => String::new(),
    }
}

fn abort_capture(handle: Option<JoinHandle<String>>) {
    if let Some(handle) = handle {
        handle.abort();
    }
}

/// SIGKILL the whole group led by `pid`; the direct child is killed separately
#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid.and_then(|p| i32::try_from(p).ok()) else {
        return;
    };
    if let Err(e) = killpg(Pid::from_raw(pid), Signal::SIGKILL) {
        debug!("killpg({}) failed: {}", pid, e);
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

/// Accumulate a child stream line by line, tolerating invalid UTF-8
async fn capture_stream<R>(stream: R, label: &'static str) -> String
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut captured = String::new();
    let mut line = Vec::new();

    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&line);
                trace!("{}: {}", label, text.trim_end());
                captured.push_str(&text);
            }
            Err(e) => {
                debug!("{} reader error: {}", label, e);
                break;
            }
        }
    }

    captured
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("sh", ["-c", script])
    }

    #[tokio::test]
    async fn test_success_returns_captured_output() {
        let out = ProcessSupervisor::run(&sh("echo out; echo err 1>&2"))
            .await
            .unwrap();
        assert_eq!(out.stdout, "out\n");
        assert_eq!(out.stderr, "err\n");
        assert_eq!(out.code, 0);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_process_failed_with_output() {
        let err = ProcessSupervisor::run(&sh("echo partial; echo boom 1>&2; exit 3"))
            .await
            .unwrap_err();
        match err {
            Error::ProcessFailed {
                code,
                stdout,
                stderr,
                ..
            } => {
                assert_eq!(code, Some(3));
                assert_eq!(stdout, "partial\n");
                assert_eq!(stderr, "boom\n");
            }
            other => panic!("expected ProcessFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_binary_is_launch_failed() {
        let spec = CommandSpec::new("fmedic-no-such-binary", ["--version"]);
        let err = ProcessSupervisor::run(&spec).await.unwrap_err();
        match err {
            Error::LaunchFailed { command, reason } => {
                assert_eq!(command, "fmedic-no-such-binary --version");
                assert!(reason.contains("not found"));
            }
            other => panic!("expected LaunchFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_kills_and_discards_output() {
        let spec = sh("echo started; sleep 30").timeout(Duration::from_millis(200));
        let begun = Instant::now();
        let err = ProcessSupervisor::run(&spec).await.unwrap_err();

        assert!(begun.elapsed() < Duration::from_secs(10));
        match err {
            Error::TimedOut { after, .. } => assert_eq!(after, Duration::from_millis(200)),
            other => panic!("expected TimedOut, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_is_not_held_up_by_background_children() {
        let spec = sh("sleep 30 & sleep 30").timeout(Duration::from_millis(200));
        let begun = Instant::now();
        let err = ProcessSupervisor::run(&spec).await.unwrap_err();

        let took = begun.elapsed();
        assert!(took < Duration::from_secs(2), "200ms timeout took {took:?}");
        assert!(matches!(err, Error::TimedOut { .. }));
    }

    #[tokio::test]
    async fn test_timeout_after_child_exits_with_pipes_held_open() {
        let spec = sh("sleep 30 & exit 0").timeout(Duration::from_millis(200));
        let begun = Instant::now();
        let err = ProcessSupervisor::run(&spec).await.unwrap_err();

        assert!(begun.elapsed() < Duration::from_secs(2));
        assert!(matches!(err, Error::TimedOut { .. }));
    }

    #[tokio::test]
    async fn test_kill_reaches_the_whole_process_group() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("survived");
        let script = format!("(sleep 1; touch {}) & sleep 30", marker.display());
        let mut process = ProcessSupervisor::spawn(&sh(&script)).unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        process.kill();
        tokio::time::timeout(Duration::from_secs(2), process.wait())
            .await
            .expect("killed process should report promptly")
            .unwrap_err();

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists(), "background child outlived the kill");
    }

    #[tokio::test]
    async fn test_cwd_is_respected() {
        let dir = tempfile::tempdir().unwrap();
        let out = ProcessSupervisor::run(&sh("pwd").cwd(dir.path())).await.unwrap();
        let printed = std::path::PathBuf::from(out.stdout.trim());
        assert_eq!(
            printed.canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
    }

    #[tokio::test]
    async fn test_kill_running_process() {
        let mut process = ProcessSupervisor::spawn(&sh("sleep 30")).unwrap();
        assert!(process.exit_rx.is_some());

        process.kill();
        let err = tokio::time::timeout(Duration::from_secs(5), process.wait())
            .await
            .expect("killed process should report promptly")
            .unwrap_err();
        assert!(matches!(err, Error::ProcessFailed { .. }));
    }
}
