//! Test utilities for code that shells out
//!
//! [`FakeRunner`] implements [`CommandRunner`] with scripted responses keyed
//! by command-line prefix, and records every command it was asked to run.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::runner::{CommandRunner, CommandSpec, ProcessOutput};
use fmedic_core::prelude::*;

/// A scripted result for one matching invocation
#[derive(Debug, Clone)]
pub enum FakeResponse {
    /// Exit 0 with this stdout
    Output(String),
    /// Exit non-zero with this stderr
    Fail { code: i32, stderr: String },
    /// Exit 0 with this stdout once the delay has elapsed
    Delayed(Duration, String),
    /// Never exits on its own; only a `timeout` on the spec ends it
    Hang,
}

impl FakeResponse {
    pub fn ok(stdout: impl Into<String>) -> Self {
        FakeResponse::Output(stdout.into())
    }

    pub fn fail(code: i32, stderr: impl Into<String>) -> Self {
        FakeResponse::Fail {
            code,
            stderr: stderr.into(),
        }
    }
}

#[derive(Default)]
struct FakeState {
    /// Prefix -> queued responses; the last one repeats once the queue drains
    rules: HashMap<String, VecDeque<FakeResponse>>,
    calls: Vec<CommandSpec>,
    detached: Vec<CommandSpec>,
}

/// Scripted [`CommandRunner`].
///
/// The rule with the longest prefix of the command line wins. Commands with
/// no matching rule succeed with empty output.
#[derive(Default)]
pub struct FakeRunner {
    state: Mutex<FakeState>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `response` for commands starting with `prefix`
    pub fn on(&self, prefix: impl Into<String>, response: FakeResponse) -> &Self {
        self.lock()
            .rules
            .entry(prefix.into())
            .or_default()
            .push_back(response);
        self
    }

    /// Replace any queued responses for `prefix` with `response`
    pub fn set(&self, prefix: impl Into<String>, response: FakeResponse) -> &Self {
        self.lock()
            .rules
            .insert(prefix.into(), VecDeque::from([response]));
        self
    }

    /// Every command passed to `run`, in order
    pub fn calls(&self) -> Vec<CommandSpec> {
        self.lock().calls.clone()
    }

    /// Command lines of every `run` call, in order
    pub fn command_lines(&self) -> Vec<String> {
        self.lock().calls.iter().map(CommandSpec::command_line).collect()
    }

    /// Number of `run` calls whose command line starts with `prefix`
    pub fn count(&self, prefix: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|spec| spec.command_line().starts_with(prefix))
            .count()
    }

    /// Every command passed to `spawn_detached`, in order
    pub fn detached(&self) -> Vec<CommandSpec> {
        self.lock().detached.clone()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn pick(state: &mut FakeState, line: &str) -> Option<FakeResponse> {
        let prefix = state
            .rules
            .keys()
            .filter(|prefix| line.starts_with(prefix.as_str()))
            .max_by_key(|prefix| prefix.len())?
            .clone();
        let queue = state.rules.get_mut(&prefix)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }

    fn record_run(&self, spec: &CommandSpec) -> Option<FakeResponse> {
        let mut state = self.lock();
        state.calls.push(spec.clone());
        Self::pick(&mut state, &spec.command_line())
    }

    fn record_detached(&self, spec: &CommandSpec) -> Option<FakeResponse> {
        let mut state = self.lock();
        state.detached.push(spec.clone());
        Self::pick(&mut state, &spec.command_line())
    }
}

async fn respond(spec: &CommandSpec, response: Option<FakeResponse>) -> Result<ProcessOutput> {
    let output = |stdout: String| ProcessOutput {
        stdout,
        stderr: String::new(),
        code: 0,
    };

    match response.unwrap_or(FakeResponse::Output(String::new())) {
        FakeResponse::Output(stdout) => Ok(output(stdout)),
        FakeResponse::Fail { code, stderr } => Err(Error::ProcessFailed {
            command: spec.command_line(),
            code: Some(code),
            stdout: String::new(),
            stderr,
        }),
        FakeResponse::Delayed(delay, stdout) => {
            tokio::time::sleep(delay).await;
            Ok(output(stdout))
        }
        FakeResponse::Hang => std::future::pending().await,
    }
}

impl CommandRunner for FakeRunner {
    async fn run(&self, spec: CommandSpec) -> Result<ProcessOutput> {
        let response = self.record_run(&spec);

        match spec.timeout {
            Some(limit) => tokio::time::timeout(limit, respond(&spec, response))
                .await
                .map_err(|_| Error::TimedOut {
                    command: spec.command_line(),
                    after: limit,
                })?,
            None => respond(&spec, response).await,
        }
    }

    async fn spawn_detached(&self, spec: CommandSpec) -> Result<()> {
        match self.record_detached(&spec) {
            Some(FakeResponse::Fail { stderr, .. }) => {
                Err(Error::launch_failed(spec.command_line(), stderr))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unscripted_command_succeeds_empty() {
        let runner = FakeRunner::new();
        let out = runner.run(CommandSpec::new("adb", ["devices"])).await.unwrap();
        assert_eq!(out.stdout, "");
        assert_eq!(runner.command_lines(), vec!["adb devices"]);
    }

    #[tokio::test]
    async fn test_longest_prefix_wins() {
        let runner = FakeRunner::new();
        runner
            .on("adb", FakeResponse::ok("generic"))
            .on("adb devices", FakeResponse::ok("specific"));

        let out = runner.run(CommandSpec::new("adb", ["devices"])).await.unwrap();
        assert_eq!(out.stdout, "specific");
        let out = runner.run(CommandSpec::new("adb", ["kill-server"])).await.unwrap();
        assert_eq!(out.stdout, "generic");
    }

    #[tokio::test]
    async fn test_queue_then_sticky_last() {
        let runner = FakeRunner::new();
        runner
            .on("adb devices", FakeResponse::ok("first"))
            .on("adb devices", FakeResponse::ok("second"));

        let spec = CommandSpec::new("adb", ["devices"]);
        assert_eq!(runner.run(spec.clone()).await.unwrap().stdout, "first");
        assert_eq!(runner.run(spec.clone()).await.unwrap().stdout, "second");
        assert_eq!(runner.run(spec).await.unwrap().stdout, "second");
        assert_eq!(runner.count("adb devices"), 3);
    }

    #[tokio::test]
    async fn test_fail_response() {
        let runner = FakeRunner::new();
        runner.on("adb", FakeResponse::fail(1, "no devices"));
        let err = runner.run(CommandSpec::new("adb", ["devices"])).await.unwrap_err();
        assert_eq!(err.stderr(), Some("no devices"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hang_respects_timeout() {
        let runner = FakeRunner::new();
        runner.on("cordova run", FakeResponse::Hang);
        let spec = CommandSpec::new("cordova", ["run", "android"]).timeout(Duration::from_secs(5));
        let err = runner.run(spec).await.unwrap_err();
        assert!(matches!(err, Error::TimedOut { .. }));
    }

    #[tokio::test]
    async fn test_detached_is_recorded() {
        let runner = FakeRunner::new();
        runner
            .spawn_detached(CommandSpec::new("emulator", ["-avd", "Pixel"]))
            .await
            .unwrap();
        assert_eq!(runner.detached().len(), 1);
        assert!(runner.calls().is_empty());
    }
}
