//! Session orchestration
//!
//! Drives one test session through its phases:
//!
//! ```text
//! Acquiring → ChannelOpen → ProcessRunning → WaitingForResult | BuildOnly → Collecting → TornDown
//! ```
//!
//! The run command is launched concurrently with the wait for results. The
//! first of `jasmineDone`, `disconnect`, a failed run command or the initial
//! connection timeout decides the outcome, all bounded by the absolute
//! session timeout. Teardown always runs.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use fmedic_core::logging::banner;
use fmedic_core::prelude::*;
use fmedic_core::{
    ChannelEvent, DeviceLog, EventName, Outcome, Platform, SessionPhase, SuiteSummary, Target,
};
use fmedic_daemon::{
    emulator, kill_lingering, medic_address, uninstall_app, CommandRunner, CommandSpec,
    LogCollector, ProcessOutput, ResultChannel, SimulatorInventory, TargetAcquirer, ToolPaths,
};

use crate::config::MedicConfig;
use crate::project::{self, ProjectDir, ProjectProvisioner};
use crate::reporters::Reporters;
use crate::session::Session;

/// Final result of a session
#[derive(Debug)]
pub struct SessionReport {
    pub outcome: Outcome,
    /// The error behind a `Failed` or `Error` outcome
    pub error: Option<Error>,
    pub target: Option<Target>,
    /// Where the project lived (may already be removed)
    pub project_dir: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
    /// Last phase reached
    pub phase: SessionPhase,
}

impl SessionReport {
    pub fn exit_code(&self) -> i32 {
        self.outcome.exit_code()
    }

    pub fn passed(&self) -> bool {
        self.outcome == Outcome::Passed
    }

    fn failed_early(error: Error) -> Self {
        Self {
            outcome: Outcome::Error,
            error: Some(error),
            target: None,
            project_dir: None,
            log_file: None,
            phase: SessionPhase::TornDown,
        }
    }
}

/// Spawned run command; aborting drops the child, which kills it
struct RunTask(JoinHandle<Result<ProcessOutput>>);

impl Drop for RunTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Owns and drives a single test session
pub struct SessionOrchestrator<R, P> {
    config: MedicConfig,
    runner: Arc<R>,
    tools: ToolPaths,
    provisioner: P,
    reporters: Reporters,
    inventory: SimulatorInventory,
    simulator_logs_root: Option<PathBuf>,
    channel: Option<ResultChannel>,
}

impl<R, P> SessionOrchestrator<R, P>
where
    R: CommandRunner + Send + Sync + 'static,
    P: ProjectProvisioner,
{
    pub fn new(
        config: MedicConfig,
        runner: Arc<R>,
        tools: ToolPaths,
        provisioner: P,
        reporters: Reporters,
    ) -> Self {
        Self {
            config,
            runner,
            tools,
            provisioner,
            reporters,
            inventory: SimulatorInventory::new(),
            simulator_logs_root: None,
            channel: None,
        }
    }

    /// Override where iOS simulator logs are read from
    pub fn with_simulator_logs_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.simulator_logs_root = Some(root.into());
        self
    }

    /// Run the session to completion
    pub async fn run(mut self) -> SessionReport {
        let mut session = match Session::from_config(&self.config) {
            Ok(session) => session,
            Err(e) => return SessionReport::failed_early(e),
        };

        banner(1, "Create project with platform and plugin(s) to test");
        info!("- platform: {}", self.config.platform);
        info!("- plugin(s): {}", self.config.plugins.join(", "));
        let project = match self.provisioner.provision(&self.config).await {
            Ok(project) => project,
            Err(e) => {
                error!("Project setup failed: {}", e);
                session.advance(SessionPhase::TornDown);
                return SessionReport::failed_early(e);
            }
        };

        let result = self.drive(&mut session, project.path()).await;
        let error = match result {
            Ok(outcome) => {
                session.settle(outcome);
                None
            }
            Err(e) if e.is_test_failure() => {
                session.settle(Outcome::Failed);
                Some(e)
            }
            Err(e) => {
                session.settle(Outcome::Error);
                Some(e)
            }
        };
        info!(
            "Session outcome: {:?} after {}s",
            session.outcome(),
            session.elapsed().num_seconds()
        );

        let mut log_file = None;
        if !session.is_build_only() {
            if let Some(target) = session.target().cloned() {
                session.advance(SessionPhase::Collecting);
                log_file = self.collect(&target, project.path()).await;
            }
        }

        let project_dir = project.path().to_path_buf();
        self.tear_down(&mut session, project);

        SessionReport {
            outcome: session.outcome(),
            error,
            target: session.target().cloned(),
            project_dir: Some(project_dir),
            log_file,
            phase: session.phase(),
        }
    }

    /// Phases up to the decided outcome
    async fn drive(&mut self, session: &mut Session, project_dir: &Path) -> Result<Outcome> {
        banner(2, "Choose target");
        session.advance(SessionPhase::Acquiring);
        let target = self.acquire(session, project_dir).await?;
        info!("Target: {}", target);
        session.set_target(target.clone());

        let run_spec = self.run_command(session, &target, project_dir);

        if session.is_build_only() {
            banner(4, "Build app");
            session.advance(SessionPhase::ProcessRunning);
            let limit = session.timeout;
            tokio::time::timeout(limit, self.runner.run(run_spec))
                .await
                .map_err(|_| Error::SessionTimeout { after: limit })??;
            session.advance(SessionPhase::BuildOnly);
            info!("Build succeeded");
            return Ok(Outcome::Passed);
        }

        banner(3, "Open result channel");
        session.advance(SessionPhase::ChannelOpen);
        let events = self.open_channel(&target, project_dir).await?;

        banner(4, "Run tests");
        info!(
            "Start building app and running tests at {}",
            chrono::Local::now().format("%H:%M:%S")
        );
        session.advance(SessionPhase::ProcessRunning);
        let task = RunTask(tokio::spawn({
            let runner = Arc::clone(&self.runner);
            async move { runner.run(run_spec).await }
        }));
        session.advance(SessionPhase::WaitingForResult);
        info!("Waiting for test results...");

        let channel = self.channel.as_ref().ok_or(Error::ChannelClosed)?;
        let limit = session.timeout;
        match tokio::time::timeout(
            limit,
            wait_for_result(task, events, channel, session.liveness_timeout),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(Error::SessionTimeout { after: limit }),
        }
    }

    async fn acquire(&mut self, session: &Session, project_dir: &Path) -> Result<Target> {
        if session.is_build_only() {
            return Ok(Target::pass_through(session.platform));
        }

        let options = self
            .config
            .emulator
            .acquire_options(&self.config.cli, project_dir.to_path_buf());
        let attempts = match session.platform {
            Platform::Android => options.boot_attempts,
            _ => 1,
        };
        let mut acquirer = TargetAcquirer::new(
            Arc::clone(&self.runner),
            self.tools.clone(),
            options,
            std::mem::take(&mut self.inventory),
        );
        let acquired = acquirer
            .acquire(&self.config.platform, self.config.target.as_deref())
            .await;
        self.inventory = std::mem::take(acquirer.inventory_mut());

        acquired?.ok_or_else(|| Error::AcquisitionExhausted {
            platform: session.platform.to_string(),
            attempts,
        })
    }

    /// `[action, platform, ...args, ...common]`, plus `--target` for device runs
    fn run_command(&self, session: &Session, target: &Target, project_dir: &Path) -> CommandSpec {
        let mut args = vec![
            session.action.as_arg().to_string(),
            self.config.platform_id().to_string(),
        ];
        args.extend(self.config.args.iter().cloned());
        let mut spec = CommandSpec::new(self.config.cli.as_str(), args)
            .with_common_args()
            .cwd(project_dir);

        if !session.is_build_only() && !target.platform().is_pass_through() {
            if let Some(id) = target.id() {
                spec.args.push("--target".to_string());
                spec.args.push(id.to_string());
            }
            // Without it a connected physical device with the same name is waited for
            if target.platform() == Platform::IOS {
                spec.args.push("--emulator".to_string());
            }
        }
        spec
    }

    /// Start the channel, wire reporters and tell the app where to connect.
    ///
    /// Returns the ordered queue of terminal events.
    async fn open_channel(
        &mut self,
        target: &Target,
        project_dir: &Path,
    ) -> Result<mpsc::UnboundedReceiver<ChannelEvent>> {
        let settings = &self.config.channel;
        let channel =
            ResultChannel::start(settings.bind, settings.port_spec(), settings.heartbeat()).await?;

        let reverse = self.config.reverse_port_forwarding && target.platform() == Platform::Android;
        if reverse {
            if let Some(serial) = target.id() {
                if let Err(e) =
                    emulator::reverse_port(self.runner.as_ref(), &self.tools, serial, channel.port())
                        .await
                {
                    warn!("Reverse port forwarding failed: {}", e);
                }
            }
        }

        for name in EventName::LIFECYCLE {
            let reporters = self.reporters.clone();
            channel.subscribe(name, move |data| reporters.dispatch(name, data));
        }
        channel.subscribe(EventName::DeviceLog, |data| {
            match serde_json::from_value::<DeviceLog>(data.clone()) {
                Ok(log) => debug!("device|console.{}: {}", log.level, log.first_message()),
                Err(_) => debug!("device|console: {}", data),
            }
        });
        channel.subscribe(EventName::DeviceInfo, |data| {
            info!("Device info: {}", data);
        });
        let events = channel.listen(&[EventName::JasmineDone, EventName::Disconnect]);

        let address = medic_address(target.platform(), channel.port(), reverse);
        project::write_medic_json(project_dir, &address)?;
        self.channel = Some(channel);
        Ok(events)
    }

    /// Logs, uninstall, then kill lingering processes. Never fails.
    async fn collect(&self, target: &Target, project_dir: &Path) -> Option<PathBuf> {
        banner(5, "Collect data and clean up");
        info!(
            "Completed tests at {}",
            chrono::Local::now().format("%H:%M:%S")
        );

        let output_dir = self
            .config
            .output_dir
            .clone()
            .unwrap_or_else(|| project_dir.to_path_buf());
        let mut collector = LogCollector::new(output_dir);
        if let Some(root) = &self.simulator_logs_root {
            collector = collector.with_simulator_logs_root(root);
        }

        let log_file = match collector
            .collect(self.runner.as_ref(), &self.tools, target)
            .await
        {
            Ok(file) => file,
            Err(e) => {
                warn!("Could not collect device logs: {}", e);
                None
            }
        };

        match uninstall_app(
            self.runner.as_ref(),
            &self.tools,
            target,
            &self.config.app_id,
            project_dir,
        )
        .await
        {
            Ok(_) => {}
            Err(e) => warn!("Failed to uninstall the app: {}", e),
        }

        if self.should_kill(target.platform()) {
            kill_lingering(self.runner.as_ref(), &self.tools, target.platform()).await;
        }

        log_file
    }

    /// Emulators and simulators are always stopped; host apps only on cleanup
    fn should_kill(&self, platform: Platform) -> bool {
        matches!(platform, Platform::Android | Platform::IOS) || self.config.cleanup_after_run
    }

    fn tear_down(&mut self, session: &mut Session, project: ProjectDir) {
        session.advance(SessionPhase::TornDown);
        if let Some(channel) = self.channel.take() {
            channel.stop();
        }
        if let Err(e) = project.release(self.config.cleanup_after_run) {
            warn!("Could not remove the project: {}", e);
        }
    }
}

/// Race the run command against the device's terminal events.
///
/// Events arrive on one ordered queue, so whichever of `jasmineDone` and
/// `disconnect` the channel relayed first wins. A run command that succeeds
/// before results arrive keeps the wait going.
async fn wait_for_result(
    mut task: RunTask,
    mut events: mpsc::UnboundedReceiver<ChannelEvent>,
    channel: &ResultChannel,
    initial_connection_timeout: Duration,
) -> Result<Outcome> {
    let initial = tokio::time::sleep(initial_connection_timeout);
    tokio::pin!(initial);
    let mut process_done = false;
    let mut initial_checked = false;

    loop {
        tokio::select! {
            biased;

            event = events.recv() => {
                return match event {
                    Some(ChannelEvent { name: EventName::JasmineDone, data }) => {
                        info!("Tests have completed");
                        let summary = SuiteSummary::from_value(&data)?;
                        Ok(if summary.passed() { Outcome::Passed } else { Outcome::Failed })
                    }
                    Some(_) => Err(Error::UnexpectedDisconnect),
                    None => Err(Error::ChannelClosed),
                };
            }

            joined = &mut task.0, if !process_done => {
                process_done = true;
                match joined {
                    Ok(Ok(_)) => debug!("Run command finished, still waiting for results"),
                    Ok(Err(e)) => return Err(e),
                    Err(e) => return Err(Error::launch_failed("run command", e.to_string())),
                }
            }

            _ = &mut initial, if !initial_checked => {
                initial_checked = true;
                if !channel.is_peer_connected() {
                    return Err(Error::InitialConnectionTimeout {
                        after: initial_connection_timeout,
                    });
                }
                debug!("Device connected within the initial window");
            }
        }
    }
}
