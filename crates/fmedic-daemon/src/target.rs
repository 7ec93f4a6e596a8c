//! Target acquisition
//!
//! Turns a platform request into a ready [`Target`]: a pass-through for
//! browser/desktop, a booted emulator serial for Android, or a resolved
//! simulator for iOS.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::emulator;
use crate::killer;
use crate::runner::CommandRunner;
use crate::simulators::{self, SimulatorInventory};
use crate::tool_availability::ToolPaths;
use fmedic_core::prelude::*;
use fmedic_core::{Platform, Target};

/// Default number of emulator boot attempts
pub const DEFAULT_BOOT_ATTEMPTS: u32 = 3;

/// Default per-attempt boot limit
pub const DEFAULT_BOOT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Knobs for target acquisition
#[derive(Debug, Clone)]
pub struct AcquireOptions {
    /// Total emulator boot attempts before giving up
    pub boot_attempts: u32,
    /// Limit for each boot attempt
    pub boot_timeout: Duration,
    /// Project CLI used to list iOS simulator models
    pub cli: String,
    /// Project directory the CLI runs in
    pub project_dir: PathBuf,
}

impl Default for AcquireOptions {
    fn default() -> Self {
        Self {
            boot_attempts: DEFAULT_BOOT_ATTEMPTS,
            boot_timeout: DEFAULT_BOOT_TIMEOUT,
            cli: "cordova".to_string(),
            project_dir: PathBuf::from("."),
        }
    }
}

/// Resolves platform requests into ready targets
pub struct TargetAcquirer<R> {
    runner: Arc<R>,
    tools: ToolPaths,
    options: AcquireOptions,
    inventory: SimulatorInventory,
}

impl<R: CommandRunner> TargetAcquirer<R> {
    pub fn new(runner: Arc<R>, tools: ToolPaths, options: AcquireOptions, inventory: SimulatorInventory) -> Self {
        Self {
            runner,
            tools,
            options,
            inventory,
        }
    }

    pub fn inventory_mut(&mut self) -> &mut SimulatorInventory {
        &mut self.inventory
    }

    /// Acquire a target for `platform_spec` (e.g. `android` or `ios@7.0.0`).
    ///
    /// Returns `Ok(None)` when no target could be obtained (boot attempts
    /// exhausted, no simulator listed). Only an unknown platform is an error.
    #[instrument(skip(self), level = "debug")]
    pub async fn acquire(&mut self, platform_spec: &str, hint: Option<&str>) -> Result<Option<Target>> {
        let platform = Platform::from_spec(platform_spec)?;
        info!("Choosing target for {}", platform);

        match platform {
            Platform::Android => Ok(self.acquire_android(hint).await),
            Platform::IOS => Ok(self.acquire_ios(hint).await),
            pass_through => Ok(Some(Target::pass_through(pass_through))),
        }
    }

    // ── Android ──────────────────────────────────────────────────────

    async fn acquire_android(&self, hint: Option<&str>) -> Option<Target> {
        match emulator::list_started(self.runner.as_ref(), &self.tools).await {
            Ok(started) => {
                let reuse = hint
                    .and_then(|hint| started.iter().find(|serial| serial.as_str() == hint))
                    .or_else(|| started.first());
                if let Some(serial) = reuse {
                    info!("Reusing running emulator {}", serial);
                    return Some(Target::device(Platform::Android, serial.clone()));
                }
            }
            Err(e) => warn!("Could not list running emulators: {}", e),
        }

        let avds = match emulator::list_avds(self.runner.as_ref(), &self.tools).await {
            Ok(avds) => avds,
            Err(e) => {
                error!("Could not list Android virtual devices: {}", e);
                return None;
            }
        };
        let Some(avd) = emulator::choose_avd(&avds, hint) else {
            error!("No Android virtual devices available to boot");
            return None;
        };

        self.boot_with_retries(avd)
            .await
            .map(|serial| Target::device(Platform::Android, serial))
    }

    /// Bounded boot loop; lingering processes are killed between attempts
    async fn boot_with_retries(&self, avd: &str) -> Option<String> {
        let attempts = self.options.boot_attempts.max(1);

        for attempt in 1..=attempts {
            info!("Starting an Android emulator (attempt {}/{})", attempt, attempts);

            match emulator::boot(self.runner.as_ref(), &self.tools, avd, self.options.boot_timeout).await {
                Ok(Some(serial)) => return Some(serial),
                Ok(None) => warn!("Emulator boot attempt {} timed out", attempt),
                Err(e) => warn!("Emulator boot attempt {} failed: {}", attempt, e),
            }

            if attempt < attempts {
                killer::kill_lingering(self.runner.as_ref(), &self.tools, Platform::Android).await;
            }
        }

        error!("Could not start an android emulator after {} attempt(s)", attempts);
        None
    }

    // ── iOS ──────────────────────────────────────────────────────────

    async fn acquire_ios(&mut self, hint: Option<&str>) -> Option<Target> {
        let listing = match simulators::list_models(
            self.runner.as_ref(),
            &self.options.cli,
            &self.options.project_dir,
        )
        .await
        {
            Ok(listing) => listing,
            Err(e) => {
                error!("Failed to list iOS simulators: {}", e);
                return None;
            }
        };

        let model_line = match simulators::select_model_line(&listing, hint) {
            Ok(Some(line)) => line,
            Ok(None) => {
                error!("No iPhone simulator available");
                return None;
            }
            Err(e) => {
                error!("{}", e);
                return None;
            }
        };

        let device = model_line
            .split(", ")
            .next()
            .unwrap_or(model_line.as_str())
            .trim()
            .to_string();

        let sim_id = match self
            .inventory
            .resolve(self.runner.as_ref(), &self.tools, &model_line)
            .await
        {
            Ok(data) => data.sim_id,
            Err(e) => {
                warn!("Could not resolve simulator id for {}: {}", model_line, e);
                None
            }
        };

        Some(Target::simulator(device, sim_id))
    }
}
