//! Core domain types for a test session

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

// ─────────────────────────────────────────────────────────
// Platform
// ─────────────────────────────────────────────────────────

/// Platform requested for the test run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Android,
    IOS,
    Browser,
    Electron,
    Windows,
}

impl Platform {
    /// Parse a platform spec such as `android` or `android@../cordova-android/`.
    ///
    /// Only the id before `@` names the platform; the rest is a source
    /// location handed to the project CLI untouched.
    pub fn from_spec(spec: &str) -> Result<Self, Error> {
        let id = spec.split('@').next().unwrap_or(spec).trim();
        id.parse()
    }

    /// Lowercase platform id as used on the project CLI and in file names
    pub fn id(&self) -> &'static str {
        match self {
            Platform::Android => "android",
            Platform::IOS => "ios",
            Platform::Browser => "browser",
            Platform::Electron => "electron",
            Platform::Windows => "windows",
        }
    }

    /// Browser and desktop platforms need no device interaction
    pub fn is_pass_through(&self) -> bool {
        matches!(
            self,
            Platform::Browser | Platform::Electron | Platform::Windows
        )
    }

    /// Loopback address the deployed app uses to reach the host.
    ///
    /// The Android emulator sees the host at `10.0.2.2`. iOS simulators and
    /// devices, desktop targets, and Android devices with reverse port
    /// forwarding all use `127.0.0.1`.
    pub fn host_ip(&self, reverse_port_forwarding: bool) -> &'static str {
        match self {
            Platform::Android if !reverse_port_forwarding => "10.0.2.2",
            _ => "127.0.0.1",
        }
    }
}

impl FromStr for Platform {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "android" => Ok(Platform::Android),
            "ios" => Ok(Platform::IOS),
            "browser" => Ok(Platform::Browser),
            "electron" => Ok(Platform::Electron),
            "windows" => Ok(Platform::Windows),
            _ => Err(Error::unsupported_platform(s)),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

// ─────────────────────────────────────────────────────────
// Target
// ─────────────────────────────────────────────────────────

/// A resolved execution destination.
///
/// Immutable once built; produced by target acquisition and handed to the
/// run command and teardown steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    platform: Platform,
    id: Option<String>,
    sim_id: Option<String>,
}

impl Target {
    /// Target for platforms that run without a device (browser, desktop)
    pub fn pass_through(platform: Platform) -> Self {
        Self {
            platform,
            id: None,
            sim_id: None,
        }
    }

    /// Emulator or device target identified by serial (e.g. `emulator-5554`)
    pub fn device(platform: Platform, id: impl Into<String>) -> Self {
        Self {
            platform,
            id: Some(id.into()),
            sim_id: None,
        }
    }

    /// iOS simulator target: device name for the CLI plus the simulator UDID
    pub fn simulator(device: impl Into<String>, sim_id: Option<String>) -> Self {
        Self {
            platform: Platform::IOS,
            id: Some(device.into()),
            sim_id,
        }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Identifier passed to `--target`, if any
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Simulator UDID, iOS only
    pub fn sim_id(&self) -> Option<&str> {
        self.sim_id.as_deref()
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.id, &self.sim_id) {
            (Some(id), Some(sim)) => write!(f, "{} {} ({})", self.platform, id, sim),
            (Some(id), None) => write!(f, "{} {}", self.platform, id),
            _ => write!(f, "{} (no device)", self.platform),
        }
    }
}

// ─────────────────────────────────────────────────────────
// Action
// ─────────────────────────────────────────────────────────

/// What the project CLI is asked to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Build only; success of the build is the result
    Build,
    /// Build, deploy and run, then wait for device results
    #[default]
    Run,
    /// Same as run but forces an emulator
    Emulate,
}

impl Action {
    pub fn as_arg(&self) -> &'static str {
        match self {
            Action::Build => "build",
            Action::Run => "run",
            Action::Emulate => "emulate",
        }
    }

    pub fn is_build_only(&self) -> bool {
        matches!(self, Action::Build)
    }

    /// Whether the device is expected to report results back
    pub fn waits_for_results(&self) -> bool {
        matches!(self, Action::Run | Action::Emulate)
    }
}

impl FromStr for Action {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "build" => Ok(Action::Build),
            "run" => Ok(Action::Run),
            "emulate" => Ok(Action::Emulate),
            other => Err(Error::config_invalid(format!("unknown action '{other}'"))),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_arg())
    }
}

// ─────────────────────────────────────────────────────────
// Session lifecycle
// ─────────────────────────────────────────────────────────

/// Session phase. Ordered: a session only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum SessionPhase {
    #[default]
    Acquiring,
    ChannelOpen,
    ProcessRunning,
    WaitingForResult,
    BuildOnly,
    Collecting,
    TornDown,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionPhase::Acquiring => "acquiring",
            SessionPhase::ChannelOpen => "channel-open",
            SessionPhase::ProcessRunning => "process-running",
            SessionPhase::WaitingForResult => "waiting-for-result",
            SessionPhase::BuildOnly => "build-only",
            SessionPhase::Collecting => "collecting",
            SessionPhase::TornDown => "torn-down",
        };
        f.write_str(name)
    }
}

/// Final (or pending) session result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Outcome {
    #[default]
    Pending,
    Passed,
    Failed,
    Error,
}

impl Outcome {
    /// Process exit code for this outcome
    pub fn exit_code(&self) -> i32 {
        match self {
            Outcome::Passed => 0,
            _ => 1,
        }
    }

    pub fn is_settled(&self) -> bool {
        !matches!(self, Outcome::Pending)
    }
}
