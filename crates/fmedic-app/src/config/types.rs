//! Configuration types

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use fmedic_core::{Action, Error, Platform, Result};
use fmedic_daemon::{AcquireOptions, HeartbeatConfig, PortSpec};

/// Default absolute session timeout: 60 minutes
pub const DEFAULT_TIMEOUT_MS: u64 = 60 * 60 * 1000;

/// Bundle id of the generated test app
pub const DEFAULT_APP_ID: &str = "io.cordova.hellocordova";

/// Test framework plugins installed into every project before the user's
pub const DEFAULT_FRAMEWORK_PLUGINS: &[&str] = &["github:apache/cordova-plugin-test-framework"];

/// Complete run configuration (`fmedic.toml` plus CLI overrides)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MedicConfig {
    /// Platform id, optionally with a source: `android@../cordova-android/`
    #[serde(default)]
    pub platform: String,

    /// Plugins under test (paths or registry ids)
    #[serde(default)]
    pub plugins: Vec<String>,

    /// Where device logs are written; defaults to the project directory
    #[serde(default)]
    pub output_dir: Option<PathBuf>,

    /// Target hint: emulator serial/AVD name, or a simulator model regex
    #[serde(default)]
    pub target: Option<String>,

    /// Skip tests that need user interaction
    #[serde(default)]
    pub ci: bool,

    /// Absolute session timeout
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default)]
    pub action: Action,

    #[serde(default)]
    pub verbose: bool,

    /// Project CLI (`cordova` or a path)
    #[serde(default = "default_cli")]
    pub cli: String,

    /// Extra arguments for build/run commands
    #[serde(default)]
    pub args: Vec<String>,

    /// Remove the temporary project when done
    #[serde(default)]
    pub cleanup_after_run: bool,

    #[serde(default = "default_app_id")]
    pub app_id: String,

    /// Reach the host via `adb reverse` instead of the emulator loopback
    #[serde(default)]
    pub reverse_port_forwarding: bool,

    #[serde(default = "default_framework_plugins")]
    pub framework_plugins: Vec<String>,

    /// Extra framework plugins installed only when `ci` is set
    #[serde(default)]
    pub ci_plugins: Vec<String>,

    #[serde(default)]
    pub channel: ChannelSettings,

    #[serde(default)]
    pub emulator: EmulatorSettings,
}

impl Default for MedicConfig {
    fn default() -> Self {
        Self {
            platform: String::new(),
            plugins: Vec::new(),
            output_dir: None,
            target: None,
            ci: false,
            timeout_ms: default_timeout_ms(),
            action: Action::default(),
            verbose: false,
            cli: default_cli(),
            args: Vec::new(),
            cleanup_after_run: false,
            app_id: default_app_id(),
            reverse_port_forwarding: false,
            framework_plugins: default_framework_plugins(),
            ci_plugins: Vec::new(),
            channel: ChannelSettings::default(),
            emulator: EmulatorSettings::default(),
        }
    }
}

impl MedicConfig {
    /// Parsed platform id (the part before `@`)
    pub fn platform(&self) -> Result<Platform> {
        Platform::from_spec(&self.platform)
    }

    /// Platform id as given to the project CLI (`platform add` keeps the source)
    pub fn platform_id(&self) -> &str {
        self.platform.split('@').next().unwrap_or(&self.platform).trim()
    }

    /// Framework plugins for this run, CI extras included
    pub fn test_framework_plugins(&self) -> impl Iterator<Item = &str> {
        let ci_plugins = if self.ci { self.ci_plugins.as_slice() } else { &[] };
        self.framework_plugins
            .iter()
            .chain(ci_plugins)
            .map(String::as_str)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Check the configuration is runnable
    pub fn validate(&self) -> Result<()> {
        if self.plugins.is_empty() {
            return Err(Error::config_invalid("at least one plugin is required"));
        }
        if self.platform.trim().is_empty() {
            return Err(Error::config_invalid("a platform is required"));
        }
        self.platform()?;
        if self.timeout_ms == 0 {
            return Err(Error::config_invalid("timeout_ms must be greater than zero"));
        }
        if self.emulator.boot_attempts == 0 {
            return Err(Error::config_invalid("emulator.boot_attempts must be at least 1"));
        }
        if let Some([first, last]) = self.channel.port_range {
            if first > last {
                return Err(Error::config_invalid(format!(
                    "channel.port_range start {first} is after end {last}"
                )));
            }
        }
        Ok(())
    }
}

/// `[channel]`: result channel binding and liveness timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSettings {
    #[serde(default = "default_bind")]
    pub bind: IpAddr,

    /// Fixed port; takes precedence over `port_range`
    #[serde(default)]
    pub port: Option<u16>,

    /// Inclusive `[first, last]` range to probe
    #[serde(default)]
    pub port_range: Option<[u16; 2]>,

    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,

    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,

    /// How long the device gets to connect for the first time
    #[serde(default = "default_initial_connection_timeout_ms")]
    pub initial_connection_timeout_ms: u64,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: None,
            port_range: None,
            ping_interval_ms: default_ping_interval_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            initial_connection_timeout_ms: default_initial_connection_timeout_ms(),
        }
    }
}

impl ChannelSettings {
    pub fn port_spec(&self) -> PortSpec {
        match (self.port, self.port_range) {
            (Some(port), _) => PortSpec::Fixed(port),
            (None, Some([first, last])) => PortSpec::Range { first, last },
            (None, None) => PortSpec::Any,
        }
    }

    pub fn heartbeat(&self) -> HeartbeatConfig {
        HeartbeatConfig {
            interval: Duration::from_millis(self.ping_interval_ms),
            timeout: Duration::from_millis(self.heartbeat_timeout_ms),
        }
    }

    pub fn initial_connection_timeout(&self) -> Duration {
        Duration::from_millis(self.initial_connection_timeout_ms)
    }
}

/// `[emulator]`: Android boot retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmulatorSettings {
    #[serde(default = "default_boot_attempts")]
    pub boot_attempts: u32,

    #[serde(default = "default_boot_timeout_ms")]
    pub boot_timeout_ms: u64,
}

impl Default for EmulatorSettings {
    fn default() -> Self {
        Self {
            boot_attempts: default_boot_attempts(),
            boot_timeout_ms: default_boot_timeout_ms(),
        }
    }
}

impl EmulatorSettings {
    /// Acquisition options for a project at `project_dir`
    pub fn acquire_options(&self, cli: &str, project_dir: PathBuf) -> AcquireOptions {
        AcquireOptions {
            boot_attempts: self.boot_attempts,
            boot_timeout: Duration::from_millis(self.boot_timeout_ms),
            cli: cli.to_string(),
            project_dir,
        }
    }
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_cli() -> String {
    "cordova".to_string()
}

fn default_app_id() -> String {
    DEFAULT_APP_ID.to_string()
}

fn default_framework_plugins() -> Vec<String> {
    DEFAULT_FRAMEWORK_PLUGINS.iter().map(|p| p.to_string()).collect()
}

fn default_bind() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_ping_interval_ms() -> u64 {
    25_000
}

fn default_heartbeat_timeout_ms() -> u64 {
    60_000
}

fn default_initial_connection_timeout_ms() -> u64 {
    540_000
}

fn default_boot_attempts() -> u32 {
    3
}

fn default_boot_timeout_ms() -> u64 {
    300_000
}
