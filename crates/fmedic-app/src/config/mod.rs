//! Configuration loading for Field Medic
//!
//! Supports:
//! - `fmedic.toml` (or any path given with `--config`)
//! - Command-line overrides applied on top of the file

pub mod types;

pub use types::*;

use std::path::{Path, PathBuf};

use fmedic_core::prelude::*;
use fmedic_core::Action;

/// CLI names that are looked up on `PATH` rather than resolved as paths
const BARE_CLIS: &[&str] = &["cordova", "phonegap"];

/// Load a configuration file
pub fn load_config(path: &Path) -> Result<MedicConfig> {
    if !path.exists() {
        return Err(Error::ConfigNotFound {
            path: path.to_path_buf(),
        });
    }

    let content = std::fs::read_to_string(path)?;
    let config: MedicConfig = toml::from_str(&content)
        .map_err(|e| Error::config_invalid(format!("{}: {}", path.display(), e)))?;

    debug!("Loaded configuration from {:?}", path);
    Ok(config)
}

/// Values given on the command line; `None`/empty leaves the file value
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub platform: Option<String>,
    pub plugins: Vec<String>,
    pub output_dir: Option<PathBuf>,
    pub target: Option<String>,
    pub ci: bool,
    pub timeout_ms: Option<u64>,
    pub action: Option<Action>,
    pub justbuild: bool,
    pub verbose: bool,
    pub cli: Option<String>,
    pub args: Vec<String>,
    pub cleanup_after_run: bool,
    pub reverse_port_forwarding: bool,
}

impl MedicConfig {
    /// Layer CLI values over this configuration
    pub fn apply_overrides(&mut self, overrides: CliOverrides) {
        if let Some(platform) = overrides.platform {
            self.platform = platform;
        }
        if !overrides.plugins.is_empty() {
            self.plugins = overrides.plugins;
        }
        if let Some(dir) = overrides.output_dir {
            self.output_dir = Some(dir);
        }
        if let Some(target) = overrides.target {
            self.target = Some(target);
        }
        if let Some(timeout_ms) = overrides.timeout_ms {
            self.timeout_ms = timeout_ms;
        }
        if let Some(action) = overrides.action {
            self.action = action;
        }
        if let Some(cli) = overrides.cli {
            self.cli = cli;
        }
        if !overrides.args.is_empty() {
            self.args = overrides.args;
        }

        self.ci |= overrides.ci;
        self.verbose |= overrides.verbose;
        self.cleanup_after_run |= overrides.cleanup_after_run;
        self.reverse_port_forwarding |= overrides.reverse_port_forwarding;

        if overrides.justbuild {
            self.action = Action::Build;
        }
    }

    /// Make a path-like `cli` absolute so it survives running in the project dir
    pub fn resolve_cli(&mut self) {
        if BARE_CLIS.contains(&self.cli.as_str()) {
            return;
        }
        let path = Path::new(&self.cli);
        if path.is_absolute() {
            return;
        }
        match dunce::canonicalize(path) {
            Ok(absolute) => self.cli = absolute.to_string_lossy().into_owned(),
            Err(e) => warn!("Could not resolve cli path {}: {}", self.cli, e),
        }
    }

    /// Log every configured value
    pub fn log_summary(&self) {
        fmedic_core::logging::banner(0, "Field Medic config");
        info!("   - platform: {}", self.platform);
        info!("   - plugins: {}", self.plugins.join(", "));
        if let Some(dir) = &self.output_dir {
            info!("   - output_dir: {}", dir.display());
        }
        if let Some(target) = &self.target {
            info!("   - target: {}", target);
        }
        info!("   - action: {}", self.action);
        info!("   - timeout_ms: {}", self.timeout_ms);
        info!("   - cli: {}", self.cli);
        if !self.args.is_empty() {
            info!("   - args: {}", self.args.join(" "));
        }
        info!("   - ci: {}", self.ci);
        if self.ci && !self.ci_plugins.is_empty() {
            info!("   - ci_plugins: {}", self.ci_plugins.join(", "));
        }
        info!("   - cleanup_after_run: {}", self.cleanup_after_run);
        info!("   - reverse_port_forwarding: {}", self.reverse_port_forwarding);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_load_config_full() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fmedic.toml");
        std::fs::write(
            &path,
            r#"
platform = "ios@../cordova-ios"
plugins = ["./plugin-a", "./plugin-b"]
timeout_ms = 120000
action = "emulate"
cleanup_after_run = true

[channel]
port_range = [7000, 7010]
heartbeat_timeout_ms = 30000

[emulator]
boot_attempts = 5
"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.platform_id(), "ios");
        assert_eq!(config.plugins.len(), 2);
        assert_eq!(config.timeout(), Duration::from_secs(120));
        assert_eq!(config.action, Action::Emulate);
        assert!(config.cleanup_after_run);
        assert_eq!(config.channel.port_range, Some([7000, 7010]));
        assert_eq!(config.channel.heartbeat_timeout_ms, 30_000);
        assert_eq!(config.channel.ping_interval_ms, 25_000);
        assert_eq!(config.emulator.boot_attempts, 5);
        assert_eq!(config.emulator.boot_timeout_ms, 300_000);
    }

    #[test]
    fn test_load_config_missing() {
        let err = load_config(Path::new("/definitely/not/here/fmedic.toml")).unwrap_err();
        assert!(matches!(err, Error::ConfigNotFound { .. }));
    }

    #[test]
    fn test_load_config_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fmedic.toml");
        std::fs::write(&path, "platform = [not valid").unwrap();
        assert!(matches!(
            load_config(&path).unwrap_err(),
            Error::ConfigInvalid { .. }
        ));

        std::fs::write(&path, "action = \"deploy\"").unwrap();
        assert!(matches!(
            load_config(&path).unwrap_err(),
            Error::ConfigInvalid { .. }
        ));
    }

    #[test]
    fn test_overrides_replace_file_values() {
        let mut config = MedicConfig {
            platform: "android".into(),
            plugins: vec!["./from-file".into()],
            timeout_ms: 1000,
            ..MedicConfig::default()
        };
        config.apply_overrides(CliOverrides {
            platform: Some("ios".into()),
            plugins: vec!["./from-cli".into()],
            timeout_ms: Some(5000),
            ci: true,
            ..CliOverrides::default()
        });

        assert_eq!(config.platform, "ios");
        assert_eq!(config.plugins, vec!["./from-cli"]);
        assert_eq!(config.timeout_ms, 5000);
        assert!(config.ci);
    }

    #[test]
    fn test_ci_plugins_follow_ci_flag() {
        let mut config: MedicConfig = toml::from_str(
            "platform = \"android\"\nci_plugins = [\"./ci-plugin\"]\n",
        )
        .unwrap();
        let framework: Vec<_> = config.test_framework_plugins().collect();
        assert_eq!(framework, vec!["github:apache/cordova-plugin-test-framework"]);

        config.apply_overrides(CliOverrides {
            ci: true,
            ..CliOverrides::default()
        });
        let framework: Vec<_> = config.test_framework_plugins().collect();
        assert_eq!(
            framework,
            vec!["github:apache/cordova-plugin-test-framework", "./ci-plugin"]
        );
    }

    #[test]
    fn test_empty_overrides_keep_file_values() {
        let mut config = MedicConfig {
            platform: "android".into(),
            plugins: vec!["./from-file".into()],
            cleanup_after_run: true,
            ..MedicConfig::default()
        };
        config.apply_overrides(CliOverrides::default());
        assert_eq!(config.platform, "android");
        assert_eq!(config.plugins, vec!["./from-file"]);
        assert!(config.cleanup_after_run);
    }

    #[test]
    fn test_justbuild_wins_over_action() {
        let mut config = MedicConfig::default();
        config.apply_overrides(CliOverrides {
            action: Some(Action::Run),
            justbuild: true,
            ..CliOverrides::default()
        });
        assert_eq!(config.action, Action::Build);
    }

    #[test]
    fn test_resolve_cli_keeps_bare_names() {
        let mut config = MedicConfig::default();
        config.resolve_cli();
        assert_eq!(config.cli, "cordova");
    }

    #[test]
    fn test_resolve_cli_makes_relative_absolute() {
        let dir = tempfile::tempdir().unwrap();
        let cli = dir.path().join("my-cli");
        std::fs::write(&cli, "").unwrap();

        let mut config = MedicConfig {
            cli: cli.to_string_lossy().into_owned(),
            ..MedicConfig::default()
        };
        config.resolve_cli();
        assert!(Path::new(&config.cli).is_absolute());
    }
}
