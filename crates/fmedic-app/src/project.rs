//! Test project provisioning
//!
//! Creates the throwaway app project the tests run in: platform, test
//! framework plugins, the plugins under test and their `tests/` sub-plugins,
//! and a start page pointing at the test runner.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;

use fmedic_core::prelude::*;
use fmedic_daemon::{CommandRunner, CommandSpec};

use crate::config::MedicConfig;

/// Start page shipped by the test framework plugin
const TEST_START_PAGE: &str = "cdvtests/index.html";

/// A provisioned project directory
#[derive(Debug)]
pub struct ProjectDir {
    path: PathBuf,
    temp: Option<TempDir>,
}

impl ProjectDir {
    /// Project in a temporary directory owned by this handle
    pub fn temporary(temp: TempDir) -> Self {
        Self {
            path: temp.path().to_path_buf(),
            temp: Some(temp),
        }
    }

    /// Project in a directory this handle does not own
    pub fn existing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            temp: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the project: delete it when `cleanup`, otherwise leave it on disk.
    pub fn release(self, cleanup: bool) -> Result<()> {
        match self.temp {
            Some(temp) if cleanup => {
                info!("Removing temporary project: {}", self.path.display());
                temp.close()?;
            }
            Some(temp) => {
                let kept = temp.keep();
                info!("Keeping project at {}", kept.display());
            }
            None if cleanup => {
                info!("Removing project: {}", self.path.display());
                std::fs::remove_dir_all(&self.path)?;
            }
            None => {}
        }
        Ok(())
    }
}

/// Provisions the project a session runs in
#[trait_variant::make(ProjectProvisioner: Send)]
pub trait LocalProjectProvisioner {
    async fn provision(&self, config: &MedicConfig) -> Result<ProjectDir>;
}

/// Provisions through the project CLI (`cordova create`, `platform add`, ...)
pub struct CliProjectProvisioner<R> {
    runner: Arc<R>,
    /// Directory relative plugin paths are resolved against
    base_dir: PathBuf,
}

impl<R: CommandRunner> CliProjectProvisioner<R> {
    pub fn new(runner: Arc<R>, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            base_dir: base_dir.into(),
        }
    }

    fn cli(config: &MedicConfig, args: &[&str], cwd: Option<&Path>) -> CommandSpec {
        let spec = CommandSpec::new(config.cli.as_str(), args.iter().copied()).with_common_args();
        match cwd {
            Some(dir) => spec.cwd(dir),
            None => spec,
        }
    }

    async fn install_plugin(&self, config: &MedicConfig, project: &Path, plugin: &str) -> Result<()> {
        let (source, extra) = split_plugin_spec(plugin);
        let source = self.resolve_plugin_source(source);

        let mut spec = Self::cli(config, &["plugin", "add", source.as_str()], Some(project));
        spec.args.extend(extra);
        info!("Installing plugin {}", source);
        self.runner
            .run(spec)
            .await
            .map(|_| ())
            .with_context(|| format!("Failed to install plugin: {plugin}"))
    }

    /// Local plugin paths become absolute; registry ids pass through
    fn resolve_plugin_source(&self, source: &str) -> String {
        let candidate = self.base_dir.join(source);
        if candidate.exists() {
            if let Ok(absolute) = dunce::canonicalize(&candidate) {
                return absolute.to_string_lossy().into_owned();
            }
        }
        source.to_string()
    }
}

impl<R: CommandRunner + Send + Sync> ProjectProvisioner for CliProjectProvisioner<R> {
    async fn provision(&self, config: &MedicConfig) -> Result<ProjectDir> {
        let temp = tempfile::Builder::new().prefix("fmedic-").tempdir()?;
        let project = ProjectDir::temporary(temp);
        let dir = project.path().to_path_buf();
        let dir_arg = dir.to_string_lossy().into_owned();

        info!("Creating temp project at {}", dir.display());
        self.runner
            .run(Self::cli(config, &["create", dir_arg.as_str()], None))
            .await?;

        self.runner
            .run(Self::cli(
                config,
                &["platform", "add", config.platform.as_str()],
                Some(&dir),
            ))
            .await?;

        info!("Installing test framework plugins");
        for plugin in config.test_framework_plugins() {
            self.install_plugin(config, &dir, plugin).await?;
        }
        info!("Installing plugins under test");
        for plugin in &config.plugins {
            self.install_plugin(config, &dir, plugin).await?;
        }
        info!("Installing tests for existing plugins");
        for tests in find_plugin_tests(&dir)? {
            self.install_plugin(config, &dir, &tests.to_string_lossy())
                .await?;
        }

        let installed = self
            .runner
            .run(Self::cli(config, &["plugins"], Some(&dir)))
            .await?;
        info!("Installed plugins:\n{}", installed.stdout.trim_end());

        set_up_start_page(&dir)?;

        let requirements = self
            .runner
            .run(Self::cli(
                config,
                &["requirements", config.platform_id()],
                Some(&dir),
            ))
            .await?;
        info!("{}", requirements.stdout.trim_end());

        Ok(project)
    }
}

/// Split `"<plugin> --flag value"` into the plugin source and its extra args
pub fn split_plugin_spec(plugin: &str) -> (&str, Vec<String>) {
    match plugin.find(" --") {
        Some(idx) if idx > 0 => (
            &plugin[..idx],
            plugin[idx..].split_whitespace().map(str::to_string).collect(),
        ),
        _ => (plugin, Vec::new()),
    }
}

/// `plugins/*/tests` directories that carry their own `plugin.xml`
pub fn find_plugin_tests(project: &Path) -> Result<Vec<PathBuf>> {
    let plugins = project.join("plugins");
    if !plugins.is_dir() {
        return Ok(Vec::new());
    }

    let mut found = Vec::new();
    for entry in std::fs::read_dir(&plugins)? {
        let tests = entry?.path().join("tests");
        if tests.join("plugin.xml").is_file() {
            found.push(tests);
        }
    }
    found.sort();
    Ok(found)
}

/// Point the app's start page at the test runner
pub fn set_up_start_page(project: &Path) -> Result<()> {
    let path = project.join("config.xml");
    let content = std::fs::read_to_string(&path)
        .map_err(|e| Error::project(format!("cannot read {}: {}", path.display(), e)))?;
    let updated = content.replacen(
        "src=\"index.html\"",
        &format!("src=\"{TEST_START_PAGE}\""),
        1,
    );
    std::fs::write(&path, updated)?;
    debug!("Start page set to {}", TEST_START_PAGE);
    Ok(())
}

/// Write `www/medic.json` so the app knows where to report
pub fn write_medic_json(project: &Path, address: &str) -> Result<PathBuf> {
    let www = project.join("www");
    std::fs::create_dir_all(&www)?;
    let path = www.join("medic.json");
    std::fs::write(&path, json!({ "logurl": address }).to_string())?;
    info!("Wrote medic log url {} to project", address);
    Ok(path)
}
