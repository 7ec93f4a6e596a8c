//! iOS simulator resolution
//!
//! Two listings are involved. The project CLI lists deployable models as
//! `iPhone-15-Pro, 17.2`; `xcrun xctrace list devices` lists installed
//! simulators with their UDIDs. A model is resolved by matching device name
//! and OS version against the installed inventory.

use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use regex::Regex;

use crate::runner::{CommandRunner, CommandSpec};
use crate::tool_availability::ToolPaths;
use fmedic_core::prelude::*;

/// Model filter used when no target hint is given
pub const DEFAULT_MODEL_HINT: &str = "^iPhone";

/// `<device> (<version>) [<udid>]` or `(<udid>)`, after normalisation
static INVENTORY_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([a-zA-Z\d ]+) \(([\d.]+)\) [\[(]([a-zA-Z\d-]*)[\])].*$")
        .expect("Invalid inventory line regex")
});

/// Characters left untouched by JavaScript-style URI component encoding
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// A deployable model from the project CLI listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatorModel {
    /// Device name with dashes turned into spaces, e.g. `iPhone 15 Pro`
    pub device: String,
    /// OS version, e.g. `17.2`
    pub version: String,
}

impl SimulatorModel {
    /// Parse `iPhone-15-Pro, 17.2`
    pub fn parse(line: &str) -> Option<Self> {
        let (device, version) = line.trim().split_once(", ")?;
        Some(Self {
            device: device.replace('-', " ").trim().to_string(),
            version: version.trim().to_string(),
        })
    }
}

/// A model resolved against the installed inventory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatorData {
    pub device: String,
    pub version: String,
    /// Percent-encoded UDID, when an installed simulator matched
    pub sim_id: Option<String>,
}

/// One installed simulator from `xcrun xctrace list devices`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryEntry {
    pub device: String,
    pub version: String,
    pub udid: String,
}

impl InventoryEntry {
    /// Parse one inventory line.
    ///
    /// Older Xcodes print `iPhone Xʀ` and newer ones append ` Simulator` to
    /// the device name; both are normalised first.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.replacen('ʀ', "R", 1).replacen(" Simulator", "", 1);
        let caps = INVENTORY_LINE.captures(&line)?;
        Some(Self {
            device: caps[1].to_string(),
            version: caps[2].to_string(),
            udid: caps[3].to_string(),
        })
    }
}

/// Choose a model line from the project CLI listing.
///
/// Lines matching `hint` (a regex, default `^iPhone`) are candidates and the
/// last one wins. With no candidate the first `iPhone` line is used.
pub fn select_model_line(listing: &str, hint: Option<&str>) -> Result<Option<String>> {
    let pattern = hint.unwrap_or(DEFAULT_MODEL_HINT);
    let filter = Regex::new(pattern)
        .map_err(|e| Error::config_invalid(format!("invalid target pattern '{pattern}': {e}")))?;

    info!("Filtering for targeted simulator: {}", filter);

    let lines: Vec<&str> = listing.lines().collect();
    if let Some(line) = lines.iter().rev().find(|line| filter.is_match(line)) {
        return Ok(Some(line.trim().to_string()));
    }

    warn!("Unable to find requested simulator, falling back to the first available!");
    Ok(lines
        .iter()
        .find(|line| line.contains("iPhone"))
        .map(|line| line.trim().to_string()))
}

/// Query the deployable models through the project CLI
pub async fn list_models<R: CommandRunner>(runner: &R, cli: &str, project_dir: &Path) -> Result<String> {
    let spec = CommandSpec::new(cli, ["run", "ios", "--list", "--emulator"])
        .with_common_args()
        .cwd(project_dir);
    let output = runner.run(spec).await?;
    info!("Available simulators:\n{}", output.stdout);
    Ok(output.stdout)
}

/// Lazily-populated cache of installed simulators and resolved models.
///
/// Owned by whoever acquires targets; call [`invalidate`](Self::invalidate)
/// after installing or deleting simulators.
#[derive(Debug, Default)]
pub struct SimulatorInventory {
    lines: Option<Vec<String>>,
    resolved: HashMap<String, SimulatorData>,
}

impl SimulatorInventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop cached inventory and resolutions
    pub fn invalidate(&mut self) {
        self.lines = None;
        self.resolved.clear();
    }

    pub fn is_populated(&self) -> bool {
        self.lines.is_some()
    }

    /// Installed iPhone simulator lines, fetched once
    async fn lines<R: CommandRunner>(&mut self, runner: &R, tools: &ToolPaths) -> Result<&[String]> {
        if self.lines.is_none() {
            let output = runner
                .run(CommandSpec::new(
                    tools.xcrun.as_str(),
                    ["xctrace", "list", "devices"],
                ))
                .await
                .context("Failed to fetch simulator list")?;

            let lines = output
                .stdout
                .lines()
                .filter(|line| line.starts_with("iPhone"))
                .map(String::from)
                .collect();
            self.lines = Some(lines);
        }

        Ok(self.lines.as_deref().unwrap_or_default())
    }

    /// Resolve a model line (e.g. `iPhone-15-Pro, 17.2`) to a simulator.
    ///
    /// When several installed simulators share the device name and version
    /// the first listed is used.
    pub async fn resolve<R: CommandRunner>(
        &mut self,
        runner: &R,
        tools: &ToolPaths,
        model_line: &str,
    ) -> Result<SimulatorData> {
        if let Some(data) = self.resolved.get(model_line) {
            return Ok(data.clone());
        }

        let model = SimulatorModel::parse(model_line)
            .ok_or_else(|| Error::protocol(format!("unrecognised simulator model '{model_line}'")))?;

        let ids: Vec<String> = self
            .lines(runner, tools)
            .await?
            .iter()
            .filter_map(|line| InventoryEntry::parse(line))
            .filter(|entry| entry.device == model.device && entry.version == model.version)
            .map(|entry| utf8_percent_encode(&entry.udid, URI_COMPONENT).to_string())
            .collect();

        match ids.len() {
            0 => error!("No simulator found for {} ({})", model.device, model.version),
            1 => {}
            _ => warn!("Multiple matching simulators found. Will use the first matching simulator"),
        }

        let data = SimulatorData {
            device: model.device,
            version: model.version,
            sim_id: ids.into_iter().next(),
        };
        self.resolved.insert(model_line.to_string(), data.clone());
        Ok(data)
    }
}
