//! Tool discovery for device management
//!
//! Resolves the executables used to drive emulators and simulators: `adb`,
//! the Android SDK `emulator`, and `xcrun` (macOS with Xcode).

use std::path::{Path, PathBuf};

/// Program names (or absolute paths) of the external device tools
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPaths {
    /// `adb` from the Android platform tools
    pub adb: String,

    /// `emulator` from the Android SDK
    pub emulator: String,

    /// `xcrun` (macOS only)
    pub xcrun: String,
}

impl Default for ToolPaths {
    /// Bare program names, resolved through `PATH` at spawn time
    fn default() -> Self {
        Self {
            adb: "adb".to_string(),
            emulator: "emulator".to_string(),
            xcrun: "xcrun".to_string(),
        }
    }
}

impl ToolPaths {
    /// Locate each tool (run once at startup).
    ///
    /// `PATH` wins; otherwise the Android SDK under `ANDROID_HOME` or
    /// `ANDROID_SDK_ROOT` is searched. Tools that cannot be found keep their
    /// bare name so the eventual spawn reports a clean launch failure.
    pub fn discover() -> Self {
        let sdk_roots = Self::sdk_roots();

        let adb = Self::find("adb", &sdk_roots, &["platform-tools"]);
        let emulator = Self::find("emulator", &sdk_roots, &["emulator", "tools"]);
        let xcrun = Self::find("xcrun", &[], &[]);

        tracing::debug!(
            "Device tools: adb={}, emulator={}, xcrun={}",
            adb,
            emulator,
            xcrun
        );

        Self {
            adb,
            emulator,
            xcrun,
        }
    }

    /// Android SDK roots from the environment, in precedence order
    fn sdk_roots() -> Vec<PathBuf> {
        ["ANDROID_HOME", "ANDROID_SDK_ROOT"]
            .iter()
            .filter_map(|var| std::env::var_os(var))
            .map(PathBuf::from)
            .collect()
    }

    fn find(name: &str, sdk_roots: &[PathBuf], sdk_subdirs: &[&str]) -> String {
        if let Ok(path) = which::which(name) {
            return display_path(&path);
        }

        for root in sdk_roots {
            for sub in sdk_subdirs {
                let candidate = root.join(sub).join(executable_name(name));
                if candidate.is_file() {
                    return display_path(&candidate);
                }
            }
        }

        tracing::debug!("{} not found in PATH or Android SDK", name);
        name.to_string()
    }

    /// User-friendly message when the iOS tooling is missing
    pub fn ios_unavailable_message(&self) -> Option<&'static str> {
        if which::which(&self.xcrun).is_ok() {
            None
        } else if cfg!(target_os = "macos") {
            Some("Xcode not installed. Install Xcode to manage iOS simulators.")
        } else {
            Some("iOS simulators are only available on macOS.")
        }
    }

    /// User-friendly message when the Android tooling is missing
    pub fn android_unavailable_message(&self) -> Option<&'static str> {
        if which::which(&self.adb).is_ok() && which::which(&self.emulator).is_ok() {
            None
        } else {
            Some("Android SDK not found. Set ANDROID_HOME or install Android Studio.")
        }
    }
}

fn executable_name(name: &str) -> String {
    if cfg!(windows) {
        format!("{name}.exe")
    } else {
        name.to_string()
    }
}

fn display_path(path: &Path) -> String {
    dunce::simplified(path).to_string_lossy().into_owned()
}
