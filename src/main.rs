//! Field Medic - End-to-end plugin test runner
//!
//! This is the binary entry point. All logic lives in the library.

use std::path::PathBuf;

use clap::Parser;
use field_medic::CliOverrides;
use fmedic_core::Action;

/// Field Medic - Run plugin tests on an emulator, simulator or browser
#[derive(Parser, Debug)]
#[command(name = "fmedic")]
#[command(about = "Run plugin tests on a device and collect the results", long_about = None)]
struct Args {
    /// Platform to test, optionally with a source: android@../cordova-android
    #[arg(long)]
    platform: Option<String>,

    /// Plugin under test (path or registry id); repeat for several
    #[arg(long = "plugin", value_name = "PLUGIN")]
    plugins: Vec<String>,

    /// Directory device logs are written to
    #[arg(long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Emulator serial/AVD name, or simulator model regex
    #[arg(long)]
    target: Option<String>,

    /// Skip tests that need user interaction
    #[arg(long)]
    ci: bool,

    /// Absolute session timeout in milliseconds
    #[arg(long, value_name = "MS")]
    timeout: Option<u64>,

    /// build, run or emulate
    #[arg(long)]
    action: Option<Action>,

    /// Only build the app; same as --action build
    #[arg(long)]
    justbuild: bool,

    #[arg(short, long)]
    verbose: bool,

    /// Project CLI to use (cordova or a path)
    #[arg(long)]
    cli: Option<String>,

    /// Extra arguments for the build/run command
    #[arg(long, value_name = "ARGS", allow_hyphen_values = true)]
    args: Option<String>,

    /// Configuration file (defaults to ./fmedic.toml when present)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Remove the temporary project and stop emulators when done
    #[arg(long)]
    cleanup_after_run: bool,

    /// Reach the host through adb reverse instead of the emulator loopback
    #[arg(long)]
    reverse_port_forwarding: bool,
}

impl Args {
    fn overrides(self) -> CliOverrides {
        CliOverrides {
            platform: self.platform,
            plugins: self.plugins,
            output_dir: self.output_dir,
            target: self.target,
            ci: self.ci,
            timeout_ms: self.timeout,
            action: self.action,
            justbuild: self.justbuild,
            verbose: self.verbose,
            cli: self.cli,
            args: self
                .args
                .map(|a| a.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
            cleanup_after_run: self.cleanup_after_run,
            reverse_port_forwarding: self.reverse_port_forwarding,
        }
    }
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let mut args = Args::parse();
    let config_path = args.config.take();

    let report = field_medic::run(config_path.as_deref(), args.overrides()).await?;
    if let Some(error) = &report.error {
        eprintln!("Error: {error}");
    }
    std::process::exit(report.exit_code());
}
