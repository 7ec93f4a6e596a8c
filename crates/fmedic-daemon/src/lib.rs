//! # fmedic-daemon - Devices, Processes and the Result Channel
//!
//! Everything that talks to the outside world during a test session:
//! external commands, emulators and simulators, and the WebSocket endpoint
//! the deployed app reports results to.
//!
//! Depends on [`fmedic_core`] for domain types and error handling.
//!
//! ## Public API
//!
//! ### Process Management
//! - [`ProcessSupervisor`] - Run a command with capture, timeout and kill
//! - [`CommandRunner`] - Async seam over command execution; [`SystemRunner`] is the real one
//! - [`CommandSpec`], [`ProcessOutput`] - Command description and captured output
//!
//! ### Target Acquisition
//! - [`TargetAcquirer`] - Platform request to ready [`fmedic_core::Target`]
//! - [`SimulatorInventory`] - Owned cache of installed iOS simulators
//! - [`ToolPaths`] - Locations of `adb`, `emulator`, `xcrun`
//!
//! ### Teardown Helpers
//! - [`kill_lingering()`] - Kill leftover emulator/simulator processes
//! - [`LogCollector`] - Write `<platform>_logs.txt`
//! - [`uninstall_app()`] - Remove the test app from the target
//!
//! ### Result Channel
//! - [`ResultChannel`] - WebSocket server with heartbeat and typed event bus
//! - [`medic_address()`] - Address the device connects back to

pub mod channel;
pub mod emulator;
pub mod killer;
pub mod logs;
pub mod process;
pub mod runner;
pub mod simulators;
pub mod target;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_utils;
pub mod tool_availability;
pub mod uninstall;

// Public API re-exports
pub use channel::{medic_address, EventBus, HeartbeatConfig, PortSpec, ResultChannel};
pub use killer::kill_lingering;
pub use logs::LogCollector;
pub use process::{ProcessSupervisor, SupervisedProcess};
pub use runner::{CommandRunner, CommandSpec, ProcessOutput, SystemRunner};
pub use simulators::{SimulatorData, SimulatorInventory};
pub use target::{AcquireOptions, TargetAcquirer};
pub use tool_availability::ToolPaths;
pub use uninstall::uninstall_app;
