//! fmedic-app - Session orchestration for Field Medic
//!
//! Loads configuration, provisions the test project and drives a
//! [`Session`] through acquire → deploy → wait → collect → teardown with the
//! [`SessionOrchestrator`].

pub mod config;
pub mod orchestrator;
pub mod project;
pub mod reporters;
pub mod session;

// Re-export primary types
pub use config::{load_config, CliOverrides, MedicConfig};
pub use orchestrator::{SessionOrchestrator, SessionReport};
pub use project::{CliProjectProvisioner, ProjectDir, ProjectProvisioner};
pub use reporters::{ConsoleReporter, Reporter, Reporters};
pub use session::Session;
