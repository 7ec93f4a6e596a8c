//! Field Medic Library
//!
//! Runs one plugin test session: provision a throwaway app project, deploy it
//! to a target, collect the results the app reports back, and clean up.

pub mod app;

// Re-export main entry points
pub use app::{load_effective_config, run};
pub use fmedic_app::{CliOverrides, MedicConfig, SessionReport};
