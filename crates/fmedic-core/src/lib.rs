//! # fmedic-core - Core Domain Types
//!
//! Foundation crate for Field Medic. Provides domain types, the result
//! channel event vocabulary, error handling and logging setup.
//!
//! This crate has **zero internal dependencies** -- it only depends on external
//! crates (serde, thiserror, tracing).
//!
//! ## Public API
//!
//! ### Domain Types (`types`)
//! - [`Platform`] - Requested platform (android, ios, browser, ...)
//! - [`Target`] - Resolved execution destination
//! - [`Action`] - Build-only vs run-and-wait
//! - [`SessionPhase`], [`Outcome`] - Session lifecycle bookkeeping
//!
//! ### Events (`events`)
//! - [`EventName`] - Closed allow-list of device events
//! - [`ChannelEvent`] - A relayed `{name, payload}` pair
//! - [`WireMessage`] - Raw `{event, data}` JSON shape sent by the device
//!
//! ### Error Handling (`error`)
//! - [`Error`] - Error enum covering acquisition, process and channel failures
//! - [`Result`] - Type alias for `std::result::Result<T, Error>`
//! - [`ResultExt`] - Extension trait for adding error context
//!
//! ## Prelude
//!
//! Import commonly used types with:
//! ```rust
//! use fmedic_core::prelude::*;
//! ```

pub mod error;
pub mod events;
pub mod logging;
pub mod types;

/// Prelude for common imports used throughout all Field Medic crates
pub mod prelude {
    pub use super::error::{Error, Result, ResultExt};
    pub use tracing::{debug, error, info, instrument, trace, warn};
}

// Re-export commonly used types at crate root for convenience
pub use error::{Error, Result, ResultExt};
pub use events::{
    ChannelEvent, DeviceLog, EventName, FailedExpectation, SpecResult, SpecResults, SuiteSummary,
    WireMessage,
};
pub use types::{Action, Outcome, Platform, SessionPhase, Target};
