//! Application error types with rich context

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Application error types organized by layer/domain
#[derive(Debug, Error)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Common/Infrastructure Errors
    // ─────────────────────────────────────────────────────────────
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    // ─────────────────────────────────────────────────────────────
    // Target Acquisition Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Could not acquire a {platform} target after {attempts} attempt(s)")]
    AcquisitionExhausted { platform: String, attempts: u32 },

    #[error("Unsupported platform: {name}")]
    UnsupportedPlatform { name: String },

    // ─────────────────────────────────────────────────────────────
    // Process Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Failed to launch \"{command}\": {reason}")]
    LaunchFailed { command: String, reason: String },

    #[error("Command failed: \"{command}\"\nExit Code: {code:?} & Message:\n{stderr}")]
    ProcessFailed {
        command: String,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("Command \"{command}\" timed out after {after:?}")]
    TimedOut { command: String, after: Duration },

    // ─────────────────────────────────────────────────────────────
    // Result Channel Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Port {port} is already in use")]
    PortInUse { port: u16 },

    #[error("No usable port found in range {first}-{last}")]
    ChannelBindFailed { first: u16, last: u16 },

    #[error("Device is disconnected before passing the tests")]
    UnexpectedDisconnect,

    #[error("The device failed to connect to local server in {} secs", .after.as_secs())]
    InitialConnectionTimeout { after: Duration },

    #[error("Tests failed to complete in {} ms", .after.as_millis())]
    SessionTimeout { after: Duration },

    #[error("Channel closed unexpectedly")]
    ChannelClosed,

    #[error("Channel protocol error: {message}")]
    Protocol { message: String },

    // ─────────────────────────────────────────────────────────────
    // Configuration / Project Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    #[error("Invalid configuration: {message}")]
    ConfigInvalid { message: String },

    #[error("Project error: {message}")]
    Project { message: String },
}

// ─────────────────────────────────────────────────────────────────
// Convenience Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn launch_failed(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::LaunchFailed {
            command: command.into(),
            reason: reason.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn config_invalid(message: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            message: message.into(),
        }
    }

    pub fn project(message: impl Into<String>) -> Self {
        Self::Project {
            message: message.into(),
        }
    }

    pub fn unsupported_platform(name: impl Into<String>) -> Self {
        Self::UnsupportedPlatform { name: name.into() }
    }

    /// Check if this error is a test failure rather than a tooling error.
    ///
    /// A peer dropping before reporting results means the app under test
    /// died; the run failed, but the harness itself worked.
    pub fn is_test_failure(&self) -> bool {
        matches!(self, Error::UnexpectedDisconnect)
    }

    /// Captured stderr for process failures, if any
    pub fn stderr(&self) -> Option<&str> {
        match self {
            Error::ProcessFailed { stderr, .. } => Some(stderr),
            _ => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Context Extensions (for use with color-eyre)
// ─────────────────────────────────────────────────────────────────

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", context.into(), err);
            err
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", f(), err);
            err
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = Error::PortInUse { port: 7008 };
        assert_eq!(err.to_string(), "Port 7008 is already in use");

        let err = Error::InitialConnectionTimeout {
            after: Duration::from_secs(540),
        };
        assert!(err.to_string().contains("540 secs"));

        let err = Error::SessionTimeout {
            after: Duration::from_millis(1500),
        };
        assert!(err.to_string().contains("1500 ms"));
    }

    #[test]
    fn test_initial_connection_and_session_timeout_messages_differ() {
        let initial = Error::InitialConnectionTimeout {
            after: Duration::from_secs(1),
        };
        let session = Error::SessionTimeout {
            after: Duration::from_secs(1),
        };
        assert_ne!(initial.to_string(), session.to_string());
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_unexpected_disconnect_is_test_failure() {
        assert!(Error::UnexpectedDisconnect.is_test_failure());
    }

    #[test]
    fn test_tooling_errors_are_not_test_failures() {
        assert!(!Error::AcquisitionExhausted {
            platform: "android".into(),
            attempts: 3
        }
        .is_test_failure());
        assert!(!Error::ChannelBindFailed {
            first: 7000,
            last: 7010
        }
        .is_test_failure());
        assert!(!Error::launch_failed("cordova", "not found").is_test_failure());
    }

    #[test]
    fn test_process_failed_carries_output() {
        let err = Error::ProcessFailed {
            command: "cordova build android".into(),
            code: Some(2),
            stdout: "building".into(),
            stderr: "BUILD FAILED".into(),
        };
        assert_eq!(err.stderr(), Some("BUILD FAILED"));
        assert!(err.to_string().contains("Exit Code: Some(2)"));
        assert!(err.to_string().contains("BUILD FAILED"));
    }

    #[test]
    fn test_error_constructors() {
        let _ = Error::protocol("test");
        let _ = Error::config("test");
        let _ = Error::config_invalid("test");
        let _ = Error::project("test");
        let err = Error::unsupported_platform("blackberry10");
        assert!(err.to_string().contains("blackberry10"));
    }
}
