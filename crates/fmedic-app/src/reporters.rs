//! Test lifecycle reporters
//!
//! Reporters receive the Jasmine lifecycle events relayed by the result
//! channel. Every method has a no-op default so a reporter implements only
//! what it cares about.

use std::sync::{Arc, Mutex};

use chrono::Local;
use serde_json::Value;

use fmedic_core::prelude::*;
use fmedic_core::{EventName, SpecResult, SuiteSummary};

/// Sink for test lifecycle events
pub trait Reporter: Send + Sync {
    fn jasmine_started(&self, _data: &Value) {}
    fn spec_started(&self, _data: &Value) {}
    fn spec_done(&self, _data: &Value) {}
    fn suite_started(&self, _data: &Value) {}
    fn suite_done(&self, _data: &Value) {}
    fn jasmine_done(&self, _data: &Value) {}
}

/// Fan-out over a set of reporters
#[derive(Clone, Default)]
pub struct Reporters {
    reporters: Vec<Arc<dyn Reporter>>,
}

impl Reporters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, reporter: impl Reporter + 'static) -> Self {
        self.reporters.push(Arc::new(reporter));
        self
    }

    pub fn push(&mut self, reporter: Arc<dyn Reporter>) {
        self.reporters.push(reporter);
    }

    pub fn len(&self) -> usize {
        self.reporters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reporters.is_empty()
    }

    /// Forward one lifecycle event to every reporter. Other events are ignored.
    pub fn dispatch(&self, name: EventName, data: &Value) {
        for reporter in &self.reporters {
            match name {
                EventName::JasmineStarted => reporter.jasmine_started(data),
                EventName::SpecStarted => reporter.spec_started(data),
                EventName::SpecDone => reporter.spec_done(data),
                EventName::SuiteStarted => reporter.suite_started(data),
                EventName::SuiteDone => reporter.suite_done(data),
                EventName::JasmineDone => reporter.jasmine_done(data),
                EventName::DeviceLog | EventName::Disconnect | EventName::DeviceInfo => {}
            }
        }
    }
}

impl std::fmt::Debug for Reporters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reporters")
            .field("count", &self.reporters.len())
            .finish()
    }
}

/// Running spec counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub passed: u64,
    pub failed: u64,
    pub skipped: u64,
}

impl Tally {
    pub fn total(&self) -> u64 {
        self.passed + self.failed + self.skipped
    }
}

/// Logs spec progress and a final summary
#[derive(Debug, Default)]
pub struct ConsoleReporter {
    tally: Mutex<Tally>,
}

impl ConsoleReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tally(&self) -> Tally {
        self.tally.lock().map(|t| *t).unwrap_or_default()
    }
}

impl Reporter for ConsoleReporter {
    fn jasmine_started(&self, data: &Value) {
        if let Ok(mut tally) = self.tally.lock() {
            *tally = Tally::default();
        }
        match data.get("totalSpecsDefined").and_then(Value::as_u64) {
            Some(total) => info!("Started {} specs", total),
            None => info!("Started specs"),
        }
    }

    fn spec_done(&self, data: &Value) {
        let spec: SpecResult = match serde_json::from_value(data.clone()) {
            Ok(spec) => spec,
            Err(e) => {
                warn!("Unreadable specDone payload: {}", e);
                return;
            }
        };

        let Ok(mut tally) = self.tally.lock() else {
            return;
        };
        match spec.status.as_str() {
            "passed" => tally.passed += 1,
            "failed" => {
                tally.failed += 1;
                error!("FAILED: {}", spec.full_name);
                for expectation in &spec.failed_expectations {
                    error!("    {}", expectation.message);
                }
            }
            _ => tally.skipped += 1,
        }
        debug!("{} {}", spec.status, spec.full_name);
    }

    fn suite_started(&self, data: &Value) {
        if let Some(name) = data.get("description").and_then(Value::as_str) {
            debug!("Suite: {}", name);
        }
    }

    fn jasmine_done(&self, data: &Value) {
        let tally = self.tally();
        info!(
            "Completed tests at {}: {} specs, {} passed, {} failed, {} skipped",
            Local::now().format("%H:%M:%S"),
            tally.total(),
            tally.passed,
            tally.failed,
            tally.skipped
        );
        match SuiteSummary::from_value(data) {
            Ok(summary) if !summary.passed() => {
                warn!(
                    "Device reported {} failed of {} specs",
                    summary.spec_results.spec_failed, summary.spec_results.spec_count
                );
            }
            Ok(_) => {}
            Err(e) => warn!("Unreadable jasmineDone payload: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        specs: AtomicUsize,
        done: AtomicUsize,
    }

    impl Reporter for Counting {
        fn spec_done(&self, _data: &Value) {
            self.specs.fetch_add(1, Ordering::SeqCst);
        }
        fn jasmine_done(&self, _data: &Value) {
            self.done.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_dispatch_fans_out_to_every_reporter() {
        let a = Arc::new(Counting::default());
        let b = Arc::new(Counting::default());
        let mut reporters = Reporters::new();
        reporters.push(a.clone());
        reporters.push(b.clone());

        reporters.dispatch(EventName::SpecDone, &json!({}));
        reporters.dispatch(EventName::JasmineDone, &json!({}));

        for r in [&a, &b] {
            assert_eq!(r.specs.load(Ordering::SeqCst), 1);
            assert_eq!(r.done.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn test_dispatch_ignores_non_lifecycle_events() {
        let a = Arc::new(Counting::default());
        let mut reporters = Reporters::new();
        reporters.push(a.clone());

        reporters.dispatch(EventName::DeviceLog, &json!({"type": "log", "msg": ["x"]}));
        reporters.dispatch(EventName::Disconnect, &Value::Null);
        assert_eq!(a.specs.load(Ordering::SeqCst), 0);
        assert_eq!(a.done.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_console_reporter_tallies() {
        let reporter = ConsoleReporter::new();
        reporter.jasmine_started(&json!({"totalSpecsDefined": 4}));
        reporter.spec_done(&json!({"fullName": "a", "status": "passed"}));
        reporter.spec_done(&json!({"fullName": "b", "status": "passed"}));
        reporter.spec_done(&json!({
            "fullName": "c",
            "status": "failed",
            "failedExpectations": [{"message": "Expected 1 to be 2."}]
        }));
        reporter.spec_done(&json!({"fullName": "d", "status": "pending"}));

        assert_eq!(
            reporter.tally(),
            Tally {
                passed: 2,
                failed: 1,
                skipped: 1
            }
        );
        assert_eq!(reporter.tally().total(), 4);
    }

    #[test]
    fn test_console_reporter_ignores_bad_payload() {
        let reporter = ConsoleReporter::new();
        reporter.spec_done(&json!("not an object"));
        assert_eq!(reporter.tally(), Tally::default());
        reporter.jasmine_done(&json!({"specResults": {"specFailed": 0}}));
    }

    #[test]
    fn test_jasmine_started_resets_tally() {
        let reporter = ConsoleReporter::new();
        reporter.spec_done(&json!({"status": "passed"}));
        reporter.jasmine_started(&json!({}));
        assert_eq!(reporter.tally(), Tally::default());
    }
}
