//! Result channel event vocabulary
//!
//! The deployed test app sends `{"event": <name>, "data": <any>}` JSON
//! messages. Only names in [`EventName`] are ever relayed; anything else is
//! dropped at the parse boundary.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─────────────────────────────────────────────────────────
// Event names (allow-list)
// ─────────────────────────────────────────────────────────

/// The closed set of events the device may send
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventName {
    DeviceLog,
    Disconnect,
    DeviceInfo,
    JasmineStarted,
    SpecStarted,
    SpecDone,
    SuiteStarted,
    SuiteDone,
    JasmineDone,
}

impl EventName {
    /// Every allow-listed event, in protocol order
    pub const ALL: [EventName; 9] = [
        EventName::DeviceLog,
        EventName::Disconnect,
        EventName::DeviceInfo,
        EventName::JasmineStarted,
        EventName::SpecStarted,
        EventName::SpecDone,
        EventName::SuiteStarted,
        EventName::SuiteDone,
        EventName::JasmineDone,
    ];

    /// Test lifecycle events forwarded to reporters
    pub const LIFECYCLE: [EventName; 6] = [
        EventName::JasmineStarted,
        EventName::SpecStarted,
        EventName::SpecDone,
        EventName::SuiteStarted,
        EventName::SuiteDone,
        EventName::JasmineDone,
    ];

    /// Look up a wire name. Returns `None` for anything off the allow-list.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "deviceLog" => Some(EventName::DeviceLog),
            "disconnect" => Some(EventName::Disconnect),
            "deviceInfo" => Some(EventName::DeviceInfo),
            "jasmineStarted" => Some(EventName::JasmineStarted),
            "specStarted" => Some(EventName::SpecStarted),
            "specDone" => Some(EventName::SpecDone),
            "suiteStarted" => Some(EventName::SuiteStarted),
            "suiteDone" => Some(EventName::SuiteDone),
            "jasmineDone" => Some(EventName::JasmineDone),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::DeviceLog => "deviceLog",
            EventName::Disconnect => "disconnect",
            EventName::DeviceInfo => "deviceInfo",
            EventName::JasmineStarted => "jasmineStarted",
            EventName::SpecStarted => "specStarted",
            EventName::SpecDone => "specDone",
            EventName::SuiteStarted => "suiteStarted",
            EventName::SuiteDone => "suiteDone",
            EventName::JasmineDone => "jasmineDone",
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────
// Messages
// ─────────────────────────────────────────────────────────

/// Raw message shape on the wire
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WireMessage {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

/// An allow-listed event relayed to subscribers
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelEvent {
    pub name: EventName,
    pub data: Value,
}

impl ChannelEvent {
    pub fn new(name: EventName, data: Value) -> Self {
        Self { name, data }
    }

    /// Synthesized when a peer connection closes or is terminated
    pub fn disconnect() -> Self {
        Self::new(EventName::Disconnect, Value::Null)
    }

    /// Parse a text frame into an allow-listed event.
    ///
    /// Returns `Ok(None)` for well-formed messages with an unknown name and
    /// `Err` for payloads that are not `{event, data}` JSON.
    pub fn from_json(text: &str) -> serde_json::Result<Option<Self>> {
        let msg: WireMessage = serde_json::from_str(text)?;
        Ok(EventName::parse(&msg.event).map(|name| Self::new(name, msg.data)))
    }
}

// ─────────────────────────────────────────────────────────
// Typed payloads
// ─────────────────────────────────────────────────────────

/// `deviceLog` payload: a console call captured on the device
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DeviceLog {
    #[serde(rename = "type", default)]
    pub level: String,
    #[serde(default)]
    pub msg: Vec<Value>,
}

impl DeviceLog {
    /// First console argument rendered as text
    pub fn first_message(&self) -> String {
        match self.msg.first() {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        }
    }
}

/// Per-run spec tallies sent with `jasmineDone`
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecResults {
    #[serde(default)]
    pub spec_count: u64,
    #[serde(default)]
    pub spec_failed: u64,
    #[serde(default)]
    pub spec_excluded: u64,
}

/// `jasmineDone` payload
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SuiteSummary {
    #[serde(default)]
    pub spec_results: SpecResults,
}

impl SuiteSummary {
    /// Read the summary from a `jasmineDone` payload.
    ///
    /// A payload without `specResults` counts as zero failures.
    pub fn from_value(data: &Value) -> serde_json::Result<Self> {
        if data.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(data.clone())
    }

    pub fn passed(&self) -> bool {
        self.spec_results.spec_failed == 0
    }
}

/// `specDone` payload (subset of a Jasmine spec result)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecResult {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub failed_expectations: Vec<FailedExpectation>,
}

/// One failed expectation inside a [`SpecResult`]
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FailedExpectation {
    #[serde(default)]
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_name_round_trips_every_allowed_name() {
        for name in EventName::ALL {
            assert_eq!(EventName::parse(name.as_str()), Some(name));
        }
    }

    #[test]
    fn test_event_name_rejects_unknown_and_case_variants() {
        assert_eq!(EventName::parse("jasmineFinished"), None);
        assert_eq!(EventName::parse("JasmineDone"), None);
        assert_eq!(EventName::parse(""), None);
        assert_eq!(EventName::parse("__proto__"), None);
    }

    #[test]
    fn test_from_json_allowed_event() {
        let ev = ChannelEvent::from_json(r#"{"event":"specDone","data":{"status":"passed"}}"#)
            .unwrap()
            .unwrap();
        assert_eq!(ev.name, EventName::SpecDone);
        assert_eq!(ev.data["status"], "passed");
    }

    #[test]
    fn test_from_json_unknown_event_is_dropped() {
        let ev = ChannelEvent::from_json(r#"{"event":"shutdownHost","data":1}"#).unwrap();
        assert!(ev.is_none());
    }

    #[test]
    fn test_from_json_missing_data_defaults_to_null() {
        let ev = ChannelEvent::from_json(r#"{"event":"jasmineStarted"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(ev.data, Value::Null);
    }

    #[test]
    fn test_from_json_malformed() {
        assert!(ChannelEvent::from_json("not json").is_err());
        assert!(ChannelEvent::from_json(r#"{"data":1}"#).is_err());
        assert!(ChannelEvent::from_json(r#"{"event":42}"#).is_err());
    }

    #[test]
    fn test_suite_summary_pass_fail() {
        let passed = SuiteSummary::from_value(&json!({"specResults": {"specFailed": 0}})).unwrap();
        assert!(passed.passed());

        let failed = SuiteSummary::from_value(&json!({
            "specResults": {"specCount": 10, "specFailed": 2, "specExcluded": 1}
        }))
        .unwrap();
        assert!(!failed.passed());
        assert_eq!(failed.spec_results.spec_count, 10);
    }

    #[test]
    fn test_suite_summary_null_payload() {
        assert!(SuiteSummary::from_value(&Value::Null).unwrap().passed());
    }

    #[test]
    fn test_device_log_first_message() {
        let log: DeviceLog =
            serde_json::from_value(json!({"type": "warn", "msg": ["careful", 1]})).unwrap();
        assert_eq!(log.level, "warn");
        assert_eq!(log.first_message(), "careful");

        let log: DeviceLog = serde_json::from_value(json!({"type": "log", "msg": [{"a": 1}]})).unwrap();
        assert_eq!(log.first_message(), r#"{"a":1}"#);
    }
}
