//! Rule events and the formatter that renders action templates.

use crate::error::{RelayError, RelayResult};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::LazyLock;
use time::OffsetDateTime;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{\s*([A-Za-z0-9_]+(?:\.[A-Za-z0-9_]+)*)\s*\}").expect("valid placeholder regex")
});

/// An event raised by the CMS that a rule reacts to.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RuleEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub payload: Value,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl RuleEvent {
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}

/// Renders action templates against an event.
pub trait EventFormatter: Send + Sync {
    fn format(&self, template: &str, event: &RuleEvent) -> RelayResult<String>;

    /// The full event as a JSON envelope.
    fn to_envelope_json(&self, event: &RuleEvent) -> RelayResult<String> {
        serde_json::to_string(event).map_err(|e| RelayError::Format(e.to_string()))
    }
}

/// Formatter substituting `${path.to.field}` placeholders.
///
/// Paths are resolved against the event envelope (`type`, `timestamp`,
/// `payload.*`). Strings are inserted verbatim, other values as JSON and
/// missing values as the empty string.
#[derive(Clone, Copy, Debug, Default)]
pub struct PlaceholderFormatter;

impl EventFormatter for PlaceholderFormatter {
    fn format(&self, template: &str, event: &RuleEvent) -> RelayResult<String> {
        if !template.contains("${") {
            return Ok(template.to_string());
        }

        let envelope = serde_json::to_value(event).map_err(|e| RelayError::Format(e.to_string()))?;
        let rendered = PLACEHOLDER.replace_all(template, |caps: &Captures<'_>| {
            let pointer = format!("/{}", caps[1].replace('.', "/"));
            match envelope.pointer(&pointer) {
                None | Some(Value::Null) => String::new(),
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
            }
        });
        Ok(rendered.into_owned())
    }
}
