//! The log event record and its naming/level types.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Context key the engine reads to route an emitted message to a named
/// subscriber.
pub const TARGET_KEY: &str = "target";
/// Context key carrying the completed span's `{id, beginAt, endAt, duration}`
/// object.
pub const SPAN_INFO_KEY: &str = "spanInfo";
/// Context key carrying the span identifier string.
pub const SPAN_ID_KEY: &str = "spanId";

/// Totally ordered severity of a message.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum LogLevel {
    Verbose,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    pub const fn as_str(self) -> &'static str {
        match self {
            LogLevel::Verbose => "verbose",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Fatal => "fatal",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hierarchical logger name: an ordered sequence of non-empty path segments.
///
/// Equality is elementwise; ordering is lexicographic by segment. Displayed
/// dotted, e.g. `Lantern.Registry`.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct PointName(Vec<String>);

impl PointName {
    pub fn new(segments: Vec<String>) -> Self {
        PointName(segments.into_iter().filter(|s| !s.is_empty()).collect())
    }

    pub fn parse(dotted: &str) -> Self {
        PointName::new(dotted.split('.').map(str::to_string).collect())
    }

    pub fn empty() -> Self {
        PointName(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// A new name with `segment` appended.
    pub fn sub(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        let segment = segment.into();
        if !segment.is_empty() {
            segments.push(segment);
        }
        PointName(segments)
    }
}

impl fmt::Display for PointName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

impl From<&[&str]> for PointName {
    fn from(segments: &[&str]) -> Self {
        PointName::new(segments.iter().map(|s| s.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for PointName {
    fn from(segments: [&str; N]) -> Self {
        PointName::from(&segments[..])
    }
}

/// A single log event.
///
/// Messages are immutable records; every update constructs a new message.
/// The timestamp is assigned at creation and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct Message {
    pub name: PointName,
    pub level: LogLevel,
    pub value: Value,
    pub context: HashMap<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// An event message with a textual payload. The name is empty until a
    /// logger stamps its own name onto the message at ingress.
    pub fn event(level: LogLevel, text: impl Into<String>) -> Self {
        Message {
            name: PointName::empty(),
            level,
            value: Value::String(text.into()),
            context: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    /// A measurement-shaped message, consumed by metric services.
    pub fn gauge(name: impl Into<PointName>, value: f64) -> Self {
        Message {
            name: name.into(),
            level: LogLevel::Debug,
            value: Value::Float64(value),
            context: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_name(mut self, name: PointName) -> Self {
        self.name = name;
        self
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    /// Functional context update: returns a new message with `key` bound to
    /// `value`, replacing any previous binding.
    pub fn set_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn context_value(&self, key: &str) -> Option<&Value> {
        self.context.get(key)
    }

    /// The `"target"` routing key, if present and bound to a string.
    pub fn target(&self) -> Option<&str> {
        self.context.get(TARGET_KEY).and_then(Value::as_str)
    }

    pub fn set_target(self, target: impl Into<String>) -> Self {
        self.set_context(TARGET_KEY, Value::String(target.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_are_totally_ordered() {
        assert!(LogLevel::Verbose < LogLevel::Debug);
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Error);
        assert!(LogLevel::Error < LogLevel::Fatal);
    }

    #[test]
    fn point_name_ordering_is_lexicographic() {
        let a = PointName::from(["app", "db"]);
        let b = PointName::from(["app", "web"]);
        assert!(a < b);
        assert_eq!(a, PointName::parse("app.db"));
        assert_eq!(a.sub("query").to_string(), "app.db.query");
    }

    #[test]
    fn point_name_drops_empty_segments() {
        let name = PointName::new(vec!["app".to_string(), String::new()]);
        assert_eq!(name.segments(), ["app".to_string()]);
    }

    #[test]
    fn set_context_is_functional() {
        let original = Message::event(LogLevel::Info, "hi");
        let updated = original.clone().set_context("k", "v1");
        let replaced = updated.clone().set_context("k", "v2");

        assert!(original.context_value("k").is_none());
        assert_eq!(updated.context_value("k"), Some(&Value::from("v1")));
        assert_eq!(replaced.context_value("k"), Some(&Value::from("v2")));
        assert_eq!(original.timestamp, updated.timestamp);
    }

    #[test]
    fn gauge_carries_measurement() {
        let msg = Message::gauge(PointName::parse("proc.cpu"), 0.75);
        assert_eq!(msg.value, Value::Float64(0.75));
        assert_eq!(msg.name.to_string(), "proc.cpu");
    }

    #[test]
    fn target_reads_only_string_values() {
        let msg = Message::event(LogLevel::Info, "x").set_context(TARGET_KEY, 3i64);
        assert_eq!(msg.target(), None);
        let msg = msg.set_target("console");
        assert_eq!(msg.target(), Some("console"));
    }
}
