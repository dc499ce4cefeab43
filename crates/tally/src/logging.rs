//! Counter event logging.
//!
//! Counter mutations can carry a log record: a plain message or a failure
//! description. Failures log at `ERROR` and messages at `INFO` unless the
//! caller overrides the level. An optional formatter receives the (key,
//! value, payload, options) tuple and produces the final message plus
//! structured fields; a pluggable sink receives the result. The default
//! sink forwards to `tracing`.

use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};
use tracing::Level;

/// What a counter event is reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogPayload {
    /// An informational message.
    Message(String),
    /// A failure description; selects `ERROR` unless overridden.
    Failure(String),
}

impl LogPayload {
    pub fn message(text: impl Into<String>) -> Self {
        Self::Message(text.into())
    }

    /// Build a failure payload from any error.
    pub fn failure(err: &dyn std::error::Error) -> Self {
        Self::Failure(err.to_string())
    }

    pub fn text(&self) -> &str {
        match self {
            Self::Message(text) | Self::Failure(text) => text,
        }
    }

    fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }
}

/// Per-event options: an explicit level override and structured fields
/// passed through to the formatter and the sink.
#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    pub level: Option<Level>,
    pub fields: Map<String, Value>,
}

impl LogOptions {
    pub fn with_level(level: Level) -> Self {
        Self {
            level: Some(level),
            fields: Map::new(),
        }
    }

    pub fn field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }
}

/// A fully formatted counter event, ready for the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormattedEvent {
    pub message: String,
    pub fields: Map<String, Value>,
}

/// Caller-supplied formatter applied to every counter event.
pub type LogFormatter =
    Arc<dyn Fn(&str, i64, &LogPayload, &LogOptions) -> FormattedEvent + Send + Sync>;

/// Destination for counter events.
pub trait LogSink: Send + Sync {
    fn log(&self, level: Level, event: &FormattedEvent);
}

/// Default sink: forwards counter events to the `tracing` macros.
#[derive(Debug, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, level: Level, event: &FormattedEvent) {
        let fields = Value::Object(event.fields.clone());
        match level {
            Level::ERROR => tracing::error!(fields = %fields, "{}", event.message),
            Level::WARN => tracing::warn!(fields = %fields, "{}", event.message),
            Level::INFO => tracing::info!(fields = %fields, "{}", event.message),
            Level::DEBUG => tracing::debug!(fields = %fields, "{}", event.message),
            Level::TRACE => tracing::trace!(fields = %fields, "{}", event.message),
        }
    }
}

/// Sink that remembers the last event it saw. Intended for tests.
#[derive(Default)]
pub struct RecordingSink {
    last: Mutex<Option<(Level, FormattedEvent)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recent (level, event) pair, if anything was logged.
    pub fn last(&self) -> Option<(Level, FormattedEvent)> {
        self.last.lock().expect("recording sink poisoned").clone()
    }
}

impl LogSink for RecordingSink {
    fn log(&self, level: Level, event: &FormattedEvent) {
        *self.last.lock().expect("recording sink poisoned") = Some((level, event.clone()));
    }
}

/// The sink/formatter pair owned by the engine.
#[derive(Clone)]
pub(crate) struct CounterLog {
    sink: Arc<dyn LogSink>,
    formatter: Option<LogFormatter>,
}

impl CounterLog {
    pub(crate) fn new(sink: Arc<dyn LogSink>, formatter: Option<LogFormatter>) -> Self {
        Self { sink, formatter }
    }

    pub(crate) fn emit(&self, key: &str, value: i64, payload: &LogPayload, options: &LogOptions) {
        let level = options.level.unwrap_or(if payload.is_failure() {
            Level::ERROR
        } else {
            Level::INFO
        });

        let event = match &self.formatter {
            Some(format) => format(key, value, payload, options),
            None => FormattedEvent {
                message: payload.text().to_string(),
                fields: options.fields.clone(),
            },
        };

        self.sink.log(level, &event);
    }
}
