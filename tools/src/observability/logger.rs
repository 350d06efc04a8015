//! Logger handle carrying bound structured fields
//!
//! A [`Logger`] is a cheap, clonable handle: a shared sink plus the fields
//! bound to it. Deriving a logger with [`Logger::with`] never touches the
//! handle it was derived from.

use std::fmt;
use std::io::Write;
use std::panic::Location;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use tracing::Dispatch;

use super::logging::LogLevel;

/// A single emitted log line
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub level: LogLevel,
    pub message: String,
    pub fields: Vec<(String, Value)>,
    /// Call site of the `Logger` method that produced the record
    pub location: &'static Location<'static>,
}

impl LogRecord {
    /// Look up a field by key
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value)
    }
}

/// Destination for log records
pub trait LogSink: Send + Sync + fmt::Debug {
    fn emit(&self, record: LogRecord);
}

/// Forwards records to `tracing`.
///
/// Without a dispatcher the records go to whatever subscriber is current
/// for the calling thread; with one they go to that subscriber only.
#[derive(Clone, Default)]
pub struct TracingSink {
    dispatch: Option<Dispatch>,
}

impl TracingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dispatch(dispatch: Dispatch) -> Self {
        Self {
            dispatch: Some(dispatch),
        }
    }
}

impl fmt::Debug for TracingSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TracingSink")
            .field("scoped", &self.dispatch.is_some())
            .finish()
    }
}

impl LogSink for TracingSink {
    fn emit(&self, record: LogRecord) {
        match &self.dispatch {
            Some(dispatch) => tracing::dispatcher::with_default(dispatch, || emit_event(&record)),
            None => emit_event(&record),
        }
    }
}

fn emit_event(record: &LogRecord) {
    let fields = FieldList(&record.fields);
    let caller = record.location;
    let message = record.message.as_str();

    match record.level {
        LogLevel::Debug => tracing::debug!(target: "tools", caller = %caller, "{} {}", message, fields),
        LogLevel::Info => tracing::info!(target: "tools", caller = %caller, "{} {}", message, fields),
        LogLevel::Warn => tracing::warn!(target: "tools", caller = %caller, "{} {}", message, fields),
        LogLevel::Error => tracing::error!(target: "tools", caller = %caller, "{} {}", message, fields),
    }
}

/// Writes each record as one line, JSON or `key=value` text.
///
/// JSON lines use the layout of the `tracing-subscriber` JSON formatter
/// (`timestamp`, `level`, `fields`, `target`, `filename`, `line_number`), with
/// every bound field kept as its own typed entry under `fields`. The source
/// location is the caller of the [`Logger`] method.
pub struct FormatSink {
    out: Mutex<Box<dyn Write + Send>>,
    json: bool,
    add_source: bool,
    min_level: LogLevel,
}

impl FormatSink {
    pub fn new(out: Box<dyn Write + Send>, json: bool, add_source: bool, min_level: LogLevel) -> Self {
        Self {
            out: Mutex::new(out),
            json,
            add_source,
            min_level,
        }
    }

    fn render(&self, record: &LogRecord) -> String {
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
        let level = record.level.as_str().to_ascii_uppercase();

        if !self.json {
            let mut line = format!("{} {:>5} tools: {}", timestamp, level, record.message);
            if !record.fields.is_empty() {
                line.push(' ');
                line.push_str(&FieldList(&record.fields).to_string());
            }
            if self.add_source {
                line.push_str(&format!(" source={}", record.location));
            }
            return line;
        }

        let mut fields = Map::new();
        for (key, value) in &record.fields {
            fields.insert(key.clone(), value.clone());
        }
        fields.insert("message".to_string(), Value::String(record.message.clone()));

        let mut line = Map::new();
        line.insert("timestamp".to_string(), Value::String(timestamp));
        line.insert("level".to_string(), Value::String(level));
        line.insert("fields".to_string(), Value::Object(fields));
        line.insert("target".to_string(), Value::String("tools".to_string()));
        if self.add_source {
            line.insert("filename".to_string(), Value::String(record.location.file().to_string()));
            line.insert("line_number".to_string(), Value::from(record.location.line()));
        }

        Value::Object(line).to_string()
    }
}

impl fmt::Debug for FormatSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormatSink")
            .field("json", &self.json)
            .field("add_source", &self.add_source)
            .field("min_level", &self.min_level)
            .finish()
    }
}

impl LogSink for FormatSink {
    fn emit(&self, record: LogRecord) {
        if record.level < self.min_level {
            return;
        }

        let mut line = self.render(&record);
        line.push('\n');

        let mut out = self.out.lock();
        // A failed write has nowhere to be reported
        let _ = out.write_all(line.as_bytes());
        let _ = out.flush();
    }
}

/// Renders fields as space separated `key=value` pairs
struct FieldList<'a>(&'a [(String, Value)]);

impl fmt::Display for FieldList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            match value {
                Value::String(s) => write!(f, "{}={}", key, s)?,
                other => write!(f, "{}={}", key, other)?,
            }
        }
        Ok(())
    }
}

/// Keeps every record in memory
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<LogRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything emitted so far
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }

    /// Remove and return everything emitted so far
    pub fn take(&self) -> Vec<LogRecord> {
        std::mem::take(&mut *self.records.lock())
    }
}

impl LogSink for MemorySink {
    fn emit(&self, record: LogRecord) {
        self.records.lock().push(record);
    }
}

/// Drops every record
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardSink;

impl LogSink for DiscardSink {
    fn emit(&self, _record: LogRecord) {}
}

/// Structured logger handle
#[derive(Clone)]
pub struct Logger {
    sink: Arc<dyn LogSink>,
    fields: Arc<Vec<(String, Value)>>,
}

impl Logger {
    pub fn new(sink: impl LogSink + 'static) -> Self {
        Self::from_sink(Arc::new(sink))
    }

    pub fn from_sink(sink: Arc<dyn LogSink>) -> Self {
        Self {
            sink,
            fields: Arc::new(Vec::new()),
        }
    }

    /// Logger writing through the current `tracing` dispatcher
    pub fn tracing() -> Self {
        Self::new(TracingSink::new())
    }

    pub fn discard() -> Self {
        Self::new(DiscardSink)
    }

    /// Derive a logger with one more bound field
    pub fn with(&self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut fields = Vec::clone(&self.fields);
        fields.push((key.into(), value.into()));

        Self {
            sink: Arc::clone(&self.sink),
            fields: Arc::new(fields),
        }
    }

    pub fn fields(&self) -> &[(String, Value)] {
        &self.fields
    }

    /// True when both handles write to the same sink
    pub fn same_sink(&self, other: &Logger) -> bool {
        Arc::ptr_eq(&self.sink, &other.sink)
    }

    /// Emit one record with the bound fields followed by `extra`.
    /// A key bound more than once keeps its position and takes the last value.
    #[track_caller]
    pub fn log(&self, level: LogLevel, message: &str, extra: Vec<(String, Value)>) {
        let mut fields: Vec<(String, Value)> = Vec::with_capacity(self.fields.len() + extra.len());

        for (key, value) in self.fields.iter().cloned().chain(extra) {
            match fields.iter_mut().find(|(name, _)| *name == key) {
                Some(slot) => slot.1 = value,
                None => fields.push((key, value)),
            }
        }

        self.sink.emit(LogRecord {
            level,
            message: message.to_string(),
            fields,
            location: Location::caller(),
        });
    }

    #[track_caller]
    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message, Vec::new());
    }

    #[track_caller]
    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message, Vec::new());
    }

    #[track_caller]
    pub fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message, Vec::new());
    }

    #[track_caller]
    pub fn error(&self, message: &str) {
        self.log(LogLevel::Error, message, Vec::new());
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("sink", &self.sink)
            .field("fields", &self.fields)
            .finish()
    }
}

static DEFAULT_LOGGER: RwLock<Option<Logger>> = parking_lot::const_rwlock(None);

/// Process wide logger used by values that were never bound to one.
///
/// Falls back to a [`TracingSink`] logger until [`set_default_logger`] runs.
pub fn default_logger() -> Logger {
    DEFAULT_LOGGER.read().clone().unwrap_or_else(Logger::tracing)
}

/// Replace the process wide logger. Call this from the composition root only.
pub fn set_default_logger(logger: Logger) {
    *DEFAULT_LOGGER.write() = Some(logger);
}
