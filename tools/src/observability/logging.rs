//! Structured logging setup for all services

use std::env;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::Dispatch;
use tracing_subscriber::{
    fmt, fmt::writer::BoxMakeWriter, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
    Layer, Registry,
};

use super::logger::{set_default_logger, FormatSink, Logger, TracingSink};
use super::{ObservabilityError, ObservabilityResult};

/// Log level configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    /// Unknown names fall back to `Info`
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "debug" => LogLevel::Debug,
            "warn" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

impl From<String> for LogLevel {
    fn from(name: String) -> Self {
        LogLevel::parse(&name)
    }
}

impl From<LogLevel> for String {
    fn from(level: LogLevel) -> Self {
        level.as_str().to_string()
    }
}

/// Which formatter backs the logger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LogType {
    /// JSON or plain text, picked by `LogConfig::is_json`
    Default,
    /// Human-readable multi-line output
    Pretty,
    /// Compact single-line output for local development
    Dev,
    /// Drop everything
    Discard,
}

impl LogType {
    pub fn as_str(&self) -> &str {
        match self {
            LogType::Default => "default",
            LogType::Pretty => "pretty",
            LogType::Dev => "dev",
            LogType::Discard => "discard",
        }
    }

    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "pretty" => LogType::Pretty,
            "dev" => LogType::Dev,
            "discard" => LogType::Discard,
            _ => LogType::Default,
        }
    }
}

impl From<String> for LogType {
    fn from(name: String) -> Self {
        LogType::parse(&name)
    }
}

impl From<LogType> for String {
    fn from(kind: LogType) -> Self {
        kind.as_str().to_string()
    }
}

/// Where formatted lines are written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LogWriter {
    Stderr,
    /// `<out_path>/all.log`
    File,
}

impl LogWriter {
    pub fn as_str(&self) -> &str {
        match self {
            LogWriter::Stderr => "stderr",
            LogWriter::File => "file",
        }
    }

    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "file" => LogWriter::File,
            _ => LogWriter::Stderr,
        }
    }
}

impl From<String> for LogWriter {
    fn from(name: String) -> Self {
        LogWriter::parse(&name)
    }
}

impl From<LogWriter> for String {
    fn from(writer: LogWriter) -> Self {
        writer.as_str().to_string()
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: LogLevel,
    pub add_source: bool,
    pub is_json: bool,
    pub writer: LogWriter,
    pub out_path: String,
    pub set_default: bool,
    #[serde(rename = "type")]
    pub kind: LogType,
    pub service_name: String,
    pub include_thread_ids: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            add_source: true,
            is_json: true,
            writer: LogWriter::Stderr,
            out_path: String::new(),
            set_default: true,
            kind: LogType::Default,
            service_name: "tools".to_string(),
            include_thread_ids: false,
        }
    }
}

impl LogConfig {
    /// Load logging configuration from `LOGGER_*` environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        Ok(Self {
            level: LogLevel::parse(&env::var("LOGGER_LEVEL").unwrap_or_else(|_| "info".to_string())),
            add_source: env::var("LOGGER_ADD_SOURCE")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .context("Invalid LOGGER_ADD_SOURCE")?,
            is_json: env::var("LOGGER_IS_JSON")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .context("Invalid LOGGER_IS_JSON")?,
            writer: LogWriter::parse(&env::var("LOGGER_WRITER").unwrap_or_else(|_| "stderr".to_string())),
            out_path: env::var("LOGGER_OUT_PATH").unwrap_or_default(),
            set_default: env::var("LOGGER_SET_DEFAULT")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .context("Invalid LOGGER_SET_DEFAULT")?,
            kind: LogType::parse(&env::var("LOGGER_TYPE").unwrap_or_else(|_| "default".to_string())),
            service_name: env::var("SERVICE_NAME").unwrap_or(defaults.service_name),
            include_thread_ids: defaults.include_thread_ids,
        })
    }
}

/// Initialize logging for the service.
///
/// With `set_default` the subscriber is installed globally and the returned
/// logger becomes the process default; otherwise only the returned logger
/// writes through the new configuration.
///
/// The `default` type writes logger records with a [`FormatSink`], so bound
/// fields stay typed JSON entries. `pretty` and `dev` go through `tracing`.
pub fn init_logging(config: LogConfig) -> ObservabilityResult<Logger> {
    if config.kind == LogType::Discard {
        let logger = Logger::discard();
        if config.set_default {
            set_default_logger(logger.clone());
        }
        return Ok(logger);
    }

    // Create filter from environment or config
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    let output = LogOutput::open(&config)?;
    let writer = output.make_writer();
    let add_source = config.add_source;

    let fmt_layer: Box<dyn Layer<Registry> + Send + Sync> = match config.kind {
        LogType::Pretty => fmt::layer()
            .pretty()
            .with_writer(writer)
            .with_target(true)
            .with_thread_ids(config.include_thread_ids)
            .with_file(add_source)
            .with_line_number(add_source)
            .boxed(),
        LogType::Dev => fmt::layer()
            .compact()
            .with_writer(writer)
            .with_target(true)
            .with_thread_ids(config.include_thread_ids)
            .with_file(add_source)
            .with_line_number(add_source)
            .boxed(),
        _ if config.is_json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_writer(writer)
            .with_target(true)
            .with_thread_ids(config.include_thread_ids)
            .with_file(add_source)
            .with_line_number(add_source)
            .boxed(),
        _ => fmt::layer()
            .with_ansi(false)
            .with_writer(writer)
            .with_target(true)
            .with_thread_ids(config.include_thread_ids)
            .with_file(add_source)
            .with_line_number(add_source)
            .boxed(),
    };

    let subscriber = tracing_subscriber::registry().with(fmt_layer.with_filter(env_filter));

    let logger = match config.kind {
        LogType::Default => {
            if config.set_default {
                subscriber
                    .try_init()
                    .map_err(|e| ObservabilityError::Logging(e.to_string()))?;
            }
            Logger::new(FormatSink::new(
                output.line_writer()?,
                config.is_json,
                add_source,
                config.level,
            ))
        }
        _ if config.set_default => {
            subscriber
                .try_init()
                .map_err(|e| ObservabilityError::Logging(e.to_string()))?;
            Logger::tracing()
        }
        _ => Logger::new(TracingSink::with_dispatch(Dispatch::new(subscriber))),
    };

    if config.set_default {
        set_default_logger(logger.clone());
    }

    logger.log(
        config.level,
        "Logging initialized",
        vec![
            ("service".to_string(), json!(config.service_name)),
            ("level".to_string(), json!(config.level.as_str())),
        ],
    );

    Ok(logger)
}

/// Quick setup with sensible defaults
pub fn init_default_logging(service_name: &str) -> ObservabilityResult<Logger> {
    init_logging(LogConfig {
        service_name: service_name.to_string(),
        kind: LogType::Pretty,
        ..Default::default()
    })
}

/// Initialize JSON logging for production
pub fn init_production_logging(service_name: &str) -> ObservabilityResult<Logger> {
    init_logging(LogConfig {
        service_name: service_name.to_string(),
        kind: LogType::Default,
        is_json: true,
        level: LogLevel::Info,
        add_source: false,
        include_thread_ids: true,
        ..Default::default()
    })
}

/// Destination shared by the `tracing` layer and the [`FormatSink`]
enum LogOutput {
    Stderr,
    File(Arc<File>),
}

impl LogOutput {
    fn open(config: &LogConfig) -> ObservabilityResult<Self> {
        match config.writer {
            LogWriter::Stderr => Ok(LogOutput::Stderr),
            LogWriter::File => Ok(LogOutput::File(Arc::new(open_log_file(&config.out_path)?))),
        }
    }

    fn make_writer(&self) -> BoxMakeWriter {
        match self {
            LogOutput::Stderr => BoxMakeWriter::new(std::io::stderr),
            LogOutput::File(file) => BoxMakeWriter::new(Arc::clone(file)),
        }
    }

    fn line_writer(&self) -> ObservabilityResult<Box<dyn Write + Send>> {
        match self {
            LogOutput::Stderr => Ok(Box::new(std::io::stderr())),
            LogOutput::File(file) => Ok(Box::new(file.try_clone()?)),
        }
    }
}

/// Recreate the log directory and open `all.log` inside it.
/// An empty path means `logs`.
pub fn open_log_file(out_path: &str) -> ObservabilityResult<File> {
    let dir = if out_path.is_empty() {
        Path::new("logs")
    } else {
        Path::new(out_path)
    };

    if dir.exists() {
        fs::remove_dir_all(dir)?;
    }
    fs::create_dir_all(dir)?;

    let file = File::options()
        .create(true)
        .read(true)
        .write(true)
        .truncate(true)
        .open(dir.join("all.log"))?;

    Ok(file)
}
