//! Shared toolkit for backend services: request-scoped context, tagged
//! application errors and structured logging setup

// Re-export common dependencies
pub use anyhow;
pub use serde;
pub use serde_json;
pub use thiserror;
pub use tracing;

pub mod ctx;
pub mod error;
pub mod observability;
pub mod settings;

pub use ctx::{BaseContext, CancelHandle, ContextError, ContextValue, ScopedContext};
pub use error::{e, JsonError, SharedError, StatusKind, TaggedError};
pub use observability::{
    default_logger, init_logging, set_default_logger, FormatSink, LogConfig, LogLevel, Logger,
    ObservabilityError,
};
pub use settings::{SettingsError, ToolsConfig};
