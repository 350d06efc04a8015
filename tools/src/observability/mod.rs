//! Observability utilities: logging setup and the logger handle
//!
//! Provides centralized logging setup for all services

pub mod logger;
pub mod logging;

pub use logger::*;
pub use logging::*;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ObservabilityError {
    #[error("Logging setup error: {0}")]
    Logging(String),

    #[error("Log output error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ObservabilityResult<T> = Result<T, ObservabilityError>;
