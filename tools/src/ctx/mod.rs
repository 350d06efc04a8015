//! Request-scoped context
//!
//! [`ScopedContext`] travels with one unit of work. It forwards the
//! inherited [`BaseContext`] signal untouched, carries a logger, a value bag
//! whose `shared` entries are bound onto that logger, and a queue of errors
//! that concurrent call paths can deposit for an outer layer to drain.

pub mod base;

pub use base::{BaseContext, CancelHandle, ContextError};

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use crate::error::SharedError;
use crate::observability::Logger;

/// An entry in the context value bag
#[derive(Debug, Clone, PartialEq)]
pub struct ContextValue {
    pub value: Value,
    /// Shared entries are also bound as fields on the context logger
    pub shared: bool,
}

#[derive(Debug)]
struct State {
    logger: Logger,
    entries: HashMap<String, ContextValue>,
}

#[derive(Debug)]
pub struct ScopedContext {
    base: BaseContext,
    base_logger: Logger,
    state: RwLock<State>,
    errors: Mutex<VecDeque<SharedError>>,
}

impl ScopedContext {
    /// Context over a background signal
    pub fn new(logger: Logger) -> Self {
        Self::with_base(BaseContext::background(), logger)
    }

    pub fn with_base(base: BaseContext, logger: Logger) -> Self {
        Self {
            base,
            base_logger: logger.clone(),
            state: RwLock::new(State {
                logger,
                entries: HashMap::new(),
            }),
            errors: Mutex::new(VecDeque::new()),
        }
    }

    /// Logger with every shared entry bound so far
    pub fn logger(&self) -> Logger {
        self.state.read().logger.clone()
    }

    /// The logger the context was created with, without shared entries
    pub fn base_logger(&self) -> Logger {
        self.base_logger.clone()
    }

    pub fn base(&self) -> &BaseContext {
        &self.base
    }

    /// Insert or overwrite an entry.
    ///
    /// A shared entry is bound onto the context logger in place; loggers
    /// already handed out by [`Self::logger`] are not affected.
    pub fn add_value(&self, key: impl Into<String>, value: impl Into<Value>, shared: bool) {
        let key = key.into();
        let value = value.into();

        let mut state = self.state.write();
        if shared {
            state.logger = state.logger.with(key.clone(), value.clone());
        }
        state.entries.insert(key, ContextValue { value, shared });
    }

    /// A stored `null` is still returned; only a missing key yields `None`
    pub fn get_value(&self, key: &str) -> Option<ContextValue> {
        self.state.read().entries.get(key).cloned()
    }

    /// Copy of every entry
    pub fn get_values(&self) -> HashMap<String, ContextValue> {
        self.state.read().entries.clone()
    }

    /// Copy of the entries flagged `shared`
    pub fn shared_values(&self) -> Vec<(String, Value)> {
        self.state
            .read()
            .entries
            .iter()
            .filter(|(_, entry)| entry.shared)
            .map(|(key, entry)| (key.clone(), entry.value.clone()))
            .collect()
    }

    pub fn add_err<E>(&self, err: E)
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.push_err(Arc::new(err));
    }

    pub fn push_err(&self, err: SharedError) {
        self.errors.lock().push_back(err);
    }

    /// Remove and return the oldest recorded error
    pub fn get_err(&self) -> Option<SharedError> {
        self.errors.lock().pop_front()
    }

    pub fn has_err(&self) -> bool {
        !self.errors.lock().is_empty()
    }

    pub fn error_count(&self) -> usize {
        self.errors.lock().len()
    }

    /// Remove and return every recorded error, oldest first
    pub fn drain_errors(&self) -> Vec<SharedError> {
        self.errors.lock().drain(..).collect()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.base.deadline()
    }

    pub async fn done(&self) {
        self.base.done().await
    }

    pub fn err(&self) -> Option<ContextError> {
        self.base.err()
    }

    pub fn cause(&self) -> Option<String> {
        self.base.cause()
    }

    pub fn value(&self, key: &str) -> Option<Value> {
        self.base.value(key)
    }
}
