//! Inherited cancellation and deadline signal
//!
//! A [`BaseContext`] is an immutable node in a parent chain. Children are
//! cancelled with their parent, inherit the parent's deadline unless they
//! set an earlier one, and see every value stored further up the chain.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Why a context is done
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("context canceled")]
    Canceled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

#[derive(Debug)]
struct Node {
    parent: Option<BaseContext>,
    token: CancellationToken,
    deadline: Option<Instant>,
    cause: Mutex<Option<String>>,
    value: Option<(String, Value)>,
}

/// Cancellation signal, deadline and values inherited by a unit of work
#[derive(Debug, Clone)]
pub struct BaseContext {
    node: Arc<Node>,
}

/// Cancels the context it was returned with, and all of its children
#[derive(Debug, Clone)]
pub struct CancelHandle {
    node: Arc<Node>,
}

impl BaseContext {
    /// Root context: never cancelled, no deadline, no values
    pub fn background() -> Self {
        Self {
            node: Arc::new(Node {
                parent: None,
                token: CancellationToken::new(),
                deadline: None,
                cause: Mutex::new(None),
                value: None,
            }),
        }
    }

    fn child(
        &self,
        token: CancellationToken,
        deadline: Option<Instant>,
        value: Option<(String, Value)>,
    ) -> Self {
        Self {
            node: Arc::new(Node {
                parent: Some(self.clone()),
                token,
                deadline,
                cause: Mutex::new(None),
                value,
            }),
        }
    }

    pub fn with_cancel(&self) -> (Self, CancelHandle) {
        let ctx = self.child(self.node.token.child_token(), self.deadline(), None);
        let handle = CancelHandle {
            node: Arc::clone(&ctx.node),
        };
        (ctx, handle)
    }

    /// The effective deadline is the earlier of `deadline` and the parent's
    pub fn with_deadline(&self, deadline: Instant) -> (Self, CancelHandle) {
        let deadline = match self.deadline() {
            Some(parent) if parent < deadline => parent,
            _ => deadline,
        };

        let ctx = self.child(self.node.token.child_token(), Some(deadline), None);
        let handle = CancelHandle {
            node: Arc::clone(&ctx.node),
        };
        (ctx, handle)
    }

    pub fn with_timeout(&self, timeout: Duration) -> (Self, CancelHandle) {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_value(&self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.child(
            self.node.token.clone(),
            self.deadline(),
            Some((key.into(), value.into())),
        )
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.node.deadline
    }

    /// Resolves once the context is cancelled or its deadline passes
    pub async fn done(&self) {
        match self.node.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.node.token.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline.into()) => {}
                }
            }
            None => self.node.token.cancelled().await,
        }
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// `None` while the context is live
    pub fn err(&self) -> Option<ContextError> {
        if self.node.token.is_cancelled() {
            return Some(ContextError::Canceled);
        }

        match self.node.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    /// The cause given to [`CancelHandle::cancel_with_cause`] on this context
    /// or the nearest ancestor, otherwise the text of [`Self::err`].
    pub fn cause(&self) -> Option<String> {
        let err = self.err()?;

        let mut current = Some(self);
        while let Some(ctx) = current {
            if let Some(cause) = ctx.node.cause.lock().clone() {
                return Some(cause);
            }
            current = ctx.node.parent.as_ref();
        }

        Some(err.to_string())
    }

    /// Nearest value stored under `key`, walking up the parent chain
    pub fn value(&self, key: &str) -> Option<Value> {
        let mut current = Some(self);
        while let Some(ctx) = current {
            if let Some((name, value)) = &ctx.node.value {
                if name == key {
                    return Some(value.clone());
                }
            }
            current = ctx.node.parent.as_ref();
        }
        None
    }
}

impl Default for BaseContext {
    fn default() -> Self {
        Self::background()
    }
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.cancel_with_cause(ContextError::Canceled.to_string());
    }

    /// Only the first cancellation records its cause. The cause is written
    /// and the token cancelled while holding the cause lock.
    pub fn cancel_with_cause(&self, cause: impl Into<String>) {
        let mut slot = self.node.cause.lock();
        if slot.is_some() || self.node.token.is_cancelled() {
            return;
        }
        *slot = Some(cause.into());
        self.node.token.cancel();
    }
}
