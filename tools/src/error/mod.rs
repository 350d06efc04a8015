//! Tagged application errors
//!
//! A [`TaggedError`] carries a message, its causes, a [`StatusKind`] and
//! free-form tags. Enrichment always returns a new value, so an error can be
//! shared across threads without locking. Transports see only the kind and
//! the message; causes and tags go to structured logs.

pub mod status;

pub use status::{JsonError, StatusKind};

use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::Value;
use tonic::{Code, Status};

use crate::ctx::ScopedContext;
use crate::observability::{default_logger, LogLevel, Logger};

/// Cause type shared between errors and contexts
pub type SharedError = Arc<dyn StdError + Send + Sync + 'static>;

#[derive(Clone)]
pub struct TaggedError {
    message: String,
    causes: Vec<SharedError>,
    code: StatusKind,
    tags: BTreeMap<String, Value>,
    logger: Option<Logger>,
}

impl TaggedError {
    pub fn new(message: impl Into<String>, code: StatusKind) -> Self {
        Self::from_parts(message, code, Vec::new())
    }

    pub fn from_parts(message: impl Into<String>, code: StatusKind, causes: Vec<SharedError>) -> Self {
        Self {
            message: message.into(),
            causes,
            code,
            tags: BTreeMap::new(),
            logger: None,
        }
    }

    /// Identity for a `TaggedError`; anything else becomes the sole cause of
    /// an `Internal` error with an empty message.
    pub fn wrap<E>(err: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        let boxed: Box<dyn StdError + Send + Sync + 'static> = err.into();
        let boxed = match boxed.downcast::<TaggedError>() {
            Ok(tagged) => return *tagged,
            Err(other) => other,
        };
        match boxed.downcast::<SharedError>() {
            Ok(shared) => Self::from_shared(*shared),
            Err(other) => Self::from_parts(String::new(), StatusKind::Internal, vec![Arc::from(other)]),
        }
    }

    /// Same as [`Self::wrap`] for errors read back from a [`ScopedContext`]
    pub fn from_shared(err: SharedError) -> Self {
        match err.downcast_ref::<TaggedError>() {
            Some(tagged) => tagged.clone(),
            None => Self::from_parts(String::new(), StatusKind::Internal, vec![err]),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn code(&self) -> StatusKind {
        self.code
    }

    pub fn causes(&self) -> &[SharedError] {
        &self.causes
    }

    /// Joined cause text, `None` without causes
    pub fn error(&self) -> Option<String> {
        if self.causes.is_empty() {
            None
        } else {
            Some(self.joined_causes())
        }
    }

    pub fn tag(&self, key: &str) -> Option<&Value> {
        self.tags.get(key)
    }

    pub fn tags(&self) -> &BTreeMap<String, Value> {
        &self.tags
    }

    pub fn logger(&self) -> Logger {
        self.logger.clone().unwrap_or_else(default_logger)
    }

    pub fn with_message(&self, message: impl Into<String>) -> Self {
        let mut err = self.clone();
        err.message = message.into();
        err
    }

    pub fn with_err<E>(&self, cause: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        let mut err = self.clone();
        err.causes.push(Arc::new(cause));
        err
    }

    pub fn with_tag(&self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut err = self.clone();
        err.tags.insert(key.into(), value.into());
        err
    }

    pub fn with_code(&self, code: StatusKind) -> Self {
        let mut err = self.clone();
        err.code = code;
        err
    }

    pub fn with_logger(&self, logger: Logger) -> Self {
        let mut err = self.clone();
        err.logger = Some(logger);
        err
    }

    /// Bind the error to a request context.
    ///
    /// The context's cancellation error becomes an extra cause, shared
    /// entries become tags, the logger is rebound to the context's unbound
    /// logger and the new error is queued on the context.
    pub fn with_ctx(&self, ctx: &ScopedContext) -> Self {
        let mut err = self.clone();

        if let Some(cancelled) = ctx.err() {
            err.causes.push(Arc::new(cancelled));
        }

        err.tags.extend(ctx.shared_values());
        err.logger = Some(ctx.base_logger());

        ctx.push_err(Arc::new(err.clone()));

        err
    }

    pub fn to_json(&self) -> JsonError {
        JsonError {
            error: self.message.clone(),
        }
    }

    pub fn to_http_code(&self) -> u16 {
        self.code.to_http_code()
    }

    pub fn to_grpc_code(&self) -> Code {
        self.code.to_grpc_code()
    }

    /// Causes and tags stay off the wire
    pub fn to_grpc_err(&self) -> Status {
        Status::new(self.to_grpc_code(), self.message.clone())
    }

    pub fn from_grpc_err(status: &Status) -> Self {
        Self::new(status.message(), StatusKind::from_grpc_code(status.code()))
    }

    /// The `error` attribute attached to every logged record
    pub fn sl_err(&self) -> (&'static str, String) {
        ("error", self.to_string())
    }

    /// Emit one error record: `error` plus every tag, message joined by spaces
    #[track_caller]
    pub fn log(&self, parts: &[&str]) {
        let (key, rendered) = self.sl_err();

        let mut fields = Vec::with_capacity(self.tags.len() + 1);
        fields.push((key.to_string(), Value::String(rendered)));
        fields.extend(self.tags.iter().map(|(k, v)| (k.clone(), v.clone())));

        self.logger().log(LogLevel::Error, &parts.join(" "), fields);
    }

    fn joined_causes(&self) -> String {
        self.causes
            .iter()
            .map(|cause| cause.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// `None` stays `None`; see [`TaggedError::wrap`]
pub fn e<E>(err: Option<E>) -> Option<TaggedError>
where
    E: Into<Box<dyn StdError + Send + Sync + 'static>>,
{
    err.map(TaggedError::wrap)
}

impl fmt::Display for TaggedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.message.is_empty(), self.causes.is_empty()) {
            (true, true) => f.write_str("nil"),
            (false, true) => f.write_str(&self.message),
            (true, false) => f.write_str(&self.joined_causes()),
            (false, false) => write!(f, "{}: {}", self.message, self.joined_causes()),
        }
    }
}

impl fmt::Debug for TaggedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let causes: Vec<String> = self.causes.iter().map(|c| c.to_string()).collect();
        f.debug_struct("TaggedError")
            .field("message", &self.message)
            .field("code", &self.code)
            .field("causes", &causes)
            .field("tags", &self.tags)
            .finish()
    }
}

impl StdError for TaggedError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.causes
            .first()
            .map(|cause| cause.as_ref() as &(dyn StdError + 'static))
    }
}

/// Equality ignores the bound logger and compares causes by text
impl PartialEq for TaggedError {
    fn eq(&self, other: &Self) -> bool {
        self.message == other.message
            && self.code == other.code
            && self.tags == other.tags
            && self.causes.len() == other.causes.len()
            && self
                .causes
                .iter()
                .zip(&other.causes)
                .all(|(a, b)| a.to_string() == b.to_string())
    }
}

impl From<TaggedError> for Status {
    fn from(err: TaggedError) -> Self {
        err.to_grpc_err()
    }
}

impl From<Status> for TaggedError {
    fn from(status: Status) -> Self {
        TaggedError::from_grpc_err(&status)
    }
}

impl IntoResponse for TaggedError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.to_http_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.to_json())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ctx::BaseContext;
    use crate::observability::MemorySink;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::io;

    fn cause(text: &str) -> io::Error {
        io::Error::other(text.to_string())
    }

    #[test]
    fn test_new() {
        let err = TaggedError::new("An error occurred", StatusKind::NotFound).with_err(cause("some error"));

        assert_eq!(err.message(), "An error occurred");
        assert_eq!(err.code(), StatusKind::NotFound);
        assert_eq!(err.error().as_deref(), Some("some error"));
        assert!(err.tags().is_empty());
    }

    #[test]
    fn test_error_rendering() {
        let cases = [
            ("some message", vec!["some error"], "some message: some error"),
            ("some message", vec![], "some message"),
            ("", vec!["some error"], "some error"),
            ("", vec![], "nil"),
            ("", vec!["a", "b"], "a\nb"),
            ("m", vec!["a", "b"], "m: a\nb"),
        ];

        for (message, causes, expected) in cases {
            let causes: Vec<SharedError> = causes
                .into_iter()
                .map(|c| Arc::new(cause(c)) as SharedError)
                .collect();
            let err = TaggedError::from_parts(message, StatusKind::Internal, causes);
            assert_eq!(err.to_string(), expected);
        }
    }

    #[test]
    fn test_source_is_first_cause() {
        let err = TaggedError::new("outer", StatusKind::Internal)
            .with_err(cause("first"))
            .with_err(cause("second"));
        assert_eq!(err.source().unwrap().to_string(), "first");
        assert!(TaggedError::new("bare", StatusKind::Internal).source().is_none());
    }

    #[test]
    fn test_enrichment_leaves_receiver_untouched() {
        let original = TaggedError::new("Initial error", StatusKind::Forbidden)
            .with_err(cause("some error"))
            .with_tag("k", "v");
        let snapshot = original.clone();

        let renamed = original.with_message("Updated error");
        let extended = original.with_err(cause("another"));
        let tagged = original.with_tag("k", "other").with_tag("n", 1);
        let recoded = original.with_code(StatusKind::Internal);

        assert_eq!(original, snapshot);
        assert_eq!(renamed.message(), "Updated error");
        assert_eq!(renamed.code(), StatusKind::Forbidden);
        assert_eq!(renamed.causes().len(), 1);
        assert_eq!(extended.causes().len(), 2);
        assert_eq!(tagged.tag("k"), Some(&json!("other")));
        assert_eq!(tagged.tag("n"), Some(&json!(1)));
        assert_eq!(original.tag("n"), None);
        assert_eq!(recoded.code(), StatusKind::Internal);
    }

    #[test]
    fn test_to_json() {
        let cases = [
            (TaggedError::new("some error", StatusKind::Internal), "some error"),
            (
                TaggedError::new("some error", StatusKind::Internal).with_err(cause("invalid data")),
                "some error",
            ),
            (TaggedError::new("", StatusKind::Internal), ""),
        ];

        for (err, expected) in cases {
            assert_eq!(
                err.to_json(),
                JsonError {
                    error: expected.to_string()
                }
            );
        }
    }

    #[test]
    fn test_to_grpc_err() {
        let err = TaggedError::new("This is a gRPC error message", StatusKind::Internal)
            .with_err(cause("some grpc error"))
            .with_tag("hidden", true);

        let status = err.to_grpc_err();
        assert_eq!(status.code(), Code::Internal);
        assert_eq!(status.message(), "This is a gRPC error message");
    }

    #[test]
    fn test_grpc_round_trip() {
        let kinds = [
            StatusKind::Internal,
            StatusKind::NotFound,
            StatusKind::BadInput,
            StatusKind::Conflict,
            StatusKind::Unauthorized,
        ];
        for kind in kinds {
            let err = TaggedError::new("msg", kind).with_err(cause("dropped"));
            let back = TaggedError::from_grpc_err(&err.to_grpc_err());
            assert_eq!(back.code(), kind);
            assert_eq!(back.message(), "msg");
            assert!(back.causes().is_empty());
        }

        let forbidden: Status = TaggedError::new("no", StatusKind::Forbidden).into();
        assert_eq!(TaggedError::from(forbidden).code(), StatusKind::Internal);
    }

    #[test]
    fn test_from_unknown_grpc_status() {
        let err = TaggedError::from_grpc_err(&Status::unavailable("try later"));
        assert_eq!(err.code(), StatusKind::Internal);
        assert_eq!(err.message(), "try later");
    }

    #[test]
    fn test_sl_err() {
        let err = TaggedError::new("test error for slog", StatusKind::Internal).with_err(cause("some error"));
        assert_eq!(
            err.sl_err(),
            ("error", "test error for slog: some error".to_string())
        );
    }

    #[test]
    fn test_log() {
        let sink = MemorySink::new();
        let err = TaggedError::new("error", StatusKind::Internal)
            .with_tag("user_id", 42)
            .with_logger(Logger::new(sink.clone()));

        err.log(&[]);
        let line = line!() + 1;
        err.log(&["while", "loading"]);

        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert!(records[1].location.file().ends_with("mod.rs"));
        assert_eq!(records[1].location.line(), line);
        assert_eq!(records[0].level, LogLevel::Error);
        assert_eq!(records[0].message, "");
        assert_eq!(records[0].field("error"), Some(&json!("error")));
        assert_eq!(records[0].field("user_id"), Some(&json!(42)));
        assert_eq!(records[1].message, "while loading");
    }

    #[test]
    fn test_with_ctx() {
        let sink = MemorySink::new();
        let ctx = ScopedContext::new(Logger::new(sink.clone()));
        ctx.add_value("key", "value", true);
        ctx.add_value("private", "x", false);

        let original = TaggedError::new("error", StatusKind::Internal).with_tag("existing", 1);
        let bound = original.with_ctx(&ctx);

        assert_eq!(bound.tag("key"), Some(&json!("value")));
        assert_eq!(bound.tag("existing"), Some(&json!(1)));
        assert_eq!(bound.tag("private"), None);
        assert_eq!(original.tag("key"), None);

        assert!(ctx.has_err());
        let queued = ctx.get_err().unwrap();
        assert_eq!(queued.downcast_ref::<TaggedError>(), Some(&bound));
        assert!(!ctx.has_err());

        bound.log(&["failed"]);
        let record = &sink.records()[0];
        assert_eq!(record.field("key"), Some(&json!("value")));
        assert_eq!(record.fields.len(), 3);
    }

    #[test]
    fn test_with_ctx_records_cancellation() {
        let (base, cancel) = BaseContext::background().with_cancel();
        let ctx = ScopedContext::with_base(base, Logger::discard());
        cancel.cancel();

        let bound = TaggedError::new("aborted", StatusKind::Internal).with_ctx(&ctx);
        assert_eq!(bound.to_string(), "aborted: context canceled");
    }

    #[test]
    fn test_wrap() {
        assert!(e(None::<io::Error>).is_none());

        let wrapped = e(Some(cause("some error"))).unwrap();
        assert_eq!(
            wrapped,
            TaggedError::from_parts("", StatusKind::Internal, vec![Arc::new(cause("some error")) as SharedError])
        );
        assert_eq!(wrapped.to_string(), "some error");

        let tagged = TaggedError::new("typed", StatusKind::Conflict).with_tag("id", 7);
        assert_eq!(TaggedError::wrap(tagged.clone()), tagged);
        assert_eq!(TaggedError::wrap("plain text").to_string(), "plain text");
    }

    #[test]
    fn test_wrap_keeps_error_drained_from_ctx() {
        let ctx = ScopedContext::new(Logger::discard());
        let bound = TaggedError::new("user missing", StatusKind::NotFound)
            .with_tag("user_id", 42)
            .with_ctx(&ctx);

        let drained = e(ctx.get_err()).unwrap();
        assert_eq!(drained, bound);
        assert_eq!(drained.code(), StatusKind::NotFound);
        assert_eq!(drained.to_http_code(), 404);

        ctx.add_err(cause("plain"));
        let plain = TaggedError::from_shared(ctx.get_err().unwrap());
        assert_eq!(plain.code(), StatusKind::Internal);
        assert_eq!(plain.to_string(), "plain");
    }

    #[test]
    fn test_into_response() {
        let response = TaggedError::new("user missing", StatusKind::NotFound).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = TaggedError::new("nope", StatusKind::Forbidden).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_user_missing_scenario() {
        let sql_err = cause("no rows in result set");
        let err = TaggedError::new("user missing", StatusKind::NotFound)
            .with_err(sql_err)
            .with_tag("user_id", 42);

        assert_eq!(err.to_http_code(), 404);
        assert_eq!(
            serde_json::to_string(&err.to_json()).unwrap(),
            r#"{"error":"user missing"}"#
        );
        assert_eq!(err.to_string(), "user missing: no rows in result set");
    }
}
