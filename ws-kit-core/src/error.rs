//! Structured router errors.
//!
//! Mirrors the shape of the teacher's `AppError` (plain enum + `Display` +
//! `From` impls) but carries a `retryable` flag and structured `details`
//! instead of converting to an HTTP response — there is no HTTP layer here.

use serde_json::Value;
use std::fmt;

/// Abstract error codes, surfaced verbatim to the lifecycle error sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Envelope
    ParseError,
    InvalidEnvelope,
    PayloadTooLarge,
    ReservedType,
    NoHandler,
    // Admission
    Backpressure,
    // Validation
    ValidationError,
    OutboundValidationError,
    ReplyValidationError,
    ProgressValidationError,
    // Transport
    SendError,
    ConnectionClosed,
    // Pub/Sub
    InvalidTopic,
    AclSubscribe,
    AclPublish,
    MaxSubscriptionsExceeded,
    Unsupported,
    State,
    AdapterError,
    SerializationError,
    Disconnected,
    // RPC
    RpcInflightLimit,
    RpcIdleTimeout,
    RpcCancelled,
    RpcDuplicateTerminal,
    /// Not named in the wire-level error table: a middleware called `next()`
    /// more than once. Routed to the error sink like any other dispatch error.
    MiddlewareDoubleNext,
}

impl ErrorCode {
    /// §7 propagation policy: only these three are ever retryable.
    pub fn retryable(self) -> bool {
        matches!(
            self,
            ErrorCode::Backpressure | ErrorCode::ConnectionClosed | ErrorCode::AdapterError
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::ParseError => "PARSE_ERROR",
            ErrorCode::InvalidEnvelope => "INVALID_ENVELOPE",
            ErrorCode::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            ErrorCode::ReservedType => "RESERVED_TYPE",
            ErrorCode::NoHandler => "NO_HANDLER",
            ErrorCode::Backpressure => "BACKPRESSURE",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::OutboundValidationError => "OUTBOUND_VALIDATION_ERROR",
            ErrorCode::ReplyValidationError => "REPLY_VALIDATION_ERROR",
            ErrorCode::ProgressValidationError => "PROGRESS_VALIDATION_ERROR",
            ErrorCode::SendError => "SEND_ERROR",
            ErrorCode::ConnectionClosed => "CONNECTION_CLOSED",
            ErrorCode::InvalidTopic => "INVALID_TOPIC",
            ErrorCode::AclSubscribe => "ACL_SUBSCRIBE",
            ErrorCode::AclPublish => "ACL_PUBLISH",
            ErrorCode::MaxSubscriptionsExceeded => "MAX_SUBSCRIPTIONS_EXCEEDED",
            ErrorCode::Unsupported => "UNSUPPORTED",
            ErrorCode::State => "STATE",
            ErrorCode::AdapterError => "ADAPTER_ERROR",
            ErrorCode::SerializationError => "SERIALIZATION_ERROR",
            ErrorCode::Disconnected => "DISCONNECTED",
            ErrorCode::RpcInflightLimit => "RPC_INFLIGHT_LIMIT",
            ErrorCode::RpcIdleTimeout => "RPC_IDLE_TIMEOUT",
            ErrorCode::RpcCancelled => "RPC_CANCELLED",
            ErrorCode::RpcDuplicateTerminal => "RPC_DUPLICATE_TERMINAL",
            ErrorCode::MiddlewareDoubleNext => "MIDDLEWARE_DOUBLE_NEXT",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured error routed to the lifecycle error sink.
///
/// `retryable` is derived once from `code` at construction, not recomputed
/// ad hoc at each call site.
#[derive(Debug, Clone)]
pub struct RouterError {
    pub code: ErrorCode,
    pub message: String,
    pub details: Option<Value>,
    pub retryable: bool,
}

impl RouterError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            retryable: code.retryable(),
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl fmt::Display for RouterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for RouterError {}

/// Errors raised synchronously at configuration time (building the route
/// table before the first `open`). These are programmer errors: duplicate
/// registrations under the "error" merge policy, or merging/mounting tables
/// that collide.
#[derive(Debug, Clone)]
pub struct RouteConflict {
    pub type_name: String,
}

impl fmt::Display for RouteConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "route conflict: type `{}` already registered", self.type_name)
    }
}

impl std::error::Error for RouteConflict {}
