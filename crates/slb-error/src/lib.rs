//! Unified error taxonomy with stable error codes for the command notary.
//!
//! Every notary error carries an [`ErrorCode`] (a machine-readable, stable
//! string tag), a human-readable message, an optional cause chain, and
//! arbitrary key-value context. Use the builder returned by [`NotaryError::new`]
//! to construct errors fluently.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorCategory
// ---------------------------------------------------------------------------

/// Broad family that an [`ErrorCode`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Durable store errors (missing rows, constraint violations).
    Store,
    /// Request status state-machine errors.
    StateMachine,
    /// Review signing/verification errors.
    Crypto,
    /// Execution-authorization ("verifier") errors.
    Verifier,
    /// JSON-RPC wire protocol errors.
    Protocol,
    /// Configuration errors.
    Config,
    /// Webhook/desktop notification errors (normally non-fatal).
    Notify,
    /// Daemon lifecycle errors (PID file, socket bind, fork/detach).
    Lifecycle,
    /// Input validation errors.
    Validation,
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Store => "store",
            Self::StateMachine => "state_machine",
            Self::Crypto => "crypto",
            Self::Verifier => "verifier",
            Self::Protocol => "protocol",
            Self::Config => "config",
            Self::Notify => "notify",
            Self::Lifecycle => "lifecycle",
            Self::Validation => "validation",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Machine-readable, stable error code.
///
/// Each variant serializes to a `SCREAMING_SNAKE_CASE` string that is
/// guaranteed not to change across patch releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // -- Store: not found --
    /// No session exists with the given id.
    SessionNotFound,
    /// No request exists with the given id.
    RequestNotFound,
    /// No review exists with the given id.
    ReviewNotFound,
    /// No execution outcome exists for the given request.
    OutcomeNotFound,
    /// No pattern-change row exists with the given id.
    PatternChangeNotFound,

    // -- Store: policy --
    /// The `(agent_name, project_path)` pair already has a live session.
    ActiveSessionExists,
    /// A review already exists for this `(request_id, reviewer_session_id)`.
    ReviewExists,

    // -- State machine --
    /// The requested status transition is not a legal edge, or the optimistic
    /// compare-and-swap lost a race.
    InvalidTransition,

    // -- Crypto / review --
    /// A session attempted to review its own request.
    SelfReview,
    /// The review signature did not verify against the reviewer's session key.
    InvalidSignature,

    // -- Verifier --
    /// Fewer approval reviews than `min_approvals` exist for the request.
    InsufficientApprovals,
    /// `approval_expires_at` is absent or in the past.
    ApprovalExpired,
    /// Execution was not authorized for a reason not covered by the above.
    ExecutionNotAllowed,

    // -- Protocol (JSON-RPC) --
    /// The line could not be parsed as JSON.
    ProtocolParseError,
    /// The envelope is missing required fields or is otherwise malformed.
    ProtocolInvalidRequest,
    /// The requested RPC method does not exist.
    ProtocolMethodNotFound,
    /// The method's parameters failed validation.
    ProtocolInvalidParams,

    // -- Config --
    /// The configuration file is invalid (bad TOML, bad values).
    ConfigInvalid,

    // -- Notify (best-effort) --
    /// A desktop notification or webhook delivery failed.
    NotifyDeliveryFailed,

    // -- Lifecycle --
    /// The PID file is missing, empty, or not a valid PID.
    PidFileInvalid,
    /// The daemon could not bind its Unix socket or TCP listener.
    BindFailed,
    /// A daemon is already running for this project.
    AlreadyRunning,

    // -- Validation --
    /// A required field was empty or otherwise malformed.
    InvalidField,
    /// A CIDR or IP-address string could not be parsed.
    InvalidCidr,

    // -- Internal --
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl ErrorCode {
    /// Returns the broad [`ErrorCategory`] this code belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::SessionNotFound
            | Self::RequestNotFound
            | Self::ReviewNotFound
            | Self::OutcomeNotFound
            | Self::PatternChangeNotFound
            | Self::ActiveSessionExists
            | Self::ReviewExists => ErrorCategory::Store,

            Self::InvalidTransition => ErrorCategory::StateMachine,

            Self::SelfReview | Self::InvalidSignature => ErrorCategory::Crypto,

            Self::InsufficientApprovals | Self::ApprovalExpired | Self::ExecutionNotAllowed => {
                ErrorCategory::Verifier
            }

            Self::ProtocolParseError
            | Self::ProtocolInvalidRequest
            | Self::ProtocolMethodNotFound
            | Self::ProtocolInvalidParams => ErrorCategory::Protocol,

            Self::ConfigInvalid => ErrorCategory::Config,

            Self::NotifyDeliveryFailed => ErrorCategory::Notify,

            Self::PidFileInvalid | Self::BindFailed | Self::AlreadyRunning => {
                ErrorCategory::Lifecycle
            }

            Self::InvalidField | Self::InvalidCidr => ErrorCategory::Validation,

            Self::Internal => ErrorCategory::Internal,
        }
    }

    /// Stable `&'static str` representation of the code (e.g.
    /// `"REQUEST_NOT_FOUND"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionNotFound => "SESSION_NOT_FOUND",
            Self::RequestNotFound => "REQUEST_NOT_FOUND",
            Self::ReviewNotFound => "REVIEW_NOT_FOUND",
            Self::OutcomeNotFound => "OUTCOME_NOT_FOUND",
            Self::PatternChangeNotFound => "PATTERN_CHANGE_NOT_FOUND",
            Self::ActiveSessionExists => "ACTIVE_SESSION_EXISTS",
            Self::ReviewExists => "REVIEW_EXISTS",
            Self::InvalidTransition => "INVALID_TRANSITION",
            Self::SelfReview => "SELF_REVIEW",
            Self::InvalidSignature => "INVALID_SIGNATURE",
            Self::InsufficientApprovals => "INSUFFICIENT_APPROVALS",
            Self::ApprovalExpired => "APPROVAL_EXPIRED",
            Self::ExecutionNotAllowed => "EXECUTION_NOT_ALLOWED",
            Self::ProtocolParseError => "PROTOCOL_PARSE_ERROR",
            Self::ProtocolInvalidRequest => "PROTOCOL_INVALID_REQUEST",
            Self::ProtocolMethodNotFound => "PROTOCOL_METHOD_NOT_FOUND",
            Self::ProtocolInvalidParams => "PROTOCOL_INVALID_PARAMS",
            Self::ConfigInvalid => "CONFIG_INVALID",
            Self::NotifyDeliveryFailed => "NOTIFY_DELIVERY_FAILED",
            Self::PidFileInvalid => "PID_FILE_INVALID",
            Self::BindFailed => "BIND_FAILED",
            Self::AlreadyRunning => "ALREADY_RUNNING",
            Self::InvalidField => "INVALID_FIELD",
            Self::InvalidCidr => "INVALID_CIDR",
            Self::Internal => "INTERNAL",
        }
    }

    /// Maps this code onto the standard JSON-RPC error-code space, for codes
    /// that originate on the wire. Store/domain errors are carried as
    /// `-32000` ("server error") with the stable code in `data`.
    pub fn rpc_code(&self) -> i32 {
        match self {
            Self::ProtocolParseError => -32700,
            Self::ProtocolInvalidRequest => -32600,
            Self::ProtocolMethodNotFound => -32601,
            Self::ProtocolInvalidParams => -32602,
            Self::Internal => -32603,
            _ => -32000,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// NotaryError
// ---------------------------------------------------------------------------

/// Unified notary error.
///
/// Carries a stable [`ErrorCode`], a human-readable message, an optional
/// underlying cause for chaining, and arbitrary structured context.
///
/// # Builder usage
///
/// ```
/// use slb_error::{NotaryError, ErrorCode};
///
/// let err = NotaryError::new(ErrorCode::RequestNotFound, "no such request")
///     .with_context("request_id", "c0ffee")
///     .with_context("project", "/home/agent/repo");
/// ```
pub struct NotaryError {
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Optional underlying cause.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// Arbitrary structured context for diagnostics.
    pub context: BTreeMap<String, serde_json::Value>,
}

impl NotaryError {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
            context: BTreeMap::new(),
        }
    }

    /// Attach a key-value pair to the diagnostic context.
    ///
    /// The value is converted via [`serde_json::to_value`]; if serialization
    /// fails, the entry is silently skipped.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Attach an underlying cause.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Shorthand for `self.code.category()`.
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }

    /// `true` if this error's category is one of the best-effort categories
    /// that must be logged but never propagated as fatal (per the notify
    /// component's design).
    pub fn is_best_effort(&self) -> bool {
        matches!(self.category(), ErrorCategory::Notify)
    }
}

impl fmt::Debug for NotaryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("NotaryError");
        d.field("code", &self.code);
        d.field("message", &self.message);
        if let Some(ref src) = self.source {
            d.field("source", &src.to_string());
        }
        if !self.context.is_empty() {
            d.field("context", &self.context);
        }
        d.finish()
    }
}

impl fmt::Display for NotaryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)?;
        if !self.context.is_empty() {
            // Deterministic output thanks to BTreeMap.
            if let Ok(ctx) = serde_json::to_string(&self.context) {
                write!(f, " {ctx}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for NotaryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

// ---------------------------------------------------------------------------
// Serialization support
// ---------------------------------------------------------------------------

/// Serializable snapshot of a [`NotaryError`] (without the opaque source),
/// suitable for embedding in a JSON-RPC error `data` field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotaryErrorDto {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Structured context.
    pub context: BTreeMap<String, serde_json::Value>,
    /// String representation of the source error, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_message: Option<String>,
}

impl From<&NotaryError> for NotaryErrorDto {
    fn from(err: &NotaryError) -> Self {
        Self {
            code: err.code,
            message: err.message.clone(),
            context: err.context.clone(),
            source_message: err.source.as_ref().map(|s| s.to_string()),
        }
    }
}

impl From<NotaryErrorDto> for NotaryError {
    fn from(dto: NotaryErrorDto) -> Self {
        Self {
            code: dto.code,
            message: dto.message,
            source: None,
            context: dto.context,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::io;

    const ALL_CODES: &[ErrorCode] = &[
        ErrorCode::SessionNotFound,
        ErrorCode::RequestNotFound,
        ErrorCode::ReviewNotFound,
        ErrorCode::OutcomeNotFound,
        ErrorCode::PatternChangeNotFound,
        ErrorCode::ActiveSessionExists,
        ErrorCode::ReviewExists,
        ErrorCode::InvalidTransition,
        ErrorCode::SelfReview,
        ErrorCode::InvalidSignature,
        ErrorCode::InsufficientApprovals,
        ErrorCode::ApprovalExpired,
        ErrorCode::ExecutionNotAllowed,
        ErrorCode::ProtocolParseError,
        ErrorCode::ProtocolInvalidRequest,
        ErrorCode::ProtocolMethodNotFound,
        ErrorCode::ProtocolInvalidParams,
        ErrorCode::ConfigInvalid,
        ErrorCode::NotifyDeliveryFailed,
        ErrorCode::PidFileInvalid,
        ErrorCode::BindFailed,
        ErrorCode::AlreadyRunning,
        ErrorCode::InvalidField,
        ErrorCode::InvalidCidr,
        ErrorCode::Internal,
    ];

    #[test]
    fn basic_construction() {
        let err = NotaryError::new(ErrorCode::Internal, "boom");
        assert_eq!(err.code, ErrorCode::Internal);
        assert_eq!(err.message, "boom");
        assert!(err.source.is_none());
        assert!(err.context.is_empty());
    }

    #[test]
    fn display_without_context() {
        let err = NotaryError::new(ErrorCode::RequestNotFound, "no such request");
        assert_eq!(err.to_string(), "[REQUEST_NOT_FOUND] no such request");
    }

    #[test]
    fn display_with_context() {
        let err = NotaryError::new(ErrorCode::ApprovalExpired, "expired")
            .with_context("request_id", "abc");
        let s = err.to_string();
        assert!(s.starts_with("[APPROVAL_EXPIRED] expired"));
        assert!(s.contains("request_id"));
    }

    #[test]
    fn builder_with_source() {
        let src = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        let err = NotaryError::new(ErrorCode::BindFailed, "bind failed").with_source(src);
        assert!(err.source.is_some());
        assert_eq!(std::error::Error::source(&err).unwrap().to_string(), "denied");
    }

    #[test]
    fn category_mapping() {
        assert_eq!(ErrorCode::RequestNotFound.category(), ErrorCategory::Store);
        assert_eq!(
            ErrorCode::InvalidTransition.category(),
            ErrorCategory::StateMachine
        );
        assert_eq!(ErrorCode::SelfReview.category(), ErrorCategory::Crypto);
        assert_eq!(
            ErrorCode::InsufficientApprovals.category(),
            ErrorCategory::Verifier
        );
        assert_eq!(
            ErrorCode::ProtocolParseError.category(),
            ErrorCategory::Protocol
        );
        assert_eq!(ErrorCode::ConfigInvalid.category(), ErrorCategory::Config);
        assert_eq!(
            ErrorCode::NotifyDeliveryFailed.category(),
            ErrorCategory::Notify
        );
        assert_eq!(ErrorCode::BindFailed.category(), ErrorCategory::Lifecycle);
        assert_eq!(ErrorCode::InvalidField.category(), ErrorCategory::Validation);
        assert_eq!(ErrorCode::Internal.category(), ErrorCategory::Internal);
    }

    #[test]
    fn rpc_code_mapping() {
        assert_eq!(ErrorCode::ProtocolParseError.rpc_code(), -32700);
        assert_eq!(ErrorCode::ProtocolInvalidRequest.rpc_code(), -32600);
        assert_eq!(ErrorCode::ProtocolMethodNotFound.rpc_code(), -32601);
        assert_eq!(ErrorCode::ProtocolInvalidParams.rpc_code(), -32602);
        assert_eq!(ErrorCode::Internal.rpc_code(), -32603);
        assert_eq!(ErrorCode::RequestNotFound.rpc_code(), -32000);
    }

    #[test]
    fn is_best_effort() {
        let notify_err = NotaryError::new(ErrorCode::NotifyDeliveryFailed, "webhook 500");
        assert!(notify_err.is_best_effort());
        let fatal_err = NotaryError::new(ErrorCode::BindFailed, "addr in use");
        assert!(!fatal_err.is_best_effort());
    }

    #[test]
    fn all_codes_have_unique_as_str() {
        let mut seen = HashSet::new();
        for code in ALL_CODES {
            assert!(seen.insert(code.as_str()), "duplicate as_str value: {code:?}");
        }
        assert_eq!(seen.len(), ALL_CODES.len());
    }

    #[test]
    fn error_code_serde_roundtrip() {
        let code = ErrorCode::InvalidSignature;
        let json = serde_json::to_string(&code).unwrap();
        assert_eq!(json, r#""INVALID_SIGNATURE""#);
        let back: ErrorCode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, code);
    }

    #[test]
    fn dto_roundtrip_without_source() {
        let err = NotaryError::new(ErrorCode::ReviewExists, "dup review")
            .with_context("reviewer_session_id", "s-1");
        let dto: NotaryErrorDto = (&err).into();
        let json = serde_json::to_string(&dto).unwrap();
        let back: NotaryErrorDto = serde_json::from_str(&json).unwrap();
        assert_eq!(dto, back);
        assert!(back.source_message.is_none());
    }

    #[test]
    fn dto_roundtrip_with_source() {
        let src = io::Error::new(io::ErrorKind::BrokenPipe, "pipe broke");
        let err = NotaryError::new(ErrorCode::Internal, "io failure").with_source(src);
        let dto: NotaryErrorDto = (&err).into();
        assert_eq!(dto.source_message.as_deref(), Some("pipe broke"));
    }

    #[test]
    fn error_code_count() {
        assert_eq!(ALL_CODES.len(), 25);
    }
}
