//! Structured error taxonomy for the execution core.
//!
//! Every error raised by the runner, state manager, or resilience stack is a
//! [`VenomError`] variant carrying an [`ErrorContext`] and a `recoverable`
//! flag the retry policy consults directly. The numbering scheme below
//! mirrors how error codes are grouped by category — connection/request
//! errors below 200, validation below 300, state below 400, journey below
//! 500, resilience below 600 — so a glance at the code tells you the family
//! without reading the message.

use std::fmt;
use std::time::Duration;

/// Numeric error code, grouped by category. See [`ErrorCategory`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorCode(pub u16);

impl ErrorCode {
    pub const CONNECTION_FAILED: Self = Self(101);
    pub const CONNECTION_TIMEOUT: Self = Self(102);
    pub const CONNECTION_REFUSED: Self = Self(103);
    pub const CONNECTION_RESET: Self = Self(104);

    pub const REQUEST_TIMEOUT: Self = Self(201);
    pub const REQUEST_FAILED: Self = Self(202);
    pub const STEP_TIMEOUT: Self = Self(203);
    pub const WAIT_TIMEOUT: Self = Self(204);

    pub const VALIDATION_CONFIG: Self = Self(301);
    pub const VALIDATION_JOURNEY: Self = Self(302);
    pub const VALIDATION_STEP: Self = Self(303);
    pub const VALIDATION_SCHEMA_MISMATCH: Self = Self(304);

    pub const STATE_NOT_CONNECTED: Self = Self(401);
    pub const STATE_CHECKPOINT: Self = Self(402);
    pub const STATE_ROLLBACK: Self = Self(403);
    pub const STATE_RESET: Self = Self(404);

    pub const JOURNEY_FAILED: Self = Self(501);
    pub const JOURNEY_TIMEOUT: Self = Self(502);
    pub const JOURNEY_ABORTED: Self = Self(503);
    pub const JOURNEY_BRANCH: Self = Self(504);
    pub const JOURNEY_PATH: Self = Self(505);

    pub const RESILIENCE_CIRCUIT_OPEN: Self = Self(601);
    pub const RESILIENCE_RETRY_EXHAUSTED: Self = Self(602);
    pub const RESILIENCE_RATE_LIMITED: Self = Self(603);

    pub const UNKNOWN: Self = Self(901);

    pub fn category(&self) -> ErrorCategory {
        match self.0 {
            100..=199 => ErrorCategory::Connection,
            200..=299 => ErrorCategory::Request,
            300..=399 => ErrorCategory::Validation,
            400..=499 => ErrorCategory::State,
            500..=599 => ErrorCategory::Journey,
            600..=699 => ErrorCategory::Resilience,
            _ => ErrorCategory::Unknown,
        }
    }

    pub fn formatted(&self) -> String {
        format!("E{:04}", self.0)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.formatted())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Connection,
    Request,
    Validation,
    State,
    Journey,
    Resilience,
    Unknown,
}

/// Structured context attached to every [`VenomError`]: which journey/path/step
/// was running, and what was captured on the wire when the error occurred.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    pub journey: Option<String>,
    pub path: Option<String>,
    pub step: Option<String>,
    pub request: Option<String>,
    pub response: Option<String>,
    pub timestamp: Option<chrono::DateTime<chrono::Utc>>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            timestamp: Some(chrono::Utc::now()),
            ..Default::default()
        }
    }

    pub fn with_journey(mut self, journey: impl Into<String>) -> Self {
        self.journey = Some(journey.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_step(mut self, step: impl Into<String>) -> Self {
        self.step = Some(step.into());
        self
    }

    pub fn with_request(mut self, request: impl Into<String>) -> Self {
        self.request = Some(request.into());
        self
    }

    pub fn with_response(mut self, response: impl Into<String>) -> Self {
        self.response = Some(response.into());
        self
    }
}

/// The execution core's single error type. Every variant knows its own
/// [`ErrorCode`] and `recoverable` flag so the retry policy's classifier
/// (§4.5) never has to special-case a variant it doesn't recognize.
#[derive(Debug, thiserror::Error)]
pub enum VenomError {
    #[error("connection failed: {message}")]
    ConnectionFailed {
        message: String,
        context: ErrorContext,
    },

    #[error("connection timed out after {elapsed:?}")]
    ConnectionTimeout {
        elapsed: Duration,
        context: ErrorContext,
    },

    #[error("connection refused")]
    ConnectionRefused { context: ErrorContext },

    #[error("connection reset")]
    ConnectionReset { context: ErrorContext },

    #[error("request timed out after {elapsed:?}")]
    RequestTimeout {
        elapsed: Duration,
        context: ErrorContext,
    },

    #[error("request failed with status {status}")]
    RequestFailed {
        status: u16,
        context: ErrorContext,
    },

    /// Per-operation timeout (spec §4.5 "Per-operation timeout"). Carries
    /// the declared budget, the measured elapsed time, a human-readable
    /// description of what timed out, and a suggestion string (the error
    /// itself carries the suggestion here, rather than deferring to the
    /// issue formatter, per spec wording: "The error carries a suggestion
    /// string").
    #[error("operation '{operation}' timed out after {elapsed:?} (budget {declared:?})")]
    StepTimeout {
        declared: Duration,
        elapsed: Duration,
        operation: String,
        suggestion: String,
        context: ErrorContext,
    },

    /// `poll_until` exhaustion (spec §4.5 "Wait / poll helpers"). Carries
    /// the number of poll attempts made and the last fetched value, if any.
    #[error("wait for '{description}' timed out after {poll_attempts} attempts")]
    WaitTimeout {
        poll_attempts: u32,
        last_value: Option<String>,
        description: String,
        context: ErrorContext,
    },

    #[error("config validation failed: {message}")]
    ConfigValidation {
        message: String,
        context: ErrorContext,
    },

    #[error("journey validation failed: {message}")]
    JourneyValidation {
        message: String,
        context: ErrorContext,
    },

    #[error("step validation failed: {message}")]
    StepValidation {
        message: String,
        context: ErrorContext,
    },

    #[error("schema mismatch: {message}")]
    SchemaMismatch {
        message: String,
        context: ErrorContext,
    },

    #[error("state manager is not connected")]
    StateNotConnected { context: ErrorContext },

    #[error("checkpoint failed: {message}")]
    CheckpointFailed {
        message: String,
        context: ErrorContext,
    },

    #[error("rollback failed: {message}")]
    RollbackFailed {
        message: String,
        context: ErrorContext,
    },

    #[error("reset failed: {message}")]
    ResetFailed {
        message: String,
        context: ErrorContext,
    },

    #[error("journey failed: {message}")]
    JourneyFailed {
        message: String,
        context: ErrorContext,
    },

    #[error("journey timed out after {elapsed:?}")]
    JourneyTimeout {
        elapsed: Duration,
        context: ErrorContext,
    },

    #[error("journey aborted: {message}")]
    JourneyAborted {
        message: String,
        context: ErrorContext,
    },

    #[error("branch failed: {message}")]
    BranchFailed {
        message: String,
        context: ErrorContext,
    },

    #[error("path failed: {message}")]
    PathFailed {
        message: String,
        context: ErrorContext,
    },

    #[error("circuit breaker open ({failures_count} failures, resets in {reset_timeout:?})")]
    CircuitOpen {
        failures_count: u32,
        reset_timeout: Duration,
        context: ErrorContext,
    },

    #[error("retry exhausted after {attempts} attempts: {last_error}")]
    RetryExhausted {
        attempts: u32,
        last_error: String,
        context: ErrorContext,
    },

    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited {
        retry_after: Option<Duration>,
        context: ErrorContext,
    },

    #[error("{message}")]
    Unknown {
        message: String,
        context: ErrorContext,
    },
}

impl VenomError {
    pub fn code(&self) -> ErrorCode {
        use VenomError::*;
        match self {
            ConnectionFailed { .. } => ErrorCode::CONNECTION_FAILED,
            ConnectionTimeout { .. } => ErrorCode::CONNECTION_TIMEOUT,
            ConnectionRefused { .. } => ErrorCode::CONNECTION_REFUSED,
            ConnectionReset { .. } => ErrorCode::CONNECTION_RESET,
            RequestTimeout { .. } => ErrorCode::REQUEST_TIMEOUT,
            RequestFailed { .. } => ErrorCode::REQUEST_FAILED,
            StepTimeout { .. } => ErrorCode::STEP_TIMEOUT,
            WaitTimeout { .. } => ErrorCode::WAIT_TIMEOUT,
            ConfigValidation { .. } => ErrorCode::VALIDATION_CONFIG,
            JourneyValidation { .. } => ErrorCode::VALIDATION_JOURNEY,
            StepValidation { .. } => ErrorCode::VALIDATION_STEP,
            SchemaMismatch { .. } => ErrorCode::VALIDATION_SCHEMA_MISMATCH,
            StateNotConnected { .. } => ErrorCode::STATE_NOT_CONNECTED,
            CheckpointFailed { .. } => ErrorCode::STATE_CHECKPOINT,
            RollbackFailed { .. } => ErrorCode::STATE_ROLLBACK,
            ResetFailed { .. } => ErrorCode::STATE_RESET,
            JourneyFailed { .. } => ErrorCode::JOURNEY_FAILED,
            JourneyTimeout { .. } => ErrorCode::JOURNEY_TIMEOUT,
            JourneyAborted { .. } => ErrorCode::JOURNEY_ABORTED,
            BranchFailed { .. } => ErrorCode::JOURNEY_BRANCH,
            PathFailed { .. } => ErrorCode::JOURNEY_PATH,
            CircuitOpen { .. } => ErrorCode::RESILIENCE_CIRCUIT_OPEN,
            RetryExhausted { .. } => ErrorCode::RESILIENCE_RETRY_EXHAUSTED,
            RateLimited { .. } => ErrorCode::RESILIENCE_RATE_LIMITED,
            Unknown { .. } => ErrorCode::UNKNOWN,
        }
    }

    /// Whether the retry policy is allowed to retry this error at all.
    /// Validation errors are never recoverable; everything connection/
    /// request/resilience-shaped is, by default.
    pub fn recoverable(&self) -> bool {
        !matches!(
            self,
            VenomError::ConfigValidation { .. }
                | VenomError::JourneyValidation { .. }
                | VenomError::StepValidation { .. }
                | VenomError::SchemaMismatch { .. }
        )
    }

    /// Named kind matching the `retry_on` YAML vocabulary (spec §6: e.g.
    /// `ConnectionError`, `Timeout`), used by [`RetryPolicy`](crate::resilience::retry::RetryPolicy)
    /// to decide whether this error's type is in a configured allow-list.
    pub fn exception_kind(&self) -> &'static str {
        use VenomError::*;
        match self {
            ConnectionFailed { .. } | ConnectionRefused { .. } | ConnectionReset { .. } => "ConnectionError",
            ConnectionTimeout { .. } | RequestTimeout { .. } | StepTimeout { .. } | WaitTimeout { .. } => "Timeout",
            RequestFailed { .. } => "RequestFailed",
            ConfigValidation { .. } => "ConfigValidation",
            JourneyValidation { .. } => "JourneyValidation",
            StepValidation { .. } => "StepValidation",
            SchemaMismatch { .. } => "SchemaMismatch",
            StateNotConnected { .. } => "StateNotConnected",
            CheckpointFailed { .. } => "CheckpointFailed",
            RollbackFailed { .. } => "RollbackFailed",
            ResetFailed { .. } => "ResetFailed",
            JourneyFailed { .. } => "JourneyFailed",
            JourneyTimeout { .. } => "JourneyTimeout",
            JourneyAborted { .. } => "JourneyAborted",
            BranchFailed { .. } => "BranchFailed",
            PathFailed { .. } => "PathFailed",
            CircuitOpen { .. } => "CircuitOpen",
            RetryExhausted { .. } => "RetryExhausted",
            RateLimited { .. } => "RateLimited",
            Unknown { .. } => "Unknown",
        }
    }

    /// The HTTP status this error carries, if any — the numeric half of
    /// the `retry_on` allow-list (spec §6) matches against this.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            VenomError::RequestFailed { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn context(&self) -> &ErrorContext {
        use VenomError::*;
        match self {
            ConnectionFailed { context, .. }
            | ConnectionTimeout { context, .. }
            | ConnectionRefused { context }
            | ConnectionReset { context }
            | RequestTimeout { context, .. }
            | RequestFailed { context, .. }
            | StepTimeout { context, .. }
            | WaitTimeout { context, .. }
            | ConfigValidation { context, .. }
            | JourneyValidation { context, .. }
            | StepValidation { context, .. }
            | SchemaMismatch { context, .. }
            | StateNotConnected { context }
            | CheckpointFailed { context, .. }
            | RollbackFailed { context, .. }
            | ResetFailed { context, .. }
            | JourneyFailed { context, .. }
            | JourneyTimeout { context, .. }
            | JourneyAborted { context, .. }
            | BranchFailed { context, .. }
            | PathFailed { context, .. }
            | CircuitOpen { context, .. }
            | RetryExhausted { context, .. }
            | RateLimited { context, .. }
            | Unknown { context, .. } => context,
        }
    }

    /// Is this specifically a rate-limit error? The retry policy's
    /// classifier always retries these regardless of attempt budget
    /// reasoning beyond attempt count (spec §4.5).
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, VenomError::RateLimited { .. })
    }

    /// `Retry-After` override, if this error carries one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            VenomError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        VenomError::Unknown {
            message: message.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn step_timeout(declared: Duration, elapsed: Duration, operation: impl Into<String>) -> Self {
        let operation = operation.into();
        VenomError::StepTimeout {
            declared,
            elapsed,
            suggestion: format!(
                "'{operation}' exceeded its {declared:?} budget; consider raising the step timeout or checking for a slow dependency"
            ),
            operation,
            context: ErrorContext::new(),
        }
    }

    pub fn wait_timeout(
        poll_attempts: u32,
        last_value: Option<String>,
        description: impl Into<String>,
    ) -> Self {
        VenomError::WaitTimeout {
            poll_attempts,
            last_value,
            description: description.into(),
            context: ErrorContext::new(),
        }
    }
}

pub type VenomResult<T> = Result<T, VenomError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_category_ranges() {
        assert_eq!(ErrorCode::CONNECTION_FAILED.category(), ErrorCategory::Connection);
        assert_eq!(ErrorCode::VALIDATION_CONFIG.category(), ErrorCategory::Validation);
        assert_eq!(ErrorCode::STATE_ROLLBACK.category(), ErrorCategory::State);
        assert_eq!(ErrorCode::JOURNEY_TIMEOUT.category(), ErrorCategory::Journey);
        assert_eq!(
            ErrorCode::RESILIENCE_CIRCUIT_OPEN.category(),
            ErrorCategory::Resilience
        );
        assert_eq!(ErrorCode::UNKNOWN.category(), ErrorCategory::Unknown);
    }

    #[test]
    fn formatted_code_is_zero_padded() {
        assert_eq!(ErrorCode::CONNECTION_FAILED.formatted(), "E0101");
    }

    #[test]
    fn validation_errors_are_never_recoverable() {
        let err = VenomError::StepValidation {
            message: "bad step".into(),
            context: ErrorContext::new(),
        };
        assert!(!err.recoverable());
    }

    #[test]
    fn connection_errors_are_recoverable_by_default() {
        let err = VenomError::ConnectionReset {
            context: ErrorContext::new(),
        };
        assert!(err.recoverable());
    }

    #[test]
    fn rate_limited_carries_retry_after() {
        let err = VenomError::RateLimited {
            retry_after: Some(Duration::from_secs(5)),
            context: ErrorContext::new(),
        };
        assert!(err.is_rate_limited());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn step_timeout_is_recoverable_and_carries_a_suggestion() {
        let err = VenomError::step_timeout(Duration::from_secs(1), Duration::from_millis(1200), "POST /checkout");
        assert!(err.recoverable());
        assert_eq!(err.code(), ErrorCode::STEP_TIMEOUT);
        match &err {
            VenomError::StepTimeout { suggestion, .. } => assert!(!suggestion.is_empty()),
            _ => panic!("expected StepTimeout"),
        }
    }

    #[test]
    fn wait_timeout_carries_poll_attempts() {
        let err = VenomError::wait_timeout(5, Some("false".into()), "order status == shipped");
        match err {
            VenomError::WaitTimeout { poll_attempts, .. } => assert_eq!(poll_attempts, 5),
            _ => panic!("expected WaitTimeout"),
        }
    }
}
