//! Remote API errors and their classification
//!
//! Every error coming back from a control plane is reduced to an [`ApiError`]
//! carrying the remote error code. The code decides whether the retry wrapper
//! and the reconciliation loop may try again.

use thiserror::Error;

/// Error codes that indicate throttling or transient unavailability
const RETRYABLE_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "TooManyRequestsException",
    "RequestLimitExceeded",
    "ServiceUnavailable",
    "ServiceUnavailableException",
    "InternalFailure",
    "InternalError",
    "ServiceInternalError",
    "HandlerInternalFailure",
    "NetworkFailure",
    "RequestTimeout",
    "RequestTimeoutException",
    "ConcurrentOperationException",
    "ConcurrentModificationException",
    "PriorRequestNotComplete",
];

/// Error codes that mean the remote object does not exist
const NOT_FOUND_CODES: &[&str] = &[
    "NotFound",
    "ResourceNotFound",
    "ResourceNotFoundException",
    "RequestTokenNotFoundException",
];

/// How an error code should be treated by callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transient; the same call may succeed later
    Retryable,
    /// The addressed object does not exist
    NotFound,
    /// Semantic rejection (invalid parameter, conflict, access denied, ...)
    Permanent,
}

/// Classify a remote error code
pub fn classify(code: &str) -> ErrorClass {
    if RETRYABLE_CODES.contains(&code) {
        ErrorClass::Retryable
    } else if NOT_FOUND_CODES.contains(&code) {
        ErrorClass::NotFound
    } else {
        ErrorClass::Permanent
    }
}

/// Errors that know whether the failed call may be repeated
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// An error reported by the remote control plane
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    pub code: String,
    pub message: String,
    class: ErrorClass,
}

impl ApiError {
    /// Create an error whose class is derived from its code
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        let code = code.into();
        let class = classify(&code);
        Self {
            code,
            message: message.into(),
            class,
        }
    }

    /// Create an error with an explicit class, for failures that carry no code
    pub fn with_class(code: impl Into<String>, message: impl Into<String>, class: ErrorClass) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            class,
        }
    }

    pub fn class(&self) -> ErrorClass {
        self.class
    }

    pub fn is_not_found(&self) -> bool {
        self.class == ErrorClass::NotFound
    }
}

impl Retryable for ApiError {
    fn is_retryable(&self) -> bool {
        self.class == ErrorClass::Retryable
    }
}
