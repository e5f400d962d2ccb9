//! Error types for the edgequake-pdfops library.
//!
//! The caller only ever sees [`DispatchError`], whose [`ErrorKind`] is the
//! stable `errorKind` of a failure response. The narrower types below feed
//! into it:
//!
//! * [`OptionError`]: a raw option could not be normalised against an
//!   operation's schema.
//! * [`StorageError`]: the artifact store could not create or track a
//!   temporary file.
//! * [`RoutineError`]: a transformation routine failed after valid input
//!   was staged.
//!
//! Messages are written for the end user. They never carry filesystem paths,
//! stack traces or option values that might be secret (passwords).

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Stable failure category reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    InvalidInput,
    OptionError,
    StorageError,
    ProcessingFailure,
    DependencyUnavailable,
    Timeout,
}

impl ErrorKind {
    /// `true` for failures caused by the request itself (4xx-equivalent).
    pub fn is_client_error(self) -> bool {
        matches!(self, ErrorKind::InvalidInput | ErrorKind::OptionError)
    }

    /// HTTP-equivalent status for transports that need one.
    pub fn status_code(self) -> u16 {
        match self {
            ErrorKind::InvalidInput | ErrorKind::OptionError => 400,
            ErrorKind::StorageError | ErrorKind::ProcessingFailure => 500,
            ErrorKind::DependencyUnavailable => 503,
            ErrorKind::Timeout => 504,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// All errors returned by [`crate::dispatch::Dispatcher::dispatch`].
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The document failed validation, or the operation is not registered.
    #[error("{0}")]
    InvalidInput(String),

    /// A raw option was unknown, missing, malformed or inconsistent.
    #[error(transparent)]
    Options(#[from] OptionError),

    /// Temporary storage is unavailable.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The routine failed after receiving valid input.
    #[error("Processing failed: {0}")]
    ProcessingFailure(String),

    /// An external codec or engine is missing or mis-configured.
    #[error("Dependency unavailable: {0}")]
    DependencyUnavailable(String),

    /// The routine exceeded its bounded run time.
    #[error("Operation '{operation}' timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },
}

impl DispatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::InvalidInput(_) => ErrorKind::InvalidInput,
            DispatchError::Options(_) => ErrorKind::OptionError,
            DispatchError::Storage(_) => ErrorKind::StorageError,
            DispatchError::ProcessingFailure(_) => ErrorKind::ProcessingFailure,
            DispatchError::DependencyUnavailable(_) => ErrorKind::DependencyUnavailable,
            DispatchError::Timeout { .. } => ErrorKind::Timeout,
        }
    }

    /// Build the transport-agnostic failure response.
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            error_kind: self.kind(),
            message: self.to_string(),
        }
    }
}

impl From<RoutineError> for DispatchError {
    fn from(e: RoutineError) -> Self {
        match e {
            RoutineError::UnsupportedInput(msg) => DispatchError::InvalidInput(msg),
            RoutineError::ProcessingFailure(msg) => DispatchError::ProcessingFailure(msg),
            RoutineError::DependencyUnavailable { dependency, detail } => {
                DispatchError::DependencyUnavailable(format!("{dependency}: {detail}"))
            }
            RoutineError::Storage(e) => DispatchError::Storage(e),
        }
    }
}

impl From<crate::validate::ValidationError> for DispatchError {
    fn from(e: crate::validate::ValidationError) -> Self {
        DispatchError::InvalidInput(e.to_string())
    }
}

/// Failure response body: `{ errorKind, message }`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error_kind: ErrorKind,
    pub message: String,
}

// ── Options ──────────────────────────────────────────────────────────────

/// A raw option could not be normalised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OptionError {
    /// The request carried a key the operation's schema does not declare.
    #[error("Unknown option '{key}' for operation '{operation}'")]
    UnknownKey { operation: String, key: String },

    /// A field was supplied twice (canonical name plus an alias).
    #[error("Option '{key}' was supplied more than once")]
    DuplicateKey { key: String },

    /// A required field is absent or empty.
    #[error("Missing required option '{key}'")]
    Missing { key: String },

    /// An enumerated field got a value outside its allowed set.
    #[error("Invalid value '{value}' for option '{key}'; allowed: {allowed}")]
    InvalidChoice {
        key: String,
        value: String,
        allowed: String,
    },

    /// A numeric field could not be parsed.
    #[error("Option '{key}' must be an integer")]
    NotAnInteger { key: String },

    /// A numeric field declared as rejecting out-of-range values got one.
    #[error("Option '{key}' must be between {min} and {max}")]
    OutOfRange { key: String, min: i64, max: i64 },

    /// A free-text field exceeded its length limit.
    #[error("Option '{key}' must be at most {max} characters")]
    TooLong { key: String, max: usize },

    /// A cross-field rule was violated.
    #[error("{0}")]
    Constraint(String),
}

// ── Storage ──────────────────────────────────────────────────────────────

/// The artifact store could not create, write or track a temporary file.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A filesystem call failed. `action` names what was attempted; the
    /// underlying I/O error kind is kept for logs.
    #[error("Temporary storage unavailable: could not {action}")]
    Io {
        action: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// An artifact handle was presented to a scope that does not own it.
    #[error("Artifact '{id}' is not owned by this request")]
    NotOwned { id: String },
}

impl StorageError {
    pub(crate) fn io(action: &'static str, source: std::io::Error) -> Self {
        StorageError::Io { action, source }
    }
}

// ── Routines ─────────────────────────────────────────────────────────────

/// Typed failure of a transformation routine.
#[derive(Debug, Error)]
pub enum RoutineError {
    /// The staged document cannot be handled by this routine (e.g. it is
    /// already encrypted).
    #[error("Unsupported input: {0}")]
    UnsupportedInput(String),

    /// Internal failure while processing valid input.
    #[error("Processing failed: {0}")]
    ProcessingFailure(String),

    /// An external codec or engine is missing or mis-configured.
    #[error("{dependency} unavailable: {detail}")]
    DependencyUnavailable {
        dependency: &'static str,
        detail: String,
    },

    /// The routine could not create an artifact.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl RoutineError {
    pub fn processing(detail: impl Into<String>) -> Self {
        RoutineError::ProcessingFailure(detail.into())
    }

    pub fn unavailable(dependency: &'static str, detail: impl Into<String>) -> Self {
        RoutineError::DependencyUnavailable {
            dependency,
            detail: detail.into(),
        }
    }

    /// Whether a best-effort operation may substitute a placeholder for this
    /// failure. Bad input and storage failures are never papered over.
    pub fn allows_fallback(&self) -> bool {
        matches!(
            self,
            RoutineError::ProcessingFailure(_) | RoutineError::DependencyUnavailable { .. }
        )
    }
}

// ── Registry ─────────────────────────────────────────────────────────────

/// An operation could not be registered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Operation name '{0}' is already registered")]
    DuplicateName(String),

    #[error("Operation '{operation}' declares field '{field}' twice")]
    DuplicateField { operation: String, field: String },

    #[error("Operation '{operation}' has an invalid default for '{field}': {reason}")]
    InvalidDefault {
        operation: String,
        field: String,
        reason: String,
    },
}

// ── Config ───────────────────────────────────────────────────────────────

/// Builder validation failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid configuration: {0}")]
pub struct ConfigError(pub String);

/// A [`Dispatcher`](crate::Dispatcher) could not be constructed.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

// ── Sources ──────────────────────────────────────────────────────────────

/// A document could not be loaded from a local path or URL.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("File not found: '{input}'")]
    NotFound { input: String },

    #[error("Permission denied reading '{input}'")]
    PermissionDenied { input: String },

    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    #[error("Download from '{url}' exceeds the {limit}-byte limit")]
    TooLarge { url: String, limit: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_are_400() {
        assert!(ErrorKind::InvalidInput.is_client_error());
        assert!(ErrorKind::OptionError.is_client_error());
        assert!(!ErrorKind::Timeout.is_client_error());
        assert_eq!(ErrorKind::DependencyUnavailable.status_code(), 503);
        assert_eq!(ErrorKind::Timeout.status_code(), 504);
    }

    #[test]
    fn routine_errors_map_to_dispatch_kinds() {
        let e: DispatchError = RoutineError::unavailable("qpdf", "not installed").into();
        assert_eq!(e.kind(), ErrorKind::DependencyUnavailable);
        assert!(e.to_string().contains("qpdf"));

        let e: DispatchError = RoutineError::UnsupportedInput("encrypted".into()).into();
        assert_eq!(e.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn only_processing_and_dependency_failures_fall_back() {
        assert!(RoutineError::processing("boom").allows_fallback());
        assert!(RoutineError::unavailable("pdfium", "missing").allows_fallback());
        assert!(!RoutineError::UnsupportedInput("x".into()).allows_fallback());
    }

    #[test]
    fn storage_message_hides_paths() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "/secret/tmp/x");
        let e = StorageError::io("create artifact", io);
        let msg = e.to_string();
        assert!(msg.contains("create artifact"), "got: {msg}");
        assert!(!msg.contains("/secret"), "got: {msg}");
    }

    #[test]
    fn error_response_serialises_camel_case() {
        let e = DispatchError::Options(OptionError::UnknownKey {
            operation: "compress".into(),
            key: "colour".into(),
        });
        let json = serde_json::to_value(e.to_response()).unwrap();
        assert_eq!(json["errorKind"], "OptionError");
        assert!(json["message"].as_str().unwrap().contains("colour"));
    }
}
