use backtrace::Backtrace;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::result::Result;

use crate::common::{atomic, Atomic};

/// Error kinds for tempdb operations
///
/// Each kind names one category of failure so callers can branch on it, for
/// example falling back to a default provider on [`ErrorKind::MissingProvider`].
///
/// # Examples
///
/// ```rust,ignore
/// use tempdb::errors::{TempDbError, ErrorKind, TempDbResult};
///
/// fn example() -> TempDbResult<()> {
///     Err(TempDbError::new("No provider registered", ErrorKind::MissingProvider))
/// }
/// ```
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ErrorKind {
    // Registry errors
    /// No provider is registered for the requested database and provider type
    MissingProvider,
    /// A provider is already registered for the same database and provider type
    DuplicateProvider,

    // Preparation errors
    /// A migration tool operation (migrate, clean, baseline) failed
    MigrationFailure,
    /// The backing engine or server could not allocate a database
    ProvisioningFailure,

    // Lifecycle errors
    /// An async result was completed a second time
    ResultAlreadyCompleted,
    /// The database has already been released
    DatabaseReleased,

    // Configuration and validation errors
    /// Configuration could not be read or is inconsistent
    InvalidConfiguration,
    /// Input failed validation (script names, schema names, checksums)
    ValidationError,

    // IO and backend errors
    /// Generic IO error
    IOError,
    /// Error reported by a database engine, text kept verbatim
    BackendError,

    // Event errors
    /// Error in event processing
    EventError,

    /// Error from an adapter crate (e.g., "postgres")
    Extension(String),

    /// Internal error (usually indicates a bug)
    InternalError,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::MissingProvider => write!(f, "Missing provider"),
            ErrorKind::DuplicateProvider => write!(f, "Duplicate provider"),
            ErrorKind::MigrationFailure => write!(f, "Migration failure"),
            ErrorKind::ProvisioningFailure => write!(f, "Provisioning failure"),
            ErrorKind::ResultAlreadyCompleted => write!(f, "Result already completed"),
            ErrorKind::DatabaseReleased => write!(f, "Database released"),
            ErrorKind::InvalidConfiguration => write!(f, "Invalid configuration"),
            ErrorKind::ValidationError => write!(f, "Validation error"),
            ErrorKind::IOError => write!(f, "IO error"),
            ErrorKind::BackendError => write!(f, "Backend error"),
            ErrorKind::EventError => write!(f, "Event error"),
            ErrorKind::Extension(name) => write!(f, "{} error", name),
            ErrorKind::InternalError => write!(f, "Internal error"),
        }
    }
}

/// Custom tempdb error type.
///
/// `TempDbError` carries a message, a kind and an optional cause. Wrapping an
/// error never discards the message of the wrapped one: the cause is kept and
/// walked by [`Error::source`] and by the `Debug` output.
///
/// The error is `Clone` so that a single failure can be stored in an
/// [`AsyncResult`](crate::common::AsyncResult) and handed to every reader.
///
/// # Examples
///
/// ```rust,ignore
/// use tempdb::errors::{TempDbError, ErrorKind};
///
/// let cause = TempDbError::new("near \"CREAT\": syntax error", ErrorKind::BackendError);
/// let err = TempDbError::new_with_cause("Migration V2 failed", ErrorKind::MigrationFailure, cause);
/// ```
#[derive(Clone)]
pub struct TempDbError {
    message: String,
    error_kind: ErrorKind,
    cause: Option<Box<TempDbError>>,
    backtrace: Atomic<Backtrace>,
}

impl TempDbError {
    /// Creates a new `TempDbError` with the specified message and error kind.
    pub fn new(message: &str, error_kind: ErrorKind) -> Self {
        TempDbError {
            message: message.to_string(),
            error_kind,
            cause: None,
            backtrace: atomic(Backtrace::new()),
        }
    }

    /// Creates a new `TempDbError` with a cause error.
    ///
    /// This creates an error chain where the cause error is preserved for debugging.
    pub fn new_with_cause(message: &str, error_kind: ErrorKind, cause: TempDbError) -> Self {
        TempDbError {
            message: message.to_string(),
            error_kind,
            cause: Some(Box::new(cause)),
            backtrace: atomic(Backtrace::new()),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.error_kind
    }

    pub fn cause(&self) -> Option<&TempDbError> {
        self.cause.as_deref()
    }

    /// Returns the innermost error of the cause chain (or `self`).
    pub fn root_cause(&self) -> &TempDbError {
        let mut current = self;
        while let Some(cause) = current.cause() {
            current = cause;
        }
        current
    }
}

impl Display for TempDbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Debug for TempDbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        // print error message with stack trace followed by cause
        match &self.cause {
            Some(cause) => write!(f, "{}\nCaused by: {:?}", self.message, cause),
            None => write!(f, "{}\n{:?}", self.message, self.backtrace.read()),
        }
    }
}

impl Error for TempDbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self.cause {
            Some(cause) => Some(cause.as_ref()),
            None => None,
        }
    }
}

/// A result type alias for tempdb operations.
pub type TempDbResult<T> = Result<T, TempDbError>;

impl From<std::io::Error> for TempDbError {
    fn from(err: std::io::Error) -> Self {
        TempDbError::new(&format!("IO error: {}", err), ErrorKind::IOError)
    }
}

impl From<rusqlite::Error> for TempDbError {
    fn from(err: rusqlite::Error) -> Self {
        // engine text is kept as is, callers match on it
        TempDbError::new(&err.to_string(), ErrorKind::BackendError)
    }
}

impl From<toml::de::Error> for TempDbError {
    fn from(err: toml::de::Error) -> Self {
        TempDbError::new(
            &format!("Invalid configuration: {}", err),
            ErrorKind::InvalidConfiguration,
        )
    }
}

impl From<std::num::ParseIntError> for TempDbError {
    fn from(err: std::num::ParseIntError) -> Self {
        TempDbError::new(
            &format!("Integer parsing error: {}", err),
            ErrorKind::ValidationError,
        )
    }
}

impl From<String> for TempDbError {
    fn from(msg: String) -> Self {
        TempDbError::new(&msg, ErrorKind::InternalError)
    }
}

impl From<&str> for TempDbError {
    fn from(msg: &str) -> Self {
        TempDbError::new(msg, ErrorKind::InternalError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tempdb_error_new_creates_error() {
        let error = TempDbError::new("An error occurred", ErrorKind::IOError);
        assert_eq!(error.message, "An error occurred");
        assert_eq!(error.error_kind, ErrorKind::IOError);
        assert!(error.cause.is_none());
    }

    #[test]
    fn tempdb_error_new_with_cause_keeps_cause() {
        let cause = TempDbError::new("disk I/O error", ErrorKind::BackendError);
        let error = TempDbError::new_with_cause("Migration failed", ErrorKind::MigrationFailure, cause);
        assert_eq!(error.kind(), &ErrorKind::MigrationFailure);
        assert_eq!(error.cause().map(|c| c.message()), Some("disk I/O error"));
    }

    #[test]
    fn root_cause_walks_the_chain() {
        let root = TempDbError::new("no such table: orders", ErrorKind::BackendError);
        let middle = TempDbError::new_with_cause("V2 failed", ErrorKind::MigrationFailure, root);
        let top = TempDbError::new_with_cause("prepare failed", ErrorKind::MigrationFailure, middle);
        assert_eq!(top.root_cause().message(), "no such table: orders");
    }

    #[test]
    fn display_prints_message_only() {
        let error = TempDbError::new("An error occurred", ErrorKind::IOError);
        assert_eq!(format!("{}", error), "An error occurred");
    }

    #[test]
    fn debug_prints_cause_chain() {
        let cause = TempDbError::new("Cause error", ErrorKind::IOError);
        let error = TempDbError::new_with_cause("An error occurred", ErrorKind::IOError, cause);
        let debug = format!("{:?}", error);
        assert!(debug.contains("An error occurred"));
        assert!(debug.contains("Caused by: Cause error"));
    }

    #[test]
    fn source_returns_cause() {
        let cause = TempDbError::new("Cause error", ErrorKind::IOError);
        let error = TempDbError::new_with_cause("An error occurred", ErrorKind::IOError, cause);
        assert!(error.source().is_some());
        assert!(TempDbError::new("plain", ErrorKind::IOError).source().is_none());
    }

    #[test]
    fn error_kind_display() {
        assert_eq!(ErrorKind::MissingProvider.to_string(), "Missing provider");
        assert_eq!(ErrorKind::ResultAlreadyCompleted.to_string(), "Result already completed");
        assert_eq!(ErrorKind::Extension("postgres".to_string()).to_string(), "postgres error");
    }

    #[test]
    fn from_io_error() {
        let err: TempDbError = std::io::Error::other("boom").into();
        assert_eq!(err.kind(), &ErrorKind::IOError);
        assert!(err.message().contains("boom"));
    }

    #[test]
    fn from_rusqlite_error_keeps_text() {
        let err: TempDbError = rusqlite::Error::InvalidQuery.into();
        assert_eq!(err.kind(), &ErrorKind::BackendError);
        assert_eq!(err.message(), rusqlite::Error::InvalidQuery.to_string());
    }

    #[test]
    fn from_str_and_string() {
        let a: TempDbError = "oops".into();
        let b: TempDbError = "oops".to_string().into();
        assert_eq!(a.kind(), &ErrorKind::InternalError);
        assert_eq!(a.message(), b.message());
    }

    #[test]
    fn error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync + 'static>() {}
        assert_send_sync::<TempDbError>();
    }
}
