use backtrace::Backtrace;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::result::Result;

use crate::common::{atomic, Atomic, ReadExecutor};

/// Error kinds for patch engine operations.
///
/// Each kind describes a category of failure, enabling precise handling by
/// callers. Configuration and validation kinds are raised before any mutation
/// happens; `AlreadyLocked` is the distinguished lock-contention signal the
/// launcher recovers from locally and never surfaces.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ErrorKind {
    /// Missing property, unknown strategy or database type, malformed task definition
    ConfigurationError,
    /// A discovered task set or a requested operation failed validation
    ValidationError,
    /// A migration task failed or the forward run could not proceed
    MigrationError,
    /// A rollback was requested that the task set cannot satisfy, or a down action failed
    RollbackError,
    /// Outstanding work was found while running in read-only mode
    ReadOnlyViolation,
    /// A controlled system is out of sync with the driving system
    SyncError,
    /// The patch lock could not be read, obtained, or released
    LockError,
    /// The patch lock is held by another invocation; recoverable by retrying
    AlreadyLocked,
    /// The patch-info store failed to read or persist state
    StoreError,
    /// A task action raised an error while executing
    TaskError,
    /// Generic IO error (script files, directory scans)
    IOError,
    /// Internal error (usually indicates a bug)
    InternalError,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::ConfigurationError => write!(f, "Configuration error"),
            ErrorKind::ValidationError => write!(f, "Validation error"),
            ErrorKind::MigrationError => write!(f, "Migration error"),
            ErrorKind::RollbackError => write!(f, "Rollback error"),
            ErrorKind::ReadOnlyViolation => write!(f, "Read-only violation"),
            ErrorKind::SyncError => write!(f, "Synchronization error"),
            ErrorKind::LockError => write!(f, "Lock error"),
            ErrorKind::AlreadyLocked => write!(f, "Already locked"),
            ErrorKind::StoreError => write!(f, "Store error"),
            ErrorKind::TaskError => write!(f, "Task error"),
            ErrorKind::IOError => write!(f, "IO error"),
            ErrorKind::InternalError => write!(f, "Internal error"),
        }
    }
}

/// The single error type raised by the patch engine.
///
/// `PatchError` carries a message, an [`ErrorKind`], an optional cause, and a
/// captured backtrace. Error chains preserve the underlying failure for
/// debugging.
///
/// # Examples
///
/// ```rust,ignore
/// use patchrun::errors::{ErrorKind, PatchError, PatchResult};
///
/// fn example() -> PatchResult<()> {
///     Err(PatchError::new("patch level table missing", ErrorKind::StoreError))
/// }
/// ```
#[derive(Clone)]
pub struct PatchError {
    message: String,
    error_kind: ErrorKind,
    cause: Option<Box<PatchError>>,
    backtrace: Atomic<Backtrace>,
}

impl PatchError {
    /// Creates a new `PatchError` with the specified message and error kind.
    pub fn new(message: &str, error_kind: ErrorKind) -> Self {
        PatchError {
            message: message.to_string(),
            error_kind,
            cause: None,
            backtrace: atomic(Backtrace::new()),
        }
    }

    /// Creates a new `PatchError` with an underlying cause attached.
    pub fn new_with_cause(message: &str, error_kind: ErrorKind, cause: PatchError) -> Self {
        PatchError {
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

    pub fn cause(&self) -> Option<&PatchError> {
        self.cause.as_deref()
    }
}

impl Display for PatchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Debug for PatchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.cause {
            Some(cause) => write!(f, "{}\nCaused by: {:?}", self.message, cause),
            None => {
                let backtrace = self.backtrace.read_with(|b| format!("{:?}", b));
                write!(f, "{}\n{}", self.message, backtrace)
            }
        }
    }
}

impl Error for PatchError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self.cause {
            Some(cause) => Some(cause.as_ref()),
            None => None,
        }
    }
}

/// A result type alias for patch engine operations.
///
/// All fallible operations in this crate return `PatchResult<T>`.
pub type PatchResult<T> = Result<T, PatchError>;

impl From<std::io::Error> for PatchError {
    fn from(err: std::io::Error) -> Self {
        PatchError::new(&format!("IO error: {}", err), ErrorKind::IOError)
    }
}

impl From<std::num::ParseIntError> for PatchError {
    fn from(err: std::num::ParseIntError) -> Self {
        PatchError::new(
            &format!("Integer parsing error: {}", err),
            ErrorKind::ValidationError,
        )
    }
}

impl From<String> for PatchError {
    fn from(msg: String) -> Self {
        PatchError::new(&msg, ErrorKind::InternalError)
    }
}

impl From<&str> for PatchError {
    fn from(msg: &str) -> Self {
        PatchError::new(msg, ErrorKind::InternalError)
    }
}
