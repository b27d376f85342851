//! Error taxonomy and process exit codes.
//!
//! Every module reports its own `thiserror` enum. [`ErrorKind`] folds them
//! into the categories callers act on, and [`ExitCode`] maps those onto the
//! process exit status of the `dedup` binary.

use std::fmt;

use serde::Serialize;

use crate::duplicates::{HashFailure, PipelineError, ResolveError};
use crate::engine::EngineError;
use crate::scanner::{HashError, ScanError};
use crate::workspace::StoreError;

/// Category of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A workspace or directory does not exist.
    NotFound,
    /// Persisted data is unreadable or has an unknown schema.
    Corrupt,
    /// A filesystem or database operation failed.
    Io,
    /// The operation was cancelled by the caller.
    Cancelled,
    /// A worker faulted unexpectedly.
    Worker,
    /// The operation is not valid in the current state.
    InvalidState,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotFound => "not found",
            Self::Corrupt => "corrupt",
            Self::Io => "I/O",
            Self::Cancelled => "cancelled",
            Self::Worker => "worker",
            Self::InvalidState => "invalid state",
        };
        f.write_str(name)
    }
}

impl StoreError {
    /// Category of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Corrupt(_) => ErrorKind::Corrupt,
            Self::Database(_) | Self::Io(_) | Self::Json(_) => ErrorKind::Io,
        }
    }
}

impl ScanError {
    /// Category of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Cancelled => ErrorKind::Cancelled,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::NotADirectory(_) => ErrorKind::InvalidState,
            Self::Io { .. } => ErrorKind::Io,
        }
    }
}

impl HashError {
    /// Category of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Interrupted(_) => ErrorKind::Cancelled,
            Self::NotFound(_) | Self::PermissionDenied(_) | Self::Io { .. } => ErrorKind::Io,
        }
    }
}

impl HashFailure {
    /// Category of this failure.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io { .. } => ErrorKind::Io,
            Self::Worker { .. } => ErrorKind::Worker,
        }
    }
}

impl PipelineError {
    /// Category of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Store(e) => e.kind(),
        }
    }
}

impl ResolveError {
    /// Category of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Store(e) => e.kind(),
        }
    }
}

/// Exit codes of the `dedup` binary.
///
/// - 0: success
/// - 1: unexpected failure
/// - 2: the `duplicates` command found nothing
/// - 3: finished, but some files could not be hashed
/// - 4: workspace missing or unreadable
/// - 5: invalid usage for the workspace state (e.g. scanning with no roots)
/// - 130: interrupted (Ctrl+C)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitCode {
    /// Completed normally.
    Success = 0,
    /// An unexpected error occurred.
    GeneralError = 1,
    /// Duplicate search completed without finding duplicates.
    NoDuplicates = 2,
    /// Completed, but some files failed to hash.
    PartialSuccess = 3,
    /// The workspace does not exist or cannot be read.
    WorkspaceError = 4,
    /// The request is not valid in the current workspace state.
    InvalidState = 5,
    /// Interrupted by the user.
    Interrupted = 130,
}

impl ExitCode {
    /// Get the numeric exit code.
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Machine-readable code prefix.
    #[must_use]
    pub fn code_prefix(self) -> &'static str {
        match self {
            Self::Success => "DD000",
            Self::GeneralError => "DD001",
            Self::NoDuplicates => "DD002",
            Self::PartialSuccess => "DD003",
            Self::WorkspaceError => "DD004",
            Self::InvalidState => "DD005",
            Self::Interrupted => "DD130",
        }
    }

    /// Exit code for a failure of the given kind.
    #[must_use]
    pub fn for_kind(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::NotFound | ErrorKind::Corrupt => Self::WorkspaceError,
            ErrorKind::Cancelled => Self::Interrupted,
            ErrorKind::InvalidState => Self::InvalidState,
            ErrorKind::Io | ErrorKind::Worker => Self::GeneralError,
        }
    }

    /// Exit code for an error escaping `run_app`.
    ///
    /// Looks through the `anyhow` chain for a library error carrying a kind.
    #[must_use]
    pub fn from_error(err: &anyhow::Error) -> Self {
        err.chain()
            .find_map(kind_of)
            .map_or(Self::GeneralError, Self::for_kind)
    }
}

fn kind_of(cause: &(dyn std::error::Error + 'static)) -> Option<ErrorKind> {
    if let Some(e) = cause.downcast_ref::<EngineError>() {
        return Some(e.kind());
    }
    if let Some(e) = cause.downcast_ref::<StoreError>() {
        return Some(e.kind());
    }
    if let Some(e) = cause.downcast_ref::<ScanError>() {
        return Some(e.kind());
    }
    if let Some(e) = cause.downcast_ref::<PipelineError>() {
        return Some(e.kind());
    }
    cause.downcast_ref::<ResolveError>().map(ResolveError::kind)
}

/// Structured error information for JSON output.
#[derive(Debug, Serialize)]
pub struct StructuredError {
    /// The error code (e.g., "DD004")
    pub code: String,
    /// The exit code number
    pub exit_code: i32,
    /// Category, when the failure came from the library
    pub kind: Option<ErrorKind>,
    /// Human-readable error message
    pub message: String,
    /// Whether the operation was interrupted
    pub interrupted: bool,
}

impl StructuredError {
    /// Create a new structured error from an anyhow error and an exit code.
    #[must_use]
    pub fn new(err: &anyhow::Error, exit_code: ExitCode) -> Self {
        Self {
            code: exit_code.code_prefix().to_string(),
            exit_code: exit_code.as_i32(),
            kind: err.chain().find_map(kind_of),
            message: format!("{err:#}"),
            interrupted: exit_code == ExitCode::Interrupted,
        }
    }
}
