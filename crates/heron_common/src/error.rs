use std::time::Duration;

use thiserror::Error;

use crate::types::TableRef;

/// Convenience alias for `Result<T, HeronError>`.
pub type HeronResult<T> = Result<T, HeronError>;

/// Error classification for retry/escalation decisions.
///
/// - `UserError`   — bad input: wrong schema, unsupported option, bad argument
/// - `Retryable`   — transient collaborator failure; the operation may succeed later
/// - `InternalBug` — invariant violation; should never happen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UserError,
    Retryable,
    InternalBug,
}

/// Top-level error type for the storage layer.
#[derive(Error, Debug)]
pub enum HeronError {
    /// A table engine's destination resolves back to the engine itself.
    #[error("Destination table is the table itself: {0}. Operation would loop forever")]
    InfiniteLoop(TableRef),

    /// Broken internal invariant.
    #[error("Logical error: {0}")]
    LogicalError(String),

    /// Valid request for a feature this engine does not provide.
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// Engine declaration carried the wrong number of arguments.
    #[error("Engine {engine} requires {expected} parameters: {hint}")]
    ArgumentCountMismatch {
        engine: &'static str,
        expected: usize,
        hint: &'static str,
    },

    /// Engine declaration argument of the wrong type or out of range.
    #[error("Bad engine argument: {0}")]
    BadArgument(String),

    #[error("Table not found: {0}")]
    TableNotFound(TableRef),

    #[error("Unknown table engine: {0}")]
    UnknownEngine(String),

    #[error("No column {0} in table")]
    ColumnNotFound(String),

    #[error("Column {0} already exists")]
    ColumnAlreadyExists(String),

    #[error("Block structure mismatch: {0}")]
    StructureMismatch(String),

    /// A write or read against the destination table failed. The buffered
    /// data is rolled back into its shard before this is raised.
    #[error("Destination table {table}: {source}")]
    Destination {
        table: TableRef,
        #[source]
        source: Box<HeronError>,
    },

    #[error("Could not acquire table structure lock within {timeout:?}")]
    LockTimeout { timeout: Duration },

    #[error("Cannot cast {value} to {target}")]
    Cast { value: String, target: String },
}

impl HeronError {
    /// Classify this error for retry/escalation decisions.
    pub fn kind(&self) -> ErrorKind {
        match self {
            HeronError::NotImplemented(_)
            | HeronError::ArgumentCountMismatch { .. }
            | HeronError::BadArgument(_)
            | HeronError::UnknownEngine(_)
            | HeronError::TableNotFound(_)
            | HeronError::ColumnNotFound(_)
            | HeronError::ColumnAlreadyExists(_)
            | HeronError::StructureMismatch(_)
            | HeronError::Cast { .. } => ErrorKind::UserError,
            HeronError::Destination { .. } | HeronError::LockTimeout { .. } => ErrorKind::Retryable,
            HeronError::InfiniteLoop(_) | HeronError::LogicalError(_) => ErrorKind::InternalBug,
        }
    }

    /// Returns true if the caller may retry the operation unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Retryable)
    }

    /// Wrap a collaborator failure with the destination table it came from.
    pub fn destination(table: TableRef, source: HeronError) -> Self {
        HeronError::Destination {
            table,
            source: Box::new(source),
        }
    }
}
