//! Error types for audio-pipeline.
//!
//! Errors are split into three categories:
//! - **Control errors** ([`PipelineError`]): returned to the caller of a
//!   pipeline, element, or event-interface operation
//! - **Buffer errors** ([`BufferError`]): outcomes of a blocking ring buffer call
//! - **Processing faults** ([`ProcessError`]): raised inside an element's worker
//!   and surfaced as an `Error` status event, never returned to the caller

use std::path::PathBuf;

use crate::element::ElementState;
use crate::peripheral::PeripheralId;

/// Errors returned by pipeline, element, and event-interface operations.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The operation is not legal in the element's current lifecycle state.
    ///
    /// Recoverable: retry once the element reaches a valid state.
    #[error("cannot {operation} element '{element}' while {state:?}")]
    InvalidState {
        /// Tag of the element.
        element: String,
        /// State the element was in.
        state: ElementState,
        /// Operation that was attempted.
        operation: &'static str,
    },

    /// An element with this name is already registered.
    #[error("duplicate element name: {name}")]
    DuplicateName {
        /// The duplicated name.
        name: String,
    },

    /// The name does not refer to a registered element.
    #[error("unknown element: {name}")]
    UnknownElement {
        /// The unknown name.
        name: String,
    },

    /// The id does not refer to a peripheral in the set.
    #[error("unknown peripheral: {id}")]
    UnknownPeripheral {
        /// The unknown id.
        id: PeripheralId,
    },

    /// `run()` was called before `link()`.
    #[error("pipeline is not linked - call link() before run()")]
    NotLinked,

    /// `link()` was called with no element names.
    #[error("link order is empty - name at least one element")]
    EmptyLink,

    /// A blocking call exceeded its timeout.
    #[error("operation timed out")]
    Timeout,

    /// A buffer was aborted during teardown.
    ///
    /// Expected while shutting down; not a failure.
    #[error("operation aborted")]
    Aborted,

    /// The worker thread for an element could not be spawned.
    #[error("failed to spawn worker for '{name}': {source}")]
    SpawnFailed {
        /// Tag of the element.
        name: String,
        /// The underlying OS error.
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    pub(crate) fn invalid_state(
        element: impl Into<String>,
        state: ElementState,
        operation: &'static str,
    ) -> Self {
        Self::InvalidState {
            element: element.into(),
            state,
            operation,
        }
    }

    pub(crate) fn unknown(name: impl Into<String>) -> Self {
        Self::UnknownElement { name: name.into() }
    }
}

/// Outcome of a ring buffer read or write that did not transfer data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BufferError {
    /// The timeout elapsed before any byte could be transferred.
    #[error("ring buffer timed out")]
    Timeout,

    /// The buffer was aborted; every pending and future call fails until reset.
    #[error("ring buffer aborted")]
    Aborted,

    /// End of stream: the producer marked the buffer done and it is drained.
    #[error("ring buffer done")]
    Done,
}

impl From<BufferError> for PipelineError {
    fn from(err: BufferError) -> Self {
        match err {
            BufferError::Timeout => Self::Timeout,
            BufferError::Aborted | BufferError::Done => Self::Aborted,
        }
    }
}

/// Faults raised by a [`Processor`](crate::Processor).
///
/// A fault moves the element to `Error` and is reported through a
/// `ReportStatus` event carrying the reason. The pipeline never restarts a
/// faulted element on its own.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// The transform failed.
    #[error("processing failed: {reason}")]
    Failed {
        /// Description of what went wrong.
        reason: String,
    },

    /// The receiving side of a channel sink was dropped.
    #[error("channel closed")]
    ChannelClosed,

    /// File I/O error.
    #[error("file error: {path}: {source}")]
    File {
        /// Path to the file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Custom error for user-implemented processors.
    #[error("{0}")]
    Custom(String),
}

impl ProcessError {
    /// Creates a custom processing error with the given message.
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }

    /// Creates a failed error with the given reason.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

    /// Creates a file error for the given path.
    pub fn file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::File {
            path: path.into(),
            source,
        }
    }
}
