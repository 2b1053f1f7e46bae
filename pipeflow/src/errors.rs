//! Error types for pipeflow.
//!
//! Stage errors travel through compositions unchanged. Only the process
//! adapter adds context, and only for stream plumbing failures, which are
//! tagged with the stream they happened on.

use std::fmt;
use std::process::ExitStatus;
use std::sync::Arc;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PipeError>;

/// Why a cancellation scope fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cause {
    /// The scope (or one of its ancestors) was cancelled explicitly.
    Canceled,
    /// The scope's deadline (or an ancestor's) passed.
    DeadlineExceeded,
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Canceled => f.write_str("operation cancelled"),
            Self::DeadlineExceeded => f.write_str("deadline exceeded"),
        }
    }
}

/// The standard stream a plumbing error occurred on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// Standard input.
    Stdin,
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdin => f.write_str("stdin"),
            Self::Stdout => f.write_str("stdout"),
            Self::Stderr => f.write_str("stderr"),
        }
    }
}

/// The main error type for pipeline execution.
#[derive(Debug, Error)]
pub enum PipeError {
    /// The session's cancellation scope fired.
    #[error("{0}")]
    Cancelled(Cause),

    /// Copying between a session stream and a process pipe failed.
    #[error("{stream}: {source}")]
    Stream {
        /// Which stream the copy worker was serving.
        stream: StreamKind,
        /// The underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The external program could not be started.
    #[error("{program}: {source}")]
    Spawn {
        /// The program name as given to the stage.
        program: String,
        /// The spawn failure.
        #[source]
        source: std::io::Error,
    },

    /// The external program ran but did not exit successfully.
    #[error("{program}: {status}")]
    Exit {
        /// The program name as given to the stage.
        program: String,
        /// The exit status reported by the OS.
        status: ExitStatus,
    },

    /// A stream read or write failed inside a stage.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failed.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// A regular expression failed to compile.
    #[error(transparent)]
    Regex(#[from] regex::Error),

    /// Base64 input was malformed.
    #[error(transparent)]
    Base64(#[from] base64::DecodeError),

    /// A stage task panicked.
    #[error("stage panicked: {0}")]
    Panicked(String),

    /// An error supplied by the caller, kept behind an `Arc` so it can be
    /// returned repeatedly and compared by identity.
    #[error(transparent)]
    Custom(Arc<dyn std::error::Error + Send + Sync>),
}

impl PipeError {
    /// Wraps an arbitrary error as [`PipeError::Custom`].
    pub fn custom<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(err))
    }

    /// Creates a [`PipeError::Custom`] carrying only a message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::custom(Message(message.into()))
    }

    /// Tags an I/O error with the stream it happened on.
    #[must_use]
    pub fn stream(stream: StreamKind, source: std::io::Error) -> Self {
        Self::Stream { stream, source }
    }

    /// Returns the cancellation cause if this error came from a fired scope.
    #[must_use]
    pub fn cancel_cause(&self) -> Option<Cause> {
        match self {
            Self::Cancelled(cause) => Some(*cause),
            _ => None,
        }
    }

    /// Returns true if this error came from a fired scope.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_cause().is_some()
    }

    /// Returns the exit code for [`PipeError::Exit`], when the OS reported one.
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Exit { status, .. } => status.code(),
            _ => None,
        }
    }
}

impl From<Cause> for PipeError {
    fn from(cause: Cause) -> Self {
        Self::Cancelled(cause)
    }
}

/// Plain message error backing [`PipeError::msg`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct Message(pub String);

/// Failure returned by [`crate::output`] and [`crate::combined_output`].
///
/// Output written before the failure is not rolled back, so it is handed
/// back alongside the error.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct OutputError {
    /// Bytes captured before the pipeline failed.
    pub output: Vec<u8>,
    /// The pipeline failure.
    #[source]
    pub error: PipeError,
}

impl OutputError {
    /// Splits the error into the partial output and the pipeline failure.
    #[must_use]
    pub fn into_parts(self) -> (Vec<u8>, PipeError) {
        (self.output, self.error)
    }
}

impl From<OutputError> for PipeError {
    fn from(err: OutputError) -> Self {
        err.error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_stream_error_is_tagged() {
        let err = PipeError::stream(
            StreamKind::Stdin,
            io::Error::new(io::ErrorKind::Other, "boom"),
        );
        assert_eq!(err.to_string(), "stdin: boom");

        let err = PipeError::stream(
            StreamKind::Stderr,
            io::Error::new(io::ErrorKind::Other, "gone"),
        );
        assert_eq!(err.to_string(), "stderr: gone");
    }

    #[test]
    fn test_cancelled_error() {
        let err = PipeError::from(Cause::DeadlineExceeded);
        assert!(err.is_cancelled());
        assert_eq!(err.cancel_cause(), Some(Cause::DeadlineExceeded));
        assert_eq!(err.to_string(), "deadline exceeded");

        let err = PipeError::msg("nope");
        assert!(!err.is_cancelled());
        assert_eq!(err.to_string(), "nope");
    }

    #[test]
    fn test_io_error_is_transparent() {
        let err = PipeError::from(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"));
        assert_eq!(err.to_string(), "pipe closed");
    }

    #[test]
    fn test_custom_error_downcasts() {
        let err = PipeError::msg("custom");
        match err {
            PipeError::Custom(inner) => {
                let message = inner.downcast_ref::<Message>();
                assert_eq!(message, Some(&Message("custom".to_string())));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_output_error_parts() {
        let err = OutputError {
            output: b"partial".to_vec(),
            error: PipeError::Cancelled(Cause::Canceled),
        };
        assert_eq!(err.to_string(), "operation cancelled");
        let (output, error) = err.into_parts();
        assert_eq!(output, b"partial");
        assert!(error.is_cancelled());
    }
}
