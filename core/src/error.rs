//! CORE-specific error kinds, layered over [`base::Error`] for anything
//! that comes from a lower-level collaborator.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("bucket inaccessible: {0}")]
    BucketInaccessible(String),

    #[error("malformed record stream: {0}")]
    DecodeError(String),

    #[error("IR encode error: {0}")]
    EncodeError(String),

    #[error("disk buffer I/O error")]
    IOError(#[source] std::io::Error),

    #[error("upload failed: {0}")]
    UploadError(String),

    #[error("reset() called on a writer with a non-empty IR buffer")]
    IrBufferNotEmpty,

    #[error("disk buffer path {0:?} is already bound by another instance")]
    PathCollision(PathBuf),
}

impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        CoreError::IOError(e)
    }
}

impl From<base::Error> for CoreError {
    fn from(e: base::Error) -> Self {
        use base::ErrorKind;
        match e.kind() {
            ErrorKind::Io => CoreError::IOError(std::io::Error::other(e)),
            ErrorKind::InvalidArgument => CoreError::ConfigInvalid(e.to_string()),
            _ => CoreError::UploadError(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

/// What the CORE reports to the host collector for a flush call (§6).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ExitCode {
    /// The batch was accepted.
    Ok,
    /// Transient failure; the collector should re-deliver the batch.
    Retry,
    /// Permanent failure for this batch.
    Error,
}

impl CoreError {
    /// Maps an error to the exit code reported for the current flush batch,
    /// per §7's propagation policy. Errors that fail startup (ConfigInvalid,
    /// BucketInaccessible, PathCollision) are not meant to reach this path;
    /// callers should have already bailed out during startup.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            CoreError::UploadError(_) => ExitCode::Retry,
            CoreError::ConfigInvalid(_)
            | CoreError::BucketInaccessible(_)
            | CoreError::PathCollision(_) => ExitCode::Error,
            CoreError::DecodeError(_)
            | CoreError::EncodeError(_)
            | CoreError::IOError(_)
            | CoreError::IrBufferNotEmpty => ExitCode::Error,
        }
    }
}
