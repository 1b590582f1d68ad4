//! A kind-tagged error type, in the spirit of `tonic::Code`: every error
//! carries a coarse [`ErrorKind`] plus an optional message and an optional
//! source, so callers can match on kind without downcasting.

use std::fmt;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    Cancelled,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    Unauthenticated,
    OutOfRange,
    Unavailable,
    DataLoss,
    Io,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::InvalidArgument => "invalid argument",
            ErrorKind::DeadlineExceeded => "deadline exceeded",
            ErrorKind::NotFound => "not found",
            ErrorKind::AlreadyExists => "already exists",
            ErrorKind::PermissionDenied => "permission denied",
            ErrorKind::Unauthenticated => "unauthenticated",
            ErrorKind::OutOfRange => "out of range",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::DataLoss => "data loss",
            ErrorKind::Io => "I/O error",
            ErrorKind::Internal => "internal error",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
pub struct Error {
    pub kind: ErrorKind,
    pub msg: Option<String>,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl Error {
    pub fn builder(kind: ErrorKind) -> ErrorBuilder {
        ErrorBuilder(Error {
            kind,
            msg: None,
            source: None,
        })
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Formats the full source chain, one cause per line.
    pub fn chain(&self) -> String {
        let mut out = self.to_string();
        let mut cur: Option<&(dyn std::error::Error + 'static)> = std::error::Error::source(self);
        while let Some(e) = cur {
            out.push_str("\ncaused by: ");
            out.push_str(&e.to_string());
            cur = e.source();
        }
        out
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.msg {
            Some(m) => write!(f, "{}: {}", self.kind, m),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::builder(ErrorKind::Io).source(e).build()
    }
}

pub struct ErrorBuilder(Error);

impl ErrorBuilder {
    pub fn msg(mut self, args: fmt::Arguments) -> Self {
        self.0.msg = Some(fmt::format(args));
        self
    }

    pub fn source<E>(mut self, source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        self.0.source = Some(source.into());
        self
    }

    pub fn build(self) -> Error {
        self.0
    }
}

/// Constructs an [`Error`]. Used as `err!(Kind)`, `err!(Kind, msg("..."))`,
/// or `err!(Kind, source(e))`.
#[macro_export]
macro_rules! err {
    ($kind:ident, msg($($args:tt)+)) => {
        $crate::Error::builder($crate::ErrorKind::$kind).msg(format_args!($($args)+)).build()
    };
    ($kind:ident, source($src:expr)) => {
        $crate::Error::builder($crate::ErrorKind::$kind).source($src).build()
    };
    ($kind:ident) => {
        $crate::Error::builder($crate::ErrorKind::$kind).build()
    };
}

/// `return Err(err!(...))`.
#[macro_export]
macro_rules! bail {
    ($($args:tt)+) => {
        return Err($crate::err!($($args)+))
    };
}

pub trait ResultExt<T> {
    /// Attaches `kind` to any error, preserving it as the source.
    fn err_kind(self, kind: ErrorKind) -> Result<T, Error>;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn err_kind(self, kind: ErrorKind) -> Result<T, Error> {
        self.map_err(|e| Error::builder(kind).source(e).build())
    }
}
