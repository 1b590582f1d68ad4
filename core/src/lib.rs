//! The log-shipping CORE: structured log records are encoded to CLP IR,
//! streamed through Zstd, buffered (in memory or on disk), and uploaded as
//! discrete objects to an S3-compatible object store.

pub mod config;
pub mod error;
pub mod event;
pub mod ir;
pub mod recovery;
pub mod registry;
pub mod stream;
pub mod trigger;
pub mod uploader;

pub use config::{Config, Variant};
pub use error::{CoreError, ExitCode, Result};
pub use event::{LogEvent, StreamKey};
pub use registry::Registry;
