pub mod clock;
mod error;
pub mod shutdown;
pub mod tracing_setup;

pub use crate::error::{Error, ErrorBuilder, ErrorKind, ResultExt};

pub type FastHashMap<K, V> = std::collections::HashMap<K, V, ahash::RandomState>;
pub type FastHashSet<K> = std::collections::HashSet<K, ahash::RandomState>;

pub use parking_lot::{Condvar, Mutex, MutexGuard};
