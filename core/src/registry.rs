//! The Stream Registry (L4, §4.5): a map from stream key to StreamManager,
//! created lazily, plus the process-wide guard (§5, §9) against two
//! instances binding to the same disk-buffer directory.

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use base::FastHashSet;
use parking_lot::Mutex;

use crate::config::Config;
use crate::error::{CoreError, Result};
use crate::event::StreamKey;
use crate::ir::{DiskWriter, Writer};
use crate::stream::StreamManager;

/// Process-wide set of absolute disk-buffer paths already bound by a
/// registry in this process. The only process-wide mutable state in the
/// CORE (§5, §9); initialized lazily, never re-entered.
static BOUND_PATHS: LazyLock<Mutex<FastHashSet<PathBuf>>> =
    LazyLock::new(|| Mutex::new(FastHashSet::default()));

struct PathGuard(PathBuf);

impl PathGuard {
    fn bind(path: &Path) -> Result<Self> {
        let abs = std::fs::canonicalize(path)
            .unwrap_or_else(|_| path.to_path_buf());
        let mut bound = BOUND_PATHS.lock();
        if !bound.insert(abs.clone()) {
            return Err(CoreError::PathCollision(abs));
        }
        Ok(PathGuard(abs))
    }
}

impl Drop for PathGuard {
    fn drop(&mut self) {
        BOUND_PATHS.lock().remove(&self.0);
    }
}

pub struct Registry {
    cfg: Config,
    streams: Mutex<base::FastHashMap<StreamKey, Arc<StreamManager>>>,
    _path_guard: Option<PathGuard>,
}

impl Registry {
    /// Creates an empty registry. Binds the disk-buffer path, if disk
    /// buffering is enabled, rejecting a second instance on the same path
    /// with `PathCollision` (S6).
    pub fn new(cfg: Config) -> Result<Self> {
        let path_guard = if cfg.use_disk_buffer {
            std::fs::create_dir_all(&cfg.disk_buffer_path)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(
                    &cfg.disk_buffer_path,
                    std::fs::Permissions::from_mode(0o750),
                )?;
            }
            Some(PathGuard::bind(&cfg.disk_buffer_path)?)
        } else {
            None
        };
        Ok(Registry {
            cfg,
            streams: Mutex::new(base::FastHashMap::default()),
            _path_guard: path_guard,
        })
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Returns the existing stream manager for `tag`, or creates one lazily
    /// with a fresh Writer.
    pub fn get_or_create(self: &Arc<Self>, tag: StreamKey) -> Result<Arc<StreamManager>> {
        if let Some(existing) = self.streams.lock().get(&tag) {
            return Ok(existing.clone());
        }
        let writer = self.new_writer(&tag)?;
        let manager = Arc::new(StreamManager::new(tag.clone(), writer, &self.cfg));
        let mut streams = self.streams.lock();
        // Re-check under the lock in case of a concurrent creator.
        Ok(streams.entry(tag).or_insert(manager).clone())
    }

    /// Inserts a manager constructed by recovery (§4.6), which must not be
    /// re-created by a subsequent `get_or_create`.
    pub fn insert_recovered(&self, tag: StreamKey, manager: Arc<StreamManager>) {
        self.streams.lock().insert(tag, manager);
    }

    pub fn streams(&self) -> Vec<Arc<StreamManager>> {
        self.streams.lock().values().cloned().collect()
    }

    fn new_writer(&self, tag: &StreamKey) -> Result<Writer> {
        if self.cfg.use_disk_buffer {
            let (ir_path, zstd_path) = disk_paths(&self.cfg.disk_buffer_path, tag);
            Ok(Writer::Disk(DiskWriter::create_new(ir_path, zstd_path)?))
        } else {
            Ok(Writer::Memory(crate::ir::MemoryWriter::new()?))
        }
    }
}

pub fn disk_paths(root: &Path, tag: &StreamKey) -> (PathBuf, PathBuf) {
    (
        root.join("ir").join(format!("{tag}.ir")),
        root.join("zstd").join(format!("{tag}.zst")),
    )
}
