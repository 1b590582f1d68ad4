//! Recovery (L6, §4.6): at startup, scans the disk-buffer directories,
//! pairs IR/Zstd files by stream key, validates them, uploads non-empty
//! survivors, and removes empties.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use base::FastHashSet;
use tracing::{info, warn};

use crate::error::{CoreError, Result};
use crate::event::StreamKey;
use crate::ir::{DiskWriter, Writer};
use crate::registry::Registry;
use crate::stream::StreamManager;
use crate::uploader::Uploader;

fn stems(dir: &Path, ext: &str) -> Result<FastHashSet<String>> {
    let mut out = FastHashSet::default();
    if !dir.is_dir() {
        return Ok(out);
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some(ext) {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                out.insert(stem.to_string());
            }
        }
    }
    Ok(out)
}

/// Scans `<disk_buffer_path>/ir/*.ir` and `<disk_buffer_path>/zstd/*.zst`,
/// recovering and uploading every matched pair before the registry accepts
/// new writes.
pub async fn recover(registry: &Arc<Registry>, uploader: &dyn Uploader) -> Result<usize> {
    let cfg = registry.config();
    if !cfg.use_disk_buffer {
        return Ok(0);
    }
    let ir_dir = cfg.disk_buffer_path.join("ir");
    let zstd_dir = cfg.disk_buffer_path.join("zstd");

    let ir_stems = stems(&ir_dir, "ir")?;
    let zstd_stems = stems(&zstd_dir, "zst")?;

    if ir_stems != zstd_stems {
        let ir_only: BTreeSet<_> = ir_stems.difference(&zstd_stems).cloned().collect();
        let zstd_only: BTreeSet<_> = zstd_stems.difference(&ir_stems).cloned().collect();
        return Err(CoreError::IOError(std::io::Error::other(format!(
            "disk-buffer recovery mismatch: ir-only={ir_only:?} zstd-only={zstd_only:?}"
        ))));
    }

    let mut recovered = 0;
    for stem in ir_stems {
        let tag = StreamKey::new(stem.clone())
            .map_err(|_| CoreError::IOError(std::io::Error::other("empty stream key on disk")))?;
        let ir_path = ir_dir.join(format!("{stem}.ir"));
        let zstd_path = zstd_dir.join(format!("{stem}.zst"));

        let ir_empty = std::fs::metadata(&ir_path)?.len() == 0;
        let zstd_empty = std::fs::metadata(&zstd_path)?.len() == 0;
        if ir_empty && zstd_empty {
            std::fs::remove_file(&ir_path)?;
            std::fs::remove_file(&zstd_path)?;
            continue;
        }

        let writer = DiskWriter::open_existing(ir_path, zstd_path)?;
        let manager = Arc::new(StreamManager::new(tag.clone(), Writer::Disk(writer), cfg));
        if let Err(e) = manager.upload_to_store(cfg, uploader).await {
            warn!(tag = %tag, error = %e, "recovery upload failed, will retry on next startup");
            continue;
        }
        registry.insert_recovered(tag.clone(), manager);
        info!(tag = %tag, "recovered and uploaded disk-buffered stream");
        recovered += 1;
    }
    Ok(recovered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, Variant};
    use crate::ir::decode_events_for_test;
    use base::FastHashMap;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    struct MockUploader {
        calls: Mutex<Vec<(String, Vec<u8>, String)>>,
    }

    impl MockUploader {
        fn new() -> Self {
            MockUploader {
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl Uploader for MockUploader {
        async fn upload(&self, key: &str, body: Vec<u8>, tag: &str) -> Result<String> {
            self.calls
                .lock()
                .push((key.to_string(), body, tag.to_string()));
            Ok(format!("s3://mock/{key}"))
        }
    }

    fn event(i: i64, payload: &str) -> crate::event::LogEvent {
        let mut fields = FastHashMap::default();
        fields.insert("log".to_string(), serde_json::json!(payload));
        crate::event::LogEvent::new(i, fields)
    }

    fn disk_cfg(dir: &Path) -> Config {
        let opts: HashMap<String, String> = [
            ("s3_bucket".to_string(), "b".to_string()),
            ("use_disk_buffer".to_string(), "true".to_string()),
            (
                "disk_buffer_path".to_string(),
                dir.to_string_lossy().into_owned(),
            ),
            ("upload_size_mb".to_string(), "999".to_string()),
        ]
        .into_iter()
        .collect();
        Config::from_options(&opts, Variant::SizeBased).unwrap()
    }

    /// S2 (size policy, disk, crash): ~3 MiB of IR ingested across several
    /// batches — enough to cross the compaction threshold at least once —
    /// then an ungraceful shutdown (no `close_streams`), must recover on
    /// restart as exactly one upload containing every event ingested before
    /// the crash, at index 0.
    #[tokio::test]
    async fn s2_disk_buffer_survives_crash_and_recovers_as_one_upload() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = disk_cfg(dir.path());
        let tag = StreamKey::new("T").unwrap();

        let big = "x".repeat(64 * 1024);
        let mut expected = Vec::new();
        let (ir_path, zstd_path) = crate::registry::disk_paths(&cfg.disk_buffer_path, &tag);
        {
            let mut w = DiskWriter::create_new(ir_path.clone(), zstd_path.clone()).unwrap();
            for batch_start in (0..48i64).step_by(8) {
                let batch: Vec<_> = (batch_start..batch_start + 8)
                    .map(|i| event(i, &big))
                    .collect();
                let (n, err) = w.write(&batch);
                assert_eq!(n, 8);
                assert!(err.is_none());
                expected.extend(batch);
            }
            // Simulate SIGKILL: drop without close_streams().
            w.close();
        }
        assert!(
            std::fs::metadata(&zstd_path).unwrap().len() > 0,
            "3 MiB of IR must have forced at least one compaction before the crash"
        );

        let registry = Arc::new(Registry::new(cfg.clone()).unwrap());
        let uploader = MockUploader::new();
        let n = recover(&registry, &uploader).await.unwrap();
        assert_eq!(n, 1, "exactly one recovered stream");

        let calls = uploader.calls.lock();
        assert_eq!(calls.len(), 1, "recovery must upload exactly one object");
        let (key, body, _tag_header) = &calls[0];
        assert!(
            key.starts_with("logs/T_0_"),
            "recovered object must be uploaded at index 0, got {key:?}"
        );

        let decompressed = zstd::decode_all(&body[..]).unwrap();
        assert_eq!(decode_events_for_test(&decompressed), expected);

        let streams = registry.streams();
        assert_eq!(streams.len(), 1);
        assert_eq!(
            streams[0].index(),
            1,
            "index advances past 0 once the recovered upload succeeds"
        );
    }

    #[tokio::test]
    async fn recover_is_a_noop_without_disk_buffering() {
        let opts: HashMap<String, String> =
            [("s3_bucket".to_string(), "b".to_string())].into_iter().collect();
        let cfg = Config::from_options(&opts, Variant::SizeBased).unwrap();
        let registry = Arc::new(Registry::new(cfg).unwrap());
        let uploader = MockUploader::new();
        assert_eq!(recover(&registry, &uploader).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn recover_removes_empty_pairs_without_uploading() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = disk_cfg(dir.path());
        let tag = StreamKey::new("Empty").unwrap();
        let (ir_path, zstd_path) = crate::registry::disk_paths(&cfg.disk_buffer_path, &tag);
        {
            let mut w = DiskWriter::create_new(ir_path.clone(), zstd_path.clone()).unwrap();
            w.close();
        }
        assert!(ir_path.exists());
        assert!(zstd_path.exists());

        let registry = Arc::new(Registry::new(cfg).unwrap());
        let uploader = MockUploader::new();
        let n = recover(&registry, &uploader).await.unwrap();
        assert_eq!(n, 0);
        assert!(uploader.calls.lock().is_empty());
        assert!(!ir_path.exists());
        assert!(!zstd_path.exists());
    }
}
