//! The Stream Manager (L2, §4.4): owns one Writer plus trigger state for a
//! single stream key, and drives uploads.

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use base::clock::Clocks;
use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::config::{Config, TriggerConfig};
use crate::error::Result;
use crate::event::{LogEvent, StreamKey};
use crate::ir::Writer;
use crate::trigger::{DualTimerState, Level, SizePolicy};
use crate::uploader::Uploader;

enum Policy {
    Size(SizePolicy),
    DualTimer {
        state: Mutex<DualTimerState>,
        log_level_key: String,
    },
}

/// Owns the Writer and trigger state for one logical stream. Ingest and
/// upload are serialized by `lock`: at most one `upload_to_store()` runs at
/// a time per stream (I6).
pub struct StreamManager {
    tag: StreamKey,
    index: std::sync::atomic::AtomicU64,
    lock: tokio::sync::Mutex<Writer>,
    policy: Policy,
}

impl StreamManager {
    pub fn new(tag: StreamKey, writer: Writer, cfg: &Config) -> Self {
        let policy = match &cfg.trigger {
            TriggerConfig::Size { upload_size_mb } => {
                Policy::Size(SizePolicy::new(*upload_size_mb, writer.is_memory_backed()))
            }
            TriggerConfig::DualTimer {
                hard_delta,
                soft_delta,
                log_level_key,
            } => Policy::DualTimer {
                state: Mutex::new(DualTimerState::new(hard_delta.clone(), soft_delta.clone())),
                log_level_key: log_level_key.clone(),
            },
        };
        StreamManager {
            tag,
            index: std::sync::atomic::AtomicU64::new(0),
            lock: tokio::sync::Mutex::new(writer),
            policy,
        }
    }

    pub fn tag(&self) -> &StreamKey {
        &self.tag
    }

    pub fn index(&self) -> u64 {
        self.index.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Writes `events` through the writer and, for the size policy, fires
    /// the upload inline when the threshold is met. For the dual-timer
    /// policy, only the deadline bookkeeping happens here; actual firing is
    /// driven by [`StreamManager::run_timers`].
    #[instrument(skip_all, fields(tag = %self.tag))]
    pub async fn ingest(
        self: &Arc<Self>,
        events: &[LogEvent],
        clocks: &dyn Clocks,
        cfg: &Config,
        uploader: &dyn Uploader,
    ) -> Result<usize> {
        if events.is_empty() {
            return Ok(0);
        }
        let mut guard = self.lock.lock().await;
        let (written, err) = guard.write(events);

        match &self.policy {
            Policy::Size(policy) => {
                let size = guard.compressed_output_size()?;
                if policy.should_fire(size) {
                    drop(guard);
                    self.upload_to_store(cfg, uploader).await?;
                }
            }
            Policy::DualTimer { state, log_level_key } => {
                drop(guard);
                let mut hard_deadline_changed = None;
                let mut soft_deadline = clocks.monotonic();
                {
                    let mut state = state.lock();
                    for event in events {
                        let level = Level::of_event(event, log_level_key);
                        let ts = clocks.instant_for_timestamp_ms(event.timestamp_ms);
                        let (hard, soft) = state.record_event(ts, level);
                        if hard.is_some() {
                            hard_deadline_changed = hard;
                        }
                        soft_deadline = soft;
                    }
                }
                if let Some(deadline) = hard_deadline_changed {
                    debug!(?deadline, "hard deadline tightened");
                }
                debug!(?soft_deadline, "soft timer rearmed");
            }
        }

        if let Some(e) = err {
            return Err(e);
        }
        Ok(written)
    }

    /// Runs the hard/soft timers for the dual-timer policy until shutdown.
    /// No-op for the size policy (there are no timers).
    pub async fn run_timers(
        self: Arc<Self>,
        clocks: Arc<dyn Clocks>,
        cfg: Config,
        uploader: Arc<dyn Uploader>,
        mut shutdown: base::shutdown::Receiver,
    ) {
        let Policy::DualTimer { .. } = &self.policy else {
            return;
        };
        loop {
            let sleep_for = {
                let Policy::DualTimer { state, .. } = &self.policy else {
                    unreachable!()
                };
                let state = state.lock();
                let now = clocks.monotonic();
                match (state.hard_deadline(), state.soft_deadline()) {
                    (None, None) => Duration::from_secs(3600),
                    (Some(h), None) => h.saturating_duration_since(now),
                    (None, Some(s)) => s.saturating_duration_since(now),
                    (Some(h), Some(s)) => h.min(s).saturating_duration_since(now),
                }
            };

            tokio::select! {
                _ = clocks.sleep(sleep_for) => {
                    if let Err(e) = self.upload_to_store(&cfg, uploader.as_ref()).await {
                        warn!(tag = %self.tag, error = %e, "timer-triggered upload failed");
                    }
                }
                _ = shutdown.recv() => {
                    return;
                }
            }
        }
    }

    /// Closes the stream, constructs the object key/tag, uploads the
    /// compressed output, and on success advances `index` and resets the
    /// writer (§4.4).
    #[instrument(skip_all, fields(tag = %self.tag, index = self.index()))]
    pub async fn upload_to_store(&self, cfg: &Config, uploader: &dyn Uploader) -> Result<()> {
        let mut guard = self.lock.lock().await;
        if guard.is_empty() {
            return Ok(());
        }
        guard.close_streams()?;

        let index = self.index.load(std::sync::atomic::Ordering::SeqCst);
        let key = crate::uploader::object_key(cfg, &self.tag, index, &cfg.id);
        let tag = crate::uploader::object_tag(&self.tag);

        let mut body = Vec::new();
        guard.compressed_output()?.read_to_end(&mut body)?;

        let upload_result = uploader.upload(&key, body, &tag).await;
        match upload_result {
            Ok(location) => {
                let decoded = crate::uploader::url_decode(&location);
                info!(%key, location = %decoded, "uploaded stream object");
                guard.reset()?;
                self.index.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                if let Policy::DualTimer { state, .. } = &self.policy {
                    state.lock().clear();
                }
                Ok(())
            }
            Err(e) => {
                // Writer remains StreamsClosed; caller must reset() before
                // writing again (§4.4 step 5).
                Err(e)
            }
        }
    }

    /// Best-effort final upload, then final teardown (§4.4 `close`).
    pub async fn close(&self, cfg: &Config, uploader: &dyn Uploader) {
        if let Err(e) = self.upload_to_store(cfg, uploader).await {
            warn!(tag = %self.tag, error = %e, "best-effort close upload failed");
        }
        let mut guard = self.lock.lock().await;
        guard.close();
    }
}
