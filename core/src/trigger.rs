//! Flush-trigger policies (L3, §4.2/§4.3): decide when `uploadToStore()`
//! fires. The size policy is a pure predicate evaluated inline; the
//! dual-timer policy carries per-stream deadline state updated on every
//! ingest and consulted by two scheduled timers.

use std::time::Duration;

use base::clock::Instant;

use crate::config::LevelDurations;
use crate::event::LogEvent;

/// One of the five severities the dual-timer policy keys its deltas on.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl Level {
    /// Maps a textual level value to one of the five levels. Unknown or
    /// absent values default to `Info`; `trace`/`TRACE` maps to `Debug`'s
    /// deltas, as do unrecognized words that merely look debug-ish.
    pub fn parse(raw: &str) -> Level {
        match raw {
            "trace" | "TRACE" | "debug" | "DEBUG" | "D" => Level::Debug,
            "info" | "INFO" | "I" => Level::Info,
            "warn" | "warning" | "WARN" | "WARNING" | "W" => Level::Warn,
            "error" | "critical" | "ERROR" | "CRITICAL" | "E" => Level::Error,
            "fatal" | "wtf" | "FATAL" => Level::Fatal,
            _ => Level::Info,
        }
    }

    /// Extracts the level of an event from the configured level key,
    /// defaulting to `Info` when the key is absent or not a recognized
    /// string value.
    pub fn of_event(event: &LogEvent, log_level_key: &str) -> Level {
        match event.field(log_level_key).and_then(|v| v.as_str()) {
            Some(s) => Level::parse(s),
            None => Level::Info,
        }
    }
}

/// Whether a batch just written should trigger an upload, and if so why
/// (purely informational; both reasons invoke the same `uploadToStore()`).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Fire {
    No,
    Size,
    Hard,
    Soft,
}

/// The size-based predicate (§4.2): fires once compressed output reaches
/// `upload_size_mb`. Memory-backed streams fire unconditionally after every
/// write, since buffering without durability buys nothing.
#[derive(Copy, Clone, Debug)]
pub struct SizePolicy {
    pub threshold_bytes: u64,
    pub memory_backed: bool,
}

impl SizePolicy {
    pub fn new(upload_size_mb: u32, memory_backed: bool) -> Self {
        SizePolicy {
            threshold_bytes: u64::from(upload_size_mb) << 20,
            memory_backed,
        }
    }

    pub fn should_fire(&self, compressed_size: u64) -> bool {
        self.memory_backed || compressed_size >= self.threshold_bytes
    }
}

/// Per-stream state for the dual-timer level-sensitive policy (§4.3).
///
/// `hard_deadline` only ever moves earlier between uploads (I5): once a
/// stricter deadline has been recorded, later, looser events cannot relax
/// it. The soft *delta* likewise only ever tightens, but the soft
/// *deadline* is an absolute point in time rearmed from each event's own
/// `ts` (its `timestamp_ms`, mapped into the `Instant` domain by the
/// caller), so it keeps receding into the future as long as events keep
/// arriving with recent timestamps, using whatever the tightest delta seen
/// so far is.
pub struct DualTimerState {
    hard_delta: LevelDurations,
    soft_delta_cfg: LevelDurations,
    hard_deadline: Option<Instant>,
    soft_delta: Option<Duration>,
    soft_deadline: Option<Instant>,
}

impl DualTimerState {
    pub fn new(hard_delta: LevelDurations, soft_delta_cfg: LevelDurations) -> Self {
        DualTimerState {
            hard_delta,
            soft_delta_cfg,
            hard_deadline: None,
            soft_delta: None,
            soft_deadline: None,
        }
    }

    /// Updates deadline state for one event with timestamp `ts` (§4.3: "On
    /// each event with ts = event time"), returning the new hard deadline
    /// (for arming/re-arming the hard timer), if it changed, and the new
    /// soft deadline (always rearmed).
    pub fn record_event(&mut self, ts: Instant, level: Level) -> (Option<Instant>, Instant) {
        let new_hard = ts + self.hard_delta.get(level);
        let hard_changed = match self.hard_deadline {
            None => true,
            Some(existing) => new_hard < existing,
        };
        if hard_changed {
            self.hard_deadline = Some(new_hard);
        }

        let level_soft = self.soft_delta_cfg.get(level);
        let soft_delta = match self.soft_delta {
            Some(existing) => existing.min(level_soft),
            None => level_soft,
        };
        self.soft_delta = Some(soft_delta);
        let soft_deadline = ts + soft_delta;
        self.soft_deadline = Some(soft_deadline);

        (
            if hard_changed { self.hard_deadline } else { None },
            soft_deadline,
        )
    }

    pub fn soft_deadline(&self) -> Option<Instant> {
        self.soft_deadline
    }

    /// Clears both deadlines after a successful upload (§4.3 "Firing").
    pub fn clear(&mut self) {
        self.hard_deadline = None;
        self.soft_delta = None;
        self.soft_deadline = None;
    }

    pub fn hard_deadline(&self) -> Option<Instant> {
        self.hard_deadline
    }
}
