//! The recognized configuration options (§6), as a compile-time enumerated
//! struct with a small type-directed parser per option rather than runtime
//! reflection over a plugin config object.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::CoreError;
use crate::trigger::Level;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Variant {
    /// Upload fires once compressed output crosses a size threshold.
    SizeBased,
    /// Upload fires on a per-stream hard/soft level-sensitive timer.
    TimeBased,
}

#[derive(Clone, Debug)]
pub struct LevelDurations {
    pub debug: Duration,
    pub info: Duration,
    pub warn: Duration,
    pub error: Duration,
    pub fatal: Duration,
}

impl LevelDurations {
    pub fn get(&self, level: Level) -> Duration {
        match level {
            Level::Debug => self.debug,
            Level::Info => self.info,
            Level::Warn => self.warn,
            Level::Error => self.error,
            Level::Fatal => self.fatal,
        }
    }

    fn default_all(d: Duration) -> Self {
        LevelDurations {
            debug: d,
            info: d,
            warn: d,
            error: d,
            fatal: d,
        }
    }
}

#[derive(Clone, Debug)]
pub enum TriggerConfig {
    Size { upload_size_mb: u32 },
    DualTimer {
        hard_delta: LevelDurations,
        soft_delta: LevelDurations,
        log_level_key: String,
    },
}

#[derive(Clone, Debug)]
pub struct Config {
    pub s3_bucket: String,
    pub s3_region: String,
    pub s3_bucket_prefix: String,
    pub role_arn: Option<String>,
    pub id: String,
    pub use_disk_buffer: bool,
    pub disk_buffer_path: PathBuf,
    pub trigger: TriggerConfig,
    pub use_single_key: bool,
    pub single_key: String,
    pub allow_missing_key: bool,
    pub time_zone: String,
}

impl Config {
    /// Parses configuration from a `key -> value` map, as supplied by the
    /// host collector's plugin options (the fluent-bit convention). Loading
    /// and validating this map from the environment/config file is an
    /// external collaborator's job; this is the type-directed parser the
    /// collaborator's frozen struct is built from.
    pub fn from_options(
        opts: &HashMap<String, String>,
        variant: Variant,
    ) -> Result<Config, CoreError> {
        let s3_bucket = require(opts, "s3_bucket")?;
        let default_region = match variant {
            Variant::SizeBased => "us-east-1",
            Variant::TimeBased => "us-west-1",
        };
        let s3_region = opt_str(opts, "s3_region", default_region);
        let s3_bucket_prefix = opt_str(opts, "s3_bucket_prefix", "logs/");
        let role_arn = opts.get("role_arn").cloned();
        if let Some(arn) = &role_arn {
            if !arn.starts_with("arn:aws:iam") {
                return Err(CoreError::ConfigInvalid(format!(
                    "role_arn {arn:?} must start with \"arn:aws:iam\""
                )));
            }
        }
        let id = opts
            .get("id")
            .cloned()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let use_disk_buffer = opt_bool(opts, "use_disk_buffer", true)?;
        let disk_buffer_path = PathBuf::from(opt_str(opts, "disk_buffer_path", "tmp/out_clp_s3/"));

        let trigger = match variant {
            Variant::SizeBased => {
                let upload_size_mb = opt_u32(opts, "upload_size_mb", 16)?;
                if !(2..1000).contains(&upload_size_mb) {
                    return Err(CoreError::ConfigInvalid(format!(
                        "upload_size_mb must be in [2, 1000), got {upload_size_mb}"
                    )));
                }
                TriggerConfig::Size { upload_size_mb }
            }
            Variant::TimeBased => {
                let log_level_key = opt_str(opts, "log_level_key", "level");
                let hard_delta = level_durations(opts, "flush_hard_delta", Duration::from_secs(3))?;
                let soft_delta = level_durations(opts, "flush_soft_delta", Duration::from_secs(3))?;
                TriggerConfig::DualTimer {
                    hard_delta,
                    soft_delta,
                    log_level_key,
                }
            }
        };

        let use_single_key = opt_bool(opts, "use_single_key", true)?;
        let single_key = opt_str(opts, "single_key", "log");
        let allow_missing_key = opt_bool(opts, "allow_missing_key", true)?;
        let time_zone = opt_str(opts, "time_zone", "America/Toronto");

        Ok(Config {
            s3_bucket,
            s3_region,
            s3_bucket_prefix,
            role_arn,
            id,
            use_disk_buffer,
            disk_buffer_path,
            trigger,
            use_single_key,
            single_key,
            allow_missing_key,
            time_zone,
        })
    }

    /// Builds a `Config` directly from the process environment, using the
    /// same option names as the table in §6 (upper-cased, as env vars).
    pub fn from_env(variant: Variant) -> Result<Config, CoreError> {
        const KEYS: &[&str] = &[
            "s3_bucket",
            "s3_region",
            "s3_bucket_prefix",
            "role_arn",
            "id",
            "use_disk_buffer",
            "disk_buffer_path",
            "upload_size_mb",
            "use_single_key",
            "single_key",
            "allow_missing_key",
            "time_zone",
            "log_level_key",
            "flush_hard_delta_debug",
            "flush_hard_delta_info",
            "flush_hard_delta_warn",
            "flush_hard_delta_error",
            "flush_hard_delta_fatal",
            "flush_soft_delta_debug",
            "flush_soft_delta_info",
            "flush_soft_delta_warn",
            "flush_soft_delta_error",
            "flush_soft_delta_fatal",
        ];
        let mut opts = HashMap::new();
        for key in KEYS {
            let env_key = key.to_uppercase();
            if let Ok(v) = std::env::var(&env_key) {
                opts.insert((*key).to_string(), v);
            }
        }
        Self::from_options(&opts, variant)
    }
}

fn require(opts: &HashMap<String, String>, key: &str) -> Result<String, CoreError> {
    opts.get(key)
        .cloned()
        .ok_or_else(|| CoreError::ConfigInvalid(format!("missing required option {key:?}")))
}

fn opt_str(opts: &HashMap<String, String>, key: &str, default: &str) -> String {
    opts.get(key).cloned().unwrap_or_else(|| default.to_string())
}

fn opt_bool(opts: &HashMap<String, String>, key: &str, default: bool) -> Result<bool, CoreError> {
    match opts.get(key) {
        None => Ok(default),
        Some(s) => match s.as_str() {
            "true" | "1" | "on" => Ok(true),
            "false" | "0" | "off" => Ok(false),
            _ => Err(CoreError::ConfigInvalid(format!(
                "option {key:?} must be a bool, got {s:?}"
            ))),
        },
    }
}

fn opt_u32(opts: &HashMap<String, String>, key: &str, default: u32) -> Result<u32, CoreError> {
    match opts.get(key) {
        None => Ok(default),
        Some(s) => s
            .parse()
            .map_err(|_| CoreError::ConfigInvalid(format!("option {key:?} must be an integer, got {s:?}"))),
    }
}

fn level_durations(
    opts: &HashMap<String, String>,
    prefix: &str,
    default: Duration,
) -> Result<LevelDurations, CoreError> {
    let mut d = LevelDurations::default_all(default);
    for (level_name, slot) in [
        ("debug", &mut d.debug),
        ("info", &mut d.info),
        ("warn", &mut d.warn),
        ("error", &mut d.error),
        ("fatal", &mut d.fatal),
    ] {
        let key = format!("{prefix}_{level_name}");
        if let Some(s) = opts.get(&key) {
            *slot = parse_duration(s)
                .ok_or_else(|| CoreError::ConfigInvalid(format!("bad duration for {key:?}: {s:?}")))?;
        }
    }
    Ok(d)
}

/// Parses durations like `"200ms"`, `"3s"`, `"10s"`.
fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    let (num, unit) = if let Some(n) = s.strip_suffix("ms") {
        (n, "ms")
    } else if let Some(n) = s.strip_suffix('s') {
        (n, "s")
    } else if let Some(n) = s.strip_suffix('m') {
        (n, "m")
    } else if let Some(n) = s.strip_suffix('h') {
        (n, "h")
    } else {
        (s, "s")
    };
    let n: u64 = num.trim().parse().ok()?;
    Some(match unit {
        "ms" => Duration::from_millis(n),
        "m" => Duration::from_secs(n * 60),
        "h" => Duration::from_secs(n * 3600),
        _ => Duration::from_secs(n),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn requires_bucket() {
        let e = Config::from_options(&opts(&[]), Variant::SizeBased).unwrap_err();
        assert!(matches!(e, CoreError::ConfigInvalid(_)));
    }

    #[test]
    fn size_defaults() {
        let c = Config::from_options(&opts(&[("s3_bucket", "b")]), Variant::SizeBased).unwrap();
        assert_eq!(c.s3_region, "us-east-1");
        match c.trigger {
            TriggerConfig::Size { upload_size_mb } => assert_eq!(upload_size_mb, 16),
            _ => panic!("expected size trigger"),
        }
    }

    #[test]
    fn time_based_default_region() {
        let c = Config::from_options(&opts(&[("s3_bucket", "b")]), Variant::TimeBased).unwrap();
        assert_eq!(c.s3_region, "us-west-1");
    }

    #[test]
    fn upload_size_mb_out_of_range() {
        let e = Config::from_options(
            &opts(&[("s3_bucket", "b"), ("upload_size_mb", "1")]),
            Variant::SizeBased,
        )
        .unwrap_err();
        assert!(matches!(e, CoreError::ConfigInvalid(_)));
    }

    #[test]
    fn role_arn_must_be_iam_arn() {
        let e = Config::from_options(
            &opts(&[("s3_bucket", "b"), ("role_arn", "not-an-arn")]),
            Variant::SizeBased,
        )
        .unwrap_err();
        assert!(matches!(e, CoreError::ConfigInvalid(_)));
    }

    #[test]
    fn parses_durations() {
        let c = Config::from_options(
            &opts(&[
                ("s3_bucket", "b"),
                ("flush_hard_delta_info", "200ms"),
                ("flush_soft_delta_info", "10s"),
            ]),
            Variant::TimeBased,
        )
        .unwrap();
        match c.trigger {
            TriggerConfig::DualTimer { hard_delta, soft_delta, .. } => {
                assert_eq!(hard_delta.info, Duration::from_millis(200));
                assert_eq!(soft_delta.info, Duration::from_secs(10));
            }
            _ => panic!("expected dual timer trigger"),
        }
    }
}
