//! A concrete realization of the "decoder that yields `(timestamp, record)`
//! pairs and signals end-of-chunk" collaborator (§1), since the binary
//! entry point needs one to be runnable. Supports newline-delimited JSON
//! and length-prefixed msgpack records, both tagged by a `"tag"` field that
//! selects the destination stream.

use base::FastHashMap;
use core::event::LogEvent;
use core::Config;
use std::io::BufRead;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed record: {0}")]
    Malformed(String),
    #[error("record missing required {0:?} field")]
    MissingField(&'static str),
    #[error("single_key {0:?} present but not a string")]
    SingleKeyNotString(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A single wire-format record before it is split into `(tag, LogEvent)`.
pub struct Decoded {
    pub tag: String,
    pub event: LogEvent,
}

/// Applies the `use_single_key`/`single_key`/`allow_missing_key` extraction
/// (§6): when enabled, replaces the record with just its `single_key` field
/// under the key `"message"`. A present-but-non-string value fails the
/// whole batch; an absent key falls back to the full record only if
/// `allow_missing_key` is set, and is otherwise also an error.
fn apply_single_key(
    cfg: &Config,
    mut record: FastHashMap<String, serde_json::Value>,
) -> Result<FastHashMap<String, serde_json::Value>, DecodeError> {
    if !cfg.use_single_key {
        return Ok(record);
    }
    match record.remove(&cfg.single_key) {
        Some(serde_json::Value::String(s)) => {
            let mut out = FastHashMap::default();
            out.insert("message".to_string(), serde_json::Value::String(s));
            Ok(out)
        }
        Some(_other) => Err(DecodeError::SingleKeyNotString(cfg.single_key.clone())),
        None if cfg.allow_missing_key => Ok(record),
        None => Err(DecodeError::MissingField("single_key")),
    }
}

fn record_to_event(
    cfg: &Config,
    mut record: FastHashMap<String, serde_json::Value>,
) -> Result<Decoded, DecodeError> {
    let tag = record
        .remove("tag")
        .and_then(|v| v.as_str().map(str::to_string))
        .ok_or(DecodeError::MissingField("tag"))?;
    let timestamp_ms = record
        .remove("timestamp_ms")
        .and_then(|v| v.as_i64())
        .ok_or(DecodeError::MissingField("timestamp_ms"))?;
    let record = apply_single_key(cfg, record)?;
    Ok(Decoded {
        tag,
        event: LogEvent::new(timestamp_ms, record),
    })
}

/// Decodes a single JSON-encoded line, as consumed incrementally off an
/// async stdin reader by the daemon.
pub fn decode_line(cfg: &Config, line: &str) -> Result<Decoded, DecodeError> {
    let record: FastHashMap<String, serde_json::Value> =
        serde_json::from_str(line).map_err(|e| DecodeError::Malformed(e.to_string()))?;
    record_to_event(cfg, record)
}

/// Decodes one newline-delimited JSON record per line until EOF, which
/// signals end-of-chunk. A malformed line fails only that line (§7
/// DecodeError); the caller decides whether to fail the whole batch.
pub fn decode_json_lines<'a, R: BufRead + 'a>(
    cfg: &'a Config,
    r: R,
) -> impl Iterator<Item = Result<Decoded, DecodeError>> + 'a {
    r.lines().filter_map(move |line| {
        let line = match line {
            Ok(l) if l.trim().is_empty() => return None,
            Ok(l) => l,
            Err(e) => return Some(Err(DecodeError::from(e))),
        };
        let record: FastHashMap<String, serde_json::Value> = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(e) => return Some(Err(DecodeError::Malformed(e.to_string()))),
        };
        Some(record_to_event(cfg, record))
    })
}

/// Decodes 4-byte-length-prefixed msgpack records from `r` until EOF.
pub fn decode_msgpack_stream<R: std::io::Read>(
    cfg: &Config,
    mut r: R,
) -> Result<Vec<Decoded>, DecodeError> {
    let mut out = Vec::new();
    loop {
        let mut len_buf = [0u8; 4];
        match r.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
        let len = u32::from_le_bytes(len_buf) as usize;
        let mut buf = vec![0u8; len];
        r.read_exact(&mut buf)?;
        let record: FastHashMap<String, serde_json::Value> =
            rmp_serde::from_slice(&buf).map_err(|e| DecodeError::Malformed(e.to_string()))?;
        out.push(record_to_event(cfg, record)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::config::Variant;
    use std::collections::HashMap;

    fn cfg(extra: &[(&str, &str)]) -> Config {
        let mut opts: HashMap<String, String> = [("s3_bucket".to_string(), "b".to_string())]
            .into_iter()
            .collect();
        for (k, v) in extra {
            opts.insert((*k).to_string(), (*v).to_string());
        }
        Config::from_options(&opts, Variant::SizeBased).unwrap()
    }

    #[test]
    fn decodes_json_lines() {
        let c = cfg(&[]);
        let input = b"{\"tag\":\"T\",\"timestamp_ms\":1,\"log\":\"a\"}\n{\"tag\":\"T\",\"timestamp_ms\":2,\"log\":\"b\"}\n";
        let decoded: Vec<_> = decode_json_lines(&c, &input[..])
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].tag, "T");
        assert_eq!(decoded[0].event.timestamp_ms, 1);
        assert_eq!(
            decoded[0].event.field("message").and_then(|v| v.as_str()),
            Some("a")
        );
    }

    #[test]
    fn missing_tag_is_an_error() {
        let c = cfg(&[]);
        let input = b"{\"timestamp_ms\":1,\"log\":\"a\"}\n";
        let mut it = decode_json_lines(&c, &input[..]);
        assert!(matches!(it.next(), Some(Err(DecodeError::MissingField("tag")))));
    }

    #[test]
    fn non_string_single_key_value_is_an_error() {
        let c = cfg(&[]);
        let input = b"{\"tag\":\"T\",\"timestamp_ms\":1,\"log\":42}\n";
        let mut it = decode_json_lines(&c, &input[..]);
        assert!(matches!(
            it.next(),
            Some(Err(DecodeError::SingleKeyNotString(_)))
        ));
    }

    #[test]
    fn missing_single_key_falls_back_to_full_record_when_allowed() {
        let c = cfg(&[]);
        let input = b"{\"tag\":\"T\",\"timestamp_ms\":1,\"other\":\"x\"}\n";
        let decoded: Vec<_> = decode_json_lines(&c, &input[..])
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(
            decoded[0].event.field("other").and_then(|v| v.as_str()),
            Some("x")
        );
    }

    #[test]
    fn missing_single_key_errors_when_disallowed() {
        let c = cfg(&[("allow_missing_key", "false")]);
        let input = b"{\"tag\":\"T\",\"timestamp_ms\":1,\"other\":\"x\"}\n";
        let mut it = decode_json_lines(&c, &input[..]);
        assert!(matches!(it.next(), Some(Err(DecodeError::MissingField("single_key")))));
    }
}
