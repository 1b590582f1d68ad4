//! The Uploader Adapter (L5, §4.7): object-key/tag construction and the
//! pluggable upload boundary. The object-store client itself (credential
//! resolution, retries, multipart splitting) is an external collaborator
//! per §1; `aws-sdk-s3` is the real, standard crate realizing that
//! collaborator's contract and is used directly here rather than imitated,
//! since no example in the reference pack shows an S3 client of its own.

use async_trait::async_trait;
use jiff::Timestamp;

use crate::config::{Config, TriggerConfig};
use crate::error::{CoreError, Result};
use crate::event::StreamKey;

/// `Upload(key, body, tag) -> location`. Network retries, multipart
/// splitting, and credential refresh are this trait's implementation's
/// concern, not the CORE's.
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(&self, key: &str, body: Vec<u8>, tag: &str) -> Result<String>;
}

/// Constructs the object key per §6.
///
///   - Size-based: `<bucketPrefix>/<tag>_<index>_<rfc3339UploadTime>_<id>.zst`
///   - Time-based: `<bucketPrefix><streamKey>.clp.zst`, overwritten on every
///     upload (no monotone index; the time-based variant's README settles
///     the §9 open question this way).
pub fn object_key(cfg: &Config, tag: &StreamKey, index: u64, id: &str) -> String {
    let prefix = cfg.s3_bucket_prefix.trim_end_matches('/');
    match cfg.trigger {
        TriggerConfig::Size { .. } => {
            let now = Timestamp::now();
            format!("{prefix}/{tag}_{index}_{now}_{id}.zst")
        }
        TriggerConfig::DualTimer { .. } => {
            format!("{prefix}/{tag}.clp.zst")
        }
    }
}

/// Every uploaded object carries `fluentBitTag=<tag>`.
pub fn object_tag(tag: &StreamKey) -> String {
    format!("fluentBitTag={tag}")
}

/// URL-decodes a returned location for readable logging.
pub fn url_decode(location: &str) -> String {
    percent_encoding::percent_decode_str(location)
        .decode_utf8_lossy()
        .into_owned()
}

/// The `aws-sdk-s3`-backed implementation of [`Uploader`].
pub struct S3Uploader {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3Uploader {
    pub async fn new(cfg: &Config) -> Result<Self> {
        let loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(cfg.s3_region.clone()));
        if let Some(arn) = &cfg.role_arn {
            // Role assumption is delegated to the SDK's provider chain; the
            // CORE only validates the ARN's shape (§6).
            tracing::debug!(role_arn = %arn, "role assumption delegated to credential provider chain");
        }
        let shared_config = loader.load().await;
        let mut s3_config = aws_sdk_s3::config::Builder::from(&shared_config);
        if let Ok(endpoint) = std::env::var("AWS_ENDPOINT_URL") {
            s3_config = s3_config.endpoint_url(endpoint).force_path_style(true);
        }
        let client = aws_sdk_s3::Client::from_conf(s3_config.build());

        client
            .head_bucket()
            .bucket(&cfg.s3_bucket)
            .send()
            .await
            .map_err(|e| CoreError::BucketInaccessible(format!("{e}")))?;

        Ok(S3Uploader {
            client,
            bucket: cfg.s3_bucket.clone(),
        })
    }
}

#[async_trait]
impl Uploader for S3Uploader {
    async fn upload(&self, key: &str, body: Vec<u8>, tag: &str) -> Result<String> {
        let resp = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .tagging(tag)
            .body(aws_sdk_s3::primitives::ByteStream::from(body))
            .send()
            .await
            .map_err(|e| CoreError::UploadError(format!("{e}")))?;
        Ok(resp
            .e_tag()
            .map(str::to_string)
            .unwrap_or_else(|| format!("s3://{}/{}", self.bucket, key)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, Variant};
    use std::collections::HashMap;

    fn cfg(variant: Variant, extra: &[(&str, &str)]) -> Config {
        let mut opts: HashMap<String, String> = [("s3_bucket".to_string(), "b".to_string())]
            .into_iter()
            .collect();
        for (k, v) in extra {
            opts.insert((*k).to_string(), (*v).to_string());
        }
        Config::from_options(&opts, variant).unwrap()
    }

    #[test]
    fn size_based_key_has_index_and_id() {
        let c = cfg(Variant::SizeBased, &[]);
        let tag = StreamKey::new("T").unwrap();
        let key = object_key(&c, &tag, 0, "myid");
        assert!(key.starts_with("logs/T_0_"));
        assert!(key.ends_with("_myid.zst"));
    }

    #[test]
    fn time_based_key_has_no_index() {
        let c = cfg(Variant::TimeBased, &[]);
        let tag = StreamKey::new("T").unwrap();
        let key1 = object_key(&c, &tag, 0, "myid");
        let key2 = object_key(&c, &tag, 5, "myid");
        assert_eq!(key1, "logs/T.clp.zst");
        assert_eq!(key1, key2, "time-based key must not depend on index");
    }

    #[test]
    fn tag_format() {
        let tag = StreamKey::new("T").unwrap();
        assert_eq!(object_tag(&tag), "fluentBitTag=T");
    }

    #[test]
    fn url_decode_handles_percent_escapes() {
        assert_eq!(url_decode("a%2Fb%20c"), "a/b c");
    }
}
