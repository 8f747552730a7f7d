//! devpulse-objectstore
//!
//! A thin wrapper over an S3-compatible client: `put`/`get` plus the key
//! layout the rest of devpulse builds against (spec §6). Retry, buffering,
//! and the "never stream an upload" discipline all live at the call site
//! (the transcript-upload route and the pipeline fetch step); this crate
//! only owns client construction and key shape.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use aws_config::BehaviorVersion;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use devpulse_config::S3Config;
use thiserror::Error;

/// Errors surfaced by the object store client. Every variant maps to spec
/// §7's `TransientDependencyError` at the object-store boundary.
#[derive(Debug, Error)]
pub enum ObjectStoreError {
    /// The underlying `put_object` call failed.
    #[error("object store put failed: {0}")]
    Put(Box<dyn std::error::Error + Send + Sync>),
    /// The underlying `get_object` call failed.
    #[error("object store get failed: {0}")]
    Get(Box<dyn std::error::Error + Send + Sync>),
    /// The response body could not be collected into memory.
    #[error("object store body read failed: {0}")]
    Body(Box<dyn std::error::Error + Send + Sync>),
}

/// An S3-compatible object store client bound to a single bucket.
#[derive(Clone)]
pub struct ObjectStore {
    client: Client,
    bucket: String,
}

impl ObjectStore {
    /// Build a client from `config`, honoring a custom endpoint and
    /// path-style addressing for S3-compatible services (MinIO, etc.).
    pub async fn connect(config: &S3Config) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new(config.region.clone()));
        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let shared = loader.load().await;

        let mut s3_config = aws_sdk_s3::config::Builder::from(&shared);
        if config.force_path_style {
            s3_config = s3_config.force_path_style(true);
        }

        Self {
            client: Client::from_conf(s3_config.build()),
            bucket: config.bucket.clone(),
        }
    }

    /// Upload `body` to `key` with the given content type. Callers buffer
    /// the full body in memory before calling this — direct streaming from
    /// a client connection is not supported, per the prior streaming
    /// corruption bug this system works around (spec §4.I, §9).
    pub async fn put(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<(), ObjectStoreError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| ObjectStoreError::Put(Box::new(e)))?;
        Ok(())
    }

    /// Fetch the full body of `key` into memory.
    pub async fn get(&self, key: &str) -> Result<Vec<u8>, ObjectStoreError> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| ObjectStoreError::Get(Box::new(e)))?;

        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| ObjectStoreError::Body(Box::new(e)))?
            .to_vec();
        Ok(bytes)
    }

    /// Confirm the bucket is reachable, for the health endpoint. Does not
    /// touch any object.
    pub async fn ping(&self) -> Result<(), ObjectStoreError> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| ObjectStoreError::Get(Box::new(e)))?;
        Ok(())
    }
}

/// Key for a session's raw, uploaded transcript.
pub fn transcript_key(canonical_id: &str, session_id: &str) -> String {
    format!("transcripts/{canonical_id}/{session_id}/raw.jsonl")
}

/// Key for a session's parsed transcript (messages + blocks), as an
/// optional cache artifact of the pipeline's parse step.
pub fn parsed_key(canonical_id: &str, session_id: &str) -> String {
    format!("transcripts/{canonical_id}/{session_id}/parsed.json")
}

/// Key for an externalized tool-result artifact.
pub fn artifact_key(session_id: &str, artifact_id: &str, ext: &str) -> String {
    format!("artifacts/{session_id}/{artifact_id}.{ext}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcript_key_matches_the_documented_layout() {
        assert_eq!(
            transcript_key("github.com/o/r", "S1"),
            "transcripts/github.com/o/r/S1/raw.jsonl"
        );
    }

    #[test]
    fn artifact_key_matches_the_documented_layout() {
        assert_eq!(artifact_key("S1", "a1", "txt"), "artifacts/S1/a1.txt");
    }
}
