//! S3-compatible storage backend using AWS SDK.
//!
//! Remote copies accept `s3://bucket/key` sources and run as server-side
//! `CopyObject` requests, which complete before the call returns. The
//! no-overwrite precondition is a `HeadObject` ahead of the copy, so two
//! writers racing for the same key can both pass it.

use crate::error::{StorageError, StorageResult};
use crate::traits::{
    AssetFileStore, BlobProperties, CopyConditions, CopyStatus, RemoteCopyStore, asset_key,
};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::types::{ChecksumAlgorithm, ChecksumMode};
use base64::Engine;
use ferry_core::{DomainId, SourceUri};
use percent_encoding::{NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use std::sync::Arc;
use tracing::instrument;

/// S3-compatible object store using AWS SDK.
#[derive(Clone)]
pub struct S3Backend {
    client: Client,
    bucket: String,
    prefix: Option<String>,
    endpoint: String,
    region: String,
}

impl std::fmt::Debug for S3Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Backend")
            .field("bucket", &self.bucket)
            .field("prefix", &self.prefix)
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

/// Bucket and key named by an `s3://` copy source.
#[derive(Debug, PartialEq, Eq)]
struct S3Location {
    bucket: String,
    key: String,
}

impl S3Location {
    fn parse(source: &SourceUri) -> StorageResult<Self> {
        let url = source.as_url();
        if url.scheme() != "s3" {
            return Err(StorageError::UnsupportedSource(source.to_string()));
        }
        let bucket = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| StorageError::UnsupportedSource(source.to_string()))?;
        let key = percent_decode_str(url.path().trim_start_matches('/'))
            .decode_utf8()
            .map_err(|_| StorageError::UnsupportedSource(source.to_string()))?;
        if key.is_empty() {
            return Err(StorageError::UnsupportedSource(source.to_string()));
        }
        Ok(Self {
            bucket: bucket.to_string(),
            key: key.into_owned(),
        })
    }

    /// `CopySource` header value: bucket, slash, URL-encoded key.
    fn copy_source(&self) -> String {
        let encoded_key = utf8_percent_encode(&self.key, NON_ALPHANUMERIC).to_string();
        format!("{}/{}", self.bucket, encoded_key)
    }
}

impl S3Backend {
    /// Create a new S3 backend.
    ///
    /// Explicit credentials are used when both halves are given; otherwise
    /// the ambient AWS credential chain is loaded.
    ///
    /// # Arguments
    /// * `force_path_style` - Use path-style URLs (`endpoint/bucket/key`) instead of
    ///   virtual-hosted style. Required for MinIO and some S3-compatible services.
    pub async fn new(
        bucket: &str,
        endpoint: Option<String>,
        region: Option<String>,
        prefix: Option<String>,
        access_key_id: Option<String>,
        secret_access_key: Option<String>,
        force_path_style: bool,
    ) -> StorageResult<Self> {
        let resolved_region = region.unwrap_or_else(|| "us-east-1".to_string());

        let mut s3_config_builder = match (access_key_id, secret_access_key) {
            (Some(key_id), Some(secret)) => {
                let credentials =
                    aws_sdk_s3::config::Credentials::new(key_id, secret, None, None, "ferry-config");
                aws_sdk_s3::config::Builder::new()
                    .behavior_version(BehaviorVersion::latest())
                    .region(aws_config::Region::new(resolved_region.clone()))
                    .credentials_provider(credentials)
            }
            (None, None) => {
                let shared = aws_config::defaults(BehaviorVersion::latest())
                    .region(aws_config::Region::new(resolved_region.clone()))
                    .load()
                    .await;
                aws_sdk_s3::config::Builder::from(&shared)
            }
            _ => {
                return Err(StorageError::Config(
                    "s3 config requires both access_key_id and secret_access_key when either is set"
                        .to_string(),
                ));
            }
        };

        // Bare host:port endpoints (e.g. "minio:9000") default to plain HTTP.
        let normalized_endpoint = endpoint.map(|endpoint_url| {
            let endpoint_lower = endpoint_url.to_lowercase();
            if endpoint_lower.starts_with("http://") || endpoint_lower.starts_with("https://") {
                endpoint_url
            } else {
                format!("http://{endpoint_url}")
            }
        });

        if let Some(endpoint_url) = &normalized_endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }
        if force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = Client::from_conf(s3_config_builder.build());

        let stored_endpoint = match normalized_endpoint {
            Some(url) => url,
            None => format!("s3.{resolved_region}.amazonaws.com"),
        };

        // Strip trailing slashes to avoid double-slash keys like "prefix//key".
        let normalized_prefix = prefix
            .map(|p| p.trim_end_matches('/').to_string())
            .filter(|p| !p.is_empty());

        Ok(Self {
            client,
            bucket: bucket.to_string(),
            prefix: normalized_prefix,
            endpoint: stored_endpoint,
            region: resolved_region,
        })
    }

    /// Get the full object key for a key (applies prefix if configured).
    fn full_key(&self, key: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}/{key}"),
            None => key.to_string(),
        }
    }

    /// Convert an AWS SDK error to StorageError, mapping status codes the
    /// copy pipeline distinguishes.
    fn map_sdk_error<E>(err: SdkError<E>, key: &str) -> StorageError
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        if let SdkError::ServiceError(ref service_err) = err {
            match service_err.raw().status().as_u16() {
                404 => return StorageError::NotFound(key.to_string()),
                409 | 412 => return StorageError::AlreadyExists(key.to_string()),
                _ => {}
            }
        }
        StorageError::S3(Box::new(err))
    }

    async fn exists(&self, full_key: &str) -> StorageResult<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(full_key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) => match Self::map_sdk_error(err, full_key) {
                StorageError::NotFound(_) => Ok(false),
                other => Err(other),
            },
        }
    }

    async fn copy_object(
        &self,
        location: &S3Location,
        dest_key: &str,
        conditions: CopyConditions,
    ) -> StorageResult<()> {
        let full_key = self.full_key(dest_key);
        if conditions.if_none_match && self.exists(&full_key).await? {
            return Err(StorageError::AlreadyExists(dest_key.to_string()));
        }

        self.client
            .copy_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .copy_source(location.copy_source())
            .checksum_algorithm(ChecksumAlgorithm::Sha256)
            .send()
            .await
            .map_err(|e| match Self::map_sdk_error(e, &location.key) {
                StorageError::AlreadyExists(_) => StorageError::AlreadyExists(dest_key.to_string()),
                other => other,
            })?;
        Ok(())
    }
}

#[async_trait]
impl RemoteCopyStore for S3Backend {
    #[instrument(skip(self), fields(backend = "s3"))]
    async fn start_copy(
        &self,
        source: &SourceUri,
        dest_key: &str,
        conditions: CopyConditions,
    ) -> StorageResult<()> {
        let location = S3Location::parse(source)?;
        self.copy_object(&location, dest_key, conditions).await
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn properties(&self, key: &str) -> StorageResult<BlobProperties> {
        let output = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .checksum_mode(ChecksumMode::Enabled)
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(e, key))?;

        let content_hash = output.checksum_sha256().and_then(|encoded| {
            base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .inspect_err(|e| {
                    tracing::warn!(key = %key, error = %e, "Ignoring undecodable SHA-256 checksum");
                })
                .ok()
        });

        Ok(BlobProperties {
            copy_status: CopyStatus::Success,
            content_hash,
            content_length: output
                .content_length()
                .and_then(|len| u64::try_from(len).ok())
                .unwrap_or(0),
            content_type: output.content_type().map(str::to_string),
        })
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }
}

#[async_trait]
impl AssetFileStore for S3Backend {
    #[instrument(skip(self), fields(backend = "s3"))]
    async fn copy_to_asset(
        &self,
        scratch_key: &str,
        app: &DomainId,
        asset: &DomainId,
        file_version: i64,
        conditions: CopyConditions,
    ) -> StorageResult<()> {
        let location = S3Location {
            bucket: self.bucket.clone(),
            key: self.full_key(scratch_key),
        };
        self.copy_object(&location, &asset_key(app, asset, file_version), conditions)
            .await
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        let full_key = self.full_key(key);

        // delete_object succeeds on missing keys, so check first to report NotFound.
        if !self.exists(&full_key).await? {
            return Err(StorageError::NotFound(key.to_string()));
        }

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(e, key))?;
        Ok(())
    }

    fn remote_copy(&self) -> Option<Arc<dyn RemoteCopyStore>> {
        Some(Arc::new(self.clone()))
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }
}
