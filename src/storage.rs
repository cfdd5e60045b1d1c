//! Object storage layer
//!
//! Publishes staged files to Cloudflare R2 / AWS S3 and exposes the small set of
//! bucket operations the relay needs (put, delete, head, list).

use crate::config::{Settings, UPLOAD_PART_SIZE};
use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use aws_types::region::Region;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::path::Path;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Characters escaped in public object URLs: everything except RFC 3986 unreserved.
const OBJECT_KEY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Errors that can occur during storage operations
#[derive(Error, Debug)]
pub enum StorageError {
    /// Error putting object into S3
    #[error("S3 put error: {0}")]
    S3Put(String),
    /// Error deleting object from S3
    #[error("S3 delete error: {0}")]
    S3Delete(String),
    /// Error reading object metadata or listing the bucket
    #[error("S3 read error: {0}")]
    S3Read(String),
    /// Upload was interrupted by a cancellation request
    #[error("upload cancelled")]
    Cancelled,
    /// Standard I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Configuration error (missing credentials, etc.)
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Interface for the bucket holding published artifacts
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload a local file under `key`, returning the number of bytes stored.
    ///
    /// Implementations check `cancel` between parts where the transfer is split.
    async fn put_file(
        &self,
        key: &str,
        path: &Path,
        content_type: Option<String>,
        cancel: &CancellationToken,
    ) -> Result<u64, StorageError>;
    /// Delete the object stored under `key`. Deleting a missing key is not an error.
    async fn delete_object(&self, key: &str) -> Result<(), StorageError>;
    /// Size of the object under `key`, `None` if it does not exist
    async fn head_object(&self, key: &str) -> Result<Option<u64>, StorageError>;
    /// All keys in the bucket, sorted
    async fn list_objects(&self) -> Result<Vec<String>, StorageError>;
    /// Check connection to storage
    async fn check_connection(&self) -> Result<(), String>;
}

/// Build the public URL of an object: `<base>/<percent-encoded key>`.
///
/// # Examples
///
/// ```
/// use oxide_relay::storage::public_url;
///
/// let url = public_url("https://cdn.example.com/", "my file#1.mp4");
/// assert_eq!(url, "https://cdn.example.com/my%20file%231.mp4");
/// ```
#[must_use]
pub fn public_url(base: &str, key: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        utf8_percent_encode(key, OBJECT_KEY_ENCODE_SET)
    )
}

/// A part accepted by a multipart upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedPart {
    /// 1-based part number
    pub number: i32,
    /// Entity tag returned for the part
    pub e_tag: Option<String>,
}

/// Low-level multipart upload calls
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MultipartApi: Send + Sync {
    /// Start an upload of `key`, returning its upload id
    async fn create_multipart(
        &self,
        key: &str,
        content_type: Option<String>,
    ) -> Result<String, StorageError>;
    /// Store one part
    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        number: i32,
        body: Vec<u8>,
    ) -> Result<UploadedPart, StorageError>;
    /// Assemble the uploaded parts into the final object
    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<UploadedPart>,
    ) -> Result<(), StorageError>;
    /// Drop an unfinished upload and its parts
    async fn abort_multipart(&self, key: &str, upload_id: &str) -> Result<(), StorageError>;
}

/// Upload `path` in parts of `part_size` bytes, checking `cancel` before each
/// part. Any error aborts the upload.
///
/// # Errors
///
/// Returns `StorageError::Cancelled` if `cancel` fires between parts, or the
/// first I/O or store error.
pub async fn put_multipart<A: MultipartApi + ?Sized>(
    api: &A,
    key: &str,
    path: &Path,
    content_type: Option<String>,
    part_size: usize,
    cancel: &CancellationToken,
) -> Result<u64, StorageError> {
    let upload_id = api.create_multipart(key, content_type).await?;

    let result = match upload_parts(api, key, &upload_id, path, part_size, cancel).await {
        Ok((parts, total)) => api
            .complete_multipart(key, &upload_id, parts)
            .await
            .map(|()| total),
        Err(e) => Err(e),
    };

    if let Err(e) = &result {
        debug!(key = %key, error = %e, "Aborting multipart upload");
        if let Err(abort) = api.abort_multipart(key, &upload_id).await {
            warn!(key = %key, error = %abort, "Failed to abort multipart upload");
        }
    }
    result
}

async fn upload_parts<A: MultipartApi + ?Sized>(
    api: &A,
    key: &str,
    upload_id: &str,
    path: &Path,
    part_size: usize,
    cancel: &CancellationToken,
) -> Result<(Vec<UploadedPart>, u64), StorageError> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut parts = Vec::new();
    let mut number: i32 = 1;
    let mut total: u64 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(StorageError::Cancelled);
        }

        let mut buf = Vec::with_capacity(part_size);
        (&mut file)
            .take(part_size as u64)
            .read_to_end(&mut buf)
            .await?;
        if buf.is_empty() {
            break;
        }
        total += buf.len() as u64;

        parts.push(api.upload_part(key, upload_id, number, buf).await?);
        debug!(key = %key, part_number = number, "Uploaded part");
        number += 1;
    }

    Ok((parts, total))
}

/// R2-backed object store
pub struct R2Storage {
    client: Client,
    bucket: String,
}

impl R2Storage {
    /// Create a new R2 storage instance
    ///
    /// # Errors
    ///
    /// Returns an error if R2 configuration is missing.
    pub async fn new(settings: &Settings) -> Result<Self, StorageError> {
        let endpoint_url = settings.r2_endpoint().ok_or_else(|| {
            StorageError::Config("R2_ENDPOINT_URL or R2_ACCOUNT_ID is missing".into())
        })?;
        let access_key = settings
            .r2_access_key_id
            .as_ref()
            .ok_or_else(|| StorageError::Config("R2_ACCESS_KEY_ID is missing".into()))?;
        let secret_key = settings
            .r2_secret_access_key
            .as_ref()
            .ok_or_else(|| StorageError::Config("R2_SECRET_ACCESS_KEY is missing".into()))?;
        let bucket = settings
            .r2_bucket_name
            .as_ref()
            .ok_or_else(|| StorageError::Config("R2_BUCKET_NAME is missing".into()))?;

        let credentials = Credentials::new(access_key, secret_key, None, None, "r2-storage");

        let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(Region::new("auto"))
            .load()
            .await;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .endpoint_url(endpoint_url)
            .force_path_style(true)
            .build();

        Ok(Self {
            client: Client::from_conf(s3_config),
            bucket: bucket.clone(),
        })
    }

    async fn put_single(
        &self,
        key: &str,
        path: &Path,
        content_type: Option<String>,
    ) -> Result<(), StorageError> {
        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| StorageError::Io(std::io::Error::other(e)))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .set_content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::S3Put(e.to_string()))?;

        Ok(())
    }
}

#[async_trait]
impl MultipartApi for R2Storage {
    async fn create_multipart(
        &self,
        key: &str,
        content_type: Option<String>,
    ) -> Result<String, StorageError> {
        let created = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .set_content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::S3Put(e.to_string()))?;

        created
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| StorageError::S3Put("multipart upload id missing".into()))
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        number: i32,
        body: Vec<u8>,
    ) -> Result<UploadedPart, StorageError> {
        let out = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(number)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| StorageError::S3Put(e.to_string()))?;

        Ok(UploadedPart {
            number,
            e_tag: out.e_tag().map(str::to_string),
        })
    }

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<UploadedPart>,
    ) -> Result<(), StorageError> {
        let parts = parts
            .into_iter()
            .map(|part| {
                CompletedPart::builder()
                    .set_e_tag(part.e_tag)
                    .part_number(part.number)
                    .build()
            })
            .collect();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| StorageError::S3Put(e.to_string()))?;
        Ok(())
    }

    async fn abort_multipart(&self, key: &str, upload_id: &str) -> Result<(), StorageError> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| StorageError::S3Delete(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for R2Storage {
    async fn put_file(
        &self,
        key: &str,
        path: &Path,
        content_type: Option<String>,
        cancel: &CancellationToken,
    ) -> Result<u64, StorageError> {
        let size = tokio::fs::metadata(path).await?.len();

        if size < UPLOAD_PART_SIZE as u64 {
            self.put_single(key, path, content_type).await?;
            Ok(size)
        } else {
            put_multipart(self, key, path, content_type, UPLOAD_PART_SIZE, cancel).await
        }
    }

    async fn delete_object(&self, key: &str) -> Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::S3Delete(e.to_string()))?;

        Ok(())
    }

    async fn head_object(&self, key: &str) -> Result<Option<u64>, StorageError> {
        let result = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(output) => Ok(Some(
                output
                    .content_length()
                    .and_then(|len| u64::try_from(len).ok())
                    .unwrap_or(0),
            )),
            Err(SdkError::ServiceError(err)) if err.err().is_not_found() => Ok(None),
            Err(e) => Err(StorageError::S3Read(e.to_string())),
        }
    }

    async fn list_objects(&self) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let output = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| StorageError::S3Read(e.to_string()))?;

            keys.extend(
                output
                    .contents()
                    .iter()
                    .filter_map(|object| object.key().map(str::to_string)),
            );

            match output.next_continuation_token() {
                Some(token) if output.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn check_connection(&self) -> Result<(), String> {
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => {
                info!(bucket = %self.bucket, "R2 bucket is reachable");
                Ok(())
            }
            Err(e) => {
                error!(bucket = %self.bucket, error = %e, "R2 connection check failed");
                Err(e.to_string())
            }
        }
    }
}
