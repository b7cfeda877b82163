use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use aws_config::retry::RetryConfig;
use aws_config::timeout::TimeoutConfig;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart, Delete, ObjectIdentifier};
use aws_sdk_s3::Client;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

use crate::config::StorageSection;

use super::backend::{ObjectMetadata, ObjectStore, PutRequest};
use super::{DeleteFailure, StorageError, StorageResult, TransientCause};

/// S3-compatible backend (AWS S3, Cloudflare R2, MinIO).
#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
    multipart_threshold: u64,
    part_size: u64,
}

impl std::fmt::Debug for S3ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3ObjectStore")
            .field("bucket", &self.bucket)
            .field("multipart_threshold", &self.multipart_threshold)
            .field("part_size", &self.part_size)
            .finish()
    }
}

impl S3ObjectStore {
    /// Credentials come from the standard AWS environment chain.
    pub async fn from_config(section: &StorageSection) -> Self {
        let timeouts = TimeoutConfig::builder()
            .connect_timeout(section.connect_timeout())
            .read_timeout(section.read_timeout())
            .build();
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(section.region.clone()))
            .retry_config(RetryConfig::disabled())
            .timeout_config(timeouts);
        if let Some(endpoint) = &section.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let shared = loader.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(section.force_path_style)
            .build();
        Self {
            client: Client::from_conf(s3_config),
            bucket: section.bucket.clone(),
            multipart_threshold: section.multipart_threshold_bytes(),
            part_size: section.multipart_part_size_bytes(),
        }
    }

    async fn put_single(&self, key: &str, source: &Path, request: &PutRequest) -> StorageResult<()> {
        let body = ByteStream::from_path(source)
            .await
            .map_err(|err| StorageError::Io {
                path: source.to_path_buf(),
                source: std::io::Error::other(err.to_string()),
            })?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .content_type(&request.content_type)
            .content_length(request.content_length as i64)
            .cache_control(&request.cache_control)
            .set_metadata(Some(to_hash_map(request)))
            .send()
            .await
            .map_err(|err| classify("put", key, err))?;
        Ok(())
    }

    async fn put_multipart(&self, key: &str, source: &Path, request: &PutRequest) -> StorageResult<()> {
        let created = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(&request.content_type)
            .cache_control(&request.cache_control)
            .set_metadata(Some(to_hash_map(request)))
            .send()
            .await
            .map_err(|err| classify("create_multipart_upload", key, err))?;
        let upload_id = created
            .upload_id()
            .ok_or_else(|| StorageError::Permanent {
                operation: "create_multipart_upload",
                key: key.to_string(),
                status: None,
                message: "response carried no upload id".into(),
            })?
            .to_string();

        match self.upload_parts(key, source, &upload_id).await {
            Ok(parts) => {
                let completed = CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build();
                self.client
                    .complete_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .multipart_upload(completed)
                    .send()
                    .await
                    .map_err(|err| classify("complete_multipart_upload", key, err))?;
                Ok(())
            }
            Err(err) => {
                if let Err(abort_err) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    warn!(key, error = %DisplayErrorContext(&abort_err), "failed to abort multipart upload");
                }
                Err(err)
            }
        }
    }

    async fn upload_parts(&self, key: &str, source: &Path, upload_id: &str) -> StorageResult<Vec<CompletedPart>> {
        let io_err = |source_err: std::io::Error| StorageError::Io {
            path: source.to_path_buf(),
            source: source_err,
        };
        let mut file = tokio::fs::File::open(source).await.map_err(io_err)?;
        let mut parts = Vec::new();
        let mut part_number = 1i32;
        loop {
            let mut buffer = Vec::with_capacity(self.part_size as usize);
            let read = (&mut file)
                .take(self.part_size)
                .read_to_end(&mut buffer)
                .await
                .map_err(io_err)?;
            if read == 0 {
                break;
            }
            let response = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(buffer))
                .send()
                .await
                .map_err(|err| classify("upload_part", key, err))?;
            debug!(key, part_number, bytes = read, "uploaded part");
            parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .set_e_tag(response.e_tag().map(str::to_string))
                    .build(),
            );
            part_number += 1;
        }
        Ok(parts)
    }
}

fn to_hash_map(request: &PutRequest) -> HashMap<String, String> {
    request
        .metadata
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn encode_copy_source(bucket: &str, key: &str) -> String {
    let encoded = key
        .split('/')
        .map(|segment| url::form_urlencoded::byte_serialize(segment.as_bytes()).collect::<String>())
        .collect::<Vec<_>>()
        .join("/")
        .replace('+', "%20");
    format!("{bucket}/{encoded}")
}

fn transient_cause<E>(err: &SdkError<E, HttpResponse>) -> Option<TransientCause> {
    match err {
        SdkError::TimeoutError(_) => Some(TransientCause::Timeout),
        SdkError::DispatchFailure(failure) => {
            if failure.is_timeout() {
                Some(TransientCause::Timeout)
            } else if failure.is_io() {
                Some(TransientCause::ConnectionReset)
            } else if failure.is_user() {
                None
            } else {
                Some(TransientCause::Dispatch)
            }
        }
        SdkError::ResponseError(_) => Some(TransientCause::ConnectionReset),
        SdkError::ServiceError(_) => match status_of(err) {
            Some(429) => Some(TransientCause::Throttled),
            Some(status) if status >= 500 => Some(TransientCause::ServerError(status)),
            _ => None,
        },
        _ => None,
    }
}

fn status_of<E>(err: &SdkError<E, HttpResponse>) -> Option<u16> {
    err.raw_response().map(|response| response.status().as_u16())
}

fn classify<E>(operation: &'static str, key: &str, err: SdkError<E, HttpResponse>) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let message = DisplayErrorContext(&err).to_string();
    if let Some(cause) = transient_cause(&err) {
        return StorageError::Transient {
            operation,
            key: key.to_string(),
            cause,
            message,
        };
    }
    let status = status_of(&err);
    if status == Some(404) {
        return StorageError::NotFound {
            key: key.to_string(),
        };
    }
    StorageError::Permanent {
        operation,
        key: key.to_string(),
        status,
        message,
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn head(&self, key: &str) -> StorageResult<Option<ObjectMetadata>> {
        let response = match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                let missing = err
                    .as_service_error()
                    .map(|service| service.is_not_found())
                    .unwrap_or(false);
                if missing || status_of(&err) == Some(404) {
                    return Ok(None);
                }
                return Err(classify("head", key, err));
            }
        };
        Ok(Some(ObjectMetadata {
            size: response.content_length().unwrap_or(0).max(0) as u64,
            content_type: response.content_type().map(str::to_string),
            etag: response.e_tag().map(str::to_string),
            metadata: response
                .metadata()
                .map(|meta| {
                    meta.iter()
                        .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
                        .collect()
                })
                .unwrap_or_default(),
        }))
    }

    async fn get_to_file(&self, key: &str, dest: &Path) -> StorageResult<u64> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| classify("get", key, err))?;
        let io_err = |source: std::io::Error| StorageError::Io {
            path: dest.to_path_buf(),
            source,
        };
        let mut file = tokio::fs::File::create(dest).await.map_err(io_err)?;
        let mut reader = response.body.into_async_read();
        let written = tokio::io::copy(&mut reader, &mut file).await.map_err(|source| {
            // A body cut short mid-stream is a network failure, not a local one.
            StorageError::Transient {
                operation: "get",
                key: key.to_string(),
                cause: TransientCause::ConnectionReset,
                message: source.to_string(),
            }
        })?;
        file.sync_all().await.map_err(io_err)?;
        Ok(written)
    }

    async fn get_bytes(&self, key: &str) -> StorageResult<Vec<u8>> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| classify("get", key, err))?;
        let body = response
            .body
            .collect()
            .await
            .map_err(|err| StorageError::Transient {
                operation: "get",
                key: key.to_string(),
                cause: TransientCause::ConnectionReset,
                message: err.to_string(),
            })?;
        Ok(body.into_bytes().to_vec())
    }

    async fn put_file(&self, key: &str, source: &Path, request: &PutRequest) -> StorageResult<()> {
        if request.content_length > self.multipart_threshold {
            self.put_multipart(key, source, request).await
        } else {
            self.put_single(key, source, request).await
        }
    }

    async fn copy(&self, from_key: &str, to_key: &str) -> StorageResult<()> {
        self.client
            .copy_object()
            .bucket(&self.bucket)
            .copy_source(encode_copy_source(&self.bucket, from_key))
            .key(to_key)
            .send()
            .await
            .map_err(|err| classify("copy", to_key, err))?;
        Ok(())
    }

    async fn delete_batch(&self, keys: &[String]) -> StorageResult<Vec<DeleteFailure>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut objects = Vec::with_capacity(keys.len());
        for key in keys {
            let identifier = ObjectIdentifier::builder()
                .key(key)
                .build()
                .map_err(|err| StorageError::Permanent {
                    operation: "delete",
                    key: key.clone(),
                    status: None,
                    message: err.to_string(),
                })?;
            objects.push(identifier);
        }
        let delete = Delete::builder()
            .set_objects(Some(objects))
            .quiet(true)
            .build()
            .map_err(|err| StorageError::Permanent {
                operation: "delete",
                key: keys[0].clone(),
                status: None,
                message: err.to_string(),
            })?;
        let response = self
            .client
            .delete_objects()
            .bucket(&self.bucket)
            .delete(delete)
            .send()
            .await
            .map_err(|err| classify("delete", &keys[0], err))?;
        Ok(response
            .errors()
            .iter()
            .map(|err| DeleteFailure {
                key: err.key().unwrap_or_default().to_string(),
                message: format!(
                    "{}: {}",
                    err.code().unwrap_or("unknown"),
                    err.message().unwrap_or_default()
                ),
            })
            .collect())
    }

    async fn list_prefix(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_continuation_token(token.take())
                .send()
                .await
                .map_err(|err| classify("list", prefix, err))?;
            keys.extend(
                response
                    .contents()
                    .iter()
                    .filter_map(|object| object.key().map(str::to_string)),
            );
            match response.next_continuation_token() {
                Some(next) => token = Some(next.to_string()),
                None => break,
            }
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_source_is_percent_encoded_per_segment() {
        assert_eq!(
            encode_copy_source("bucket", "clips/a b/s1/high.mp4"),
            "bucket/clips/a%20b/s1/high.mp4"
        );
        assert_eq!(
            encode_copy_source("bucket", "clips/maher-al-muaiqly/hls/v0/index.m3u8"),
            "bucket/clips/maher-al-muaiqly/hls/v0/index.m3u8"
        );
    }
}
