//! S3-compatible object store (AWS, MinIO, R2).

use super::{
    BatchDeleteResult, BatchItemError, ObjectPage, ObjectStore, ObjectSummary, MAX_BATCH_DELETE,
};
use crate::{Result, StorageError};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Builder as S3ConfigBuilder, Credentials};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use aws_sdk_s3::Client as S3Client;
use chrono::{DateTime, Utc};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint for MinIO or R2.
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub force_path_style: bool,
}

pub struct S3ObjectStore {
    client: S3Client,
    bucket: String,
}

fn backend_err<E>(err: E) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
{
    StorageError::Backend(DisplayErrorContext(err).to_string())
}

impl S3ObjectStore {
    pub async fn connect(config: &S3Config) -> Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut builder = S3ConfigBuilder::from(&aws_config);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }
        if config.force_path_style {
            builder = builder.force_path_style(true);
        }
        if let (Some(id), Some(secret)) = (&config.access_key_id, &config.secret_access_key) {
            builder = builder.credentials_provider(Credentials::new(
                id.clone(),
                secret.clone(),
                None,
                None,
                "crm-static",
            ));
        }

        tracing::info!(
            bucket = %config.bucket,
            region = %config.region,
            endpoint = ?config.endpoint,
            "S3 object store initialized"
        );

        Ok(Self {
            client: S3Client::from_conf(builder.build()),
            bucket: config.bucket.clone(),
        })
    }

    /// `bucket/key` for the `x-amz-copy-source` header, each key segment URL-encoded.
    fn copy_source(&self, key: &str) -> String {
        let encoded: Vec<_> = key.split('/').map(urlencoding::encode).collect();
        format!("{}/{}", self.bucket, encoded.join("/"))
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn provider(&self) -> &'static str {
        "s3"
    }

    async fn list_page(
        &self,
        prefix: &str,
        delimiter: Option<&str>,
        continuation: Option<String>,
    ) -> Result<ObjectPage> {
        let mut request = self.client.list_objects_v2().bucket(&self.bucket);
        if !prefix.is_empty() {
            request = request.prefix(prefix);
        }
        if let Some(d) = delimiter {
            request = request.delimiter(d);
        }
        if let Some(token) = continuation {
            request = request.continuation_token(token);
        }

        let output = request.send().await.map_err(backend_err)?;

        let objects = output
            .contents()
            .iter()
            .filter_map(|o| {
                let key = o.key()?.to_string();
                Some(ObjectSummary {
                    key,
                    size: o.size().unwrap_or(0).max(0) as u64,
                    last_modified: o
                        .last_modified()
                        .and_then(|t| DateTime::<Utc>::from_timestamp(t.secs(), t.subsec_nanos())),
                })
            })
            .collect();
        let common_prefixes = output
            .common_prefixes()
            .iter()
            .filter_map(|p| p.prefix().map(str::to_string))
            .collect();
        let next_token = if output.is_truncated().unwrap_or(false) {
            output.next_continuation_token().map(str::to_string)
        } else {
            None
        };

        Ok(ObjectPage {
            objects,
            common_prefixes,
            next_token,
        })
    }

    async fn put_object(&self, key: &str, body: Vec<u8>) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    async fn delete_objects(&self, keys: &[String]) -> Result<BatchDeleteResult> {
        let mut result = BatchDeleteResult::default();

        for chunk in keys.chunks(MAX_BATCH_DELETE) {
            let identifiers = chunk
                .iter()
                .map(|k| ObjectIdentifier::builder().key(k).build().map_err(backend_err))
                .collect::<Result<Vec<_>>>()?;
            let delete = Delete::builder()
                .set_objects(Some(identifiers))
                .quiet(false)
                .build()
                .map_err(backend_err)?;

            match self
                .client
                .delete_objects()
                .bucket(&self.bucket)
                .delete(delete)
                .send()
                .await
            {
                Ok(output) => {
                    result.deleted += output.deleted().len();
                    result.errors.extend(output.errors().iter().map(|e| BatchItemError {
                        path: e.key().unwrap_or_default().to_string(),
                        message: e
                            .message()
                            .or(e.code())
                            .unwrap_or("delete failed")
                            .to_string(),
                    }));
                }
                Err(e) => {
                    let message = DisplayErrorContext(e).to_string();
                    tracing::warn!(
                        keys = chunk.len(),
                        error = %message,
                        "Batch delete request failed"
                    );
                    result.errors.extend(chunk.iter().map(|k| BatchItemError {
                        path: k.clone(),
                        message: message.clone(),
                    }));
                }
            }
        }

        Ok(result)
    }

    async fn copy_object(&self, from: &str, to: &str) -> Result<()> {
        self.client
            .copy_object()
            .bucket(&self.bucket)
            .copy_source(self.copy_source(from))
            .key(to)
            .send()
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    async fn presign_get(&self, key: &str, expires_in: Duration) -> Result<String> {
        let presigning = PresigningConfig::expires_in(expires_in).map_err(backend_err)?;
        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(backend_err)?;
        Ok(request.uri().to_string())
    }
}
