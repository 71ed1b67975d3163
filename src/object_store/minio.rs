use super::ObjectStore;
use crate::config::ObjectStoreConfig;
use anyhow::{Context, Result};
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use tracing::{debug, info, trace};

/// [`ObjectStore`] backed by a single bucket on an S3-compatible server
/// (MinIO in development).
#[derive(Clone, Debug)]
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

/// Builds an S3 client for a MinIO server at `config.endpoint`.
pub async fn get_min_io_client(config: &ObjectStoreConfig) -> Client {
    let credentials = Credentials::new(
        config.user.clone(),
        config.password.clone(),
        None,
        None,
        "minio",
    );

    let sdk_config = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(config.region.clone()))
        .credentials_provider(credentials)
        .endpoint_url(config.endpoint.clone())
        .load()
        .await;

    // MinIO serves buckets by path, not by virtual host.
    let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
        .force_path_style(true)
        .build();
    Client::from_conf(s3_config)
}

impl S3ObjectStore {
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Connects to the server described by `config` and makes sure `bucket`
    /// exists.
    pub async fn connect(config: &ObjectStoreConfig, bucket: &str) -> Result<Self> {
        let store = Self::new(get_min_io_client(config).await, bucket);
        store.ensure_bucket().await?;
        Ok(store)
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub async fn ensure_bucket(&self) -> Result<()> {
        let resp = self
            .client
            .list_buckets()
            .send()
            .await
            .context("listing buckets")?;
        let exists = resp
            .buckets()
            .iter()
            .any(|bucket| bucket.name() == Some(self.bucket.as_str()));
        if !exists {
            info!(bucket = %self.bucket, "creating bucket");
            self.client
                .create_bucket()
                .bucket(&self.bucket)
                .send()
                .await
                .with_context(|| format!("creating bucket {}", self.bucket))?;
        }
        Ok(())
    }
}

#[tonic::async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, name: &str, body: Bytes) -> Result<()> {
        trace!(bucket = %self.bucket, object = %name, len = body.len(), "put");
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(name)
            .body(ByteStream::from(body))
            .send()
            .await
            .with_context(|| format!("uploading {name}"))?;
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Option<Bytes>> {
        trace!(bucket = %self.bucket, object = %name, "get");
        let mut object = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(name)
            .send()
            .await
        {
            Ok(object) => object,
            Err(err) if err.as_service_error().map_or(false, |e| e.is_no_such_key()) => {
                debug!(object = %name, "object does not exist");
                return Ok(None);
            }
            Err(err) => return Err(err).with_context(|| format!("downloading {name}")),
        };

        let mut content = Vec::new();
        while let Some(bytes) = object
            .body
            .try_next()
            .await
            .with_context(|| format!("reading body of {name}"))?
        {
            content.extend_from_slice(&bytes);
        }
        Ok(Some(Bytes::from(content)))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut objects = Vec::new();
        let mut continuation = None;
        loop {
            let resp = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_continuation_token(continuation)
                .send()
                .await
                .with_context(|| format!("listing {prefix}"))?;
            for object in resp.contents() {
                // Skip directory markers.
                if let Some(key) = object.key().filter(|key| !key.ends_with('/')) {
                    objects.push(key.to_string());
                }
            }
            continuation = resp.next_continuation_token().map(str::to_string);
            if resp.is_truncated() != Some(true) || continuation.is_none() {
                break;
            }
        }
        Ok(objects)
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(name)
            .send()
            .await
            .with_context(|| format!("deleting {name}"))?;
        Ok(())
    }
}
