//! S3-compatible storage driver backed by `object_store`.
//!
//! [`S3DriverFactory::build`] only captures the resolved configuration. The
//! `AmazonS3` client is built inside each operation, so an unusable endpoint
//! or a missing bucket surfaces as a [`StorageError`] of that call.

use super::{ByteSource, Driver, DriverFactory, StorageError, StorageResult};
use crate::{
    artifact::Artifact,
    config::resolve::{Credentials, ResolvedStorageConfig},
};
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use object_store::{
    ObjectStore, ObjectStoreExt, aws::AmazonS3Builder, buffered::BufWriter, path::Path as ObjectPath,
};
use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};
use tokio::io::AsyncWriteExt;
use tokio_util::io::StreamReader;

const DEFAULT_REGION: &str = "us-east-1";

/// Produces [`S3Driver`]s.
#[derive(Clone, Copy, Debug, Default)]
pub struct S3DriverFactory;

impl DriverFactory for S3DriverFactory {
    fn build(&self, config: ResolvedStorageConfig) -> Box<dyn Driver> {
        Box::new(S3Driver::new(config))
    }
}

/// Driver for one resolved S3 configuration.
#[derive(Clone, Debug)]
pub struct S3Driver {
    config: ResolvedStorageConfig,
}

impl S3Driver {
    pub const fn new(config: ResolvedStorageConfig) -> Self {
        Self { config }
    }

    fn connect(&self) -> StorageResult<Arc<dyn ObjectStore>> {
        let config = &self.config;
        // The builder accepts an empty name and only fails on the first request.
        if config.bucket.is_empty() {
            return Err(StorageError::Config("bucket is required".to_string()));
        }

        let mut builder = if config.use_ambient_credentials() {
            AmazonS3Builder::from_env()
        } else {
            AmazonS3Builder::new()
        };

        let region = if config.region.is_empty() {
            DEFAULT_REGION
        } else {
            &config.region
        };
        builder = builder
            .with_bucket_name(&config.bucket)
            .with_region(region)
            .with_allow_http(!config.secure);

        if let Some(endpoint) = endpoint_url(&config.endpoint, config.secure) {
            builder = builder.with_endpoint(endpoint);
        }

        if let Credentials::Explicit {
            access_key,
            secret_key,
            session_token,
        } = &config.credentials
        {
            builder = builder
                .with_access_key_id(access_key)
                .with_secret_access_key(secret_key);
            if let Some(token) = session_token {
                builder = builder.with_token(token);
            }
        }

        if !config.role_arn.is_empty() {
            tracing::debug!(
                role_arn = %config.role_arn,
                "Role assumption is delegated to the environment's credential chain"
            );
        }

        let store = builder
            .build()
            .map_err(|e| StorageError::Config(e.to_string()))?;
        Ok(Arc::new(store))
    }
}

#[async_trait]
impl Driver for S3Driver {
    async fn load(&self, artifact: &Artifact, dest: &Path) -> StorageResult<()> {
        let store = self.connect()?;
        let key = artifact.object_key();
        let start = Instant::now();

        match download(&store, &key, dest).await {
            Err(StorageError::NotFound(_)) if artifact.optional => {
                tracing::info!(bucket = %self.config.bucket, key = %key, "Optional artifact not found");
                Ok(())
            }
            result => {
                if result.is_ok() {
                    tracing::info!(
                        bucket = %self.config.bucket,
                        key = %key,
                        duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                        "S3 load successful"
                    );
                }
                result
            }
        }
    }

    async fn save(&self, src: &Path, artifact: &Artifact) -> StorageResult<()> {
        let store = self.connect()?;
        let key = artifact.object_key();
        let start = Instant::now();

        let uploaded = upload(&store, src, &key).await?;

        tracing::info!(
            bucket = %self.config.bucket,
            key = %key,
            objects = uploaded,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 save successful"
        );
        Ok(())
    }

    async fn delete(&self, artifact: &Artifact) -> StorageResult<()> {
        let store = self.connect()?;
        let key = artifact.object_key();
        let deleted = remove(&store, &key).await?;
        tracing::info!(bucket = %self.config.bucket, key = %key, objects = deleted, "S3 delete successful");
        Ok(())
    }

    async fn open_stream(&self, artifact: &Artifact) -> StorageResult<ByteSource> {
        let store = self.connect()?;
        open(&store, &artifact.object_key()).await
    }

    async fn list_objects(&self, artifact: &Artifact) -> StorageResult<Vec<String>> {
        let store = self.connect()?;
        list(&store, &artifact.object_key()).await
    }

    async fn is_directory(&self, artifact: &Artifact) -> StorageResult<bool> {
        let store = self.connect()?;
        is_dir(&store, &artifact.object_key()).await
    }
}

/// Gives scheme-less endpoints the scheme matching `secure`.
fn endpoint_url(endpoint: &str, secure: bool) -> Option<String> {
    let endpoint = endpoint.trim();
    if endpoint.is_empty() {
        return None;
    }
    if endpoint.contains("://") {
        return Some(endpoint.to_string());
    }
    let scheme = if secure { "https" } else { "http" };
    Some(format!("{scheme}://{endpoint}"))
}

fn backend_error(key: &str, err: object_store::Error) -> StorageError {
    match err {
        object_store::Error::NotFound { .. } => StorageError::NotFound(key.to_string()),
        other => StorageError::Backend(other.to_string()),
    }
}

/// Object location relative to `prefix`, using `/` separators.
fn relative_key<'a>(location: &'a str, prefix: &str) -> &'a str {
    location
        .strip_prefix(prefix)
        .unwrap_or(location)
        .trim_start_matches('/')
}

async fn is_dir(store: &Arc<dyn ObjectStore>, key: &str) -> StorageResult<bool> {
    if key.ends_with('/') {
        return Ok(true);
    }
    let prefix = ObjectPath::from(key);
    match store.list(Some(&prefix)).next().await {
        Some(Ok(_)) => Ok(true),
        Some(Err(e)) => Err(backend_error(key, e)),
        None => Ok(false),
    }
}

async fn list(store: &Arc<dyn ObjectStore>, key: &str) -> StorageResult<Vec<String>> {
    let prefix = ObjectPath::from(key);
    store
        .list(Some(&prefix))
        .map_ok(|meta| meta.location.to_string())
        .try_collect()
        .await
        .map_err(|e| backend_error(key, e))
}

async fn open(store: &Arc<dyn ObjectStore>, key: &str) -> StorageResult<ByteSource> {
    let result = store
        .get(&ObjectPath::from(key))
        .await
        .map_err(|e| backend_error(key, e))?;
    let body = result.into_stream().map_err(io::Error::other);
    Ok(Box::pin(StreamReader::new(body)))
}

async fn download(store: &Arc<dyn ObjectStore>, key: &str, dest: &Path) -> StorageResult<()> {
    if !is_dir(store, key).await? {
        return download_object(store, key, dest).await;
    }

    let prefix = ObjectPath::from(key);
    let objects: Vec<_> = store
        .list(Some(&prefix))
        .try_collect()
        .await
        .map_err(|e| backend_error(key, e))?;

    tokio::fs::create_dir_all(dest).await?;
    for meta in objects {
        let location = meta.location.to_string();
        let target = dest.join(relative_key(&location, prefix.as_ref()));
        download_object(store, &location, &target).await?;
    }
    Ok(())
}

async fn download_object(store: &Arc<dyn ObjectStore>, key: &str, dest: &Path) -> StorageResult<()> {
    let result = store
        .get(&ObjectPath::from(key))
        .await
        .map_err(|e| backend_error(key, e))?;

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::File::create(dest).await?;
    let mut body = result.into_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| backend_error(key, e))?;
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    Ok(())
}

/// Uploads a file, or every file below a directory. Returns the number of
/// objects written.
async fn upload(store: &Arc<dyn ObjectStore>, src: &Path, key: &str) -> StorageResult<usize> {
    let metadata = tokio::fs::metadata(src).await?;
    if !metadata.is_dir() {
        upload_object(store, src, key).await?;
        return Ok(1);
    }

    let files = walk(src).await?;
    for (path, relative) in &files {
        upload_object(store, path, &crate::artifact::join_key(key, relative)).await?;
    }
    Ok(files.len())
}

async fn upload_object(store: &Arc<dyn ObjectStore>, src: &Path, key: &str) -> StorageResult<()> {
    let mut file = tokio::fs::File::open(src).await?;
    let mut writer = BufWriter::new(Arc::clone(store), ObjectPath::from(key));
    if let Err(e) = tokio::io::copy(&mut file, &mut writer).await {
        if let Err(abort) = writer.abort().await {
            tracing::warn!(key, "Failed to abort upload: {abort}");
        }
        return Err(StorageError::Backend(e.to_string()));
    }
    writer
        .shutdown()
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))
}

/// Every regular file below `root`, paired with its `/`-separated path
/// relative to `root`.
async fn walk(root: &Path) -> io::Result<Vec<(PathBuf, String)>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                pending.push(path);
                continue;
            }
            let relative = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            files.push((path, relative));
        }
    }
    files.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(files)
}

/// Deletes an object, or every object under a directory key. Missing
/// objects are not an error. Returns the number of keys deleted.
async fn remove(store: &Arc<dyn ObjectStore>, key: &str) -> StorageResult<usize> {
    if !is_dir(store, key).await? {
        return match store.delete(&ObjectPath::from(key)).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(1),
            Err(e) => Err(backend_error(key, e)),
        };
    }

    let prefix = ObjectPath::from(key);
    let locations: Vec<ObjectPath> = store
        .list(Some(&prefix))
        .map_ok(|meta| meta.location)
        .try_collect()
        .await
        .map_err(|e| backend_error(key, e))?;

    for location in &locations {
        match store.delete(location).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => {}
            Err(e) => return Err(backend_error(location.as_ref(), e)),
        }
    }
    Ok(locations.len())
}
