//! Storage operation capabilities.
//!
//! A [`Driver`] is bound to one [`ResolvedStorageConfig`] and lives for
//! exactly one call. Drivers are produced by a [`DriverFactory`], which never
//! performs I/O and never fails; anything that can go wrong is reported by
//! the driver operation itself.

pub mod s3;

use crate::{artifact::Artifact, config::resolve::ResolvedStorageConfig};
use async_trait::async_trait;
use core::pin::Pin;
use std::path::Path;
use tokio::io::AsyncRead;

pub use s3::{S3Driver, S3DriverFactory};

/// Readable byte source returned by [`Driver::open_stream`]. Dropping it
/// releases the underlying connection.
pub type ByteSource = Pin<Box<dyn AsyncRead + Send>>;

pub type StorageResult<T> = core::result::Result<T, StorageError>;

/// Failure reported by a storage backend.
#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("object {0} not found")]
    NotFound(String),

    /// The resolved configuration could not produce a usable client.
    #[error("invalid storage configuration: {0}")]
    Config(String),

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("local I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The six storage verbs.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Downloads the artifact to `dest`.
    async fn load(&self, artifact: &Artifact, dest: &Path) -> StorageResult<()>;

    /// Uploads the file or directory at `src` as the artifact.
    async fn save(&self, src: &Path, artifact: &Artifact) -> StorageResult<()>;

    async fn delete(&self, artifact: &Artifact) -> StorageResult<()>;

    async fn open_stream(&self, artifact: &Artifact) -> StorageResult<ByteSource>;

    async fn list_objects(&self, artifact: &Artifact) -> StorageResult<Vec<String>>;

    async fn is_directory(&self, artifact: &Artifact) -> StorageResult<bool>;
}

/// Builds a [`Driver`] from resolved configuration.
pub trait DriverFactory: Send + Sync {
    fn build(&self, config: ResolvedStorageConfig) -> Box<dyn Driver>;
}
