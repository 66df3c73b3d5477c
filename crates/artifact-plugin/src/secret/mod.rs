//! Secret store and namespace capabilities.
//!
//! The resolver never talks to a secret backend directly. It receives a
//! [`SecretStore`] and a [`NamespaceSource`] at construction so tests can
//! substitute fakes and so nothing depends on process-wide state.
//!
//! The in-cluster Kubernetes implementations used by the binary live in
//! [`kubernetes`].

pub mod kubernetes;

use async_trait::async_trait;
use core::fmt::Debug;

pub use kubernetes::{KubernetesSecretStore, ServiceAccountNamespace};

/// Failure reported by a [`SecretStore`] backend itself.
#[derive(thiserror::Error, Debug)]
pub enum SecretStoreError {
    /// The store cannot be used from this environment at all.
    #[error("secret store unavailable: {0}")]
    Unavailable(String),

    /// The request to the store failed in transit.
    #[error("secret store request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The store answered with an unexpected status.
    #[error("secret store returned HTTP {status} for secret {name}")]
    Status { status: u16, name: String },

    /// The stored value could not be decoded.
    #[error("secret {name} has an undecodable value for key {key}: {reason}")]
    Decode {
        name: String,
        key: String,
        reason: String,
    },
}

/// Why a single credential reference failed to resolve.
#[derive(thiserror::Error, Debug)]
pub enum SecretError {
    /// The configuration does not reference a secret for this credential.
    #[error("no secret reference configured")]
    MissingReference,

    #[error("secret key {key} not found in secret {name}")]
    NotFound { name: String, key: String },

    #[error("secret key {key} in secret {name} is empty")]
    Empty { name: String, key: String },

    #[error(transparent)]
    Store(#[from] SecretStoreError),
}

/// Resolves `(secret name, key)` references to plaintext values.
///
/// `Ok(None)` means the secret or the key inside it does not exist.
#[async_trait]
pub trait SecretStore: Send + Sync + Debug {
    async fn get(
        &self,
        namespace: &str,
        secret_name: &str,
        secret_key: &str,
    ) -> Result<Option<String>, SecretStoreError>;
}

/// Determines the namespace secret lookups are scoped to, from the process's
/// own execution identity.
#[async_trait]
pub trait NamespaceSource: Send + Sync + Debug {
    async fn namespace(&self) -> std::io::Result<String>;
}
