//! In-cluster Kubernetes secret lookups.
//!
//! Both types read the pod's service account directory on every call. Tokens
//! are rotated by the kubelet and the namespace is part of the pod identity,
//! so nothing read from that directory is cached between requests.

use super::{NamespaceSource, SecretStore, SecretStoreError};
use async_trait::async_trait;
use base64::Engine as _;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use std::{
    collections::HashMap,
    io,
    path::{Path, PathBuf},
};

/// Default mount point of the pod's service account credentials.
pub const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// Reads the namespace from the mounted service account.
#[derive(Clone, Debug)]
pub struct ServiceAccountNamespace {
    path: PathBuf,
}

impl ServiceAccountNamespace {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for ServiceAccountNamespace {
    fn default() -> Self {
        Self::new(Path::new(SERVICE_ACCOUNT_DIR).join("namespace"))
    }
}

#[async_trait]
impl NamespaceSource for ServiceAccountNamespace {
    async fn namespace(&self) -> io::Result<String> {
        let raw = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            io::Error::new(
                e.kind(),
                format!("failed to read {}: {e}", self.path.display()),
            )
        })?;
        let namespace = raw.trim();
        if namespace.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("namespace file {} is empty", self.path.display()),
            ));
        }
        Ok(namespace.to_string())
    }
}

/// Fetches secret values from the Kubernetes API server using the pod's
/// service account token.
#[derive(Clone, Debug)]
pub struct KubernetesSecretStore {
    api_server: Option<String>,
    service_account_dir: PathBuf,
}

#[derive(Deserialize)]
struct SecretObject {
    #[serde(default)]
    data: HashMap<String, String>,
}

impl KubernetesSecretStore {
    pub fn new(api_server: impl Into<String>, service_account_dir: impl Into<PathBuf>) -> Self {
        Self {
            api_server: Some(api_server.into()),
            service_account_dir: service_account_dir.into(),
        }
    }

    /// Locates the API server through the environment variables the kubelet
    /// injects into every pod.
    ///
    /// Outside a cluster the store is still constructed; every lookup then
    /// fails with [`SecretStoreError::Unavailable`]. Requests that only use
    /// ambient credentials never touch it.
    pub fn in_cluster(service_account_dir: impl Into<PathBuf>) -> Self {
        let host = std::env::var("KUBERNETES_SERVICE_HOST").ok();
        let port = std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".into());
        let api_server = host.map(|host| {
            if host.contains(':') {
                format!("https://[{host}]:{port}")
            } else {
                format!("https://{host}:{port}")
            }
        });
        Self {
            api_server,
            service_account_dir: service_account_dir.into(),
        }
    }

    fn secret_url(&self, namespace: &str, secret_name: &str) -> Result<Url, SecretStoreError> {
        let api_server = self.api_server.as_deref().ok_or_else(|| {
            SecretStoreError::Unavailable(
                "KUBERNETES_SERVICE_HOST is not set; not running in a cluster".to_string(),
            )
        })?;
        let mut url = Url::parse(api_server).map_err(|e| {
            SecretStoreError::Unavailable(format!("invalid API server URL {api_server}: {e}"))
        })?;
        url.path_segments_mut()
            .map_err(|()| {
                SecretStoreError::Unavailable(format!("API server URL {api_server} has no path"))
            })?
            .pop_if_empty()
            .extend(["api", "v1", "namespaces", namespace, "secrets", secret_name]);
        Ok(url)
    }

    async fn client(&self) -> Result<reqwest::Client, SecretStoreError> {
        let mut builder = reqwest::Client::builder();
        let ca_path = self.service_account_dir.join("ca.crt");
        match tokio::fs::read(&ca_path).await {
            Ok(pem) => {
                builder = builder.add_root_certificate(reqwest::Certificate::from_pem(&pem)?);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!("No cluster CA at {}, using default roots", ca_path.display());
            }
            Err(e) => {
                return Err(SecretStoreError::Unavailable(format!(
                    "failed to read {}: {e}",
                    ca_path.display()
                )));
            }
        }
        Ok(builder.build()?)
    }

    async fn token(&self) -> Result<String, SecretStoreError> {
        let token_path = self.service_account_dir.join("token");
        let token = tokio::fs::read_to_string(&token_path).await.map_err(|e| {
            SecretStoreError::Unavailable(format!("failed to read {}: {e}", token_path.display()))
        })?;
        Ok(token.trim().to_string())
    }
}

#[async_trait]
impl SecretStore for KubernetesSecretStore {
    async fn get(
        &self,
        namespace: &str,
        secret_name: &str,
        secret_key: &str,
    ) -> Result<Option<String>, SecretStoreError> {
        let url = self.secret_url(namespace, secret_name)?;
        let token = self.token().await?;
        let client = self.client().await?;

        tracing::debug!(namespace, secret = secret_name, key = secret_key, "Fetching secret");

        let response = client.get(url).bearer_auth(token).send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(SecretStoreError::Status {
                status: status.as_u16(),
                name: secret_name.to_string(),
            });
        }

        let secret: SecretObject = response.json().await?;
        let Some(encoded) = secret.data.get(secret_key) else {
            return Ok(None);
        };

        let decode_error = |reason: String| SecretStoreError::Decode {
            name: secret_name.to_string(),
            key: secret_key.to_string(),
            reason,
        };
        let raw = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| decode_error(e.to_string()))?;
        String::from_utf8(raw)
            .map(Some)
            .map_err(|e| decode_error(e.to_string()))
    }
}
