//! Turns a plugin location into a fully resolved storage configuration.
//!
//! Resolution runs in two phases per request:
//!
//! 1. **Parse** the configuration blob under strict field checking.
//! 2. **Resolve secrets**: ambient credentials short-circuit everything;
//!    otherwise the access key and secret key references must be present and
//!    resolvable, and the session token is fetched only when referenced.
//!
//! Nothing is cached. Every call reads the namespace once and performs its
//! own secret store round trips.

use super::{PluginConfig, SecretKeySelector, parse_plugin_configuration};
use crate::{
    CredentialKind, Error, Result,
    artifact::PluginLocation,
    secret::{NamespaceSource, SecretError, SecretStore},
};
use core::fmt;
use std::sync::Arc;

/// Credentials the driver should authenticate with.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Supplied implicitly by the execution environment.
    Ambient,
    /// Resolved from the secret store.
    Explicit {
        access_key: String,
        secret_key: String,
        session_token: Option<String>,
    },
}

// Secret material must never reach logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ambient => write!(f, "Ambient"),
            Self::Explicit { session_token, .. } => f
                .debug_struct("Explicit")
                .field("access_key", &"<redacted>")
                .field("secret_key", &"<redacted>")
                .field("session_token", &session_token.as_ref().map(|_| "<redacted>"))
                .finish(),
        }
    }
}

/// Storage configuration with every secret reference resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedStorageConfig {
    pub endpoint: String,
    pub region: String,
    pub secure: bool,
    pub credentials: Credentials,
    pub role_arn: String,
    pub bucket: String,
    /// Storage key from the plugin location.
    pub key: String,
}

impl ResolvedStorageConfig {
    pub const fn use_ambient_credentials(&self) -> bool {
        matches!(self.credentials, Credentials::Ambient)
    }

    pub fn access_key(&self) -> Option<&str> {
        match &self.credentials {
            Credentials::Explicit { access_key, .. } => Some(access_key),
            Credentials::Ambient => None,
        }
    }

    pub fn secret_key(&self) -> Option<&str> {
        match &self.credentials {
            Credentials::Explicit { secret_key, .. } => Some(secret_key),
            Credentials::Ambient => None,
        }
    }

    pub fn session_token(&self) -> Option<&str> {
        match &self.credentials {
            Credentials::Explicit { session_token, .. } => session_token.as_deref(),
            Credentials::Ambient => None,
        }
    }

    fn from_parts(config: PluginConfig, key: &str, credentials: Credentials) -> Self {
        Self {
            secure: config.secure(),
            endpoint: config.endpoint,
            region: config.region,
            credentials,
            role_arn: config.role_arn,
            bucket: config.bucket,
            key: key.to_string(),
        }
    }
}

/// Resolves plugin locations using an explicit secret store and namespace
/// source.
#[derive(Clone, Debug)]
pub struct Resolver {
    secrets: Arc<dyn SecretStore>,
    namespace: Arc<dyn NamespaceSource>,
}

impl Resolver {
    pub fn new(secrets: Arc<dyn SecretStore>, namespace: Arc<dyn NamespaceSource>) -> Self {
        Self { secrets, namespace }
    }

    /// Parses the location's configuration and resolves its credentials.
    ///
    /// # Errors
    ///
    /// - [`Error::ConfigParse`] if the blob does not match the schema.
    /// - [`Error::SecretResolution`] if the access or secret key reference is
    ///   absent or cannot be resolved, or if a referenced session token
    ///   cannot be resolved.
    /// - [`Error::NamespaceResolution`] if the namespace cannot be read.
    pub async fn resolve(&self, location: &PluginLocation) -> Result<ResolvedStorageConfig> {
        let config = parse_plugin_configuration(&location.configuration)?;

        if config.use_sdk_creds {
            tracing::debug!(bucket = %config.bucket, "Using ambient credentials");
            return Ok(ResolvedStorageConfig::from_parts(
                config,
                &location.key,
                Credentials::Ambient,
            ));
        }

        let access_ref = required_reference(&config.access_key_secret, CredentialKind::AccessKey)?;
        let secret_ref = required_reference(&config.secret_key_secret, CredentialKind::SecretKey)?;

        let namespace = self
            .namespace
            .namespace()
            .await
            .map_err(Error::NamespaceResolution)?;

        let access_key = self
            .lookup(&namespace, access_ref, CredentialKind::AccessKey)
            .await?
            .ok_or_else(|| not_found(access_ref, CredentialKind::AccessKey))?;
        let secret_key = self
            .lookup(&namespace, secret_ref, CredentialKind::SecretKey)
            .await?
            .ok_or_else(|| not_found(secret_ref, CredentialKind::SecretKey))?;

        let session_token = match config
            .session_token_secret
            .as_ref()
            .filter(|selector| selector.is_complete())
        {
            Some(selector) => match self
                .lookup(&namespace, selector, CredentialKind::SessionToken)
                .await?
            {
                Some(token) => Some(token),
                None if selector.is_optional() => {
                    tracing::debug!(
                        secret = %selector.name,
                        key = %selector.key,
                        "Optional session token not found"
                    );
                    None
                }
                None => return Err(not_found(selector, CredentialKind::SessionToken)),
            },
            None => None,
        };

        Ok(ResolvedStorageConfig::from_parts(
            config,
            &location.key,
            Credentials::Explicit {
                access_key,
                secret_key,
                session_token,
            },
        ))
    }

    /// Fetches one value. Missing and empty values both come back as `None`.
    async fn lookup(
        &self,
        namespace: &str,
        selector: &SecretKeySelector,
        which: CredentialKind,
    ) -> Result<Option<String>> {
        let value = self
            .secrets
            .get(namespace, &selector.name, &selector.key)
            .await
            .map_err(|e| Error::SecretResolution {
                which,
                source: SecretError::Store(e),
            })?;

        match value {
            Some(value) if value.is_empty() => {
                if which.is_required() || !selector.is_optional() {
                    return Err(Error::SecretResolution {
                        which,
                        source: SecretError::Empty {
                            name: selector.name.clone(),
                            key: selector.key.clone(),
                        },
                    });
                }
                Ok(None)
            }
            other => Ok(other),
        }
    }
}

fn required_reference(
    selector: &Option<SecretKeySelector>,
    which: CredentialKind,
) -> Result<&SecretKeySelector> {
    selector
        .as_ref()
        .filter(|selector| selector.is_complete())
        .ok_or(Error::SecretResolution {
            which,
            source: SecretError::MissingReference,
        })
}

fn not_found(selector: &SecretKeySelector, which: CredentialKind) -> Error {
    Error::SecretResolution {
        which,
        source: SecretError::NotFound {
            name: selector.name.clone(),
            key: selector.key.clone(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secret::SecretStoreError;
    use async_trait::async_trait;
    use std::{collections::HashMap, io, sync::Mutex};

    #[derive(Debug, Default)]
    struct FakeSecrets {
        values: HashMap<(String, String, String), String>,
        calls: Mutex<Vec<(String, String, String)>>,
        fail: bool,
    }

    impl FakeSecrets {
        fn with(mut self, name: &str, key: &str, value: &str) -> Self {
            self.values.insert(
                ("argo".to_string(), name.to_string(), key.to_string()),
                value.to_string(),
            );
            self
        }

        fn calls(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl SecretStore for FakeSecrets {
        async fn get(
            &self,
            namespace: &str,
            secret_name: &str,
            secret_key: &str,
        ) -> core::result::Result<Option<String>, SecretStoreError> {
            let id = (
                namespace.to_string(),
                secret_name.to_string(),
                secret_key.to_string(),
            );
            self.calls.lock().unwrap().push(id.clone());
            if self.fail {
                return Err(SecretStoreError::Unavailable("boom".to_string()));
            }
            Ok(self.values.get(&id).cloned())
        }
    }

    #[derive(Debug)]
    struct FixedNamespace(Option<&'static str>);

    #[async_trait]
    impl NamespaceSource for FixedNamespace {
        async fn namespace(&self) -> io::Result<String> {
            self.0
                .map(str::to_string)
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no service account"))
        }
    }

    fn resolver(secrets: FakeSecrets) -> (Resolver, Arc<FakeSecrets>) {
        let secrets = Arc::new(secrets);
        let resolver = Resolver::new(secrets.clone(), Arc::new(FixedNamespace(Some("argo"))));
        (resolver, secrets)
    }

    fn location(configuration: &str) -> PluginLocation {
        PluginLocation {
            name: "s3".to_string(),
            configuration: configuration.to_string(),
            key: "runs/1/out.tgz".to_string(),
        }
    }

    const EXPLICIT: &str = r"
bucket: my-bucket
endpoint: minio:9000
insecure: true
accessKeySecret:
  name: my-minio-cred
  key: accesskey
secretKeySecret:
  name: my-minio-cred
  key: secretkey
";

    fn minio_secrets() -> FakeSecrets {
        FakeSecrets::default()
            .with("my-minio-cred", "accesskey", "admin")
            .with("my-minio-cred", "secretkey", "password")
    }

    #[tokio::test]
    async fn ambient_credentials_skip_the_secret_store() {
        let (resolver, secrets) = resolver(FakeSecrets {
            fail: true,
            ..Default::default()
        });
        let config = resolver
            .resolve(&location(
                "bucket: b\nuseSDKCreds: true\naccessKeySecret:\n  name: n\n  key: k\n",
            ))
            .await
            .unwrap();

        assert!(config.use_ambient_credentials());
        assert_eq!(config.access_key(), None);
        assert_eq!(config.secret_key(), None);
        assert_eq!(config.session_token(), None);
        assert_eq!(secrets.calls(), 0);
    }

    #[tokio::test]
    async fn ambient_credentials_do_not_need_a_namespace() {
        let resolver = Resolver::new(
            Arc::new(FakeSecrets::default()),
            Arc::new(FixedNamespace(None)),
        );
        let config = resolver
            .resolve(&location("useSDKCreds: true\n"))
            .await
            .unwrap();
        assert!(config.use_ambient_credentials());
    }

    #[tokio::test]
    async fn explicit_references_resolve_to_store_values() {
        let (resolver, secrets) = resolver(minio_secrets());
        let config = resolver.resolve(&location(EXPLICIT)).await.unwrap();

        assert_eq!(config.access_key(), Some("admin"));
        assert_eq!(config.secret_key(), Some("password"));
        assert_eq!(config.session_token(), None);
        assert_eq!(config.bucket, "my-bucket");
        assert_eq!(config.endpoint, "minio:9000");
        assert_eq!(config.key, "runs/1/out.tgz");
        assert!(!config.secure);
        assert_eq!(secrets.calls(), 2);
    }

    #[tokio::test]
    async fn secure_defaults_to_true() {
        let (resolver, _) = resolver(FakeSecrets::default());
        let config = resolver
            .resolve(&location("useSDKCreds: true\n"))
            .await
            .unwrap();
        assert!(config.secure);
    }

    #[tokio::test]
    async fn missing_access_reference_is_a_hard_failure() {
        let (resolver, secrets) = resolver(minio_secrets());
        let err = resolver
            .resolve(&location(
                "bucket: b\nendpoint: e:9000\ninsecure: true\nuseSDKCreds: false\n",
            ))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::SecretResolution {
                which: CredentialKind::AccessKey,
                source: SecretError::MissingReference,
            }
        ));
        assert!(err.to_string().contains("failed to resolve access key"));
        assert_eq!(secrets.calls(), 0);
    }

    #[tokio::test]
    async fn missing_secret_reference_is_a_hard_failure() {
        let (resolver, _) = resolver(minio_secrets());
        let err = resolver
            .resolve(&location(
                "accessKeySecret:\n  name: my-minio-cred\n  key: accesskey\n",
            ))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::SecretResolution {
                which: CredentialKind::SecretKey,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn absent_value_for_required_key_fails_even_when_optional() {
        let (resolver, _) = resolver(FakeSecrets::default().with("my-minio-cred", "accesskey", "a"));
        let err = resolver
            .resolve(&location(
                r"
accessKeySecret:
  name: my-minio-cred
  key: accesskey
secretKeySecret:
  name: my-minio-cred
  key: secretkey
  optional: true
",
            ))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "failed to resolve secret key: secret key secretkey not found in secret my-minio-cred"
        );
    }

    #[tokio::test]
    async fn empty_value_for_required_key_fails() {
        let (resolver, _) = resolver(
            FakeSecrets::default()
                .with("my-minio-cred", "accesskey", "")
                .with("my-minio-cred", "secretkey", "s"),
        );
        let err = resolver.resolve(&location(EXPLICIT)).await.unwrap_err();
        assert!(matches!(
            err,
            Error::SecretResolution {
                which: CredentialKind::AccessKey,
                source: SecretError::Empty { .. },
            }
        ));
    }

    #[tokio::test]
    async fn session_token_is_resolved_when_referenced() {
        let (resolver, secrets) =
            resolver(minio_secrets().with("my-minio-cred", "sessiontoken", "tok"));
        let blob =
            format!("{EXPLICIT}sessionTokenSecret:\n  name: my-minio-cred\n  key: sessiontoken\n");
        let config = resolver.resolve(&location(&blob)).await.unwrap();
        assert_eq!(config.session_token(), Some("tok"));
        assert_eq!(secrets.calls(), 3);
    }

    #[tokio::test]
    async fn session_token_failure_is_distinguished() {
        let (resolver, _) = resolver(minio_secrets());
        let blob =
            format!("{EXPLICIT}sessionTokenSecret:\n  name: my-minio-cred\n  key: sessiontoken\n");
        let err = resolver.resolve(&location(&blob)).await.unwrap_err();
        assert!(matches!(
            err,
            Error::SecretResolution {
                which: CredentialKind::SessionToken,
                ..
            }
        ));
        assert!(err.to_string().starts_with("failed to resolve session token"));
    }

    #[tokio::test]
    async fn optional_session_token_may_be_absent() {
        let (resolver, _) = resolver(minio_secrets());
        let blob = format!(
            "{EXPLICIT}sessionTokenSecret:\n  name: my-minio-cred\n  key: sessiontoken\n  optional: true\n"
        );
        let config = resolver.resolve(&location(&blob)).await.unwrap();
        assert_eq!(config.session_token(), None);
        assert_eq!(config.access_key(), Some("admin"));
    }

    #[tokio::test]
    async fn namespace_failure_is_reported() {
        let resolver = Resolver::new(Arc::new(minio_secrets()), Arc::new(FixedNamespace(None)));
        let err = resolver.resolve(&location(EXPLICIT)).await.unwrap_err();
        assert!(matches!(err, Error::NamespaceResolution(_)));
        assert!(err.to_string().starts_with("failed to get namespace"));
    }

    #[tokio::test]
    async fn store_failure_is_a_secret_resolution_error() {
        let (resolver, _) = resolver(FakeSecrets {
            fail: true,
            ..Default::default()
        });
        let err = resolver.resolve(&location(EXPLICIT)).await.unwrap_err();
        assert!(matches!(
            err,
            Error::SecretResolution {
                which: CredentialKind::AccessKey,
                source: SecretError::Store(_),
            }
        ));
    }

    #[tokio::test]
    async fn unknown_field_fails_before_any_lookup() {
        let (resolver, secrets) = resolver(minio_secrets());
        let blob = format!("{EXPLICIT}typo: 1\n");
        let err = resolver.resolve(&location(&blob)).await.unwrap_err();
        assert!(matches!(err, Error::ConfigParse(_)));
        assert_eq!(secrets.calls(), 0);
    }

    #[test]
    fn debug_output_redacts_credentials() {
        let credentials = Credentials::Explicit {
            access_key: "admin".to_string(),
            secret_key: "password".to_string(),
            session_token: Some("tok".to_string()),
        };
        let rendered = format!("{credentials:?}");
        assert!(!rendered.contains("admin"));
        assert!(!rendered.contains("password"));
        assert!(!rendered.contains("tok\""));
    }
}
