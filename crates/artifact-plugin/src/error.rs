//! Error types for artifact resolution and storage operations.
//!
//! [`Error`] is the taxonomy every request pipeline step reports into. The
//! transport layer decides how each variant reaches the caller: structural
//! failures become transport errors, everything else is folded into a
//! structured response.
//!
//! ## Error Cases
//! - `InvalidRequest`: The request is structurally malformed.
//! - `ConfigParse`: The configuration blob does not match the strict schema.
//! - `NamespaceResolution`: The process could not determine its own
//!   namespace.
//! - `SecretResolution`: A credential reference could not be resolved.
//! - `Storage`: The storage driver reported a failure.

use crate::{driver::StorageError, secret::SecretError};
use core::fmt;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the artifact plugin pipeline.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The request is missing a required sub-message.
    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// The configuration blob is not valid YAML or has unknown fields.
    #[error("failed to parse plugin configuration: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// The namespace used for secret lookups could not be read.
    #[error("failed to get namespace: {0}")]
    NamespaceResolution(#[source] std::io::Error),

    /// One of the three credential references failed to resolve.
    #[error("failed to resolve {which}: {source}")]
    SecretResolution {
        which: CredentialKind,
        #[source]
        source: SecretError,
    },

    /// The driver failed while performing `operation`.
    #[error("{operation} failed: {source}")]
    Storage {
        operation: &'static str,
        #[source]
        source: StorageError,
    },
}

impl Error {
    pub fn invalid_request(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }

    pub fn storage(operation: &'static str, source: StorageError) -> Self {
        Self::Storage { operation, source }
    }

    /// Returns `true` for failures caused by the shape of the request rather
    /// than by configuration, secrets, or storage.
    pub const fn is_invalid_request(&self) -> bool {
        matches!(self, Self::InvalidRequest { .. })
    }
}

/// Identifies which credential reference a [`Error::SecretResolution`] is
/// about.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CredentialKind {
    AccessKey,
    SecretKey,
    SessionToken,
}

impl CredentialKind {
    /// Whether resolution of this credential may be skipped entirely.
    pub const fn is_required(self) -> bool {
        !matches!(self, Self::SessionToken)
    }
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AccessKey => write!(f, "access key"),
            Self::SecretKey => write!(f, "secret key"),
            Self::SessionToken => write!(f, "session token"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_resolution_names_the_credential() {
        let err = Error::SecretResolution {
            which: CredentialKind::AccessKey,
            source: SecretError::MissingReference,
        };
        assert_eq!(
            err.to_string(),
            "failed to resolve access key: no secret reference configured"
        );

        let err = Error::SecretResolution {
            which: CredentialKind::SessionToken,
            source: SecretError::NotFound {
                name: "creds".to_string(),
                key: "token".to_string(),
            },
        };
        assert_eq!(
            err.to_string(),
            "failed to resolve session token: secret key token not found in secret creds"
        );
    }

    #[test]
    fn storage_error_names_the_operation() {
        let err = Error::storage("load", StorageError::NotFound("a/b".to_string()));
        assert_eq!(err.to_string(), "load failed: object a/b not found");
        assert!(!err.is_invalid_request());
        assert!(Error::invalid_request("artifact is required").is_invalid_request());
    }
}
