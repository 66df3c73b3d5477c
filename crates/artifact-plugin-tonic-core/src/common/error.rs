//! gRPC status mapping for domain errors.
//!
//! Only structurally invalid requests are the caller's fault at the transport
//! level. Every other failure reaching a status is an `Internal` error; the
//! unary handlers never get here for those, they fold them into responses
//! instead.

use artifact_plugin::Error;
use tonic::Status;

/// Converts a domain error into a [`Status`].
pub trait IntoStatus {
    fn into_status(self) -> Status;
}

impl IntoStatus for Error {
    fn into_status(self) -> Status {
        match self {
            Error::InvalidRequest { reason } => Status::invalid_argument(reason),
            other => Status::internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use artifact_plugin::{CredentialKind, SecretError};
    use tonic::Code;

    #[test]
    fn invalid_request_is_invalid_argument() {
        let status = Error::invalid_request("artifact is required").into_status();
        assert_eq!(status.code(), Code::InvalidArgument);
        assert_eq!(status.message(), "artifact is required");
    }

    #[test]
    fn resolution_failure_is_internal() {
        let status = Error::SecretResolution {
            which: CredentialKind::AccessKey,
            source: SecretError::MissingReference,
        }
        .into_status();
        assert_eq!(status.code(), Code::Internal);
        assert!(status.message().starts_with("failed to resolve access key"));
    }
}
