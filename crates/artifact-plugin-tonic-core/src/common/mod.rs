//! Wire types and the mappings between them and the domain crate.
//!
//! ## Submodules
//!
//! - [`error`] - Maps domain errors onto gRPC status codes.
//! - [`response`] - Folds operation outcomes into structured responses.
//! - [`convert`] - Domain to wire conversions.

pub mod convert;
pub mod error;
pub mod response;
pub mod proto {
    tonic::include_proto!("artifact.v1");
    pub const FILE_DESCRIPTOR_SET: &[u8] =
        tonic::include_file_descriptor_set!("artifact_descriptor");
}
