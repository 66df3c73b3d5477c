//! Structured responses for the unary operations.
//!
//! A failed outcome becomes a response with `success = false` (or an empty
//! result) and the error's display text, never a transport error.

use crate::proto::{
    DeleteArtifactResponse, IsDirectoryResponse, ListObjectsResponse, LoadArtifactResponse,
    OpenStreamResponse, SaveArtifactResponse,
};
use artifact_plugin::Result;
use bytes::Bytes;

macro_rules! success_response {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl From<Result<()>> for $ty {
                fn from(outcome: Result<()>) -> Self {
                    match outcome {
                        Ok(()) => Self {
                            success: true,
                            error: String::new(),
                        },
                        Err(e) => Self {
                            success: false,
                            error: e.to_string(),
                        },
                    }
                }
            }
        )+
    };
}

success_response!(LoadArtifactResponse, SaveArtifactResponse, DeleteArtifactResponse);

impl From<Result<Vec<String>>> for ListObjectsResponse {
    fn from(outcome: Result<Vec<String>>) -> Self {
        match outcome {
            Ok(objects) => Self {
                objects,
                error: String::new(),
            },
            Err(e) => Self {
                objects: Vec::new(),
                error: e.to_string(),
            },
        }
    }
}

impl From<Result<bool>> for IsDirectoryResponse {
    fn from(outcome: Result<bool>) -> Self {
        match outcome {
            Ok(is_directory) => Self {
                is_directory,
                error: String::new(),
            },
            Err(e) => Self {
                is_directory: false,
                error: e.to_string(),
            },
        }
    }
}

impl OpenStreamResponse {
    /// A data message. Never the last message of a complete transfer.
    pub fn chunk(data: Bytes) -> Self {
        Self {
            data,
            is_end: false,
        }
    }

    /// The terminal message of a complete transfer.
    pub fn end() -> Self {
        Self {
            data: Bytes::new(),
            is_end: true,
        }
    }
}
