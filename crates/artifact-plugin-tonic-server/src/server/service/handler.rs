//! gRPC service implementation for artifact storage operations.
//!
//! This module defines [`PluginService`], the concrete implementation of the
//! [`ArtifactService`] gRPC service. Every operation runs the same pipeline:
//!
//! 1. Validate the request structure.
//! 2. Resolve the plugin configuration and its credentials.
//! 3. Build a driver for this call.
//! 4. Invoke the matching driver operation.
//! 5. Map the outcome.
//!
//! ## Response mapping
//!
//! Validation failures are `InvalidArgument` on every operation. For the five
//! unary operations, any later failure is folded into the response body and
//! the call itself succeeds. `OpenStream` has no such body, so resolution and
//! driver failures there are `Internal` and end the stream before any message
//! is sent.

use crate::server::{
    lifecycle::{InFlightGuard, Lifecycle},
    service::validator::validate_artifact,
    streaming::encoder::{CHUNK_SIZE, StreamError, encode_stream},
    telemetry::{
        add_stream_bytes, decrement_calls_inflight, increment_calls_inflight, increment_failures,
        increment_requests, record_stream_duration,
    },
};
use artifact_plugin_tonic_core::{
    artifact_plugin::{Artifact, Driver, DriverFactory, Error, Resolver, Result},
    error::IntoStatus,
    proto::{
        DeleteArtifactRequest, DeleteArtifactResponse, IsDirectoryRequest, IsDirectoryResponse,
        ListObjectsRequest, ListObjectsResponse, LoadArtifactRequest, LoadArtifactResponse,
        OpenStreamRequest, OpenStreamResponse, SaveArtifactRequest, SaveArtifactResponse,
        artifact_service_server::ArtifactService,
    },
};
use core::pin::Pin;
use std::{path::Path, sync::Arc, time::Instant};
use tokio::sync::mpsc;
use tokio_stream::{Stream, wrappers::ReceiverStream};
use tonic::{Request, Response, Status};
use tracing::Instrument;

const LOAD: &str = "load";
const SAVE: &str = "save";
const DELETE: &str = "delete";
const LIST_OBJECTS: &str = "list objects";
const IS_DIRECTORY: &str = "is directory";
const OPEN_STREAM: &str = "open stream";

/// The artifact storage gRPC service.
///
/// Holds no per-request state. Each call resolves its own configuration and
/// builds its own driver, so concurrent calls share nothing but the resolver's
/// capabilities.
#[derive(Clone)]
pub struct PluginService {
    resolver: Resolver,
    drivers: Arc<dyn DriverFactory>,
    lifecycle: Arc<Lifecycle>,
    stream_buffer_size: usize,
}

/// Accounting for one executing call.
struct CallGuard {
    _in_flight: InFlightGuard,
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        decrement_calls_inflight();
    }
}

impl PluginService {
    pub fn new(
        resolver: Resolver,
        drivers: Arc<dyn DriverFactory>,
        lifecycle: Arc<Lifecycle>,
        stream_buffer_size: usize,
    ) -> Self {
        Self {
            resolver,
            drivers,
            lifecycle,
            stream_buffer_size: stream_buffer_size.max(1),
        }
    }

    pub fn lifecycle(&self) -> &Arc<Lifecycle> {
        &self.lifecycle
    }

    fn begin(&self, operation: &'static str) -> CallGuard {
        increment_requests(operation);
        increment_calls_inflight();
        CallGuard {
            _in_flight: self.lifecycle.track(),
        }
    }

    /// Validation failure, surfaced at the transport level.
    fn reject(operation: &'static str, err: Error) -> Status {
        increment_failures(operation);
        tracing::warn!("Rejected {operation} request: {err}");
        err.into_status()
    }

    fn validate(
        operation: &'static str,
        artifact: Option<artifact_plugin_tonic_core::proto::Artifact>,
        field: &str,
    ) -> core::result::Result<Artifact, Status> {
        let artifact = validate_artifact(artifact, field).map_err(|e| Self::reject(operation, e))?;
        tracing::Span::current().record("key", tracing::field::display(artifact.object_key()));
        Ok(artifact)
    }

    /// Resolves the artifact's configuration and builds a driver for it.
    async fn driver(&self, artifact: &Artifact) -> Result<Box<dyn Driver>> {
        let config = self.resolver.resolve(artifact.plugin_location()).await?;
        Ok(self.drivers.build(config))
    }

    fn settle<T>(operation: &'static str, outcome: Result<T>) -> Result<T> {
        if let Err(e) = &outcome {
            increment_failures(operation);
            tracing::error!("{operation} failed: {e}");
        }
        outcome
    }
}

#[tonic::async_trait]
impl ArtifactService for PluginService {
    type OpenStreamStream =
        Pin<Box<dyn Stream<Item = core::result::Result<OpenStreamResponse, Status>> + Send>>;

    #[tracing::instrument(skip_all, fields(operation = LOAD, key = tracing::field::Empty))]
    async fn load(
        &self,
        req: Request<LoadArtifactRequest>,
    ) -> core::result::Result<Response<LoadArtifactResponse>, Status> {
        let _call = self.begin(LOAD);
        let LoadArtifactRequest {
            input_artifact,
            path,
        } = req.into_inner();
        let artifact = Self::validate(LOAD, input_artifact, "input artifact")?;

        let outcome = async {
            let driver = self.driver(&artifact).await?;
            driver
                .load(&artifact, Path::new(&path))
                .await
                .map_err(|e| Error::storage(LOAD, e))
        }
        .await;

        Ok(Response::new(Self::settle(LOAD, outcome).into()))
    }

    #[tracing::instrument(skip_all, fields(operation = SAVE, key = tracing::field::Empty))]
    async fn save(
        &self,
        req: Request<SaveArtifactRequest>,
    ) -> core::result::Result<Response<SaveArtifactResponse>, Status> {
        let _call = self.begin(SAVE);
        let SaveArtifactRequest {
            path,
            output_artifact,
        } = req.into_inner();
        let artifact = Self::validate(SAVE, output_artifact, "output artifact")?;

        let outcome = async {
            let driver = self.driver(&artifact).await?;
            driver
                .save(Path::new(&path), &artifact)
                .await
                .map_err(|e| Error::storage(SAVE, e))
        }
        .await;

        Ok(Response::new(Self::settle(SAVE, outcome).into()))
    }

    #[tracing::instrument(skip_all, fields(operation = DELETE, key = tracing::field::Empty))]
    async fn delete(
        &self,
        req: Request<DeleteArtifactRequest>,
    ) -> core::result::Result<Response<DeleteArtifactResponse>, Status> {
        let _call = self.begin(DELETE);
        let artifact = Self::validate(DELETE, req.into_inner().artifact, "artifact")?;

        let outcome = async {
            let driver = self.driver(&artifact).await?;
            driver
                .delete(&artifact)
                .await
                .map_err(|e| Error::storage(DELETE, e))
        }
        .await;

        Ok(Response::new(Self::settle(DELETE, outcome).into()))
    }

    #[tracing::instrument(skip_all, fields(operation = LIST_OBJECTS, key = tracing::field::Empty))]
    async fn list_objects(
        &self,
        req: Request<ListObjectsRequest>,
    ) -> core::result::Result<Response<ListObjectsResponse>, Status> {
        let _call = self.begin(LIST_OBJECTS);
        let artifact = Self::validate(LIST_OBJECTS, req.into_inner().artifact, "artifact")?;

        let outcome = async {
            let driver = self.driver(&artifact).await?;
            driver
                .list_objects(&artifact)
                .await
                .map_err(|e| Error::storage(LIST_OBJECTS, e))
        }
        .await;

        Ok(Response::new(Self::settle(LIST_OBJECTS, outcome).into()))
    }

    #[tracing::instrument(skip_all, fields(operation = IS_DIRECTORY, key = tracing::field::Empty))]
    async fn is_directory(
        &self,
        req: Request<IsDirectoryRequest>,
    ) -> core::result::Result<Response<IsDirectoryResponse>, Status> {
        let _call = self.begin(IS_DIRECTORY);
        let artifact = Self::validate(IS_DIRECTORY, req.into_inner().artifact, "artifact")?;

        let outcome = async {
            let driver = self.driver(&artifact).await?;
            driver
                .is_directory(&artifact)
                .await
                .map_err(|e| Error::storage(IS_DIRECTORY, e))
        }
        .await;

        Ok(Response::new(Self::settle(IS_DIRECTORY, outcome).into()))
    }

    /// Streams the artifact's bytes in 1 MiB messages followed by an end
    /// marker.
    ///
    /// The storage read runs on its own task, which owns the read handle and
    /// the call's in-flight accounting until the stream finishes or the
    /// client goes away.
    #[tracing::instrument(skip_all, fields(operation = OPEN_STREAM, key = tracing::field::Empty))]
    async fn open_stream(
        &self,
        req: Request<OpenStreamRequest>,
    ) -> core::result::Result<Response<Self::OpenStreamStream>, Status> {
        let call = self.begin(OPEN_STREAM);
        let artifact = Self::validate(OPEN_STREAM, req.into_inner().artifact, "artifact")?;

        let source = async {
            let driver = self.driver(&artifact).await?;
            driver
                .open_stream(&artifact)
                .await
                .map_err(|e| Error::storage(OPEN_STREAM, e))
        }
        .await;
        let source = Self::settle(OPEN_STREAM, source).map_err(IntoStatus::into_status)?;

        let (tx, rx) = mpsc::channel(self.stream_buffer_size);
        let start = Instant::now();

        let fut = async move {
            let _call = call;
            match encode_stream(source, tx, CHUNK_SIZE).await {
                Ok(summary) => {
                    add_stream_bytes(summary.bytes);
                    record_stream_duration(start.elapsed().as_secs_f64() * 1000.0);
                    tracing::info!(
                        bytes = summary.bytes,
                        chunks = summary.chunks,
                        duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                        "Stream complete"
                    );
                }
                Err(e @ StreamError::Cancelled { .. }) => {
                    tracing::info!("Stream abandoned: {e}");
                }
                Err(e @ StreamError::Read { .. }) => {
                    increment_failures(OPEN_STREAM);
                    tracing::error!("Stream aborted: {e}");
                }
            }
        };
        tokio::spawn(fut.instrument(tracing::Span::current()));

        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }
}
