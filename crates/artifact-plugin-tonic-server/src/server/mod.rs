//! The artifact plugin gRPC server.
//!
//! ## Structure
//!
//! - [`config`] - CLI and environment configuration.
//! - [`lifecycle`] - Socket ownership, server state, and graceful drain.
//! - [`service`] - The gRPC service and request validation.
//! - [`streaming`] - Chunked encoding for `OpenStream`.
//! - [`telemetry`] - Logging, tracing, and metrics setup.

pub mod config;
pub mod lifecycle;
pub mod service;
pub mod streaming;
pub mod telemetry;

use artifact_plugin_tonic_core::proto::{
    FILE_DESCRIPTOR_SET, artifact_service_server::ArtifactServiceServer,
};
use lifecycle::{Lifecycle, incoming};
use service::handler::PluginService;
use std::sync::Arc;
use tokio::net::UnixListener;
use tokio_util::sync::CancellationToken;
use tonic::{codec::CompressionEncoding, transport::Server};
use tonic_health::server::HealthReporter;
use tonic_reflection::server::Builder;

/// Serves `service` on `listener` until `shutdown` is cancelled and every
/// in-flight call has finished.
///
/// Cancelling `shutdown` closes the listener, reports the service as not
/// serving, and then waits for in-flight calls without a deadline.
pub async fn serve(
    listener: UnixListener,
    service: PluginService,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let lifecycle = service.lifecycle().clone();

    let (health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter
        .set_serving::<ArtifactServiceServer<PluginService>>()
        .await;

    let reflection = Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()?;

    lifecycle.mark_serving();
    tracing::info!("Serving artifact operations");

    let drain = tokio::spawn(drain(
        lifecycle.clone(),
        health_reporter,
        shutdown.clone(),
    ));

    // The server stops accepting only after the listener itself is gone.
    let closed = CancellationToken::new();
    let result = Server::builder()
        .add_service(health_service)
        .add_service(reflection)
        .add_service(build_artifact_service(service))
        .serve_with_incoming_shutdown(
            incoming(listener, shutdown.clone(), closed.clone()),
            closed.cancelled_owned(),
        )
        .await;

    if shutdown.is_cancelled() {
        if let Err(e) = drain.await {
            tracing::warn!("Drain task failed: {e}");
        }
    } else {
        drain.abort();
    }
    lifecycle.mark_stopped();

    result?;
    tracing::info!("Service shut down successfully");
    Ok(())
}

/// Enters `Draining` once `shutdown` fires and publishes the status.
async fn drain(
    lifecycle: Arc<Lifecycle>,
    health_reporter: HealthReporter,
    shutdown: CancellationToken,
) {
    shutdown.cancelled().await;
    if lifecycle.begin_drain() {
        tracing::info!(
            in_flight = lifecycle.in_flight(),
            "Draining, waiting for in-flight calls"
        );
    }
    health_reporter
        .set_not_serving::<ArtifactServiceServer<PluginService>>()
        .await;
}

fn build_artifact_service(service: PluginService) -> ArtifactServiceServer<PluginService> {
    ArtifactServiceServer::new(service)
        .send_compressed(CompressionEncoding::Zstd)
        .send_compressed(CompressionEncoding::Gzip)
        .send_compressed(CompressionEncoding::Deflate)
        .accept_compressed(CompressionEncoding::Zstd)
        .accept_compressed(CompressionEncoding::Gzip)
        .accept_compressed(CompressionEncoding::Deflate)
}
