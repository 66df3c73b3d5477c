use artifact_plugin_tonic_core::artifact_plugin::{
    Resolver,
    driver::S3DriverFactory,
    secret::{KubernetesSecretStore, ServiceAccountNamespace},
};
use artifact_plugin_tonic_server::server::{
    self,
    config::{CliArgs, ServerConfig},
    lifecycle::{Lifecycle, bind_listener, remove_socket, watch_signals},
    service::handler::PluginService,
    telemetry::init_telemetry,
};
use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    let providers = init_telemetry(config.log_format)?;
    log_startup_info(&config);

    let lifecycle = Arc::new(Lifecycle::new());
    let listener = match bind_listener(&config.socket_path) {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to listen on {}: {e}", config.socket_path.display());
            providers.shutdown();
            return Err(e.into());
        }
    };
    lifecycle.mark_listening();

    let resolver = Resolver::new(
        Arc::new(KubernetesSecretStore::in_cluster(&config.service_account_dir)),
        Arc::new(ServiceAccountNamespace::new(&config.namespace_file)),
    );
    let service = PluginService::new(
        resolver,
        Arc::new(S3DriverFactory),
        lifecycle,
        config.stream_buffer_size,
    );

    let shutdown = CancellationToken::new();
    let signals = tokio::spawn(watch_signals(shutdown.clone()));

    let result = server::serve(listener, service, shutdown).await;

    signals.abort();
    remove_socket(&config.socket_path);
    if let Err(e) = &result {
        tracing::error!("Server failed: {e:#}");
    }
    providers.shutdown();
    result
}

fn log_startup_info(config: &ServerConfig) {
    if cfg!(debug_assertions) {
        tracing::info!(
            "Starting artifact plugin on {} with full config: {:#?}",
            config.socket_path.display(),
            config
        );
    } else {
        tracing::info!(
            "Starting artifact plugin on {} with stream buffer of {} chunks",
            config.socket_path.display(),
            config.stream_buffer_size
        );
    }
}
