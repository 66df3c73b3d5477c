use anyhow::bail;
use artifact_plugin_tonic_core::artifact_plugin::secret::kubernetes::SERVICE_ACCOUNT_DIR;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Runtime configuration for the `artifact-plugin-tonic-server` binary.
///
/// The socket path is the only required input and is always positional. The
/// remaining tunables have defaults suitable for running as a sidecar in a
/// workflow pod and can be overridden with flags or environment variables.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "artifact-plugin-tonic-server",
    version,
    about = "A gRPC sidecar serving workflow artifact storage over a Unix socket"
)]
pub struct CliArgs {
    /// Filesystem path of the Unix socket to listen on.
    ///
    /// A stale socket left at this path is replaced. The parent directory is
    /// created if missing.
    pub socket_path: PathBuf,

    /// Capacity of the buffer between a storage read and its gRPC stream.
    ///
    /// Counted in 1 MiB chunks. Lower values bound memory per stream; higher
    /// values let reads run further ahead of a slow client.
    ///
    /// Environment variable: `STREAM_BUFFER_SIZE`
    #[arg(long, env = "STREAM_BUFFER_SIZE", default_value_t = 4)]
    pub stream_buffer_size: usize,

    /// File holding the namespace secret lookups are scoped to.
    ///
    /// Defaults to the `namespace` file of the service account directory.
    ///
    /// Environment variable: `NAMESPACE_FILE`
    #[arg(long, env = "NAMESPACE_FILE")]
    pub namespace_file: Option<PathBuf>,

    /// Mounted service account directory holding the API token and CA.
    ///
    /// Environment variable: `SERVICE_ACCOUNT_DIR`
    #[arg(long, env = "SERVICE_ACCOUNT_DIR", default_value = SERVICE_ACCOUNT_DIR)]
    pub service_account_dir: PathBuf,

    /// Console log format.
    ///
    /// Environment variable: `LOG_FORMAT`
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub socket_path: PathBuf,
    pub stream_buffer_size: usize,
    pub namespace_file: PathBuf,
    pub service_account_dir: PathBuf,
    pub log_format: LogFormat,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.socket_path.as_os_str().is_empty() {
            bail!("socket path must not be empty");
        }

        if args.stream_buffer_size == 0 {
            bail!("STREAM_BUFFER_SIZE must be greater than 0");
        }

        let namespace_file = args
            .namespace_file
            .unwrap_or_else(|| args.service_account_dir.join("namespace"));

        Ok(Self {
            socket_path: args.socket_path,
            stream_buffer_size: args.stream_buffer_size,
            namespace_file,
            service_account_dir: args.service_account_dir,
            log_format: args.log_format,
        })
    }
}
