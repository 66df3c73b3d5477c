//! Listener ownership and graceful shutdown.
//!
//! The server moves through `Starting → Listening → Serving → Draining →
//! Stopped`. Draining is entered once, on the first shutdown request: the
//! accept stream ends immediately so the socket stops taking connections,
//! and calls already in flight run to completion. Nothing here cancels a
//! call.

use futures::Stream;
use portable_atomic::{AtomicU8, AtomicUsize, Ordering};
use std::{
    io,
    os::unix::fs::{DirBuilderExt, FileTypeExt, PermissionsExt},
    path::Path,
    sync::Arc,
};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ServerState {
    Starting = 0,
    Listening = 1,
    Serving = 2,
    Draining = 3,
    Stopped = 4,
}

impl ServerState {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Starting,
            1 => Self::Listening,
            2 => Self::Serving,
            3 => Self::Draining,
            _ => Self::Stopped,
        }
    }
}

/// Shared server state plus the number of calls currently executing.
#[derive(Debug)]
pub struct Lifecycle {
    state: AtomicU8,
    in_flight: AtomicUsize,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(ServerState::Starting as u8),
            in_flight: AtomicUsize::new(0),
        }
    }

    pub fn state(&self) -> ServerState {
        ServerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, from: ServerState, to: ServerState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn mark_listening(&self) -> bool {
        self.transition(ServerState::Starting, ServerState::Listening)
    }

    pub fn mark_serving(&self) -> bool {
        self.transition(ServerState::Listening, ServerState::Serving)
    }

    /// Enters `Draining`. Only the first call succeeds.
    pub fn begin_drain(&self) -> bool {
        self.transition(ServerState::Serving, ServerState::Draining)
            || self.transition(ServerState::Listening, ServerState::Draining)
    }

    pub fn mark_stopped(&self) {
        self.state.store(ServerState::Stopped as u8, Ordering::Release);
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Counts a call as in flight until the returned guard drops.
    pub fn track(self: &Arc<Self>) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        InFlightGuard(Arc::clone(self))
    }
}

/// Marks one executing call. Dropping it ends the call's accounting.
#[derive(Debug)]
pub struct InFlightGuard(Arc<Lifecycle>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Replaces whatever is at `path` with a fresh Unix listener.
///
/// A stale endpoint is removed first; its absence is fine, any other removal
/// failure is returned. The parent directory is created if needed. After
/// binding, the endpoint must be a socket the owner can read and write.
///
/// Must be called from within a tokio runtime.
pub fn bind_listener(path: &Path) -> io::Result<UnixListener> {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::info!("Removed stale socket at {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(io::Error::new(
                e.kind(),
                format!("failed to remove stale socket {}: {e}", path.display()),
            ));
        }
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::DirBuilder::new()
            .recursive(true)
            .mode(0o755)
            .create(parent)?;
    }

    let listener = UnixListener::bind(path)?;

    let metadata = std::fs::metadata(path)?;
    let mode = metadata.permissions().mode();
    if !metadata.file_type().is_socket() {
        return Err(io::Error::other(format!(
            "{} is not a socket after bind",
            path.display()
        )));
    }
    if mode & 0o600 != 0o600 {
        return Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            format!(
                "socket {} is not readable and writable by its owner (mode {:o})",
                path.display(),
                mode & 0o7777
            ),
        ));
    }
    tracing::info!(
        mode = %format!("{:o}", mode & 0o7777),
        "Socket ready at {}",
        path.display()
    );

    Ok(listener)
}

/// Accepted connections until `shutdown` fires.
///
/// The stream ends as soon as the token is cancelled. The listener is dropped
/// first, so further connection attempts are refused, and `closed` is
/// cancelled after it.
pub fn incoming(
    listener: UnixListener,
    shutdown: CancellationToken,
    closed: CancellationToken,
) -> impl Stream<Item = io::Result<UnixStream>> {
    let state = (listener, shutdown, closed);
    futures::stream::unfold(state, |(listener, shutdown, closed)| async move {
        let accepted = tokio::select! {
            biased;
            () = shutdown.cancelled() => None,
            accepted = listener.accept() => Some(accepted),
        };
        let Some(accepted) = accepted else {
            drop(listener);
            tracing::info!("Listener closed, refusing new connections");
            closed.cancel();
            return None;
        };
        if let Err(e) = &accepted {
            tracing::warn!("Failed to accept connection: {e}");
        }
        Some((
            accepted.map(|(stream, _)| stream),
            (listener, shutdown, closed),
        ))
    })
}

/// Cancels `shutdown` on the first SIGTERM or Ctrl+C. Later signals are
/// logged and ignored; the drain already in progress is never cut short.
pub async fn watch_signals(shutdown: CancellationToken) {
    let mut terminate =
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(signal) => Some(signal),
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                None
            }
        };

    loop {
        let terminated = async {
            match terminate.as_mut() {
                Some(signal) => {
                    signal.recv().await;
                }
                None => std::future::pending::<()>().await,
            }
        };

        let interrupted = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl+C: {e}");
                std::future::pending::<()>().await;
            }
        };

        tokio::select! {
            () = interrupted => tracing::info!("Received Ctrl+C signal"),
            () = terminated => tracing::info!("Received SIGTERM signal"),
        }

        if shutdown.is_cancelled() {
            tracing::info!("Already draining, ignoring signal");
        } else {
            tracing::info!("Shutdown signal received, draining in-flight calls...");
            shutdown.cancel();
        }
    }
}

/// Best-effort removal of the socket file on exit.
pub fn remove_socket(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove socket {}: {e}", path.display()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn drain_begins_exactly_once() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.state(), ServerState::Starting);
        assert!(!lifecycle.mark_serving());
        assert!(lifecycle.mark_listening());
        assert!(lifecycle.mark_serving());
        assert_eq!(lifecycle.state(), ServerState::Serving);

        assert!(lifecycle.begin_drain());
        assert!(!lifecycle.begin_drain());
        assert_eq!(lifecycle.state(), ServerState::Draining);

        lifecycle.mark_stopped();
        assert_eq!(lifecycle.state(), ServerState::Stopped);
    }

    #[test]
    fn guards_track_in_flight_calls() {
        let lifecycle = Arc::new(Lifecycle::new());
        let first = lifecycle.track();
        let second = lifecycle.track();
        assert_eq!(lifecycle.in_flight(), 2);
        drop(first);
        assert_eq!(lifecycle.in_flight(), 1);
        drop(second);
        assert_eq!(lifecycle.in_flight(), 0);
    }

    #[tokio::test]
    async fn bind_replaces_stale_file_and_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/plugin.sock");
        std::fs::DirBuilder::new()
            .recursive(true)
            .create(path.parent().unwrap())
            .unwrap();
        std::fs::write(&path, "stale").unwrap();

        let _listener = bind_listener(&path).unwrap();
        assert!(std::fs::metadata(&path).unwrap().file_type().is_socket());

        remove_socket(&path);
        assert!(!path.exists());
        remove_socket(&path);
    }

    #[tokio::test]
    async fn bind_creates_missing_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/plugin.sock");
        let _listener = bind_listener(&path).unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn unremovable_stale_path_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plugin.sock");
        // A non-empty directory cannot be removed with `remove_file`.
        std::fs::DirBuilder::new().mode(0o755).create(&path).unwrap();
        std::fs::write(path.join("keep"), "x").unwrap();

        assert!(bind_listener(&path).is_err());
    }

    #[tokio::test]
    async fn incoming_ends_on_shutdown_and_refuses_connections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plugin.sock");
        let listener = bind_listener(&path).unwrap();
        let shutdown = CancellationToken::new();
        let closed = CancellationToken::new();
        let mut connections = Box::pin(incoming(listener, shutdown.clone(), closed.clone()));

        let _client = UnixStream::connect(&path).await.unwrap();
        assert!(connections.next().await.unwrap().is_ok());
        assert!(!closed.is_cancelled());

        shutdown.cancel();
        assert!(connections.next().await.is_none());
        assert!(closed.is_cancelled());

        assert!(UnixStream::connect(&path).await.is_err());
    }
}
