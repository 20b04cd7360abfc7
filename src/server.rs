//! RPC server.
//!
//! Accepts connections, runs a [`Session`] per connection, and tracks the
//! live sessions so that shutdown can close all of them.

use crate::config::{Config, TransportType};
use crate::registry::MethodRegistry;
use crate::session::Session;
use crate::shutdown::{Shutdown, ShutdownHandle};
use crate::transport::{FramedTransport, WsTransport};
use slab::Slab;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Server errors
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("connection limiter closed")]
    LimiterClosed(#[from] tokio::sync::AcquireError),
}

/// Bookkeeping for one live connection.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub peer: SocketAddr,
    pub connected_at: Instant,
}

/// The set of live sessions, keyed by connection id.
///
/// Provides O(1) insert and remove through slab allocation.
#[derive(Debug, Default)]
pub struct SessionSet {
    sessions: Mutex<Slab<SessionInfo>>,
}

impl SessionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection.
    ///
    /// The returned guard removes the entry when dropped, exactly once.
    pub fn insert(self: &Arc<Self>, peer: SocketAddr) -> SessionGuard {
        let id = self.lock().insert(SessionInfo {
            peer,
            connected_at: Instant::now(),
        });
        SessionGuard {
            set: Arc::clone(self),
            id,
        }
    }

    /// Look up a live session.
    pub fn get(&self, id: usize) -> Option<SessionInfo> {
        self.lock().get(id).cloned()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Check if there are no live sessions.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn remove(&self, id: usize) -> Option<SessionInfo> {
        self.lock().try_remove(id)
    }

    fn lock(&self) -> MutexGuard<'_, Slab<SessionInfo>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Membership of one connection in a [`SessionSet`].
#[derive(Debug)]
pub struct SessionGuard {
    set: Arc<SessionSet>,
    id: usize,
}

impl SessionGuard {
    pub fn id(&self) -> usize {
        self.id
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Some(info) = self.set.remove(self.id) {
            debug!(
                conn_id = self.id,
                peer = %info.peer,
                duration_ms = info.connected_at.elapsed().as_millis() as u64,
                "Connection removed"
            );
        }
    }
}

/// Server instance
pub struct Server {
    config: Config,
    registry: Arc<MethodRegistry>,
    sessions: Arc<SessionSet>,
    connection_limit: Arc<Semaphore>,
    shutdown: ShutdownHandle,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: Config, registry: MethodRegistry) -> Self {
        let permits = config.max_connections.min(Semaphore::MAX_PERMITS);
        let connection_limit = Arc::new(Semaphore::new(permits));

        Server {
            config,
            registry: Arc::new(registry),
            sessions: Arc::new(SessionSet::new()),
            connection_limit,
            shutdown: ShutdownHandle::new(),
        }
    }

    /// Handle that stops the server and closes every session.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Number of live sessions.
    pub fn live_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = bind(self.config.listen)?;
        self.serve(listener).await
    }

    /// Serve connections from an already-bound listener until shutdown.
    ///
    /// Returns once every session has closed.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        let address = listener.local_addr()?;
        info!(
            address = %address,
            transport = ?self.config.transport,
            methods = ?self.registry.names(),
            "Server listening"
        );

        let mut shutdown = self.shutdown.subscribe();
        let mut tasks = JoinSet::new();

        loop {
            // Reap finished connection tasks
            while let Some(result) = tasks.try_join_next() {
                log_task_result(result);
            }

            // Wait for a connection slot
            let permit = tokio::select! {
                _ = shutdown.recv() => break,
                permit = Arc::clone(&self.connection_limit).acquire_owned() => permit?,
            };

            let (stream, peer) = tokio::select! {
                _ = shutdown.recv() => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                        continue;
                    }
                },
            };

            let guard = self.sessions.insert(peer);
            debug!(conn_id = guard.id(), peer = %peer, "New connection");

            let session = Session::new(
                guard.id(),
                peer,
                Arc::clone(&self.registry),
                self.config.session,
            );
            let transport = self.config.transport;
            let max_frame_size = self.config.max_frame_size;
            let shutdown = self.shutdown.subscribe();

            tasks.spawn(async move {
                let conn_id = guard.id();
                if let Err(e) =
                    handle_connection(stream, transport, max_frame_size, session, shutdown).await
                {
                    debug!(conn_id, error = %e, "Connection error");
                }
                drop(guard);
                drop(permit);
            });
        }

        info!(live = self.sessions.len(), "Shutting down, closing sessions");
        while let Some(result) = tasks.join_next().await {
            log_task_result(result);
        }
        info!("All sessions closed");

        Ok(())
    }
}

fn log_task_result(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        warn!(error = %e, "Connection task failed");
    }
}

/// Handle a single client connection
async fn handle_connection(
    stream: TcpStream,
    transport: TransportType,
    max_frame_size: usize,
    session: Session,
    mut shutdown: Shutdown,
) -> io::Result<()> {
    stream.set_nodelay(true)?;

    match transport {
        TransportType::Tcp => {
            session
                .run(FramedTransport::new(stream, max_frame_size), shutdown)
                .await
        }
        TransportType::WebSocket => {
            let ws = tokio::select! {
                _ = shutdown.recv() => return Ok(()),
                ws = WsTransport::accept(stream, max_frame_size) => ws?,
            };
            session.run(ws, shutdown).await
        }
    }
}

/// Create a TCP listener with SO_REUSEADDR.
pub fn bind(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    TcpListener::from_std(socket.into())
}
