//! Async TCP server using Tokio.
//!
//! Accepts TCP connections and dispatches HTTP/1.1 requests through a
//! [`Router`]. Supports HTTP/1.1 persistent connections (keep-alive) and
//! signal-driven graceful shutdown: on SIGINT/SIGTERM the accept loop stops,
//! in-flight connections get a grace period to finish, and the process
//! closer registry runs.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::http::{
    StatusCode,
    request::{Request, RequestError},
    response::Response,
};
use crate::lifecycle;
use crate::router::Router;

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Maximum size of a complete HTTP request we will buffer before rejecting it (8 MiB).
const MAX_REQUEST_SIZE: usize = 8 * 1024 * 1024;

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

/// Default grace period for in-flight requests during shutdown.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// The trellis HTTP server.
///
/// Binds to a TCP address and dispatches incoming HTTP/1.1 requests through
/// a [`Router`].
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use trellis::{Router, Server, StatusCode};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut router = Router::new();
///     router.get("/", |ctx: trellis::Context| async move {
///         ctx.string(StatusCode::Ok, "Hello, World!")
///     });
///
///     let server = Server::bind("127.0.0.1:8080").await?;
///     server.run(Arc::new(router)).await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// Binds the server to the given TCP address.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound
    /// (e.g. port already in use, insufficient permissions).
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_owned(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serves requests until SIGINT/SIGTERM, then shuts down gracefully with
    /// the default grace period.
    pub async fn run(self, router: Arc<Router>) -> Result<(), ServerError> {
        let shutdown = CancellationToken::new();
        spawn_signal_listener(shutdown.clone());
        self.run_until(router, shutdown, DEFAULT_SHUTDOWN_GRACE).await
    }

    /// Serves requests until `shutdown` fires, waits up to `grace` for
    /// in-flight connections to finish, then runs the closer registry.
    pub async fn run_until(
        self,
        router: Arc<Router>,
        shutdown: CancellationToken,
        grace: Duration,
    ) -> Result<(), ServerError> {
        info!(address = %self.local_addr, mode = %lifecycle::mode(), "trellis listening");

        let tracker = TaskTracker::new();

        loop {
            let (stream, peer_addr) = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        error!(error = %e, "failed to accept connection");
                        continue;
                    }
                },
            };

            debug!(peer = %peer_addr, "connection accepted");
            let router = Arc::clone(&router);
            let connection_shutdown = shutdown.clone();

            tracker.spawn(async move {
                if let Err(e) =
                    handle_connection(stream, peer_addr, router, connection_shutdown).await
                {
                    warn!(peer = %peer_addr, error = %e, "connection closed with error");
                }
            });
        }

        // Stop accepting, drain in-flight connections, then tear down
        // registered resources.
        info!(in_flight = tracker.len(), "shutting down — draining connections");
        drop(self.listener);
        tracker.close();
        tokio::select! {
            _ = tracker.wait() => debug!("all connections drained"),
            _ = tokio::time::sleep(grace) => {
                warn!(remaining = tracker.len(), "grace period expired — forcing shutdown");
            }
        }
        lifecycle::run_closers();
        Ok(())
    }
}

/// Cancels `shutdown` on SIGINT or, on Unix, SIGTERM.
fn spawn_signal_listener(shutdown: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(sigterm) => sigterm,
                Err(e) => {
                    error!(error = %e, "failed to install SIGTERM handler");
                    return;
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
                _ = sigterm.recv() => info!("received SIGTERM"),
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            info!("received interrupt");
        }
        shutdown.cancel();
    });
}

/// Handles a single TCP connection over its lifetime.
///
/// HTTP/1.1 connections are persistent by default: we loop, reading one
/// request per iteration, until the peer closes the connection, signals
/// `Connection: close`, or the server begins shutting down.
async fn handle_connection(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    router: Arc<Router>,
    shutdown: CancellationToken,
) -> Result<(), std::io::Error> {
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);

    loop {
        let bytes_read = tokio::select! {
            _ = shutdown.cancelled() => {
                debug!(peer = %peer_addr, "shutdown — closing idle connection");
                break;
            }
            read = stream.read_buf(&mut buf) => read?,
        };

        if bytes_read == 0 {
            debug!(peer = %peer_addr, "connection closed by peer");
            break;
        }

        // Guard against excessively large requests.
        if buf.len() > MAX_REQUEST_SIZE {
            warn!(peer = %peer_addr, "request too large — sending 413");
            let response = Response::new(StatusCode::PayloadTooLarge)
                .body("Request entity too large")
                .keep_alive(false);
            stream.write_all(&response.into_bytes()).await?;
            break;
        }

        // Attempt to parse the buffered data as an HTTP request.
        let (mut request, body_offset) = match Request::parse(&buf) {
            Ok(pair) => pair,
            Err(RequestError::Incomplete) => {
                // Headers not yet fully received — read more data.
                continue;
            }
            Err(e) => {
                warn!(peer = %peer_addr, error = %e, "bad request — sending 400");
                let response = Response::new(StatusCode::BadRequest)
                    .body(format!("Bad Request: {e}"))
                    .keep_alive(false);
                stream.write_all(&response.into_bytes()).await?;
                break;
            }
        };

        // Wait for the full body to arrive if Content-Length is set.
        let content_length = request.content_length().unwrap_or(0);
        let total_needed = body_offset + content_length;
        if buf.len() < total_needed {
            continue;
        }

        let keep_alive = request.is_keep_alive();
        request.set_remote_addr(peer_addr);

        debug!(
            peer = %peer_addr,
            method = %request.method(),
            path = %request.path(),
            "dispatching request"
        );

        let response = router.dispatch(request).await;
        let response = response.keep_alive(keep_alive && !shutdown.is_cancelled());
        stream.write_all(&response.into_bytes()).await?;
        stream.flush().await?;

        // Drop the consumed request bytes from the buffer.
        let _ = buf.split_to(total_needed);

        if !keep_alive || shutdown.is_cancelled() {
            debug!(peer = %peer_addr, "closing connection");
            break;
        }
    }

    Ok(())
}
