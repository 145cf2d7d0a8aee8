//! Runner listener and accept loop
//!
//! [`RunnerServer::bind`] takes an already built [`ServerTransport`], so the
//! listener can never come up with half of its security configured. Each
//! accepted connection gets its own task; the TLS handshake runs inside that
//! task so a slow client never blocks the accept loop.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::signal;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use super::session::{linger, serve_session, SessionLimits, SessionOutcome};
use super::transform::Transform;
use crate::config::RunnerConfig;
use crate::error::{BtrfaasError, Result, StatusCode};
use crate::metrics;
use crate::protocol::{Frame, FrameWriter};
use crate::security::ServerTransport;
use crate::shutdown::{ShutdownConfig, ShutdownCoordinator};

/// A bound function runner
pub struct RunnerServer {
    listener: TcpListener,
    transport: ServerTransport,
    transform: Arc<dyn Transform>,
    limits: Arc<SessionLimits>,
    sessions: Arc<Semaphore>,
    shutdown: Arc<ShutdownCoordinator>,
    next_session_id: AtomicU64,
}

impl RunnerServer {
    /// Bind the listener for `transform`, secured by `transport`
    pub async fn bind(
        config: &RunnerConfig,
        transport: ServerTransport,
        transform: Arc<dyn Transform>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(config.listen_addr).await.map_err(|e| {
            BtrfaasError::Server(format!("Failed to bind {}: {}", config.listen_addr, e))
        })?;

        info!(
            addr = %listener.local_addr()?,
            function = %transform.name(),
            tls = transport.is_tls(),
            max_sessions = config.max_sessions,
            "Runner listening"
        );

        Ok(Self {
            listener,
            transport,
            transform,
            limits: Arc::new(config.limits.clone()),
            sessions: Arc::new(Semaphore::new(config.max_sessions.max(1))),
            shutdown: Arc::new(ShutdownCoordinator::with_config(ShutdownConfig {
                timeout_secs: config.shutdown_timeout_secs,
            })),
            next_session_id: AtomicU64::new(1),
        })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Coordinator used to stop this runner
    pub fn shutdown_coordinator(&self) -> Arc<ShutdownCoordinator> {
        Arc::clone(&self.shutdown)
    }

    /// Serve until Ctrl-C, then drain sessions and return
    pub async fn run(self) -> Result<()> {
        let coordinator = self.shutdown_coordinator();
        let mut serve = tokio::spawn(self.serve());

        tokio::select! {
            result = &mut serve => {
                return result.map_err(|e| BtrfaasError::Server(format!("accept loop failed: {}", e)))?;
            }
            signal = signal::ctrl_c() => {
                match signal {
                    Ok(()) => info!("Received shutdown signal"),
                    Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
                }
            }
        }

        if let Err(e) = coordinator.initiate_shutdown().await {
            warn!(error = %e, "Runner stopped before all sessions drained");
        }
        serve
            .await
            .map_err(|e| BtrfaasError::Server(format!("accept loop failed: {}", e)))?
    }

    /// Accept connections until the coordinator stops accepting
    pub async fn serve(self) -> Result<()> {
        let stop = self.shutdown.accept_token();

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, addr)) => self.spawn_connection(stream, addr),
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
                _ = stop.cancelled() => {
                    info!("Runner stopped accepting connections");
                    break;
                }
            }
        }

        Ok(())
    }

    fn spawn_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let guard = match self.shutdown.session_guard() {
            Some(guard) => guard,
            None => {
                debug!(peer = %addr, "Rejecting connection - runner is shutting down");
                return;
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            warn!(peer = %addr, error = %e, "Failed to set TCP_NODELAY");
        }

        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let transport = self.transport.clone();
        let transform = Arc::clone(&self.transform);
        let limits = Arc::clone(&self.limits);
        let sessions = Arc::clone(&self.sessions);
        let abort = self.shutdown.abort_token();

        debug!(peer = %addr, session = session_id, "Client connected");

        tokio::spawn(async move {
            let _guard = guard;
            let start = Instant::now();

            let outcome = match transport {
                ServerTransport::Insecure => {
                    run_limited(stream, addr, session_id, transform, &limits, &sessions, abort)
                        .await
                }
                ServerTransport::Tls { acceptor, .. } => {
                    // A peer that never finishes the handshake must not hold a drain slot
                    let handshake = tokio::select! {
                        accepted = tokio::time::timeout(limits.idle_timeout, acceptor.accept(stream)) => accepted,
                        _ = abort.cancelled() => {
                            debug!(peer = %addr, "TLS handshake aborted by shutdown");
                            return;
                        }
                    };
                    match handshake {
                        Ok(Ok(tls_stream)) => {
                            debug!(peer = %addr, "TLS handshake completed");
                            run_limited(
                                tls_stream, addr, session_id, transform, &limits, &sessions, abort,
                            )
                            .await
                        }
                        Ok(Err(e)) => {
                            warn!(peer = %addr, error = %e, "TLS handshake failed");
                            return;
                        }
                        Err(_) => {
                            warn!(
                                peer = %addr,
                                timeout_ms = limits.idle_timeout.as_millis() as u64,
                                "TLS handshake timed out"
                            );
                            return;
                        }
                    }
                }
            };

            match outcome {
                SessionOutcome::Failed { status, .. } => debug!(
                    peer = %addr,
                    session = session_id,
                    status = %status,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Client disconnected with error"
                ),
                _ => debug!(
                    peer = %addr,
                    session = session_id,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Client disconnected"
                ),
            }
        });
    }
}

/// Run a session if a slot is free, otherwise answer `UNAVAILABLE`
async fn run_limited<S>(
    stream: S,
    peer: SocketAddr,
    session_id: u64,
    transform: Arc<dyn Transform>,
    limits: &SessionLimits,
    sessions: &Semaphore,
    abort: tokio_util::sync::CancellationToken,
) -> SessionOutcome
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let _permit = match sessions.try_acquire() {
        Ok(permit) => permit,
        Err(_) => {
            let message = "runner is at its session limit".to_string();
            warn!(peer = %peer, "Rejecting session - at capacity");
            let (read_half, write_half) = tokio::io::split(stream);
            let mut writer = FrameWriter::new(write_half);
            let _ = writer
                .write_frame(&Frame::status(StatusCode::Unavailable, message.clone()))
                .await;
            let _ = writer.shutdown().await;
            linger(read_half).await;
            return SessionOutcome::Failed {
                status: StatusCode::Unavailable,
                message,
            };
        }
    };

    metrics::record_session_active(1);
    let outcome = serve_session(stream, peer, session_id, transform, limits, abort).await;
    metrics::record_session_active(-1);
    outcome
}
