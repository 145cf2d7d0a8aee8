//! HTTP gateway in front of the chain executor
//!
//! The gateway turns `POST /api/invoke` requests into chain executions and
//! answers with the last step's output. It holds no per-request state beyond
//! the running chain.

pub mod router;

pub use router::{create_gateway_router, GatewayState, HealthStatus, InvokeQuery};

use std::net::SocketAddr;

use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::chain::ChainExecutor;
use crate::config::GatewayConfig;
use crate::error::{BtrfaasError, Result};

/// A bound HTTP gateway
pub struct GatewayServer {
    listener: TcpListener,
    router: Router,
}

impl GatewayServer {
    /// Bind the HTTP listener
    pub async fn bind(config: &GatewayConfig, executor: ChainExecutor) -> Result<Self> {
        let listener = TcpListener::bind(config.http_addr).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::AddrInUse {
                BtrfaasError::Server(format!(
                    "HTTP port {} is already in use. Fix: use --http-addr to pick a different port",
                    config.http_addr.port()
                ))
            } else {
                BtrfaasError::Server(format!(
                    "Failed to bind HTTP server to {}: {}",
                    config.http_addr, e
                ))
            }
        })?;

        info!(addr = %listener.local_addr()?, "Gateway listening");

        Ok(Self {
            listener,
            router: create_gateway_router(GatewayState::new(executor)),
        })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until Ctrl-C
    pub async fn run(self) -> Result<()> {
        let stop = CancellationToken::new();
        let signal_stop = stop.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received shutdown signal"),
                Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
            }
            signal_stop.cancel();
        });
        self.serve(stop).await
    }

    /// Serve until `stop` is cancelled, letting in-flight requests finish
    pub async fn serve(self, stop: CancellationToken) -> Result<()> {
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move { stop.cancelled().await })
            .await
            .map_err(|e| BtrfaasError::Server(format!("HTTP server failed: {}", e)))?;
        info!("Gateway stopped");
        Ok(())
    }
}
