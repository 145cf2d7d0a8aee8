//! Graceful shutdown coordinator for the runner
//!
//! Shutdown runs in two steps. First the listener stops accepting and the
//! coordinator waits for in-flight sessions to finish on their own. Sessions
//! still running when the timeout expires are aborted through the abort token
//! and report `UNAVAILABLE` to their caller.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::DEFAULT_SHUTDOWN_TIMEOUT_SECS;

/// Configuration for shutdown behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// Maximum time to wait for sessions to drain before aborting them
    pub timeout_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
        }
    }
}

/// Result of a shutdown that could not drain in time
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("shutdown timed out with {pending_sessions} sessions still active")]
pub struct ShutdownError {
    pub pending_sessions: u64,
}

/// Coordinator for graceful shutdown operations
#[derive(Debug)]
pub struct ShutdownCoordinator {
    config: ShutdownConfig,
    shutdown_initiated: AtomicBool,
    /// Cancelled when the listener must stop accepting
    stop_accepting: CancellationToken,
    /// Cancelled when in-flight sessions must give up
    abort_sessions: CancellationToken,
    active_sessions: AtomicU64,
    sessions_drained: Notify,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator with default configuration
    pub fn new() -> Self {
        Self::with_config(ShutdownConfig::default())
    }

    /// Create a new shutdown coordinator with custom configuration
    pub fn with_config(config: ShutdownConfig) -> Self {
        Self {
            config,
            shutdown_initiated: AtomicBool::new(false),
            stop_accepting: CancellationToken::new(),
            abort_sessions: CancellationToken::new(),
            active_sessions: AtomicU64::new(0),
            sessions_drained: Notify::new(),
        }
    }

    /// Check if shutdown has been initiated
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown_initiated.load(Ordering::SeqCst)
    }

    /// Token cancelled once the accept loop must stop
    pub fn accept_token(&self) -> CancellationToken {
        self.stop_accepting.clone()
    }

    /// Token cancelled once sessions must abort
    pub fn abort_token(&self) -> CancellationToken {
        self.abort_sessions.clone()
    }

    /// Get the number of active sessions
    pub fn active_sessions(&self) -> u64 {
        self.active_sessions.load(Ordering::SeqCst)
    }

    /// Track a session for as long as the guard lives
    ///
    /// Returns `None` once shutdown has started.
    pub fn session_guard(self: &Arc<Self>) -> Option<SessionGuard> {
        if self.is_shutting_down() {
            return None;
        }
        self.active_sessions.fetch_add(1, Ordering::SeqCst);
        Some(SessionGuard {
            coordinator: Arc::clone(self),
        })
    }

    fn session_closed(&self) {
        let prev = self.active_sessions.fetch_sub(1, Ordering::SeqCst);
        if prev == 1 && self.is_shutting_down() {
            debug!("Last session closed during shutdown");
            self.sessions_drained.notify_waiters();
        }
    }

    /// Initiate graceful shutdown
    ///
    /// Stops the accept loop, waits up to the configured timeout for sessions
    /// to finish, then aborts whatever is left.
    pub async fn initiate_shutdown(&self) -> Result<(), ShutdownError> {
        if self.shutdown_initiated.swap(true, Ordering::SeqCst) {
            debug!("Shutdown already in progress");
            return Ok(());
        }

        let timeout = Duration::from_secs(self.config.timeout_secs);
        info!(
            timeout_secs = self.config.timeout_secs,
            active_sessions = self.active_sessions(),
            "Initiating graceful shutdown"
        );
        self.stop_accepting.cancel();

        let drained = tokio::time::timeout(timeout, async {
            loop {
                let notified = self.sessions_drained.notified();
                if self.active_sessions() == 0 {
                    break;
                }
                notified.await;
            }
        })
        .await;

        self.abort_sessions.cancel();

        match drained {
            Ok(()) => {
                info!("All sessions drained gracefully");
                Ok(())
            }
            Err(_) => {
                let pending = self.active_sessions();
                warn!(
                    pending_sessions = pending,
                    "Shutdown timeout - aborting remaining sessions"
                );
                Err(ShutdownError {
                    pending_sessions: pending,
                })
            }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps a session counted until dropped
#[derive(Debug)]
pub struct SessionGuard {
    coordinator: Arc<ShutdownCoordinator>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.coordinator.session_closed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_without_sessions() {
        let coordinator = Arc::new(ShutdownCoordinator::new());
        coordinator.initiate_shutdown().await.unwrap();
        assert!(coordinator.is_shutting_down());
        assert!(coordinator.accept_token().is_cancelled());
        assert!(coordinator.abort_token().is_cancelled());
    }

    #[tokio::test]
    async fn test_guard_counts_sessions() {
        let coordinator = Arc::new(ShutdownCoordinator::new());
        let guard = coordinator.session_guard().unwrap();
        assert_eq!(coordinator.active_sessions(), 1);
        drop(guard);
        assert_eq!(coordinator.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_no_new_sessions_after_shutdown() {
        let coordinator = Arc::new(ShutdownCoordinator::new());
        coordinator.initiate_shutdown().await.unwrap();
        assert!(coordinator.session_guard().is_none());
    }

    #[tokio::test]
    async fn test_waits_for_session_to_finish() {
        let coordinator = Arc::new(ShutdownCoordinator::with_config(ShutdownConfig {
            timeout_secs: 5,
        }));
        let guard = coordinator.session_guard().unwrap();
        let abort = coordinator.abort_token();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(guard);
        });

        coordinator.initiate_shutdown().await.unwrap();
        handle.await.unwrap();
        assert_eq!(coordinator.active_sessions(), 0);
        assert!(abort.is_cancelled());
    }

    #[tokio::test]
    async fn test_timeout_aborts_sessions() {
        let coordinator = Arc::new(ShutdownCoordinator::with_config(ShutdownConfig {
            timeout_secs: 0,
        }));
        let _guard = coordinator.session_guard().unwrap();
        let err = coordinator.initiate_shutdown().await.unwrap_err();
        assert_eq!(err.pending_sessions, 1);
        assert!(coordinator.abort_token().is_cancelled());
    }
}
