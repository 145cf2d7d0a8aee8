//! Gateway HTTP routes
//!
//! - `POST /api/invoke` - Run the chain named by the `X-Btrfaas-Chain` and
//!   `X-Btrfaas-Options` headers over the request body
//! - `GET  /health` - Liveness and version
//! - `GET  /metrics` - Prometheus metrics (requires the `metrics` feature)

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::chain::{decode, ChainExecutor, CHAIN_HEADER, OPTIONS_HEADER};
use crate::error::BtrfaasError;

/// Shared state of the gateway routes
#[derive(Clone)]
pub struct GatewayState {
    executor: Arc<ChainExecutor>,
    started_at: Instant,
}

impl GatewayState {
    pub fn new(executor: ChainExecutor) -> Self {
        Self {
            executor: Arc::new(executor),
            started_at: Instant::now(),
        }
    }
}

/// Query parameters of `POST /api/invoke`
#[derive(Debug, Default, Deserialize)]
pub struct InvokeQuery {
    /// Chain deadline in milliseconds, replacing the configured one
    pub timeout: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
}

/// Create the gateway router
pub fn create_gateway_router(state: GatewayState) -> Router {
    let app = Router::new()
        .route("/api/invoke", post(invoke_handler))
        .route("/health", get(health_handler));

    #[cfg(feature = "metrics")]
    let app = app.route("/metrics", get(metrics_handler));

    app.with_state(state)
}

/// POST /api/invoke - Run a chain over the request body
async fn invoke_handler(
    State(state): State<GatewayState>,
    Query(query): Query<InvokeQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let chain_header = match header_value(&headers, CHAIN_HEADER) {
        Ok(value) => value.unwrap_or_default(),
        Err(e) => return error_response(&e),
    };
    let options_header = match header_value(&headers, OPTIONS_HEADER) {
        Ok(value) => value,
        Err(e) => return error_response(&e),
    };

    let descriptor = match decode(chain_header, options_header) {
        Ok(descriptor) => descriptor,
        Err(e) => {
            debug!(error = %e, "Rejected invoke request");
            return error_response(&e);
        }
    };

    let chain_timeout = match query.timeout {
        Some(0) => {
            return error_response(&BtrfaasError::InvalidOptions(
                "timeout must be greater than zero".to_string(),
            ))
        }
        Some(ms) => Some(Duration::from_millis(ms)),
        None => state.executor.config().chain_timeout,
    };

    match state
        .executor
        .execute_with_timeout(&descriptor, body, chain_timeout)
        .await
    {
        Ok(output) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/octet-stream")],
            output,
        )
            .into_response(),
        Err(e) => {
            warn!(chain = %chain_header, error = %e, "Invoke failed");
            error_response(&e)
        }
    }
}

/// GET /health - Liveness probe
async fn health_handler(State(state): State<GatewayState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

/// GET /metrics - Prometheus text format
#[cfg(feature = "metrics")]
async fn metrics_handler() -> Response {
    (StatusCode::OK, crate::metrics::render()).into_response()
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Result<Option<&'a str>, BtrfaasError> {
    match headers.get(name) {
        None => Ok(None),
        Some(value) => value.to_str().map(Some).map_err(|_| {
            BtrfaasError::InvalidOptions(format!("{} is not valid UTF-8", name))
        }),
    }
}

fn error_response(error: &BtrfaasError) -> Response {
    let status = StatusCode::from_u16(error.http_status())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, error.to_string()).into_response()
}
