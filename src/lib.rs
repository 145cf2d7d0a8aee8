#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

//! # btrfaas
//!
//! btrfaas runs chains of independently deployed functions. A caller names an
//! ordered list of functions, each with its own options, and one payload
//! streams through all of them: the output of step `i` is the input of step
//! `i + 1`, chunk by chunk, with every step running at the same time.
//!
//! ## Binaries
//!
//! - `frunner` serves one function over the `run` streaming call
//! - `fgateway` exposes `POST /api/invoke` and runs chains against runners
//! - `btrfaasctl` encodes chain expressions and invokes chains from a shell
//!
//! ```bash
//! # A runner without TLS
//! $ frunner --function uppercase --security-mode insecure --listen-addr 127.0.0.1:2424
//!
//! # A gateway that knows where the runner lives
//! $ fgateway --security-mode insecure --function uppercase=127.0.0.1:2424
//!
//! # Run a two step chain
//! $ curl -X POST localhost:8080/api/invoke \
//!     -H 'X-Btrfaas-Chain: uppercase|uppercase' \
//!     -H 'X-Btrfaas-Options: [{"skip":"o"},{}]' \
//!     --data-binary foobar
//! ```
//!
//! ## Architecture
//!
//! - [`chain`]: chain descriptor codec, expressions, endpoint resolution and
//!   the streaming executor
//! - [`protocol`]: length-prefixed frames of the `run` call and its client
//! - [`runner`]: function runner sessions and server
//! - [`security`]: credential resolution and transport security policy
//! - [`gateway`]: HTTP front door
//! - [`config`]: CLI arguments, config file and typed configuration
//! - [`metrics`]: Prometheus-compatible metrics
//! - [`error`]: Error types and Result alias
//!
//! ## Library Usage
//!
//! ```no_run
//! use btrfaas::chain::{ChainExecutor, EndpointResolver, ExecutorConfig, parse_expression};
//! use btrfaas::protocol::RunnerClient;
//! use btrfaas::security::ClientSecurity;
//! use bytes::Bytes;
//!
//! #[tokio::main]
//! async fn main() -> btrfaas::Result<()> {
//!     let executor = ChainExecutor::new(
//!         RunnerClient::new(ClientSecurity::Insecure),
//!         EndpointResolver::from_entries(2424, ["uppercase=127.0.0.1:2424"])?,
//!         ExecutorConfig::default(),
//!     );
//!     let chain = parse_expression("uppercase skip=o | uppercase")?;
//!     let output = executor.execute(&chain, Bytes::from_static(b"foobar")).await?;
//!     println!("{}", String::from_utf8_lossy(&output));
//!     Ok(())
//! }
//! ```

pub mod chain;
pub mod config;
pub mod error;
pub mod gateway;
pub mod metrics;
pub mod protocol;
pub mod runner;
pub mod security;
pub mod shutdown;
pub mod telemetry;

pub use chain::{ChainDescriptor, ChainExecutor, FunctionStep};
pub use config::{ClientConfig, GatewayConfig, RunnerConfig};
pub use error::{BtrfaasError, Result, StatusCode};
pub use runner::{RunnerServer, Transform};
pub use security::{SecurityConfig, SecurityMode};
