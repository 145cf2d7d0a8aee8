//! Command-line arguments for the btrfaas binaries
//!
//! This module defines the CLI arguments structures using clap. Every flag
//! also reads an environment variable so containers can be configured without
//! rewriting their command line.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use super::defaults::*;

/// Command-line arguments for the function runner
#[derive(Parser, Debug, Clone)]
#[command(name = "frunner")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Serve one streaming function over the run RPC")]
pub struct RunnerArgs {
    /// Path to configuration file (TOML format)
    #[arg(short, long, env = "FRUNNER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address to listen on for run calls
    #[arg(long, env = "FRUNNER_LISTEN_ADDR", default_value = DEFAULT_RUNNER_ADDR)]
    pub listen_addr: String,

    /// Function to serve (echo, uppercase, exec)
    #[arg(short, long, env = "FRUNNER_FUNCTION", default_value = DEFAULT_FUNCTION)]
    pub function: String,

    /// Command line for the exec function when none is given after `--`
    #[arg(long = "process", env = "FRUNNER_PROCESS", value_name = "CMDLINE")]
    pub process_line: Option<String>,

    /// Command run once per chunk by the exec function, given after `--`
    #[arg(last = true, value_name = "COMMAND")]
    pub process: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "FRUNNER_LOG_LEVEL", default_value = DEFAULT_LOG_LEVEL)]
    pub log_level: String,

    /// Transport security mode (insecure, tls, mtls)
    #[arg(long, env = "FRUNNER_SECURITY_MODE", default_value = DEFAULT_SECURITY_MODE)]
    pub security_mode: String,

    /// Directory the secrets are mounted into
    #[arg(long, env = "FRUNNER_SECRETS_DIR", default_value = DEFAULT_SECRETS_DIR)]
    pub secrets_dir: PathBuf,

    /// Secret name of the CA certificate
    #[arg(long, env = "FRUNNER_CA_CERT_SECRET", default_value = DEFAULT_CA_CERT_SECRET)]
    pub ca_cert_secret: String,

    /// Secret name of the runner's private key
    #[arg(long, env = "FRUNNER_KEY_SECRET", default_value = DEFAULT_FUNCTION_KEY_SECRET)]
    pub key_secret: String,

    /// Secret name of the runner's certificate chain
    #[arg(long, env = "FRUNNER_CERT_SECRET", default_value = DEFAULT_FUNCTION_CERT_SECRET)]
    pub cert_secret: String,

    /// Minimum TLS version (1.2 or 1.3)
    #[arg(long, env = "FRUNNER_TLS_MIN_VERSION", default_value = DEFAULT_TLS_MIN_VERSION)]
    pub tls_min_version: String,

    /// Whole-session deadline, e.g. 10s or 1m30s; a bare number is milliseconds (0 disables it)
    #[arg(
        short = 't',
        long,
        env = "FRUNNER_CALL_TIMEOUT",
        default_value = DEFAULT_CALL_TIMEOUT,
        value_parser = parse_duration
    )]
    pub call_timeout: Duration,

    /// Maximum wait for the next chunk in milliseconds
    #[arg(long, env = "FRUNNER_IDLE_TIMEOUT", default_value_t = DEFAULT_IDLE_TIMEOUT_MS)]
    pub idle_timeout_ms: u64,

    /// Maximum input bytes per session (0 disables the limit)
    #[arg(long, env = "FRUNNER_READ_LIMIT", default_value_t = DEFAULT_MAX_INPUT_BYTES)]
    pub read_limit: u64,

    /// Maximum frame size in bytes
    #[arg(long, env = "FRUNNER_MAX_FRAME_BYTES", default_value_t = DEFAULT_MAX_FRAME_BYTES)]
    pub max_frame_bytes: usize,

    /// Maximum number of concurrent sessions
    #[arg(long, env = "FRUNNER_MAX_SESSIONS", default_value_t = DEFAULT_MAX_SESSIONS)]
    pub max_sessions: usize,

    /// Graceful shutdown timeout in seconds
    #[arg(long, env = "FRUNNER_SHUTDOWN_TIMEOUT", default_value_t = DEFAULT_SHUTDOWN_TIMEOUT_SECS)]
    pub shutdown_timeout: u64,
}

/// Command-line arguments for the HTTP gateway
#[derive(Parser, Debug, Clone)]
#[command(name = "fgateway")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "HTTP front door that runs function chains")]
pub struct GatewayArgs {
    /// Path to configuration file (TOML format)
    #[arg(short, long, env = "FGATEWAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address to listen on for HTTP requests
    #[arg(long, env = "FGATEWAY_HTTP_ADDR", default_value = DEFAULT_GATEWAY_ADDR)]
    pub http_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "FGATEWAY_LOG_LEVEL", default_value = DEFAULT_LOG_LEVEL)]
    pub log_level: String,

    #[command(flatten)]
    pub client: ClientArgs,

    /// Graceful shutdown timeout in seconds
    #[arg(long, env = "FGATEWAY_SHUTDOWN_TIMEOUT", default_value_t = DEFAULT_SHUTDOWN_TIMEOUT_SECS)]
    pub shutdown_timeout: u64,
}

/// Arguments shared by everything that calls runners
#[derive(clap::Args, Debug, Clone)]
pub struct ClientArgs {
    /// Transport security mode towards runners (insecure, tls, mtls)
    #[arg(long, env = "FGATEWAY_SECURITY_MODE", default_value = DEFAULT_SECURITY_MODE)]
    pub security_mode: String,

    /// Directory the secrets are mounted into
    #[arg(long, env = "FGATEWAY_SECRETS_DIR", default_value = DEFAULT_SECRETS_DIR)]
    pub secrets_dir: PathBuf,

    /// Secret name of the CA certificate
    #[arg(long, env = "FGATEWAY_CA_CERT_SECRET", default_value = DEFAULT_CA_CERT_SECRET)]
    pub ca_cert_secret: String,

    /// Secret name of the client private key
    #[arg(long, env = "FGATEWAY_CLIENT_KEY_SECRET", default_value = DEFAULT_CLIENT_KEY_SECRET)]
    pub client_key_secret: String,

    /// Secret name of the client certificate chain
    #[arg(long, env = "FGATEWAY_CLIENT_CERT_SECRET", default_value = DEFAULT_CLIENT_CERT_SECRET)]
    pub client_cert_secret: String,

    /// Minimum TLS version (1.2 or 1.3)
    #[arg(long, env = "FGATEWAY_TLS_MIN_VERSION", default_value = DEFAULT_TLS_MIN_VERSION)]
    pub tls_min_version: String,

    /// Name to verify runner certificates against instead of the host
    #[arg(long, env = "FGATEWAY_TLS_SERVER_NAME")]
    pub tls_server_name: Option<String>,

    /// TCP connect plus handshake timeout in milliseconds
    #[arg(long, env = "FGATEWAY_CONNECT_TIMEOUT", default_value_t = DEFAULT_CONNECT_TIMEOUT_MS)]
    pub connect_timeout_ms: u64,

    /// Maximum wait for the next chunk from a runner in milliseconds
    #[arg(long, env = "FGATEWAY_IDLE_TIMEOUT", default_value_t = DEFAULT_IDLE_TIMEOUT_MS)]
    pub idle_timeout_ms: u64,

    /// Whole-chain deadline in milliseconds (0 disables it)
    #[arg(long, env = "FGATEWAY_CHAIN_TIMEOUT", default_value_t = DEFAULT_CHAIN_TIMEOUT_MS)]
    pub chain_timeout_ms: u64,

    /// Chunk size used to split request bodies
    #[arg(long, env = "FGATEWAY_CHUNK_SIZE", default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,

    /// Maximum frame size in bytes
    #[arg(long, env = "FGATEWAY_MAX_FRAME_BYTES", default_value_t = DEFAULT_MAX_FRAME_BYTES)]
    pub max_frame_bytes: usize,

    /// Port used for function names without one
    #[arg(long, env = "FGATEWAY_DEFAULT_PORT", default_value_t = DEFAULT_FUNCTION_PORT)]
    pub default_port: u16,

    /// Explicit function address, as name=host:port (repeatable)
    #[arg(long = "function", value_name = "NAME=ADDR")]
    pub functions: Vec<String>,
}

/// Command-line arguments for btrfaasctl
#[derive(Parser, Debug, Clone)]
#[command(name = "btrfaasctl")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Encode and invoke function chains")]
pub struct CtlArgs {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "BTRFAASCTL_LOG_LEVEL", default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: CtlCommand,
}

/// btrfaasctl subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum CtlCommand {
    /// Print the chain and options headers for an expression
    Encode {
        /// Chain expression, e.g. "fn1 key=value | fn2"
        expression: String,
    },

    /// Run a chain against the runners, reading stdin and writing stdout
    Invoke {
        /// Chain expression, e.g. "fn1 key=value | fn2"
        expression: String,

        #[command(flatten)]
        client: ClientArgs,
    },
}

/// Parse a duration flag
///
/// Accepts humantime durations (`10s`, `1m30s`, `250ms`) and, for
/// compatibility with older deployments, a bare number of milliseconds.
pub fn parse_duration(value: &str) -> Result<Duration, String> {
    let value = value.trim();
    if let Ok(millis) = value.parse::<u64>() {
        return Ok(Duration::from_millis(millis));
    }
    humantime::parse_duration(value).map_err(|e| format!("invalid duration {:?}: {}", value, e))
}
