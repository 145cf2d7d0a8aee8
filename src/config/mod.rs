//! Configuration module for btrfaas
//!
//! This module is organized into submodules:
//! - `defaults` - Default constants and values
//! - `args` - CLI argument definitions
//! - `file` - TOML configuration file
//! - `merge` - Applying file values underneath CLI values
//!
//! The binaries parse their arguments, merge an optional config file, and
//! then turn the result into one of the typed configurations below. All
//! validation happens in the `from_args` constructors, before any socket is
//! bound or any secret is read.

mod args;
mod defaults;
pub mod file;
mod merge;

pub use args::{ClientArgs, CtlArgs, CtlCommand, GatewayArgs, RunnerArgs};
pub use defaults::*;
pub use file::ConfigFile;
pub use merge::{merge_client_args, merge_gateway_args, merge_runner_args};

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use defaults::{DEFAULT_GATEWAY_SOCKET_ADDR, DEFAULT_RUNNER_SOCKET_ADDR};

use crate::chain::ExecutorConfig;
use crate::error::{BtrfaasError, Result};
use crate::runner::{SessionLimits, EXEC_FUNCTION};
use crate::security::{SecretNames, SecurityConfig, SecurityMode};

/// Complete configuration of a function runner
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Address the run RPC listens on
    pub listen_addr: SocketAddr,

    /// Name of the transform to serve
    pub function: String,

    /// Command line run by the `exec` function
    pub process: Vec<String>,

    pub log_level: String,

    /// Transport security posture and secret names
    pub security: SecurityConfig,

    /// Root the secret names are resolved under
    pub secrets_dir: PathBuf,

    /// Bounds applied to every session
    pub limits: SessionLimits,

    /// Maximum number of concurrent sessions
    pub max_sessions: usize,

    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_secs: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_RUNNER_SOCKET_ADDR,
            function: DEFAULT_FUNCTION.to_string(),
            process: Vec::new(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            security: SecurityConfig::insecure(),
            secrets_dir: PathBuf::from(DEFAULT_SECRETS_DIR),
            limits: SessionLimits::default(),
            max_sessions: DEFAULT_MAX_SESSIONS,
            shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
        }
    }
}

impl RunnerConfig {
    /// Create a runner configuration from command-line arguments
    pub fn from_args(args: &RunnerArgs) -> Result<Self> {
        let listen_addr: SocketAddr = args
            .listen_addr
            .parse()
            .map_err(|e| BtrfaasError::Config(format!("Invalid listen address: {}", e)))?;

        let mode: SecurityMode = args.security_mode.parse()?;
        let security = SecurityConfig::new(
            mode,
            SecretNames {
                ca_cert: args.ca_cert_secret.clone(),
                private_key: args.key_secret.clone(),
                cert_chain: args.cert_secret.clone(),
            },
        )
        .with_min_tls_version(args.tls_min_version.clone());

        // `-- cmd args` wins over FRUNNER_PROCESS
        let process: Vec<String> = if args.process.is_empty() {
            args.process_line
                .as_deref()
                .unwrap_or_default()
                .split_whitespace()
                .map(str::to_string)
                .collect()
        } else {
            args.process.clone()
        };

        // A command alone is enough to select the exec function
        let function = if !process.is_empty() && args.function == DEFAULT_FUNCTION {
            EXEC_FUNCTION.to_string()
        } else {
            args.function.clone()
        };

        let config = Self {
            listen_addr,
            function,
            process,
            log_level: args.log_level.clone(),
            security,
            secrets_dir: args.secrets_dir.clone(),
            limits: SessionLimits {
                idle_timeout: Duration::from_millis(args.idle_timeout_ms),
                call_timeout: (!args.call_timeout.is_zero()).then_some(args.call_timeout),
                max_input_bytes: (args.read_limit > 0).then_some(args.read_limit),
                max_frame_bytes: args.max_frame_bytes,
            },
            max_sessions: args.max_sessions,
            shutdown_timeout_secs: args.shutdown_timeout,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration for consistency
    pub fn validate(&self) -> Result<()> {
        if self.listen_addr.port() == 0 {
            return Err(BtrfaasError::Config(
                "Runner listen port must be between 1 and 65535".to_string(),
            ));
        }
        if self.function.trim().is_empty() {
            return Err(BtrfaasError::Config("Function name is empty".to_string()));
        }
        if self.function == EXEC_FUNCTION && self.process.is_empty() {
            return Err(BtrfaasError::Config(
                "The exec function needs a command, given after -- or in FRUNNER_PROCESS"
                    .to_string(),
            ));
        }
        if self.function != EXEC_FUNCTION && !self.process.is_empty() {
            return Err(BtrfaasError::Config(format!(
                "A command is only run by the exec function, not by {}",
                self.function
            )));
        }
        if self.max_sessions == 0 {
            return Err(BtrfaasError::Config(
                "max_sessions must be at least 1".to_string(),
            ));
        }
        if self.limits.idle_timeout.is_zero() {
            return Err(BtrfaasError::Config(
                "Idle timeout must be greater than zero".to_string(),
            ));
        }
        validate_frame_size(self.limits.max_frame_bytes)?;
        self.security.validate()
    }
}

/// Caller-side configuration shared by the gateway and btrfaasctl
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Transport security posture and client secret names
    pub security: SecurityConfig,

    /// Root the secret names are resolved under
    pub secrets_dir: PathBuf,

    /// Name runner certificates are verified against, instead of the host
    pub tls_server_name: Option<String>,

    pub connect_timeout: Duration,

    pub max_frame_bytes: usize,

    /// Port for function names that carry none
    pub default_port: u16,

    /// `NAME=ADDR` endpoint overrides, later entries win
    pub functions: Vec<String>,

    pub executor: ExecutorConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            security: SecurityConfig::new(SecurityMode::Insecure, SecretNames::client()),
            secrets_dir: PathBuf::from(DEFAULT_SECRETS_DIR),
            tls_server_name: None,
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            default_port: DEFAULT_FUNCTION_PORT,
            functions: Vec::new(),
            executor: ExecutorConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Create a caller configuration from command-line arguments
    pub fn from_args(args: &ClientArgs) -> Result<Self> {
        let mode: SecurityMode = args.security_mode.parse()?;
        let security = SecurityConfig::new(
            mode,
            SecretNames {
                ca_cert: args.ca_cert_secret.clone(),
                private_key: args.client_key_secret.clone(),
                cert_chain: args.client_cert_secret.clone(),
            },
        )
        .with_min_tls_version(args.tls_min_version.clone());

        let config = Self {
            security,
            secrets_dir: args.secrets_dir.clone(),
            tls_server_name: args.tls_server_name.clone(),
            connect_timeout: Duration::from_millis(args.connect_timeout_ms),
            max_frame_bytes: args.max_frame_bytes,
            default_port: args.default_port,
            functions: args.functions.clone(),
            executor: ExecutorConfig {
                chunk_size: args.chunk_size,
                idle_timeout: Duration::from_millis(args.idle_timeout_ms),
                chain_timeout: non_zero_millis(args.chain_timeout_ms),
                ..ExecutorConfig::default()
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration for consistency
    pub fn validate(&self) -> Result<()> {
        if self.default_port == 0 {
            return Err(BtrfaasError::Config(
                "Default function port must be between 1 and 65535".to_string(),
            ));
        }
        if self.executor.chunk_size == 0 {
            return Err(BtrfaasError::Config(
                "Chunk size must be greater than zero".to_string(),
            ));
        }
        // One byte of every frame is its kind
        if self.executor.chunk_size >= self.max_frame_bytes {
            return Err(BtrfaasError::Config(format!(
                "Chunk size {} does not fit the maximum frame size {}",
                self.executor.chunk_size, self.max_frame_bytes
            )));
        }
        if self.connect_timeout.is_zero() || self.executor.idle_timeout.is_zero() {
            return Err(BtrfaasError::Config(
                "Connect and idle timeouts must be greater than zero".to_string(),
            ));
        }
        validate_frame_size(self.max_frame_bytes)?;
        self.security.validate()
    }
}

/// Complete configuration of the HTTP gateway
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub http_addr: SocketAddr,
    pub log_level: String,
    pub client: ClientConfig,
    pub shutdown_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            http_addr: DEFAULT_GATEWAY_SOCKET_ADDR,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            client: ClientConfig::default(),
            shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
        }
    }
}

impl GatewayConfig {
    /// Create a gateway configuration from command-line arguments
    pub fn from_args(args: &GatewayArgs) -> Result<Self> {
        let http_addr: SocketAddr = args
            .http_addr
            .parse()
            .map_err(|e| BtrfaasError::Config(format!("Invalid HTTP address: {}", e)))?;

        Ok(Self {
            http_addr,
            log_level: args.log_level.clone(),
            client: ClientConfig::from_args(&args.client)?,
            shutdown_timeout_secs: args.shutdown_timeout,
        })
    }
}

fn non_zero_millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

fn validate_frame_size(max_frame_bytes: usize) -> Result<()> {
    if max_frame_bytes == 0 || max_frame_bytes > MAX_FRAME_BYTES_LIMIT {
        return Err(BtrfaasError::Config(format!(
            "Maximum frame size must be between 1 and {} bytes, got {}",
            MAX_FRAME_BYTES_LIMIT, max_frame_bytes
        )));
    }
    Ok(())
}
