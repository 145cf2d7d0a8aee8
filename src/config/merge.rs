//! Configuration merging utilities
//!
//! This module provides functions to merge configuration from files
//! with command-line arguments, where CLI arguments take precedence.

use std::path::Path;
use std::time::Duration;

use super::args::{ClientArgs, GatewayArgs, RunnerArgs};
use super::defaults::*;
use super::file::ConfigFile;

// Apply a file value only where the argument still holds its default
macro_rules! apply_if_default {
    ($target:expr, $config_val:expr, $default:expr) => {
        if let Some(val) = $config_val {
            if $target == $default {
                $target = val;
            }
        }
    };
}

macro_rules! apply_if_default_string {
    ($target:expr, $config_val:expr, $default:expr) => {
        if let Some(ref val) = $config_val {
            if $target == $default {
                $target = val.clone();
            }
        }
    };
}

/// Merge configuration file values into runner arguments.
/// CLI arguments take precedence over config file values.
pub fn merge_runner_args(mut args: RunnerArgs, config: &ConfigFile) -> RunnerArgs {
    let runner = &config.runner;
    apply_if_default_string!(args.listen_addr, runner.listen_addr, DEFAULT_RUNNER_ADDR);
    apply_if_default_string!(args.function, runner.function, DEFAULT_FUNCTION);
    apply_if_default_string!(args.log_level, runner.log_level, DEFAULT_LOG_LEVEL);
    apply_if_default!(args.call_timeout, runner.call_timeout, Duration::ZERO);
    if args.process_line.is_none() {
        args.process_line = runner.process.clone();
    }
    apply_if_default!(args.idle_timeout_ms, runner.idle_timeout_ms, DEFAULT_IDLE_TIMEOUT_MS);
    apply_if_default!(args.read_limit, runner.read_limit, DEFAULT_MAX_INPUT_BYTES);
    apply_if_default!(args.max_frame_bytes, runner.max_frame_bytes, DEFAULT_MAX_FRAME_BYTES);
    apply_if_default!(args.max_sessions, runner.max_sessions, DEFAULT_MAX_SESSIONS);
    apply_if_default!(
        args.shutdown_timeout,
        runner.shutdown_timeout,
        DEFAULT_SHUTDOWN_TIMEOUT_SECS
    );

    let security = &config.security;
    apply_if_default_string!(args.security_mode, security.mode, DEFAULT_SECURITY_MODE);
    if let Some(ref dir) = security.secrets_dir {
        if args.secrets_dir == Path::new(DEFAULT_SECRETS_DIR) {
            args.secrets_dir = dir.clone();
        }
    }
    apply_if_default_string!(
        args.tls_min_version,
        security.tls_min_version,
        DEFAULT_TLS_MIN_VERSION
    );
    apply_if_default_string!(args.ca_cert_secret, security.ca_cert_secret, DEFAULT_CA_CERT_SECRET);
    apply_if_default_string!(args.key_secret, security.key_secret, DEFAULT_FUNCTION_KEY_SECRET);
    apply_if_default_string!(args.cert_secret, security.cert_secret, DEFAULT_FUNCTION_CERT_SECRET);

    args
}

/// Merge configuration file values into gateway arguments.
/// CLI arguments take precedence over config file values.
pub fn merge_gateway_args(mut args: GatewayArgs, config: &ConfigFile) -> GatewayArgs {
    let gateway = &config.gateway;
    apply_if_default_string!(args.http_addr, gateway.http_addr, DEFAULT_GATEWAY_ADDR);
    apply_if_default_string!(args.log_level, gateway.log_level, DEFAULT_LOG_LEVEL);
    apply_if_default!(
        args.shutdown_timeout,
        gateway.shutdown_timeout,
        DEFAULT_SHUTDOWN_TIMEOUT_SECS
    );
    args.client = merge_client_args(args.client, config);
    args
}

/// Merge the caller-side settings shared by the gateway and btrfaasctl.
pub fn merge_client_args(mut args: ClientArgs, config: &ConfigFile) -> ClientArgs {
    let gateway = &config.gateway;
    apply_if_default!(
        args.connect_timeout_ms,
        gateway.connect_timeout_ms,
        DEFAULT_CONNECT_TIMEOUT_MS
    );
    apply_if_default!(args.idle_timeout_ms, gateway.idle_timeout_ms, DEFAULT_IDLE_TIMEOUT_MS);
    apply_if_default!(args.chain_timeout_ms, gateway.chain_timeout_ms, DEFAULT_CHAIN_TIMEOUT_MS);
    apply_if_default!(args.chunk_size, gateway.chunk_size, DEFAULT_CHUNK_SIZE);
    apply_if_default!(args.max_frame_bytes, gateway.max_frame_bytes, DEFAULT_MAX_FRAME_BYTES);
    apply_if_default!(args.default_port, gateway.default_port, DEFAULT_FUNCTION_PORT);

    let security = &config.security;
    apply_if_default_string!(args.security_mode, security.mode, DEFAULT_SECURITY_MODE);
    if let Some(ref dir) = security.secrets_dir {
        if args.secrets_dir == Path::new(DEFAULT_SECRETS_DIR) {
            args.secrets_dir = dir.clone();
        }
    }
    apply_if_default_string!(
        args.tls_min_version,
        security.tls_min_version,
        DEFAULT_TLS_MIN_VERSION
    );
    apply_if_default_string!(args.ca_cert_secret, security.ca_cert_secret, DEFAULT_CA_CERT_SECRET);
    apply_if_default_string!(
        args.client_key_secret,
        security.client_key_secret,
        DEFAULT_CLIENT_KEY_SECRET
    );
    apply_if_default_string!(
        args.client_cert_secret,
        security.client_cert_secret,
        DEFAULT_CLIENT_CERT_SECRET
    );

    if args.tls_server_name.is_none() {
        args.tls_server_name = security.tls_server_name.clone();
    }

    // File entries come first so repeated --function flags win on conflict
    let mut functions: Vec<String> = config
        .functions
        .iter()
        .map(|(name, addr)| format!("{}={}", name, addr))
        .collect();
    functions.append(&mut args.functions);
    args.functions = functions;

    args
}
