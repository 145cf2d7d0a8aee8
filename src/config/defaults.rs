//! Default constants for btrfaas configuration
//!
//! These constants define the default values used throughout the configuration
//! system when no explicit value is provided.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Default listen address for the function runner
pub const DEFAULT_RUNNER_ADDR: &str = "0.0.0.0:2424";

/// Default listen address for the HTTP gateway
pub const DEFAULT_GATEWAY_ADDR: &str = "0.0.0.0:8080";

/// Default runner socket address (const, no parsing needed)
pub(crate) const DEFAULT_RUNNER_SOCKET_ADDR: SocketAddr =
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), 2424);

/// Default gateway socket address (const, no parsing needed)
pub(crate) const DEFAULT_GATEWAY_SOCKET_ADDR: SocketAddr =
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), 8080);

/// Port assumed for a function name that does not carry one
pub const DEFAULT_FUNCTION_PORT: u16 = 2424;

/// Default log level
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default transport security mode ("insecure", "tls", "mtls")
pub const DEFAULT_SECURITY_MODE: &str = "mtls";

/// Directory orchestrators mount secrets into
pub const DEFAULT_SECRETS_DIR: &str = "/run/secrets";

/// Entry read when a secret path turns out to be a directory
pub const SECRET_VALUE_ENTRY: &str = "value";

/// Secret holding the CA certificate
pub const DEFAULT_CA_CERT_SECRET: &str = "ca-cert";

/// Secret holding the runner's private key
pub const DEFAULT_FUNCTION_KEY_SECRET: &str = "function-key";

/// Secret holding the runner's certificate chain
pub const DEFAULT_FUNCTION_CERT_SECRET: &str = "function-cert";

/// Secret holding the gateway's client certificate chain
pub const DEFAULT_CLIENT_CERT_SECRET: &str = "client-cert";

/// Secret holding the gateway's client private key
pub const DEFAULT_CLIENT_KEY_SECRET: &str = "client-key";

/// Default TLS minimum version
pub const DEFAULT_TLS_MIN_VERSION: &str = "1.2";

/// Default maximum frame size in bytes (4 MB)
pub const DEFAULT_MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// Hard upper bound on the frame size, whatever the configuration says (64 MB)
pub const MAX_FRAME_BYTES_LIMIT: usize = 64 * 1024 * 1024;

/// Default cap on the input bytes one runner session accepts (0 = unlimited)
pub const DEFAULT_MAX_INPUT_BYTES: u64 = 0;

/// Default whole-session deadline (0 = none, the idle timeout still applies)
pub const DEFAULT_CALL_TIMEOUT: &str = "0";

/// Default wait for the next chunk in milliseconds
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 30_000;

/// Default TCP connect plus handshake timeout in milliseconds
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;

/// Default whole-chain deadline in milliseconds (0 = none)
pub const DEFAULT_CHAIN_TIMEOUT_MS: u64 = 60_000;

/// Default maximum number of concurrent runner sessions
pub const DEFAULT_MAX_SESSIONS: usize = 1024;

/// Default chunk size used when splitting a whole payload
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Default capacity of the channel joining two chain stages
pub const DEFAULT_STAGE_BUFFER: usize = 16;

/// Default graceful shutdown timeout in seconds
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Default function served by `frunner`
pub const DEFAULT_FUNCTION: &str = "echo";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_const_socket_addrs_match_strings() {
        assert_eq!(
            DEFAULT_RUNNER_SOCKET_ADDR,
            DEFAULT_RUNNER_ADDR.parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            DEFAULT_GATEWAY_SOCKET_ADDR,
            DEFAULT_GATEWAY_ADDR.parse::<SocketAddr>().unwrap()
        );
        assert_eq!(DEFAULT_RUNNER_SOCKET_ADDR.port(), DEFAULT_FUNCTION_PORT);
    }

    #[test]
    fn test_frame_limits_are_ordered() {
        assert!(DEFAULT_MAX_FRAME_BYTES <= MAX_FRAME_BYTES_LIMIT);
        assert!(DEFAULT_CHUNK_SIZE < DEFAULT_MAX_FRAME_BYTES);
    }
}
