//! Configuration file support for btrfaas
//!
//! This module provides TOML configuration file parsing. Values from the file
//! only apply where the command line (or its environment variable) left the
//! built-in default in place.
//!
//! ## Example Configuration
//!
//! ```toml
//! # btrfaas.toml
//!
//! [runner]
//! listen_addr = "0.0.0.0:2424"
//! function = "uppercase"
//! call_timeout = "30s"
//! read_limit = 1048576
//!
//! [gateway]
//! http_addr = "0.0.0.0:8080"
//! chain_timeout_ms = 60000
//!
//! [security]
//! mode = "mtls"
//! secrets_dir = "/run/secrets"
//!
//! [functions]
//! echo = "echo.functions.svc:2424"
//! upper = "10.0.0.7:2424"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{BtrfaasError, Result};

/// Root configuration structure for TOML file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    /// Function runner configuration
    pub runner: RunnerSection,

    /// HTTP gateway configuration
    pub gateway: GatewaySection,

    /// Transport security configuration
    pub security: SecuritySection,

    /// Function name to address table
    pub functions: BTreeMap<String, String>,
}

/// Runner section configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerSection {
    pub listen_addr: Option<String>,
    pub function: Option<String>,
    /// Command line for the exec function
    pub process: Option<String>,
    pub log_level: Option<String>,
    /// Whole-session deadline, e.g. "10s"
    #[serde(with = "humantime_serde")]
    pub call_timeout: Option<Duration>,
    pub idle_timeout_ms: Option<u64>,
    pub read_limit: Option<u64>,
    pub max_frame_bytes: Option<usize>,
    pub max_sessions: Option<usize>,
    pub shutdown_timeout: Option<u64>,
}

/// Gateway section configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySection {
    pub http_addr: Option<String>,
    pub log_level: Option<String>,
    pub connect_timeout_ms: Option<u64>,
    pub idle_timeout_ms: Option<u64>,
    pub chain_timeout_ms: Option<u64>,
    pub chunk_size: Option<usize>,
    pub max_frame_bytes: Option<usize>,
    pub default_port: Option<u16>,
    pub shutdown_timeout: Option<u64>,
}

/// Security section configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySection {
    /// insecure, tls or mtls
    pub mode: Option<String>,
    pub secrets_dir: Option<PathBuf>,
    pub tls_min_version: Option<String>,
    pub ca_cert_secret: Option<String>,
    pub key_secret: Option<String>,
    pub cert_secret: Option<String>,
    pub client_key_secret: Option<String>,
    pub client_cert_secret: Option<String>,
    /// Name callers verify runner certificates against
    pub tls_server_name: Option<String>,
}

impl ConfigFile {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            BtrfaasError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        Self::parse(&contents).map_err(|e| match e {
            BtrfaasError::Config(msg) => {
                BtrfaasError::Config(format!("Failed to parse config file {:?}: {}", path, msg))
            }
            other => other,
        })
    }

    /// Parse configuration from TOML text
    pub fn parse(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| BtrfaasError::Config(e.to_string()))
    }
}

mod humantime_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&humantime::format_duration(*d).to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(deserializer)? {
            Some(s) => super::super::args::parse_duration(&s)
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_empty_config() {
        let config = ConfigFile::parse("").unwrap();
        assert!(config.runner.listen_addr.is_none());
        assert!(config.functions.is_empty());
    }

    #[test]
    fn test_parse_runner_section() {
        let toml = r#"
            [runner]
            listen_addr = "127.0.0.1:3000"
            function = "uppercase"
            read_limit = 0
        "#;
        let config = ConfigFile::parse(toml).unwrap();
        assert_eq!(config.runner.listen_addr.as_deref(), Some("127.0.0.1:3000"));
        assert_eq!(config.runner.function.as_deref(), Some("uppercase"));
        assert_eq!(config.runner.read_limit, Some(0));
        assert_eq!(config.runner.call_timeout, None);
    }

    #[test]
    fn test_parse_exec_runner() {
        let toml = r#"
            [runner]
            function = "exec"
            process = "tr a-z A-Z"
            call_timeout = "1m30s"
        "#;
        let config = ConfigFile::parse(toml).unwrap();
        assert_eq!(config.runner.process.as_deref(), Some("tr a-z A-Z"));
        assert_eq!(config.runner.call_timeout, Some(Duration::from_secs(90)));

        let err = ConfigFile::parse("[runner]\ncall_timeout = \"soon\"").unwrap_err();
        assert!(matches!(err, BtrfaasError::Config(_)));
    }

    #[test]
    fn test_parse_security_and_functions() {
        let toml = r#"
            [security]
            mode = "tls"
            secrets_dir = "/var/secrets"

            [functions]
            echo = "127.0.0.1:2424"
            "upper-case" = "upper:9000"
        "#;
        let config = ConfigFile::parse(toml).unwrap();
        assert_eq!(config.security.mode.as_deref(), Some("tls"));
        assert_eq!(
            config.security.secrets_dir,
            Some(PathBuf::from("/var/secrets"))
        );
        assert_eq!(config.functions.get("upper-case").unwrap(), "upper:9000");
    }

    #[test]
    fn test_parse_invalid_toml() {
        let err = ConfigFile::parse("[runner\nlisten_addr = 1").unwrap_err();
        assert!(matches!(err, BtrfaasError::Config(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[gateway]\nchunk_size = 512").unwrap();
        let config = ConfigFile::load(file.path()).unwrap();
        assert_eq!(config.gateway.chunk_size, Some(512));
    }

    #[test]
    fn test_load_missing_file() {
        let err = ConfigFile::load("/nonexistent/btrfaas.toml").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
