//! Shared test fixtures for btrfaas integration tests
//!
//! # Usage
//!
//! In your test file, add:
//! ```rust,ignore
//! mod common;
//! use common::*;
//! ```
//!
//! # Features
//!
//! - `TestPki`: a throwaway CA with runner and client certificates
//! - Secret directory writers, in plain file and directory shape
//! - Runner spawning on an OS-assigned port
//! - Transforms that fail or record what they see

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use rcgen::{
    BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose,
};

use btrfaas::chain::{ChainExecutor, EndpointResolver, ExecutorConfig};
use btrfaas::config::{
    RunnerConfig, DEFAULT_CA_CERT_SECRET, DEFAULT_CLIENT_CERT_SECRET, DEFAULT_CLIENT_KEY_SECRET,
    DEFAULT_FUNCTION_CERT_SECRET, DEFAULT_FUNCTION_KEY_SECRET, SECRET_VALUE_ENTRY,
};
use btrfaas::error::{BtrfaasError, Result};
use btrfaas::protocol::RunnerClient;
use btrfaas::runner::{RunnerServer, SessionContext, Transform};
use btrfaas::security::{ClientSecurity, ServerTransport};
use btrfaas::shutdown::ShutdownCoordinator;

// ============================================================================
// Network Utilities
// ============================================================================

/// Find an available TCP port for testing
pub fn find_available_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("Failed to bind to port 0");
    listener
        .local_addr()
        .expect("Failed to get local address")
        .port()
}

/// Poll until the runner reports `expected` active sessions, or give up after `within`
pub async fn wait_for_sessions(
    shutdown: &ShutdownCoordinator,
    expected: u64,
    within: std::time::Duration,
) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if shutdown.active_sessions() == expected {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    shutdown.active_sessions() == expected
}

// ============================================================================
// Certificates
// ============================================================================

/// PEM material for a CA, one runner identity and one client identity
pub struct TestPki {
    pub ca_cert: String,
    pub runner_cert: String,
    pub runner_key: String,
    pub client_cert: String,
    pub client_key: String,
}

impl TestPki {
    /// Mint a CA and sign a runner and a client certificate with it
    ///
    /// The runner certificate is valid for `localhost`, `127.0.0.1` and
    /// `fgateway`.
    pub fn generate() -> Self {
        let ca_key = KeyPair::generate().expect("CA key");
        let mut ca_params = CertificateParams::new(Vec::<String>::new()).expect("CA params");
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params
            .distinguished_name
            .push(DnType::CommonName, "btrfaas test CA");
        ca_params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let ca = ca_params.self_signed(&ca_key).expect("CA certificate");

        let runner_key = KeyPair::generate().expect("runner key");
        let mut runner_params = CertificateParams::new(vec![
            "localhost".to_string(),
            "127.0.0.1".to_string(),
            "fgateway".to_string(),
        ])
        .expect("runner params");
        runner_params
            .distinguished_name
            .push(DnType::CommonName, "frunner");
        runner_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        let runner = runner_params
            .signed_by(&runner_key, &ca, &ca_key)
            .expect("runner certificate");

        let client_key = KeyPair::generate().expect("client key");
        let mut client_params =
            CertificateParams::new(vec!["fgateway-client".to_string()]).expect("client params");
        client_params
            .distinguished_name
            .push(DnType::CommonName, "fgateway");
        client_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
        let client = client_params
            .signed_by(&client_key, &ca, &ca_key)
            .expect("client certificate");

        Self {
            ca_cert: ca.pem(),
            runner_cert: runner.pem(),
            runner_key: runner_key.serialize_pem(),
            client_cert: client.pem(),
            client_key: client_key.serialize_pem(),
        }
    }

    /// Write every secret under its default name into `dir`
    ///
    /// Names listed in `as_directories` are written in directory shape,
    /// `<name>/value`, the others as plain files.
    pub fn write_secrets(&self, dir: &Path, as_directories: &[&str]) {
        for (name, contents) in [
            (DEFAULT_CA_CERT_SECRET, &self.ca_cert),
            (DEFAULT_FUNCTION_CERT_SECRET, &self.runner_cert),
            (DEFAULT_FUNCTION_KEY_SECRET, &self.runner_key),
            (DEFAULT_CLIENT_CERT_SECRET, &self.client_cert),
            (DEFAULT_CLIENT_KEY_SECRET, &self.client_key),
        ] {
            write_secret(dir, name, contents.as_bytes(), as_directories.contains(&name));
        }
    }
}

/// Write one secret, either as a file or as a directory holding `value`
pub fn write_secret(dir: &Path, name: &str, contents: &[u8], as_directory: bool) {
    if as_directory {
        let secret_dir = dir.join(name);
        std::fs::create_dir_all(&secret_dir).expect("create secret directory");
        std::fs::write(secret_dir.join(SECRET_VALUE_ENTRY), contents).expect("write secret");
    } else {
        std::fs::write(dir.join(name), contents).expect("write secret");
    }
}

// ============================================================================
// Runners and executors
// ============================================================================

/// A runner serving on an OS-assigned loopback port
pub struct TestRunner {
    pub addr: SocketAddr,
    pub shutdown: Arc<ShutdownCoordinator>,
}

impl TestRunner {
    /// Endpoint override entry for this runner
    pub fn entry(&self, name: &str) -> String {
        format!("{}={}", name, self.addr)
    }

    pub async fn stop(&self) {
        let _ = self.shutdown.initiate_shutdown().await;
    }
}

/// Start a runner for `transform` behind `transport`
pub async fn spawn_runner(transform: Arc<dyn Transform>, transport: ServerTransport) -> TestRunner {
    spawn_runner_with(RunnerConfig::default(), transform, transport).await
}

/// Start a runner with the given config, listening on an OS-assigned port
pub async fn spawn_runner_with(
    mut config: RunnerConfig,
    transform: Arc<dyn Transform>,
    transport: ServerTransport,
) -> TestRunner {
    config.listen_addr = "127.0.0.1:0".parse().expect("loopback address");
    config.shutdown_timeout_secs = 1;
    let server = RunnerServer::bind(&config, transport, transform)
        .await
        .expect("bind runner");
    let addr = server.local_addr().expect("runner address");
    let shutdown = server.shutdown_coordinator();
    tokio::spawn(server.serve());
    TestRunner { addr, shutdown }
}

/// Start a plain TCP runner
pub async fn spawn_insecure_runner(transform: Arc<dyn Transform>) -> TestRunner {
    spawn_runner(transform, ServerTransport::Insecure).await
}

/// Executor with plain TCP and the given `NAME=ADDR` entries
pub fn insecure_executor(entries: &[String]) -> ChainExecutor {
    executor_with(ClientSecurity::Insecure, entries, ExecutorConfig::default())
}

pub fn executor_with(
    security: ClientSecurity,
    entries: &[String],
    config: ExecutorConfig,
) -> ChainExecutor {
    ChainExecutor::new(
        RunnerClient::new(security),
        EndpointResolver::from_entries(2424, entries).expect("endpoint entries"),
        config,
    )
}

// ============================================================================
// Transforms
// ============================================================================

/// Fails on the first chunk it sees
#[derive(Debug, Default)]
pub struct FailingTransform;

#[async_trait]
impl Transform for FailingTransform {
    fn name(&self) -> &str {
        "failing"
    }

    async fn transform(&self, _chunk: Bytes, _ctx: &SessionContext) -> Result<Bytes> {
        Err(BtrfaasError::Transform("refusing every chunk".to_string()))
    }
}

/// Echoes chunks while recording chunk counts and session options
#[derive(Debug, Default)]
pub struct RecordingTransform {
    chunks: AtomicUsize,
    options: Mutex<Vec<BTreeMap<String, String>>>,
}

impl RecordingTransform {
    pub fn chunks(&self) -> usize {
        self.chunks.load(Ordering::SeqCst)
    }

    /// Options of every session that delivered at least one chunk
    pub fn seen_options(&self) -> Vec<BTreeMap<String, String>> {
        self.options.lock().expect("options lock").clone()
    }
}

#[async_trait]
impl Transform for RecordingTransform {
    fn name(&self) -> &str {
        "recording"
    }

    async fn transform(&self, chunk: Bytes, ctx: &SessionContext) -> Result<Bytes> {
        if self.chunks.fetch_add(1, Ordering::SeqCst) == 0 {
            self.options
                .lock()
                .expect("options lock")
                .push(ctx.options.clone());
        }
        Ok(chunk)
    }
}
