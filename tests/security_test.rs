//! Transport security end to end: secrets on disk, runner and caller TLS

mod common;

use std::sync::Arc;

use btrfaas::chain::{decode, ChainExecutor, ExecutorConfig};
use std::time::Duration;

use btrfaas::config::{ClientConfig, RunnerConfig, DEFAULT_FUNCTION_KEY_SECRET};
use btrfaas::error::BtrfaasError;
use btrfaas::runner::{Echo, Uppercase};
use btrfaas::security::{
    ClientSecurity, FsSecretResolver, SecretNames, SecurityConfig, SecurityMode, ServerTransport,
};
use bytes::Bytes;
use common::*;
use tempfile::TempDir;
use tokio::net::TcpStream;

fn runner_transport(mode: SecurityMode, secrets: &FsSecretResolver) -> btrfaas::Result<ServerTransport> {
    ServerTransport::build(&SecurityConfig::new(mode, SecretNames::runner()), secrets)
}

fn client_security(mode: SecurityMode, secrets: &FsSecretResolver) -> ClientSecurity {
    ClientSecurity::build(&SecurityConfig::new(mode, SecretNames::client()), secrets)
        .expect("client security")
}

#[tokio::test]
async fn test_server_tls_chain_with_directory_secrets() {
    let pki = TestPki::generate();
    let dir = TempDir::new().unwrap();
    // CA as a plain file, runner identity in directory shape
    pki.write_secrets(
        dir.path(),
        &["function-key", "function-cert"],
    );
    let secrets = FsSecretResolver::new(dir.path());

    let transport = runner_transport(SecurityMode::ServerTls, &secrets).unwrap();
    assert!(transport.is_tls());
    let runner = spawn_runner(Arc::new(Uppercase), transport).await;

    let executor = executor_with(
        client_security(SecurityMode::ServerTls, &secrets),
        &[runner.entry("up")],
        ExecutorConfig::default(),
    );
    let output = executor
        .execute(&decode("up|up", None).unwrap(), Bytes::from_static(b"foobar"))
        .await
        .unwrap();
    assert_eq!(output, Bytes::from_static(b"FOOBAR"));
}

#[tokio::test]
async fn test_mutual_tls_chain() {
    let pki = TestPki::generate();
    let dir = TempDir::new().unwrap();
    pki.write_secrets(
        dir.path(),
        &["ca-cert", "client-key"],
    );
    let secrets = FsSecretResolver::new(dir.path());

    let runner = spawn_runner(
        Arc::new(Echo),
        runner_transport(SecurityMode::MutualTls, &secrets).unwrap(),
    )
    .await;

    let executor = executor_with(
        client_security(SecurityMode::MutualTls, &secrets).with_server_name("fgateway"),
        &[runner.entry("echo")],
        ExecutorConfig::default(),
    );
    let output = executor
        .execute(&decode("echo|echo|echo", None).unwrap(), Bytes::from_static(b"foobar"))
        .await
        .unwrap();
    assert_eq!(output, Bytes::from_static(b"foobar"));
}

#[tokio::test]
async fn test_mutual_tls_rejects_caller_without_certificate() {
    let pki = TestPki::generate();
    let dir = TempDir::new().unwrap();
    pki.write_secrets(dir.path(), &[]);
    let secrets = FsSecretResolver::new(dir.path());

    let runner = spawn_runner(
        Arc::new(Echo),
        runner_transport(SecurityMode::MutualTls, &secrets).unwrap(),
    )
    .await;

    // Trusts the runner but presents no identity
    let executor = executor_with(
        client_security(SecurityMode::ServerTls, &secrets),
        &[runner.entry("echo")],
        ExecutorConfig::default(),
    );
    let err = executor
        .execute(&decode("echo", None).unwrap(), Bytes::from_static(b"foobar"))
        .await
        .unwrap_err();
    assert_eq!(err.step_index(), Some(0));
}

#[tokio::test]
async fn test_plain_caller_cannot_talk_to_tls_runner() {
    let pki = TestPki::generate();
    let dir = TempDir::new().unwrap();
    pki.write_secrets(dir.path(), &[]);
    let secrets = FsSecretResolver::new(dir.path());

    let runner = spawn_runner(
        Arc::new(Echo),
        runner_transport(SecurityMode::ServerTls, &secrets).unwrap(),
    )
    .await;

    let executor = executor_with(
        ClientSecurity::Insecure,
        &[runner.entry("echo")],
        ExecutorConfig {
            idle_timeout: std::time::Duration::from_secs(2),
            ..ExecutorConfig::default()
        },
    );
    let err = executor
        .execute(&decode("echo", None).unwrap(), Bytes::from_static(b"foobar"))
        .await
        .unwrap_err();
    assert_eq!(err.step_index(), Some(0));
}

fn tls_runner_transport(dir: &TempDir) -> ServerTransport {
    TestPki::generate().write_secrets(dir.path(), &[]);
    runner_transport(SecurityMode::ServerTls, &FsSecretResolver::new(dir.path())).unwrap()
}

#[tokio::test]
async fn test_silent_peer_is_dropped_after_idle_timeout() {
    let dir = TempDir::new().unwrap();
    let mut config = RunnerConfig::default();
    config.limits.idle_timeout = Duration::from_millis(200);
    let runner = spawn_runner_with(config, Arc::new(Echo), tls_runner_transport(&dir)).await;

    // Connects but never sends a ClientHello
    let _silent = TcpStream::connect(runner.addr).await.unwrap();
    assert!(wait_for_sessions(&runner.shutdown, 1, Duration::from_secs(2)).await);
    assert!(wait_for_sessions(&runner.shutdown, 0, Duration::from_secs(2)).await);

    // Nothing left to drain
    assert!(runner.shutdown.initiate_shutdown().await.is_ok());
}

#[tokio::test]
async fn test_shutdown_abort_ends_pending_handshake() {
    let dir = TempDir::new().unwrap();
    let runner = spawn_runner(Arc::new(Echo), tls_runner_transport(&dir)).await;

    let _silent = TcpStream::connect(runner.addr).await.unwrap();
    assert!(wait_for_sessions(&runner.shutdown, 1, Duration::from_secs(2)).await);

    // The idle timeout is far away, so only the abort can end the handshake
    let err = runner.shutdown.initiate_shutdown().await.unwrap_err();
    assert_eq!(err.pending_sessions, 1);
    assert!(wait_for_sessions(&runner.shutdown, 0, Duration::from_secs(1)).await);
}

#[test]
fn test_mutual_tls_missing_key_fails_before_listening() {
    let pki = TestPki::generate();
    let dir = TempDir::new().unwrap();
    pki.write_secrets(dir.path(), &[]);
    std::fs::remove_file(dir.path().join(DEFAULT_FUNCTION_KEY_SECRET)).unwrap();
    let secrets = FsSecretResolver::new(dir.path());

    match runner_transport(SecurityMode::MutualTls, &secrets) {
        Err(BtrfaasError::SecurityConfig(message)) => {
            assert!(message.contains(DEFAULT_FUNCTION_KEY_SECRET));
        }
        other => panic!("unexpected result {:?}", other),
    }
}

#[test]
fn test_insecure_mode_reads_no_secrets() {
    let dir = TempDir::new().unwrap();
    let secrets = FsSecretResolver::new(dir.path().join("does-not-exist"));
    let transport = runner_transport(SecurityMode::Insecure, &secrets).unwrap();
    assert!(!transport.is_tls());
}

#[test]
fn test_executor_from_config_loads_client_identity() {
    let pki = TestPki::generate();
    let dir = TempDir::new().unwrap();
    pki.write_secrets(dir.path(), &["client-cert.pem"]);

    let mut config = ClientConfig::default();
    config.security.mode = SecurityMode::MutualTls;
    config.secrets_dir = dir.path().to_path_buf();
    let secrets = FsSecretResolver::new(config.secrets_dir.clone());
    assert!(ChainExecutor::from_config(&config, &secrets).is_ok());

    std::fs::remove_dir_all(dir.path().join("client-cert.pem")).unwrap();
    assert!(matches!(
        ChainExecutor::from_config(&config, &secrets),
        Err(BtrfaasError::SecurityConfig(_))
    ));
}
