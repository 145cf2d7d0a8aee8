//! Transport security policy for runners and their callers
//!
//! The policy turns a [`SecurityConfig`] plus a [`SecretSource`] into ready
//! transport credentials. Everything is resolved and validated up front, so a
//! runner either binds fully secured in the requested mode or does not bind.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::version::{TLS12, TLS13};
use rustls::{
    ClientConfig as RustlsClientConfig, RootCertStore, ServerConfig as RustlsServerConfig,
    SupportedProtocolVersion,
};
use serde::{Deserialize, Serialize};
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::info;
use zeroize::Zeroizing;

use super::resolver::{CredentialMaterial, SecretSource};
use crate::config::{
    DEFAULT_CA_CERT_SECRET, DEFAULT_CLIENT_CERT_SECRET, DEFAULT_CLIENT_KEY_SECRET,
    DEFAULT_FUNCTION_CERT_SECRET, DEFAULT_FUNCTION_KEY_SECRET, DEFAULT_TLS_MIN_VERSION,
};
use crate::error::{BtrfaasError, Result};

/// How a connection between caller and runner is protected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SecurityMode {
    /// Plain TCP, for local development only
    #[serde(rename = "insecure")]
    Insecure,
    /// Server authenticates with its certificate, client certificates optional
    #[serde(rename = "tls")]
    ServerTls,
    /// Both sides present certificates signed by the shared CA
    #[serde(rename = "mtls")]
    MutualTls,
}

impl SecurityMode {
    /// Returns true if this mode needs TLS material
    pub fn is_tls(&self) -> bool {
        !matches!(self, SecurityMode::Insecure)
    }

    /// Returns true if peers must present a verifiable client certificate
    pub fn requires_client_cert(&self) -> bool {
        matches!(self, SecurityMode::MutualTls)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityMode::Insecure => "insecure",
            SecurityMode::ServerTls => "tls",
            SecurityMode::MutualTls => "mtls",
        }
    }
}

impl FromStr for SecurityMode {
    type Err = BtrfaasError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "insecure" | "none" | "plaintext" => Ok(SecurityMode::Insecure),
            "tls" | "server-tls" => Ok(SecurityMode::ServerTls),
            "mtls" | "mutual-tls" => Ok(SecurityMode::MutualTls),
            other => Err(BtrfaasError::Config(format!(
                "Invalid security mode: {}. Must be 'insecure', 'tls' or 'mtls'",
                other
            ))),
        }
    }
}

impl fmt::Display for SecurityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logical names of the three secrets a TLS endpoint needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretNames {
    pub ca_cert: String,
    pub private_key: String,
    pub cert_chain: String,
}

impl SecretNames {
    /// Names mounted into a function runner
    pub fn runner() -> Self {
        Self {
            ca_cert: DEFAULT_CA_CERT_SECRET.to_string(),
            private_key: DEFAULT_FUNCTION_KEY_SECRET.to_string(),
            cert_chain: DEFAULT_FUNCTION_CERT_SECRET.to_string(),
        }
    }

    /// Names mounted into a caller (gateway or CLI)
    pub fn client() -> Self {
        Self {
            ca_cert: DEFAULT_CA_CERT_SECRET.to_string(),
            private_key: DEFAULT_CLIENT_KEY_SECRET.to_string(),
            cert_chain: DEFAULT_CLIENT_CERT_SECRET.to_string(),
        }
    }
}

impl Default for SecretNames {
    fn default() -> Self {
        Self::runner()
    }
}

/// Explicit security configuration handed to the policy by the entry point
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub mode: SecurityMode,
    pub names: SecretNames,
    /// Minimum TLS version (1.2 or 1.3)
    pub min_tls_version: String,
}

impl SecurityConfig {
    pub fn new(mode: SecurityMode, names: SecretNames) -> Self {
        Self {
            mode,
            names,
            min_tls_version: DEFAULT_TLS_MIN_VERSION.to_string(),
        }
    }

    /// Plain TCP configuration
    pub fn insecure() -> Self {
        Self::new(SecurityMode::Insecure, SecretNames::default())
    }

    pub fn with_min_tls_version(mut self, version: impl Into<String>) -> Self {
        self.min_tls_version = version.into();
        self
    }

    /// Validate settings that do not need any secret
    pub fn validate(&self) -> Result<()> {
        if self.min_tls_version != "1.2" && self.min_tls_version != "1.3" {
            return Err(BtrfaasError::Config(format!(
                "Invalid TLS minimum version: {}. Must be '1.2' or '1.3'",
                self.min_tls_version
            )));
        }
        Ok(())
    }
}

impl CredentialMaterial {
    /// Resolve what a serving endpoint needs for the configured mode
    ///
    /// Both TLS modes require the CA, the private key and the certificate
    /// chain. `Insecure` resolves nothing.
    pub fn for_server(config: &SecurityConfig, source: &dyn SecretSource) -> Result<Self> {
        if !config.mode.is_tls() {
            return Ok(Self::default());
        }
        Ok(Self {
            ca_cert: Some(require(config, source, &config.names.ca_cert)?),
            private_key: Some(Zeroizing::new(require(
                config,
                source,
                &config.names.private_key,
            )?)),
            cert_chain: Some(require(config, source, &config.names.cert_chain)?),
        })
    }

    /// Resolve what a calling endpoint needs for the configured mode
    ///
    /// The CA is needed for any TLS mode, the client identity only for
    /// mutual TLS.
    pub fn for_client(config: &SecurityConfig, source: &dyn SecretSource) -> Result<Self> {
        if !config.mode.is_tls() {
            return Ok(Self::default());
        }
        let mut material = Self {
            ca_cert: Some(require(config, source, &config.names.ca_cert)?),
            ..Self::default()
        };
        if config.mode.requires_client_cert() {
            material.private_key = Some(Zeroizing::new(require(
                config,
                source,
                &config.names.private_key,
            )?));
            material.cert_chain = Some(require(config, source, &config.names.cert_chain)?);
        }
        Ok(material)
    }
}

fn require(config: &SecurityConfig, source: &dyn SecretSource, name: &str) -> Result<Vec<u8>> {
    source.resolve(name).map_err(|e| {
        BtrfaasError::SecurityConfig(format!(
            "mode {} requires secret {:?}: {}",
            config.mode, name, e
        ))
    })
}

/// Listener-side transport, built before the listener is bound
#[derive(Clone)]
pub enum ServerTransport {
    Insecure,
    Tls {
        acceptor: TlsAcceptor,
        require_client_cert: bool,
    },
}

impl fmt::Debug for ServerTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerTransport::Insecure => f.write_str("ServerTransport::Insecure"),
            ServerTransport::Tls {
                require_client_cert,
                ..
            } => f
                .debug_struct("ServerTransport::Tls")
                .field("require_client_cert", require_client_cert)
                .finish(),
        }
    }
}

impl ServerTransport {
    /// Build the serving transport for the configured mode
    ///
    /// Fails with `SecurityConfig` when a required secret is missing or the
    /// material does not form a usable TLS identity.
    pub fn build(config: &SecurityConfig, source: &dyn SecretSource) -> Result<Self> {
        config.validate()?;
        let material = CredentialMaterial::for_server(config, source)?;
        Self::from_material(config, &material)
    }

    /// Build from already resolved material
    pub fn from_material(config: &SecurityConfig, material: &CredentialMaterial) -> Result<Self> {
        if !config.mode.is_tls() {
            info!("Transport security disabled, serving plain TCP");
            return Ok(ServerTransport::Insecure);
        }

        let ca = material
            .ca_cert
            .as_deref()
            .ok_or_else(|| BtrfaasError::security("server tls", "CA certificate missing"))?;
        let chain = material
            .cert_chain
            .as_deref()
            .ok_or_else(|| BtrfaasError::security("server tls", "certificate chain missing"))?;
        let key = material
            .private_key
            .as_deref()
            .ok_or_else(|| BtrfaasError::security("server tls", "private key missing"))?;

        let certs = parse_certs(chain, "certificate chain")?;
        let key = parse_private_key(key)?;
        let root_store = root_store(ca)?;
        let require_client_cert = config.mode.requires_client_cert();

        let verifier_builder = rustls::server::WebPkiClientVerifier::builder_with_provider(
            Arc::new(root_store),
            crypto_provider(),
        );
        let verifier = if require_client_cert {
            verifier_builder.build()
        } else {
            verifier_builder.allow_unauthenticated().build()
        }
        .map_err(|e| BtrfaasError::security("client verifier", e.to_string()))?;

        let versions = supported_versions(&config.min_tls_version);
        let rustls_config = RustlsServerConfig::builder_with_provider(crypto_provider())
            .with_protocol_versions(&versions)
            .map_err(|e| BtrfaasError::security("protocol versions", e.to_string()))?
            .with_client_cert_verifier(verifier)
            .with_single_cert(certs, key)
            .map_err(|e| BtrfaasError::security("server identity", e.to_string()))?;

        info!(
            mode = %config.mode,
            min_version = %config.min_tls_version,
            require_client_cert,
            "TLS configuration loaded successfully"
        );

        Ok(ServerTransport::Tls {
            acceptor: TlsAcceptor::from(Arc::new(rustls_config)),
            require_client_cert,
        })
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, ServerTransport::Tls { .. })
    }
}

/// Caller-side transport used when opening calls to runners
#[derive(Clone)]
pub enum ClientSecurity {
    Insecure,
    Tls {
        connector: TlsConnector,
        /// Name checked against the runner certificate instead of the dialled host
        server_name: Option<String>,
    },
}

impl fmt::Debug for ClientSecurity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientSecurity::Insecure => f.write_str("ClientSecurity::Insecure"),
            ClientSecurity::Tls { server_name, .. } => f
                .debug_struct("ClientSecurity::Tls")
                .field("server_name", server_name)
                .finish(),
        }
    }
}

impl ClientSecurity {
    /// Build the calling transport for the configured mode
    pub fn build(config: &SecurityConfig, source: &dyn SecretSource) -> Result<Self> {
        config.validate()?;
        let material = CredentialMaterial::for_client(config, source)?;
        Self::from_material(config, &material)
    }

    /// Build from already resolved material
    pub fn from_material(config: &SecurityConfig, material: &CredentialMaterial) -> Result<Self> {
        if !config.mode.is_tls() {
            return Ok(ClientSecurity::Insecure);
        }

        let ca = material
            .ca_cert
            .as_deref()
            .ok_or_else(|| BtrfaasError::security("client tls", "CA certificate missing"))?;
        let root_store = root_store(ca)?;

        let versions = supported_versions(&config.min_tls_version);
        let builder = RustlsClientConfig::builder_with_provider(crypto_provider())
            .with_protocol_versions(&versions)
            .map_err(|e| BtrfaasError::security("protocol versions", e.to_string()))?
            .with_root_certificates(root_store);

        let client_config = if config.mode.requires_client_cert() {
            let chain = material.cert_chain.as_deref().ok_or_else(|| {
                BtrfaasError::security("client tls", "client certificate chain missing")
            })?;
            let key = material
                .private_key
                .as_deref()
                .ok_or_else(|| BtrfaasError::security("client tls", "client key missing"))?;
            builder
                .with_client_auth_cert(parse_certs(chain, "client certificate chain")?, parse_private_key(key)?)
                .map_err(|e| BtrfaasError::security("client identity", e.to_string()))?
        } else {
            builder.with_no_client_auth()
        };

        info!(
            mode = %config.mode,
            min_version = %config.min_tls_version,
            "Client TLS configuration loaded successfully"
        );

        Ok(ClientSecurity::Tls {
            connector: TlsConnector::from(Arc::new(client_config)),
            server_name: None,
        })
    }

    /// Verify runner certificates against a fixed name
    pub fn with_server_name(self, name: impl Into<String>) -> Self {
        match self {
            ClientSecurity::Tls { connector, .. } => ClientSecurity::Tls {
                connector,
                server_name: Some(name.into()),
            },
            insecure => insecure,
        }
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, ClientSecurity::Tls { .. })
    }
}

fn crypto_provider() -> Arc<rustls::crypto::CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Get supported TLS versions based on minimum version configuration
fn supported_versions(min_version: &str) -> Vec<&'static SupportedProtocolVersion> {
    match min_version {
        "1.3" => vec![&TLS13],
        _ => vec![&TLS12, &TLS13],
    }
}

fn root_store(ca_pem: &[u8]) -> Result<RootCertStore> {
    let mut store = RootCertStore::empty();
    for cert in parse_certs(ca_pem, "CA certificate")? {
        store
            .add(cert)
            .map_err(|e| BtrfaasError::security("add CA certificate", e.to_string()))?;
    }
    Ok(store)
}

/// Parse PEM certificates from resolved secret bytes
fn parse_certs(pem: &[u8], what: &str) -> Result<Vec<CertificateDer<'static>>> {
    let certs = rustls_pemfile::certs(&mut &pem[..])
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| BtrfaasError::security(what, format!("failed to parse PEM: {}", e)))?;

    if certs.is_empty() {
        return Err(BtrfaasError::security(what, "no certificates found"));
    }
    Ok(certs)
}

/// Parse a PEM private key (PKCS8, RSA or SEC1) from resolved secret bytes
fn parse_private_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>> {
    rustls_pemfile::private_key(&mut &pem[..])
        .map_err(|e| BtrfaasError::security("private key", format!("failed to parse PEM: {}", e)))?
        .ok_or_else(|| BtrfaasError::security("private key", "no private key found"))
}
