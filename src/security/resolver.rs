//! Credential resolution for mounted secrets
//!
//! Orchestrators deliver secrets in one of two shapes: a plain file, or a
//! directory holding a single `value` entry. [`FsSecretResolver`] accepts
//! both, deciding per secret, so a directory-shaped CA never changes how the
//! sibling key or certificate is read.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::debug;
use zeroize::Zeroizing;

use crate::config::{DEFAULT_SECRETS_DIR, SECRET_VALUE_ENTRY};
use crate::error::{BtrfaasError, Result};

/// Source of secret bytes addressed by logical name
pub trait SecretSource: Send + Sync {
    /// Resolve one logical secret name to its bytes
    fn resolve(&self, logical_name: &str) -> Result<Vec<u8>>;
}

/// Resolves secrets from a mount directory, following directory indirection
#[derive(Debug, Clone)]
pub struct FsSecretResolver {
    root: PathBuf,
    value_entry: String,
}

impl FsSecretResolver {
    /// Create a resolver rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            value_entry: SECRET_VALUE_ENTRY.to_string(),
        }
    }

    /// Override the entry name read inside a directory-shaped secret
    pub fn with_value_entry(mut self, entry: impl Into<String>) -> Self {
        self.value_entry = entry.into();
        self
    }

    /// Mount directory this resolver reads from
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn read(&self, logical_name: &str, path: &Path) -> Result<Vec<u8>> {
        let bytes = std::fs::read(path).map_err(|e| {
            BtrfaasError::secret_unavailable(logical_name, format!("{}: {}", path.display(), e))
        })?;
        if bytes.is_empty() {
            return Err(BtrfaasError::secret_unavailable(
                logical_name,
                format!("{} is empty", path.display()),
            ));
        }
        Ok(bytes)
    }
}

impl Default for FsSecretResolver {
    fn default() -> Self {
        Self::new(DEFAULT_SECRETS_DIR)
    }
}

impl SecretSource for FsSecretResolver {
    fn resolve(&self, logical_name: &str) -> Result<Vec<u8>> {
        if logical_name.is_empty() {
            return Err(BtrfaasError::secret_unavailable(
                logical_name,
                "empty secret name",
            ));
        }

        let path = self.root.join(logical_name);
        let metadata = std::fs::metadata(&path).map_err(|e| {
            BtrfaasError::secret_unavailable(logical_name, format!("{}: {}", path.display(), e))
        })?;

        if metadata.is_dir() {
            let indirect = path.join(&self.value_entry);
            debug!(
                secret = %logical_name,
                path = %indirect.display(),
                "Secret is a directory, reading value entry"
            );
            return self.read(logical_name, &indirect);
        }

        self.read(logical_name, &path)
    }
}

/// In-memory secrets, for injection in tests and embedded setups
#[derive(Debug, Clone, Default)]
pub struct StaticSecrets {
    secrets: HashMap<String, Vec<u8>>,
}

impl StaticSecrets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a secret, returning self for chaining
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.secrets.insert(name.into(), value.into());
        self
    }
}

impl SecretSource for StaticSecrets {
    fn resolve(&self, logical_name: &str) -> Result<Vec<u8>> {
        match self.secrets.get(logical_name) {
            Some(bytes) if !bytes.is_empty() => Ok(bytes.clone()),
            Some(_) => Err(BtrfaasError::secret_unavailable(logical_name, "empty value")),
            None => Err(BtrfaasError::secret_unavailable(logical_name, "not provided")),
        }
    }
}

/// Resolved TLS material, each part present only when the mode needed it
///
/// Read once at startup and shared read-only by every session afterwards.
#[derive(Default)]
pub struct CredentialMaterial {
    pub ca_cert: Option<Vec<u8>>,
    pub private_key: Option<Zeroizing<Vec<u8>>>,
    pub cert_chain: Option<Vec<u8>>,
}

impl std::fmt::Debug for CredentialMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialMaterial")
            .field("ca_cert", &self.ca_cert.as_ref().map(Vec::len))
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .field("cert_chain", &self.cert_chain.as_ref().map(Vec::len))
            .finish()
    }
}
