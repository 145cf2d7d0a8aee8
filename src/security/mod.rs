//! Transport security for runners and callers
//!
//! - `resolver` - reads mounted secrets, following directory indirection
//! - `policy` - turns a security mode plus resolved secrets into TLS acceptors
//!   and connectors

pub mod policy;
pub mod resolver;

pub use policy::{ClientSecurity, SecretNames, SecurityConfig, SecurityMode, ServerTransport};
pub use resolver::{CredentialMaterial, FsSecretResolver, SecretSource, StaticSecrets};
