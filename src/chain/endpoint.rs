//! Function name to runner address resolution
//!
//! Explicit overrides (the `[functions]` table or `--function NAME=ADDR`) win.
//! Otherwise the name itself is the address: `grpc://host[:port]` or a bare
//! `host[:port]`, with the default runner port when none is given. A bare name
//! such as `echo` therefore resolves to `echo:2424`, the service name of a
//! deployed function.

use std::collections::HashMap;
use std::fmt;

use tracing::debug;

use crate::config::DEFAULT_FUNCTION_PORT;
use crate::error::{BtrfaasError, Result};

const GRPC_SCHEME: &str = "grpc://";

/// Network address of one runner
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Maps function names to runner endpoints
#[derive(Debug, Clone)]
pub struct EndpointResolver {
    overrides: HashMap<String, Endpoint>,
    default_port: u16,
}

impl Default for EndpointResolver {
    fn default() -> Self {
        Self::new(DEFAULT_FUNCTION_PORT)
    }
}

impl EndpointResolver {
    pub fn new(default_port: u16) -> Self {
        Self {
            overrides: HashMap::new(),
            default_port,
        }
    }

    pub fn default_port(&self) -> u16 {
        self.default_port
    }

    /// Pin `name` to `address`
    pub fn insert(&mut self, name: impl Into<String>, address: &str) -> Result<()> {
        let name = name.into();
        let endpoint = parse_address(&name, address, self.default_port)?;
        debug!(function = %name, endpoint = %endpoint, "Registered function endpoint");
        self.overrides.insert(name, endpoint);
        Ok(())
    }

    /// Build a resolver from `NAME=ADDR` entries; later entries win
    pub fn from_entries<I, S>(default_port: u16, entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut resolver = Self::new(default_port);
        for entry in entries {
            let entry = entry.as_ref();
            let (name, address) = entry.split_once('=').ok_or_else(|| {
                BtrfaasError::Config(format!(
                    "function endpoint '{}' must be written as NAME=ADDR",
                    entry
                ))
            })?;
            let name = name.trim();
            if name.is_empty() {
                return Err(BtrfaasError::Config(format!(
                    "function endpoint '{}' has an empty name",
                    entry
                )));
            }
            resolver.insert(name, address.trim())?;
        }
        Ok(resolver)
    }

    /// Resolve a function name to its runner endpoint
    pub fn resolve(&self, name: &str) -> Result<Endpoint> {
        if let Some(endpoint) = self.overrides.get(name) {
            return Ok(endpoint.clone());
        }
        parse_address(name, name, self.default_port)
    }
}

fn parse_address(name: &str, address: &str, default_port: u16) -> Result<Endpoint> {
    let rest = match address.split_once("://") {
        Some(_) if address.starts_with(GRPC_SCHEME) => &address[GRPC_SCHEME.len()..],
        Some((scheme, _)) => {
            return Err(BtrfaasError::invalid_identifier(
                name,
                format!("unsupported scheme '{}'", scheme),
            ))
        }
        None => address,
    };
    let rest = rest.trim_end_matches('/');

    let (host, port) = if let Some(bracketed) = rest.strip_prefix('[') {
        let (host, tail) = bracketed
            .split_once(']')
            .ok_or_else(|| BtrfaasError::invalid_identifier(name, "unterminated IPv6 address"))?;
        let port = match tail.strip_prefix(':') {
            Some(port) => Some(port),
            None if tail.is_empty() => None,
            None => {
                return Err(BtrfaasError::invalid_identifier(
                    name,
                    format!("unexpected '{}' after IPv6 address", tail),
                ))
            }
        };
        (host, port)
    } else {
        match rest.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (rest, None),
        }
    };

    if host.is_empty() {
        return Err(BtrfaasError::invalid_identifier(name, "empty host"));
    }
    if host.contains('/') {
        return Err(BtrfaasError::invalid_identifier(
            name,
            "paths are not supported in function addresses",
        ));
    }

    let port = match port {
        Some(port) => port.parse::<u16>().map_err(|_| {
            BtrfaasError::invalid_identifier(name, format!("invalid port '{}'", port))
        })?,
        None => default_port,
    };

    Ok(Endpoint {
        host: host.to_string(),
        port,
    })
}
