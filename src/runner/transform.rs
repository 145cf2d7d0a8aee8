//! Pluggable chunk transformations served by a runner
//!
//! A runner is generic over one [`Transform`]. It calls the transform once
//! per input chunk and writes exactly the chunk it returns, in order.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use super::exec::Exec;
use crate::error::{BtrfaasError, Result};

/// Per-session information handed to every transform call
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session_id: u64,
    pub peer: SocketAddr,
    /// Options this call's step was configured with
    pub options: BTreeMap<String, String>,
}

/// A function body: one input chunk in, one output chunk out
#[async_trait]
pub trait Transform: Send + Sync {
    /// Name used in logs and metrics
    fn name(&self) -> &str;

    /// Reject options this function does not understand
    ///
    /// Called once per session, before any chunk is read.
    fn validate_options(&self, _options: &BTreeMap<String, String>) -> Result<()> {
        Ok(())
    }

    /// Transform one chunk
    async fn transform(&self, chunk: Bytes, ctx: &SessionContext) -> Result<Bytes>;
}

/// Identity function, returns every chunk unchanged
#[derive(Debug, Clone, Default)]
pub struct Echo;

#[async_trait]
impl Transform for Echo {
    fn name(&self) -> &str {
        "echo"
    }

    async fn transform(&self, chunk: Bytes, ctx: &SessionContext) -> Result<Bytes> {
        debug!(
            session = ctx.session_id,
            size = chunk.len(),
            "Echoing chunk"
        );
        Ok(chunk)
    }
}

/// ASCII upper-casing; non-ASCII bytes pass through untouched
///
/// Accepts one option, `skip`, a set of ASCII letters left as they are.
#[derive(Debug, Clone, Default)]
pub struct Uppercase;

#[async_trait]
impl Transform for Uppercase {
    fn name(&self) -> &str {
        "uppercase"
    }

    fn validate_options(&self, options: &BTreeMap<String, String>) -> Result<()> {
        if let Some(key) = options.keys().find(|k| k.as_str() != "skip") {
            return Err(BtrfaasError::InvalidOptions(format!(
                "uppercase does not accept option {:?}",
                key
            )));
        }
        Ok(())
    }

    async fn transform(&self, chunk: Bytes, ctx: &SessionContext) -> Result<Bytes> {
        let skip = ctx.options.get("skip").map(String::as_bytes).unwrap_or(&[]);
        let out: Vec<u8> = chunk
            .iter()
            .map(|&b| {
                if skip.contains(&b) {
                    b
                } else {
                    b.to_ascii_uppercase()
                }
            })
            .collect();
        Ok(Bytes::from(out))
    }
}

/// Names accepted by [`transform_by_name`]
pub const BUILTIN_TRANSFORMS: &[&str] = &["echo", "uppercase"];

/// Function name that runs an external command
pub const EXEC_FUNCTION: &str = "exec";

/// Look up a built-in transform
pub fn transform_by_name(name: &str) -> Result<Arc<dyn Transform>> {
    match name {
        "echo" => Ok(Arc::new(Echo)),
        "uppercase" => Ok(Arc::new(Uppercase)),
        EXEC_FUNCTION => Err(BtrfaasError::Config(
            "the exec function needs a command to run".to_string(),
        )),
        other => Err(BtrfaasError::Config(format!(
            "Unknown function: {}. Built-in functions are {}, or {} with a command",
            other,
            BUILTIN_TRANSFORMS.join(", "),
            EXEC_FUNCTION
        ))),
    }
}

/// Transform for a runner: `exec` runs `process`, anything else is a built-in
pub fn transform_for(function: &str, process: &[String]) -> Result<Arc<dyn Transform>> {
    if function == EXEC_FUNCTION {
        return Ok(Arc::new(Exec::new(process)?));
    }
    transform_by_name(function)
}
