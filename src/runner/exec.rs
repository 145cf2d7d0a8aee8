//! Process-backed transform
//!
//! [`Exec`] runs its command once per chunk. The chunk is written to the
//! command's stdin and everything the command prints on stdout becomes the
//! output chunk, so one chunk in still means one chunk out. Step options are
//! added to the command's environment. A non-zero exit fails the session with
//! the command's stderr in the message.
//!
//! The child is killed when the call is dropped, which is how session
//! deadlines and runner shutdown reach a command that does not finish.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::process::Stdio;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use super::transform::{SessionContext, Transform};
use crate::error::{BtrfaasError, Result};

/// Most stderr bytes carried into an error message
const STDERR_LIMIT: usize = 4096;

/// Runs an external command for every chunk
#[derive(Debug, Clone)]
pub struct Exec {
    program: String,
    args: Vec<String>,
}

impl Exec {
    /// Build from a command line, program first
    pub fn new(command: &[String]) -> Result<Self> {
        let (program, args) = command.split_first().ok_or_else(|| {
            BtrfaasError::Config("the exec function needs a command to run".to_string())
        })?;
        if program.trim().is_empty() {
            return Err(BtrfaasError::Config(
                "the exec function needs a command to run".to_string(),
            ));
        }
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

#[async_trait]
impl Transform for Exec {
    fn name(&self) -> &str {
        "exec"
    }

    fn validate_options(&self, options: &BTreeMap<String, String>) -> Result<()> {
        // Options become environment variables
        for (key, value) in options {
            if key.contains('\0') || value.contains('\0') {
                return Err(BtrfaasError::InvalidOptions(format!(
                    "option {:?} cannot be passed through the environment",
                    key
                )));
            }
        }
        Ok(())
    }

    async fn transform(&self, chunk: Bytes, ctx: &SessionContext) -> Result<Bytes> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .envs(&ctx.options)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                BtrfaasError::Transform(format!("failed to start {}: {}", self.program, e))
            })?;

        let mut stdin = child.stdin.take().ok_or_else(|| {
            BtrfaasError::Transform(format!("stdin of {} was not captured", self.program))
        })?;
        let input_len = chunk.len();
        let feed = async move {
            let written = stdin.write_all(&chunk).await;
            drop(stdin);
            match written {
                // A command may exit without reading all of its input
                Err(e) if e.kind() == ErrorKind::BrokenPipe => Ok(()),
                other => other,
            }
        };

        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output.map_err(|e| {
            BtrfaasError::Transform(format!("waiting for {} failed: {}", self.program, e))
        })?;

        if !output.status.success() {
            let stderr = &output.stderr[..output.stderr.len().min(STDERR_LIMIT)];
            let stderr = String::from_utf8_lossy(stderr);
            warn!(
                session = ctx.session_id,
                program = %self.program,
                status = %output.status,
                stderr = %stderr.trim(),
                "Command failed"
            );
            return Err(BtrfaasError::Transform(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }
        fed.map_err(|e| {
            BtrfaasError::Transform(format!("writing to {} failed: {}", self.program, e))
        })?;

        debug!(
            session = ctx.session_id,
            program = %self.program,
            input = input_len,
            output = output.stdout.len(),
            "Command finished"
        );
        Ok(Bytes::from(output.stdout))
    }
}
