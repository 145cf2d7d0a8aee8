//! Client side of the `run` streaming call
//!
//! A call owns one connection. [`RunnerClient::open`] connects, performs the
//! TLS handshake when configured, sends OPEN with the step options and splits
//! the connection into a [`CallSender`] and a [`CallReceiver`] that can be
//! driven from different tasks.

use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Bytes;
use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

use super::frame::{Frame, FrameReader, FrameWriter, OpenRequest};
use crate::config::{DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_MAX_FRAME_BYTES};
use crate::error::{BtrfaasError, Result};
use crate::security::ClientSecurity;

/// Any bidirectional byte stream a call can run over
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Boxed plain or TLS connection
pub type BoxedStream = Box<dyn AsyncStream>;

/// Opens `run` calls to runners
#[derive(Debug, Clone)]
pub struct RunnerClient {
    security: ClientSecurity,
    connect_timeout: Duration,
    max_frame_bytes: usize,
}

impl RunnerClient {
    pub fn new(security: ClientSecurity) -> Self {
        Self {
            security,
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_max_frame_bytes(mut self, max: usize) -> Self {
        self.max_frame_bytes = max;
        self
    }

    pub fn security(&self) -> &ClientSecurity {
        &self.security
    }

    /// Connect to `host:port` and start a call carrying `options`
    pub async fn open(
        &self,
        host: &str,
        port: u16,
        options: &BTreeMap<String, String>,
    ) -> Result<(CallSender, CallReceiver)> {
        let stream = tokio::time::timeout(self.connect_timeout, self.connect(host, port))
            .await
            .map_err(|_| {
                BtrfaasError::Timeout(format!(
                    "connecting to {}:{} took longer than {:?}",
                    host, port, self.connect_timeout
                ))
            })??;

        let (read_half, write_half) = tokio::io::split(stream);
        let mut writer = FrameWriter::new(write_half);
        writer
            .write_frame(&Frame::Open(OpenRequest::run(options)))
            .await
            .map_err(|e| BtrfaasError::network("send OPEN", e.to_string()))?;

        debug!(host = %host, port, options = options.len(), "Call opened");

        Ok((
            CallSender { writer },
            CallReceiver {
                reader: FrameReader::new(read_half, self.max_frame_bytes),
                finished: false,
            },
        ))
    }

    async fn connect(&self, host: &str, port: u16) -> Result<BoxedStream> {
        let tcp = TcpStream::connect((host, port))
            .await
            .map_err(|e| BtrfaasError::network("connect", format!("{}:{}: {}", host, port, e)))?;
        tcp.set_nodelay(true)?;

        match &self.security {
            ClientSecurity::Insecure => Ok(Box::new(tcp)),
            ClientSecurity::Tls {
                connector,
                server_name,
            } => {
                let name = server_name.as_deref().unwrap_or(host).to_string();
                let server_name = ServerName::try_from(name.clone()).map_err(|e| {
                    BtrfaasError::security("server name", format!("{}: {}", name, e))
                })?;
                let tls = connector.connect(server_name, tcp).await.map_err(|e| {
                    BtrfaasError::network("TLS handshake", format!("{}:{}: {}", host, port, e))
                })?;
                Ok(Box::new(tls))
            }
        }
    }
}

/// Sending half of a call
pub struct CallSender {
    writer: FrameWriter<WriteHalf<BoxedStream>>,
}

impl CallSender {
    /// Send one input chunk
    pub async fn send(&mut self, chunk: Bytes) -> Result<()> {
        self.writer.write_frame(&Frame::Data(chunk)).await
    }

    /// Signal end of input
    pub async fn finish(mut self) -> Result<()> {
        self.writer.write_frame(&Frame::End).await
    }
}

/// Receiving half of a call
pub struct CallReceiver {
    reader: FrameReader<ReadHalf<BoxedStream>>,
    finished: bool,
}

impl CallReceiver {
    /// Next output chunk
    ///
    /// `Ok(None)` means the runner reported success after its last chunk. An
    /// error status from the runner surfaces as `BtrfaasError::Remote`.
    pub async fn next(&mut self) -> Result<Option<Bytes>> {
        if self.finished {
            return Ok(None);
        }

        match self.reader.read_frame().await? {
            Some(Frame::Data(chunk)) => Ok(Some(chunk)),
            Some(Frame::Status { code, message }) => {
                self.finished = true;
                if code.is_ok() {
                    Ok(None)
                } else {
                    Err(BtrfaasError::remote(code, message))
                }
            }
            Some(other) => Err(BtrfaasError::protocol(
                "read output",
                format!("unexpected {} frame from runner", other.kind_name()),
            )),
            None => Err(BtrfaasError::protocol(
                "read output",
                "runner closed the stream without a status",
            )),
        }
    }
}
