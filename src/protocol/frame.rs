//! Frame codec for the `run` streaming call
//!
//! Every frame is a 4-byte big-endian length followed by a one byte kind and
//! the body. The length counts the kind byte and the body.
//!
//! | Kind | Name   | Body                                              |
//! |------|--------|---------------------------------------------------|
//! | 0x01 | OPEN   | JSON `{"method":"run","metadata":{"options":[..]}}` |
//! | 0x02 | DATA   | opaque chunk bytes                                |
//! | 0x03 | END    | empty, sender half-close                          |
//! | 0x04 | STATUS | status byte followed by a UTF-8 message           |

use std::collections::BTreeMap;

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error};

use crate::config::MAX_FRAME_BYTES_LIMIT;
use crate::error::{BtrfaasError, Result, StatusCode};

/// The only method a runner serves
pub const RUN_METHOD: &str = "run";

/// Metadata key carrying the step options
pub const OPTIONS_METADATA_KEY: &str = "options";

const KIND_OPEN: u8 = 0x01;
const KIND_DATA: u8 = 0x02;
const KIND_END: u8 = 0x03;
const KIND_STATUS: u8 = 0x04;

/// Call metadata sent with OPEN
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallMetadata {
    /// Step options as `key=value` entries
    #[serde(default)]
    pub options: Vec<String>,
}

impl CallMetadata {
    /// Flatten an option map into sorted `key=value` entries
    pub fn from_options(options: &BTreeMap<String, String>) -> Self {
        Self {
            options: options
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect(),
        }
    }

    /// Parse the `key=value` entries back into a map
    ///
    /// The value may itself contain `=`; only the first one separates.
    pub fn options_map(&self) -> Result<BTreeMap<String, String>> {
        let mut map = BTreeMap::new();
        for entry in &self.options {
            let (key, value) = entry.split_once('=').ok_or_else(|| {
                BtrfaasError::InvalidOptions(format!("option {:?} is not key=value", entry))
            })?;
            if key.is_empty() {
                return Err(BtrfaasError::InvalidOptions(format!(
                    "option {:?} has an empty key",
                    entry
                )));
            }
            map.insert(key.to_string(), value.to_string());
        }
        Ok(map)
    }
}

/// First frame of every call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenRequest {
    pub method: String,
    #[serde(default)]
    pub metadata: CallMetadata,
}

impl OpenRequest {
    /// OPEN for the `run` method with the given step options
    pub fn run(options: &BTreeMap<String, String>) -> Self {
        Self {
            method: RUN_METHOD.to_string(),
            metadata: CallMetadata::from_options(options),
        }
    }
}

/// One frame of the `run` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Open(OpenRequest),
    Data(Bytes),
    End,
    Status { code: StatusCode, message: String },
}

impl Frame {
    pub fn status(code: StatusCode, message: impl Into<String>) -> Self {
        Frame::Status {
            code,
            message: message.into(),
        }
    }

    /// Short name used in logs and protocol errors
    pub fn kind_name(&self) -> &'static str {
        match self {
            Frame::Open(_) => "OPEN",
            Frame::Data(_) => "DATA",
            Frame::End => "END",
            Frame::Status { .. } => "STATUS",
        }
    }

    /// Append the encoded frame to `dst`
    pub fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        let (kind, body): (u8, Bytes) = match self {
            Frame::Open(open) => (KIND_OPEN, Bytes::from(serde_json::to_vec(open)?)),
            Frame::Data(chunk) => (KIND_DATA, chunk.clone()),
            Frame::End => (KIND_END, Bytes::new()),
            Frame::Status { code, message } => {
                let mut body = BytesMut::with_capacity(1 + message.len());
                body.put_u8(code.as_u8());
                body.put_slice(message.as_bytes());
                (KIND_STATUS, body.freeze())
            }
        };

        let len = body.len() + 1;
        if len > MAX_FRAME_BYTES_LIMIT {
            return Err(BtrfaasError::protocol(
                "encode frame",
                format!("frame size {} exceeds hard limit {}", len, MAX_FRAME_BYTES_LIMIT),
            ));
        }

        dst.reserve(4 + len);
        dst.put_u32(len as u32);
        dst.put_u8(kind);
        dst.put_slice(&body);
        Ok(())
    }

    /// Decode a frame from its kind byte and body
    pub fn decode(kind: u8, body: Bytes) -> Result<Self> {
        match kind {
            KIND_OPEN => {
                let open: OpenRequest = serde_json::from_slice(&body).map_err(|e| {
                    BtrfaasError::protocol("decode OPEN", format!("invalid JSON: {}", e))
                })?;
                Ok(Frame::Open(open))
            }
            KIND_DATA => Ok(Frame::Data(body)),
            KIND_END => {
                if !body.is_empty() {
                    return Err(BtrfaasError::protocol("decode END", "unexpected body"));
                }
                Ok(Frame::End)
            }
            KIND_STATUS => {
                let (&code, message) = body
                    .split_first()
                    .ok_or_else(|| BtrfaasError::protocol("decode STATUS", "missing code"))?;
                let message = String::from_utf8(message.to_vec()).map_err(|_| {
                    BtrfaasError::protocol("decode STATUS", "message is not UTF-8")
                })?;
                Ok(Frame::Status {
                    code: StatusCode::from_u8(code),
                    message,
                })
            }
            other => Err(BtrfaasError::protocol(
                "decode frame",
                format!("unknown kind 0x{:02x}", other),
            )),
        }
    }
}

/// Reads frames from one half of a connection
pub struct FrameReader<R> {
    reader: R,
    max_frame_bytes: usize,
}

impl<R> FrameReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R, max_frame_bytes: usize) -> Self {
        Self {
            reader,
            max_frame_bytes: max_frame_bytes.min(MAX_FRAME_BYTES_LIMIT),
        }
    }

    /// Give back the underlying reader
    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Read the next frame
    ///
    /// Returns `Ok(None)` when the peer closed the connection cleanly between
    /// frames. A close in the middle of a frame is a protocol error.
    pub async fn read_frame(&mut self) -> Result<Option<Frame>> {
        // Only EOF before the first length byte is a clean close
        let mut size_buf = [0u8; 4];
        match self.reader.read_u8().await {
            Ok(first) => size_buf[0] = first,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                debug!("Peer closed connection");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        }
        self.reader
            .read_exact(&mut size_buf[1..])
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::UnexpectedEof => {
                    BtrfaasError::protocol("read frame", "connection closed mid-length")
                }
                _ => BtrfaasError::Io(e),
            })?;

        let frame_size = u32::from_be_bytes(size_buf) as usize;
        if frame_size == 0 {
            return Err(BtrfaasError::protocol("read frame", "zero-length frame"));
        }
        if frame_size > self.max_frame_bytes {
            error!(
                size = frame_size,
                max = self.max_frame_bytes,
                "Frame too large"
            );
            return Err(BtrfaasError::protocol(
                "read frame",
                format!(
                    "frame size {} exceeds maximum {}",
                    frame_size, self.max_frame_bytes
                ),
            ));
        }

        let mut frame_buf = Vec::new();
        if let Err(e) = frame_buf.try_reserve(frame_size) {
            return Err(BtrfaasError::protocol(
                "read frame",
                format!("failed to allocate {} bytes: {}", frame_size, e),
            ));
        }
        frame_buf.resize(frame_size, 0);
        self.reader
            .read_exact(&mut frame_buf)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::UnexpectedEof => {
                    BtrfaasError::protocol("read frame", "connection closed mid-frame")
                }
                _ => BtrfaasError::Io(e),
            })?;

        let mut body = Bytes::from(frame_buf);
        let kind = body[0];
        let body = body.split_off(1);
        Frame::decode(kind, body).map(Some)
    }
}

/// Writes frames to one half of a connection
pub struct FrameWriter<W> {
    writer: W,
    buf: BytesMut,
}

impl<W> FrameWriter<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            buf: BytesMut::with_capacity(8 * 1024),
        }
    }

    /// Encode, write and flush one frame
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.buf.clear();
        frame.encode(&mut self.buf)?;
        self.writer.write_all(&self.buf).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Shut down the write half
    pub async fn shutdown(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}
