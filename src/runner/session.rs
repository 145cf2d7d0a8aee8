//! One `run` session on the runner side
//!
//! A session reads OPEN, then answers every DATA frame with exactly one DATA
//! frame, in order. END is answered with `STATUS OK` after the last output
//! chunk. Any failure ends the session with the matching error status; a
//! caller that disconnects without END gets nothing back.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::transform::{SessionContext, Transform};
use crate::config::{DEFAULT_IDLE_TIMEOUT_MS, DEFAULT_MAX_FRAME_BYTES};
use crate::error::{BtrfaasError, Result, StatusCode};
use crate::metrics;
use crate::protocol::{Frame, FrameReader, FrameWriter, RUN_METHOD};

const LINGER: Duration = Duration::from_secs(1);

/// Bounds applied to every session
#[derive(Debug, Clone)]
pub struct SessionLimits {
    /// Longest wait for the next frame
    pub idle_timeout: Duration,
    /// Deadline for the whole session, if any
    pub call_timeout: Option<Duration>,
    /// Cap on the total input bytes, if any
    pub max_input_bytes: Option<u64>,
    pub max_frame_bytes: usize,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_millis(DEFAULT_IDLE_TIMEOUT_MS),
            call_timeout: None,
            max_input_bytes: None,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

/// How a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// END received, every chunk answered, `STATUS OK` sent
    Completed { chunks: u64, bytes_in: u64 },
    /// Session ended with an error status
    Failed { status: StatusCode, message: String },
    /// Caller went away without END, nothing sent back
    Abandoned { chunks: u64 },
}

enum Drive {
    Completed { chunks: u64, bytes_in: u64 },
    Abandoned { chunks: u64 },
}

/// Serve one session over an established (plain or TLS) stream
#[instrument(skip(stream, transform, limits, abort), fields(function = %transform.name()))]
pub async fn serve_session<S>(
    stream: S,
    peer: SocketAddr,
    session_id: u64,
    transform: Arc<dyn Transform>,
    limits: &SessionLimits,
    abort: CancellationToken,
) -> SessionOutcome
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let mut reader = FrameReader::new(read_half, limits.max_frame_bytes);
    let mut writer = FrameWriter::new(write_half);

    let deadline = limits.call_timeout.map(|t| Instant::now() + t);
    let result = tokio::select! {
        result = drive(&mut reader, &mut writer, peer, session_id, transform.as_ref(), limits, deadline) => result,
        _ = abort.cancelled() => Err(BtrfaasError::Unavailable("runner is shutting down".to_string())),
    };

    let outcome = match result {
        Ok(Drive::Completed { chunks, bytes_in }) => {
            match writer.write_frame(&Frame::status(StatusCode::Ok, "")).await {
                Ok(()) => {
                    debug!(session = session_id, chunks, bytes_in, "Session completed");
                    SessionOutcome::Completed { chunks, bytes_in }
                }
                Err(e) => {
                    warn!(session = session_id, error = %e, "Failed to send final status");
                    SessionOutcome::Abandoned { chunks }
                }
            }
        }
        Ok(Drive::Abandoned { chunks }) => {
            info!(
                session = session_id,
                peer = %peer,
                chunks,
                "Caller closed the stream without END, session cancelled"
            );
            SessionOutcome::Abandoned { chunks }
        }
        Err(e) => {
            let status = e.status_code();
            let message = e.to_string();
            warn!(session = session_id, peer = %peer, status = %status, error = %message, "Session failed");
            // Best effort, the caller may already be gone
            if let Err(write_err) = writer.write_frame(&Frame::status(status, message.clone())).await {
                debug!(session = session_id, error = %write_err, "Could not deliver error status");
            }
            let _ = writer.shutdown().await;
            linger(reader.into_inner()).await;
            SessionOutcome::Failed { status, message }
        }
    };

    let _ = writer.shutdown().await;
    metrics::record_session(match &outcome {
        SessionOutcome::Completed { .. } => "ok",
        SessionOutcome::Failed { .. } => "error",
        SessionOutcome::Abandoned { .. } => "cancelled",
    });
    outcome
}

async fn drive<R, W>(
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
    peer: SocketAddr,
    session_id: u64,
    transform: &dyn Transform,
    limits: &SessionLimits,
    deadline: Option<Instant>,
) -> Result<Drive>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let open = match next_frame(reader, limits.idle_timeout, deadline).await? {
        Some(Frame::Open(open)) => open,
        Some(other) => {
            return Err(BtrfaasError::protocol(
                "session start",
                format!("expected OPEN, got {}", other.kind_name()),
            ))
        }
        None => return Ok(Drive::Abandoned { chunks: 0 }),
    };

    if open.method != RUN_METHOD {
        return Err(BtrfaasError::Unimplemented(format!(
            "unknown method {:?}",
            open.method
        )));
    }

    let options = open.metadata.options_map()?;
    transform.validate_options(&options)?;
    let ctx = SessionContext {
        session_id,
        peer,
        options,
    };
    debug!(
        session = session_id,
        options = ctx.options.len(),
        "Session opened"
    );

    let mut chunks = 0u64;
    let mut bytes_in = 0u64;
    loop {
        match next_frame(reader, limits.idle_timeout, deadline).await? {
            Some(Frame::Data(chunk)) => {
                bytes_in += chunk.len() as u64;
                if let Some(limit) = limits.max_input_bytes {
                    if bytes_in > limit {
                        return Err(BtrfaasError::InputLimitExceeded {
                            received: bytes_in,
                            limit,
                        });
                    }
                }

                let output = within_deadline(deadline, transform.transform(chunk, &ctx)).await??;
                writer.write_frame(&Frame::Data(output)).await?;
                chunks += 1;
                metrics::record_session_chunk(transform.name());
            }
            Some(Frame::End) => return Ok(Drive::Completed { chunks, bytes_in }),
            Some(Frame::Open(_)) => {
                return Err(BtrfaasError::protocol("session", "second OPEN on one call"))
            }
            Some(Frame::Status { .. }) => {
                return Err(BtrfaasError::protocol("session", "STATUS sent by caller"))
            }
            None => return Ok(Drive::Abandoned { chunks }),
        }
    }
}

/// Discard unread input for a short while after an error status
///
/// Closing a socket with unread input makes the kernel reset the
/// connection, which can destroy the status before the caller reads it.
pub(crate) async fn linger<R>(mut reader: R)
where
    R: AsyncRead + Unpin,
{
    let _ = tokio::time::timeout(LINGER, tokio::io::copy(&mut reader, &mut tokio::io::sink())).await;
}

/// Read one frame, bounded by the idle timeout and the session deadline
async fn next_frame<R>(
    reader: &mut FrameReader<R>,
    idle_timeout: Duration,
    deadline: Option<Instant>,
) -> Result<Option<Frame>>
where
    R: AsyncRead + Unpin,
{
    let idle_deadline = Instant::now() + idle_timeout;
    let (wait_until, what) = match deadline {
        Some(d) if d < idle_deadline => (d, "session deadline exceeded"),
        _ => (idle_deadline, "no input within idle timeout"),
    };

    tokio::time::timeout_at(wait_until, reader.read_frame())
        .await
        .map_err(|_| BtrfaasError::Timeout(what.to_string()))?
}

async fn within_deadline<F, T>(deadline: Option<Instant>, fut: F) -> Result<T>
where
    F: std::future::Future<Output = T>,
{
    match deadline {
        Some(d) => tokio::time::timeout_at(d, fut)
            .await
            .map_err(|_| BtrfaasError::Timeout("session deadline exceeded".to_string())),
        None => Ok(fut.await),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::transform::{Echo, Uppercase};
    use bytes::Bytes;
    use std::collections::BTreeMap;
    use tokio::io::DuplexStream;

    fn peer() -> SocketAddr {
        "127.0.0.1:9".parse().unwrap()
    }

    fn limits() -> SessionLimits {
        SessionLimits {
            idle_timeout: Duration::from_secs(2),
            call_timeout: Some(Duration::from_secs(5)),
            max_input_bytes: Some(1024),
            max_frame_bytes: 4096,
        }
    }

    fn start(
        transform: Arc<dyn Transform>,
        limits: SessionLimits,
    ) -> (
        DuplexStream,
        tokio::task::JoinHandle<SessionOutcome>,
    ) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let handle = tokio::spawn(async move {
            serve_session(server, peer(), 1, transform, &limits, CancellationToken::new()).await
        });
        (client, handle)
    }

    async fn send(client: &mut DuplexStream, frames: &[Frame]) {
        let mut writer = FrameWriter::new(client);
        for frame in frames {
            writer.write_frame(frame).await.unwrap();
        }
    }

    async fn read_all(client: DuplexStream) -> Vec<Frame> {
        let mut reader = FrameReader::new(client, 4096);
        let mut frames = Vec::new();
        while let Some(frame) = reader.read_frame().await.unwrap() {
            frames.push(frame);
        }
        frames
    }

    fn open() -> Frame {
        Frame::Open(crate::protocol::OpenRequest::run(&BTreeMap::new()))
    }

    fn data(s: &'static [u8]) -> Frame {
        Frame::Data(Bytes::from_static(s))
    }

    #[tokio::test]
    async fn test_one_output_per_input_then_ok() {
        let (mut client, handle) = start(Arc::new(Echo), limits());
        send(&mut client, &[open(), data(b"foo"), data(b"bar"), Frame::End]).await;
        let frames = read_all(client).await;
        assert_eq!(
            frames,
            vec![data(b"foo"), data(b"bar"), Frame::status(StatusCode::Ok, "")]
        );
        assert_eq!(
            handle.await.unwrap(),
            SessionOutcome::Completed {
                chunks: 2,
                bytes_in: 6
            }
        );
    }

    #[tokio::test]
    async fn test_empty_input_gets_ok() {
        let (mut client, handle) = start(Arc::new(Uppercase), limits());
        send(&mut client, &[open(), Frame::End]).await;
        assert_eq!(
            read_all(client).await,
            vec![Frame::status(StatusCode::Ok, "")]
        );
        assert!(matches!(
            handle.await.unwrap(),
            SessionOutcome::Completed { chunks: 0, .. }
        ));
    }

    #[tokio::test]
    async fn test_data_before_open_is_invalid_argument() {
        let (mut client, handle) = start(Arc::new(Echo), limits());
        send(&mut client, &[data(b"x")]).await;
        let frames = read_all(client).await;
        assert!(matches!(
            frames.as_slice(),
            [Frame::Status { code: StatusCode::InvalidArgument, .. }]
        ));
        assert!(matches!(
            handle.await.unwrap(),
            SessionOutcome::Failed { status: StatusCode::InvalidArgument, .. }
        ));
    }

    #[tokio::test]
    async fn test_unknown_method_is_unimplemented() {
        let (mut client, _handle) = start(Arc::new(Echo), limits());
        let open = Frame::Open(crate::protocol::OpenRequest {
            method: "walk".to_string(),
            metadata: Default::default(),
        });
        send(&mut client, &[open]).await;
        let frames = read_all(client).await;
        assert!(matches!(
            frames.as_slice(),
            [Frame::Status { code: StatusCode::Unimplemented, .. }]
        ));
    }

    #[tokio::test]
    async fn test_input_limit_is_resource_exhausted() {
        let mut small = limits();
        small.max_input_bytes = Some(4);
        let (mut client, _handle) = start(Arc::new(Echo), small);
        send(&mut client, &[open(), data(b"abc"), data(b"def")]).await;
        let frames = read_all(client).await;
        assert_eq!(frames[0], data(b"abc"));
        assert!(matches!(
            frames[1],
            Frame::Status { code: StatusCode::ResourceExhausted, .. }
        ));
    }

    #[tokio::test]
    async fn test_idle_timeout_is_deadline_exceeded() {
        let mut quick = limits();
        quick.idle_timeout = Duration::from_millis(50);
        let (mut client, handle) = start(Arc::new(Echo), quick);
        send(&mut client, &[open(), data(b"a")]).await;
        let frames = read_all(client).await;
        assert_eq!(frames[0], data(b"a"));
        assert!(matches!(
            frames[1],
            Frame::Status { code: StatusCode::DeadlineExceeded, .. }
        ));
        assert!(matches!(
            handle.await.unwrap(),
            SessionOutcome::Failed { status: StatusCode::DeadlineExceeded, .. }
        ));
    }

    #[tokio::test]
    async fn test_eof_without_end_is_abandoned() {
        let (mut client, handle) = start(Arc::new(Echo), limits());
        send(&mut client, &[open(), data(b"a")]).await;
        // Read the echoed chunk, then hang up
        {
            let mut reader = FrameReader::new(&mut client, 4096);
            assert_eq!(reader.read_frame().await.unwrap(), Some(data(b"a")));
        }
        drop(client);
        assert_eq!(
            handle.await.unwrap(),
            SessionOutcome::Abandoned { chunks: 1 }
        );
    }

    #[tokio::test]
    async fn test_bad_options_rejected() {
        let (mut client, _handle) = start(Arc::new(Uppercase), limits());
        let mut options = BTreeMap::new();
        options.insert("color".to_string(), "red".to_string());
        send(
            &mut client,
            &[Frame::Open(crate::protocol::OpenRequest::run(&options))],
        )
        .await;
        let frames = read_all(client).await;
        assert!(matches!(
            frames.as_slice(),
            [Frame::Status { code: StatusCode::InvalidArgument, .. }]
        ));
    }

    #[tokio::test]
    async fn test_abort_token_ends_session_unavailable() {
        let (client, server) = tokio::io::duplex(4096);
        let abort = CancellationToken::new();
        let token = abort.clone();
        let handle = tokio::spawn(async move {
            serve_session(server, peer(), 7, Arc::new(Echo), &limits(), token).await
        });
        abort.cancel();
        let frames = read_all(client).await;
        assert!(matches!(
            frames.as_slice(),
            [Frame::Status { code: StatusCode::Unavailable, .. }]
        ));
        assert!(matches!(
            handle.await.unwrap(),
            SessionOutcome::Failed { status: StatusCode::Unavailable, .. }
        ));
    }
}
