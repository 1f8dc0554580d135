//! Persistent-socket transport for the script-hash index server.
//!
//! Requests and responses are newline-delimited JSON-RPC envelopes on a
//! long-lived TCP connection. A response is accumulated from the buffered
//! stream until its terminating newline, with a hard ceiling on frame size.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use crate::error::TransportError;
use crate::rpc::protocol::{JsonRpcRequest, JsonRpcResponse};

use super::{check_ping_response, ConnectionFactory, RpcConnection, PING_ID};

/// Method used as the health probe on idle index connections.
const PROBE_METHOD: &str = "server.ping";

#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// `host:port` of the index server.
    pub addr: String,
    pub connect_timeout: Duration,
    /// Largest response frame accepted before the connection is abandoned.
    pub max_response_bytes: usize,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:50001".to_owned(),
            connect_timeout: Duration::from_secs(5),
            max_response_bytes: 16 * 1024 * 1024,
        }
    }
}

// ==============================================================================
// Factory
// ==============================================================================

pub struct SocketTransport {
    config: SocketConfig,
}

impl SocketTransport {
    pub fn new(config: SocketConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ConnectionFactory for SocketTransport {
    type Connection = SocketConnection;

    async fn connect(&self) -> Result<SocketConnection, TransportError> {
        let addr = &self.config.addr;
        let stream = tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| TransportError::Timeout(self.config.connect_timeout))?
            .map_err(|e| TransportError::Connect(format!("{addr}: {e}")))?;
        stream.set_nodelay(true)?;
        debug!(index.addr = %addr, "index socket connected");

        let (read, write) = stream.into_split();
        Ok(SocketConnection {
            reader: BufReader::new(read),
            writer: write,
            max_response_bytes: self.config.max_response_bytes,
        })
    }

    async fn check(&self, conn: &mut SocketConnection) -> Result<(), TransportError> {
        let request = JsonRpcRequest::new(PING_ID, PROBE_METHOD, &[]);
        let response = conn.exchange(&request).await?;
        check_ping_response(&response)
    }
}

// ==============================================================================
// Connection
// ==============================================================================

pub struct SocketConnection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    max_response_bytes: usize,
}

#[async_trait]
impl RpcConnection for SocketConnection {
    async fn exchange(
        &mut self,
        request: &JsonRpcRequest<'_>,
    ) -> Result<JsonRpcResponse, TransportError> {
        let mut payload = serde_json::to_vec(request)
            .map_err(|e| TransportError::Protocol(format!("encode request: {e}")))?;
        payload.push(b'\n');
        self.writer.write_all(&payload).await?;
        self.writer.flush().await?;

        let frame = read_frame(&mut self.reader, self.max_response_bytes).await?;
        debug!(rpc.id = request.id, rpc.method = request.method, frame_len = frame.len(), "socket rpc response");
        trace!(rpc.id = request.id, body = %String::from_utf8_lossy(&frame), "socket rpc response body");

        serde_json::from_slice(&frame)
            .map_err(|e| TransportError::Protocol(format!("decode JSON-RPC frame: {e}")))
    }
}

// ==============================================================================
// Framing
// ==============================================================================

/// Read one newline-terminated frame, excluding the newline. Blank lines are
/// skipped. Fails once the frame grows past `limit` bytes.
pub(crate) async fn read_frame<R>(reader: &mut R, limit: usize) -> Result<Vec<u8>, TransportError>
where
    R: AsyncBufRead + Unpin,
{
    let mut frame = Vec::new();
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Err(TransportError::Protocol(
                "connection closed before a complete response".to_owned(),
            ));
        }

        let newline = available.iter().position(|b| *b == b'\n');
        let chunk = match newline {
            Some(pos) => &available[..pos],
            None => available,
        };
        if frame.len() + chunk.len() > limit {
            return Err(TransportError::ResponseTooLarge { limit });
        }
        frame.extend_from_slice(chunk);
        let consumed = chunk.len() + usize::from(newline.is_some());
        reader.consume(consumed);

        if newline.is_some() {
            if frame.iter().all(u8::is_ascii_whitespace) {
                frame.clear();
                continue;
            }
            return Ok(frame);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_frame_stops_at_newline() {
        let mut reader = BufReader::new(&b"{\"id\":1}\n{\"id\":2}\n"[..]);
        let first = read_frame(&mut reader, 1024).await.expect("first frame");
        let second = read_frame(&mut reader, 1024).await.expect("second frame");
        assert_eq!(first, b"{\"id\":1}");
        assert_eq!(second, b"{\"id\":2}");
    }

    #[tokio::test]
    async fn read_frame_assembles_across_small_reads() {
        let payload = b"{\"id\":7,\"result\":\"abcdefghijklmnop\"}\n";
        let mut reader = BufReader::with_capacity(4, &payload[..]);
        let frame = read_frame(&mut reader, 1024).await.expect("frame");
        assert_eq!(frame, &payload[..payload.len() - 1]);
    }

    #[tokio::test]
    async fn read_frame_skips_blank_lines() {
        let mut reader = BufReader::new(&b"\r\n\n{\"id\":3}\n"[..]);
        let frame = read_frame(&mut reader, 1024).await.expect("frame");
        assert_eq!(frame, b"{\"id\":3}");
    }

    #[tokio::test]
    async fn read_frame_enforces_size_limit() {
        let payload = vec![b'x'; 64];
        let mut reader = BufReader::with_capacity(8, &payload[..]);
        let err = read_frame(&mut reader, 16).await.expect_err("must reject");
        assert!(matches!(err, TransportError::ResponseTooLarge { limit: 16 }));
    }

    #[tokio::test]
    async fn read_frame_reports_early_eof() {
        let mut reader = BufReader::new(&b"{\"id\":1"[..]);
        let err = read_frame(&mut reader, 1024).await.expect_err("must fail");
        assert!(matches!(err, TransportError::Protocol(_)));
    }
}
