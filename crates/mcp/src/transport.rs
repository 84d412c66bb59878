//! Message framing.
//!
//! [`McpTransport`] moves whole JSON-RPC lines. [`LineTransport`] frames
//! them as newline-delimited text over any async reader/writer pair (the
//! host's stdio, a child's pipes); [`ChannelTransport`] skips framing and
//! connects two in-process endpoints for tests.

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use crate::error::McpError;

/// A bidirectional stream of JSON-RPC lines.
#[async_trait]
pub trait McpTransport: Send {
    /// Next non-blank line, without its terminator. `None` once the peer
    /// has closed its side.
    async fn receive(&mut self) -> Result<Option<String>, McpError>;

    /// Emit one line. `message` must not itself contain a newline.
    async fn send(&mut self, message: &str) -> Result<(), McpError>;
}

/// Newline-delimited JSON over a reader/writer pair.
///
/// Each message is a single JSON object terminated by `\n`. Reads buffer
/// until a newline arrives; writes emit the message and its newline in one
/// `write_all` so a line is never interleaved with another.
pub struct LineTransport<R, W> {
    reader: R,
    writer: W,
    buf: Vec<u8>,
}

/// Stdio-based transport: reads stdin, writes stdout.
pub type StdioTransport = LineTransport<BufReader<tokio::io::Stdin>, tokio::io::Stdout>;

impl<R, W> LineTransport<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            buf: Vec::new(),
        }
    }
}

impl StdioTransport {
    /// Create a transport over the process's stdin and stdout.
    pub fn stdio() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }
}

#[async_trait]
impl<R, W> McpTransport for LineTransport<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn receive(&mut self) -> Result<Option<String>, McpError> {
        loop {
            self.buf.clear();
            let bytes_read = self.reader.read_until(b'\n', &mut self.buf).await?;
            if bytes_read == 0 {
                return Ok(None); // EOF
            }
            // Invalid UTF-8 becomes replacement chars and then fails JSON
            // parsing upstream, instead of tearing down the transport.
            let line = String::from_utf8_lossy(&self.buf);
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            return Ok(Some(trimmed.to_string()));
        }
    }

    async fn send(&mut self, message: &str) -> Result<(), McpError> {
        let mut framed = Vec::with_capacity(message.len() + 1);
        framed.extend_from_slice(message.as_bytes());
        framed.push(b'\n');
        self.writer.write_all(&framed).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

/// One end of an in-memory link; what one end sends the other receives.
pub struct ChannelTransport {
    inbox: mpsc::Receiver<String>,
    outbox: mpsc::Sender<String>,
}

impl ChannelTransport {
    const CAPACITY: usize = 32;

    pub fn pair() -> (Self, Self) {
        let (to_right, right_inbox) = mpsc::channel(Self::CAPACITY);
        let (to_left, left_inbox) = mpsc::channel(Self::CAPACITY);
        let left = Self { inbox: left_inbox, outbox: to_right };
        let right = Self { inbox: right_inbox, outbox: to_left };
        (left, right)
    }
}

#[async_trait]
impl McpTransport for ChannelTransport {
    async fn receive(&mut self) -> Result<Option<String>, McpError> {
        Ok(self.inbox.recv().await)
    }

    async fn send(&mut self, message: &str) -> Result<(), McpError> {
        self.outbox.send(message.to_owned()).await.map_err(|_| {
            McpError::Transport(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "channel peer dropped",
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt, DuplexStream};

    fn line_pair() -> (LineTransport<BufReader<DuplexStream>, DuplexStream>, DuplexStream, DuplexStream) {
        let (reader_near, reader_far) = duplex(1024);
        let (writer_near, writer_far) = duplex(1024);
        (
            LineTransport::new(BufReader::new(reader_near), writer_near),
            reader_far,
            writer_far,
        )
    }

    #[tokio::test]
    async fn test_channel_transport_pair() {
        let (mut a, mut b) = ChannelTransport::pair();

        a.send("hello from a").await.unwrap();
        let msg = b.receive().await.unwrap();
        assert_eq!(msg, Some("hello from a".to_string()));

        b.send("hello from b").await.unwrap();
        let msg = a.receive().await.unwrap();
        assert_eq!(msg, Some("hello from b".to_string()));
    }

    #[tokio::test]
    async fn test_channel_transport_closed() {
        let (mut a, b) = ChannelTransport::pair();
        drop(b);
        let result = a.receive().await.unwrap();
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn test_line_send_appends_single_newline() {
        let (mut transport, _input, mut output) = line_pair();
        transport.send(r#"{"jsonrpc":"2.0","id":1,"result":{}}"#).await.unwrap();
        drop(transport);

        let mut written = String::new();
        output.read_to_string(&mut written).await.unwrap();
        assert_eq!(written, "{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}\n");
    }

    #[tokio::test]
    async fn test_line_receive_reassembles_chunks() {
        let (mut transport, mut input, _output) = line_pair();
        input.write_all(b"{\"id\":").await.unwrap();
        let pending = tokio::spawn(async move {
            let first = transport.receive().await.unwrap();
            let second = transport.receive().await.unwrap();
            (first, second)
        });
        input.write_all(b"1}\n{\"id\":2}\n").await.unwrap();

        let (first, second) = pending.await.unwrap();
        assert_eq!(first.as_deref(), Some("{\"id\":1}"));
        assert_eq!(second.as_deref(), Some("{\"id\":2}"));
    }

    #[tokio::test]
    async fn test_line_receive_skips_blank_lines_and_handles_eof() {
        let (mut transport, mut input, _output) = line_pair();
        input.write_all(b"\n  \r\n{\"id\":3}\r\n").await.unwrap();
        drop(input);

        assert_eq!(transport.receive().await.unwrap().as_deref(), Some("{\"id\":3}"));
        assert_eq!(transport.receive().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_line_receive_tolerates_invalid_utf8() {
        let (mut transport, mut input, _output) = line_pair();
        input.write_all(b"\xff\xfe\n").await.unwrap();
        drop(input);

        let line = transport.receive().await.unwrap().unwrap();
        assert!(serde_json::from_str::<serde_json::Value>(&line).is_err());
    }
}
