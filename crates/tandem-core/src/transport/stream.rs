//! Stream transport: envelopes over any byte pair, with optional
//! header framing.
//!
//! Two disciplines share one implementation:
//!
//! - **Framed** (`header = true`): each envelope is preceded by an
//!   HTTP-like header block of CRLF-delimited lines terminated by an
//!   empty line. `Content-Length` is required and gives the exact body
//!   size; `Content-Type` is validated when present; unknown headers are
//!   ignored.
//! - **Raw** (`header = false`): a streaming JSON decoder consumes one
//!   value per read directly from the byte stream.
//!
//! # Wire Format (framed)
//!
//! ```text
//! Content-Type: application/json;charset=utf-8\r\n
//! Content-Length: 42\r\n
//! \r\n
//! {"jsonrpc":"2.0","id":1,"method":"sum"}
//! ```
//!
//! # Read Deadlines
//!
//! An optional per-read deadline turns an idle wait into the
//! [`Error::Deadline`] sentinel, which the serve loop absorbs and
//! retries. This keeps a connection responsive to cancellation even when
//! the peer is silent.
//!
//! # Example
//!
//! ```no_run
//! use tandem_core::transport::StreamTransport;
//! use std::time::Duration;
//!
//! # async fn connect() -> tandem_core::Result<()> {
//! let stream = tokio::net::TcpStream::connect("127.0.0.1:8989").await?;
//! let transport = StreamTransport::from_tcp(true, stream, Some(Duration::from_secs(1)));
//! # let _ = transport; Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::protocol::envelope::Envelope;
use crate::protocol::error::{Error, Result};
use crate::transport::{
    validate_content_type, Transport, CHARSET, CONTENT_LENGTH, CONTENT_TYPE, MIME_TYPES,
};

/// Incremental reader over a byte stream.
///
/// Bytes pulled from the underlying reader land in `buf` before they are
/// consumed, so a read future dropped mid-await (deadline expiry,
/// cancellation) never loses data: the next call picks up where the last
/// one left off.
pub(crate) struct ByteReader<R> {
    inner: R,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> ByteReader<R> {
    pub(crate) fn new(inner: R) -> Self {
        ByteReader {
            inner,
            buf: Vec::new(),
        }
    }

    async fn fill(&mut self) -> Result<()> {
        let mut chunk = [0u8; 8192];
        let n = self.inner.read(&mut chunk).await?;
        if n == 0 {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed",
            )));
        }
        self.buf.extend_from_slice(&chunk[..n]);
        Ok(())
    }

    /// Consumes one `\n`-terminated line, including the terminator.
    async fn read_line(&mut self) -> Result<String> {
        loop {
            if let Some(end) = self.buf.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = self.buf.drain(..=end).collect();
                return String::from_utf8(line)
                    .map_err(|_| Error::InvalidHeader("non-utf8 header line".to_string()));
            }
            self.fill().await?;
        }
    }

    /// Consumes exactly `n` bytes.
    async fn read_exact(&mut self, n: usize) -> Result<Vec<u8>> {
        while self.buf.len() < n {
            self.fill().await?;
        }
        Ok(self.buf.drain(..n).collect())
    }

    /// Decodes the next JSON value from the stream.
    async fn next_json(&mut self) -> Result<Envelope> {
        loop {
            if !self.buf.is_empty() {
                let outcome = {
                    let mut values =
                        serde_json::Deserializer::from_slice(&self.buf).into_iter::<Envelope>();
                    match values.next() {
                        Some(Ok(envelope)) => Some(Ok((envelope, values.byte_offset()))),
                        Some(Err(err)) if err.is_eof() => None,
                        Some(Err(err)) => Some(Err(err)),
                        None => None,
                    }
                };
                match outcome {
                    Some(Ok((envelope, consumed))) => {
                        self.buf.drain(..consumed);
                        return Ok(envelope);
                    }
                    Some(Err(err)) => {
                        // Drop the poisoned bytes so the next read does not
                        // chew on the same garbage forever.
                        self.buf.clear();
                        return Err(err.into());
                    }
                    None => {}
                }
            }
            self.fill().await?;
        }
    }
}

/// Renders the header block prefixed to a framed body of `body_len`
/// bytes.
pub(crate) fn frame_head(body_len: usize) -> String {
    format!(
        "{}: {};charset={}\r\n{}: {}\r\n\r\n",
        CONTENT_TYPE, MIME_TYPES[0], CHARSET, CONTENT_LENGTH, body_len
    )
}

/// Reads one header-framed envelope: header block, then exactly
/// `Content-Length` body bytes.
///
/// `Content-Length: 0` yields an empty envelope without error; the
/// dispatch core rejects it as an invalid request further up.
pub(crate) async fn read_framed<R>(reader: &mut ByteReader<R>) -> Result<Envelope>
where
    R: AsyncRead + Unpin,
{
    let mut length: Option<usize> = None;

    loop {
        let line = reader.read_line().await?;
        let line = line.trim();
        if line.is_empty() {
            break;
        }

        let Some((name, value)) = line.split_once(':') else {
            return Err(Error::InvalidHeader(line.to_string()));
        };
        let (name, value) = (name.trim(), value.trim());
        if name.is_empty() {
            return Err(Error::InvalidHeader(line.to_string()));
        }

        if name.eq_ignore_ascii_case(CONTENT_LENGTH) {
            length = Some(
                value
                    .parse::<usize>()
                    .map_err(|_| Error::InvalidHeader(format!("{}: {}", CONTENT_LENGTH, value)))?,
            );
        } else if name.eq_ignore_ascii_case(CONTENT_TYPE) {
            validate_content_type(value)?;
        }
        // Unknown headers are ignored.
    }

    match length {
        None => Err(Error::MissingContentLength),
        Some(0) => Ok(Envelope::default()),
        Some(n) => {
            let body = reader.read_exact(n).await?;
            Ok(serde_json::from_slice(&body)?)
        }
    }
}

/// Envelope transport over any `AsyncRead`/`AsyncWrite` pair.
///
/// Reads and writes each take their own mutex: the serve loop is the
/// expected single reader, while writes may come from any dispatch task
/// concurrently.
pub struct StreamTransport<R, W> {
    header: bool,
    read_timeout: Option<Duration>,
    reader: Mutex<ByteReader<R>>,
    writer: Mutex<W>,
    closed: AtomicBool,
}

impl<R, W> StreamTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Creates a transport over a reader/writer pair.
    ///
    /// `header` selects the framed discipline; without it the stream is
    /// a plain sequence of JSON values.
    pub fn new(header: bool, reader: R, writer: W) -> Self {
        StreamTransport {
            header,
            read_timeout: None,
            reader: Mutex::new(ByteReader::new(reader)),
            writer: Mutex::new(writer),
            closed: AtomicBool::new(false),
        }
    }

    /// Sets a per-read deadline; expiry surfaces as
    /// [`Error::Deadline`].
    pub fn with_read_timeout(mut self, limit: Duration) -> Self {
        self.read_timeout = Some(limit);
        self
    }
}

impl StreamTransport<OwnedReadHalf, OwnedWriteHalf> {
    /// Wraps a TCP stream, optionally with a read deadline.
    ///
    /// The deadline is what keeps `Connection::serve` responsive on an
    /// idle socket; without one, cancellation only takes effect once the
    /// peer sends data or the select loop interrupts the read.
    pub fn from_tcp(header: bool, stream: TcpStream, read_timeout: Option<Duration>) -> Self {
        let (read, write) = stream.into_split();
        let mut transport = StreamTransport::new(header, read, write);
        transport.read_timeout = read_timeout;
        transport
    }
}

#[async_trait::async_trait]
impl<R, W> Transport for StreamTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn read(&self) -> Result<Envelope> {
        let mut reader = self.reader.lock().await;
        let reader = &mut *reader;

        let parse = async {
            if self.header {
                read_framed(reader).await
            } else {
                reader.next_json().await
            }
        };

        match self.read_timeout {
            Some(limit) => match tokio::time::timeout(limit, parse).await {
                Ok(outcome) => outcome,
                Err(_) => Err(Error::Deadline),
            },
            None => parse.await,
        }
    }

    async fn write(&self, envelope: &Envelope) -> Result<()> {
        let body = serde_json::to_vec(envelope)?;

        let mut writer = self.writer.lock().await;
        if self.header {
            writer.write_all(frame_head(body.len()).as_bytes()).await?;
        }
        writer.write_all(&body).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut writer = self.writer.lock().await;
        writer.shutdown().await?;
        Ok(())
    }
}
