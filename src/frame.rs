// ABOUTME: Reads and writes one RESP value at a time over a buffered stream
// ABOUTME: Tracks the verbatim bytes of the message currently being parsed so requests can be forwarded unchanged

use std::future::Future;
use std::pin::Pin;
use std::str;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufStream};
use tokio::time::timeout;

use crate::error::FramerError;
use crate::resp::{Reply, parse_error_line};

/// A line longer than this is a protocol error rather than an ever-growing read.
const MAX_LINE_LEN: usize = 64 * 1024;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Reads and writes RESP values over `S`, accumulating the raw bytes of the
/// message currently being parsed.
///
/// The accumulator is the central design decision here: it lets the router
/// forward a backend's reply to the client byte-for-byte, without
/// re-serializing a typed [`Reply`] and risking a lossy round-trip.
pub struct Framer<S> {
    stream: BufStream<S>,
    accumulator: BytesMut,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl<S> Framer<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S, read_timeout: Duration, write_timeout: Duration) -> Self {
        Self {
            stream: BufStream::new(stream),
            accumulator: BytesMut::with_capacity(4 * 1024),
            read_timeout,
            write_timeout,
        }
    }

    /// The verbatim bytes of the most recently parsed message.
    pub fn response_bytes(&self) -> &[u8] {
        &self.accumulator
    }

    /// Empties the accumulator. Does not touch the stream.
    pub fn clear(&mut self) {
        self.accumulator.clear();
    }

    /// Closes the underlying stream. Safe to call once.
    pub async fn close(&mut self) {
        let _ = self.stream.shutdown().await;
    }

    /// Writes `buf` verbatim and flushes.
    pub async fn write_bytes(&mut self, buf: &[u8]) -> Result<(), FramerError> {
        timeout(self.write_timeout, async {
            self.stream.write_all(buf).await?;
            self.stream.flush().await
        })
        .await
        .map_err(|_| FramerError::Io(timed_out("write timed out")))??;
        Ok(())
    }

    /// Splits `text` on runs of spaces into tokens and writes a RESP array of
    /// bulk strings, e.g. `write_cmd("CLUSTER INFO")`.
    #[tracing::instrument(skip(self))]
    pub async fn write_cmd(&mut self, text: &str) -> Result<(), FramerError> {
        let tokens: Vec<&str> = text.split_whitespace().collect();
        let mut buf = BytesMut::new();
        buf.put_slice(format!("*{}\r\n", tokens.len()).as_bytes());
        for token in tokens {
            buf.put_slice(format!("${}\r\n", token.len()).as_bytes());
            buf.put_slice(token.as_bytes());
            buf.put_slice(b"\r\n");
        }
        self.write_bytes(&buf).await
    }

    /// Blocks until one complete RESP message is parsed, appending every
    /// consumed byte (CRLFs and length headers included) to the accumulator.
    pub fn read_reply<'a>(&'a mut self) -> BoxFuture<'a, Result<Reply, FramerError>> {
        Box::pin(async move {
            let line = self.read_line().await?;
            if line.is_empty() {
                return Err(FramerError::protocol("empty line"));
            }

            let type_byte = line[0];
            let payload = &line[1..];

            match type_byte {
                b'+' => {
                    let text = decode_utf8(payload)?;
                    Ok(Reply::status(Bytes::copy_from_slice(text.as_bytes())))
                }
                b'-' => {
                    let text = decode_utf8(payload)?;
                    Ok(Reply::Error(parse_error_line(text)))
                }
                b':' => Ok(Reply::Integer(parse_integer(payload)?)),
                b'$' => self.read_bulk(payload).await,
                b'*' => self.read_array(payload).await,
                other => Err(FramerError::protocol(format!(
                    "unexpected type byte: {other:#04x}"
                ))),
            }
        })
    }

    /// Reads one CRLF-terminated line (excluding the CRLF), appending the
    /// full line (CRLF included) to the accumulator.
    async fn read_line(&mut self) -> Result<Bytes, FramerError> {
        let mut buf = Vec::new();
        let read = timeout(
            self.read_timeout,
            self.stream.read_until(b'\n', &mut buf),
        )
        .await
        .map_err(|_| FramerError::Io(timed_out("read timed out")))??;

        if read == 0 {
            return Err(FramerError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed by peer",
            )));
        }

        if buf.len() > MAX_LINE_LEN {
            return Err(FramerError::protocol("line longer than read buffer"));
        }

        if !buf.ends_with(b"\r\n") {
            return Err(FramerError::protocol("line not terminated by CRLF"));
        }

        self.accumulator.extend_from_slice(&buf);
        let line_len = buf.len() - 2;
        Ok(Bytes::from(buf).slice(..line_len))
    }

    async fn read_bulk(&mut self, len_payload: &[u8]) -> Result<Reply, FramerError> {
        let len = parse_integer(len_payload)?;
        if len < 0 {
            return Ok(Reply::Bulk(None));
        }

        let len = len as usize;
        let mut data = vec![0u8; len + 2];
        timeout(self.read_timeout, self.stream.read_exact(&mut data))
            .await
            .map_err(|_| FramerError::Io(timed_out("read timed out")))?
            .map_err(FramerError::Io)?;

        if &data[len..] != b"\r\n" {
            return Err(FramerError::protocol("bulk payload missing trailing CRLF"));
        }

        self.accumulator.extend_from_slice(&data);
        Ok(Reply::Bulk(Some(Bytes::copy_from_slice(&data[..len]))))
    }

    async fn read_array(&mut self, len_payload: &[u8]) -> Result<Reply, FramerError> {
        let len = parse_integer(len_payload)?;
        if len < 0 {
            return Ok(Reply::Array(None));
        }

        let mut items = Vec::with_capacity(len as usize);
        for _ in 0..len {
            items.push(self.read_reply().await?);
        }
        Ok(Reply::Array(Some(items)))
    }
}

fn timed_out(msg: &str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::TimedOut, msg.to_string())
}

fn decode_utf8(bytes: &[u8]) -> Result<&str, FramerError> {
    str::from_utf8(bytes).map_err(|_| FramerError::protocol("non-utf8 line"))
}

/// Rejects empty input and non-digit bytes, with one optional leading minus.
fn parse_integer(bytes: &[u8]) -> Result<i64, FramerError> {
    if bytes.is_empty() {
        return Err(FramerError::protocol("empty integer"));
    }

    let (negative, digits) = match bytes[0] {
        b'-' => (true, &bytes[1..]),
        _ => (false, bytes),
    };

    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return Err(FramerError::protocol("malformed integer"));
    }

    let text = str::from_utf8(digits).map_err(|_| FramerError::protocol("non-utf8 integer"))?;
    let value: i64 = text
        .parse()
        .map_err(|_| FramerError::protocol("integer out of range"))?;

    Ok(if negative { -value } else { value })
}
