//! Shared I/O helpers for the IMAP and SMTP sessions.
//!
//! Thin wrappers around `AsyncWriteExt` that flush after every write
//! (responses are small and interactive), plus a bounded line reader
//! so a client cannot grow the input buffer past the command ceiling.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

/// Write a string to the stream and flush.
pub async fn write_line<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut BufReader<S>,
    line: &str,
) -> std::io::Result<()> {
    stream.get_mut().write_all(line.as_bytes()).await?;
    stream.get_mut().flush().await
}

/// Write raw bytes to the stream and flush.
pub async fn write_bytes<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut BufReader<S>,
    data: &[u8],
) -> std::io::Result<()> {
    stream.get_mut().write_all(data).await?;
    stream.get_mut().flush().await
}

/// Outcome of reading one line.
pub enum LineRead {
    /// The line, CRLF stripped.
    Line(String),
    /// The line exceeded the limit; it was consumed through its
    /// delimiter so the stream stays in sync.
    TooLong,
    /// Not valid UTF-8; consumed through its delimiter.
    BadEncoding,
    Eof,
}

/// Read one LF-terminated line, bounded by `limit` bytes.
pub async fn read_line_bounded<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut BufReader<S>,
    limit: usize,
) -> std::io::Result<LineRead> {
    let mut buf = Vec::new();
    let mut overflow = false;
    loop {
        let chunk = stream.fill_buf().await?;
        if chunk.is_empty() {
            return Ok(LineRead::Eof);
        }
        if let Some(at) = chunk.iter().position(|&b| b == b'\n') {
            if overflow || buf.len() + at > limit {
                overflow = true;
            } else {
                buf.extend_from_slice(&chunk[..at]);
            }
            stream.consume(at + 1);
            break;
        }
        if overflow || buf.len() + chunk.len() > limit {
            overflow = true;
        } else {
            buf.extend_from_slice(chunk);
        }
        let len = chunk.len();
        stream.consume(len);
    }
    if overflow {
        return Ok(LineRead::TooLong);
    }
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
    match String::from_utf8(buf) {
        Ok(line) => Ok(LineRead::Line(line)),
        Err(_) => Ok(LineRead::BadEncoding),
    }
}
