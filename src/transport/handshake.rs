//! Path handshake performed before any frame is exchanged.
//!
//! ```text
//! Client:  /messaging\r\n
//! Server:  OK\r\n                    (path accepted, frames follow)
//!          ERROR unknown path\r\n    (connection closed)
//! ```

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Result, TransportError};

const OK_REPLY: &[u8] = b"OK";

/// Longest handshake line accepted, excluding CRLF.
pub const MAX_LINE_LENGTH: usize = 1024;

/// Line parse result.
#[derive(Debug, PartialEq, Eq)]
pub enum ParseResult {
    /// A full line; `consumed` includes the CRLF.
    Complete { line_end: usize, consumed: usize },
    /// Need more data.
    Incomplete,
}

/// Find the first CRLF-terminated line in `input`.
pub fn parse_line(input: &[u8]) -> ParseResult {
    match find_crlf(input) {
        Some(line_end) => ParseResult::Complete {
            line_end,
            consumed: line_end + 2,
        },
        None => ParseResult::Incomplete,
    }
}

/// Format an error reply.
pub fn response_error(msg: &str) -> Vec<u8> {
    format!("ERROR {msg}\r\n").into_bytes()
}

/// Find \r\n in buffer, returning the position of \r.
fn find_crlf(buffer: &[u8]) -> Option<usize> {
    (0..buffer.len().saturating_sub(1)).find(|&i| buffer[i] == b'\r' && buffer[i + 1] == b'\n')
}

/// Read one line into a `String`, leaving any following bytes in `buffer`.
async fn read_line<S: AsyncRead + Unpin>(stream: &mut S, buffer: &mut BytesMut) -> Result<String> {
    loop {
        if let ParseResult::Complete { line_end, consumed } = parse_line(buffer) {
            let line = String::from_utf8_lossy(&buffer[..line_end]).into_owned();
            buffer.advance(consumed);
            return Ok(line);
        }

        if buffer.len() > MAX_LINE_LENGTH {
            return Err(TransportError::Handshake("handshake line too long".into()));
        }

        let n = stream.read_buf(buffer).await?;
        if n == 0 {
            return Err(TransportError::Handshake(
                "connection closed during handshake".into(),
            ));
        }
    }
}

/// Client side: request `path` and wait for the server's verdict.
pub async fn request<S>(stream: &mut S, path: &str, buffer: &mut BytesMut) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(format!("{path}\r\n").as_bytes()).await?;
    stream.flush().await?;

    let reply = read_line(stream, buffer).await?;
    if reply.as_bytes() == OK_REPLY {
        Ok(())
    } else {
        Err(TransportError::Handshake(reply))
    }
}

/// Server side: read the requested path and accept it if it matches.
///
/// On mismatch an error reply is written before returning the error.
pub async fn accept<S>(stream: &mut S, expected_path: &str, buffer: &mut BytesMut) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let path = read_line(stream, buffer).await?;
    if path != expected_path {
        stream.write_all(&response_error("unknown path")).await?;
        stream.flush().await?;
        return Err(TransportError::Handshake(format!("unknown path '{path}'")));
    }

    stream.write_all(b"OK\r\n").await?;
    stream.flush().await?;
    Ok(())
}
