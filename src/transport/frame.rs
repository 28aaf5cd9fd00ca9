//! Frame encoding and the buffered frame reader/writer.
//!
//! ```text
//! +--------+--------+--------+--------+--------+-----------------+
//! |FIN|op  |        payload length (u32, big-endian)   | payload ...     |
//! +--------+--------+--------+--------+--------+-----------------+
//! ```
//!
//! The high bit of the first byte is FIN, the low nibble is the opcode.
//! The remaining bits are reserved and must be zero.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Result, TransportError};
use crate::message::accumulator::Fragment;

/// Size of the frame header (flags + length).
pub const FRAME_HEADER_SIZE: usize = 5;

const FIN: u8 = 0x80;
const OPCODE_MASK: u8 = 0x0F;
const RESERVED_MASK: u8 = 0x70;

/// Frame type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation = 0x0,
    Binary = 0x2,
    Close = 0x8,
}

impl Opcode {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x0 => Some(Opcode::Continuation),
            0x2 => Some(Opcode::Binary),
            0x8 => Some(Opcode::Close),
            _ => None,
        }
    }
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub fin: bool,
    pub opcode: Opcode,
    pub length: u32,
}

impl FrameHeader {
    /// Write the header into `output`.
    pub fn encode(&self, output: &mut BytesMut) {
        let fin = if self.fin { FIN } else { 0 };
        output.put_u8(fin | self.opcode as u8);
        output.put_u32(self.length);
    }
}

/// Header parse result.
#[derive(Debug, PartialEq, Eq)]
pub enum ParseResult {
    /// Header decoded.
    Complete(FrameHeader),
    /// Need more bytes for the header.
    Incomplete,
    /// Reserved bits set or unknown opcode.
    Invalid(u8),
}

/// Parse a frame header from the start of `input`.
pub fn parse_header(input: &[u8]) -> ParseResult {
    if input.len() < FRAME_HEADER_SIZE {
        return ParseResult::Incomplete;
    }

    let flags = input[0];
    if flags & RESERVED_MASK != 0 {
        return ParseResult::Invalid(flags);
    }
    let opcode = match Opcode::from_u8(flags & OPCODE_MASK) {
        Some(op) => op,
        None => return ParseResult::Invalid(flags),
    };

    let length = u32::from_be_bytes([input[1], input[2], input[3], input[4]]);

    ParseResult::Complete(FrameHeader {
        fin: flags & FIN != 0,
        opcode,
        length,
    })
}

/// A complete frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Bytes,
}

impl Frame {
    /// Convert a data frame into a fragment. Close frames yield `None`.
    pub fn into_fragment(self) -> Option<Fragment> {
        match self.header.opcode {
            Opcode::Binary => Some(Fragment::binary(self.payload, self.header.fin)),
            Opcode::Continuation => Some(Fragment::continuation(self.payload, self.header.fin)),
            Opcode::Close => None,
        }
    }
}

/// Reads frames from a byte stream.
pub struct FrameReader<R> {
    reader: R,
    buffer: BytesMut,
    max_payload: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wrap `reader`, starting with any bytes already read into `buffer`.
    ///
    /// Frames with a payload over `max_payload` are rejected. The limit is
    /// independent of the size this side fragments its own messages at.
    pub fn new(reader: R, buffer: BytesMut, max_payload: usize) -> Self {
        Self {
            reader,
            buffer,
            max_payload,
        }
    }

    /// Read the next frame.
    ///
    /// Returns `Ok(None)` on EOF at a frame boundary; EOF inside a frame is
    /// an error.
    pub async fn read_frame(&mut self) -> Result<Option<Frame>> {
        let header = loop {
            match parse_header(&self.buffer) {
                ParseResult::Complete(header) => break header,
                ParseResult::Incomplete => {
                    if !self.fill().await? {
                        return if self.buffer.is_empty() {
                            Ok(None)
                        } else {
                            Err(truncated())
                        };
                    }
                }
                ParseResult::Invalid(flags) => {
                    return Err(TransportError::Protocol(format!(
                        "invalid frame flags {flags:#04x}"
                    )));
                }
            }
        };

        let length = header.length as usize;
        if length > self.max_payload {
            return Err(TransportError::Protocol(format!(
                "frame of {length} bytes exceeds maximum {}",
                self.max_payload
            )));
        }

        let total = FRAME_HEADER_SIZE + length;
        if self.buffer.capacity() < total {
            self.buffer.reserve(total - self.buffer.len());
        }
        while self.buffer.len() < total {
            if !self.fill().await? {
                return Err(truncated());
            }
        }

        self.buffer.advance(FRAME_HEADER_SIZE);
        let payload = self.buffer.split_to(length).freeze();

        Ok(Some(Frame { header, payload }))
    }

    /// Read more bytes into the buffer. Returns false on EOF.
    async fn fill(&mut self) -> Result<bool> {
        let n = self.reader.read_buf(&mut self.buffer).await?;
        Ok(n > 0)
    }
}

fn truncated() -> TransportError {
    TransportError::Io(std::io::Error::new(
        std::io::ErrorKind::UnexpectedEof,
        "connection closed inside a frame",
    ))
}

/// Writes messages as one or more frames.
pub struct FrameWriter<W> {
    writer: W,
    max_frame_size: usize,
    header: BytesMut,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W, max_frame_size: usize) -> Self {
        Self {
            writer,
            max_frame_size: max_frame_size.max(1),
            header: BytesMut::with_capacity(FRAME_HEADER_SIZE),
        }
    }

    /// Write `payload` as a binary message, fragmenting at `max_frame_size`.
    ///
    /// Returns the number of frames written.
    pub async fn write_message(&mut self, payload: &[u8]) -> Result<usize> {
        if payload.is_empty() {
            self.write_frame(Opcode::Binary, true, &[]).await?;
            return Ok(1);
        }

        let mut frames = 0;
        let mut chunks = payload.chunks(self.max_frame_size).peekable();
        while let Some(chunk) = chunks.next() {
            let opcode = if frames == 0 {
                Opcode::Binary
            } else {
                Opcode::Continuation
            };
            let fin = chunks.peek().is_none();
            self.write_frame(opcode, fin, chunk).await?;
            frames += 1;
        }
        Ok(frames)
    }

    /// Write a close frame.
    pub async fn write_close(&mut self) -> Result<()> {
        self.write_frame(Opcode::Close, true, &[]).await
    }

    async fn write_frame(&mut self, opcode: Opcode, fin: bool, payload: &[u8]) -> Result<()> {
        self.header.clear();
        FrameHeader {
            fin,
            opcode,
            length: payload.len() as u32,
        }
        .encode(&mut self.header);

        self.writer.write_all(&self.header).await?;
        self.writer.write_all(payload).await?;
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.writer.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}
