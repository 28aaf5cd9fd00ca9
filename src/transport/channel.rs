//! Bidirectional channel over an established TCP stream.
//!
//! The read half is exposed as a [`FrameReader`] for the owning receive
//! path. The write half is owned by a writer task fed through a bounded
//! queue; any number of [`Outbound`] handles can enqueue messages, and the
//! queue bound is the only backpressure.

use bytes::BytesMut;
use socket2::SockRef;
use std::net::SocketAddr;
use tokio::io::BufWriter;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, trace};

use super::frame::{FrameReader, FrameWriter};
use crate::error::{Result, TransportError};
use crate::message::Message;

/// Per-channel sizing.
#[derive(Debug, Clone, Copy)]
pub struct ChannelOptions {
    /// Socket send/receive buffer hint, per direction.
    pub buffer_size: usize,
    /// Largest outgoing frame payload; longer messages are fragmented.
    pub max_frame_size: usize,
    /// Largest incoming frame payload accepted from the peer.
    pub max_inbound_frame: usize,
    /// Depth of the outbound queue.
    pub send_queue: usize,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            buffer_size: 2 * 1024 * 1024,
            max_frame_size: 1024,
            max_inbound_frame: 2 * 1024 * 1024,
            send_queue: 256,
        }
    }
}

/// Apply buffer hints and disable Nagle's algorithm.
pub fn configure_socket(stream: &TcpStream, options: &ChannelOptions) -> std::io::Result<()> {
    stream.set_nodelay(true)?;

    let socket = SockRef::from(stream);
    socket.set_recv_buffer_size(options.buffer_size)?;
    socket.set_send_buffer_size(options.buffer_size)?;

    let recv = socket.recv_buffer_size()?;
    let send = socket.send_buffer_size()?;
    trace!(recv, send, "Socket buffers configured");
    Ok(())
}

enum Outgoing {
    Message(Message),
    Close,
}

/// Handle for sending on a channel.
#[derive(Clone)]
pub struct Outbound {
    tx: mpsc::Sender<Outgoing>,
}

impl Outbound {
    /// Queue a complete message. Waits while the queue is full.
    pub async fn send(&self, message: Message) -> Result<()> {
        self.tx
            .send(Outgoing::Message(message))
            .await
            .map_err(|_| TransportError::ChannelClosed)
    }

    /// Queue a close frame after everything already queued.
    pub async fn close(&self) -> Result<()> {
        self.tx
            .send(Outgoing::Close)
            .await
            .map_err(|_| TransportError::ChannelClosed)
    }

    /// Check if the writer task has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl std::fmt::Debug for Outbound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outbound")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Counters reported by the writer task when it exits.
#[derive(Debug, Default, Clone, Copy)]
pub struct WriterStats {
    pub messages: u64,
    pub frames: u64,
    pub bytes: u64,
}

/// An open channel: frame reader, outbound handle and the writer task.
pub struct Channel {
    pub peer: SocketAddr,
    pub reader: FrameReader<OwnedReadHalf>,
    pub outbound: Outbound,
    writer: JoinHandle<Result<WriterStats>>,
}

impl Channel {
    /// Split `stream` and start the writer task.
    ///
    /// `buffer` holds bytes already read past the handshake.
    pub fn open(
        stream: TcpStream,
        buffer: BytesMut,
        options: &ChannelOptions,
    ) -> std::io::Result<Self> {
        let peer = stream.peer_addr()?;
        let (read_half, write_half) = stream.into_split();

        let (tx, rx) = mpsc::channel(options.send_queue.max(1));
        let writer = FrameWriter::new(BufWriter::new(write_half), options.max_frame_size);
        let writer = tokio::spawn(writer_task(writer, rx));

        Ok(Self {
            peer,
            reader: FrameReader::new(read_half, buffer, options.max_inbound_frame),
            outbound: Outbound { tx },
            writer,
        })
    }

    /// Split into the receive side and the writer task handle.
    pub fn into_parts(self) -> (FrameReader<OwnedReadHalf>, Outbound, WriterHandle) {
        (self.reader, self.outbound, WriterHandle(self.writer))
    }
}

/// Join handle for the writer task.
pub struct WriterHandle(JoinHandle<Result<WriterStats>>);

impl WriterHandle {
    /// Wait for the writer to drain its queue and exit.
    ///
    /// The writer exits after writing a close frame or once every
    /// [`Outbound`] handle is dropped.
    pub async fn join(self) -> Result<WriterStats> {
        match self.0.await {
            Ok(result) => result,
            Err(e) => Err(TransportError::Io(std::io::Error::other(e))),
        }
    }

    /// Stop the writer without draining.
    pub fn abort(&self) {
        self.0.abort();
    }

    /// Handle that can stop the writer from another task.
    ///
    /// Once the writer stops, pending and future [`Outbound`] sends fail
    /// with [`TransportError::ChannelClosed`].
    pub fn abort_handle(&self) -> AbortHandle {
        self.0.abort_handle()
    }
}

async fn writer_task(
    mut writer: FrameWriter<BufWriter<OwnedWriteHalf>>,
    mut rx: mpsc::Receiver<Outgoing>,
) -> Result<WriterStats> {
    let mut stats = WriterStats::default();

    while let Some(outgoing) = rx.recv().await {
        match outgoing {
            Outgoing::Message(message) => {
                let frames = writer.write_message(&message).await?;
                stats.messages += 1;
                stats.frames += frames as u64;
                stats.bytes += message.len() as u64;
                writer.flush().await?;
            }
            Outgoing::Close => {
                writer.write_close().await?;
                writer.flush().await?;
                break;
            }
        }
    }

    rx.close();
    writer.shutdown().await?;
    debug!(
        messages = stats.messages,
        frames = stats.frames,
        bytes = stats.bytes,
        "Writer finished"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::generate_one;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    async fn connected_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        (client.unwrap(), accepted.unwrap().0)
    }

    #[tokio::test]
    async fn test_inbound_limit_independent_of_fragment_size() {
        let (local, mut remote) = connected_pair().await;
        let options = ChannelOptions {
            max_frame_size: 16,
            max_inbound_frame: 4096,
            ..ChannelOptions::default()
        };
        let (mut reader, _outbound, writer) = Channel::open(local, BytesMut::new(), &options)
            .unwrap()
            .into_parts();

        // Peer sends a 1000-byte message unfragmented
        let message = generate_one(1000);
        let mut remote_writer = FrameWriter::new(&mut remote, 8192);
        assert_eq!(remote_writer.write_message(&message).await.unwrap(), 1);
        remote_writer.flush().await.unwrap();

        let frame = reader.read_frame().await.unwrap().unwrap();
        assert!(frame.header.fin);
        assert_eq!(&frame.payload[..], &message[..]);
        writer.abort();
    }

    #[tokio::test]
    async fn test_stopped_writer_fails_pending_sends() {
        let (local, mut remote) = connected_pair().await;
        let options = ChannelOptions {
            send_queue: 1,
            ..ChannelOptions::default()
        };
        let (_reader, outbound, writer) = Channel::open(local, BytesMut::new(), &options)
            .unwrap()
            .into_parts();

        writer.abort_handle().abort();
        tokio::time::timeout(Duration::from_secs(5), async {
            while !outbound.is_closed() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        let err = outbound.send(generate_one(8)).await.unwrap_err();
        assert!(matches!(err, TransportError::ChannelClosed));
        let _ = remote.shutdown().await;
    }
}
