//! Client connection for the drive side of the exchange.
//!
//! `connect` establishes the channel and spawns the receive task, which owns
//! the [`DriveEndpoint`]. The task reports its final counters exactly once
//! through a [`Completion`], on orderly close or on transport failure. A
//! failed receive task also stops the writer, so a sender blocked on a full
//! queue is released.

use bytes::BytesMut;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::endpoint::drive::SendStats;
use crate::endpoint::{receive_loop, BatchSender, DriveEndpoint, Endpoint, SessionStats};
use crate::error::{Result, TransportError};
use crate::message::Message;
use crate::transport::{configure_socket, handshake, Channel, WriterHandle};

/// Single-shot signal carrying the receive task's outcome.
pub struct Completion {
    rx: Option<oneshot::Receiver<Result<SessionStats>>>,
}

impl Completion {
    /// Wait for the receive task to finish, optionally bounded by `limit`.
    pub async fn wait(self, limit: Option<Duration>) -> Result<SessionStats> {
        let Some(rx) = self.rx else {
            return Err(TransportError::ChannelClosed);
        };
        let outcome = with_deadline(limit, "completion", rx).await?;
        outcome.unwrap_or(Err(TransportError::ChannelClosed))
    }

    /// Resolves with the failure if the receive task ends early.
    ///
    /// Once resolved, the outcome is consumed and later calls never resolve.
    async fn ended(&mut self) -> TransportError {
        let outcome = match self.rx.as_mut() {
            Some(rx) => rx.await,
            None => return std::future::pending().await,
        };
        self.rx = None;
        match outcome {
            Ok(Err(e)) => e,
            Ok(Ok(_)) | Err(_) => TransportError::ChannelClosed,
        }
    }
}

/// An open drive channel.
pub struct Client {
    peer: SocketAddr,
    sender: BatchSender,
    completion: Completion,
    writer: WriterHandle,
    receiver: JoinHandle<()>,
}

/// Connect to `config.address()` and complete the handshake.
///
/// Blocks until the server accepts the path, or until `connect_timeout`.
pub async fn connect(config: &Config) -> Result<Client> {
    let address = config.address();
    let (stream, buffer) = with_deadline(
        config.connect_timeout,
        "connection",
        establish(&address, config),
    )
    .await??;

    let channel = Channel::open(stream, buffer, &config.channel_options())?;
    let peer = channel.peer;
    let (mut reader, outbound, writer) = channel.into_parts();

    let mut endpoint = DriveEndpoint::new(config.max_message_size);
    endpoint.on_open(peer, &outbound);
    let sender = endpoint.sender().ok_or(TransportError::ChannelClosed)?;

    let (done_tx, done_rx) = oneshot::channel();
    let stop_writer = writer.abort_handle();
    let receiver = tokio::spawn(async move {
        let result = receive_loop(&mut reader, &mut endpoint, &outbound).await;
        endpoint.on_close();
        if let Err(e) = &result {
            warn!(%peer, error = %e, "Receive failed");
        }
        let failed = result.is_err();
        let _ = done_tx.send(result.map(|()| *endpoint.stats()));
        if failed {
            stop_writer.abort();
        }
    });

    info!(%peer, path = %config.path, "Connected");
    Ok(Client {
        peer,
        sender,
        completion: Completion { rx: Some(done_rx) },
        writer,
        receiver,
    })
}

async fn establish(address: &str, config: &Config) -> Result<(TcpStream, BytesMut)> {
    let mut stream = TcpStream::connect(address).await?;
    configure_socket(&stream, &config.channel_options())?;

    let mut buffer = BytesMut::new();
    handshake::request(&mut stream, &config.path, &mut buffer).await?;
    Ok((stream, buffer))
}

async fn with_deadline<F: Future>(
    limit: Option<Duration>,
    what: &'static str,
    future: F,
) -> Result<F::Output> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, future)
            .await
            .map_err(|_| TransportError::Timeout(what)),
        None => Ok(future.await),
    }
}

impl Client {
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Send `messages` in order.
    ///
    /// Fails with the receive side's error if it ends before the batch is out.
    pub async fn send_batch(&mut self, messages: Vec<Message>) -> Result<SendStats> {
        tokio::select! {
            biased;
            error = self.completion.ended() => Err(error),
            sent = self.sender.send_batch(messages) => sent,
        }
    }

    /// Close the channel and wait for every echo to arrive.
    pub async fn finish(self, limit: Option<Duration>) -> Result<SessionStats> {
        let Client {
            sender,
            completion,
            writer,
            receiver,
            ..
        } = self;

        if let Err(e) = sender.finish().await {
            writer.abort();
            receiver.abort();
            return Err(e);
        }
        let stats = completion.wait(limit).await;
        match &stats {
            Ok(_) => {
                writer.join().await?;
            }
            Err(_) => {
                writer.abort();
                receiver.abort();
            }
        }
        debug!("Client finished");
        stats
    }

    /// Drop the channel without waiting.
    pub fn abort(self) {
        self.writer.abort();
        self.receiver.abort();
    }
}
