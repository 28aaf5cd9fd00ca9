//! TCP server hosting echo sessions.
//!
//! Accepts connections, performs the path handshake, and runs one
//! [`EchoEndpoint`] per connection until the peer closes.

use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::endpoint::{receive_loop, EchoEndpoint, Endpoint};
use crate::error::{Result, TransportError};
use crate::transport::{configure_socket, handshake, Channel};

/// Maximum number of concurrent connections
const MAX_CONNECTIONS: usize = 1024;

/// Handshake read buffer size
const BUFFER_SIZE: usize = 16 * 1024;

/// Server instance
pub struct Server {
    config: Arc<Config>,
    listener: TcpListener,
    connection_limit: Arc<Semaphore>,
}

impl Server {
    /// Bind the listener.
    pub async fn bind(config: Config) -> std::io::Result<Self> {
        let listener = TcpListener::bind(config.address()).await?;

        Ok(Server {
            config: Arc::new(config),
            listener,
            connection_limit: Arc::new(Semaphore::new(MAX_CONNECTIONS)),
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` flips to true.
    ///
    /// Open sessions are aborted on shutdown.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let addr = self.local_addr()?;
        info!(address = %addr, path = %self.config.path, "Server listening");

        let mut sessions = JoinSet::new();

        loop {
            if *shutdown.borrow() {
                break;
            }

            let permit = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                permit = self.connection_limit.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "New connection");
                        let config = Arc::clone(&self.config);
                        sessions.spawn(async move {
                            if let Err(e) = handle_connection(stream, peer, &config).await {
                                debug!(%peer, error = %e, "Connection error");
                            }
                            drop(permit);
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                    }
                },
            }

            // Reap finished sessions
            while sessions.try_join_next().is_some() {}
        }

        info!(open_sessions = sessions.len(), "Shutting down server");
        sessions.shutdown().await;
        info!("Server stopped");
        Ok(())
    }
}

/// Handle a single client connection
async fn handle_connection(mut stream: TcpStream, peer: SocketAddr, config: &Config) -> Result<()> {
    let options = config.channel_options();
    configure_socket(&stream, &options)?;

    let mut buffer = BytesMut::with_capacity(BUFFER_SIZE);
    if let Err(e) = handshake::accept(&mut stream, &config.path, &mut buffer).await {
        warn!(%peer, error = %e, "Handshake rejected");
        return Err(e);
    }

    let channel = Channel::open(stream, buffer, &options)?;
    let (mut reader, outbound, writer) = channel.into_parts();

    let mut endpoint = EchoEndpoint::new(config.max_message_size, config.echo_policy);
    endpoint.on_open(peer, &outbound);

    let result = receive_loop(&mut reader, &mut endpoint, &outbound).await;
    endpoint.on_close();

    match result {
        Ok(()) => {
            // Close reply goes out after every queued echo
            outbound.close().await?;
            drop(outbound);
            writer.join().await?;
            let stats = endpoint.stats();
            debug!(
                %peer,
                received = stats.received,
                echoed = stats.echoed,
                "Connection closed"
            );
            Ok(())
        }
        Err(TransportError::ChannelClosed) => {
            writer.abort();
            debug!(%peer, "Connection closed without close frame");
            Ok(())
        }
        Err(e) => {
            writer.abort();
            Err(e)
        }
    }
}
