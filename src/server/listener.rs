//! Signaling server listener
//!
//! Handles the TCP accept loop and runs one WebSocket handler per socket.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::error::{Error, Result};
use crate::pipeline::Detector;
use crate::relay::{ClientControl, ParticipantHandle, ServerControl, SignalingRelay};
use crate::server::config::ServerConfig;
use crate::server::service::DetectionService;
use crate::transport::TransportFactory;
use crate::stats::ServerStats;

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsStream = SplitStream<WebSocketStream<TcpStream>>;

#[derive(Debug, Default)]
struct ServerCounters {
    total: AtomicU64,
    active: AtomicU64,
    rejected: AtomicU64,
}

/// WebSocket signaling server
///
/// Clients join a session with `{"join":{"session":"s1","role":"sender"}}`;
/// every later frame is relayed verbatim to the other session members.
pub struct SignalingServer {
    config: ServerConfig,
    relay: Arc<SignalingRelay>,
    connection_semaphore: Option<Arc<Semaphore>>,
    counters: Arc<ServerCounters>,
    started_at: Instant,
}

impl SignalingServer {
    /// Create a server with its own relay
    pub fn new(config: ServerConfig) -> Self {
        let relay = Arc::new(SignalingRelay::with_config(config.relay.clone()));
        Self::with_relay(config, relay)
    }

    /// Create a server on a shared relay
    ///
    /// Lets in-process participants (such as a detection service) sit in the
    /// same sessions as WebSocket clients.
    pub fn with_relay(config: ServerConfig, relay: Arc<SignalingRelay>) -> Self {
        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        Self {
            config,
            relay,
            connection_semaphore,
            counters: Arc::new(ServerCounters::default()),
            started_at: Instant::now(),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Detection service on this server's relay, using `config.pipeline`
    ///
    /// Sessions it serves are joined in-process as the receiver, so WebSocket
    /// senders negotiate with it directly.
    pub fn detection_service<F, D>(&self, factory: F, detector: D) -> DetectionService<F, D>
    where
        F: TransportFactory,
        D: Detector,
    {
        DetectionService::new(
            Arc::clone(&self.relay),
            factory,
            detector,
            self.config.pipeline.clone(),
        )
    }

    /// Get a reference to the signaling relay
    pub fn relay(&self) -> &Arc<SignalingRelay> {
        &self.relay
    }

    /// Get the bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }

    /// Snapshot of server statistics
    pub fn stats(&self) -> ServerStats {
        ServerStats {
            total_connections: self.counters.total.load(Ordering::Relaxed),
            active_connections: self.counters.active.load(Ordering::Relaxed),
            rejected_connections: self.counters.rejected.load(Ordering::Relaxed),
            uptime: self.started_at.elapsed(),
        }
    }

    /// Run the server
    ///
    /// This method blocks until the server is shut down.
    pub async fn run(&self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` completes
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let addr = listener.local_addr()?;
        tracing::info!(addr = %addr, "Signaling server listening");

        // Spawn cleanup task for idle sessions
        let cleanup_handle = self.relay.spawn_cleanup_task();

        let result = tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
                Ok(())
            }
            result = self.accept_loop(&listener) => result,
        };

        // Stop cleanup task on shutdown
        cleanup_handle.abort();

        result
    }

    async fn accept_loop(&self, listener: &TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => {
                    self.handle_connection(socket, peer_addr);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        // Check connection limit
        let permit = if let Some(ref sem) = self.connection_semaphore {
            match sem.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(peer = %peer_addr, "Connection rejected: limit reached");
                    return;
                }
            }
        } else {
            None
        };

        if self.config.tcp_nodelay {
            if let Err(e) = socket.set_nodelay(true) {
                tracing::error!(error = %e, "Failed to configure socket");
                return;
            }
        }

        self.counters.total.fetch_add(1, Ordering::Relaxed);
        self.counters.active.fetch_add(1, Ordering::Relaxed);

        let config = self.config.clone();
        let relay = Arc::clone(&self.relay);
        let counters = Arc::clone(&self.counters);

        tokio::spawn(async move {
            if let Err(e) = handle_socket(socket, peer_addr, config, relay, permit).await {
                tracing::debug!(peer = %peer_addr, error = %e, "Connection error");
            }

            counters.active.fetch_sub(1, Ordering::Relaxed);
            tracing::debug!(peer = %peer_addr, "Connection closed");
        });
    }
}

async fn handle_socket(
    socket: TcpStream,
    peer_addr: SocketAddr,
    config: ServerConfig,
    relay: Arc<SignalingRelay>,
    _permit: Option<OwnedSemaphorePermit>,
) -> Result<()> {
    let ws = tokio_tungstenite::accept_async(socket).await?;
    let (mut sink, mut stream) = ws.split();

    tracing::debug!(peer = %peer_addr, "WebSocket established");

    let join = match tokio::time::timeout(config.join_timeout, read_join(&mut stream)).await {
        Ok(Ok(Some(join))) => join,
        Ok(Ok(None)) => return Ok(()),
        Ok(Err(e)) => {
            reject(&mut sink, format!("Invalid join message: {}", e)).await;
            return Err(e);
        }
        Err(_) => {
            reject(&mut sink, "Join timeout".to_string()).await;
            return Err(Error::JoinTimeout);
        }
    };

    let ClientControl::Join { session, role } = join;
    let mut handle = match relay.join(session.as_str(), role).await {
        Ok(handle) => handle,
        Err(e) => {
            reject(&mut sink, e.to_string()).await;
            return Err(e.into());
        }
    };

    let joined = ServerControl::Joined {
        session,
        participant: handle.id().0,
        role,
    };

    let result = match sink.send(Message::text(joined.to_json())).await {
        Ok(()) => pump(&relay, &mut handle, &mut sink, &mut stream, &config).await,
        Err(e) => Err(e.into()),
    };

    relay.leave(&handle).await;
    let _ = sink.close().await;

    result
}

/// Wait for the join control message
///
/// Returns `None` if the client went away first.
async fn read_join(stream: &mut WsStream) -> Result<Option<ClientControl>> {
    while let Some(message) = stream.next().await {
        match message? {
            Message::Text(text) => return Ok(Some(serde_json::from_str(&text)?)),
            Message::Binary(data) => return Ok(Some(serde_json::from_slice(&data)?)),
            Message::Close(_) => return Ok(None),
            _ => {}
        }
    }
    Ok(None)
}

async fn reject(sink: &mut WsSink, message: String) {
    let reply = ServerControl::Error { message };
    let _ = sink.send(Message::text(reply.to_json())).await;
    let _ = sink.close().await;
}

/// Move frames between the socket and the relay until either side ends
async fn pump(
    relay: &SignalingRelay,
    handle: &mut ParticipantHandle,
    sink: &mut WsSink,
    stream: &mut WsStream,
    config: &ServerConfig,
) -> Result<()> {
    loop {
        tokio::select! {
            message = stream.next() => {
                let data = match message {
                    Some(Ok(Message::Text(text))) => Bytes::from(text),
                    Some(Ok(Message::Binary(data))) => Bytes::from(data),
                    Some(Ok(Message::Close(_))) | None => return Ok(()),
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Err(e.into()),
                };

                if data.len() > config.max_message_size {
                    tracing::warn!(
                        session = %handle.session_id(),
                        participant = %handle.id(),
                        size = data.len(),
                        limit = config.max_message_size,
                        "Dropping oversized signaling message"
                    );
                    continue;
                }

                relay.send(handle, data).await?;
            }
            relayed = handle.recv() => {
                // None: evicted or the session was cleaned up
                let Some(data) = relayed else {
                    return Ok(());
                };

                let message = match String::from_utf8(data.to_vec()) {
                    Ok(text) => Message::text(text),
                    Err(e) => Message::binary(e.into_bytes()),
                };
                sink.send(message).await?;
            }
        }
    }
}
