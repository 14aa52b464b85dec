//! Server role: bind a port, accept a single peer, then exchange messages.
//!
//! Binding is an explicit step ([`ServerEndpoint::bind`]) so that a port
//! conflict surfaces as an error instead of leaving a half-built endpoint.

use super::session::{ConnectionState, Session};
use crate::codec::{Codec, JsonCodec};
use crate::config::EndpointConfig;
use crate::endpoint::{Endpoint, EndpointHandler};
use crate::error::{Result, SocketError};
use crate::worker::BackgroundWorker;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tracing::{error, info};

/// Lifecycle of a server endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// `bind` has not succeeded yet.
    Unbound,
    /// Bound, no peer connected. A `listen` may be waiting in accept.
    Listening,
    /// A peer is connected.
    Accepted,
    /// `disconnect` released the listener, or the last session ended after it was released.
    Closed,
}

struct Bound {
    listener: Arc<TcpListener>,
    addr: SocketAddr,
}

/// Endpoint that accepts one inbound connection.
pub struct ServerEndpoint<H, C = JsonCodec> {
    session: Arc<Session<H, C>>,
    bound: Mutex<Option<Bound>>,
    worker: Mutex<Option<BackgroundWorker>>,
}

impl<H: EndpointHandler> ServerEndpoint<H, JsonCodec> {
    /// Create an unbound server using the JSON codec.
    pub fn new(config: EndpointConfig, handler: H) -> Self {
        Self::with_codec(config, handler, JsonCodec)
    }

    /// Create a server using the JSON codec and bind it.
    pub async fn open(config: EndpointConfig, handler: H) -> Result<Self> {
        let server = Self::new(config, handler);
        server.bind().await?;
        Ok(server)
    }
}

impl<H: EndpointHandler, C: Codec> ServerEndpoint<H, C> {
    /// Create an unbound server with a custom codec.
    pub fn with_codec(config: EndpointConfig, handler: H, codec: C) -> Self {
        let label = format!("server {}:{}", config.address, config.port);
        Self {
            session: Arc::new(Session::new(label, config, handler, codec)),
            bound: Mutex::new(None),
            worker: Mutex::new(None),
        }
    }

    /// Bind and start listening on the configured address, port and backlog.
    ///
    /// Returns the bound address, which carries the OS-assigned port when the
    /// configured port is 0. Failures are logged and returned; nothing is retried.
    pub async fn bind(&self) -> Result<SocketAddr> {
        if let Some(addr) = self.local_addr() {
            return Err(SocketError::AlreadyBound { addr });
        }

        let listener = match open_listener(self.session.config()).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("{}: {}", self.session.label(), e);
                return Err(e);
            }
        };
        let addr = listener.local_addr()?;

        let mut bound = self.lock_bound();
        if let Some(existing) = bound.as_ref() {
            return Err(SocketError::AlreadyBound {
                addr: existing.addr,
            });
        }
        *bound = Some(Bound {
            listener: Arc::new(listener),
            addr,
        });
        info!("{}: listening on {}", self.session.label(), addr);
        Ok(addr)
    }

    /// Accept exactly one peer and run the read loop on that connection.
    ///
    /// Same blocking/standalone behavior as
    /// [`ClientEndpoint::connect`](crate::ClientEndpoint::connect). Other
    /// peers stay queued in the backlog and are not serviced by this call.
    /// The accept is bounded by the configured `so_timeout`.
    pub async fn listen(&self) -> Result<()> {
        let listener = self
            .lock_bound()
            .as_ref()
            .map(|bound| Arc::clone(&bound.listener))
            .ok_or(SocketError::NotBound)?;
        let attempt = self.session.begin()?;

        info!("{}: waiting for a peer", self.session.label());
        let session = Arc::clone(&self.session);
        let accept_timeout = session.config().read_timeout();
        let operation =
            async move { session.drive(attempt, accept_once(listener, accept_timeout)).await };

        if self.session.config().standalone {
            let mut worker = BackgroundWorker::new(self.session.label(), operation);
            worker.start()?;
            *self.lock_worker() = Some(worker);
            Ok(())
        } else {
            operation.await
        }
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lock_bound().as_ref().map(|bound| bound.addr)
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.session.peer_addr()
    }

    pub fn state(&self) -> ServerState {
        match self.session.state() {
            ConnectionState::Connected => ServerState::Accepted,
            ConnectionState::Connecting => ServerState::Listening,
            session_state => {
                if self.local_addr().is_some() {
                    ServerState::Listening
                } else if session_state == ConnectionState::Closed {
                    ServerState::Closed
                } else {
                    ServerState::Unbound
                }
            }
        }
    }

    /// Wait until the pending `listen` has accepted a peer.
    pub async fn wait_connected(&self) -> Result<()> {
        self.session.wait_connected().await
    }

    fn lock_bound(&self) -> MutexGuard<'_, Option<Bound>> {
        self.bound.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_worker(&self) -> MutexGuard<'_, Option<BackgroundWorker>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait::async_trait]
impl<H: EndpointHandler, C: Codec> Endpoint for ServerEndpoint<H, C> {
    type Handler = H;
    type Codec = C;

    fn session(&self) -> &Session<H, C> {
        &self.session
    }

    fn take_worker(&self) -> Option<BackgroundWorker> {
        self.lock_worker().take()
    }

    /// Close the accepted connection and release the listener.
    ///
    /// A pending accept is aborted. Returns `true` only if an established
    /// connection was torn down.
    async fn disconnect(&self) -> bool {
        let disconnected = self.session.disconnect().await;
        let released = self.lock_bound().take();
        if let Some(bound) = released {
            info!("{}: released listener on {}", self.session.label(), bound.addr);
        }
        disconnected
    }
}

async fn open_listener(config: &EndpointConfig) -> Result<TcpListener> {
    let failed = |e: std::io::Error| SocketError::bind_failed(&config.address, config.port, e);

    let addr = tokio::net::lookup_host((config.address.as_str(), config.port))
        .await
        .map_err(failed)?
        .next()
        .ok_or_else(|| {
            failed(std::io::Error::new(
                std::io::ErrorKind::AddrNotAvailable,
                "address did not resolve",
            ))
        })?;

    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
    .map_err(failed)?;
    socket.set_reuseaddr(true).map_err(failed)?;
    socket.bind(addr).map_err(failed)?;
    socket.listen(config.backlog).map_err(failed)
}

async fn accept_once(listener: Arc<TcpListener>, accept_timeout: Option<Duration>) -> Result<TcpStream> {
    let accepted = match accept_timeout {
        Some(limit) => tokio::time::timeout(limit, listener.accept())
            .await
            .map_err(|_| SocketError::Timeout(limit))?,
        None => listener.accept().await,
    };
    let (stream, _) = accepted?;
    Ok(stream)
}
