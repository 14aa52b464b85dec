//! Client role: dial a fixed address, then exchange messages.

use super::session::{ConnectionState, Session};
use crate::codec::{Codec, JsonCodec};
use crate::config::EndpointConfig;
use crate::endpoint::{Endpoint, EndpointHandler};
use crate::error::{Result, SocketError};
use crate::worker::BackgroundWorker;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::net::TcpStream;
use tracing::{info, warn};

/// Endpoint that connects out to a server.
///
/// ```rust,ignore
/// let client = ClientEndpoint::new(EndpointConfig::client("127.0.0.1", 4000), MyHandler);
/// client.connect().await?; // blocks until the connection ends
/// ```
pub struct ClientEndpoint<H, C = JsonCodec> {
    session: Arc<Session<H, C>>,
    worker: Mutex<Option<BackgroundWorker>>,
}

impl<H: EndpointHandler> ClientEndpoint<H, JsonCodec> {
    /// Create a client using the JSON codec.
    pub fn new(config: EndpointConfig, handler: H) -> Self {
        Self::with_codec(config, handler, JsonCodec)
    }
}

impl<H: EndpointHandler, C: Codec> ClientEndpoint<H, C> {
    /// Create a client with a custom codec.
    pub fn with_codec(config: EndpointConfig, handler: H, codec: C) -> Self {
        let label = format!("client {}:{}", config.address, config.port);
        Self {
            session: Arc::new(Session::new(label, config, handler, codec)),
            worker: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.session.state()
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.session.peer_addr()
    }

    /// Wait until the pending `connect` has established the connection.
    pub async fn wait_connected(&self) -> Result<()> {
        self.session.wait_connected().await
    }

    /// Connect to the configured server and run the read loop.
    ///
    /// In standalone mode the connection runs on a fresh [`BackgroundWorker`]
    /// and this returns as soon as the worker is started; its outcome is
    /// available through [`Endpoint::take_worker`]. Otherwise this does not
    /// return until the connection ends, and returns how it ended.
    ///
    /// Fails with [`SocketError::AlreadyConnected`] while a previous attempt
    /// or connection is still active.
    pub async fn connect(&self) -> Result<()> {
        let attempt = self.session.begin()?;
        let session = Arc::clone(&self.session);
        let operation = async move { session.drive(attempt, dial(session.config())).await };

        if self.session.config().standalone {
            let mut worker = BackgroundWorker::new(self.session.label(), operation);
            worker.start()?;
            *self.lock_worker() = Some(worker);
            Ok(())
        } else {
            operation.await
        }
    }

    fn lock_worker(&self) -> MutexGuard<'_, Option<BackgroundWorker>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait::async_trait]
impl<H: EndpointHandler, C: Codec> Endpoint for ClientEndpoint<H, C> {
    type Handler = H;
    type Codec = C;

    fn session(&self) -> &Session<H, C> {
        &self.session
    }

    fn take_worker(&self) -> Option<BackgroundWorker> {
        self.lock_worker().take()
    }
}

async fn dial(config: &EndpointConfig) -> Result<TcpStream> {
    info!("Connecting to {}:{}", config.address, config.port);

    let connecting = TcpStream::connect((config.address.as_str(), config.port));
    let connected = match config.connect_timeout {
        Some(limit) => tokio::time::timeout(limit, connecting)
            .await
            .map_err(|_| SocketError::Timeout(limit))?,
        None => connecting.await,
    };

    connected.map_err(|e| {
        warn!("Connection to {}:{} failed: {}", config.address, config.port, e);
        SocketError::connect_failed(&config.address, config.port, e)
    })
}
