//! Contract shared by client and server endpoints.
//!
//! Applications implement [`EndpointHandler`] to react to lifecycle events and
//! inbound messages. Both [`ClientEndpoint`](crate::ClientEndpoint) and
//! [`ServerEndpoint`](crate::ServerEndpoint) implement [`Endpoint`], which
//! exposes the operations that do not depend on how the connection was made.

use crate::codec::{Codec, Message};
use crate::error::{Result, SocketError};
use crate::transport::Session;
use crate::worker::BackgroundWorker;
use std::sync::Arc;

/// Callbacks invoked by an endpoint's read loop.
///
/// All callbacks run on the task driving the connection: the caller's task in
/// blocking mode, the background worker's task in standalone mode. The next
/// frame is not read until `on_receive` returns.
#[async_trait::async_trait]
pub trait EndpointHandler: Send + Sync + 'static {
    /// Called once after the connection is established, before any message
    /// is delivered.
    async fn on_connection(&self) {}

    /// Called once when [`Endpoint::disconnect`] tears down an established
    /// connection.
    async fn on_disconnection(&self) {}

    /// Called once when the connection ends without [`Endpoint::disconnect`]:
    /// the peer closed the stream (`error` is `None`) or a read, decode or
    /// timeout error stopped the read loop.
    async fn on_connection_lost(&self, _error: Option<&SocketError>) {}

    /// Called for every inbound message, in arrival order.
    async fn on_receive(&self, message: Message);
}

/// How [`Endpoint::send`] hands a message to the connection's writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SendMode {
    /// Enqueue the frame and return without waiting for the write.
    #[default]
    Queued,
    /// Wait until the writer has written and flushed the frame.
    Flushed,
}

/// Operations common to both endpoint roles.
#[async_trait::async_trait]
pub trait Endpoint: Send + Sync {
    type Handler: EndpointHandler;
    type Codec: Codec;

    /// The connection session backing this endpoint.
    fn session(&self) -> &Session<Self::Handler, Self::Codec>;

    /// Take the background worker of the last standalone connect/listen.
    ///
    /// Always `None` for endpoints that are not standalone.
    fn take_worker(&self) -> Option<BackgroundWorker>;

    /// Whether connect/listen runs on a background task.
    fn is_standalone(&self) -> bool {
        self.session().config().standalone
    }

    fn is_connected(&self) -> bool {
        self.session().is_connected()
    }

    fn handler(&self) -> &Arc<Self::Handler> {
        self.session().handler()
    }

    /// Serialize a message with this endpoint's codec.
    fn encode(&self, message: &Message) -> Result<String> {
        self.session().codec().encode(message)
    }

    /// Parse frame text with this endpoint's codec.
    fn decode(&self, text: &str) -> Result<Message> {
        self.session().codec().decode(text)
    }

    /// Send a message to the peer.
    ///
    /// Returns whether the message was handed to the writer, not whether it
    /// reached the peer. Write failures are logged.
    async fn send(&self, message: &Message, mode: SendMode) -> bool {
        self.session().send(message, mode).await
    }

    /// Send a message and wait for it to be flushed, reporting any failure.
    async fn send_confirmed(&self, message: &Message) -> Result<()> {
        self.session().send_confirmed(message).await
    }

    /// Enqueue an empty keepalive frame.
    fn send_keepalive(&self) -> bool {
        self.session().send_keepalive()
    }

    /// Close the connection.
    ///
    /// Returns `true` if an established connection was torn down, in which
    /// case `on_disconnection` has fired. Calling it again is a no-op.
    async fn disconnect(&self) -> bool {
        self.session().disconnect().await
    }
}
