//! jsonsock - point-to-point JSON message exchange over TCP.
//!
//! One side listens ([`ServerEndpoint`]), the other connects
//! ([`ClientEndpoint`]). Once connected, both sides push length-prefixed JSON
//! messages to each other. Inbound messages are delivered to an
//! [`EndpointHandler`] in arrival order; outbound messages go through a single
//! writer per connection, so sends from any number of tasks never interleave.
//!
//! # Example
//!
//! ```rust,ignore
//! use jsonsock_core::{ClientEndpoint, Endpoint, EndpointConfig, EndpointHandler, Message, SendMode};
//!
//! struct Printer;
//!
//! #[async_trait::async_trait]
//! impl EndpointHandler for Printer {
//!     async fn on_receive(&self, message: Message) {
//!         println!("received {}", message);
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> jsonsock_core::Result<()> {
//!     let config = EndpointConfig::client("127.0.0.1", 4000).with_standalone(true);
//!     let client = ClientEndpoint::new(config, Printer);
//!
//!     client.connect().await?;
//!     client.wait_connected().await?;
//!     client.send(&serde_json::json!({"type": "ping"}), SendMode::Flushed).await;
//!     client.disconnect().await;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod transport;
pub mod worker;

// Re-export commonly used types
pub use codec::{Codec, JsonCodec, Message};
pub use config::{EndpointConfig, SocketConfig};
pub use endpoint::{Endpoint, EndpointHandler, SendMode};
pub use error::{Result, SocketError};
pub use transport::{ClientEndpoint, ConnectionState, ServerEndpoint, ServerState, Session};
pub use worker::BackgroundWorker;
