//! Ping-pong example - a server and a client exchanging messages in one process.
//!
//! Usage: `cargo run --example ping_pong -- [count]`

use anyhow::Result;
use jsonsock_core::{
    ClientEndpoint, Endpoint, EndpointConfig, EndpointHandler, Message, SendMode, ServerEndpoint,
};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Forwards inbound messages to the task that owns the endpoint.
struct Forwarder {
    name: &'static str,
    inbox: mpsc::UnboundedSender<Message>,
}

#[async_trait::async_trait]
impl EndpointHandler for Forwarder {
    async fn on_connection(&self) {
        info!("{} connected", self.name);
    }

    async fn on_disconnection(&self) {
        info!("{} disconnected", self.name);
    }

    async fn on_receive(&self, message: Message) {
        let _ = self.inbox.send(message);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    FmtSubscriber::builder()
        .with_max_level(Level::DEBUG)
        .with_target(false)
        .compact()
        .init();

    let count: u64 = std::env::args()
        .nth(1)
        .map(|arg| arg.parse())
        .transpose()?
        .unwrap_or(3);

    let (server_tx, mut server_inbox) = mpsc::unbounded_channel();
    let server = Arc::new(
        ServerEndpoint::open(
            EndpointConfig::server(0).with_address("127.0.0.1"),
            Forwarder {
                name: "server",
                inbox: server_tx,
            },
        )
        .await?,
    );
    let port = server.local_addr().map(|addr| addr.port()).unwrap_or_default();

    // The server blocks in its own task; the client runs standalone.
    let listening = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.listen().await })
    };

    let (client_tx, mut client_inbox) = mpsc::unbounded_channel();
    let client = ClientEndpoint::new(
        EndpointConfig::client("127.0.0.1", port).with_standalone(true),
        Forwarder {
            name: "client",
            inbox: client_tx,
        },
    );
    client.connect().await?;
    client.wait_connected().await?;

    for seq in 0..count {
        client
            .send(&json!({"type": "ping", "seq": seq}), SendMode::Flushed)
            .await;

        if let Some(ping) = server_inbox.recv().await {
            println!("server got {}", ping);
            server
                .send(&json!({"type": "pong", "seq": ping["seq"]}), SendMode::Queued)
                .await;
        }
        if let Some(pong) = client_inbox.recv().await {
            println!("client got {}", pong);
        }
    }

    client.disconnect().await;
    listening.await??;
    server.disconnect().await;

    if let Some(worker) = client.take_worker() {
        worker.join().await?;
    }
    Ok(())
}
