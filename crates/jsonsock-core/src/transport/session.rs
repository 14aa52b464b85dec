//! Connection session shared by both endpoint roles.
//!
//! A [`Session`] owns everything tied to one connection: the read loop that
//! feeds the handler, the writer task that drains the outbound queue, and the
//! shutdown signal used by `disconnect`. Client and server differ only in how
//! the stream is obtained, which they pass to [`Session::drive`] as a future.
//!
//! # Concurrency
//!
//! The read half is owned by the task driving the session, the write half by a
//! dedicated writer task. Every send goes through a bounded FIFO queue, so
//! frames leave in enqueue order and never interleave on the wire.

use super::frame::{encode_frame, read_frame, write_frame};
use crate::codec::{Codec, Message};
use crate::config::EndpointConfig;
use crate::endpoint::{EndpointHandler, SendMode};
use crate::error::{Result, SocketError};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Lifecycle of the connection behind a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No attempt made yet.
    Idle,
    /// Dialing (client) or waiting in accept (server).
    Connecting,
    Connected,
    /// The last connection or attempt has ended.
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

struct Outbound {
    frame: Vec<u8>,
    written: Option<oneshot::Sender<Result<()>>>,
}

/// Per-connection resources. Only touched under the session lock.
#[derive(Default)]
struct Link {
    /// Bumped on every attempt so a stale attempt never tears down a newer one.
    epoch: u64,
    shutdown: Option<watch::Sender<bool>>,
    outbound: Option<mpsc::Sender<Outbound>>,
    writer: Option<JoinHandle<()>>,
    peer: Option<SocketAddr>,
}

/// A reserved connection attempt, handed from `begin` to `drive`.
pub(crate) struct Attempt {
    epoch: u64,
    shutdown: watch::Receiver<bool>,
}

/// Connection session shared by [`ClientEndpoint`](crate::ClientEndpoint) and
/// [`ServerEndpoint`](crate::ServerEndpoint).
pub struct Session<H, C> {
    label: String,
    config: EndpointConfig,
    handler: Arc<H>,
    codec: C,
    state: watch::Sender<ConnectionState>,
    link: Mutex<Link>,
}

impl<H: EndpointHandler, C: Codec> Session<H, C> {
    pub(crate) fn new(label: String, config: EndpointConfig, handler: H, codec: C) -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        Self {
            label,
            config,
            handler: Arc::new(handler),
            codec,
            state,
            link: Mutex::new(Link::default()),
        }
    }

    /// Name used in log lines, e.g. `client 127.0.0.1:4000`.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    pub fn handler(&self) -> &Arc<H> {
        &self.handler
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Address of the connected peer.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.lock_link().peer
    }

    /// Wait until the pending attempt has connected.
    ///
    /// Fails with [`SocketError::Closed`] if the attempt ends first. Waits
    /// indefinitely while no attempt has been started.
    pub async fn wait_connected(&self) -> Result<()> {
        let mut state = self.state.subscribe();
        let connected = matches!(
            *state
                .wait_for(|s| matches!(s, ConnectionState::Connected | ConnectionState::Closed))
                .await
                .map_err(|_| SocketError::Closed)?,
            ConnectionState::Connected
        );
        if connected {
            Ok(())
        } else {
            Err(SocketError::Closed)
        }
    }

    /// Reserve the session for a new attempt.
    pub(crate) fn begin(&self) -> Result<Attempt> {
        let mut link = self.lock_link();
        if matches!(
            self.state(),
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            return Err(SocketError::AlreadyConnected);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        link.epoch += 1;
        link.shutdown = Some(shutdown_tx);
        self.state.send_replace(ConnectionState::Connecting);

        Ok(Attempt {
            epoch: link.epoch,
            shutdown: shutdown_rx,
        })
    }

    /// Obtain a stream with `open`, then run the connection until it ends.
    ///
    /// Returns `Ok(())` when the peer closes the stream or `disconnect` is
    /// called, otherwise the error that stopped the attempt or the read loop.
    pub(crate) async fn drive<F>(&self, attempt: Attempt, open: F) -> Result<()>
    where
        F: Future<Output = Result<TcpStream>> + Send,
    {
        let Attempt {
            epoch,
            mut shutdown,
        } = attempt;

        let opened = tokio::select! {
            biased;
            _ = shutdown.changed() => Err(SocketError::Closed),
            opened = open => opened,
        };

        match opened {
            Ok(stream) => self.serve(epoch, stream, shutdown).await,
            Err(e) => {
                self.abandon(epoch);
                Err(e)
            }
        }
    }

    async fn serve(
        &self,
        epoch: u64,
        stream: TcpStream,
        shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let peer = stream.peer_addr().ok();
        let (reader, writer) = stream.into_split();
        let (outbound_tx, outbound_rx) = mpsc::channel(self.config.send_queue_capacity.max(1));

        {
            let mut link = self.lock_link();
            if link.epoch != epoch
                || *shutdown.borrow()
                || self.state() != ConnectionState::Connecting
            {
                debug!("{}: attempt closed before the connection was installed", self.label);
                return Err(SocketError::Closed);
            }
            link.outbound = Some(outbound_tx);
            link.writer = Some(tokio::spawn(write_loop(
                writer,
                outbound_rx,
                self.label.clone(),
            )));
            link.peer = peer;
            self.state.send_replace(ConnectionState::Connected);
        }

        match peer {
            Some(peer) => info!("{}: connected to {}", self.label, peer),
            None => info!("{}: connected", self.label),
        }

        self.handler.on_connection().await;
        let result = self.read_loop(reader, shutdown).await;
        self.finish(epoch, &result).await;
        result
    }

    async fn read_loop(
        &self,
        mut reader: OwnedReadHalf,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        loop {
            let frame = tokio::select! {
                biased;
                _ = shutdown.changed() => return Ok(()),
                frame = self.next_frame(&mut reader) => frame?,
            };

            let Some(text) = frame else {
                return Ok(());
            };
            if text.is_empty() {
                trace!("{}: keepalive", self.label);
                continue;
            }

            let message = self.codec.decode(&text)?;
            self.handler.on_receive(message).await;
        }
    }

    async fn next_frame(&self, reader: &mut OwnedReadHalf) -> Result<Option<String>> {
        match self.config.read_timeout() {
            Some(limit) => tokio::time::timeout(limit, read_frame(reader))
                .await
                .map_err(|_| SocketError::Timeout(limit))?,
            None => read_frame(reader).await,
        }
    }

    /// Tear down after the read loop ended on its own.
    async fn finish(&self, epoch: u64, result: &Result<()>) {
        let released = {
            let mut link = self.lock_link();
            if link.epoch != epoch || link.outbound.is_none() {
                // disconnect() already released the connection
                None
            } else {
                link.shutdown = None;
                link.peer = None;
                self.state.send_replace(ConnectionState::Closed);
                Some((link.outbound.take(), link.writer.take()))
            }
        };
        let Some((outbound, writer)) = released else {
            return;
        };

        drop(outbound);
        self.release_writer(writer).await;

        match result {
            Ok(()) => info!("{}: peer closed the connection", self.label),
            Err(e) => warn!("{}: connection lost: {}", self.label, e),
        }
        self.handler.on_connection_lost(result.as_ref().err()).await;
    }

    /// Let the writer drain frames already queued, then stop it.
    ///
    /// The drain is bounded by `drain_timeout`: a peer that stops reading
    /// would otherwise keep the writer parked in a write forever. Aborting the
    /// writer drops the write half and fails every pending flushed send.
    async fn release_writer(&self, writer: Option<JoinHandle<()>>) {
        let Some(mut writer) = writer else {
            return;
        };
        match tokio::time::timeout(self.config.drain_timeout, &mut writer).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("{}: writer task failed: {}", self.label, e),
            Err(_) => {
                warn!(
                    "{}: peer stopped reading, dropping frames not written within {:?}",
                    self.label, self.config.drain_timeout
                );
                writer.abort();
                let _ = writer.await;
            }
        }
    }

    fn abandon(&self, epoch: u64) {
        let mut link = self.lock_link();
        if link.epoch == epoch && self.state() == ConnectionState::Connecting {
            link.shutdown = None;
            self.state.send_replace(ConnectionState::Closed);
        }
    }

    /// Send a message to the peer.
    ///
    /// Returns `false` without doing any IO when not connected, and when the
    /// message cannot be encoded, does not fit in a frame, or (queued mode) the
    /// queue is full. A `true` result means the writer accepted the frame;
    /// write failures are logged, not returned. A flushed send also returns
    /// `false` when the connection is torn down before its frame is written.
    pub async fn send(&self, message: &Message, mode: SendMode) -> bool {
        if !self.is_connected() {
            debug!("{}: send rejected, not connected", self.label);
            return false;
        }
        let frame = match self.prepare(message) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("{}: dropping unsendable message: {}", self.label, e);
                return false;
            }
        };

        match mode {
            SendMode::Queued => self.enqueue(frame),
            SendMode::Flushed => match self.dispatch_flushed(frame).await {
                // A dropped ack means the writer was stopped before reaching the frame.
                Ok(written) => written.await.is_ok(),
                Err(e) => {
                    debug!("{}: send rejected: {}", self.label, e);
                    false
                }
            },
        }
    }

    /// Send a message and wait until it has been flushed, surfacing failures.
    pub async fn send_confirmed(&self, message: &Message) -> Result<()> {
        if !self.is_connected() {
            return Err(SocketError::NotConnected);
        }
        let frame = self.prepare(message)?;
        let written = self.dispatch_flushed(frame).await?;
        written.await.map_err(|_| SocketError::Closed)?
    }

    /// Enqueue an empty keepalive frame.
    pub fn send_keepalive(&self) -> bool {
        self.enqueue(vec![0, 0])
    }

    /// Tear down the connection.
    ///
    /// No-op returning `false` when idle or already closed. While an attempt is
    /// pending it aborts the attempt and returns `false`. While connected it
    /// stops the read loop, lets the writer flush frames already queued for at
    /// most `drain_timeout`, closes the stream, fires `on_disconnection` and
    /// returns `true`.
    pub async fn disconnect(&self) -> bool {
        let (outbound, writer) = {
            let mut link = self.lock_link();
            match self.state() {
                ConnectionState::Idle | ConnectionState::Closed => return false,
                ConnectionState::Connecting => {
                    if let Some(shutdown) = link.shutdown.take() {
                        let _ = shutdown.send(true);
                    }
                    self.state.send_replace(ConnectionState::Closed);
                    debug!("{}: aborted pending connection attempt", self.label);
                    return false;
                }
                ConnectionState::Connected => {
                    if let Some(shutdown) = link.shutdown.take() {
                        let _ = shutdown.send(true);
                    }
                    link.peer = None;
                    self.state.send_replace(ConnectionState::Closed);
                    (link.outbound.take(), link.writer.take())
                }
            }
        };

        drop(outbound);
        self.release_writer(writer).await;

        info!("{}: disconnected", self.label);
        self.handler.on_disconnection().await;
        true
    }

    fn prepare(&self, message: &Message) -> Result<Vec<u8>> {
        let text = self.codec.encode(message)?;
        encode_frame(&text)
    }

    fn outbound(&self) -> Result<mpsc::Sender<Outbound>> {
        self.lock_link()
            .outbound
            .clone()
            .ok_or(SocketError::NotConnected)
    }

    fn enqueue(&self, frame: Vec<u8>) -> bool {
        let sender = match self.outbound() {
            Ok(sender) => sender,
            Err(_) => {
                debug!("{}: send rejected, not connected", self.label);
                return false;
            }
        };

        match sender.try_send(Outbound {
            frame,
            written: None,
        }) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("{}: send queue full, dropping message", self.label);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("{}: writer stopped, dropping message", self.label);
                false
            }
        }
    }

    async fn dispatch_flushed(&self, frame: Vec<u8>) -> Result<oneshot::Receiver<Result<()>>> {
        let sender = self.outbound()?;
        let (written_tx, written_rx) = oneshot::channel();
        sender
            .send(Outbound {
                frame,
                written: Some(written_tx),
            })
            .await
            .map_err(|_| SocketError::Closed)?;
        Ok(written_rx)
    }

    fn lock_link(&self) -> MutexGuard<'_, Link> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::Receiver<Outbound>,
    label: String,
) {
    while let Some(Outbound { frame, written }) = outbound.recv().await {
        let result = write_frame(&mut writer, &frame).await;
        let failed = result.is_err();
        if let Err(e) = &result {
            warn!("{}: failed to write frame: {}", label, e);
        }
        if let Some(written) = written {
            let _ = written.send(result);
        }
        if failed {
            break;
        }
    }

    if let Err(e) = writer.shutdown().await {
        debug!("{}: write shutdown failed: {}", label, e);
    }
}
