//! TCP transport for point-to-point message exchange.
//!
//! Both roles share one [`Session`] implementation and one wire format:
//! a 2-byte big-endian length prefix followed by the message text in modified
//! UTF-8 (see [`frame`]).
//!
//! # Architecture
//!
//! - **Client**: dials the configured address, then runs the session
//! - **Server**: binds explicitly, accepts a single peer, then runs the session
//! - **Session**: read loop, single writer task, lifecycle and disconnect

pub mod client;
pub mod frame;
pub mod server;
pub mod session;

pub use client::ClientEndpoint;
pub use server::{ServerEndpoint, ServerState};
pub use session::{ConnectionState, Session};
