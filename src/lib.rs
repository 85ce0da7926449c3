//! # wsclient - RFC 6455 WebSocket client
//!
//! `wsclient` implements the client side of the WebSocket protocol: the
//! opening handshake, frame encoding and decoding, masking, fragmentation
//! and the ping/pong/close control flow.
//!
//! ## Layers
//!
//! - [`protocol`]: frames, the incremental frame reassembler, control frame
//!   views, message reassembly and the handshake. No I/O.
//! - [`connection::Engine`]: the connection state machine. Feed it bytes,
//!   get [`Event`]s and bytes to write back.
//! - [`Client`] (tokio, default feature `async-tokio`) and
//!   [`BlockingClient`] (one thread per connection): drivers that move the
//!   bytes and enforce the handshake and close timeouts.
//! - [`ClientFactory`]: assigns connection ids and opens either driver.
//!
//! ## Quick Start
//!
//! ```no_run
//! use wsclient::{ClientFactory, Config, Event};
//!
//! # async fn run() -> wsclient::Result<()> {
//! let factory = ClientFactory::new(Config::default());
//! let (client, mut events) = factory.connect_tcp("127.0.0.1:9001", "/").await?;
//! client.send_text("ping me").await?;
//! client.ping("are you there").await?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         Event::PongReceived(_) => break,
//!         Event::Closed(_) => return Ok(()),
//!         _ => {}
//!     }
//! }
//! client.close_normal().await?;
//! # Ok(())
//! # }
//! ```

pub mod blocking;
pub mod config;
pub mod connection;
pub mod error;
pub mod event;
pub mod factory;
pub mod protocol;

#[cfg(feature = "async-tokio")]
pub mod client;

pub use blocking::{BlockingClient, BlockingTransport};
pub use config::{Config, Limits, TextDecoding, Timeouts};
pub use connection::{ConnectionState, Engine, Outgoing};
pub use error::{Error, ErrorKind, Result};
pub use event::Event;
pub use factory::ClientFactory;
pub use protocol::{
    CloseCode, CloseFrame, Frame, HandshakeKey, HandshakeRequest, HandshakeResponse, Message,
    OpCode, PingFrame, PongFrame, WS_GUID, compute_accept_key,
};

#[cfg(feature = "async-tokio")]
pub use client::{Client, EventReceiver};
