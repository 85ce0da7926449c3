//! Client connection state machine.
//!
//! [`Engine`] holds everything one connection knows: its state, close
//! flags, handshake response, reassembly buffers and the queue of bytes
//! waiting to be written. It never touches a socket, so the same engine
//! backs both the event-driven and the blocking driver.

mod engine;
pub mod fragmenter;
mod state;

pub use engine::{Engine, Outgoing};
pub use fragmenter::MessageFragmenter;
pub use state::ConnectionState;
