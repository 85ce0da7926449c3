//! Connection factory.
//!
//! A [`ClientFactory`] hands out connection ids, so log lines from
//! different connections can be told apart. Ids are scoped to the factory;
//! two factories may issue the same id.

use std::net::ToSocketAddrs;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::blocking::{self, BlockingClient, BlockingTransport};
use crate::config::Config;
use crate::connection::Engine;
use crate::error::Result;
use crate::protocol::HandshakeRequest;

/// Opens connections that share one [`Config`] and an id sequence.
#[derive(Debug, Default)]
pub struct ClientFactory {
    config: Config,
    next_id: AtomicU64,
}

impl ClientFactory {
    /// Factory whose first connection gets id 0.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self::starting_at(config, 0)
    }

    /// Factory whose first connection gets id `first_id`.
    #[must_use]
    pub fn starting_at(config: Config, first_id: u64) -> Self {
        Self {
            config,
            next_id: AtomicU64::new(first_id),
        }
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Reserve the next connection id.
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// A sans-I/O engine for callers that move the bytes themselves.
    pub fn engine(&self, request: HandshakeRequest) -> Engine {
        Engine::new(self.next_id(), request, self.config.clone())
    }

    /// Run the handshake on `stream` with the blocking driver.
    ///
    /// # Errors
    ///
    /// See [`BlockingClient::connect`].
    pub fn connect_blocking<S: BlockingTransport>(
        &self,
        stream: S,
        request: HandshakeRequest,
    ) -> Result<(BlockingClient<S>, blocking::EventReceiver)> {
        BlockingClient::connect_engine(stream, self.engine(request))
    }

    /// Connect over TCP with the blocking driver.
    ///
    /// # Errors
    ///
    /// See [`BlockingClient::connect_tcp`].
    pub fn connect_blocking_tcp(
        &self,
        addr: impl ToSocketAddrs,
        request: HandshakeRequest,
    ) -> Result<(BlockingClient<std::net::TcpStream>, blocking::EventReceiver)> {
        BlockingClient::connect_tcp(addr, request, self.config.clone(), self.next_id())
    }
}

#[cfg(feature = "async-tokio")]
mod tokio_support {
    use tokio::io::{AsyncRead, AsyncWrite};
    use tokio::net::TcpStream;

    use super::ClientFactory;
    use crate::client::{Client, EventReceiver};
    use crate::error::Result;
    use crate::protocol::HandshakeRequest;

    impl ClientFactory {
        /// Run the handshake on `stream` with the event-driven driver.
        ///
        /// # Errors
        ///
        /// See [`Client::connect`].
        pub async fn connect<S>(
            &self,
            stream: S,
            request: HandshakeRequest,
        ) -> Result<(Client<S>, EventReceiver)>
        where
            S: AsyncRead + AsyncWrite + Send + 'static,
        {
            Client::connect_engine(stream, self.engine(request)).await
        }

        /// Connect over TCP with the event-driven driver. The `Host` header
        /// is `addr`.
        ///
        /// # Errors
        ///
        /// See [`Client::connect_tcp`].
        pub async fn connect_tcp(
            &self,
            addr: &str,
            path: &str,
        ) -> Result<(Client<TcpStream>, EventReceiver)> {
            let request = HandshakeRequest::new(addr, path);
            Client::connect_tcp(addr, request, self.config.clone(), self.next_id()).await
        }
    }
}
