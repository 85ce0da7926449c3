//! Event-driven client over tokio.
//!
//! [`Client::connect`] performs the opening handshake on any
//! `AsyncRead + AsyncWrite` stream and then spawns a read task. The task
//! feeds every chunk it reads to the connection [`Engine`], forwards the
//! resulting [`Event`]s through one ordered channel and writes whatever the
//! engine queued in reply (pongs, close echoes). Application sends go
//! through the same engine and the same writer lock, so the bytes of one
//! send are never interleaved with another.
//!
//! # Example
//!
//! ```no_run
//! use wsclient::{Client, Config, Event, HandshakeRequest};
//!
//! # async fn run() -> wsclient::Result<()> {
//! let stream = tokio::net::TcpStream::connect("127.0.0.1:9001").await?;
//! let request = HandshakeRequest::new("127.0.0.1:9001", "/chat");
//! let (client, mut events) = Client::connect(stream, request, Config::default(), 1).await?;
//!
//! client.send_text("hello").await?;
//! while let Some(event) = events.recv().await {
//!     if let Event::TextMessage(text) = event {
//!         println!("{text}");
//!         break;
//!     }
//! }
//! client.close(wsclient::CloseCode::Normal, "bye").await?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::BytesMut;
use log::{debug, trace, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{Notify, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::Config;
use crate::connection::{ConnectionState, Engine};
use crate::error::{Error, Result};
use crate::event::Event;
use crate::protocol::{CloseCode, Frame, HandshakeRequest};

/// Receiving side of a connection's event channel.
pub type EventReceiver = mpsc::UnboundedReceiver<Event>;

struct Shared<S> {
    id: u64,
    engine: Mutex<Engine>,
    writer: tokio::sync::Mutex<WriteHalf<S>>,
    events: mpsc::UnboundedSender<Event>,
    state_tx: watch::Sender<ConnectionState>,
    stopped: AtomicBool,
    shutdown: Notify,
    close_timeout: Duration,
}

impl<S> Shared<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    fn engine(&self) -> MutexGuard<'_, Engine> {
        self.engine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Runs `f` on the engine and forwards its events while still holding
    // the lock, so events reach the channel in the order they happened.
    fn with_engine<T>(&self, f: impl FnOnce(&mut Engine) -> (T, Vec<Event>)) -> T {
        let mut engine = self.engine();
        let (value, events) = f(&mut engine);
        for event in events {
            trace!("ws[{}] event {}", self.id, event.name());
            // A dropped receiver only means nobody is listening.
            let _ = self.events.send(event);
        }
        self.state_tx.send_replace(engine.state());
        value
    }

    fn state(&self) -> ConnectionState {
        self.engine().state()
    }

    /// Write everything the engine has queued.
    async fn flush(&self) -> Result<()> {
        let result = self.write_pending().await;
        match &result {
            Ok(()) => self.with_engine(|engine| {
                engine.outbound_flushed();
                ((), Vec::new())
            }),
            Err(err) => {
                let err = err.clone();
                self.with_engine(|engine| ((), engine.transport_closed(err)));
            }
        }
        result
    }

    async fn write_pending(&self) -> Result<()> {
        let mut writer = self.writer.lock().await;
        loop {
            let next = self.engine().poll_outbound();
            let Some(outgoing) = next else {
                return Ok(());
            };
            for chunk in outgoing.chunks() {
                writer.write_all(chunk).await?;
            }
            writer.flush().await?;
        }
    }

    async fn shutdown_writer(&self) {
        let mut writer = self.writer.lock().await;
        if let Err(err) = writer.shutdown().await {
            trace!("ws[{}] shutdown: {}", self.id, err);
        }
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.shutdown.notify_one();
    }
}

/// Handle to an open connection.
///
/// Dropping the handle stops the read task without a close handshake; call
/// [`close`](Self::close) first for a graceful shutdown.
pub struct Client<S> {
    shared: Arc<Shared<S>>,
    reader: Option<JoinHandle<()>>,
}

impl<S> std::fmt::Debug for Client<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").field("id", &self.shared.id).finish_non_exhaustive()
    }
}

impl Client<TcpStream> {
    /// Open a TCP connection to `addr` and perform the handshake for
    /// `request` on it.
    ///
    /// # Errors
    ///
    /// `Error::Io` if the TCP connection fails, otherwise as
    /// [`connect`](Client::connect).
    pub async fn connect_tcp(
        addr: &str,
        request: HandshakeRequest,
        config: Config,
        id: u64,
    ) -> Result<(Self, EventReceiver)> {
        debug!("ws[{}] connecting to {}", id, addr);
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Self::connect(stream, request, config, id).await
    }
}

impl<S> Client<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Perform the opening handshake on `stream` and start reading.
    ///
    /// Frames that arrive together with the handshake response are already
    /// processed when this returns, so their events are waiting in the
    /// receiver.
    ///
    /// # Errors
    ///
    /// - `Error::HandshakeTimeout` if no valid response arrives within
    ///   `config.timeouts.handshake`
    /// - `Error::InvalidHandshake` / `Error::HandshakeTooLarge` for a bad
    ///   response
    /// - `Error::Io` / `Error::ConnectionClosed` if the transport fails
    pub async fn connect(
        stream: S,
        request: HandshakeRequest,
        config: Config,
        id: u64,
    ) -> Result<(Self, EventReceiver)> {
        let engine = Engine::new(id, request, config);
        Self::connect_engine(stream, engine).await
    }

    /// Like [`connect`](Self::connect) with an engine built by the caller,
    /// for example one with a fixed handshake key.
    ///
    /// # Errors
    ///
    /// See [`connect`](Self::connect).
    pub async fn connect_engine(stream: S, mut engine: Engine) -> Result<(Self, EventReceiver)> {
        let id = engine.id();
        let config = engine.config().clone();
        engine.start_handshake()?;

        let (mut reader, writer) = tokio::io::split(stream);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(engine.state());
        let shared = Arc::new(Shared {
            id,
            engine: Mutex::new(engine),
            writer: tokio::sync::Mutex::new(writer),
            events: events_tx,
            state_tx,
            stopped: AtomicBool::new(false),
            shutdown: Notify::new(),
            close_timeout: config.timeouts.close,
        });

        let mut buf = BytesMut::with_capacity(config.read_buffer_size);
        let handshake = read_handshake(&shared, &mut reader, &mut buf);
        let outcome = match tokio::time::timeout(config.timeouts.handshake, handshake).await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::HandshakeTimeout(config.timeouts.handshake)),
        };
        if let Err(err) = outcome {
            warn!("ws[{}] handshake failed: {}", id, err);
            shared.with_engine(|engine| ((), engine.force_close()));
            shared.shutdown_writer().await;
            return Err(err);
        }

        // Frames that arrived with the response may already need answers.
        if shared.state() != ConnectionState::Closed {
            // Errors are already reported as events.
            let _ = shared.flush().await;
        }

        let task = tokio::spawn(read_loop(Arc::clone(&shared), reader, buf));
        Ok((
            Self {
                shared,
                reader: Some(task),
            },
            events_rx,
        ))
    }

    /// Connection id.
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Watch state changes.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    pub fn handshake_finished(&self) -> bool {
        self.shared.engine().handshake_finished()
    }

    pub fn response_status(&self) -> Option<u16> {
        self.shared.engine().response_status()
    }

    /// Handshake response headers keyed by lowercase name.
    pub fn response_headers(&self) -> Option<HashMap<String, String>> {
        self.shared.engine().response_headers().cloned()
    }

    pub fn has_sent_close(&self) -> bool {
        self.shared.engine().has_sent_close()
    }

    pub fn has_received_close(&self) -> bool {
        self.shared.engine().has_received_close()
    }

    pub fn closed_by_server(&self) -> bool {
        self.shared.engine().closed_by_server()
    }

    /// Send a text message, fragmented per the configured fragment size.
    ///
    /// # Errors
    ///
    /// `Error::InvalidState` unless open, `Error::MessageTooLarge`, or the
    /// transport error that ended the connection.
    pub async fn send_text(&self, text: &str) -> Result<()> {
        self.send(|engine| engine.send_text(text)).await
    }

    /// Send a text message in fragments of at most `per_size` characters.
    ///
    /// # Errors
    ///
    /// See [`send_text`](Self::send_text).
    pub async fn send_text_fragmented(&self, text: &str, per_size: usize) -> Result<()> {
        self.send(|engine| engine.send_text_fragmented(text, per_size)).await
    }

    /// Send a binary message, fragmented per the configured fragment size.
    ///
    /// # Errors
    ///
    /// See [`send_text`](Self::send_text).
    pub async fn send_binary(&self, data: &[u8]) -> Result<()> {
        self.send(|engine| engine.send_binary(data)).await
    }

    /// Send a binary message in fragments of at most `per_size` bytes.
    ///
    /// # Errors
    ///
    /// See [`send_text`](Self::send_text).
    pub async fn send_binary_fragmented(&self, data: &[u8], per_size: usize) -> Result<()> {
        self.send(|engine| engine.send_binary_fragmented(data, per_size)).await
    }

    /// Write a pre-built frame, optionally in chops of `chop_size` bytes.
    ///
    /// # Errors
    ///
    /// `Error::InvalidState` once closed, or a transport error.
    pub async fn send_frame(&self, frame: Frame, chop_size: Option<usize>) -> Result<()> {
        self.send(|engine| engine.send_frame(frame, chop_size)).await
    }

    /// Write bytes verbatim.
    ///
    /// # Errors
    ///
    /// `Error::InvalidState` once closed, or a transport error.
    pub async fn send_raw(&self, bytes: Vec<u8>) -> Result<()> {
        self.send(|engine| engine.send_raw(bytes)).await
    }

    /// # Errors
    ///
    /// `Error::InvalidState` unless open, `Error::ControlFrameTooLarge`
    /// above 125 bytes, or a transport error.
    pub async fn ping(&self, data: impl Into<Vec<u8>>) -> Result<()> {
        self.send(|engine| engine.ping(data)).await
    }

    /// # Errors
    ///
    /// See [`ping`](Self::ping).
    pub async fn pong(&self, data: impl Into<Vec<u8>>) -> Result<()> {
        self.send(|engine| engine.pong(data)).await
    }

    /// Run the close handshake and wait for it to finish.
    ///
    /// If the server does not answer within the configured close timeout the
    /// transport is torn down anyway. Returns once the connection is
    /// `Closed`.
    ///
    /// # Errors
    ///
    /// `Error::InvalidCloseCode` for reserved codes,
    /// `Error::ControlFrameTooLarge` for an oversized reason.
    pub async fn close(&self, code: CloseCode, reason: impl Into<Vec<u8>>) -> Result<()> {
        let queued = self.shared.with_engine(|engine| match engine.state() {
            ConnectionState::Closed => (Ok(false), Vec::new()),
            _ => (engine.close(code, reason).map(|()| true), Vec::new()),
        });
        if !queued? {
            return Ok(());
        }
        // A failed write already closed the engine.
        let _ = self.shared.flush().await;

        let mut states = self.state_changes();
        let closed = states.wait_for(|state| *state == ConnectionState::Closed);
        if tokio::time::timeout(self.shared.close_timeout, closed).await.is_err() {
            warn!("ws[{}] close timed out", self.shared.id);
            self.disconnect().await;
        }
        Ok(())
    }

    /// [`close`](Self::close) with code 1000 and no reason.
    ///
    /// # Errors
    ///
    /// See [`close`](Self::close).
    pub async fn close_normal(&self) -> Result<()> {
        self.close(CloseCode::Normal, "").await
    }

    /// Tear the transport down immediately, without a close handshake.
    pub async fn disconnect(&self) {
        debug!("ws[{}] disconnect", self.shared.id);
        self.shared.stop();
        self.shared.with_engine(|engine| ((), engine.force_close()));
        self.shared.shutdown_writer().await;
    }

    /// Wait for the read task to finish.
    pub async fn join(mut self) {
        if let Some(task) = self.reader.take() {
            if let Err(err) = task.await {
                warn!("ws[{}] read task failed: {}", self.shared.id, err);
            }
        }
    }

    async fn send(&self, queue: impl FnOnce(&mut Engine) -> Result<()>) -> Result<()> {
        self.shared.with_engine(|engine| (queue(engine), Vec::new()))?;
        self.shared.flush().await
    }
}

impl<S> Drop for Client<S> {
    fn drop(&mut self) {
        if self.reader.is_some() {
            self.shared.stopped.store(true, Ordering::Release);
            self.shared.shutdown.notify_one();
        }
    }
}

async fn read_handshake<S>(
    shared: &Shared<S>,
    reader: &mut ReadHalf<S>,
    buf: &mut BytesMut,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    shared.write_pending().await?;
    loop {
        buf.clear();
        if reader.read_buf(buf).await? == 0 {
            return Err(Error::InvalidHandshake(
                "connection closed during handshake".to_string(),
            ));
        }
        let opened = shared.with_engine(|engine| match engine.feed(&buf[..]) {
            Ok(events) => (Ok(engine.state() == ConnectionState::Open), events),
            Err(err) => (Err(err), Vec::new()),
        });
        if opened? {
            return Ok(());
        }
    }
}

async fn read_loop<S>(shared: Arc<Shared<S>>, mut reader: ReadHalf<S>, mut buf: BytesMut)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let id = shared.id;
    let mut close_deadline: Option<Instant> = None;

    loop {
        if shared.stopped.load(Ordering::Acquire) {
            debug!("ws[{}] read loop stopped", id);
            break;
        }
        match shared.state() {
            ConnectionState::Closed => break,
            ConnectionState::Closing if close_deadline.is_none() => {
                close_deadline = Some(Instant::now() + shared.close_timeout);
            }
            _ => {}
        }

        buf.clear();
        let deadline = close_deadline;
        let read = async {
            match deadline {
                Some(at) => tokio::time::timeout_at(at, reader.read_buf(&mut buf)).await.ok(),
                None => Some(reader.read_buf(&mut buf).await),
            }
        };
        let read = tokio::select! {
            read = read => read,
            () = shared.shutdown.notified() => continue,
        };

        let Some(read) = read else {
            warn!("ws[{}] no close from server within {:?}", id, shared.close_timeout);
            shared.with_engine(|engine| ((), engine.force_close()));
            break;
        };

        match read {
            Ok(0) => {
                shared.with_engine(|engine| ((), engine.transport_closed(Error::ConnectionClosed)));
                break;
            }
            Ok(n) => {
                trace!("ws[{}] read {} bytes", id, n);
                shared.with_engine(|engine| match engine.feed(&buf) {
                    Ok(events) => ((), events),
                    Err(err) => ((), vec![Event::Errored(err)]),
                });
                if shared.flush().await.is_err() {
                    break;
                }
            }
            Err(err) => {
                shared.with_engine(|engine| ((), engine.transport_closed(err.into())));
                break;
            }
        }
    }

    shared.shutdown_writer().await;
    debug!("ws[{}] read loop finished", id);
}
