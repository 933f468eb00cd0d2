// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Connection Manager
//!
//! Owns one stream socket endpoint (plain or TLS) in either server or client
//! role: setup, framed JSON send/receive, a cancellable background accept,
//! and the table of tracked messages.

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use native_tls::TlsAcceptor;
use parking_lot::{Mutex, MutexGuard, RwLock};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::config::SocketConfig;
use super::error::{NetworkError, NetworkResult};
use super::events::{ConnectionEvent, EventDispatcher, EventHandler};
use super::framing::{encode_json_line, ChunkSource, FrameReader};
use super::message::{JsonMap, MessageId, MessageStatus, MessageType, SocketMessage};
use super::stream::NetStream;
use super::tls::{self, ServerCertificate};
use super::tracker::MessageTracker;
use super::transport::{ConnectionState, JsonChannel, PeerInfo, SocketRole};

/// Connection manager for one JSON-over-TCP link.
///
/// All methods take `&self`; the manager is `Send + Sync` and can be shared
/// behind an `Arc` between the thread that reads and threads that send.
/// Sends are serialized internally. At most one read may be in flight.
///
/// # Example
///
/// ```ignore
/// use daqlink_core::network::{SocketComm, SocketConfig};
///
/// let server = SocketComm::new(SocketConfig::default())?;
/// server.create_socket("127.0.0.1", 8800, false, None)?;
/// server.accept_connection(None)?;
/// let command = server.read_json_message()?;
/// server.send_json_message(&serde_json::json!({"ok": true}))?;
/// server.close_socket();
/// ```
pub struct SocketComm {
    inner: Arc<Inner>,
}

struct Inner {
    config: SocketConfig,
    state: Mutex<ConnectionState>,
    listener: Mutex<Option<Listener>>,
    stream: Mutex<Option<NetStream>>,
    reader: Mutex<FrameReader>,
    /// Bumped whenever the stream is installed, severed or removed. Installs
    /// bump it under the stream lock, so a read never continues on a
    /// different connection.
    generation: AtomicU64,
    /// Second handle on the connected socket, so `close_socket` can fail a
    /// blocked read or write without waiting for the stream lock.
    severer: Mutex<Option<TcpStream>>,
    /// Set when a write failed part way; the peer may hold a partial line.
    write_broken: AtomicBool,
    /// Held by whichever accept, foreground or background, is running.
    accepting: AtomicBool,
    accept_task: Mutex<Option<AcceptTask>>,
    tracker: Mutex<MessageTracker>,
    events: RwLock<EventDispatcher>,
    peer: Mutex<Option<PeerInfo>>,
}

struct Listener {
    socket: TcpListener,
    acceptor: Option<TlsAcceptor>,
}

struct AcceptTask {
    handle: JoinHandle<()>,
    cancel: Arc<AtomicBool>,
}

impl SocketComm {
    /// Creates a disconnected manager.
    pub fn new(config: SocketConfig) -> NetworkResult<Self> {
        config.validate()?;
        let reader = FrameReader::new(config.frame_limits);
        Ok(SocketComm {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(ConnectionState::Disconnected),
                listener: Mutex::new(None),
                stream: Mutex::new(None),
                reader: Mutex::new(reader),
                generation: AtomicU64::new(0),
                severer: Mutex::new(None),
                write_broken: AtomicBool::new(false),
                accepting: AtomicBool::new(false),
                accept_task: Mutex::new(None),
                tracker: Mutex::new(MessageTracker::new()),
                events: RwLock::new(EventDispatcher::new()),
                peer: Mutex::new(None),
            }),
        })
    }

    /// Sets up the configured role: servers bind and listen, clients connect.
    pub fn open(&self) -> NetworkResult<()> {
        let config = &self.inner.config;
        match config.role {
            SocketRole::Server => self
                .create_socket(&config.host, config.port, config.use_tls, None)
                .map(|_| ()),
            SocketRole::Client => self
                .connect(
                    &config.host,
                    config.port,
                    config.use_tls,
                    config.connect_timeout(),
                )
                .map(|_| ()),
        }
    }

    pub fn config(&self) -> &SocketConfig {
        &self.inner.config
    }

    /// Registers a handler for connection events.
    pub fn add_event_handler(&self, handler: Arc<dyn EventHandler>) {
        self.inner.events.write().add_handler(handler);
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.lock()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Address of the connected peer.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.peer.lock().as_ref().map(|peer| peer.addr)
    }

    /// Local address of the connection, or of the listener while waiting.
    ///
    /// Useful after binding port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        if let Some(stream) = self.inner.stream.lock().as_ref() {
            return stream.local_addr().ok();
        }
        self.inner
            .listener
            .lock()
            .as_ref()
            .and_then(|listener| listener.socket.local_addr().ok())
    }

    /// Returns true if the current connection is TLS-encrypted.
    pub fn is_tls(&self) -> bool {
        self.inner
            .stream
            .lock()
            .as_ref()
            .is_some_and(NetStream::is_tls)
    }

    // ------------------------------------------------------------------
    // Setup
    // ------------------------------------------------------------------

    /// Binds and listens on `bind_address:port`. Returns the bound address.
    ///
    /// With `use_ssl`, accepted connections (never the listening socket) are
    /// wrapped using `certificate`, falling back to the configured server
    /// certificate. Missing or unusable material is a `Config` error.
    pub fn create_socket(
        &self,
        bind_address: &str,
        port: u16,
        use_ssl: bool,
        certificate: Option<&ServerCertificate>,
    ) -> NetworkResult<SocketAddr> {
        self.inner
            .require_state(ConnectionState::Disconnected, "create_socket")?;

        let acceptor = if use_ssl {
            let certificate = certificate
                .or(self.inner.config.server_certificate.as_ref())
                .ok_or_else(|| {
                    NetworkError::Config("TLS requested without certificate material".into())
                })?;
            Some(certificate.acceptor()?)
        } else {
            None
        };

        let socket = TcpListener::bind((bind_address, port))
            .map_err(|e| NetworkError::Bind(format!("{}:{}: {}", bind_address, port, e)))?;
        // accept is polled so a background accept can be cancelled
        socket
            .set_nonblocking(true)
            .map_err(|e| NetworkError::Bind(format!("cannot configure listener: {}", e)))?;
        let local = socket
            .local_addr()
            .map_err(|e| NetworkError::Bind(e.to_string()))?;

        {
            let mut state = self.inner.state.lock();
            if *state != ConnectionState::Disconnected {
                return Err(NetworkError::InvalidState(format!(
                    "create_socket raced with another setup call ({:?})",
                    *state
                )));
            }
            *self.inner.listener.lock() = Some(Listener { socket, acceptor });
            *state = ConnectionState::Listening;
        }

        info!(addr = %local, tls = use_ssl, "listening");
        self.inner.dispatch(ConnectionEvent::StateChanged {
            from: ConnectionState::Disconnected,
            to: ConnectionState::Listening,
        });
        Ok(local)
    }

    /// Connects to `host:port`, then performs the TLS handshake if `use_ssl`.
    ///
    /// `timeout` bounds TCP connect and handshake together. Every resolved
    /// address is tried in turn until one answers.
    pub fn connect(
        &self,
        host: &str,
        port: u16,
        use_ssl: bool,
        timeout: Duration,
    ) -> NetworkResult<PeerInfo> {
        self.inner
            .require_state(ConnectionState::Disconnected, "connect")?;

        let started = Instant::now();
        let addrs: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(|e| {
                NetworkError::ConnectionRefused(format!("cannot resolve {}:{}: {}", host, port, e))
            })?
            .collect();
        if addrs.is_empty() {
            return Err(NetworkError::ConnectionRefused(format!(
                "{}:{} resolved to no addresses",
                host, port
            )));
        }

        let mut last_error = None;
        let mut connected = None;
        for addr in &addrs {
            let remaining = timeout.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                break;
            }
            match TcpStream::connect_timeout(addr, remaining) {
                Ok(tcp) => {
                    connected = Some(tcp);
                    break;
                }
                Err(e) => {
                    debug!(addr = %addr, error = %e, "connect attempt failed");
                    last_error = Some(e);
                }
            }
        }

        let tcp = match (connected, last_error) {
            (Some(tcp), _) => tcp,
            (None, Some(e)) if e.kind() != ErrorKind::TimedOut && e.kind() != ErrorKind::WouldBlock => {
                return Err(NetworkError::ConnectionRefused(format!(
                    "{}:{}: {}",
                    host, port, e
                )))
            }
            (None, _) => {
                return Err(NetworkError::ConnectTimeout(format!(
                    "{}:{} not reachable within {:?}",
                    host, port, timeout
                )))
            }
        };

        let stream = if use_ssl {
            let remaining = timeout.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                return Err(NetworkError::ConnectTimeout(format!(
                    "no time left for TLS handshake with {}:{}",
                    host, port
                )));
            }
            match tls::client_handshake(&self.inner.config.server_trust, host, tcp, remaining) {
                Ok(stream) => NetStream::Tls(Box::new(stream)),
                Err(e) => {
                    warn!(host, port, error = %e, "TLS handshake failed");
                    return Err(e);
                }
            }
        } else {
            NetStream::Plain(tcp)
        };

        self.inner.install(stream, ConnectionState::Disconnected)
    }

    /// Blocks until a peer connects, or until `timeout` if given.
    ///
    /// Performs the server-side TLS handshake before returning when the
    /// listener was created with TLS. A failed handshake leaves the manager
    /// listening.
    pub fn accept_connection(&self, timeout: Option<Duration>) -> NetworkResult<PeerInfo> {
        self.inner.claim_accept()?;
        let _accepting = AcceptClaim(&self.inner.accepting);
        self.inner
            .require_state(ConnectionState::Listening, "accept_connection")?;

        let never_cancelled = AtomicBool::new(false);
        self.inner.accept_loop(timeout, &never_cancelled)
    }

    /// Accepts on a background thread and returns immediately.
    ///
    /// Exactly one of the callbacks runs, on the accept thread:
    /// `on_connected` with the peer once the connection is installed, or
    /// `on_error` (with `AcceptCancelled` after
    /// [`stop_waiting_for_connection`](Self::stop_waiting_for_connection)).
    pub fn threaded_accept_connection<C, E>(&self, on_connected: C, on_error: E) -> NetworkResult<()>
    where
        C: FnOnce(PeerInfo) + Send + 'static,
        E: FnOnce(NetworkError) + Send + 'static,
    {
        let mut slot = self.inner.accept_task.lock();
        if let Some(task) = slot.as_ref() {
            if !task.handle.is_finished() {
                return Err(NetworkError::InvalidState(
                    "a background accept is already running".into(),
                ));
            }
        }
        if let Some(finished) = slot.take() {
            let _ = finished.handle.join();
        }
        self.inner.claim_accept()?;
        if let Err(e) = self
            .inner
            .require_state(ConnectionState::Listening, "threaded_accept_connection")
        {
            self.inner.accepting.store(false, Ordering::SeqCst);
            return Err(e);
        }

        let cancel = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancel);
        let inner = Arc::clone(&self.inner);
        let spawned = thread::Builder::new()
            .name("daqlink-accept".into())
            .spawn(move || {
                // released before the callbacks so they may accept again
                let outcome = {
                    let _accepting = AcceptClaim(&inner.accepting);
                    inner.accept_loop(None, &flag)
                };
                match outcome {
                    Ok(peer) => on_connected(peer),
                    Err(e) => {
                        if !matches!(e, NetworkError::AcceptCancelled) {
                            warn!(error = %e, "background accept failed");
                            inner.dispatch(ConnectionEvent::Error {
                                message: e.to_string(),
                            });
                        }
                        on_error(e)
                    }
                }
            });
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.inner.accepting.store(false, Ordering::SeqCst);
                return Err(NetworkError::InvalidState(format!(
                    "cannot spawn accept thread: {}",
                    e
                )));
            }
        };

        *slot = Some(AcceptTask { handle, cancel });
        Ok(())
    }

    /// Cancels a background accept and waits for its thread to exit.
    ///
    /// A no-op when nothing is waiting. When called from the accept thread
    /// itself (inside a callback) the thread is detached instead of joined.
    pub fn stop_waiting_for_connection(&self) {
        let Some(task) = self.inner.accept_task.lock().take() else {
            return;
        };
        task.cancel.store(true, Ordering::SeqCst);

        if task.handle.thread().id() == thread::current().id() {
            return;
        }
        if task.handle.join().is_err() {
            warn!("accept thread panicked");
        }
    }

    /// Releases the connection and the listener. Idempotent.
    ///
    /// A read or write in progress fails with `ConnectionClosed`: writes at
    /// once, reads within one poll interval. Tracked messages are discarded.
    pub fn close_socket(&self) {
        self.inner.sever();
        self.stop_waiting_for_connection();
        self.inner.shutdown();
    }

    // ------------------------------------------------------------------
    // Message I/O
    // ------------------------------------------------------------------

    /// Serializes `payload` as one line and writes it.
    ///
    /// Concurrent sends never interleave. A write that fails part way may
    /// leave a truncated line at the peer, so every later send on the same
    /// connection fails with `ConnectionClosed` until `close_socket`.
    pub fn send_json_message<T: Serialize + ?Sized>(&self, payload: &T) -> NetworkResult<()> {
        let line = encode_json_line(payload)?;
        self.inner.write_line(&line)
    }

    /// Robust read: assembles the next line from small receives.
    pub fn read_json_message(&self) -> NetworkResult<JsonMap> {
        self.with_source(|reader, source| reader.read_json(source))
    }

    /// Fast read: one large receive, decodes the first JSON value.
    ///
    /// A message split across receives fails with `MalformedMessage`.
    pub fn read_json_message_fast(&self) -> NetworkResult<JsonMap> {
        self.with_source(|reader, source| reader.read_json_fast(source))
    }

    /// Fast read that splits on the first line break and carries the rest.
    pub fn read_json_message_fast_linebreak(&self) -> NetworkResult<JsonMap> {
        self.with_source(|reader, source| reader.read_json_fast_linebreak(source))
    }

    /// Robust read returning the undecoded line.
    pub fn read_line_raw(&self) -> NetworkResult<String> {
        self.with_source(|reader, source| reader.read_line_raw(source))
    }

    fn with_source<T>(
        &self,
        read: impl FnOnce(&mut FrameReader, &mut SocketSource<'_>) -> NetworkResult<T>,
    ) -> NetworkResult<T> {
        let generation = {
            let stream = self.inner.stream.lock();
            if stream.is_none() {
                return Err(NetworkError::NotConnected);
            }
            self.inner.generation.load(Ordering::SeqCst)
        };

        let result = {
            let mut reader = self.inner.reader.lock();
            let mut source = SocketSource {
                inner: &self.inner,
                generation,
                deadline: self
                    .inner
                    .config
                    .read_timeout()
                    .map(|timeout| Instant::now() + timeout),
            };
            read(&mut *reader, &mut source)
        };

        match &result {
            Err(NetworkError::MalformedMessage(reason)) => {
                warn!(%reason, "discarding malformed message");
            }
            Err(NetworkError::ConnectionClosed)
                if self.inner.generation.load(Ordering::SeqCst) == generation =>
            {
                warn!("peer closed the connection");
            }
            _ => {}
        }
        result
    }

    // ------------------------------------------------------------------
    // Message tracking
    // ------------------------------------------------------------------

    /// Starts tracking a pending message without sending it.
    pub fn track(&self, message_type: MessageType, payload: JsonMap) -> MessageId {
        self.inner.tracker.lock().track(message_type, payload)
    }

    /// Sends `payload` wrapped in a tracked envelope.
    ///
    /// The record ends up `Sent`, or `Failed` if the write fails, in which
    /// case the write error is returned.
    pub fn send_tracked(&self, message_type: MessageType, payload: JsonMap) -> NetworkResult<MessageId> {
        let message = SocketMessage::new(message_type, payload);
        let line = encode_json_line(&message.to_envelope())?;

        // held across the write so an acknowledgement cannot overtake `Sent`
        let mut tracker = self.inner.tracker.lock();
        let id = tracker.insert(message);
        let written = self.inner.write_line(&line);
        let status = if written.is_ok() {
            MessageStatus::Sent
        } else {
            MessageStatus::Failed
        };
        tracker.update_messages(&id, status, Instant::now())?;
        drop(tracker);

        self.inner.dispatch(ConnectionEvent::MessageStatusChanged {
            message_id: id.clone(),
            status,
        });
        written.map(|_| id)
    }

    /// Applies a status transition to a tracked message.
    ///
    /// Fails with `UnknownMessageId` or `InvalidTransition`.
    pub fn update_messages(
        &self,
        message_id: &str,
        new_status: MessageStatus,
        timestamp: Instant,
    ) -> NetworkResult<SocketMessage> {
        let updated = self
            .inner
            .tracker
            .lock()
            .update_messages(message_id, new_status, timestamp)?
            .clone();

        self.inner.dispatch(ConnectionEvent::MessageStatusChanged {
            message_id: updated.id().to_string(),
            status: new_status,
        });
        Ok(updated)
    }

    /// Marks the message answered by a response with `reply_to` as
    /// acknowledged now and returns the round-trip latency.
    pub fn acknowledge(&self, reply_to: &str) -> NetworkResult<Duration> {
        let message = self.update_messages(reply_to, MessageStatus::Acknowledged, Instant::now())?;
        Ok(message.round_trip_latency().unwrap_or_default())
    }

    pub fn tracked_message(&self, message_id: &str) -> Option<SocketMessage> {
        self.inner.tracker.lock().get(message_id).cloned()
    }

    /// Fails sent messages not acknowledged within `ack_timeout`.
    pub fn check_timeouts(&self, ack_timeout: Duration) -> Vec<MessageId> {
        let timed_out = self
            .inner
            .tracker
            .lock()
            .check_timeouts(ack_timeout, Instant::now());

        for id in &timed_out {
            warn!(message_id = %id, "no acknowledgement within {:?}", ack_timeout);
            self.inner.dispatch(ConnectionEvent::MessageStatusChanged {
                message_id: id.clone(),
                status: MessageStatus::Failed,
            });
        }
        timed_out
    }

    /// Drops acknowledged and failed records.
    pub fn purge_completed(&self) -> usize {
        self.inner.tracker.lock().purge_completed()
    }

    pub fn in_flight_ids(&self) -> Vec<MessageId> {
        self.inner.tracker.lock().in_flight_ids()
    }
}

impl Drop for SocketComm {
    fn drop(&mut self) {
        self.close_socket();
    }
}

impl JsonChannel for SocketComm {
    fn send_json(&self, payload: &JsonMap) -> NetworkResult<()> {
        self.send_json_message(payload)
    }

    fn receive_json(&self) -> NetworkResult<JsonMap> {
        self.read_json_message()
    }

    fn is_connected(&self) -> bool {
        SocketComm::is_connected(self)
    }
}

impl Inner {
    fn require_state(&self, expected: ConnectionState, operation: &str) -> NetworkResult<()> {
        let state = *self.state.lock();
        if state != expected {
            return Err(NetworkError::InvalidState(format!(
                "{} requires {:?}, connection is {:?}",
                operation, expected, state
            )));
        }
        Ok(())
    }

    fn dispatch(&self, event: ConnectionEvent) {
        // handlers run without any lock held
        let dispatcher = self.events.read().clone();
        dispatcher.dispatch(event);
    }

    /// Polls the non-blocking listener until a peer arrives, the timeout
    /// elapses or `cancel` is set.
    fn accept_loop(&self, timeout: Option<Duration>, cancel: &AtomicBool) -> NetworkResult<PeerInfo> {
        let started = Instant::now();
        let deadline = timeout.map(|t| started + t);
        let poll = self.config.accept_poll_interval();
        let log_every = self.config.waiting_log_interval();
        let mut next_log = started;

        loop {
            if cancel.load(Ordering::SeqCst) {
                debug!("stopped waiting for connection");
                return Err(NetworkError::AcceptCancelled);
            }

            let accepted = {
                let guard = self.listener.lock();
                let listener = guard.as_ref().ok_or(NetworkError::ConnectionClosed)?;
                match listener.socket.accept() {
                    Ok((tcp, addr)) => Some((tcp, addr, listener.acceptor.clone())),
                    Err(e)
                        if matches!(
                            e.kind(),
                            ErrorKind::WouldBlock | ErrorKind::Interrupted | ErrorKind::ConnectionAborted
                        ) =>
                    {
                        None
                    }
                    Err(e) => {
                        return Err(NetworkError::ReceiveFailed(format!("accept failed: {}", e)))
                    }
                }
            };

            if let Some((tcp, addr, acceptor)) = accepted {
                return self.finish_accept(tcp, addr, acceptor, cancel);
            }

            let now = Instant::now();
            if let (Some(deadline), Some(timeout)) = (deadline, timeout) {
                if now >= deadline {
                    return Err(NetworkError::AcceptTimeout(timeout));
                }
            }
            if now >= next_log {
                debug!("waiting for connection...");
                next_log = now + log_every;
            }

            let nap = match deadline {
                Some(deadline) => poll.min(deadline.saturating_duration_since(now)),
                None => poll,
            };
            thread::sleep(nap);
        }
    }

    fn finish_accept(
        &self,
        tcp: TcpStream,
        addr: SocketAddr,
        acceptor: Option<TlsAcceptor>,
        cancel: &AtomicBool,
    ) -> NetworkResult<PeerInfo> {
        // accepted sockets may inherit O_NONBLOCK from the listener
        tcp.set_nonblocking(false)
            .map_err(|e| NetworkError::ReceiveFailed(format!("cannot configure {}: {}", addr, e)))?;

        let stream = match acceptor {
            Some(acceptor) => {
                let handshake = tls::server_handshake(
                    &acceptor,
                    tcp,
                    self.config.handshake_timeout(),
                    self.config.accept_poll_interval(),
                    cancel,
                );
                match handshake {
                    Ok(stream) => NetStream::Tls(Box::new(stream)),
                    Err(NetworkError::AcceptCancelled) => {
                        debug!(peer = %addr, "stopped waiting during TLS handshake");
                        return Err(NetworkError::AcceptCancelled);
                    }
                    Err(e) => {
                        warn!(peer = %addr, error = %e, "TLS handshake failed");
                        return Err(e);
                    }
                }
            }
            None => NetStream::Plain(tcp),
        };

        self.install(stream, ConnectionState::Listening)
    }

    /// Makes `stream` the current connection if the state is still `expected`.
    fn install(&self, mut stream: NetStream, expected: ConnectionState) -> NetworkResult<PeerInfo> {
        let addr = stream
            .peer_addr()
            .map_err(|e| NetworkError::from_stream_io(e, NetworkError::ReceiveFailed))?;
        let peer = PeerInfo {
            addr,
            tls: stream.is_tls(),
        };

        // the read timeout is the poll tick that lets sends and close interleave
        stream
            .set_read_timeout(Some(self.config.io_poll_interval()))
            .and_then(|_| stream.set_write_timeout(Some(self.config.write_timeout())))
            .map_err(|e| NetworkError::Config(format!("cannot set socket timeouts: {}", e)))?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "cannot disable Nagle");
        }
        let severer = stream
            .try_clone_tcp()
            .map_err(|e| NetworkError::Config(format!("cannot clone socket handle: {}", e)))?;
        self.reader.lock().clear();

        let from = {
            let mut state = self.state.lock();
            if *state != expected {
                stream.shutdown();
                return Err(NetworkError::ConnectionClosed);
            }
            {
                let mut slot = self.stream.lock();
                self.generation.fetch_add(1, Ordering::SeqCst);
                self.write_broken.store(false, Ordering::SeqCst);
                *slot = Some(stream);
            }
            *self.severer.lock() = Some(severer);
            *self.peer.lock() = Some(peer.clone());
            std::mem::replace(&mut *state, ConnectionState::Connected)
        };

        info!(peer = %peer.addr, tls = peer.tls, "connection established");
        self.dispatch(ConnectionEvent::StateChanged {
            from,
            to: ConnectionState::Connected,
        });
        self.dispatch(ConnectionEvent::PeerConnected { peer: peer.clone() });
        Ok(peer)
    }

    fn write_line(&self, line: &[u8]) -> NetworkResult<()> {
        let mut guard = self.stream.lock();
        let generation = self.generation.load(Ordering::SeqCst);
        let stream = guard.as_mut().ok_or(NetworkError::NotConnected)?;
        if self.write_broken.load(Ordering::SeqCst) {
            return Err(NetworkError::ConnectionClosed);
        }

        match stream.write_all(line).and_then(|_| stream.flush()) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.write_broken.store(true, Ordering::SeqCst);
                if self.generation.load(Ordering::SeqCst) != generation {
                    return Err(NetworkError::ConnectionClosed);
                }
                warn!(error = %e, "write failed, refusing further sends on this connection");
                Err(NetworkError::from_stream_io(e, NetworkError::SendFailed))
            }
        }
    }

    /// Claims the listener for one accept.
    fn claim_accept(&self) -> NetworkResult<()> {
        self.accepting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(|_| NetworkError::InvalidState("another accept is already running".into()))
    }

    /// Shuts the socket down underneath the stream lock holder.
    ///
    /// Bumps the generation first so the interrupted read or write reports
    /// `ConnectionClosed`.
    fn sever(&self) {
        let Some(tcp) = self.severer.lock().take() else {
            return;
        };
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = tcp.shutdown(Shutdown::Both) {
            debug!(error = %e, "socket already shut down");
        }
    }

    fn shutdown(&self) {
        let (from, stream, listener) = {
            let mut state = self.state.lock();
            let stream = {
                let mut slot = self.stream.lock();
                self.generation.fetch_add(1, Ordering::SeqCst);
                slot.take()
            };
            let listener = self.listener.lock().take();
            let from = std::mem::replace(&mut *state, ConnectionState::Disconnected);
            (from, stream, listener)
        };

        self.severer.lock().take();
        self.write_broken.store(false, Ordering::SeqCst);
        if let Some(mut stream) = stream {
            stream.shutdown();
        }
        drop(listener);
        *self.peer.lock() = None;
        self.tracker.lock().clear();
        self.reader.lock().clear();

        if from != ConnectionState::Disconnected {
            debug!(from = ?from, "socket closed");
            self.dispatch(ConnectionEvent::StateChanged {
                from,
                to: ConnectionState::Disconnected,
            });
        }
    }
}

/// Releases an accept claim when the accept ends.
struct AcceptClaim<'a>(&'a AtomicBool);

impl Drop for AcceptClaim<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Receives from the shared stream one poll tick at a time.
///
/// The stream lock is released between ticks so sends and `close_socket`
/// are never starved by a waiting read.
struct SocketSource<'a> {
    inner: &'a Inner,
    generation: u64,
    deadline: Option<Instant>,
}

impl ChunkSource for SocketSource<'_> {
    fn recv(&mut self, buf: &mut [u8]) -> NetworkResult<usize> {
        loop {
            if let Some(deadline) = self.deadline {
                if Instant::now() >= deadline {
                    return Err(NetworkError::ReadTimeout);
                }
            }

            let mut guard = self.inner.stream.lock();
            if self.inner.generation.load(Ordering::SeqCst) != self.generation {
                return Err(NetworkError::ConnectionClosed);
            }
            let stream = guard.as_mut().ok_or(NetworkError::ConnectionClosed)?;
            match stream.read(buf) {
                Ok(n) => return Ok(n),
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                    ) =>
                {
                    MutexGuard::unlock_fair(guard);
                }
                Err(e) => return Err(NetworkError::from_stream_io(e, NetworkError::ReceiveFailed)),
            }
        }
    }
}
