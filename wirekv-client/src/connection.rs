//! # Connection
//!
//! Purpose: Own one socket (plain or TLS) to the server, run the connect
//! handshake, and drive every command through a single retry loop that
//! reconnects transparently after transient faults.
//!
//! ## Design Principles
//! 1. **Single Owner**: Every operation takes `&mut self`; pipelines and
//!    transactions borrow the connection mutably for their whole lifetime.
//! 2. **Lazy Transport**: The socket is opened on first use and reopened when a
//!    fault dropped it or an idle probe finds it closed.
//! 3. **One Choke Point**: `with_retry` is the only place that classifies faults,
//!    sleeps, and reconnects.
//! 4. **Generations**: Each successful connect bumps a counter so queued work can
//!    tell that bytes written to an earlier stream are gone.

use std::io::{self, BufReader};
use std::net::{TcpStream, ToSocketAddrs};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use wirekv_common::{commands, encode_frame, read_reply, CommandFrame, Reply};

use crate::config::ClientConfig;
use crate::decode::FromReply;
use crate::error::{classify, ClientError, ClientResult, Fault};
use crate::retry::Retry;
use crate::send_buffer::{ChunkPool, SendBuffer};
use crate::stats::{ClientStats, StatsSnapshot};
use crate::stream::Transport;
use crate::version::ServerVersion;

/// Lifecycle state of a `Connection`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No stream; the next command connects.
    Disconnected,
    /// Connect and handshake in progress.
    Connecting,
    /// Stream open and handshake complete.
    Ready,
    /// Stream dropped after an idle probe found it closed.
    IdleExpired,
    /// Stream dropped after a transport or protocol fault.
    Broken,
}

/// A single-owner connection to one server.
pub struct Connection {
    config: ClientConfig,
    reader: Option<BufReader<Transport>>,
    send_buffer: SendBuffer,
    line_buf: Vec<u8>,
    state: ConnectionState,
    server_version: Option<ServerVersion>,
    generation: u64,
    last_used: Instant,
    deactivated_at: Option<Instant>,
    stats: ClientStats,
}

impl Connection {
    /// Creates a connection without opening the socket.
    pub fn new(config: ClientConfig) -> ClientResult<Self> {
        config.validate()?;
        let pool = ChunkPool::for_chunk_size(config.chunk_size);
        Ok(Connection {
            config,
            reader: None,
            send_buffer: SendBuffer::new(pool),
            line_buf: Vec::with_capacity(64),
            state: ConnectionState::Disconnected,
            server_version: None,
            generation: 0,
            last_used: Instant::now(),
            deactivated_at: None,
            stats: ClientStats::new(),
        })
    }

    /// Creates a connection and connects immediately.
    pub fn open(config: ClientConfig) -> ClientResult<Self> {
        let mut conn = Connection::new(config)?;
        conn.connect()?;
        Ok(conn)
    }

    /// Opens the transport and runs the handshake, replacing any current stream.
    ///
    /// The handshake sends AUTH when a password is configured, SELECT when the
    /// database is not 0, probes `INFO server` once per connection, and sends
    /// CLIENT SETNAME when a name is configured and the server supports it.
    pub fn connect(&mut self) -> ClientResult<()> {
        self.drop_stream(ConnectionState::Disconnected);
        self.state = ConnectionState::Connecting;

        let addr = self.config.addr();
        let transport = match self.open_transport() {
            Ok(transport) => transport,
            Err(source) => {
                self.state = ConnectionState::Disconnected;
                debug!(addr = %addr, error = %source, "connect failed");
                return Err(ClientError::Connect { addr, source });
            }
        };
        self.reader = Some(BufReader::new(transport));

        if let Err(err) = self.handshake() {
            self.drop_stream(ConnectionState::Disconnected);
            warn!(addr = %addr, error = %err, "handshake failed");
            return Err(match err {
                ClientError::Transport(source) => ClientError::Connect { addr, source },
                other => other,
            });
        }

        self.generation += 1;
        self.state = ConnectionState::Ready;
        self.last_used = Instant::now();
        if self.generation > 1 {
            self.stats.record_reconnect();
            info!(addr = %addr, generation = self.generation, "reconnected");
        } else {
            info!(addr = %addr, generation = self.generation, "connected");
        }
        Ok(())
    }

    fn open_transport(&self) -> io::Result<Transport> {
        let sock = self.dial()?;
        sock.set_nodelay(true)?;
        sock.set_write_timeout(non_zero(self.config.send_timeout))?;
        sock.set_read_timeout(non_zero(self.config.receive_timeout))?;

        match &self.config.tls {
            Some(tls) if self.config.ssl => {
                let server_name = tls.server_name.as_deref().unwrap_or(&self.config.host);
                Transport::upgrade(sock, tls.client_config.clone(), server_name)
            }
            _ => Ok(Transport::Plain(sock)),
        }
    }

    /// Tries every resolved address in order; the last failure wins.
    fn dial(&self) -> io::Result<TcpStream> {
        let timeout = non_zero(self.config.connect_timeout);
        let mut last_err = None;
        for addr in (self.config.host.as_str(), self.config.port).to_socket_addrs()? {
            let attempt = match timeout {
                Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(sock) => return Ok(sock),
                Err(err) => {
                    debug!(addr = %addr, error = %err, "address unreachable");
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::AddrNotAvailable, "host resolved to no addresses")
        }))
    }

    fn handshake(&mut self) -> ClientResult<()> {
        if let Some(password) = &self.config.password {
            let mut frame = CommandFrame::new(commands::AUTH);
            if let Some(username) = &self.config.username {
                frame.push(username.as_str());
            }
            frame.push(password.as_str());
            self.expect_ok(&frame)?;
        }

        if self.config.db != 0 {
            let frame = CommandFrame::new(commands::SELECT).arg(self.config.db);
            self.expect_ok(&frame)?;
        }

        let version = match self.server_version {
            Some(version) => version,
            None => {
                let version = self.probe_version()?;
                self.server_version = Some(version);
                version
            }
        };

        if let Some(name) = &self.config.client_name {
            if version.supports_client_setname() {
                let frame = CommandFrame::new(commands::CLIENT)
                    .arg(commands::SETNAME)
                    .arg(name.as_str());
                self.expect_ok(&frame)?;
            } else {
                debug!(version = %version, "server predates CLIENT SETNAME; name not registered");
            }
        }
        Ok(())
    }

    fn probe_version(&mut self) -> ClientResult<ServerVersion> {
        let frame = CommandFrame::new(commands::INFO).arg("server");
        let version = match self.roundtrip(&frame)? {
            Reply::Bulk(Some(info)) => ServerVersion::from_info(&info),
            Reply::Error(message) => {
                debug!(error = %message, "INFO rejected; assuming baseline version");
                None
            }
            _ => None,
        };
        Ok(version.unwrap_or(ServerVersion::BASELINE))
    }

    fn expect_ok(&mut self, frame: &CommandFrame) -> ClientResult<()> {
        match self.roundtrip(frame)? {
            reply if reply.is_status(commands::OK) => Ok(()),
            Reply::Error(message) => Err(ClientError::Server(message)),
            other => Err(ClientError::unexpected("OK", &other)),
        }
    }

    /// Connects when there is no stream, and reconnects when the connection
    /// sat idle past its budget and the socket turns out to be closed.
    pub(crate) fn ensure_connected(&mut self) -> ClientResult<()> {
        if self.reader.is_none() {
            return self.connect();
        }
        if let Some(idle_timeout) = self.config.idle_timeout {
            let idle_for = self.last_used.elapsed();
            if idle_for > idle_timeout && !self.probe_socket() {
                info!(
                    addr = %self.config.addr(),
                    idle_ms = idle_for.as_millis() as u64,
                    "idle connection was closed by the peer"
                );
                self.drop_stream(ConnectionState::IdleExpired);
                return self.connect();
            }
        }
        Ok(())
    }

    /// Non-blocking peek on the socket. A closed or errored socket, or one with
    /// unsolicited plaintext waiting, is dead.
    fn probe_socket(&self) -> bool {
        let Some(reader) = self.reader.as_ref() else {
            return false;
        };
        if !reader.buffer().is_empty() {
            return false;
        }

        let transport = reader.get_ref();
        let sock = transport.tcp();
        if sock.set_nonblocking(true).is_err() {
            return false;
        }
        let mut byte = [0u8; 1];
        let alive = match sock.peek(&mut byte) {
            Ok(0) => false,
            // TLS peers may send session tickets at any time.
            Ok(_) => transport.is_encrypted(),
            Err(err) => err.kind() == io::ErrorKind::WouldBlock,
        };
        sock.set_nonblocking(false).is_ok() && alive
    }

    /// True when a stream is open and the peer has not closed it.
    pub fn is_alive(&self) -> bool {
        self.probe_socket()
    }

    /// Stamps the moment a pool parked this connection.
    pub fn mark_deactivated(&mut self) {
        self.deactivated_at = Some(Instant::now());
    }

    pub fn deactivated_at(&self) -> Option<Instant> {
        self.deactivated_at
    }

    /// Drops the current stream and connects again.
    pub fn reconnect(&mut self) -> ClientResult<()> {
        self.drop_stream(ConnectionState::Disconnected);
        self.connect()
    }

    /// Sends QUIT best-effort and drops the stream.
    pub fn close(&mut self) {
        if self.reader.is_some() {
            self.send_buffer.reset();
            self.write_frame(&CommandFrame::new(commands::QUIT));
            if let Err(err) = self.flush_send() {
                debug!(error = %err, "QUIT not delivered");
            }
        }
        self.drop_stream(ConnectionState::Disconnected);
    }

    /// Runs `op` under the retry policy.
    ///
    /// Retryable faults drop the stream; in `Retry::Budgeted` mode the loop
    /// backs off and reconnects until the budget is spent, then returns
    /// `ClientError::Timeout` carrying the first fault. In `Retry::Once` mode a
    /// fault raised by `op` surfaces as-is; failing to connect beforehand is
    /// still retried under the budget, since nothing was sent yet. Fatal faults
    /// reset the send buffer, drop the stream when it can no longer be trusted,
    /// and surface immediately.
    pub(crate) fn with_retry<T, F>(&mut self, mode: Retry, mut op: F) -> ClientResult<T>
    where
        F: FnMut(&mut Connection) -> ClientResult<T>,
    {
        let policy = self.config.retry;
        let started = Instant::now();
        let mut first: Option<ClientError> = None;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let (err, sent) = match self.ensure_connected() {
                Ok(()) => match op(self) {
                    Ok(value) => return Ok(value),
                    Err(err) => (err, true),
                },
                Err(err) => (err, false),
            };

            if classify(&err) == Fault::Fatal {
                self.send_buffer.reset();
                if err.breaks_stream() {
                    warn!(
                        addr = %self.config.addr(),
                        error = %err,
                        "dropping stream after fatal fault"
                    );
                    self.drop_stream(ConnectionState::Broken);
                }
                return Err(err);
            }

            self.drop_stream(ConnectionState::Broken);
            if mode == Retry::Once && sent {
                warn!(
                    addr = %self.config.addr(),
                    error = %err,
                    "transient fault with work in flight"
                );
                return Err(err);
            }

            let elapsed = started.elapsed();
            if elapsed >= policy.budget {
                self.stats.record_timeout();
                warn!(
                    addr = %self.config.addr(),
                    attempt,
                    elapsed_ms = elapsed.as_millis() as u64,
                    error = %err,
                    "retry budget exhausted"
                );
                return Err(ClientError::Timeout {
                    budget: policy.budget,
                    attempts: attempt,
                    first: Box::new(first.unwrap_or(err)),
                });
            }

            let delay = policy.sleep_for(attempt, elapsed);
            self.stats.record_retry();
            warn!(
                addr = %self.config.addr(),
                attempt,
                elapsed_ms = elapsed.as_millis() as u64,
                backoff_ms = delay.as_millis() as u64,
                error = %err,
                "transient fault; retrying"
            );
            if first.is_none() {
                first = Some(err);
            }
            thread::sleep(delay);
        }
    }

    /// Sends one command and returns its reply, retrying transient faults.
    ///
    /// An error reply becomes `ClientError::Server` and leaves the connection
    /// usable.
    pub fn execute(&mut self, frame: &CommandFrame) -> ClientResult<Reply> {
        self.stats.record_commands(1);
        // Each attempt runs on a fresh stream with an empty send buffer, so the
        // frame is written exactly once per generation.
        let reply = self.with_retry(Retry::Budgeted, |conn| {
            conn.write_frame(frame);
            let started = Instant::now();
            conn.flush_send()?;
            let reply = conn.receive()?;
            conn.stats.record_latency(started.elapsed());
            Ok(reply)
        })?;

        match reply {
            Reply::Error(message) => {
                self.stats.record_server_error();
                Err(ClientError::Server(message))
            }
            other => Ok(other),
        }
    }

    /// `execute` followed by a typed decode.
    pub fn query<T: FromReply>(&mut self, frame: &CommandFrame) -> ClientResult<T> {
        T::from_reply(self.execute(frame)?)
    }

    /// Version reported by the server, once the first connect probed it.
    pub fn server_version(&self) -> Option<ServerVersion> {
        self.server_version
    }

    /// Number of successful connects so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub(crate) fn config_mut(&mut self) -> &mut ClientConfig {
        &mut self.config
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub(crate) fn counters(&self) -> &ClientStats {
        &self.stats
    }

    /// True when a stream is currently open.
    pub fn is_connected(&self) -> bool {
        self.reader.is_some()
    }

    /// Bytes written but not yet flushed.
    pub fn pending_bytes(&self) -> usize {
        self.send_buffer.len()
    }

    pub(crate) fn write_frame(&mut self, frame: &CommandFrame) {
        encode_frame(frame, &mut self.send_buffer);
    }

    pub(crate) fn flush_send(&mut self) -> ClientResult<()> {
        let Some(reader) = self.reader.as_mut() else {
            self.send_buffer.reset();
            return Err(not_connected());
        };
        let transport = reader.get_mut();
        let vectored = transport.supports_vectored();
        self.send_buffer.flush(transport, vectored)?;
        Ok(())
    }

    pub(crate) fn receive(&mut self) -> ClientResult<Reply> {
        let reader = self.reader.as_mut().ok_or_else(not_connected)?;
        let reply = read_reply(reader, &mut self.line_buf)?;
        self.last_used = Instant::now();
        Ok(reply)
    }

    /// Write, flush and read one reply without retry or error mapping.
    pub(crate) fn roundtrip(&mut self, frame: &CommandFrame) -> ClientResult<Reply> {
        self.write_frame(frame);
        self.flush_send()?;
        self.receive()
    }

    /// Throws away bytes that were buffered but never flushed.
    pub(crate) fn discard_send(&mut self) {
        if !self.send_buffer.is_empty() {
            debug!(bytes = self.send_buffer.len(), "discarding unsent commands");
            self.send_buffer.reset();
        }
    }

    pub(crate) fn drop_stream(&mut self, state: ConnectionState) {
        self.reader = None;
        self.send_buffer.reset();
        self.state = state;
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

fn non_zero(timeout: Option<Duration>) -> Option<Duration> {
    timeout.filter(|timeout| !timeout.is_zero())
}

fn not_connected() -> ClientError {
    ClientError::Transport(io::Error::new(
        io::ErrorKind::NotConnected,
        "connection has no open stream",
    ))
}
