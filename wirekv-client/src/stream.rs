//! # Transport Stream
//!
//! Plain TCP or rustls-encrypted TCP behind one `Read + Write` type, so the
//! connection code never branches on encryption except to pick the flush
//! strategy.

use std::io::{self, IoSlice, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;

use rustls::pki_types::ServerName;
use rustls::{ClientConnection, StreamOwned};

/// Socket the connection reads from and writes to.
pub enum Transport {
    Plain(TcpStream),
    Tls(Box<StreamOwned<ClientConnection, TcpStream>>),
}

impl Transport {
    /// Runs the TLS handshake over `sock` and checks that encryption is active.
    pub fn upgrade(
        mut sock: TcpStream,
        config: Arc<rustls::ClientConfig>,
        server_name: &str,
    ) -> io::Result<Self> {
        let name = ServerName::try_from(server_name.to_string()).map_err(|err| {
            io::Error::new(io::ErrorKind::InvalidInput, format!("invalid TLS server name: {}", err))
        })?;
        let mut conn = ClientConnection::new(config, name)
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;

        while conn.is_handshaking() {
            conn.complete_io(&mut sock)?;
        }
        if conn.negotiated_cipher_suite().is_none() {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "TLS handshake finished without negotiating a cipher suite",
            ));
        }

        Ok(Transport::Tls(Box::new(StreamOwned::new(conn, sock))))
    }

    /// Underlying TCP socket, for timeouts and liveness probes.
    pub fn tcp(&self) -> &TcpStream {
        match self {
            Transport::Plain(sock) => sock,
            Transport::Tls(stream) => &stream.sock,
        }
    }

    /// True when a single scatter write can be issued. rustls frames each
    /// record itself, so encrypted streams get per-chunk writes instead.
    pub fn supports_vectored(&self) -> bool {
        matches!(self, Transport::Plain(_))
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(self, Transport::Tls(_))
    }
}

impl Read for Transport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Transport::Plain(sock) => sock.read(buf),
            Transport::Tls(stream) => stream.read(buf),
        }
    }
}

impl Write for Transport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Transport::Plain(sock) => sock.write(buf),
            Transport::Tls(stream) => stream.write(buf),
        }
    }

    fn write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        match self {
            Transport::Plain(sock) => sock.write_vectored(bufs),
            Transport::Tls(stream) => stream.write_vectored(bufs),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Transport::Plain(sock) => sock.flush(),
            Transport::Tls(stream) => stream.flush(),
        }
    }
}
