//! In-process RESP2 server for integration tests.
//!
//! One thread accepts, one thread serves each connection, optionally over
//! rustls. The keyspace is shared by every connection, and every command
//! received is logged with the id of the connection it arrived on.

#![allow(dead_code)]

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use hashbrown::HashMap;
use parking_lot::Mutex;
use rustls::{ServerConfig, ServerConnection, StreamOwned};
use tracing_subscriber::EnvFilter;
use wirekv_client::ClientConfig;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// One command as received by the server.
#[derive(Debug, Clone)]
pub struct Logged {
    pub conn: usize,
    pub args: Vec<Vec<u8>>,
}

impl Logged {
    pub fn name(&self) -> String {
        String::from_utf8_lossy(&self.args[0]).to_ascii_uppercase()
    }
}

type Key = (u32, Vec<u8>);

#[derive(Default)]
struct Store {
    values: HashMap<Key, Vec<u8>>,
    ttls: HashMap<Key, u64>,
    versions: HashMap<Key, u64>,
    clock: u64,
}

impl Store {
    fn touch(&mut self, key: &Key) {
        self.clock += 1;
        self.versions.insert(key.clone(), self.clock);
    }

    fn version(&self, key: &Key) -> u64 {
        self.versions.get(key).copied().unwrap_or(0)
    }
}

struct Shared {
    store: Mutex<Store>,
    log: Mutex<Vec<Logged>>,
    password: Option<String>,
    version: String,
    tls: Option<Arc<ServerConfig>>,
    next_id: AtomicUsize,
    clients: Mutex<Vec<TcpStream>>,
    drops: Mutex<Vec<(String, usize)>>,
    shutdown: AtomicBool,
}

impl Shared {
    /// Consumes one scheduled drop for `name`, if any.
    fn take_drop(&self, name: &str) -> bool {
        let mut drops = self.drops.lock();
        match drops.iter_mut().find(|(command, remaining)| command == name && *remaining > 0) {
            Some((_, remaining)) => {
                *remaining -= 1;
                true
            }
            None => false,
        }
    }
}

/// Options for a mock server.
#[derive(Debug, Clone)]
pub struct MockOptions {
    pub password: Option<String>,
    pub version: String,
    /// Serve every connection over TLS with this configuration.
    pub tls: Option<Arc<ServerConfig>>,
}

impl Default for MockOptions {
    fn default() -> Self {
        MockOptions {
            password: None,
            version: "7.0.0".to_string(),
            tls: None,
        }
    }
}

pub struct MockServer {
    addr: SocketAddr,
    shared: Arc<Shared>,
    acceptor: Option<JoinHandle<()>>,
}

impl MockServer {
    pub fn start() -> Self {
        MockServer::start_with(MockOptions::default())
    }

    pub fn with_password(password: &str) -> Self {
        MockServer::start_with(MockOptions {
            password: Some(password.to_string()),
            ..MockOptions::default()
        })
    }

    pub fn start_with(options: MockOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        let shared = Arc::new(Shared {
            store: Mutex::new(Store::default()),
            log: Mutex::new(Vec::new()),
            password: options.password,
            version: options.version,
            tls: options.tls,
            next_id: AtomicUsize::new(0),
            clients: Mutex::new(Vec::new()),
            drops: Mutex::new(Vec::new()),
            shutdown: AtomicBool::new(false),
        });

        let acceptor_shared = shared.clone();
        let acceptor = thread::spawn(move || {
            for stream in listener.incoming() {
                if acceptor_shared.shutdown.load(Ordering::SeqCst) {
                    break;
                }
                let Ok(stream) = stream else { continue };
                let id = acceptor_shared.next_id.fetch_add(1, Ordering::SeqCst);
                if let Ok(clone) = stream.try_clone() {
                    acceptor_shared.clients.lock().push(clone);
                }
                let shared = acceptor_shared.clone();
                thread::spawn(move || {
                    let _ = serve(shared, stream, id);
                });
            }
        });

        MockServer {
            addr,
            shared,
            acceptor: Some(acceptor),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Client configuration pointing at this server, with short timeouts.
    pub fn config(&self) -> ClientConfig {
        ClientConfig::new("127.0.0.1", self.addr.port())
            .with_connect_timeout(Some(Duration::from_secs(1)))
            .with_send_timeout(Some(Duration::from_secs(2)))
            .with_receive_timeout(Some(Duration::from_secs(2)))
            .with_retry_budget(Duration::from_secs(2))
            .with_backoff(Duration::from_millis(5), Duration::from_millis(50))
    }

    /// Connections accepted so far.
    pub fn connection_count(&self) -> usize {
        self.shared.next_id.load(Ordering::SeqCst)
    }

    pub fn log(&self) -> Vec<Logged> {
        self.shared.log.lock().clone()
    }

    /// Upper-cased command names received on connection `conn`.
    pub fn names_on(&self, conn: usize) -> Vec<String> {
        self.shared
            .log
            .lock()
            .iter()
            .filter(|entry| entry.conn == conn)
            .map(Logged::name)
            .collect()
    }

    /// How many times `name` was received on any connection.
    pub fn count_of(&self, name: &str) -> usize {
        self.shared
            .log
            .lock()
            .iter()
            .filter(|entry| entry.name() == name)
            .count()
    }

    /// The next `times` occurrences of `name` close the connection unanswered.
    pub fn drop_on(&self, name: &str, times: usize) {
        self.shared.drops.lock().push((name.to_ascii_uppercase(), times));
    }

    /// Closes every client socket from the server side.
    pub fn kill_clients(&self) {
        for client in self.shared.clients.lock().drain(..) {
            let _ = client.shutdown(Shutdown::Both);
        }
    }

    /// Reads a value straight from the keyspace.
    pub fn value(&self, db: u32, key: &[u8]) -> Option<Vec<u8>> {
        self.shared.store.lock().values.get(&(db, key.to_vec())).cloned()
    }

    /// Stops accepting, closes every client and waits for the listener to close.
    pub fn stop(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        let _ = TcpStream::connect(self.addr);
        if let Some(acceptor) = self.acceptor.take() {
            let _ = acceptor.join();
        }
        self.kill_clients();
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[derive(Default)]
struct Session {
    db: u32,
    authed: bool,
    multi: Option<Vec<Vec<Vec<u8>>>>,
    watched: Vec<(Key, u64)>,
    quit: bool,
}

fn serve(shared: Arc<Shared>, stream: TcpStream, id: usize) -> io::Result<()> {
    let control = stream.try_clone()?;
    let result = match shared.tls.clone() {
        Some(config) => {
            let conn = ServerConnection::new(config)
                .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
            serve_stream(&shared, BufReader::new(StreamOwned::new(conn, stream)), id)
        }
        None => serve_stream(&shared, BufReader::new(stream), id),
    };
    let _ = control.shutdown(Shutdown::Both);
    result
}

fn serve_stream<S: Read + Write>(
    shared: &Shared,
    mut reader: BufReader<S>,
    id: usize,
) -> io::Result<()> {
    let mut session = Session::default();

    while let Some(args) = read_command(&mut reader)? {
        if args.is_empty() {
            reader.get_mut().write_all(&resp_error("ERR empty command"))?;
            continue;
        }
        shared.log.lock().push(Logged {
            conn: id,
            args: args.clone(),
        });

        let name = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();
        if shared.take_drop(&name) {
            return Ok(());
        }

        let response = session.dispatch(shared, &name, &args);
        let writer = reader.get_mut();
        writer.write_all(&response)?;
        writer.flush()?;
        if session.quit {
            return Ok(());
        }
    }
    Ok(())
}

impl Session {
    fn dispatch(&mut self, shared: &Shared, name: &str, args: &[Vec<u8>]) -> Vec<u8> {
        if shared.password.is_some() && !self.authed && name != "AUTH" && name != "QUIT" {
            return resp_error("NOAUTH Authentication required.");
        }

        if let Some(queued) = self.multi.as_mut() {
            if !matches!(name, "EXEC" | "DISCARD" | "MULTI" | "WATCH") {
                queued.push(args.to_vec());
                return resp_simple("QUEUED");
            }
        }

        match name {
            "AUTH" => {
                let accepted = match (&shared.password, args.last()) {
                    (Some(password), Some(given)) if args.len() >= 2 => {
                        password.as_bytes() == &given[..]
                    }
                    _ => false,
                };
                if accepted {
                    self.authed = true;
                    resp_simple("OK")
                } else {
                    resp_error("ERR invalid password")
                }
            }
            "SELECT" => match args.get(1).and_then(|arg| parse_i64(arg)) {
                Some(db) if db >= 0 => {
                    self.db = db as u32;
                    resp_simple("OK")
                }
                _ => resp_error("ERR invalid DB index"),
            },
            "CLIENT" | "QUIT" => {
                self.quit = name == "QUIT";
                resp_simple("OK")
            }
            "INFO" => {
                let info = format!("# Server\r\nredis_version:{}\r\n", shared.version);
                resp_bulk(info.as_bytes())
            }
            "MULTI" => {
                if self.multi.is_some() {
                    return resp_error("ERR MULTI calls can not be nested");
                }
                self.multi = Some(Vec::new());
                resp_simple("OK")
            }
            "EXEC" => {
                let Some(queued) = self.multi.take() else {
                    return resp_error("ERR EXEC without MULTI");
                };
                let watched = std::mem::take(&mut self.watched);
                let mut store = shared.store.lock();
                if watched.iter().any(|(key, version)| store.version(key) != *version) {
                    return b"*-1\r\n".to_vec();
                }
                let mut out = format!("*{}\r\n", queued.len()).into_bytes();
                for command in &queued {
                    let name = String::from_utf8_lossy(&command[0]).to_ascii_uppercase();
                    out.extend_from_slice(&self.apply(&mut store, &name, command));
                }
                out
            }
            "DISCARD" => {
                self.watched.clear();
                match self.multi.take() {
                    Some(_) => resp_simple("OK"),
                    None => resp_error("ERR DISCARD without MULTI"),
                }
            }
            "WATCH" => {
                if self.multi.is_some() {
                    return resp_error("ERR WATCH inside MULTI is not allowed");
                }
                let store = shared.store.lock();
                for key in &args[1..] {
                    let key = (self.db, key.clone());
                    let version = store.version(&key);
                    self.watched.push((key, version));
                }
                resp_simple("OK")
            }
            "UNWATCH" => {
                self.watched.clear();
                resp_simple("OK")
            }
            _ => {
                let mut store = shared.store.lock();
                self.apply(&mut store, name, args)
            }
        }
    }

    fn apply(&self, store: &mut Store, name: &str, args: &[Vec<u8>]) -> Vec<u8> {
        let key = |idx: usize| -> Key { (self.db, args[idx].clone()) };
        match (name, args.len()) {
            ("PING", 1) => resp_simple("PONG"),
            ("PING", 2) | ("ECHO", 2) => resp_bulk(&args[1]),
            ("GET", 2) => match store.values.get(&key(1)) {
                Some(value) => resp_bulk(value),
                None => b"$-1\r\n".to_vec(),
            },
            ("SET", 3) | ("SET", 5) => {
                let key = key(1);
                store.values.insert(key.clone(), args[2].clone());
                if args.len() == 5 {
                    match parse_i64(&args[4]) {
                        Some(secs) if secs > 0 => {
                            store.ttls.insert(key.clone(), secs as u64);
                        }
                        _ => return resp_error("ERR invalid expire time in 'set' command"),
                    }
                } else {
                    store.ttls.remove(&key);
                }
                store.touch(&key);
                resp_simple("OK")
            }
            ("DEL", n) if n >= 2 => {
                let mut removed = 0;
                for idx in 1..n {
                    let key = key(idx);
                    if store.values.remove(&key).is_some() {
                        store.ttls.remove(&key);
                        store.touch(&key);
                        removed += 1;
                    }
                }
                resp_integer(removed)
            }
            ("EXISTS", n) if n >= 2 => {
                let found = (1..n).filter(|&idx| store.values.contains_key(&key(idx))).count();
                resp_integer(found as i64)
            }
            ("INCR", 2) | ("INCRBY", 3) => {
                let delta = if args.len() == 3 {
                    match parse_i64(&args[2]) {
                        Some(delta) => delta,
                        None => return resp_error("ERR value is not an integer or out of range"),
                    }
                } else {
                    1
                };
                let key = key(1);
                let current = match store.values.get(&key) {
                    Some(value) => match parse_i64(value) {
                        Some(current) => current,
                        None => return resp_error("ERR value is not an integer or out of range"),
                    },
                    None => 0,
                };
                let next = current + delta;
                store.values.insert(key.clone(), next.to_string().into_bytes());
                store.touch(&key);
                resp_integer(next)
            }
            ("EXPIRE", 3) => {
                let key = key(1);
                match (store.values.contains_key(&key), parse_i64(&args[2])) {
                    (true, Some(secs)) if secs >= 0 => {
                        store.ttls.insert(key, secs as u64);
                        resp_integer(1)
                    }
                    (false, Some(_)) => resp_integer(0),
                    _ => resp_error("ERR value is not an integer or out of range"),
                }
            }
            ("TTL", 2) => {
                let key = key(1);
                if !store.values.contains_key(&key) {
                    resp_integer(-2)
                } else {
                    match store.ttls.get(&key) {
                        Some(secs) => resp_integer(*secs as i64),
                        None => resp_integer(-1),
                    }
                }
            }
            ("DBSIZE", 1) => {
                let count = store.values.keys().filter(|(db, _)| *db == self.db).count();
                resp_integer(count as i64)
            }
            ("SCAN", n) if n >= 2 => self.scan(store, args),
            _ => resp_error(&format!("ERR unknown command or wrong arity '{}'", name)),
        }
    }

    /// Cursor is an offset into the sorted key list; MATCH filters each page
    /// after slicing, as real servers do.
    fn scan(&self, store: &Store, args: &[Vec<u8>]) -> Vec<u8> {
        let Some(cursor) = parse_i64(&args[1]).filter(|cursor| *cursor >= 0) else {
            return resp_error("ERR invalid cursor");
        };
        let mut pattern: Option<&[u8]> = None;
        let mut count = 10usize;
        let mut idx = 2;
        while idx + 1 < args.len() {
            let option = String::from_utf8_lossy(&args[idx]).to_ascii_uppercase();
            match option.as_str() {
                "MATCH" => pattern = Some(args[idx + 1].as_slice()),
                "COUNT" => match parse_i64(&args[idx + 1]) {
                    Some(value) if value > 0 => count = value as usize,
                    _ => return resp_error("ERR syntax error"),
                },
                _ => return resp_error("ERR syntax error"),
            }
            idx += 2;
        }

        let mut keys: Vec<&Vec<u8>> = store
            .values
            .keys()
            .filter(|(db, _)| *db == self.db)
            .map(|(_, key)| key)
            .collect();
        keys.sort();

        let start = (cursor as usize).min(keys.len());
        let end = (start + count).min(keys.len());
        let next = if end >= keys.len() { 0 } else { end };
        let page: Vec<&Vec<u8>> = keys[start..end]
            .iter()
            .copied()
            .filter(|key| pattern.map(|pattern| glob_match(pattern, key)).unwrap_or(true))
            .collect();

        let mut out = b"*2\r\n".to_vec();
        out.extend_from_slice(&resp_bulk(next.to_string().as_bytes()));
        out.extend_from_slice(format!("*{}\r\n", page.len()).as_bytes());
        for key in page {
            out.extend_from_slice(&resp_bulk(key));
        }
        out
    }
}

/// Glob matching with `*` and `?`.
fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    match (pattern.first(), text.first()) {
        (None, None) => true,
        (Some(b'*'), _) => {
            glob_match(&pattern[1..], text) || (!text.is_empty() && glob_match(pattern, &text[1..]))
        }
        (Some(b'?'), Some(_)) => glob_match(&pattern[1..], &text[1..]),
        (Some(expected), Some(actual)) if expected == actual => {
            glob_match(&pattern[1..], &text[1..])
        }
        _ => false,
    }
}

fn read_command<R: BufRead>(reader: &mut R) -> io::Result<Option<Vec<Vec<u8>>>> {
    let mut line = Vec::new();
    if !read_line(reader, &mut line)? {
        return Ok(None);
    }
    if line.first() != Some(&b'*') {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "expected array"));
    }
    let count = parse_usize(&line[1..])?;
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        if !read_line(reader, &mut line)? {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "eof"));
        }
        if line.first() != Some(&b'$') {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "expected bulk"));
        }
        let len = parse_usize(&line[1..])?;
        let mut data = vec![0u8; len];
        reader.read_exact(&mut data)?;
        let mut crlf = [0u8; 2];
        reader.read_exact(&mut crlf)?;
        if crlf != *b"\r\n" {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "missing crlf"));
        }
        args.push(data);
    }
    Ok(Some(args))
}

fn read_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<bool> {
    buf.clear();
    if reader.read_until(b'\n', buf)? == 0 {
        return Ok(false);
    }
    if buf.len() < 2 || buf[buf.len() - 2] != b'\r' {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "invalid line"));
    }
    buf.truncate(buf.len() - 2);
    Ok(true)
}

fn parse_usize(data: &[u8]) -> io::Result<usize> {
    std::str::from_utf8(data)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "invalid length"))
}

fn parse_i64(data: &[u8]) -> Option<i64> {
    std::str::from_utf8(data).ok()?.parse().ok()
}

fn resp_simple(msg: &str) -> Vec<u8> {
    format!("+{}\r\n", msg).into_bytes()
}

fn resp_error(msg: &str) -> Vec<u8> {
    format!("-{}\r\n", msg).into_bytes()
}

fn resp_integer(value: i64) -> Vec<u8> {
    format!(":{}\r\n", value).into_bytes()
}

fn resp_bulk(data: &[u8]) -> Vec<u8> {
    let mut out = format!("${}\r\n", data.len()).into_bytes();
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
    out
}
