//! # Command Catalog
//!
//! Command-name byte constants. The codec treats them as ordinary first
//! arguments; nothing here is validated against the server.

// Connection and handshake.
pub const AUTH: &[u8] = b"AUTH";
pub const SELECT: &[u8] = b"SELECT";
pub const CLIENT: &[u8] = b"CLIENT";
pub const SETNAME: &[u8] = b"SETNAME";
pub const INFO: &[u8] = b"INFO";
pub const PING: &[u8] = b"PING";
pub const ECHO: &[u8] = b"ECHO";
pub const QUIT: &[u8] = b"QUIT";

// Keys and strings.
pub const GET: &[u8] = b"GET";
pub const SET: &[u8] = b"SET";
pub const EX: &[u8] = b"EX";
pub const DEL: &[u8] = b"DEL";
pub const EXISTS: &[u8] = b"EXISTS";
pub const INCR: &[u8] = b"INCR";
pub const INCRBY: &[u8] = b"INCRBY";
pub const EXPIRE: &[u8] = b"EXPIRE";
pub const TTL: &[u8] = b"TTL";
pub const DBSIZE: &[u8] = b"DBSIZE";

// Transactions.
pub const MULTI: &[u8] = b"MULTI";
pub const EXEC: &[u8] = b"EXEC";
pub const DISCARD: &[u8] = b"DISCARD";
pub const WATCH: &[u8] = b"WATCH";
pub const UNWATCH: &[u8] = b"UNWATCH";

// Paged enumeration.
pub const SCAN: &[u8] = b"SCAN";
pub const SSCAN: &[u8] = b"SSCAN";
pub const HSCAN: &[u8] = b"HSCAN";
pub const ZSCAN: &[u8] = b"ZSCAN";
pub const MATCH: &[u8] = b"MATCH";
pub const COUNT: &[u8] = b"COUNT";

/// Status text acknowledging a command queued inside MULTI.
pub const QUEUED: &str = "QUEUED";

/// Generic success status.
pub const OK: &str = "OK";
