//! # Server Version
//!
//! Capability version negotiated once per connection from `INFO server`,
//! used to gate command forms older servers do not understand.

use std::fmt;

/// Server version triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServerVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ServerVersion {
    /// Assumed when the server does not report a version.
    pub const BASELINE: ServerVersion = ServerVersion::new(2, 8, 0);

    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        ServerVersion {
            major,
            minor,
            patch,
        }
    }

    /// Parses `major.minor[.patch]`.
    pub fn parse(text: &str) -> Option<Self> {
        let mut parts = text.trim().split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next()?.parse().ok()?;
        let patch = match parts.next() {
            Some(patch) => patch.parse().ok()?,
            None => 0,
        };
        Some(ServerVersion::new(major, minor, patch))
    }

    /// Extracts the `redis_version:` field from an INFO payload.
    pub fn from_info(info: &[u8]) -> Option<Self> {
        let text = std::str::from_utf8(info).ok()?;
        text.lines()
            .find_map(|line| line.strip_prefix("redis_version:"))
            .and_then(ServerVersion::parse)
    }

    /// CLIENT SETNAME exists from 2.6.9.
    pub fn supports_client_setname(&self) -> bool {
        *self >= ServerVersion::new(2, 6, 9)
    }

    /// SCAN and friends exist from 2.8.0.
    pub fn supports_scan(&self) -> bool {
        *self >= ServerVersion::new(2, 8, 0)
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}
