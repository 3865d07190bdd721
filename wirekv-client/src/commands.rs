//! # Typed Commands
//!
//! A handful of typed helpers over `Connection::execute`. Anything not covered
//! here goes through `execute`/`query` with a hand-built `CommandFrame`.

use std::time::Duration;

use bytes::Bytes;
use wirekv_common::{commands, CommandFrame, Reply, ToArg};

use crate::connection::Connection;
use crate::error::{ClientError, ClientResult};

/// TTL state returned by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// Key is missing or already expired.
    Missing,
    /// Key exists without expiration.
    NoExpiry,
    /// Key expires after the provided duration.
    ExpiresIn(Duration),
}

impl Connection {
    /// Pings the server. Returns the status text, or the echoed payload.
    pub fn ping(&mut self, payload: Option<&[u8]>) -> ClientResult<Bytes> {
        let mut frame = CommandFrame::new(commands::PING);
        if let Some(payload) = payload {
            frame.push(payload);
        }
        self.query(&frame)
    }

    pub fn echo(&mut self, message: impl ToArg) -> ClientResult<Bytes> {
        self.query(&CommandFrame::new(commands::ECHO).arg(message))
    }

    /// Fetches a value by key.
    ///
    /// Returns `Ok(None)` when the key is missing.
    pub fn get(&mut self, key: impl ToArg) -> ClientResult<Option<Bytes>> {
        self.query(&CommandFrame::new(commands::GET).arg(key))
    }

    /// Sets a value for a key without expiration.
    pub fn set(&mut self, key: impl ToArg, value: impl ToArg) -> ClientResult<()> {
        self.query(&CommandFrame::new(commands::SET).arg(key).arg(value))
    }

    /// Sets a value and attaches an expiration in whole seconds.
    pub fn set_with_ttl(
        &mut self,
        key: impl ToArg,
        value: impl ToArg,
        ttl: Duration,
    ) -> ClientResult<()> {
        let frame = CommandFrame::new(commands::SET)
            .arg(key)
            .arg(value)
            .arg(commands::EX)
            .arg(ttl.as_secs());
        self.query(&frame)
    }

    /// Deletes a key. Returns true when a key was removed.
    pub fn delete(&mut self, key: impl ToArg) -> ClientResult<bool> {
        let removed: i64 = self.query(&CommandFrame::new(commands::DEL).arg(key))?;
        Ok(removed > 0)
    }

    pub fn exists(&mut self, key: impl ToArg) -> ClientResult<bool> {
        self.query(&CommandFrame::new(commands::EXISTS).arg(key))
    }

    pub fn incr(&mut self, key: impl ToArg) -> ClientResult<i64> {
        self.query(&CommandFrame::new(commands::INCR).arg(key))
    }

    pub fn incr_by(&mut self, key: impl ToArg, delta: i64) -> ClientResult<i64> {
        self.query(&CommandFrame::new(commands::INCRBY).arg(key).arg(delta))
    }

    /// Sets a time-to-live on a key. Returns true when the TTL was set.
    pub fn expire(&mut self, key: impl ToArg, ttl: Duration) -> ClientResult<bool> {
        self.query(&CommandFrame::new(commands::EXPIRE).arg(key).arg(ttl.as_secs()))
    }

    /// Returns TTL status for a key.
    pub fn ttl(&mut self, key: impl ToArg) -> ClientResult<Ttl> {
        match self.execute(&CommandFrame::new(commands::TTL).arg(key))? {
            Reply::Integer(-2) => Ok(Ttl::Missing),
            Reply::Integer(-1) => Ok(Ttl::NoExpiry),
            Reply::Integer(seconds) if seconds >= 0 => {
                Ok(Ttl::ExpiresIn(Duration::from_secs(seconds as u64)))
            }
            other => Err(ClientError::unexpected("ttl", &other)),
        }
    }

    /// Fetches server INFO output, optionally for one section.
    pub fn info(&mut self, section: Option<&str>) -> ClientResult<String> {
        let mut frame = CommandFrame::new(commands::INFO);
        if let Some(section) = section {
            frame.push(section);
        }
        self.query(&frame)
    }

    /// Number of keys in the selected database.
    pub fn db_size(&mut self) -> ClientResult<u64> {
        self.query(&CommandFrame::new(commands::DBSIZE))
    }

    /// Switches database. The choice is kept in the configuration so a
    /// reconnect selects it again.
    pub fn select(&mut self, db: u32) -> ClientResult<()> {
        self.query::<()>(&CommandFrame::new(commands::SELECT).arg(db))?;
        self.config_mut().db = db;
        Ok(())
    }
}
