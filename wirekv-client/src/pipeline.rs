//! # Pipeline
//!
//! Purpose: Batch commands into one flush and decode their replies in the
//! order they were queued.
//!
//! ## Design Principles
//! 1. **Write Early, Flush Once**: Queuing encodes the frame into the send
//!    buffer; only `flush` touches the socket.
//! 2. **Generation Aware**: Frames written before a reconnect are re-encoded
//!    before the flush, since the reconnect dropped the buffered bytes.
//! 3. **No Silent Resend**: The flush runs in `Retry::Once` mode; replaying a
//!    batch is an explicit `replay` call.

use std::time::Instant;

use tracing::debug;

use crate::connection::Connection;
use crate::error::{ClientError, ClientResult};
use crate::queue::{deliver_in_order, PendingCommand, QueueCommand};
use crate::retry::Retry;

/// Tracks how many pending frames sit in the send buffer, and for which
/// connection generation.
#[derive(Debug, Default)]
struct WriteCursor {
    generation: Option<u64>,
    written: usize,
}

impl WriteCursor {
    fn sync(&mut self, conn: &mut Connection, pending: &[PendingCommand]) {
        let generation = conn.generation();
        if self.generation != Some(generation) {
            if self.written > 0 {
                debug!(generation, frames = self.written, "re-encoding frames after reconnect");
            }
            conn.discard_send();
            self.generation = Some(generation);
            self.written = 0;
        }
        for command in &pending[self.written..] {
            conn.write_frame(command.frame());
        }
        self.written = pending.len();
    }

    fn clear(&mut self) {
        *self = WriteCursor::default();
    }
}

/// Ordered batch of commands flushed together.
pub struct Pipeline<'c> {
    conn: &'c mut Connection,
    pending: Vec<PendingCommand>,
    flushed: Vec<PendingCommand>,
    cursor: WriteCursor,
}

impl Connection {
    /// Opens a pipeline; the connection is exclusively borrowed until it drops.
    pub fn pipeline(&mut self) -> Pipeline<'_> {
        Pipeline {
            conn: self,
            pending: Vec::new(),
            flushed: Vec::new(),
            cursor: WriteCursor::default(),
        }
    }
}

impl<'c> Pipeline<'c> {
    /// Sends every queued frame in one flush, then delivers the replies in
    /// queue order.
    ///
    /// All replies are read before any is decoded, so a decode fault (a server
    /// error reply included) never leaves unread replies on the stream. The
    /// first such fault stops delivery and is returned. Either way the batch
    /// becomes the one `replay` re-sends.
    pub fn flush(&mut self) -> ClientResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        self.conn.counters().record_commands(self.pending.len() as u64);

        let pending = &self.pending;
        let cursor = &mut self.cursor;
        let replies = self.conn.with_retry(Retry::Once, |conn| {
            cursor.sync(conn, pending);
            let started = Instant::now();
            conn.flush_send()?;
            let mut replies = Vec::with_capacity(pending.len());
            for _ in 0..pending.len() {
                replies.push(conn.receive()?);
            }
            conn.counters().record_latency(started.elapsed());
            Ok(replies)
        });

        self.cursor.clear();
        self.flushed = std::mem::take(&mut self.pending);
        deliver_in_order(&mut self.flushed, replies?, self.conn.counters())
    }

    /// Re-sends the last flushed batch as a fresh flush.
    pub fn replay(&mut self) -> ClientResult<()> {
        if !self.pending.is_empty() {
            return Err(ClientError::InvalidState(
                "pipeline has unflushed commands".to_string(),
            ));
        }
        self.pending = std::mem::take(&mut self.flushed);
        self.cursor.clear();
        self.flush()
    }

    /// Commands queued since the last flush.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Connection this pipeline was opened on.
    pub fn connection(&self) -> &Connection {
        &*self.conn
    }
}

impl QueueCommand for Pipeline<'_> {
    fn enqueue(&mut self, command: PendingCommand) -> ClientResult<()> {
        self.pending.push(command);
        self.cursor.sync(self.conn, &self.pending);
        Ok(())
    }
}

impl Drop for Pipeline<'_> {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            debug!(commands = self.pending.len(), "pipeline dropped before flush");
            self.conn.discard_send();
        }
    }
}
