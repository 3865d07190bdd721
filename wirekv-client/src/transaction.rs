//! # Transactions
//!
//! Purpose: Run a group of commands atomically with MULTI/EXEC, optionally
//! guarded by WATCHed keys (optimistic locking).
//!
//! ## Design Principles
//! 1. **Server-Acknowledged Queueing**: Each queued command is flushed and its
//!    `+QUEUED` read before `queue` returns, so errors surface at the call site.
//! 2. **All Or Nothing**: A nil EXEC reply is a conflict, reported as
//!    `Ok(false)`; no handle resolves and no callback fires.
//! 3. **No Lost Locks**: Once WATCH or MULTI reached the server the transaction
//!    is pinned to that connection generation; a reconnect fails it instead of
//!    silently continuing without the lock or the framing.
//! 4. **A Commit Is A Commit**: An error reply inside the EXEC array belongs to
//!    one command. Every other command is still delivered, and the failures are
//!    listed by `failures()`.

use bytes::Bytes;
use hashbrown::HashSet;
use tracing::{debug, info};
use wirekv_common::{commands, CommandFrame, Reply, ToArg};

use crate::connection::{Connection, ConnectionState};
use crate::error::{ClientError, ClientResult};
use crate::queue::{deliver_all, CommandFailure, PendingCommand, QueueCommand};
use crate::retry::Retry;

/// Lifecycle of a `Transaction`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Nothing sent except WATCH.
    Open,
    /// MULTI accepted; commands are being queued server-side.
    Queuing,
    /// EXEC ran (the commit may still have reported a conflict).
    Committed,
    /// DISCARD ran, or the server refused EXEC.
    Discarded,
    /// The connection was lost while the server held transaction state.
    Failed,
}

/// MULTI/EXEC transaction bound to one connection.
pub struct Transaction<'c> {
    conn: &'c mut Connection,
    state: TransactionState,
    watched: HashSet<Bytes>,
    pending: Vec<PendingCommand>,
    failures: Vec<CommandFailure>,
    pinned: Option<u64>,
}

impl Connection {
    /// Opens a transaction; nothing is sent until the first `watch` or `queue`.
    pub fn transaction(&mut self) -> Transaction<'_> {
        Transaction {
            conn: self,
            state: TransactionState::Open,
            watched: HashSet::new(),
            pending: Vec::new(),
            failures: Vec::new(),
            pinned: None,
        }
    }
}

impl<'c> Transaction<'c> {
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Keys currently watched on the server.
    pub fn watched_keys(&self) -> impl Iterator<Item = &Bytes> {
        self.watched.iter()
    }

    /// Commands the server acknowledged with `+QUEUED`.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Commands of the last successful commit that the server rejected or
    /// whose reply failed to decode. Their handles stay unresolved and their
    /// callbacks do not fire.
    pub fn failures(&self) -> &[CommandFailure] {
        &self.failures
    }

    /// Watches `keys`; EXEC will report a conflict if any of them changes
    /// before the commit. Only valid before the first command is queued.
    pub fn watch<I>(&mut self, keys: I) -> ClientResult<()>
    where
        I: IntoIterator,
        I::Item: ToArg,
    {
        self.require(TransactionState::Open, "WATCH")?;
        let keys: Vec<Bytes> = keys.into_iter().map(|key| key.to_arg()).collect();
        if keys.is_empty() {
            return Ok(());
        }

        let frame = CommandFrame::new(commands::WATCH).args_from(keys.iter());
        self.expect_status(&frame)?;
        self.watched.extend(keys);
        Ok(())
    }

    /// Releases every watched key. Only valid before the first command is queued.
    pub fn unwatch(&mut self) -> ClientResult<()> {
        self.require(TransactionState::Open, "UNWATCH")?;
        if self.watched.is_empty() {
            return Ok(());
        }
        self.expect_status(&CommandFrame::new(commands::UNWATCH))?;
        self.watched.clear();
        Ok(())
    }

    /// Runs EXEC, sending MULTI first when nothing was queued.
    ///
    /// Returns `Ok(false)` when a watched key changed and the server aborted
    /// the transaction. Otherwise every reply is delivered in queue order and
    /// `Ok(true)` is returned, even when some commands failed on the server;
    /// those are reported by `failures()`.
    pub fn commit(&mut self) -> ClientResult<bool> {
        match self.state {
            TransactionState::Open => self.begin()?,
            TransactionState::Queuing => {}
            state => {
                return Err(ClientError::InvalidState(format!(
                    "cannot commit a transaction in state {:?}",
                    state
                )))
            }
        }

        self.failures.clear();
        let reply = self.exchange(&CommandFrame::new(commands::EXEC))?;
        // EXEC always releases the watched keys.
        self.watched.clear();
        self.pinned = None;

        match reply {
            Reply::Array(None) => {
                self.state = TransactionState::Committed;
                info!(
                    commands = self.pending.len(),
                    "transaction aborted by a watched key change"
                );
                Ok(false)
            }
            Reply::Array(Some(replies)) => {
                self.state = TransactionState::Committed;
                self.failures = deliver_all(&mut self.pending, replies, self.conn.counters())?;
                if !self.failures.is_empty() {
                    info!(
                        commands = self.pending.len(),
                        failed = self.failures.len(),
                        "transaction committed with failed commands"
                    );
                }
                Ok(true)
            }
            Reply::Error(message) => {
                self.state = TransactionState::Discarded;
                self.conn.counters().record_server_error();
                Err(ClientError::Server(message))
            }
            other => {
                self.state = TransactionState::Failed;
                Err(ClientError::unexpected("array", &other))
            }
        }
    }

    /// Abandons the transaction. Sends DISCARD while queuing, or UNWATCH when
    /// only keys were watched.
    pub fn discard(&mut self) -> ClientResult<()> {
        match self.state {
            TransactionState::Queuing => {
                self.expect_status(&CommandFrame::new(commands::DISCARD))?;
            }
            TransactionState::Open if !self.watched.is_empty() => {
                self.expect_status(&CommandFrame::new(commands::UNWATCH))?;
            }
            TransactionState::Open => {}
            state => {
                return Err(ClientError::InvalidState(format!(
                    "cannot discard a transaction in state {:?}",
                    state
                )))
            }
        }
        self.watched.clear();
        self.pinned = None;
        self.state = TransactionState::Discarded;
        Ok(())
    }

    /// Runs a committed transaction again: MULTI, every queued frame, EXEC.
    ///
    /// Keys watched for the first run are not watched again.
    pub fn replay(&mut self) -> ClientResult<bool> {
        self.require(TransactionState::Committed, "replay")?;
        let commands = std::mem::take(&mut self.pending);
        self.state = TransactionState::Open;
        for command in commands {
            self.enqueue(command)?;
        }
        self.commit()
    }

    fn begin(&mut self) -> ClientResult<()> {
        self.expect_status(&CommandFrame::new(commands::MULTI))?;
        self.state = TransactionState::Queuing;
        Ok(())
    }

    fn require(&self, expected: TransactionState, operation: &str) -> ClientResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(ClientError::InvalidState(format!(
                "{} requires state {:?}, transaction is {:?}",
                operation, expected, self.state
            )))
        }
    }

    fn expect_status(&mut self, frame: &CommandFrame) -> ClientResult<()> {
        match self.exchange(frame)? {
            Reply::Status(_) => Ok(()),
            Reply::Error(message) => {
                self.conn.counters().record_server_error();
                Err(ClientError::Server(message))
            }
            other => Err(ClientError::unexpected("status", &other)),
        }
    }

    /// One round trip. Before anything is held server-side the usual retry
    /// budget applies; afterwards the exchange is pinned to the generation
    /// that holds the WATCH/MULTI state and any reconnect fails it.
    fn exchange(&mut self, frame: &CommandFrame) -> ClientResult<Reply> {
        let pinned = self.pinned;
        let mode = if pinned.is_some() { Retry::Once } else { Retry::Budgeted };
        let result = self.conn.with_retry(mode, |conn| {
            if let Some(generation) = pinned {
                if conn.generation() != generation {
                    return Err(ClientError::InvalidState(
                        "connection was re-established; transaction state on the server was lost"
                            .to_string(),
                    ));
                }
            }
            conn.roundtrip(frame)
        });

        match result {
            Ok(reply) => {
                self.pinned = Some(self.conn.generation());
                Ok(reply)
            }
            Err(err) => {
                if pinned.is_some() {
                    self.state = TransactionState::Failed;
                    self.watched.clear();
                }
                Err(err)
            }
        }
    }
}

impl QueueCommand for Transaction<'_> {
    fn enqueue(&mut self, command: PendingCommand) -> ClientResult<()> {
        match self.state {
            TransactionState::Open => self.begin()?,
            TransactionState::Queuing => {}
            state => {
                return Err(ClientError::InvalidState(format!(
                    "cannot queue into a transaction in state {:?}",
                    state
                )))
            }
        }

        self.conn.counters().record_commands(1);
        match self.exchange(command.frame())? {
            reply if reply.is_status(commands::QUEUED) => {
                self.pending.push(command);
                Ok(())
            }
            Reply::Error(message) => {
                self.conn.counters().record_server_error();
                Err(ClientError::Server(message))
            }
            other => Err(ClientError::unexpected("QUEUED", &other)),
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        let frame = match self.state {
            TransactionState::Queuing => CommandFrame::new(commands::DISCARD),
            TransactionState::Open if !self.watched.is_empty() => {
                CommandFrame::new(commands::UNWATCH)
            }
            _ => return,
        };
        if !self.conn.is_connected() || self.pinned != Some(self.conn.generation()) {
            return;
        }
        debug!(state = ?self.state, "releasing transaction on drop");
        if let Err(err) = self.conn.roundtrip(&frame) {
            debug!(error = %err, "transaction cleanup failed; dropping stream");
            self.conn.drop_stream(ConnectionState::Broken);
        }
    }
}
