//! # Queued Commands
//!
//! Purpose: Shared machinery behind pipelines and transactions: a pending
//! command pairs a frame with the code that consumes its reply, and a
//! `Handle<T>` exposes the decoded value once the queue has been flushed.
//!
//! ## Design Principles
//! 1. **Typed Results**: `queue` returns a `Handle<T>`; the type of each reply is
//!    fixed when the command is queued.
//! 2. **Ordering In The Data**: Replies are delivered by walking the pending list
//!    front to back, so delivery order is enqueue order by construction.
//! 3. **Replayable**: Delivery closures are `FnMut` and frames are kept, so a
//!    batch can be sent again.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use wirekv_common::{CommandFrame, Reply};

use crate::decode::FromReply;
use crate::error::{ClientError, ClientResult};
use crate::stats::ClientStats;

type Deliver = Box<dyn FnMut(Reply) -> ClientResult<()>>;

/// Decoded result of a queued command, available after flush/commit.
pub struct Handle<T> {
    slot: Rc<RefCell<Option<T>>>,
}

impl<T> Handle<T> {
    /// True once the owning queue delivered this command's reply.
    pub fn is_resolved(&self) -> bool {
        self.slot.borrow().is_some()
    }

    /// Moves the decoded value out.
    ///
    /// Returns `ClientError::Unresolved` before delivery (or after a previous
    /// `take`).
    pub fn take(&self) -> ClientResult<T> {
        self.slot.borrow_mut().take().ok_or(ClientError::Unresolved)
    }
}

impl<T: Clone> Handle<T> {
    /// Copy of the decoded value, leaving it in place.
    pub fn get(&self) -> Option<T> {
        self.slot.borrow().clone()
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

/// A frame waiting for its reply, plus what to do with that reply.
pub struct PendingCommand {
    frame: CommandFrame,
    deliver: Deliver,
}

impl PendingCommand {
    /// Pending command whose decoded value lands in the returned handle.
    pub fn with_handle<T, D>(frame: CommandFrame, mut decode: D) -> (Self, Handle<T>)
    where
        T: 'static,
        D: FnMut(Reply) -> ClientResult<T> + 'static,
    {
        let slot = Rc::new(RefCell::new(None));
        let target = slot.clone();
        let deliver = move |reply: Reply| -> ClientResult<()> {
            let value = decode(reply)?;
            *target.borrow_mut() = Some(value);
            Ok(())
        };
        let command = PendingCommand {
            frame,
            deliver: Box::new(deliver),
        };
        (command, Handle { slot })
    }

    /// Pending command whose decoded value is passed to `on_result`.
    pub fn with_callback<T, D, C>(frame: CommandFrame, mut decode: D, mut on_result: C) -> Self
    where
        D: FnMut(Reply) -> ClientResult<T> + 'static,
        C: FnMut(T) + 'static,
    {
        let deliver = move |reply: Reply| -> ClientResult<()> {
            on_result(decode(reply)?);
            Ok(())
        };
        PendingCommand {
            frame,
            deliver: Box::new(deliver),
        }
    }

    /// Frame sent for this command.
    pub fn frame(&self) -> &CommandFrame {
        &self.frame
    }

    fn deliver(&mut self, reply: Reply) -> ClientResult<()> {
        (self.deliver)(reply)
    }
}

impl fmt::Debug for PendingCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCommand")
            .field("frame", &self.frame)
            .finish_non_exhaustive()
    }
}

/// A queued command whose reply could not be delivered.
#[derive(Debug)]
pub struct CommandFailure {
    /// Position of the command in enqueue order.
    pub index: usize,
    /// Error reply or decode fault raised for it.
    pub error: ClientError,
}

fn check_reply_count(pending: &[PendingCommand], replies: &[Reply]) -> ClientResult<()> {
    if pending.len() == replies.len() {
        return Ok(());
    }
    Err(ClientError::Protocol(format!(
        "expected {} replies, received {}",
        pending.len(),
        replies.len()
    )))
}

/// Delivers replies to pending commands in enqueue order.
///
/// Stops at the first decode fault (an error reply included) and returns it;
/// later commands stay unresolved.
pub(crate) fn deliver_in_order(
    pending: &mut [PendingCommand],
    replies: Vec<Reply>,
    stats: &ClientStats,
) -> ClientResult<()> {
    check_reply_count(pending, &replies)?;
    for (command, reply) in pending.iter_mut().zip(replies) {
        if reply.is_error() {
            stats.record_server_error();
        }
        command.deliver(reply)?;
    }
    Ok(())
}

/// Delivers every reply in enqueue order, collecting per-command failures
/// instead of stopping at the first one.
pub(crate) fn deliver_all(
    pending: &mut [PendingCommand],
    replies: Vec<Reply>,
    stats: &ClientStats,
) -> ClientResult<Vec<CommandFailure>> {
    check_reply_count(pending, &replies)?;
    let mut failures = Vec::new();
    for (index, (command, reply)) in pending.iter_mut().zip(replies).enumerate() {
        if reply.is_error() {
            stats.record_server_error();
        }
        if let Err(error) = command.deliver(reply) {
            failures.push(CommandFailure { index, error });
        }
    }
    Ok(failures)
}

/// Queue-building interface shared by `Pipeline` and `Transaction`.
pub trait QueueCommand {
    /// Appends a pending command, performing whatever wire work the queue's
    /// protocol requires at enqueue time.
    fn enqueue(&mut self, command: PendingCommand) -> ClientResult<()>;

    /// Queues `frame`, decoding its reply with `FromReply`.
    fn queue<T>(&mut self, frame: CommandFrame) -> ClientResult<Handle<T>>
    where
        T: FromReply + 'static,
    {
        self.queue_with(frame, T::from_reply)
    }

    /// Queues `frame` with a custom decoder.
    fn queue_with<T, D>(&mut self, frame: CommandFrame, decode: D) -> ClientResult<Handle<T>>
    where
        T: 'static,
        D: FnMut(Reply) -> ClientResult<T> + 'static,
    {
        let (command, handle) = PendingCommand::with_handle(frame, decode);
        self.enqueue(command)?;
        Ok(handle)
    }

    /// Queues `frame`; `on_result` receives the decoded value on delivery.
    fn queue_callback<T, D, C>(
        &mut self,
        frame: CommandFrame,
        decode: D,
        on_result: C,
    ) -> ClientResult<()>
    where
        D: FnMut(Reply) -> ClientResult<T> + 'static,
        C: FnMut(T) + 'static,
    {
        self.enqueue(PendingCommand::with_callback(frame, decode, on_result))
    }
}
