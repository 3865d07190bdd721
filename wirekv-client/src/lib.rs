//! # wirekv Sync Client
//!
//! Purpose: Provide a synchronous RESP2 driver for one connection: a codec-backed
//! dispatcher with transparent retry, pipelines, MULTI/EXEC transactions and
//! cursor scans.
//!
//! ## Design Principles
//! 1. **Single Owner**: A `Connection` is used through `&mut`; pipelines and
//!    transactions hold that borrow, so concurrent use does not compile.
//! 2. **Minimal Allocation**: Commands are encoded into pooled send chunks and
//!    flushed with one vectored write.
//! 3. **Retry At One Seam**: All fault classification and reconnects happen in
//!    the dispatch loop.
//! 4. **Typed Replies**: `FromReply` and `Handle<T>` carry reply types from the
//!    point a command is issued.

mod commands;
mod connection;
mod stream;

pub mod config;
pub mod decode;
pub mod error;
pub mod pipeline;
pub mod queue;
pub mod retry;
pub mod scan;
pub mod send_buffer;
pub mod stats;
pub mod transaction;
pub mod version;

pub use commands::Ttl;
pub use config::{ClientConfig, TlsConfig};
pub use connection::{Connection, ConnectionState};
pub use decode::FromReply;
pub use error::{classify, ClientError, ClientResult, Fault};
pub use pipeline::Pipeline;
pub use queue::{CommandFailure, Handle, PendingCommand, QueueCommand};
pub use retry::{Retry, RetryPolicy};
pub use scan::{ScanIter, ScanKind, ScanOptions, ScanPage};
pub use stats::StatsSnapshot;
pub use transaction::{Transaction, TransactionState};
pub use version::ServerVersion;

// Wire types callers need to build frames and read replies.
pub use wirekv_common::{commands as command_names, CommandFrame, Reply, ToArg};
