// wirekv-common - Wire-level types shared by the wirekv driver
//
// This crate defines the RESP2 command/reply model and the codec that moves
// it on and off the socket. It performs no I/O of its own beyond the readers
// and sinks handed to it.

pub mod codec;
pub mod commands;
pub mod error;
pub mod frame;
pub mod reply;

// Re-export for convenience
pub use codec::{encode_frame, encoded_len, read_reply, FrameSink, MAX_BULK_LEN};
pub use error::*;
pub use frame::{CommandFrame, ToArg};
pub use reply::Reply;
