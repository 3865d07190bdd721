//! # Command Frames
//!
//! Purpose: Build the ordered argument list of one command and turn typed
//! arguments into raw bytes at the call site.
//!
//! ## Design Principles
//! 1. **Explicit Serialization**: Every argument type implements `ToArg`; there
//!    is no runtime type inspection.
//! 2. **Immutable Once Queued**: Frames are cloned cheaply (`Bytes` arguments)
//!    so queues can retain them for replay.
//! 3. **Non-Empty Invariant**: A frame always carries its command name first.

use std::fmt;

use bytes::Bytes;

use crate::error::{WireError, WireResult};

/// Converts a value into one raw command argument.
pub trait ToArg {
    /// Returns the argument bytes as they should appear on the wire.
    fn to_arg(&self) -> Bytes;
}

impl<T: ToArg + ?Sized> ToArg for &T {
    fn to_arg(&self) -> Bytes {
        (**self).to_arg()
    }
}

impl ToArg for [u8] {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self)
    }
}

impl<const N: usize> ToArg for [u8; N] {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self)
    }
}

impl ToArg for Vec<u8> {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self)
    }
}

impl ToArg for Bytes {
    fn to_arg(&self) -> Bytes {
        self.clone()
    }
}

impl ToArg for str {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

impl ToArg for String {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

macro_rules! integer_to_arg {
    ($($ty:ty),*) => {
        $(
            impl ToArg for $ty {
                fn to_arg(&self) -> Bytes {
                    Bytes::from(self.to_string())
                }
            }
        )*
    };
}

integer_to_arg!(i32, i64, u32, u64, usize);

impl ToArg for f64 {
    fn to_arg(&self) -> Bytes {
        // The server spells infinities with an explicit sign.
        if self.is_infinite() {
            let text: &'static [u8] = if *self > 0.0 { b"+inf" } else { b"-inf" };
            return Bytes::from_static(text);
        }
        Bytes::from(self.to_string())
    }
}

/// One command: the name followed by its arguments.
#[derive(Clone, PartialEq, Eq)]
pub struct CommandFrame {
    args: Vec<Bytes>,
}

impl CommandFrame {
    /// Starts a frame with the command name.
    pub fn new(name: impl ToArg) -> Self {
        CommandFrame {
            args: vec![name.to_arg()],
        }
    }

    /// Builds a frame from pre-encoded arguments.
    ///
    /// Fails with `WireError::EmptyFrame` when `args` is empty.
    pub fn from_args(args: Vec<Bytes>) -> WireResult<Self> {
        if args.is_empty() {
            return Err(WireError::EmptyFrame);
        }
        Ok(CommandFrame { args })
    }

    /// Appends one argument (builder style).
    pub fn arg(mut self, arg: impl ToArg) -> Self {
        self.args.push(arg.to_arg());
        self
    }

    /// Appends every argument from an iterator (builder style).
    pub fn args_from<I>(mut self, args: I) -> Self
    where
        I: IntoIterator,
        I::Item: ToArg,
    {
        self.args.extend(args.into_iter().map(|arg| arg.to_arg()));
        self
    }

    /// Appends one argument in place.
    pub fn push(&mut self, arg: impl ToArg) {
        self.args.push(arg.to_arg());
    }

    /// Command name (first argument).
    pub fn name(&self) -> &[u8] {
        &self.args[0]
    }

    /// All arguments including the command name.
    pub fn args(&self) -> &[Bytes] {
        &self.args
    }

    /// Number of arguments including the command name (always >= 1).
    pub fn argc(&self) -> usize {
        self.args.len()
    }
}

impl fmt::Debug for CommandFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommandFrame({})", self)
    }
}

impl fmt::Display for CommandFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Arguments may be large or binary; only the name is printed in full.
        write!(f, "{}", String::from_utf8_lossy(self.name()))?;
        if self.args.len() > 1 {
            write!(f, " (+{} args)", self.args.len() - 1)?;
        }
        Ok(())
    }
}
