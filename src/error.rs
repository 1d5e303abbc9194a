//! Error types, and the fatal-error macros for broken kernel invariants.
//!
//! Two kinds of failure exist in this crate and they are kept apart on purpose:
//!
//! - Running out of a resource the caller can reasonably handle (a page allocation) is reported
//!   through [`Result`] and [`OutOfMemory`].
//! - A caller breaking a contract (freeing a page it never allocated, committing a buffer it
//!   doesn't hold) or the kernel reaching a state it can't continue from goes through [`fatal!`],
//!   which logs and halts.

use core::{error, fmt};

pub use shared::ErrorKind;

/// The result of a fallible kernel operation.
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// A generic error that can be produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Error {
    /// The kind of the error.
    pub kind: ErrorKind,
}
impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self { kind }
    }
}
impl From<OutOfMemory> for Error {
    fn from(OutOfMemory: OutOfMemory) -> Self {
        ErrorKind::OutOfMemory.into()
    }
}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)
    }
}
impl error::Error for Error {}

/// The page allocator has no free pages left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutOfMemory;
impl fmt::Display for OutOfMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("out of physical pages")
    }
}
impl error::Error for OutOfMemory {}

/// Halt on a condition the kernel cannot recover from.
///
/// The message is logged at `error` level before panicking, so it reaches the console even when
/// the panic handler can't format anything.
macro_rules! fatal {
    ($($arg:tt)+) => {{
        ::log::error!($($arg)+);
        ::core::panic!($($arg)+)
    }};
}
pub(crate) use fatal;

/// Halt with [`fatal!`] unless the condition holds.
macro_rules! fatal_assert {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            $crate::error::fatal!($($arg)+);
        }
    };
}
pub(crate) use fatal_assert;
