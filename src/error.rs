//! Error type for the codec, pager and key-management layers.
//!
//! Every variant maps onto a numeric [`ErrorCode`] so callers that embed the
//! codec into a host engine can translate failures into the host's result codes.

use std::fmt;

use crate::consts::Pgno;

/// Result codes understood by the host storage engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    Ok = 0,
    Error = 1,
    Internal = 2,
    Abort = 4,
    Busy = 5,
    NoMem = 7,
    IoErr = 10,
    Corrupt = 11,
    NotFound = 12,
    Empty = 16,
    Misuse = 21,
    Auth = 23,
    NotADb = 26,
}

impl ErrorCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn name(self) -> &'static str {
        match self {
            ErrorCode::Ok => "OK",
            ErrorCode::Error => "ERROR",
            ErrorCode::Internal => "INTERNAL",
            ErrorCode::Abort => "ABORT",
            ErrorCode::Busy => "BUSY",
            ErrorCode::NoMem => "NOMEM",
            ErrorCode::IoErr => "IOERR",
            ErrorCode::Corrupt => "CORRUPT",
            ErrorCode::NotFound => "NOTFOUND",
            ErrorCode::Empty => "EMPTY",
            ErrorCode::Misuse => "MISUSE",
            ErrorCode::Auth => "AUTH",
            ErrorCode::NotADb => "NOTADB",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.as_i32())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Poly1305 tag mismatch on read. Never retried, never exposed as plaintext.
    #[error("page {pgno}: authentication tag mismatch")]
    Auth { pgno: Pgno },

    /// Conflicting or invalid configuration, rejected before any page I/O.
    #[error("misuse: {0}")]
    Misuse(String),

    /// Page 1 decoded but does not look like a database (wrong key or wrong file).
    #[error("file is not a database")]
    NotADb,

    #[error("out of memory allocating {0} bytes")]
    NoMem(usize),

    #[error("database is locked")]
    Busy,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database corrupt: {0}")]
    Corrupt(String),

    #[error("unknown database '{0}'")]
    UnknownDb(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn misuse<S: Into<String>>(msg: S) -> Self {
        Error::Misuse(msg.into())
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Auth { .. } => ErrorCode::Auth,
            Error::Misuse(_) => ErrorCode::Misuse,
            Error::NotADb => ErrorCode::NotADb,
            Error::NoMem(_) => ErrorCode::NoMem,
            Error::Busy => ErrorCode::Busy,
            Error::Io(_) => ErrorCode::IoErr,
            Error::Corrupt(_) => ErrorCode::Corrupt,
            Error::UnknownDb(_) => ErrorCode::Error,
            Error::Internal(_) => ErrorCode::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
