//! Outcome codes and error types shared by every client operation.
//!
//! [`ErrorCode`] is the closed, ordinal set of outcomes a cluster call can
//! produce. [`Error`] is what fallible functions return; every variant maps
//! back to exactly one [`ErrorCode`] through [`Error::code`].

use std::fmt;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

/// Outcome of a single operation.
///
/// Ordinals are stable and may be used as indexes into fixed tables
/// (see [`ErrorCode::index`] and [`ErrorCode::ALL`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[repr(u8)]
pub enum ErrorCode {
    #[default]
    Ok = 0,
    ClusterDown = 1,
    NoSuchKey = 2,
    Timeout = 3,
    LockFail = 4,
    CleanBinlogFail = 5,
    UserExists = 6,
    PermissionDenied = 7,
    PasswordError = 8,
    UnknownUser = 9,
}

impl ErrorCode {
    /// Every code in ordinal order.
    pub const ALL: [ErrorCode; 10] = [
        ErrorCode::Ok,
        ErrorCode::ClusterDown,
        ErrorCode::NoSuchKey,
        ErrorCode::Timeout,
        ErrorCode::LockFail,
        ErrorCode::CleanBinlogFail,
        ErrorCode::UserExists,
        ErrorCode::PermissionDenied,
        ErrorCode::PasswordError,
        ErrorCode::UnknownUser,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn is_ok(self) -> bool {
        self == ErrorCode::Ok
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Ok => "OK",
            ErrorCode::ClusterDown => "ClusterDown",
            ErrorCode::NoSuchKey => "NoSuchKey",
            ErrorCode::Timeout => "Timeout",
            ErrorCode::LockFail => "LockFail",
            ErrorCode::CleanBinlogFail => "CleanBinlogFail",
            ErrorCode::UserExists => "UserExists",
            ErrorCode::PermissionDenied => "PermissionDenied",
            ErrorCode::PasswordError => "PasswordError",
            ErrorCode::UnknownUser => "UnknownUser",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<i32> for ErrorCode {
    type Error = Error;

    fn try_from(value: i32) -> Result<Self> {
        usize::try_from(value)
            .ok()
            .and_then(|i| ErrorCode::ALL.get(i).copied())
            .ok_or_else(|| Error::InvalidArgument(format!("unknown error ordinal {value}")))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The cluster answered with (or could not be reached and produced) a non-OK outcome
    #[error("{code}: {message}")]
    Status { code: ErrorCode, message: String },

    /// A scan cursor was read or advanced after its last pair
    #[error("scan cursor exhausted")]
    ScanExhausted,

    /// The session was closed before or during the call
    #[error("session is closed")]
    SessionClosed,

    /// Caller supplied an unusable argument (empty member list, bad address, ...)
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration loading or validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The session runtime or dispatcher could not be started
    #[error("runtime error: {0}")]
    Runtime(String),
}

impl Error {
    pub fn status(
        code: ErrorCode,
        message: impl Into<String>,
    ) -> Self {
        Error::Status {
            code,
            message: message.into(),
        }
    }

    /// The outcome code recorded for this error.
    ///
    /// Local faults have no remote outcome; they are folded into the closest
    /// category so callers can keep dispatching on the code alone.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Status { code, .. } => *code,
            Error::ScanExhausted => ErrorCode::NoSuchKey,
            Error::SessionClosed => ErrorCode::ClusterDown,
            Error::InvalidArgument(_) => ErrorCode::PermissionDenied,
            Error::Config(_) | Error::Runtime(_) => ErrorCode::ClusterDown,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, Error::ScanExhausted)
    }
}

impl From<ErrorCode> for Error {
    fn from(code: ErrorCode) -> Self {
        Error::status(code, code.as_str())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Runtime(err.to_string())
    }
}

/// Folds a call result into the code stored in the per-thread error slot.
pub(crate) fn outcome_of<T>(result: &Result<T>) -> ErrorCode {
    match result {
        Ok(_) => ErrorCode::Ok,
        Err(e) => e.code(),
    }
}
