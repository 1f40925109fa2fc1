//! Error taxonomy shared by every component of the agent.
//!
//! Success is `Ok(())`; everything else carries an [`ErrorKind`] plus a short
//! human-readable message that is forwarded verbatim to async receivers and,
//! for D-Bus callers, attached to the typed error reply.

use std::fmt;
use std::io;

/// Classification of a failure.
///
/// Radio/protocol kinds (`NoAck`, `ChannelAccessFailure`, `FcsErr`, …) are
/// surfaced unchanged from the Thread stack; the rest originate in the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Generic,
    InvalidState,
    InvalidArgs,
    Busy,
    Parse,
    NoBufs,
    NotImplemented,
    NotFound,
    Abort,
    ResponseTimeout,
    Duplicated,
    Already,
    NoAck,
    ChannelAccessFailure,
    FcsErr,
    NameConflict,
    Dbus,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Generic => "generic",
            ErrorKind::InvalidState => "invalid state",
            ErrorKind::InvalidArgs => "invalid args",
            ErrorKind::Busy => "busy",
            ErrorKind::Parse => "parse",
            ErrorKind::NoBufs => "no bufs",
            ErrorKind::NotImplemented => "not implemented",
            ErrorKind::NotFound => "not found",
            ErrorKind::Abort => "abort",
            ErrorKind::ResponseTimeout => "response timeout",
            ErrorKind::Duplicated => "duplicated",
            ErrorKind::Already => "already",
            ErrorKind::NoAck => "no ack",
            ErrorKind::ChannelAccessFailure => "channel access failure",
            ErrorKind::FcsErr => "fcs error",
            ErrorKind::NameConflict => "name conflict",
            ErrorKind::Dbus => "dbus",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error with its classification and a short context message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Error {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error {
            kind,
            message: String::new(),
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::new(ErrorKind::Generic, err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_kind_and_message() {
        let err = Error::new(ErrorKind::InvalidState, "OT is not initialized");
        assert_eq!(err.to_string(), "invalid state: OT is not initialized");
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn test_kind_conversion_keeps_kind() {
        let err: Error = ErrorKind::Busy.into();
        assert_eq!(err.kind(), ErrorKind::Busy);
        assert!(err.message().is_empty());
    }
}
