//! Error kinds for the session core.
//!
//! The five kinds are named by role, not by underlying cause, so that
//! callers can match on *why* an operation failed without caring whether
//! the root cause was a `std::io::Error`, a malformed response, or a state
//! conflict. See the `is_*` predicates below.

use thiserror::Error;

/// A specialized `Result` type for session core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the session core.
#[derive(Debug, Error)]
pub enum Error {
    /// An operation was attempted on a [`Session`](crate::session::Session)
    /// with no live [`Pool`](crate::pool::Pool).
    #[error("not connected")]
    NotConnected,

    /// `Connect` was called while a [`Pool`](crate::pool::Pool) was already
    /// populated.
    #[error("already connected")]
    AlreadyConnected,

    /// Dialing the server failed while constructing the pool (either the
    /// dedicated idle connection or one of the request connections).
    #[error("connection error: {0}")]
    Connection(#[source] std::io::Error),

    /// A socket read/write failed, or a per-line read deadline elapsed, on
    /// an already-established connection. Fatal: the owning pool's scope is
    /// cancelled as a result.
    #[error("io error: {0}")]
    Io(#[source] std::io::Error),

    /// The server returned an `ACK` line for a command.
    ///
    /// Does not cancel the owning pool's scope — the connection is still
    /// usable.
    #[error("protocol error on `{command}`: {message}")]
    Protocol { command: String, message: String },

    /// A response could not be decoded into the requested record type.
    #[error("parse error on field `{field}`: {value:?}")]
    Parse { field: &'static str, value: String },

    /// A schema was used that does not satisfy the parser's contract (for
    /// example, `parse_multi` called against a schema with no declared
    /// new-element key).
    #[error("invalid schema: {0}")]
    Schema(&'static str),
}

impl Error {
    /// True if this is a [`Error::NotConnected`].
    pub fn is_not_connected(&self) -> bool {
        matches!(self, Error::NotConnected)
    }

    /// True if this is a [`Error::AlreadyConnected`].
    pub fn is_already_connected(&self) -> bool {
        matches!(self, Error::AlreadyConnected)
    }

    /// True if this is a [`Error::Connection`].
    pub fn is_connection(&self) -> bool {
        matches!(self, Error::Connection(_))
    }

    /// True if this is a [`Error::Io`].
    pub fn is_io(&self) -> bool {
        matches!(self, Error::Io(_))
    }

    /// True if this is a [`Error::Protocol`] (the server returned `ACK`).
    pub fn is_protocol(&self) -> bool {
        matches!(self, Error::Protocol { .. })
    }

    pub(crate) fn connection(e: std::io::Error) -> Error {
        Error::Connection(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}
