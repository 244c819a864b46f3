//! Session core for a Music Player Daemon (MPD) client.
//!
//! This crate owns the part of an MPD client that is hard to get right:
//! a pool of request/response connections, a dedicated idle connection
//! that blocks until the server reports a change, a periodic ping sweep
//! that keeps pooled connections warm, and orderly teardown when any of
//! those fail. [`Session`](session::Session) is the entry point.
//!
//! A thin domain API (player controls, playlists, outputs, the directory
//! tree) is expected to sit on top of this crate's [`Command`]/[`Param`]
//! model and [`response`] schema, encoding a command, sending it via
//! [`Session::send_single`](session::Session::send_single) or
//! [`Session::send_batch`](session::Session::send_batch), and decoding
//! the response — but that layer is out of this crate's scope.

pub mod command;
pub mod connection;
pub mod error;
pub mod events;
pub mod pool;
pub mod response;
pub mod scope;
pub mod session;

pub use command::{Command, CommandKind, CommandList, Param};
pub use error::{Error, Result};
pub use events::{Publisher, SessionEvent, Subscriber, Subsystem};
pub use response::{field, FromFields, Schema};
pub use scope::Scope;
pub use session::{RequestId, Session, SessionConfig};

/// The default MPD port, per the protocol's own convention.
pub const DEFAULT_PORT: u16 = 6600;
pub const DEFAULT_HOST: &str = "127.0.0.1";
