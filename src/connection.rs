//! A single buffered TCP connection carrying the MPD text protocol.
//!
//! [`RwConnection`] is generic over its stream so the same send/receive
//! logic can be driven against a real [`tokio::net::TcpStream`] in the
//! pool and against [`tokio_test::io::Builder`] mocks in tests.

use crate::command::{Command, CommandList};
use crate::error::Error;
use crate::scope::Scope;
use std::future::Future;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufStream};
use tokio::time::timeout;
use tracing::{debug, warn};

/// A trait for types usable as a connection stream.
pub(crate) trait ConnectionStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ConnectionStream for T {}

/// Lines accumulated in a command's response body, status line excluded.
pub type ResponseLines = Vec<String>;

/// One TCP socket plus buffered line I/O, carrying the MPD protocol.
///
/// Single-owner: at most one send is outstanding at a time from the
/// caller's perspective (section 4.1, "State"). The pool is what
/// enforces this; `RwConnection` itself does no internal locking.
pub struct RwConnection<S> {
    stream: BufStream<S>,
    scope: Scope,
    read_timeout: Duration,
    banner: String,
}

impl<S: ConnectionStream> RwConnection<S> {
    /// Dial, read the banner, and (if `password` is non-empty) complete
    /// the password handshake (section 4.1, "Construction").
    #[tracing::instrument(skip_all)]
    pub async fn connect<F, Fut>(
        dial: F,
        scope: Scope,
        password: &str,
        read_timeout: Duration,
    ) -> Result<RwConnection<S>, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::io::Result<S>>,
    {
        let socket = dial().await.map_err(Error::connection)?;
        let mut conn = RwConnection {
            stream: BufStream::new(socket),
            scope,
            read_timeout,
            banner: String::new(),
        };

        let banner = conn.read_line_timeout().await?;
        if let Some(rest) = banner.strip_prefix("ACK ") {
            let (command, message) = parse_ack(&format!("ACK {rest}"));
            return Err(Error::Protocol { command, message });
        }
        conn.banner = banner;
        debug!(banner = %conn.banner, "received banner");

        if !password.is_empty() {
            let command = Command::new(crate::command::CommandKind::Password).arg(password);
            conn.send_command(&command).await?;
        }

        Ok(conn)
    }

    /// The server's protocol banner, read once at handshake.
    pub fn banner(&self) -> &str {
        &self.banner
    }

    /// Send a single command and return its response body lines.
    #[tracing::instrument(skip(self, command))]
    pub async fn send_command(&mut self, command: &Command) -> Result<ResponseLines, Error> {
        self.write_and_flush(&command.render()).await?;
        self.read_response().await
    }

    /// Send a batched command list and return its response body lines.
    ///
    /// Framing is identical to a single command: the batch's rendered
    /// form already contains `command_list_begin`/`command_list_end`.
    #[tracing::instrument(skip(self, batch))]
    pub async fn send_batch(&mut self, batch: &CommandList) -> Result<ResponseLines, Error> {
        self.write_and_flush(&batch.render()).await?;
        self.read_response().await
    }

    /// Send `idle` and block until the server reports changes, or this
    /// connection's scope is cancelled. Returns `None` on cancellation.
    #[tracing::instrument(skip(self))]
    pub async fn send_idle(&mut self) -> Result<Option<ResponseLines>, Error> {
        let command = Command::new(crate::command::CommandKind::Idle);
        self.write_and_flush(&command.render()).await?;

        let mut body = Vec::new();
        loop {
            let Some(line) = self.read_line_cancellable().await? else {
                return Ok(None);
            };
            if line.starts_with("OK") {
                return Ok(Some(body));
            }
            if let Some(rest) = line.strip_prefix("ACK ") {
                let (command, message) = parse_ack(&format!("ACK {rest}"));
                return Err(Error::Protocol { command, message });
            }
            body.push(line);
        }
    }

    async fn write_and_flush(&mut self, payload: &str) -> Result<(), Error> {
        self.stream.write_all(payload.as_bytes()).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Read response lines until `OK` or `ACK` terminates them (section
    /// 4.1, "Single-command send"). Each line gets its own full read
    /// deadline, reset after every received line.
    async fn read_response(&mut self) -> Result<ResponseLines, Error> {
        let mut body = Vec::new();
        loop {
            let line = self.read_line_timeout().await?;
            if line.starts_with("OK") {
                return Ok(body);
            }
            if let Some(rest) = line.strip_prefix("ACK ") {
                let (command, message) = parse_ack(&format!("ACK {rest}"));
                warn!(command, message, "server returned ACK");
                return Err(Error::Protocol { command, message });
            }
            body.push(line);
        }
    }

    async fn read_line_timeout(&mut self) -> Result<String, Error> {
        let mut line = String::new();
        let n = timeout(self.read_timeout, self.stream.read_line(&mut line))
            .await
            .map_err(|_| {
                Error::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "per-line read deadline elapsed",
                ))
            })??;
        if n == 0 {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed by peer",
            )));
        }
        trim_line_ending(&mut line);
        Ok(line)
    }

    /// Read one line with no timeout, racing against scope cancellation
    /// so that a cancelled scope is what unblocks an idle read (section
    /// 9, "Idle loop unblocked by close").
    async fn read_line_cancellable(&mut self) -> Result<Option<String>, Error> {
        let mut line = String::new();
        tokio::select! {
            result = self.stream.read_line(&mut line) => {
                let n = result?;
                if n == 0 {
                    return Err(Error::Io(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "connection closed by peer",
                    )));
                }
                trim_line_ending(&mut line);
                Ok(Some(line))
            }
            _ = self.scope.cancelled() => Ok(None),
        }
    }
}

fn trim_line_ending(line: &mut String) {
    if line.ends_with('\n') {
        line.pop();
        if line.ends_with('\r') {
            line.pop();
        }
    }
}

/// Parse `ACK [<code>@<idx>] {<command>} <message>` with a matcher that
/// tolerates any bracketed code prefix (section 4.1).
fn parse_ack(line: &str) -> (String, String) {
    let rest = line.strip_prefix("ACK ").unwrap_or(line).trim_start();
    let after_bracket = rest.splitn(2, ']').nth(1).unwrap_or("").trim_start();

    if let Some(open) = after_bracket.find('{') {
        if let Some(close_rel) = after_bracket[open..].find('}') {
            let close = open + close_rel;
            let command = after_bracket[open + 1..close].to_owned();
            let message = after_bracket[close + 1..].trim_start().to_owned();
            return (command, message);
        }
    }
    (String::new(), after_bracket.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandKind;

    #[tokio::test]
    async fn connects_without_password() {
        let stream = tokio_test::io::Builder::new()
            .read(b"OK MPD 0.23.5\n")
            .build();
        let conn = RwConnection::connect(
            move || async move { Ok(stream) },
            Scope::root(),
            "",
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert_eq!(conn.banner(), "OK MPD 0.23.5");
    }

    #[tokio::test]
    async fn completes_password_handshake() {
        let stream = tokio_test::io::Builder::new()
            .read(b"OK MPD 0.23.5\n")
            .write(b"password \"12345678\"\n")
            .read(b"OK\n")
            .build();
        let conn = RwConnection::connect(
            move || async move { Ok(stream) },
            Scope::root(),
            "12345678",
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert_eq!(conn.banner(), "OK MPD 0.23.5");
    }

    #[tokio::test]
    async fn bad_password_is_protocol_error() {
        let stream = tokio_test::io::Builder::new()
            .read(b"OK MPD 0.23.5\n")
            .write(b"password \"wrong\"\n")
            .read(b"ACK [3@0] {password} incorrect password\n")
            .build();
        let err = RwConnection::connect(
            move || async move { Ok(stream) },
            Scope::root(),
            "wrong",
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        assert!(err.is_protocol());
    }

    #[tokio::test]
    async fn sends_single_command_and_collects_body() {
        let stream = tokio_test::io::Builder::new()
            .read(b"OK MPD 0.23.5\n")
            .write(b"status\n")
            .read(b"volume: 50\n")
            .read(b"state: play\n")
            .read(b"OK\n")
            .build();
        let mut conn = RwConnection::connect(
            move || async move { Ok(stream) },
            Scope::root(),
            "",
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        let body = conn
            .send_command(&Command::new(CommandKind::Status))
            .await
            .unwrap();
        assert_eq!(body, vec!["volume: 50".to_string(), "state: play".to_string()]);
    }

    #[tokio::test]
    async fn ack_response_is_protocol_error_and_connection_stays_usable() {
        let stream = tokio_test::io::Builder::new()
            .read(b"OK MPD 0.23.5\n")
            .write(b"play\n")
            .read(b"ACK [2@0] {play} no such song\n")
            .build();
        let mut conn = RwConnection::connect(
            move || async move { Ok(stream) },
            Scope::root(),
            "",
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        let err = conn
            .send_command(&Command::new(CommandKind::Play))
            .await
            .unwrap_err();
        match err {
            Error::Protocol { command, message } => {
                assert_eq!(command, "play");
                assert_eq!(message, "no such song");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn send_batch_renders_command_list_frame() {
        let stream = tokio_test::io::Builder::new()
            .read(b"OK MPD 0.23.5\n")
            .write(b"command_list_begin\nplay\nstatus\ncommand_list_end\n")
            .read(b"OK\n")
            .build();
        let mut conn = RwConnection::connect(
            move || async move { Ok(stream) },
            Scope::root(),
            "",
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        let mut batch = CommandList::new();
        batch.push(Command::new(CommandKind::Play));
        batch.push(Command::new(CommandKind::Status));
        let body = conn.send_batch(&batch).await.unwrap();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn idle_returns_changed_lines() {
        let stream = tokio_test::io::Builder::new()
            .read(b"OK MPD 0.23.5\n")
            .write(b"idle\n")
            .read(b"changed: player\n")
            .read(b"changed: mixer\n")
            .read(b"OK\n")
            .build();
        let mut conn = RwConnection::connect(
            move || async move { Ok(stream) },
            Scope::root(),
            "",
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        let body = conn.send_idle().await.unwrap().unwrap();
        assert_eq!(
            body,
            vec!["changed: player".to_string(), "changed: mixer".to_string()]
        );
    }

    #[tokio::test]
    async fn idle_unblocked_by_scope_cancellation() {
        let stream = tokio_test::io::Builder::new()
            .read(b"OK MPD 0.23.5\n")
            .write(b"idle\n")
            .wait(Duration::from_secs(3600))
            .build();
        let scope = Scope::root();
        let mut conn = RwConnection::connect(
            move || async move { Ok(stream) },
            scope.clone(),
            "",
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        let idle_scope = scope.clone();
        let handle = tokio::spawn(async move { conn.send_idle().await });
        idle_scope.cancel();
        let result = handle.await.unwrap().unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn per_line_timeout_elapses_on_stuck_server() {
        let stream = tokio_test::io::Builder::new()
            .read(b"OK MPD 0.23.5\n")
            .write(b"status\n")
            .wait(Duration::from_secs(3600))
            .build();
        let mut conn = RwConnection::connect(
            move || async move { Ok(stream) },
            Scope::root(),
            "",
            Duration::from_millis(50),
        )
        .await
        .unwrap();

        let err = conn
            .send_command(&Command::new(CommandKind::Status))
            .await
            .unwrap_err();
        assert!(err.is_io());
    }
}
