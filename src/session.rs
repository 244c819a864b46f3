//! The user-visible session facade: Connect/Disconnect/IsConnected plus
//! a send surface and event subscription (section 4.5).

use std::fmt;
use std::future::Future;
use std::num::{NonZeroU16, NonZeroU8};
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::command::Command;
use crate::connection::ResponseLines;
use crate::error::Error;
use crate::events::{Publisher, SessionEvent, Subscriber};
use crate::pool::{DialFactory, Pool, PoolConfig};
use crate::scope::Scope;

/// An opaque caller-supplied request handle, passed through to `tracing`
/// fields without interpretation (section 1: request-scoped logging
/// context propagation is out of scope beyond this pass-through).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestId(String);

impl RequestId {
    pub fn new(id: impl Into<String>) -> RequestId {
        RequestId(id.into())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Constructor-time configuration for a [`Session`] (section 6, "Config
/// surface").
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub host: String,
    pub port: u16,
    /// Empty skips the password handshake.
    pub password: String,
    pub pool_size: NonZeroU8,
    pub batch_cap: NonZeroU16,
    pub read_timeout: Duration,
    pub ping_interval: Duration,
    pub event_capacity: usize,
    pub event_send_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> SessionConfig {
        SessionConfig {
            host: "127.0.0.1".to_owned(),
            port: 6600,
            password: String::new(),
            pool_size: NonZeroU8::new(4).unwrap(),
            batch_cap: NonZeroU16::new(32).unwrap(),
            read_timeout: Duration::from_secs(5),
            ping_interval: Duration::from_secs(30),
            event_capacity: 32,
            event_send_timeout: Duration::from_millis(500),
        }
    }
}

struct SessionInner {
    pool: Arc<Pool<TcpStream>>,
    scope: Scope,
}

/// A durable session against an MPD server (section 2, "Session
/// facade"). Owns at most one live [`Pool`] at a time.
pub struct Session {
    inner: Arc<Mutex<Option<SessionInner>>>,
    events: Arc<Publisher<SessionEvent>>,
    root_scope: Scope,
    config: SessionConfig,
}

impl Session {
    pub fn new(config: SessionConfig) -> Session {
        Session {
            inner: Arc::new(Mutex::new(None)),
            events: Arc::new(Publisher::new(
                config.event_capacity,
                config.event_send_timeout,
            )),
            root_scope: Scope::root(),
            config,
        }
    }

    /// Subscribe to session lifecycle and change-notification events.
    pub async fn subscribe(&self) -> Subscriber<SessionEvent> {
        self.events.subscribe().await
    }

    /// Open a pool against the configured server (section 4.5,
    /// "Connect").
    #[tracing::instrument(skip(self), fields(request_id = %request_id))]
    pub async fn connect(&self, request_id: RequestId) -> Result<(), Error> {
        let mut guard = self.inner.lock().await;
        if guard.is_some() {
            return Err(Error::AlreadyConnected);
        }

        let scope = self.root_scope.child();
        let dial = self.dial_factory();
        let pool_config = PoolConfig {
            pool_size: self.config.pool_size,
            password: self.config.password.clone(),
            read_timeout: self.config.read_timeout,
            ping_interval: self.config.ping_interval,
            batch_cap: self.config.batch_cap,
        };

        let on_disconnect = make_on_disconnect(Arc::downgrade(&self.inner), Arc::downgrade(&self.events));
        let pool = Pool::build(dial, &scope, pool_config, self.events.clone(), on_disconnect).await?;

        *guard = Some(SessionInner { pool, scope });
        drop(guard);

        info!("session connected");
        self.events.notify(SessionEvent::Connected).await;
        Ok(())
    }

    /// Tear the pool down and emit `Disconnected` (section 4.5,
    /// "Disconnect"). Safe to race with the pool's own on-disconnect
    /// callback: whichever clears the slot first wins, the other is a
    /// no-op.
    #[tracing::instrument(skip(self), fields(request_id = %request_id))]
    pub async fn disconnect(&self, request_id: RequestId) -> Result<(), Error> {
        let mut guard = self.inner.lock().await;
        match guard.take() {
            Some(inner) => {
                inner.scope.cancel();
                drop(guard);
                debug!("session disconnected");
                self.events.notify(SessionEvent::Disconnected).await;
                Ok(())
            }
            None => Err(Error::NotConnected),
        }
    }

    /// True iff a pool is currently populated (section 4.5,
    /// "IsConnected").
    pub async fn is_connected(&self) -> bool {
        self.inner.lock().await.is_some()
    }

    /// Send a single command through the pool (section 4.5, "Send
    /// operations"). Releases the session mutex before the send's I/O
    /// wait (section 9, open question on send-under-mutex).
    #[tracing::instrument(skip(self, command), fields(request_id = %request_id))]
    pub async fn send_single(
        &self,
        request_id: RequestId,
        command: &Command,
    ) -> Result<ResponseLines, Error> {
        let pool = self.live_pool().await?;
        pool.send_single(command).await
    }

    /// Send a batch of commands through the pool.
    #[tracing::instrument(skip(self, commands), fields(request_id = %request_id))]
    pub async fn send_batch(
        &self,
        request_id: RequestId,
        commands: Vec<Command>,
    ) -> Result<Vec<ResponseLines>, Error> {
        let pool = self.live_pool().await?;
        pool.send_batch(commands).await
    }

    async fn live_pool(&self) -> Result<Arc<Pool<TcpStream>>, Error> {
        let guard = self.inner.lock().await;
        match guard.as_ref() {
            Some(inner) => Ok(inner.pool.clone()),
            None => Err(Error::NotConnected),
        }
    }

    fn dial_factory(&self) -> DialFactory<TcpStream> {
        let host = self.config.host.clone();
        let port = self.config.port;
        Arc::new(move || {
            let host = host.clone();
            Box::pin(async move { TcpStream::connect((host.as_str(), port)).await })
                as Pin<Box<dyn Future<Output = std::io::Result<TcpStream>> + Send>>
        })
    }
}

/// A `CancellationToken` is not cancelled by being dropped, so a `Session`
/// dropped while still connected must cancel its own root scope here —
/// otherwise the pool's background tasks and its N+1 sockets outlive the
/// handle that owned them.
impl Drop for Session {
    fn drop(&mut self) {
        self.root_scope.cancel();
    }
}

/// Build the pool's on-disconnect callback. Holds only weak references
/// (section 9, "Cyclic context / on-disconnect callback") so the pool
/// never keeps the session alive, and clears the slot exactly once.
fn make_on_disconnect(
    inner: Weak<Mutex<Option<SessionInner>>>,
    events: Weak<Publisher<SessionEvent>>,
) -> impl FnOnce() + Send + 'static {
    move || {
        tokio::spawn(async move {
            let (Some(inner), Some(events)) = (inner.upgrade(), events.upgrade()) else {
                return;
            };
            let mut guard = inner.lock().await;
            if guard.take().is_some() {
                drop(guard);
                events.notify(SessionEvent::Disconnected).await;
            }
        });
    }
}
