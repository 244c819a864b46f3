//! Connection pool: N request connections lent through a bounded handoff
//! channel, one dedicated idle connection, and a periodic ping sweep.
//!
//! Grounded directly on the reference pool construction in this
//! workspace's prior art (`newMpdRWPool`): one dial factory builds the
//! idle RW and the N request RWs, three background tasks are spawned,
//! and any fatal I/O from any of them cancels the pool's scope.

use std::future::Future;
use std::num::{NonZeroU16, NonZeroU8};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, warn};

use crate::command::{Command, CommandKind, CommandList};
use crate::connection::{ConnectionStream, ResponseLines, RwConnection};
use crate::error::Error;
use crate::events::{Publisher, SessionEvent, Subsystem};
use crate::scope::Scope;

/// A closure that dials a fresh stream, boxed so the pool can call it
/// repeatedly to build its idle and request connections.
pub type DialFactory<S> =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = std::io::Result<S>> + Send>> + Send + Sync>;

/// Tunables the pool needs beyond the dial factory itself.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub pool_size: NonZeroU8,
    pub password: String,
    pub read_timeout: Duration,
    pub ping_interval: Duration,
    pub batch_cap: NonZeroU16,
}

/// A fixed-size bag of request connections plus one dedicated idle
/// connection and a periodic ping sweep (section 4.3).
pub struct Pool<S> {
    scope: Scope,
    handoff_rx: Mutex<mpsc::Receiver<RwConnection<S>>>,
    handoff_tx: mpsc::Sender<RwConnection<S>>,
    events: Arc<Publisher<SessionEvent>>,
    batch_cap: usize,
}

impl<S: ConnectionStream + 'static> Pool<S> {
    /// Build a pool (section 4.3, "Construction"). `on_disconnect` is
    /// invoked exactly once, by the teardown watcher, when the pool's
    /// scope is cancelled for any reason.
    #[tracing::instrument(skip_all)]
    pub async fn build(
        dial: DialFactory<S>,
        parent: &Scope,
        config: PoolConfig,
        events: Arc<Publisher<SessionEvent>>,
        on_disconnect: impl FnOnce() + Send + 'static,
    ) -> Result<Arc<Pool<S>>, Error> {
        let scope = parent.child();

        let idle = Self::dial_one(&dial, scope.clone(), &config).await.map_err(|e| {
            error!("failed to build idle connection");
            scope.cancel();
            e
        })?;

        let mut request_rws = Vec::with_capacity(config.pool_size.get() as usize);
        for _ in 0..config.pool_size.get() {
            match Self::dial_one(&dial, scope.clone(), &config).await {
                Ok(rw) => request_rws.push(rw),
                Err(e) => {
                    error!("failed to build request connection");
                    scope.cancel();
                    drop(request_rws);
                    return Err(e);
                }
            }
        }

        let pool_size = config.pool_size.get() as usize;
        let (handoff_tx, handoff_rx) = mpsc::channel(pool_size);
        for rw in request_rws {
            // capacity equals pool_size so this never blocks.
            handoff_tx.try_send(rw).expect("handoff capacity equals pool size");
        }

        let pool = Arc::new(Pool {
            scope: scope.clone(),
            handoff_rx: Mutex::new(handoff_rx),
            handoff_tx,
            events,
            batch_cap: config.batch_cap.get() as usize,
        });

        spawn_teardown_watcher(scope.clone(), on_disconnect);
        spawn_idle_loop(idle, scope.clone(), pool.events.clone());
        spawn_ping_loop(pool.clone(), config.ping_interval, pool_size);

        Ok(pool)
    }

    async fn dial_one(
        dial: &DialFactory<S>,
        scope: Scope,
        config: &PoolConfig,
    ) -> Result<RwConnection<S>, Error> {
        let dial = dial.clone();
        RwConnection::connect(move || dial(), scope, &config.password, config.read_timeout).await
    }

    /// This pool's cancellation scope. Cancelling it tears down every
    /// connection and background task the pool owns.
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Send a single command, using one connection from the handoff
    /// (section 4.3, "Send single command").
    #[tracing::instrument(skip(self, command))]
    pub async fn send_single(&self, command: &Command) -> Result<ResponseLines, Error> {
        self.check_live()?;
        let mut rw = self.checkout().await?;
        let result = rw.send_command(command).await;
        self.checkin(rw).await;
        if let Err(e) = &result {
            if e.is_io() {
                warn!("fatal I/O on single send, cancelling pool");
                self.scope.cancel();
            }
        }
        result
    }

    /// Send a sequence of single commands as batches of at most the
    /// configured cap (section 4.3, "Send batch command"). Aborts on the
    /// first batch error without sending the remainder.
    #[tracing::instrument(skip(self, commands))]
    pub async fn send_batch(&self, commands: Vec<Command>) -> Result<Vec<ResponseLines>, Error> {
        self.check_live()?;
        let batches = CommandList::chunks(commands, self.batch_cap);
        let mut results = Vec::with_capacity(batches.len());
        for batch in batches {
            let mut rw = self.checkout().await?;
            let result = rw.send_batch(&batch).await;
            self.checkin(rw).await;
            match result {
                Ok(lines) => results.push(lines),
                Err(e) => {
                    if e.is_io() {
                        warn!("fatal I/O on batch send, cancelling pool");
                        self.scope.cancel();
                    }
                    return Err(e);
                }
            }
        }
        Ok(results)
    }

    /// Cancelled pools reject new sends immediately rather than handing
    /// out a connection whose underlying socket may already be gone
    /// (section 4.6: "Cancelled... subsequent sends fail").
    fn check_live(&self) -> Result<(), Error> {
        if self.scope.is_cancelled() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "pool scope is cancelled",
            )));
        }
        Ok(())
    }

    async fn checkout(&self) -> Result<RwConnection<S>, Error> {
        self.handoff_rx
            .lock()
            .await
            .recv()
            .await
            .ok_or(Error::NotConnected)
    }

    async fn checkin(&self, rw: RwConnection<S>) {
        // the channel's capacity is exactly the pool size, so a send
        // here can only fail if the pool is already torn down.
        let _ = self.handoff_tx.send(rw).await;
    }
}

fn spawn_teardown_watcher(scope: Scope, on_disconnect: impl FnOnce() + Send + 'static) {
    tokio::spawn(async move {
        scope.cancelled().await;
        debug!("pool scope cancelled, running on-disconnect callback");
        on_disconnect();
    });
}

fn spawn_idle_loop<S: ConnectionStream + 'static>(
    mut idle: RwConnection<S>,
    scope: Scope,
    events: Arc<Publisher<SessionEvent>>,
) {
    tokio::spawn(async move {
        loop {
            match idle.send_idle().await {
                Ok(Some(lines)) => {
                    for line in lines {
                        if let Some(name) = line.strip_prefix("changed:") {
                            if let Some(subsystem) = Subsystem::from_str(name.trim()) {
                                events.notify(SessionEvent::Changed(subsystem)).await;
                            }
                        }
                    }
                }
                Ok(None) => {
                    debug!("idle loop cancelled");
                    return;
                }
                Err(e) => {
                    error!(error = %e, "idle send failed, cancelling pool");
                    scope.cancel();
                    return;
                }
            }
        }
    });
}

fn spawn_ping_loop<S: ConnectionStream + 'static>(
    pool: Arc<Pool<S>>,
    ping_interval: Duration,
    pool_size: usize,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(ping_interval);
        ticker.tick().await; // first tick fires immediately; skip it
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    for _ in 0..pool_size {
                        if pool.scope.is_cancelled() {
                            return;
                        }
                        match pool.send_single(&Command::new(CommandKind::Ping)).await {
                            Ok(_) => {}
                            Err(e) if e.is_protocol() => {
                                warn!(error = %e, "ping returned ACK, ignoring");
                            }
                            Err(e) => {
                                warn!(error = %e, "ping failed");
                            }
                        }
                    }
                }
                _ = pool.scope.cancelled() => return,
            }
        }
    });
}
