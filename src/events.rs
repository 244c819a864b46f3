//! Publish/subscribe fan-out for server change notifications.
//!
//! A [`Publisher`] holds a list of subscriber mailboxes; `notify` races
//! each subscriber's send against its own timeout and silently drops the
//! event on that subscriber alone if it's backlogged past the deadline
//! (section 4.4: "best-effort delivery").

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio_stream::Stream;
use tracing::trace;

/// The closed set of MPD subsystems a session can report a change on
/// (section 3, the `changed:` name space).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subsystem {
    Database,
    Update,
    StoredPlaylist,
    Playlist,
    Player,
    Mixer,
    Output,
    Options,
    Partition,
    Sticker,
    Subscription,
    Message,
}

impl Subsystem {
    /// Parse a `changed:` value. Unknown names are dropped (return
    /// `None`) rather than erroring, per section 3.
    pub fn from_str(name: &str) -> Option<Subsystem> {
        use Subsystem::*;
        Some(match name.trim() {
            "database" => Database,
            "update" => Update,
            "stored_playlist" => StoredPlaylist,
            "playlist" => Playlist,
            "player" => Player,
            "mixer" => Mixer,
            "output" => Output,
            "options" => Options,
            "partition" => Partition,
            "sticker" => Sticker,
            "subscription" => Subscription,
            "message" => Message,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        use Subsystem::*;
        match self {
            Database => "database",
            Update => "update",
            StoredPlaylist => "stored_playlist",
            Playlist => "playlist",
            Player => "player",
            Mixer => "mixer",
            Output => "output",
            Options => "options",
            Partition => "partition",
            Sticker => "sticker",
            Subscription => "subscription",
            Message => "message",
        }
    }
}

/// An event delivered to a session subscriber: either a subsystem change
/// or one of the two connection lifecycle markers (section 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionEvent {
    Connected,
    Disconnected,
    Changed(Subsystem),
}

struct Slot<T> {
    id: u64,
    sender: mpsc::Sender<T>,
    timeout: Duration,
}

/// A publish/subscribe fan-out for values of type `T`.
pub struct Publisher<T: Clone> {
    slots: Mutex<Vec<Slot<T>>>,
    next_id: std::sync::atomic::AtomicU64,
    default_capacity: usize,
    default_timeout: Duration,
}

impl<T: Clone + Send + 'static> Publisher<T> {
    pub fn new(default_capacity: usize, default_timeout: Duration) -> Publisher<T> {
        Publisher {
            slots: Mutex::new(Vec::new()),
            next_id: std::sync::atomic::AtomicU64::new(0),
            default_capacity,
            default_timeout,
        }
    }

    /// Register a new subscriber with this publisher's default capacity
    /// and per-send timeout.
    pub async fn subscribe(&self) -> Subscriber<T> {
        self.subscribe_with(self.default_capacity, self.default_timeout)
            .await
    }

    /// Register a new subscriber with an explicit capacity and timeout
    /// (section 6: "a per-send timeout configurable per subscriber").
    pub async fn subscribe_with(&self, capacity: usize, timeout: Duration) -> Subscriber<T> {
        let id = self
            .next_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        self.slots.lock().await.push(Slot {
            id,
            sender,
            timeout,
        });
        Subscriber { id, receiver }
    }

    /// Drop a previously registered subscriber.
    pub async fn unsubscribe(&self, subscriber: &Subscriber<T>) {
        self.slots.lock().await.retain(|s| s.id != subscriber.id);
    }

    /// Deliver `value` to every current subscriber, dropping it for any
    /// subscriber whose mailbox is still full after that subscriber's
    /// timeout.
    ///
    /// The subscriber list is snapshotted (cloned senders) under the lock
    /// and then released before any send is attempted, so one backlogged
    /// subscriber's timeout never holds up delivery to the others, nor
    /// blocks a concurrent `subscribe`/`unsubscribe`.
    pub async fn notify(&self, value: T) {
        let snapshot: Vec<(u64, mpsc::Sender<T>, Duration)> = self
            .slots
            .lock()
            .await
            .iter()
            .map(|slot| (slot.id, slot.sender.clone(), slot.timeout))
            .collect();

        for (id, sender, timeout) in snapshot {
            let send = sender.send(value.clone());
            tokio::select! {
                result = send => {
                    if result.is_err() {
                        trace!(subscriber = id, "subscriber dropped");
                    }
                }
                _ = tokio::time::sleep(timeout) => {
                    trace!(subscriber = id, "event dropped: subscriber backlogged");
                }
            }
        }
    }
}

/// The receiving half of a [`Publisher`] subscription.
pub struct Subscriber<T> {
    id: u64,
    receiver: mpsc::Receiver<T>,
}

impl<T> Subscriber<T> {
    pub async fn recv(&mut self) -> Option<T> {
        self.receiver.recv().await
    }
}

impl<T> Stream for Subscriber<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.receiver.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_in_order() {
        let publisher: Publisher<u32> = Publisher::new(4, Duration::from_millis(50));
        let mut sub = publisher.subscribe().await;
        publisher.notify(1).await;
        publisher.notify(2).await;
        assert_eq!(sub.recv().await, Some(1));
        assert_eq!(sub.recv().await, Some(2));
    }

    #[tokio::test]
    async fn backlogged_subscriber_drops_event_others_still_receive() {
        let publisher: Publisher<u32> = Publisher::new(1, Duration::from_millis(20));
        let mut slow = publisher.subscribe().await;
        let mut fast = publisher.subscribe().await;

        // fill slow's mailbox so the next notify must wait out its timeout
        publisher.notify(1).await;
        publisher.notify(2).await;

        assert_eq!(slow.recv().await, Some(1));
        assert_eq!(fast.recv().await, Some(1));
        assert_eq!(fast.recv().await, Some(2));
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let publisher: Publisher<u32> = Publisher::new(4, Duration::from_millis(50));
        let mut sub = publisher.subscribe().await;
        publisher.unsubscribe(&sub).await;
        publisher.notify(1).await;
        assert!(tokio::time::timeout(Duration::from_millis(20), sub.recv())
            .await
            .is_err());
    }

    #[test]
    fn unknown_subsystem_name_is_dropped() {
        assert_eq!(Subsystem::from_str("bogus"), None);
        assert_eq!(Subsystem::from_str("player"), Some(Subsystem::Player));
    }
}
