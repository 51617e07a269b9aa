use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
};

use parking_lot::RwLock;
use tracing::error;

use crate::protocol::PlayerEvent;

/// Receives a player's lifecycle events.
///
/// Called synchronously from the node's receive task, so implementations must
/// not block. Hand work off to a task or a channel instead.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &PlayerEvent);

    /// Returning `false` removes the listener after the current delivery.
    fn is_alive(&self) -> bool {
        true
    }
}

impl<F> EventListener for F
where
    F: Fn(&PlayerEvent) + Send + Sync,
{
    fn on_event(&self, event: &PlayerEvent) {
        self(event)
    }
}

/// Forwards events into a channel. Dropped once its receiver is gone.
pub(crate) struct ChannelListener {
    tx: flume::Sender<PlayerEvent>,
}

impl ChannelListener {
    pub(crate) fn new() -> (Self, flume::Receiver<PlayerEvent>) {
        let (tx, rx) = flume::unbounded();
        (Self { tx }, rx)
    }
}

impl EventListener for ChannelListener {
    fn on_event(&self, event: &PlayerEvent) {
        let _ = self.tx.send(event.clone());
    }

    fn is_alive(&self) -> bool {
        !self.tx.is_disconnected()
    }
}

#[derive(Default)]
pub(crate) struct Listeners {
    inner: RwLock<Vec<Arc<dyn EventListener>>>,
}

impl Listeners {
    pub(crate) fn add(&self, listener: Arc<dyn EventListener>) {
        self.inner.write().push(listener);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Delivers `event` to every listener in registration order.
    ///
    /// A panicking listener is logged and skipped; the others still see the event.
    pub(crate) fn emit(&self, event: &PlayerEvent) {
        // Snapshot so listeners may register more listeners while being called.
        let listeners: Vec<_> = self.inner.read().clone();

        let mut dead = false;
        for listener in &listeners {
            if catch_unwind(AssertUnwindSafe(|| listener.on_event(event))).is_err() {
                error!(
                    "Listener panicked on {} for guild {}",
                    event.kind(),
                    event.guild_id()
                );
            }
            dead |= !listener.is_alive();
        }

        if dead {
            self.inner.write().retain(|l| l.is_alive());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::protocol::PlayerPauseEvent;

    fn pause() -> PlayerEvent {
        PlayerEvent::PlayerPause(PlayerPauseEvent {
            guild_id: "1".into(),
        })
    }

    #[test]
    fn test_panicking_listener_does_not_block_others() {
        let listeners = Listeners::default();
        let seen = Arc::new(AtomicUsize::new(0));

        listeners.add(Arc::new(|_: &PlayerEvent| panic!("listener failure")));
        let counter = seen.clone();
        listeners.add(Arc::new(move |_: &PlayerEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        listeners.emit(&pause());
        listeners.emit(&pause());
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_channel_listener_is_pruned_when_receiver_drops() {
        let listeners = Listeners::default();
        let (listener, rx) = ChannelListener::new();
        listeners.add(Arc::new(listener));

        listeners.emit(&pause());
        assert_eq!(rx.try_recv().unwrap(), pause());

        drop(rx);
        listeners.emit(&pause());
        assert_eq!(listeners.len(), 0);
    }
}
