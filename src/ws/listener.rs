#![expect(
    clippy::module_name_repetitions,
    reason = "Listener types are re-exported from `ws` where the prefix keeps them distinct"
)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;

use super::types::Event;

/// Callback registered with [`Client::on`](super::Client::on).
pub type Listener = Arc<dyn Fn(&Event) + Send + Sync>;

/// Identifies a single registration so it can be removed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// Event-name to listener mapping, independent of any transport.
///
/// Listeners survive reconnects: the registry belongs to the client, not to the connection.
#[derive(Default)]
pub struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: DashMap<String, HashMap<ListenerId, Listener>>,
}

impl ListenerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, event: &str, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .entry(event.to_owned())
            .or_default()
            .insert(id, listener);
        id
    }

    /// Remove one listener, or every listener of `event` when `id` is `None`.
    ///
    /// Returns how many listeners were removed.
    pub fn remove(&self, event: &str, id: Option<ListenerId>) -> usize {
        let Some(id) = id else {
            return self
                .listeners
                .remove(event)
                .map_or(0, |(_, listeners)| listeners.len());
        };

        let removed = self
            .listeners
            .get_mut(event)
            .is_some_and(|mut listeners| listeners.remove(&id).is_some());
        self.listeners
            .remove_if(event, |_, listeners| listeners.is_empty());

        usize::from(removed)
    }

    /// Invoke every listener registered for the event's name.
    ///
    /// Listeners are collected before being called, so a listener may register or remove
    /// listeners without deadlocking.
    pub fn dispatch(&self, event: &Event) {
        let listeners: Vec<Listener> = self
            .listeners
            .get(event.name())
            .map(|entry| entry.values().map(Arc::clone).collect())
            .unwrap_or_default();

        for listener in listeners {
            listener(event);
        }
    }

    #[must_use]
    pub fn len(&self, event: &str) -> usize {
        self.listeners.get(event).map_or(0, |entry| entry.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

/// Handle returned by [`Client::on`](super::Client::on).
///
/// Dropping the handle keeps the listener registered. Call [`ListenerHandle::unsubscribe`] to
/// remove it.
#[derive(Clone)]
pub struct ListenerHandle {
    registry: Weak<ListenerRegistry>,
    event: String,
    id: ListenerId,
}

impl ListenerHandle {
    pub(crate) fn new(registry: &Arc<ListenerRegistry>, event: &str, id: ListenerId) -> Self {
        Self {
            registry: Arc::downgrade(registry),
            event: event.to_owned(),
            id,
        }
    }

    #[must_use]
    pub fn id(&self) -> ListenerId {
        self.id
    }

    #[must_use]
    pub fn event(&self) -> &str {
        &self.event
    }

    /// Remove the listener. Equivalent to `client.off(event, Some(id))`.
    pub fn unsubscribe(self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(&self.event, Some(self.id));
        }
    }
}

impl std::fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("event", &self.event)
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}
