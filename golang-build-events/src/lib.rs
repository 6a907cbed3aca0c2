//! # golang-build events
//!
//! A small, process-wide publish/subscribe bus.
//! Listeners register against a named channel (usually the package name,
//! e.g. "Golang Build") and receive every event published on it.
//! Automation and test harnesses use it to learn when a build finished.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Identifies one registered listener so it can be removed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListenerId(Uuid);

impl ListenerId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for ListenerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One delivered notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<P> {
    pub channel: String,
    pub event: String,
    pub payload: P,
}

/// Callback form of a listener. Runs on the publisher's task.
pub type Listener<P> = Arc<dyn Fn(&Envelope<P>) + Send + Sync>;

type ListenerTable<P> = HashMap<String, Vec<(ListenerId, Listener<P>)>>;

/// The notification bus.
pub struct EventBus<P> {
    listeners: Mutex<ListenerTable<P>>,
}

impl<P> std::fmt::Debug for EventBus<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let listeners = self.listeners.lock();
        let counts: HashMap<&str, usize> = listeners
            .iter()
            .map(|(channel, list)| (channel.as_str(), list.len()))
            .collect();
        f.debug_struct("EventBus").field("listeners", &counts).finish()
    }
}

impl<P> Default for EventBus<P> {
    fn default() -> Self {
        Self {
            listeners: Mutex::new(HashMap::new()),
        }
    }
}

impl<P: Clone + Send + 'static> EventBus<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for every event published on `channel`.
    pub fn subscribe<F>(&self, channel: &str, handler: F) -> ListenerId
    where
        F: Fn(&Envelope<P>) + Send + Sync + 'static,
    {
        let id = ListenerId::new();
        self.listeners
            .lock()
            .entry(channel.to_string())
            .or_default()
            .push((id, Arc::new(handler)));
        tracing::debug!(%channel, listener = %id, "listener subscribed");
        id
    }

    /// Remove a listener. Returns false if it was not registered on `channel`.
    pub fn unsubscribe(&self, channel: &str, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let Some(list) = listeners.get_mut(channel) else {
            return false;
        };
        let before = list.len();
        list.retain(|(listener, _)| *listener != id);
        let removed = list.len() != before;
        if list.is_empty() {
            listeners.remove(channel);
        }
        removed
    }

    /// Async flavour of `subscribe`: every envelope on `channel` is forwarded
    /// into the returned receiver. Unsubscribe with the returned id.
    pub fn listen(&self, channel: &str) -> (ListenerId, mpsc::UnboundedReceiver<Envelope<P>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.subscribe(channel, move |envelope: &Envelope<P>| {
            let _ = tx.send(envelope.clone());
        });
        (id, rx)
    }

    /// Deliver an event to every listener of `channel`.
    /// Returns how many listeners were notified.
    ///
    /// The listener list is snapshotted first, so handlers may subscribe or
    /// unsubscribe from inside the callback.
    pub fn publish(&self, channel: &str, event: &str, payload: P) -> usize {
        let snapshot: Vec<Listener<P>> = self
            .listeners
            .lock()
            .get(channel)
            .map(|list| list.iter().map(|(_, l)| l.clone()).collect())
            .unwrap_or_default();

        let envelope = Envelope {
            channel: channel.to_string(),
            event: event.to_string(),
            payload,
        };

        for listener in &snapshot {
            listener(&envelope);
        }

        tracing::debug!(%channel, %event, listeners = snapshot.len(), "event published");
        snapshot.len()
    }

    pub fn listener_count(&self, channel: &str) -> usize {
        self.listeners.lock().get(channel).map_or(0, Vec::len)
    }
}
