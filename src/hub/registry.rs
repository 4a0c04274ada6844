//! Subscriber registry and fan-out.
//!
//! Subscribers are partitioned by resource key under one mutex that is held
//! only for lookups, inserts and removals. Delivery works on a snapshot of the
//! key's sinks so a slow consumer never holds the map lock.

use futures_util::Stream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::lock;
use crate::db::models::{Event, ResourceKey};

/// Opaque subscriber token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    fn new() -> Self {
        SubscriberId(Uuid::new_v4())
    }
}

impl From<Uuid> for SubscriberId {
    fn from(id: Uuid) -> Self {
        SubscriberId(id)
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What to do when a subscriber's queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OverflowPolicy {
    /// Drop the event for that subscriber only; it stays registered.
    DropEvent,
    /// Unregister the subscriber, which ends its stream.
    Disconnect,
}

#[derive(Debug, Clone, Copy)]
pub struct SinkSettings {
    /// Per-subscriber queue bound
    pub capacity: usize,
    pub overflow: OverflowPolicy,
}

impl Default for SinkSettings {
    fn default() -> Self {
        SinkSettings {
            capacity: 256,
            overflow: OverflowPolicy::DropEvent,
        }
    }
}

/// Outbound side of one subscriber. `None` once unregistered; writes take the
/// same lock, so nothing is written after unregistration returns.
struct Sink {
    id: SubscriberId,
    tx: Mutex<Option<mpsc::Sender<Arc<Event>>>>,
}

pub struct SubscriberRegistry {
    subscribers: Mutex<HashMap<ResourceKey, Vec<Arc<Sink>>>>,
    settings: SinkSettings,
}

impl SubscriberRegistry {
    pub fn new(settings: SinkSettings) -> Arc<Self> {
        Arc::new(SubscriberRegistry {
            subscribers: Mutex::new(HashMap::new()),
            settings,
        })
    }

    /// Register a new subscriber for `key`.
    pub fn register(self: &Arc<Self>, key: ResourceKey) -> Subscription {
        let (tx, rx) = mpsc::channel(self.settings.capacity.max(1));
        let id = SubscriberId::new();
        let sink = Arc::new(Sink {
            id,
            tx: Mutex::new(Some(tx)),
        });

        let count = {
            let mut map = lock(&self.subscribers);
            let sinks = map.entry(key).or_default();
            sinks.push(sink);
            sinks.len()
        };
        info!(league = key.league, season = key.season, "Subscriber {} registered ({} total)", id, count);

        Subscription {
            id,
            key,
            rx,
            registry: Arc::clone(self),
        }
    }

    /// Remove a subscriber. Returns `false` if it was not registered under
    /// `key`. An emptied key is removed from the map entirely.
    pub fn unregister(&self, id: SubscriberId, key: ResourceKey) -> bool {
        let (sink, remaining) = {
            let mut map = lock(&self.subscribers);
            let Some(sinks) = map.get_mut(&key) else {
                return false;
            };
            let Some(pos) = sinks.iter().position(|s| s.id == id) else {
                return false;
            };
            let sink = sinks.swap_remove(pos);
            let remaining = sinks.len();
            if remaining == 0 {
                map.remove(&key);
            }
            (sink, remaining)
        };
        lock(&sink.tx).take();
        info!(league = key.league, season = key.season, "Subscriber {} unregistered ({} left)", id, remaining);
        true
    }

    pub fn subscriber_count(&self, key: ResourceKey) -> usize {
        lock(&self.subscribers).get(&key).map_or(0, Vec::len)
    }

    /// Unregister every subscriber, ending all streams (process shutdown).
    pub fn close_all(&self) {
        let drained: Vec<Arc<Sink>> = lock(&self.subscribers)
            .drain()
            .flat_map(|(_, sinks)| sinks)
            .collect();
        for sink in &drained {
            lock(&sink.tx).take();
        }
        info!("Closed {} subscriber stream(s)", drained.len());
    }

    /// Deliver `events`, in order, to every subscriber registered for `key`
    /// at the moment of the call. Returns the number of (subscriber, event)
    /// deliveries that succeeded.
    pub fn broadcast(&self, key: ResourceKey, events: &[Arc<Event>]) -> usize {
        if events.is_empty() {
            return 0;
        }
        let sinks: Vec<Arc<Sink>> = match lock(&self.subscribers).get(&key) {
            Some(sinks) => sinks.clone(),
            None => return 0,
        };

        let mut delivered = 0;
        let mut gone = Vec::new();
        for sink in &sinks {
            let guard = lock(&sink.tx);
            let Some(tx) = guard.as_ref() else {
                continue;
            };
            for event in events {
                match tx.try_send(Arc::clone(event)) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => match self.settings.overflow {
                        OverflowPolicy::DropEvent => {
                            warn!(
                                league = key.league,
                                season = key.season,
                                "Subscriber {} queue full, {} event for fixture {} DROPPED",
                                sink.id,
                                event.kind,
                                event.fixture_id
                            );
                        }
                        OverflowPolicy::Disconnect => {
                            warn!(
                                league = key.league,
                                season = key.season,
                                "Subscriber {} queue full, disconnecting",
                                sink.id
                            );
                            gone.push(sink.id);
                            break;
                        }
                    },
                    Err(TrySendError::Closed(_)) => {
                        debug!("Subscriber {} receiver gone", sink.id);
                        gone.push(sink.id);
                        break;
                    }
                }
            }
        }

        for id in gone {
            self.unregister(id, key);
        }
        delivered
    }
}

/// A live subscription. Dropping it unsubscribes.
pub struct Subscription {
    id: SubscriberId,
    key: ResourceKey,
    rx: mpsc::Receiver<Arc<Event>>,
    registry: Arc<SubscriberRegistry>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn key(&self) -> ResourceKey {
        self.key
    }

    /// Next event, or `None` once the subscription has been unregistered and
    /// drained.
    pub async fn recv(&mut self) -> Option<Arc<Event>> {
        self.rx.recv().await
    }

    #[cfg(test)]
    pub fn try_recv(&mut self) -> Option<Arc<Event>> {
        self.rx.try_recv().ok()
    }

    pub fn into_stream(self) -> impl Stream<Item = Arc<Event>> + Send {
        futures_util::stream::unfold(self, |mut sub| async move {
            sub.recv().await.map(|event| (event, sub))
        })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.registry.unregister(self.id, self.key);
    }
}
