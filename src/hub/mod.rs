pub mod registry;
pub mod scheduler;

pub use registry::{OverflowPolicy, SinkSettings, SubscriberId, SubscriberRegistry, Subscription};
pub use scheduler::{PollScheduler, PollSettings};

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::db::models::ResourceKey;
use crate::db::FixtureStore;
use crate::live_scores::FixtureProvider;
use crate::notify::Notifier;

/// Lock a std mutex, recovering the data if a holder panicked. Every critical
/// section here is a plain map lookup/insert/remove, so the data stays
/// consistent even then.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Entry point for live subscriptions: a subscriber registry plus the poll
/// scheduler it drives.
pub struct LiveHub {
    registry: Arc<SubscriberRegistry>,
    scheduler: Arc<PollScheduler>,
}

impl LiveHub {
    pub fn new(
        provider: Arc<dyn FixtureProvider>,
        store: Arc<dyn FixtureStore>,
        notifier: Arc<dyn Notifier>,
        poll: PollSettings,
        sinks: SinkSettings,
    ) -> Self {
        let registry = SubscriberRegistry::new(sinks);
        let scheduler = PollScheduler::new(provider, store, notifier, Arc::clone(&registry), poll);
        LiveHub {
            registry,
            scheduler,
        }
    }

    /// Register a subscriber, then make sure a poll loop exists for `key`.
    /// Registration comes first so the loop never observes zero subscribers
    /// on behalf of the caller that caused it to start.
    pub fn subscribe(&self, key: ResourceKey) -> Subscription {
        let subscription = self.registry.register(key);
        self.scheduler.start_if_needed(key);
        subscription
    }

    /// Does not stop the poll loop; it notices the empty key on its next
    /// iteration.
    pub fn unsubscribe(&self, id: SubscriberId, key: ResourceKey) -> bool {
        self.registry.unregister(id, key)
    }

    pub fn subscriber_count(&self, key: ResourceKey) -> usize {
        self.registry.subscriber_count(key)
    }

    pub fn is_polling(&self, key: ResourceKey) -> bool {
        self.scheduler.is_running(key)
    }

    pub fn scheduler(&self) -> &Arc<PollScheduler> {
        &self.scheduler
    }

    /// Cancel every poll loop and end every subscriber stream.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
        self.registry.close_all();
    }
}
