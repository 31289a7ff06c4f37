/// Lock-free run channel registry using ArcSwap
///
/// Maps run ids to their event bus. A channel is opened by whichever comes
/// first, the run itself or a subscriber waiting for it, and is torn down
/// when the run completes. Channels nobody ran are swept after a TTL.

use crate::runtime::events::{EventBus, EventKind};
use arc_swap::ArcSwap;
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

#[derive(Debug, Clone)]
struct RunChannel {
    bus: Arc<EventBus>,
    opened_at: Instant,
}

#[derive(Debug)]
pub struct RunRegistry {
    /// Key: run_id, Value: that run's channel
    channels: ArcSwap<HashMap<String, RunChannel>>,
    /// Broadcast buffer for new channels
    capacity: usize,
}

impl RunRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: ArcSwap::new(Arc::new(HashMap::new())),
            capacity,
        }
    }

    /// Get the run's bus, creating it if this is the first interest in it
    pub fn open(&self, run_id: &str) -> Arc<EventBus> {
        if let Some(bus) = self.get(run_id) {
            return bus;
        }

        let fresh = RunChannel {
            bus: Arc::new(EventBus::new(run_id, self.capacity)),
            opened_at: Instant::now(),
        };
        self.channels.rcu(|current| {
            let mut next = (**current).clone();
            next.entry(run_id.to_string()).or_insert_with(|| fresh.clone());
            next
        });

        tracing::debug!("📡 Opened run channel: {}", run_id);
        self.get(run_id).unwrap_or(fresh.bus)
    }

    /// Lock-free lookup
    pub fn get(&self, run_id: &str) -> Option<Arc<EventBus>> {
        self.channels.load().get(run_id).map(|c| Arc::clone(&c.bus))
    }

    /// Publish on a run's bus if it exists
    pub fn broadcast(&self, run_id: &str, kind: EventKind) -> bool {
        match self.get(run_id) {
            Some(bus) => {
                bus.publish(kind);
                true
            }
            None => false,
        }
    }

    /// Tear a run's channel down; subscribers drain and then see it closed
    pub fn close(&self, run_id: &str) {
        if self.channels.load().contains_key(run_id) {
            self.channels.rcu(|current| {
                let mut next = (**current).clone();
                next.remove(run_id);
                next
            });
            tracing::debug!("📴 Closed run channel: {}", run_id);
        }
    }

    /// Drop channels older than `ttl`; returns how many went away
    pub fn prune_expired(&self, ttl: Duration) -> usize {
        let before = self.channels.load().len();
        self.channels.rcu(|current| {
            current
                .iter()
                .filter(|(_, channel)| channel.opened_at.elapsed() < ttl)
                .map(|(id, channel)| (id.clone(), channel.clone()))
                .collect::<HashMap<_, _>>()
        });
        let pruned = before.saturating_sub(self.channels.load().len());
        if pruned > 0 {
            tracing::info!("🧹 Pruned {} stale run channel(s)", pruned);
        }
        pruned
    }

    pub fn len(&self) -> usize {
        self.channels.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RunRegistry {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_is_idempotent() {
        let registry = RunRegistry::new(8);
        let a = registry.open("run-1");
        let b = registry.open("run-1");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_early_subscriber() {
        let registry = RunRegistry::new(8);
        let mut rx = registry.open("run-1").subscribe();

        assert!(registry.broadcast("run-1", EventKind::ExecutionStart {}));
        assert!(!registry.broadcast("run-2", EventKind::ExecutionStart {}));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.run_id, "run-1");
        assert_eq!(event.kind.name(), "execution_start");
    }

    #[tokio::test]
    async fn test_close_ends_subscriptions_once_drained() {
        let registry = RunRegistry::new(8);
        let bus = registry.open("run-1");
        let mut rx = bus.subscribe();

        bus.publish(EventKind::Error { error: "boom".into() });
        registry.close("run-1");
        drop(bus);

        assert!(registry.is_empty());
        assert!(rx.recv().await.is_ok());
        assert!(rx.recv().await.is_err());
    }

    #[test]
    fn test_prune_expired() {
        let registry = RunRegistry::new(8);
        registry.open("old");
        assert_eq!(registry.prune_expired(Duration::from_secs(60)), 0);
        assert_eq!(registry.prune_expired(Duration::ZERO), 1);
        assert!(registry.get("old").is_none());
    }
}
