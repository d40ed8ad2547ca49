use parking_lot::RwLock;
use std::collections::BTreeSet;

/// Thread-safe set of active stream identifiers, lowercase-canonicalized.
///
/// The registry never touches the network; it is the sole source of truth
/// for what a `WsClient` must re-establish after a reconnect.
#[derive(Default)]
pub struct SubscriptionRegistry {
    streams: RwLock<BTreeSet<String>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` iff the set changed (the id was not already present).
    pub fn subscribe(&self, id: &str) -> bool {
        self.streams.write().insert(id.to_ascii_lowercase())
    }

    /// Returns `true` iff the set changed (the id was present and is now gone).
    pub fn unsubscribe(&self, id: &str) -> bool {
        self.streams.write().remove(&id.to_ascii_lowercase())
    }

    pub fn is_subscribed(&self, id: &str) -> bool {
        self.streams.read().contains(&id.to_ascii_lowercase())
    }

    /// Snapshot copy in ascending order; callers needing dial order should
    /// sort or join as required, the registry makes no ordering promise.
    pub fn streams(&self) -> Vec<String> {
        self.streams.read().iter().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.streams.read().len()
    }

    pub fn clear(&self) {
        self.streams.write().clear();
    }

    pub fn is_empty(&self) -> bool {
        self.streams.read().is_empty()
    }
}
