use std::sync::Arc;

use dashmap::DashMap;
use tracing::warn;

use crate::channel::Channel;

/// Anything stored in a [`Registry`].
pub trait Identified: Send + Sync {
    fn id(&self) -> &str;
}

/// Concurrent id-keyed map.
///
/// Every read returns owned `Arc`s or snapshots, so callers never hold a
/// shard lock across an await.
pub struct Registry<T: Identified> {
    items: DashMap<String, Arc<T>>,
}

/// Channels accepted by the local server.
pub type ChannelRegistry = Registry<Channel>;

impl<T: Identified> Registry<T> {
    pub fn new() -> Self {
        Self {
            items: DashMap::new(),
        }
    }

    /// Insert or replace by id. An empty id is stored but logged.
    pub fn add(&self, item: Arc<T>) {
        if item.id().is_empty() {
            warn!("registry add: item has an empty id");
        }
        self.items.insert(item.id().to_string(), item);
    }

    /// Insert only when the id is free. Returns false if taken.
    pub fn try_add(&self, item: Arc<T>) -> bool {
        if item.id().is_empty() {
            warn!("registry add: item has an empty id");
        }
        match self.items.entry(item.id().to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(item);
                true
            }
        }
    }

    pub fn remove(&self, id: &str) -> Option<Arc<T>> {
        self.items.remove(id).map(|(_, item)| item)
    }

    pub fn get(&self, id: &str) -> Option<Arc<T>> {
        self.items.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.items.contains_key(id)
    }

    /// Snapshot of every item.
    pub fn all(&self) -> Vec<Arc<T>> {
        self.items
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Snapshot of the items matching `predicate`.
    pub fn filter(&self, predicate: impl Fn(&T) -> bool) -> Vec<Arc<T>> {
        self.items
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T: Identified> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}
