//! The placement cache: the last successfully fetched ads of every placement.
use std::{sync::Arc, time::Duration};

use adview_primitives::{Advertisement, PlacementKey};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::{sync::watch, time::Instant};

/// The ads of a placement as they were fetched.
///
/// Entries are never mutated, a refresh replaces the whole entry.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacementCacheEntry {
    pub placement_key: PlacementKey,
    pub ads: Vec<Advertisement>,
    pub fetched_at: DateTime<Utc>,
    /// Monotonic counterpart of `fetched_at`, used for the staleness checks
    fetched: Instant,
}

impl PlacementCacheEntry {
    pub fn age(&self) -> Duration {
        self.fetched.elapsed()
    }

    /// Whether the entry is older than `ttl`.
    pub fn is_older_than(&self, ttl: Duration) -> bool {
        self.age() > ttl
    }
}

type Slot = watch::Sender<Option<Arc<PlacementCacheEntry>>>;

/// Holds a [`PlacementCacheEntry`] per placement.
///
/// Every placement has its own slot, writing one placement never blocks readers of another
/// and readers can never observe a partially written entry.
#[derive(Debug, Default)]
pub struct PlacementCacheStore {
    slots: DashMap<PlacementKey, Slot>,
}

impl PlacementCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, placement: &PlacementKey) -> Option<Arc<PlacementCacheEntry>> {
        self.slots
            .get(placement)
            .and_then(|slot| slot.borrow().clone())
    }

    /// Replaces the placement's entry, stamping it with the current time,
    /// and notifies all subscribers of the placement.
    pub fn put(&self, placement: &PlacementKey, ads: Vec<Advertisement>) -> Arc<PlacementCacheEntry> {
        let entry = Arc::new(PlacementCacheEntry {
            placement_key: placement.clone(),
            ads,
            fetched_at: Utc::now(),
            fetched: Instant::now(),
        });

        self.slot(placement).send_replace(Some(entry.clone()));

        entry
    }

    /// Receives the current entry of the placement (if any) and every replacement after it.
    ///
    /// Subscribing to a placement which was never fetched is allowed,
    /// the receiver starts with `None`.
    pub fn subscribe(&self, placement: &PlacementKey) -> watch::Receiver<Option<Arc<PlacementCacheEntry>>> {
        self.slot(placement).subscribe()
    }

    /// All placements which have a cached entry
    pub fn keys(&self) -> Vec<PlacementKey> {
        self.slots
            .iter()
            .filter(|slot| slot.value().borrow().is_some())
            .map(|slot| slot.key().clone())
            .collect()
    }

    fn slot(&self, placement: &PlacementKey) -> dashmap::mapref::one::Ref<'_, PlacementKey, Slot> {
        if let Some(slot) = self.slots.get(placement) {
            return slot;
        }

        self.slots
            .entry(placement.clone())
            .or_insert_with(|| watch::channel(None).0)
            .downgrade()
    }
}
