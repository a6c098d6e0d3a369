//! The [`AdDeliveryEngine`] ties the cache, its refresh and the display slots together.
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use adview_primitives::{AdvertisementId, Config, PlacementKey};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use slog::{debug, info, o, Logger};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tokio_stream::wrappers::WatchStream;
use url::Url;

use crate::{
    cache::PlacementCacheStore,
    eligibility::eligible,
    refresh::{Refresh, RefreshCoordinator, RefreshOptions},
    reporter::ClickReporter,
    rotation::{RotationController, RotationHandle, RotationOptions, RotationState},
    AdProvider,
};

type SlotId = u64;
type Slots = DashMap<SlotId, MountedSlot>;

/// A display slot the engine keeps rotating.
struct MountedSlot {
    placement_key: PlacementKey,
    controller: RotationController,
    /// Feeds the controller with the eligible ads of the cached entry
    feed: JoinHandle<()>,
}

impl Drop for MountedSlot {
    fn drop(&mut self) {
        self.feed.abort();
    }
}

struct Inner<P> {
    config: Config,
    store: Arc<PlacementCacheStore>,
    coordinator: RefreshCoordinator<Arc<P>>,
    reporter: ClickReporter<P>,
    slots: Arc<Slots>,
    next_slot_id: AtomicU64,
    refresh_loop: Mutex<Option<JoinHandle<()>>>,
    logger: Logger,
}

impl<P> Drop for Inner<P> {
    fn drop(&mut self) {
        if let Some(refresh_loop) = self.refresh_loop.get_mut().take() {
            refresh_loop.abort();
        }
    }
}

/// The Ad Delivery Engine.
///
/// Every instance owns its own cache, refresh loop and display slots,
/// so separate engines never interfere with each other.
///
/// All methods which spawn tasks must be called from within a tokio runtime.
pub struct AdDeliveryEngine<P> {
    inner: Arc<Inner<P>>,
}

impl<P> Clone for AdDeliveryEngine<P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P: AdProvider> AdDeliveryEngine<P> {
    pub fn new(config: Config, provider: P, logger: &Logger) -> Self {
        let logger = logger.new(o!("module" => "engine"));
        let provider = Arc::new(provider);
        let store = Arc::new(PlacementCacheStore::new());

        let coordinator = RefreshCoordinator::new(
            provider.clone(),
            store.clone(),
            RefreshOptions {
                cache_ttl: config.cache_ttl,
                fetch_timeout: config.fetch_timeout,
            },
            &logger,
        );
        let reporter = ClickReporter::new(provider, config.fetch_timeout, &logger);

        Self {
            inner: Arc::new(Inner {
                config,
                store,
                coordinator,
                reporter,
                slots: Arc::new(Slots::new()),
                next_slot_id: AtomicU64::new(0),
                refresh_loop: Mutex::new(None),
                logger,
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Read access to the cached placements.
    pub fn cache(&self) -> &PlacementCacheStore {
        &self.inner.store
    }

    pub fn coordinator(&self) -> &RefreshCoordinator<Arc<P>> {
        &self.inner.coordinator
    }

    /// Starts the global refresh of all configured placements.
    /// The first refresh cycle runs immediately.
    ///
    /// Calling it while the engine is running does nothing.
    pub fn start(&self) {
        let mut refresh_loop = self.inner.refresh_loop.lock();

        if refresh_loop.as_ref().map_or(false, |handle| !handle.is_finished()) {
            return;
        }

        let placements = self.inner.config.placement_keys();
        let period = self.inner.config.global_refresh_period;
        info!(
            &self.inner.logger,
            "Starting global refresh of {} placements every {:?}",
            placements.len(),
            period
        );

        *refresh_loop = Some(self.inner.coordinator.spawn_periodic(placements, period));
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .refresh_loop
            .lock()
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }

    /// Stops the global refresh and unmounts every display slot.
    ///
    /// The cache is kept, the engine can be started again.
    pub fn shutdown(&self) {
        if let Some(refresh_loop) = self.inner.refresh_loop.lock().take() {
            refresh_loop.abort();
        }

        let unmounted = self.inner.slots.len();
        self.inner.slots.clear();

        info!(&self.inner.logger, "Engine shut down"; "unmounted_slots" => unmounted);
    }

    /// Mounts a display slot for the placement.
    ///
    /// The slot shows the eligible ads of the cached entry (fetching it if stale)
    /// and follows every replacement of it.
    /// Dropping the returned [`Slot`] unmounts it.
    pub fn subscribe(&self, placement: &PlacementKey) -> Slot {
        let inner = &self.inner;
        let id = inner.next_slot_id.fetch_add(1, Ordering::Relaxed);

        let controller = RotationController::spawn(
            placement.clone(),
            RotationOptions {
                interval: inner.config.interval_for(placement),
                pause_on_manual_select: inner.config.pause_on_manual_select,
            },
            &inner.logger,
        );
        let handle = controller.handle();
        let state = controller.subscribe();

        let feed = tokio::spawn(feed_eligible(
            inner.store.clone(),
            placement.clone(),
            controller.handle(),
            inner.config.eligibility_recheck,
        ));

        inner.slots.insert(
            id,
            MountedSlot {
                placement_key: placement.clone(),
                controller,
                feed,
            },
        );

        {
            let coordinator = inner.coordinator.clone();
            let placement = placement.clone();
            tokio::spawn(async move {
                coordinator.ensure_fresh(&placement).await;
            });
        }

        debug!(&inner.logger, "Slot mounted"; "placement" => %placement, "slot" => id);

        Slot {
            id,
            placement_key: placement.clone(),
            state,
            handle,
            slots: inner.slots.clone(),
        }
    }

    /// How many display slots of the placement are mounted.
    pub fn mounted(&self, placement: &PlacementKey) -> usize {
        self.inner
            .slots
            .iter()
            .filter(|slot| &slot.placement_key == placement)
            .count()
    }

    /// Shows the ad at `index` in every mounted slot of the placement.
    ///
    /// Returns the number of slots the selection was sent to.
    pub fn select_index(&self, placement: &PlacementKey, index: usize) -> usize {
        self.for_each_slot(placement, |controller| controller.select_index(index))
    }

    /// Resumes the auto-rotation of every mounted slot of the placement.
    pub fn resume(&self, placement: &PlacementKey) -> usize {
        self.for_each_slot(placement, RotationController::resume)
    }

    /// Handles a click on a shown ad.
    ///
    /// The click report is issued in the background and `navigate` is called right away
    /// with the ad's target, if it has one. The returned handle completes with the report.
    pub fn on_ad_clicked<F>(&self, ad: &AdvertisementId, target_url: Option<&Url>, navigate: F) -> JoinHandle<()>
    where
        F: FnOnce(&Url),
    {
        let report = self.inner.reporter.report_click(ad);

        if let Some(target_url) = target_url {
            navigate(target_url);
        }

        report
    }

    /// See [`RefreshCoordinator::ensure_fresh`].
    pub async fn ensure_fresh(&self, placement: &PlacementKey) -> Refresh {
        self.inner.coordinator.ensure_fresh(placement).await
    }

    /// See [`RefreshCoordinator::refresh`].
    pub async fn refresh(&self, placement: &PlacementKey) -> Refresh {
        self.inner.coordinator.refresh(placement).await
    }

    fn for_each_slot(&self, placement: &PlacementKey, f: impl Fn(&RotationController)) -> usize {
        let mut count = 0;

        for slot in self.inner.slots.iter() {
            if &slot.placement_key == placement {
                f(&slot.controller);
                count += 1;
            }
        }

        count
    }
}

/// Pushes the eligible ads of the placement's cached entry to the rotation
/// on every replacement of the entry and every `recheck`.
async fn feed_eligible(
    store: Arc<PlacementCacheStore>,
    placement: PlacementKey,
    rotation: RotationHandle,
    recheck: Duration,
) {
    let mut entries = store.subscribe(&placement);
    let mut recheck = interval_at(Instant::now() + recheck, recheck);
    recheck.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let entry = entries.borrow_and_update().clone();
        let ads = entry
            .map(|entry| eligible(&entry.ads, Utc::now()))
            .unwrap_or_default();
        rotation.set_eligible(ads);

        tokio::select! {
            changed = entries.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = recheck.tick() => {}
        }
    }
}

/// A mounted display slot.
///
/// Receives the [`RotationState`] of the slot, which changes with the index,
/// the transition flag and the progress.
/// Dropping it unmounts the slot and stops its timers.
pub struct Slot {
    id: SlotId,
    placement_key: PlacementKey,
    state: watch::Receiver<RotationState>,
    handle: RotationHandle,
    slots: Arc<Slots>,
}

impl Slot {
    pub fn placement_key(&self) -> &PlacementKey {
        &self.placement_key
    }

    /// The state to render now
    pub fn state(&self) -> RotationState {
        self.state.borrow().clone()
    }

    /// Waits for the next change of the state.
    ///
    /// Returns `false` once the slot was unmounted by [`AdDeliveryEngine::shutdown`].
    pub async fn changed(&mut self) -> bool {
        self.state.changed().await.is_ok()
    }

    /// The slot's states as a [`Stream`](tokio_stream::Stream), starting with the current one.
    ///
    /// Intermediate states are skipped when the consumer is slower than the rotation.
    /// The stream ends once the slot is unmounted by [`AdDeliveryEngine::shutdown`].
    pub fn stream(&self) -> WatchStream<RotationState> {
        WatchStream::new(self.state.clone())
    }

    /// Another receiver of the slot's state, e.g. for a separate render task.
    pub fn receiver(&self) -> watch::Receiver<RotationState> {
        self.state.clone()
    }

    /// Manual selection of this slot only.
    pub fn select_index(&self, index: usize) {
        self.handle.select_index(index)
    }

    pub fn resume(&self) {
        self.handle.resume()
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.slots.remove(&self.id);
    }
}
