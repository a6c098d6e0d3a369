//! Keeps the [`PlacementCacheStore`] fresh without redundant requests to the ad service.
//!
//! - A placement is stale when it was never fetched or its entry is older than the TTL.
//! - At most one fetch per placement is in flight, concurrent callers join it.
//! - Every fetch gets a generation, only the latest generation of a placement
//!   is allowed to write to the cache.
//! - A failed or timed out fetch leaves the cached entry untouched.
use std::{sync::Arc, time::Duration};

use adview_primitives::PlacementKey;
use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use futures::{
    future::{join_all, BoxFuture, Shared},
    FutureExt,
};
use slog::{debug, error, info, o, Logger};
use tokio::{task::JoinHandle, time::MissedTickBehavior};

use crate::{cache::PlacementCacheStore, error::FetchError, AdProvider};

/// What happened to a placement when it was asked to be refreshed.
#[derive(Debug, Clone)]
pub enum Refresh {
    /// The cached entry is younger than the TTL, nothing was fetched.
    Fresh,
    /// The fetched ads replaced the cached entry.
    Updated { ads: usize },
    /// The fetch completed after a newer one was issued, its result was discarded.
    Superseded,
    /// The fetch failed, the cached entry (if any) was kept.
    Failed(Arc<FetchError>),
}

impl Refresh {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

type SharedFetch = Shared<BoxFuture<'static, Refresh>>;

#[derive(Debug, Clone, Copy)]
pub struct RefreshOptions {
    pub cache_ttl: Duration,
    pub fetch_timeout: Duration,
}

struct InFlight {
    generation: u64,
    fetch: SharedFetch,
}

struct Inner<P> {
    provider: P,
    store: Arc<PlacementCacheStore>,
    options: RefreshOptions,
    /// Latest generation issued per placement
    generations: DashMap<PlacementKey, u64>,
    in_flight: DashMap<PlacementKey, InFlight>,
    last_fetch_attempt: DashMap<PlacementKey, DateTime<Utc>>,
    logger: Logger,
}

/// Decides when a placement needs fetching and writes the results into the store.
///
/// Cloning is cheap, all clones share the same in-flight fetches.
pub struct RefreshCoordinator<P> {
    inner: Arc<Inner<P>>,
}

impl<P> Clone for RefreshCoordinator<P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P: AdProvider> RefreshCoordinator<P> {
    pub fn new(
        provider: P,
        store: Arc<PlacementCacheStore>,
        options: RefreshOptions,
        logger: &Logger,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                provider,
                store,
                options,
                generations: DashMap::new(),
                in_flight: DashMap::new(),
                last_fetch_attempt: DashMap::new(),
                logger: logger.new(o!("module" => "refresh")),
            }),
        }
    }

    pub fn store(&self) -> &Arc<PlacementCacheStore> {
        &self.inner.store
    }

    /// A placement is stale when it has no cached entry or the entry is older than the TTL.
    pub fn is_stale(&self, placement: &PlacementKey) -> bool {
        self.inner.is_stale(placement)
    }

    pub fn is_in_flight(&self, placement: &PlacementKey) -> bool {
        self.inner.in_flight.contains_key(placement)
    }

    /// When the last fetch of the placement was started, regardless of its outcome.
    pub fn last_fetch_attempt(&self, placement: &PlacementKey) -> Option<DateTime<Utc>> {
        self.inner
            .last_fetch_attempt
            .get(placement)
            .map(|attempt| *attempt)
    }

    /// Fetches the placement only if it's stale.
    ///
    /// If a fetch for the placement is already in flight, it waits for its result
    /// instead of issuing a new request.
    pub async fn ensure_fresh(&self, placement: &PlacementKey) -> Refresh {
        if !self.inner.is_stale(placement) {
            return Refresh::Fresh;
        }

        let fetch = match self.inner.in_flight.entry(placement.clone()) {
            Entry::Occupied(in_flight) => in_flight.get().fetch.clone(),
            Entry::Vacant(vacant) => {
                // another caller might have completed a fetch in the meantime
                if !self.inner.is_stale(placement) {
                    return Refresh::Fresh;
                }

                let generation = self.inner.next_generation(placement);
                let fetch = Inner::spawn_fetch(self.inner.clone(), placement.clone(), generation);
                vacant.insert(InFlight {
                    generation,
                    fetch: fetch.clone(),
                });

                fetch
            }
        };

        fetch.await
    }

    /// Fetches the placement regardless of the TTL.
    ///
    /// A fetch which is already in flight is superseded,
    /// its result will be discarded once it completes.
    pub async fn refresh(&self, placement: &PlacementKey) -> Refresh {
        let fetch = {
            let generation = self.inner.next_generation(placement);
            let fetch = Inner::spawn_fetch(self.inner.clone(), placement.clone(), generation);

            self.inner.in_flight.insert(
                placement.clone(),
                InFlight {
                    generation,
                    fetch: fetch.clone(),
                },
            );

            fetch
        };

        fetch.await
    }

    /// Runs [`RefreshCoordinator::ensure_fresh`] for all placements concurrently.
    ///
    /// Placements are independent, a failing placement does not affect the others.
    pub async fn refresh_all(&self, placements: &[PlacementKey]) -> Vec<(PlacementKey, Refresh)> {
        let results = join_all(placements.iter().map(|placement| {
            self.ensure_fresh(placement)
                .map(move |refresh| (placement.clone(), refresh))
        }))
        .await;

        let failed = results.iter().filter(|(_, refresh)| refresh.is_failed()).count();
        info!(&self.inner.logger, "Refreshed {} placements", results.len(); "failed" => failed);

        results
    }

    /// Spawns the global refresh of `placements`, running every `period`.
    ///
    /// The first refresh runs immediately.
    /// The task runs until the returned handle is aborted.
    pub fn spawn_periodic(&self, placements: Vec<PlacementKey>, period: Duration) -> JoinHandle<()> {
        let coordinator = self.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                coordinator.refresh_all(&placements).await;
            }
        })
    }
}

impl<P: AdProvider> Inner<P> {
    fn is_stale(&self, placement: &PlacementKey) -> bool {
        self.store
            .get(placement)
            .map_or(true, |entry| entry.is_older_than(self.options.cache_ttl))
    }

    fn next_generation(&self, placement: &PlacementKey) -> u64 {
        let mut generation = self.generations.entry(placement.clone()).or_insert(0);
        *generation += 1;

        *generation
    }

    fn is_latest(&self, placement: &PlacementKey, generation: u64) -> bool {
        self.generations
            .get(placement)
            .map_or(false, |latest| *latest == generation)
    }

    /// The fetch runs on its own task, so it completes and populates the cache
    /// even when nobody is waiting for it anymore.
    fn spawn_fetch(inner: Arc<Self>, placement: PlacementKey, generation: u64) -> SharedFetch {
        inner.last_fetch_attempt.insert(placement.clone(), Utc::now());

        let task = {
            let inner = inner.clone();
            let placement = placement.clone();

            tokio::spawn(async move {
                let refresh = inner.fetch(&placement, generation).await;

                inner
                    .in_flight
                    .remove_if(&placement, |_, in_flight| in_flight.generation == generation);

                refresh
            })
        };

        task.map(move |result| {
            result.unwrap_or_else(|_join_error| {
                // the task is gone, so is its in-flight marker
                inner
                    .in_flight
                    .remove_if(&placement, |_, in_flight| in_flight.generation == generation);

                Refresh::Failed(Arc::new(FetchError::Aborted { placement }))
            })
        })
        .boxed()
        .shared()
    }

    async fn fetch(&self, placement: &PlacementKey, generation: u64) -> Refresh {
        let timeout = self.options.fetch_timeout;

        let result = match tokio::time::timeout(timeout, self.provider.fetch_ads(placement)).await {
            Ok(Ok(ads)) => Ok(ads),
            Ok(Err(err)) => Err(FetchError::Provider {
                placement: placement.clone(),
                source: Box::new(err),
            }),
            Err(_elapsed) => Err(FetchError::TimedOut {
                placement: placement.clone(),
                timeout,
            }),
        };

        match result {
            Ok(_) if !self.is_latest(placement, generation) => {
                debug!(&self.logger, "Discarding fetched ads of a superseded fetch"; "placement" => %placement, "generation" => generation);

                Refresh::Superseded
            }
            Ok(ads) => {
                let count = ads.len();
                self.store.put(placement, ads);

                Refresh::Updated { ads: count }
            }
            Err(err) => {
                error!(&self.logger, "Fetching ads failed, keeping the cached ads"; "placement" => %placement, "error" => %err);

                Refresh::Failed(Arc::new(err))
            }
        }
    }
}
