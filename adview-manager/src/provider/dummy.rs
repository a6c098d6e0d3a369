//! The [`Dummy`] ad provider.
//!
//! Keeps the ads in memory and lets tests script latency and failures per placement.
use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use adview_primitives::{Advertisement, AdvertisementId, PlacementKey};
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use thiserror::Error;

use super::AdProvider;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("Fetching ads of placement {0} is set to fail")]
    Placement(PlacementKey),
    #[error("Click reporting is set to fail, ad: {0}")]
    Click(AdvertisementId),
}

#[derive(Debug, Default)]
struct State {
    ads: DashMap<PlacementKey, Vec<Advertisement>>,
    latency: DashMap<PlacementKey, Duration>,
    failing: DashSet<PlacementKey>,
    fail_clicks: AtomicBool,
    /// In milliseconds
    click_latency: AtomicU64,
    /// Every `fetch_ads` call, including the failed ones
    fetches: DashMap<PlacementKey, usize>,
    /// Only the successfully recorded clicks
    clicks: DashMap<AdvertisementId, usize>,
}

/// In-memory ad provider intended for testing.
///
/// Clones share the same state, so a test can keep a handle
/// while the engine owns another one.
#[derive(Debug, Clone, Default)]
pub struct Dummy {
    state: Arc<State>,
}

impl Dummy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the ads returned for the placement.
    pub fn set_ads(&self, placement: &PlacementKey, ads: Vec<Advertisement>) {
        self.state.ads.insert(placement.clone(), ads);
    }

    /// Every `fetch_ads` call for the placement takes `latency` before returning.
    pub fn set_latency(&self, placement: &PlacementKey, latency: Duration) {
        self.state.latency.insert(placement.clone(), latency);
    }

    /// Makes `fetch_ads` for the placement fail (after the latency), or succeed again.
    pub fn set_failing(&self, placement: &PlacementKey, failing: bool) {
        if failing {
            self.state.failing.insert(placement.clone());
        } else {
            self.state.failing.remove(placement);
        }
    }

    pub fn set_failing_clicks(&self, failing: bool) {
        self.state.fail_clicks.store(failing, Ordering::SeqCst);
    }

    /// Every `report_click` call takes `latency` before returning.
    pub fn set_click_latency(&self, latency: Duration) {
        let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.state.click_latency.store(millis, Ordering::SeqCst);
    }

    /// How many times `fetch_ads` was called for the placement.
    pub fn fetch_count(&self, placement: &PlacementKey) -> usize {
        self.state
            .fetches
            .get(placement)
            .map(|count| *count)
            .unwrap_or_default()
    }

    /// How many clicks were recorded for the ad.
    pub fn click_count(&self, ad: &AdvertisementId) -> usize {
        self.state
            .clicks
            .get(ad)
            .map(|count| *count)
            .unwrap_or_default()
    }
}

#[async_trait]
impl AdProvider for Dummy {
    type Error = Error;

    async fn fetch_ads(&self, placement: &PlacementKey) -> Result<Vec<Advertisement>, Error> {
        *self.state.fetches.entry(placement.clone()).or_default() += 1;

        let latency = self.state.latency.get(placement).map(|latency| *latency);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        if self.state.failing.contains(placement) {
            return Err(Error::Placement(placement.clone()));
        }

        Ok(self
            .state
            .ads
            .get(placement)
            .map(|ads| ads.clone())
            .unwrap_or_default())
    }

    async fn report_click(&self, ad: &AdvertisementId) -> Result<(), Error> {
        let latency = self.state.click_latency.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if self.state.fail_clicks.load(Ordering::SeqCst) {
            return Err(Error::Click(ad.clone()));
        }

        *self.state.clicks.entry(ad.clone()).or_default() += 1;

        Ok(())
    }
}
