//! The ad service as seen by the engine.
use std::sync::Arc;

use adview_primitives::{Advertisement, AdvertisementId, PlacementKey};
use async_trait::async_trait;

#[doc(inline)]
pub use self::{dummy::Dummy, http::HttpProvider};

pub mod dummy;
pub mod http;

/// The external ad service.
///
/// Both calls may be slow and may fail,
/// the engine bounds them with a timeout and never surfaces their errors to the display slots.
#[async_trait]
pub trait AdProvider: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// All the ads of a placement, in the order they should rotate.
    async fn fetch_ads(&self, placement: &PlacementKey) -> Result<Vec<Advertisement>, Self::Error>;

    /// Records a click on the given ad.
    async fn report_click(&self, ad: &AdvertisementId) -> Result<(), Self::Error>;
}

#[async_trait]
impl<P: AdProvider> AdProvider for Arc<P> {
    type Error = P::Error;

    async fn fetch_ads(&self, placement: &PlacementKey) -> Result<Vec<Advertisement>, Self::Error> {
        self.as_ref().fetch_ads(placement).await
    }

    async fn report_click(&self, ad: &AdvertisementId) -> Result<(), Self::Error> {
        self.as_ref().report_click(ad).await
    }
}
