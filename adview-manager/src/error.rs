use std::time::Duration;

use adview_primitives::{AdvertisementId, PlacementKey};
use thiserror::Error;

/// A boxed error coming from an [`AdProvider`](crate::AdProvider) implementation.
pub type ProviderError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Fetching the ads of a placement failed.
///
/// Never surfaced to the display slots, the previously cached ads are kept instead.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Fetching ads for placement {placement} timed out after {timeout:?}")]
    TimedOut {
        placement: PlacementKey,
        timeout: Duration,
    },
    #[error("Ad provider failed for placement {placement}: {source}")]
    Provider {
        placement: PlacementKey,
        #[source]
        source: ProviderError,
    },
    #[error("Fetch task for placement {placement} was aborted")]
    Aborted { placement: PlacementKey },
}

/// Reporting a click failed. Only ever logged.
#[derive(Debug, Error)]
pub enum ClickError {
    #[error("Reporting click of {ad} timed out after {timeout:?}")]
    TimedOut {
        ad: AdvertisementId,
        timeout: Duration,
    },
    #[error("Ad provider failed to record click of {ad}: {source}")]
    Provider {
        ad: AdvertisementId,
        #[source]
        source: ProviderError,
    },
}
