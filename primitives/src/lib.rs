#![deny(rust_2018_idioms)]
#![deny(clippy::all)]
#![cfg_attr(docsrs, feature(doc_cfg))]
//! The domain of the ad delivery engine:
//! [`Advertisement`]s, the [`PlacementKey`]s they are shown in
//! and the engine's [`Config`].

pub use self::{
    advertisement::{AdStatus, Advertisement, AdvertisementId, MediaType},
    config::Config,
    placement::PlacementKey,
};

pub mod advertisement;
pub mod api;
pub mod config;
pub mod placement;
pub mod util;

#[cfg(any(test, feature = "test-util"))]
#[cfg_attr(docsrs, doc(cfg(feature = "test-util")))]
pub mod test_util;
