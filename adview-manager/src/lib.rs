#![deny(rust_2018_idioms)]
#![deny(clippy::all)]
#![cfg_attr(docsrs, feature(doc_cfg))]
//! The Ad Delivery Engine.
//!
//! Keeps a cache of [`Advertisement`](adview_primitives::Advertisement)s per placement,
//! refreshed on demand and on a schedule, and rotates the eligible ones in every display slot.
//!
//! ```text
//! AdProvider -> RefreshCoordinator -> PlacementCacheStore -> eligible() -> RotationController -> Slot
//! ```
//!
//! Start with [`AdDeliveryEngine`].

pub use self::{
    cache::{PlacementCacheEntry, PlacementCacheStore},
    eligibility::eligible,
    engine::{AdDeliveryEngine, Slot},
    error::{ClickError, FetchError},
    provider::AdProvider,
    refresh::{Refresh, RefreshCoordinator},
    reporter::ClickReporter,
    rotation::{Phase, RotationController, RotationState},
};

pub mod cache;
pub mod eligibility;
pub mod engine;
pub mod error;
pub mod provider;
pub mod refresh;
pub mod reporter;
pub mod rotation;
