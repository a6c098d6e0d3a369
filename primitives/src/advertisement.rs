use std::{convert::Infallible, str::FromStr};

use chrono::{DateTime, Utc};
use parse_display::{Display as DeriveDisplay, FromStr as DeriveFromStr};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::PlacementKey;

/// Opaque identifier of an [`Advertisement`], assigned by the ad service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, DeriveDisplay)]
#[serde(transparent)]
#[display("{0}")]
pub struct AdvertisementId(String);

impl AdvertisementId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for AdvertisementId {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

impl From<&str> for AdvertisementId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// The kind of creative an [`Advertisement`] carries.
///
/// The meaning of [`Advertisement::media_ref`] depends on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, DeriveDisplay, DeriveFromStr)]
#[serde(rename_all = "kebab-case")]
#[display(style = "kebab-case")]
pub enum MediaType {
    Image,
    Gif,
    Video,
    /// Raw markup, see [`Advertisement::embed_markup`]
    Html,
    /// Third-party embed snippet, see [`Advertisement::embed_markup`]
    ExternalEmbed,
}

impl MediaType {
    /// Whether the creative is delivered as markup rather than a media file.
    pub fn is_markup(&self) -> bool {
        matches!(self, Self::Html | Self::ExternalEmbed)
    }
}

/// Lifecycle status, owned by the ad service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, DeriveDisplay, DeriveFromStr)]
#[serde(rename_all = "kebab-case")]
#[display(style = "kebab-case")]
pub enum AdStatus {
    Pending,
    Active,
    Paused,
    Finished,
    Rejected,
}

/// A creative unit as returned by the ad service.
///
/// The delivery engine never mutates an `Advertisement`,
/// status and dates are managed entirely by the ad service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Advertisement {
    pub id: AdvertisementId,
    /// Label used by operator tooling only
    pub campaign_name: String,
    pub media_type: MediaType,
    /// URL or opaque blob reference
    pub media_ref: String,
    /// Where a click navigates to
    #[serde(default)]
    pub target_url: Option<Url>,
    /// Only set for [`MediaType::Html`] and [`MediaType::ExternalEmbed`]
    #[serde(default)]
    pub embed_markup: Option<String>,
    pub placement_key: PlacementKey,
    /// Inclusive
    pub active_from: DateTime<Utc>,
    /// Inclusive
    pub active_until: DateTime<Utc>,
    pub status: AdStatus,
    #[serde(default)]
    pub impressions: u64,
    #[serde(default)]
    pub clicks: u64,
}

impl Advertisement {
    /// An advertisement is eligible when it's [`AdStatus::Active`]
    /// and `now` falls inside `[active_from, active_until]`.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.status == AdStatus::Active && self.active_from <= now && now <= self.active_until
    }
}
