use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use slog::{o, Discard, Drain, Logger};

use crate::{AdStatus, Advertisement, MediaType, PlacementKey};

pub static HEADER: Lazy<PlacementKey> = Lazy::new(|| PlacementKey::from("header"));
pub static SIDEBAR: Lazy<PlacementKey> = Lazy::new(|| PlacementKey::from("sidebar"));
pub static REGULAR: Lazy<PlacementKey> = Lazy::new(|| PlacementKey::from("regular"));

/// Logger which discards every record
pub fn discard_logger() -> Logger {
    let drain = Discard.fuse();

    Logger::root(drain, o!())
}

/// An active image [`Advertisement`] for the given placement,
/// with an active window of `now - 1 day ..= now + 1 day`.
pub fn dummy_ad(id: &str, placement: &PlacementKey, now: DateTime<Utc>) -> Advertisement {
    Advertisement {
        id: id.into(),
        campaign_name: format!("Campaign {id}"),
        media_type: MediaType::Image,
        media_ref: format!("https://cdn.example.com/{placement}/{id}.png"),
        target_url: Some(
            format!("https://advertiser.example.com/landing/{id}")
                .parse()
                .expect("Valid target url"),
        ),
        embed_markup: None,
        placement_key: placement.clone(),
        active_from: now - Duration::days(1),
        active_until: now + Duration::days(1),
        status: AdStatus::Active,
        impressions: 0,
        clicks: 0,
    }
}

/// `count` dummy ads with ids `{placement}-0`, `{placement}-1`, ...
pub fn dummy_ads(placement: &PlacementKey, count: usize, now: DateTime<Utc>) -> Vec<Advertisement> {
    (0..count)
        .map(|index| dummy_ad(&format!("{placement}-{index}"), placement, now))
        .collect()
}
