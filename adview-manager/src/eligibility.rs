use adview_primitives::Advertisement;
use chrono::{DateTime, Utc};

/// The ads which can be shown at `now`, in their original order.
///
/// See [`Advertisement::is_eligible`].
pub fn eligible(ads: &[Advertisement], now: DateTime<Utc>) -> Vec<Advertisement> {
    ads.iter().filter(|ad| ad.is_eligible(now)).cloned().collect()
}
