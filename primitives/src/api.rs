//! Payloads exchanged with the ad service.
use serde::{Deserialize, Serialize};

use crate::Advertisement;

/// `GET /placements/:key/ads`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdsResponse {
    pub ads: Vec<Advertisement>,
}

/// `POST /ads/:id/click`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
}
