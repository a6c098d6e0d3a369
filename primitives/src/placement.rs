use std::{convert::Infallible, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// A named logical slot in the page where advertisements are shown,
/// e.g. `header`, `sidebar` or `regular`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlacementKey(String);

impl PlacementKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlacementKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for PlacementKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PlacementKey({})", self.0)
    }
}

impl FromStr for PlacementKey {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

impl From<&str> for PlacementKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for PlacementKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl AsRef<str> for PlacementKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
