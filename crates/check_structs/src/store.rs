use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Store volume tier, matching the `PostgreSQL` type.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "store_segment", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Segment {
    Low,
    Medium,
    High,
}

impl Segment {
    /// All segments in one-hot feature order.
    pub const ALL: [Self; 3] = [Self::Low, Self::Medium, Self::High];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    /// Position of this segment in the one-hot block.
    #[must_use]
    pub const fn one_hot_index(self) -> usize {
        match self {
            Self::Low => 0,
            Self::Medium => 1,
            Self::High => 2,
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Segment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" | "med" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => anyhow::bail!("Unknown store segment: {other}"),
        }
    }
}

/// A physical location belonging to exactly one brand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Store {
    pub id: Uuid,
    pub brand_id: Uuid,
    pub name: String,
    pub segment: Option<Segment>,
}

/// The unit a failure model is trained and served for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelScope {
    pub brand_id: Uuid,
    pub segment: Option<Segment>,
}

impl ModelScope {
    #[must_use]
    pub const fn brand(brand_id: Uuid) -> Self {
        Self {
            brand_id,
            segment: None,
        }
    }

    #[must_use]
    pub const fn segmented(brand_id: Uuid, segment: Segment) -> Self {
        Self {
            brand_id,
            segment: Some(segment),
        }
    }

    /// Scopes to try for a store, most specific first.
    #[must_use]
    pub fn candidates_for(store: &Store, per_segment: bool) -> Vec<Self> {
        match store.segment {
            Some(segment) if per_segment => {
                vec![Self::segmented(store.brand_id, segment), Self::brand(store.brand_id)]
            }
            _ => vec![Self::brand(store.brand_id)],
        }
    }

    /// Relative directory of this scope: `brand_{id}` or `brand_{id}/{segment}`.
    #[must_use]
    pub fn relative_dir(&self) -> String {
        match self.segment {
            Some(segment) => format!("brand_{}/{segment}", self.brand_id),
            None => format!("brand_{}", self.brand_id),
        }
    }
}

impl fmt::Display for ModelScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.relative_dir())
    }
}
