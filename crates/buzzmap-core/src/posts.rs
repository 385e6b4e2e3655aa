use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A social platform posts are collected from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Instagram,
    Youtube,
}

impl Platform {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Instagram => "instagram",
            Platform::Youtube => "youtube",
        }
    }

    /// Parse the lowercase wire name. Returns `None` for unknown platforms.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "instagram" => Some(Platform::Instagram),
            "youtube" => Some(Platform::Youtube),
            _ => None,
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A post as collected from a platform. Never mutated after collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPost {
    pub platform: Platform,
    /// Unique within `platform`.
    pub post_id: String,
    pub text: String,
    pub like_count: u64,
    pub timestamp: DateTime<Utc>,
    pub raw_location_hint: Option<String>,
    pub url: Option<String>,
    pub collected_at: DateTime<Utc>,
}

impl RawPost {
    /// Dedup key within a run.
    #[must_use]
    pub fn key(&self) -> (Platform, &str) {
        (self.platform, self.post_id.as_str())
    }
}

/// A post plus the buzz score computed for the current run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredPost {
    pub post: RawPost,
    pub buzz_score: f64,
}
