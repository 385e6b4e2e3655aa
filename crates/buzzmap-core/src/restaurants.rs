use std::collections::HashMap;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::geo::Coordinates;
use crate::posts::Platform;

/// A restaurant mention pulled out of one post's text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedEntity {
    pub platform: Platform,
    pub source_post_id: String,
    pub post_url: Option<String>,
    pub restaurant_name: String,
    pub raw_address: Option<String>,
    pub confidence: f64,
    /// Buzz score of the source post.
    pub buzz_score: f64,
    pub posted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeocodeStatus {
    Resolved,
    Unresolved,
}

impl GeocodeStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            GeocodeStatus::Resolved => "resolved",
            GeocodeStatus::Unresolved => "unresolved",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "resolved" => Some(GeocodeStatus::Resolved),
            "unresolved" => Some(GeocodeStatus::Unresolved),
            _ => None,
        }
    }
}

impl std::fmt::Display for GeocodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An extracted entity after address resolution. `coordinates` is `Some`
/// exactly when `status` is `Resolved`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeocodedRestaurant {
    pub entity: ExtractedEntity,
    pub coordinates: Option<Coordinates>,
    pub status: GeocodeStatus,
}

impl GeocodedRestaurant {
    #[must_use]
    pub fn resolved(entity: ExtractedEntity, coordinates: Coordinates) -> Self {
        Self {
            entity,
            coordinates: Some(coordinates),
            status: GeocodeStatus::Resolved,
        }
    }

    #[must_use]
    pub fn unresolved(entity: ExtractedEntity) -> Self {
        Self {
            entity,
            coordinates: None,
            status: GeocodeStatus::Unresolved,
        }
    }
}

/// A post that contributed to a restaurant's buzz.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostRef {
    pub platform: Platform,
    pub post_id: String,
    pub url: Option<String>,
    pub buzz_score: f64,
    pub posted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestaurantRecord {
    pub identity: String,
    pub name: String,
    pub address: Option<String>,
    pub coordinates: Option<Coordinates>,
    pub geocode_status: GeocodeStatus,
    /// Max over contributing posts.
    pub buzz_score: f64,
    /// Oldest first, bounded.
    pub post_refs: Vec<PostRef>,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl RestaurantRecord {
    /// Build a single-contribution record from one geocoded entity.
    #[must_use]
    pub fn from_geocoded(geocoded: &GeocodedRestaurant, seen_at: DateTime<Utc>) -> Self {
        let entity = &geocoded.entity;
        let address = entity
            .raw_address
            .as_deref()
            .filter(|a| !is_placeholder_address(a))
            .map(|a| a.trim().to_string());
        Self {
            identity: restaurant_identity(&entity.restaurant_name, address.as_deref()),
            name: entity.restaurant_name.trim().to_string(),
            address,
            coordinates: geocoded.coordinates,
            geocode_status: geocoded.status,
            buzz_score: entity.buzz_score,
            post_refs: vec![PostRef {
                platform: entity.platform,
                post_id: entity.source_post_id.clone(),
                url: entity.post_url.clone(),
                buzz_score: entity.buzz_score,
                posted_at: entity.posted_at,
            }],
            first_seen_at: seen_at,
            last_seen_at: seen_at,
        }
    }

    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.geocode_status == GeocodeStatus::Resolved && self.coordinates.is_some()
    }
}

/// `true` for the address values the extractor emits when it found none.
#[must_use]
pub fn is_placeholder_address(address: &str) -> bool {
    let trimmed = address.trim();
    trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case("n/a")
        || trimmed.eq_ignore_ascii_case("null")
}

/// Fold full-width ASCII and ideographic spaces to their ASCII forms.
fn fold_width(c: char) -> char {
    match c {
        '\u{3000}' => ' ',
        '\u{FF01}'..='\u{FF5E}' => char::from_u32(c as u32 - 0xFEE0).unwrap_or(c),
        '\u{2010}'..='\u{2015}' | '\u{2212}' => '-',
        _ => c,
    }
}

fn normalize(text: &str) -> String {
    let folded: String = text
        .chars()
        .map(fold_width)
        .flat_map(char::to_lowercase)
        .map(|c| if c.is_ascii_punctuation() { ' ' } else { c })
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[must_use]
pub fn normalize_name(name: &str) -> String {
    normalize(name)
}

/// Placeholder addresses normalize to the empty string.
#[must_use]
pub fn normalize_address(address: &str) -> String {
    if is_placeholder_address(address) {
        return String::new();
    }
    normalize(address)
}

/// Stable key for a restaurant: hex of the first 16 bytes of
/// `SHA-256(normalized_name \x1f normalized_address)`.
#[must_use]
pub fn restaurant_identity(name: &str, address: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_name(name).as_bytes());
    hasher.update([0x1f]);
    hasher.update(normalize_address(address.unwrap_or_default()).as_bytes());
    let digest = hasher.finalize();

    let mut out = String::with_capacity(32);
    for byte in &digest[..16] {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Merge `incoming` into `prior` for the same identity.
///
/// Buzz takes the max, post refs are unioned by `(platform, post_id)` and
/// trimmed to the newest `max_post_refs`, a resolved location is never
/// replaced by an unresolved one, and seen timestamps widen. Merging the same
/// incoming record twice yields the same result as merging it once.
#[must_use]
pub fn merge_records(
    prior: &RestaurantRecord,
    incoming: &RestaurantRecord,
    max_post_refs: usize,
) -> RestaurantRecord {
    let mut refs: HashMap<(Platform, String), PostRef> = HashMap::new();
    for r in prior.post_refs.iter().chain(incoming.post_refs.iter()) {
        refs.entry((r.platform, r.post_id.clone()))
            .and_modify(|existing| {
                if r.buzz_score > existing.buzz_score {
                    existing.buzz_score = r.buzz_score;
                }
                if existing.url.is_none() {
                    existing.url.clone_from(&r.url);
                }
            })
            .or_insert_with(|| r.clone());
    }
    let mut post_refs: Vec<PostRef> = refs.into_values().collect();
    post_refs.sort_by(|a, b| {
        a.posted_at
            .cmp(&b.posted_at)
            .then_with(|| a.platform.cmp(&b.platform))
            .then_with(|| a.post_id.cmp(&b.post_id))
    });
    if post_refs.len() > max_post_refs {
        post_refs.drain(..post_refs.len() - max_post_refs);
    }

    let (coordinates, geocode_status) = if incoming.is_resolved() {
        (incoming.coordinates, GeocodeStatus::Resolved)
    } else {
        (prior.coordinates, prior.geocode_status)
    };

    RestaurantRecord {
        identity: prior.identity.clone(),
        name: prior.name.clone(),
        address: prior.address.clone().or_else(|| incoming.address.clone()),
        coordinates,
        geocode_status,
        buzz_score: prior.buzz_score.max(incoming.buzz_score),
        post_refs,
        first_seen_at: prior.first_seen_at.min(incoming.first_seen_at),
        last_seen_at: prior.last_seen_at.max(incoming.last_seen_at),
    }
}
