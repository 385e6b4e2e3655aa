use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::restaurants::{GeocodeStatus, RestaurantRecord};

const EARTH_RADIUS_KM: f64 = 6_371.0;
const KM_PER_DEGREE_LAT: f64 = 111.32;

/// A validated WGS84 point. Latitude is within [-90, 90], longitude within
/// [-180, 180].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawCoordinates", into = "RawCoordinates")]
pub struct Coordinates {
    lat: f64,
    lon: f64,
}

#[derive(Serialize, Deserialize)]
struct RawCoordinates {
    lat: f64,
    lon: f64,
}

impl TryFrom<RawCoordinates> for Coordinates {
    type Error = String;

    fn try_from(raw: RawCoordinates) -> Result<Self, Self::Error> {
        Coordinates::new(raw.lat, raw.lon)
            .ok_or_else(|| format!("coordinates out of range: ({}, {})", raw.lat, raw.lon))
    }
}

impl From<Coordinates> for RawCoordinates {
    fn from(c: Coordinates) -> Self {
        Self {
            lat: c.lat,
            lon: c.lon,
        }
    }
}

impl Coordinates {
    #[must_use]
    pub fn new(lat: f64, lon: f64) -> Option<Self> {
        let valid = lat.is_finite()
            && lon.is_finite()
            && (-90.0..=90.0).contains(&lat)
            && (-180.0..=180.0).contains(&lon);
        valid.then_some(Self { lat, lon })
    }

    #[must_use]
    pub fn lat(&self) -> f64 {
        self.lat
    }

    #[must_use]
    pub fn lon(&self) -> f64 {
        self.lon
    }
}

/// Great-circle distance in kilometres.
#[must_use]
pub fn haversine_km(a: Coordinates, b: Coordinates) -> f64 {
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

/// A circular search area plus its enclosing lat/lon box, used to prefilter
/// rows before the exact distance check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingRegion {
    pub center: Coordinates,
    pub radius_km: f64,
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl BoundingRegion {
    #[must_use]
    pub fn around(center: Coordinates, radius_km: f64) -> Self {
        let radius_km = if radius_km.is_finite() {
            radius_km.max(0.0)
        } else {
            0.0
        };
        let dlat = radius_km / KM_PER_DEGREE_LAT;
        let min_lat = (center.lat - dlat).max(-90.0);
        let max_lat = (center.lat + dlat).min(90.0);

        let cos_lat = center.lat.to_radians().cos();
        let (min_lon, max_lon) = if cos_lat < 1e-6 {
            (-180.0, 180.0)
        } else {
            let dlon = radius_km / (KM_PER_DEGREE_LAT * cos_lat);
            let (lo, hi) = (center.lon - dlon, center.lon + dlon);
            // Boxes that cross the antimeridian fall back to the full longitude range.
            if lo < -180.0 || hi > 180.0 || min_lat <= -90.0 || max_lat >= 90.0 {
                (-180.0, 180.0)
            } else {
                (lo, hi)
            }
        };

        Self {
            center,
            radius_km,
            min_lat,
            max_lat,
            min_lon,
            max_lon,
        }
    }

    /// Whether `point` lies within `radius_km` of the center.
    #[must_use]
    pub fn contains(&self, point: Coordinates) -> bool {
        haversine_km(self.center, point) <= self.radius_km
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub record: RestaurantRecord,
    pub distance_km: f64,
}

/// Filter store rows to resolved, fresh records inside `region`, ordered by
/// buzz descending then distance ascending.
#[must_use]
pub fn rank_search_results(
    records: Vec<RestaurantRecord>,
    region: &BoundingRegion,
    fresh_since: Option<DateTime<Utc>>,
) -> Vec<SearchHit> {
    let mut hits: Vec<SearchHit> = records
        .into_iter()
        .filter(|r| r.geocode_status == GeocodeStatus::Resolved)
        .filter(|r| fresh_since.is_none_or(|since| r.last_seen_at >= since))
        .filter_map(|record| {
            let coords = record.coordinates?;
            let distance_km = haversine_km(region.center, coords);
            (distance_km <= region.radius_km).then_some(SearchHit {
                record,
                distance_km,
            })
        })
        .collect();

    hits.sort_by(|a, b| {
        b.record
            .buzz_score
            .total_cmp(&a.record.buzz_score)
            .then_with(|| a.distance_km.total_cmp(&b.distance_km))
            .then_with(|| a.record.identity.cmp(&b.record.identity))
    });
    hits
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::restaurants::PostRef;

    fn tokyo() -> Coordinates {
        Coordinates::new(35.681_2, 139.767_1).unwrap()
    }

    fn record(identity: &str, buzz: f64, coords: Option<Coordinates>, seen: DateTime<Utc>) -> RestaurantRecord {
        RestaurantRecord {
            identity: identity.to_string(),
            name: identity.to_string(),
            address: None,
            coordinates: coords,
            geocode_status: if coords.is_some() {
                GeocodeStatus::Resolved
            } else {
                GeocodeStatus::Unresolved
            },
            buzz_score: buzz,
            post_refs: Vec::<PostRef>::new(),
            first_seen_at: seen,
            last_seen_at: seen,
        }
    }

    #[test]
    fn coordinates_reject_out_of_range() {
        assert!(Coordinates::new(91.0, 0.0).is_none());
        assert!(Coordinates::new(0.0, -180.5).is_none());
        assert!(Coordinates::new(f64::NAN, 0.0).is_none());
        assert!(Coordinates::new(-90.0, 180.0).is_some());
    }

    #[test]
    fn coordinates_deserialize_validates_range() {
        let bad: Result<Coordinates, _> = serde_json::from_str(r#"{"lat":100.0,"lon":0.0}"#);
        assert!(bad.is_err());
        let good: Coordinates = serde_json::from_str(r#"{"lat":35.0,"lon":139.0}"#).unwrap();
        assert!((good.lat() - 35.0).abs() < f64::EPSILON);
    }

    #[test]
    fn haversine_tokyo_to_shinjuku_is_about_six_km() {
        let shinjuku = Coordinates::new(35.690_9, 139.700_3).unwrap();
        let d = haversine_km(tokyo(), shinjuku);
        assert!((5.5..6.5).contains(&d), "got {d}");
    }

    #[test]
    fn region_box_encloses_circle() {
        let region = BoundingRegion::around(tokyo(), 3.0);
        assert!(region.min_lat < tokyo().lat() && tokyo().lat() < region.max_lat);
        assert!(region.min_lon < tokyo().lon() && tokyo().lon() < region.max_lon);
        let north = Coordinates::new(tokyo().lat() + 2.9 / KM_PER_DEGREE_LAT, tokyo().lon()).unwrap();
        assert!(north.lat() <= region.max_lat);
        assert!(region.contains(north));
    }

    #[test]
    fn region_near_antimeridian_uses_full_longitude_range() {
        let fiji = Coordinates::new(-17.7, 179.99).unwrap();
        let region = BoundingRegion::around(fiji, 10.0);
        assert!((region.min_lon + 180.0).abs() < f64::EPSILON);
        assert!((region.max_lon - 180.0).abs() < f64::EPSILON);
    }

    #[test]
    fn ranking_orders_by_buzz_then_distance_and_drops_unresolved() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let near = Coordinates::new(35.682, 139.768).unwrap();
        let far = Coordinates::new(35.69, 139.78).unwrap();
        let records = vec![
            record("low", 10.0, Some(near), now),
            record("tie-far", 50.0, Some(far), now),
            record("tie-near", 50.0, Some(near), now),
            record("unresolved", 500.0, None, now),
        ];
        let region = BoundingRegion::around(tokyo(), 5.0);
        let ids: Vec<_> = rank_search_results(records, &region, None)
            .into_iter()
            .map(|h| h.record.identity)
            .collect();
        assert_eq!(ids, vec!["tie-near", "tie-far", "low"]);
    }

    #[test]
    fn ranking_excludes_out_of_radius_and_stale_records() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let osaka = Coordinates::new(34.693_7, 135.502_3).unwrap();
        let records = vec![
            record("fresh", 1.0, Some(tokyo()), now),
            record("stale", 99.0, Some(tokyo()), now - Duration::days(60)),
            record("osaka", 99.0, Some(osaka), now),
        ];
        let region = BoundingRegion::around(tokyo(), 3.0);
        let hits = rank_search_results(records, &region, Some(now - Duration::days(30)));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.identity, "fresh");
    }
}
