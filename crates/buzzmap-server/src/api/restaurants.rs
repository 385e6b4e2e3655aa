use axum::{
    extract::{Query, State},
    Extension, Json,
};
use buzzmap_core::{buzz_level, rank_search_results, BoundingRegion, Coordinates, SearchHit};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::middleware::RequestId;

use super::{ApiError, ApiResponse, AppState, ResponseMeta, SearchSettings};

/// Raw query parameters. Parsed by hand so malformed numbers get a JSON
/// error body instead of the extractor's plain-text rejection.
#[derive(Debug, Default, Deserialize)]
pub(super) struct SearchQuery {
    pub lat: Option<String>,
    pub lon: Option<String>,
    pub radius: Option<String>,
}

#[derive(Debug, Serialize)]
pub(super) struct RestaurantItem {
    name: String,
    lat: f64,
    lon: f64,
    buzz_score: f64,
    buzz_level: u8,
    address: Option<String>,
    identity: String,
    /// Newest first.
    post_urls: Vec<String>,
    distance_km: f64,
}

impl RestaurantItem {
    fn from_hit(hit: SearchHit) -> Option<Self> {
        let coordinates = hit.record.coordinates?;
        let record = hit.record;
        Some(Self {
            lat: coordinates.lat(),
            lon: coordinates.lon(),
            buzz_level: buzz_level(record.buzz_score),
            buzz_score: record.buzz_score,
            post_urls: record
                .post_refs
                .iter()
                .rev()
                .filter_map(|r| r.url.clone())
                .collect(),
            name: record.name,
            address: record.address,
            identity: record.identity,
            distance_km: hit.distance_km,
        })
    }
}

fn parse_number(name: &str, raw: Option<&str>) -> Result<Option<f64>, String> {
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return Ok(None);
    };
    match raw.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(Some(value)),
        _ => Err(format!("{name} must be a finite number")),
    }
}

/// Validate the query into a search region.
pub(super) fn parse_search(
    query: &SearchQuery,
    settings: &SearchSettings,
) -> Result<BoundingRegion, String> {
    let lat = parse_number("lat", query.lat.as_deref())?.ok_or("lat is required")?;
    let lon = parse_number("lon", query.lon.as_deref())?.ok_or("lon is required")?;
    let center = Coordinates::new(lat, lon)
        .ok_or("lat must be within [-90, 90] and lon within [-180, 180]")?;

    let radius = parse_number("radius", query.radius.as_deref())?
        .unwrap_or(settings.default_radius_km);
    if radius <= 0.0 || radius > settings.max_radius_km {
        return Err(format!(
            "radius must be greater than 0 and at most {} km",
            settings.max_radius_km
        ));
    }

    Ok(BoundingRegion::around(center, radius))
}

async fn search(
    state: &AppState,
    request_id: &str,
    query: &SearchQuery,
) -> Result<Vec<RestaurantItem>, ApiError> {
    let region = parse_search(query, &state.search)
        .map_err(|message| ApiError::new(request_id, "validation_error", message))?;

    let records = state.store.query(&region).await.map_err(|e| {
        tracing::error!(error = %e, "restaurant search: store query failed");
        ApiError::new(
            request_id,
            "service_unavailable",
            "restaurant data is temporarily unavailable",
        )
    })?;

    let fresh_since = (state.search.freshness_days > 0)
        .then(|| Utc::now() - Duration::days(i64::from(state.search.freshness_days)));
    let hits = rank_search_results(records, &region, fresh_since);
    tracing::debug!(
        lat = region.center.lat(),
        lon = region.center.lon(),
        radius_km = region.radius_km,
        hits = hits.len(),
        "restaurant search"
    );

    Ok(hits.into_iter().filter_map(RestaurantItem::from_hit).collect())
}

/// `GET /restaurants?lat=&lon=&radius=`: the map front end's feed, a bare
/// JSON array.
pub(super) async fn search_restaurants(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<RestaurantItem>>, ApiError> {
    search(&state, &req_id.0, &query).await.map(Json)
}

/// `GET /api/v1/restaurants`: the same search in the standard envelope.
pub(super) async fn list_restaurants(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<ApiResponse<Vec<RestaurantItem>>>, ApiError> {
    let data = search(&state, &req_id.0, &query).await?;
    Ok(Json(ApiResponse {
        data,
        meta: ResponseMeta::new(req_id.0),
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use buzzmap_core::{
        restaurant_identity, DatasetStore, GeocodeStatus, Platform, PostRef, RestaurantRecord,
        StoreError, UpsertOutcome,
    };
    use buzzmap_db::MemoryDatasetStore;
    use chrono::DateTime;
    use tower::ServiceExt;

    use super::super::tests::{test_state, unreachable_pool};
    use super::super::{build_app, default_rate_limit_state};
    use super::*;

    fn shibuya() -> Coordinates {
        Coordinates::new(35.658, 139.7016).unwrap()
    }

    fn record(
        name: &str,
        coords: Option<Coordinates>,
        buzz: f64,
        seen: DateTime<Utc>,
    ) -> RestaurantRecord {
        RestaurantRecord {
            identity: restaurant_identity(name, None),
            name: name.to_owned(),
            address: None,
            coordinates: coords,
            geocode_status: if coords.is_some() {
                GeocodeStatus::Resolved
            } else {
                GeocodeStatus::Unresolved
            },
            buzz_score: buzz,
            post_refs: vec![
                PostRef {
                    platform: Platform::Instagram,
                    post_id: format!("{name}-1"),
                    url: Some(format!("https://www.instagram.com/p/{name}-1/")),
                    buzz_score: buzz,
                    posted_at: seen - Duration::hours(2),
                },
                PostRef {
                    platform: Platform::Youtube,
                    post_id: format!("{name}-2"),
                    url: Some(format!("https://www.youtube.com/watch?v={name}-2")),
                    buzz_score: buzz,
                    posted_at: seen - Duration::hours(1),
                },
            ],
            first_seen_at: seen,
            last_seen_at: seen,
        }
    }

    async fn seeded_store() -> Arc<MemoryDatasetStore> {
        let now = Utc::now();
        let store = Arc::new(MemoryDatasetStore::new(20));
        let near = Coordinates::new(35.659, 139.702);
        let seeds = [
            record("Quiet Cafe", near, 12.0, now),
            record("Hot Ramen", Coordinates::new(35.660, 139.700), 480.0, now),
            // Same buzz as Quiet Cafe but further out.
            record("Also Quiet", Coordinates::new(35.670, 139.701), 12.0, now),
            // About 4 km north.
            record("Outer Ring", Coordinates::new(35.694, 139.7016), 900.0, now),
            record("Unplaced", None, 5_000.0, now),
            record("Old News", near, 700.0, now - Duration::days(60)),
        ];
        for seed in &seeds {
            store.upsert(seed).await.unwrap();
        }
        store
    }

    async fn app() -> Router {
        let store = seeded_store().await;
        build_app(
            test_state(unreachable_pool(), store as Arc<dyn DatasetStore>),
            default_rate_limit_state(),
        )
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn names(body: &serde_json::Value) -> Vec<String> {
        body.as_array()
            .unwrap()
            .iter()
            .map(|item| item["name"].as_str().unwrap().to_owned())
            .collect()
    }

    #[tokio::test]
    async fn search_orders_by_buzz_then_distance() {
        let (status, body) = get_json(app().await, "/restaurants?lat=35.658&lon=139.7016").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(names(&body), vec!["Hot Ramen", "Quiet Cafe", "Also Quiet"]);

        let top = &body[0];
        assert!((top["buzz_score"].as_f64().unwrap() - 480.0).abs() < 1e-9);
        assert_eq!(top["buzz_level"], 3);
        assert!((top["lat"].as_f64().unwrap() - 35.660).abs() < 1e-9);
        assert_eq!(
            top["post_urls"][0],
            "https://www.youtube.com/watch?v=Hot Ramen-2"
        );
    }

    #[tokio::test]
    async fn radius_widens_the_search() {
        let (status, body) =
            get_json(app().await, "/restaurants?lat=35.658&lon=139.7016&radius=5").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(names(&body)[0], "Outer Ring");
        assert!(!names(&body).contains(&"Unplaced".to_owned()));
        assert!(!names(&body).contains(&"Old News".to_owned()));
    }

    #[tokio::test]
    async fn invalid_parameters_are_rejected_with_json_errors() {
        for uri in [
            "/restaurants?lon=139.7",
            "/restaurants?lat=abc&lon=139.7",
            "/restaurants?lat=95&lon=139.7",
            "/restaurants?lat=35.6&lon=139.7&radius=0",
            "/restaurants?lat=35.6&lon=139.7&radius=51",
            "/restaurants?lat=35.6&lon=139.7&radius=NaN",
        ] {
            let (status, body) = get_json(app().await, uri).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
            assert_eq!(body["error"]["code"], "validation_error", "{uri}");
        }
    }

    struct DownStore;

    #[async_trait]
    impl DatasetStore for DownStore {
        async fn upsert(&self, _record: &RestaurantRecord) -> Result<UpsertOutcome, StoreError> {
            Err(StoreError::Unavailable("down".to_owned()))
        }

        async fn query(
            &self,
            _region: &BoundingRegion,
        ) -> Result<Vec<RestaurantRecord>, StoreError> {
            Err(StoreError::Unavailable("down".to_owned()))
        }
    }

    #[tokio::test]
    async fn store_failure_is_service_unavailable() {
        let app = build_app(
            test_state(unreachable_pool(), Arc::new(DownStore)),
            default_rate_limit_state(),
        );

        let (status, body) = get_json(app, "/restaurants?lat=35.658&lon=139.7016").await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"]["code"], "service_unavailable");
    }

    #[tokio::test]
    async fn enveloped_search_carries_meta() {
        let response = app()
            .await
            .oneshot(
                Request::builder()
                    .uri("/api/v1/restaurants?lat=35.658&lon=139.7016")
                    .header("x-request-id", "req-42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value =
            serde_json::from_slice(&to_bytes(response.into_body(), usize::MAX).await.unwrap())
                .unwrap();

        assert_eq!(body["meta"]["request_id"], "req-42");
        assert_eq!(body["data"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn default_radius_applies_when_omitted() {
        let settings = SearchSettings {
            default_radius_km: 3.0,
            max_radius_km: 50.0,
            freshness_days: 30,
        };
        let query = SearchQuery {
            lat: Some("35.658".to_owned()),
            lon: Some("139.7016".to_owned()),
            radius: None,
        };
        let region = parse_search(&query, &settings).unwrap();
        assert!((region.radius_km - 3.0).abs() < f64::EPSILON);
    }
}
