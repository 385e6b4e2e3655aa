//! In-process [`DatasetStore`] for tests and dry runs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use buzzmap_core::{
    merge_records, BoundingRegion, DatasetStore, RestaurantRecord, StoreError, UpsertOutcome,
};
use tokio::sync::RwLock;

/// Records keyed by identity. Upserts of one identity serialize on a
/// per-identity lock; different identities proceed independently.
#[derive(Debug)]
pub struct MemoryDatasetStore {
    records: RwLock<HashMap<String, RestaurantRecord>>,
    identity_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    max_post_refs: usize,
}

impl MemoryDatasetStore {
    #[must_use]
    pub fn new(max_post_refs: usize) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            identity_locks: Mutex::new(HashMap::new()),
            max_post_refs,
        }
    }

    pub async fn get(&self, identity: &str) -> Option<RestaurantRecord> {
        self.records.read().await.get(identity).cloned()
    }

    /// Every record, sorted by identity.
    pub async fn all(&self) -> Vec<RestaurantRecord> {
        let mut all: Vec<_> = self.records.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.identity.cmp(&b.identity));
        all
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    fn identity_lock(&self, identity: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .identity_locks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Arc::clone(locks.entry(identity.to_owned()).or_default())
    }

    /// Drop the identity's lock entry once no other upsert holds a handle.
    fn release_identity_lock(&self, identity: &str, lock: &Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self
            .identity_locks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if Arc::strong_count(lock) <= 2 {
            locks.remove(identity);
        }
    }
}

#[async_trait]
impl DatasetStore for MemoryDatasetStore {
    async fn upsert(&self, record: &RestaurantRecord) -> Result<UpsertOutcome, StoreError> {
        let lock = self.identity_lock(&record.identity);
        let outcome = {
            let _guard = lock.lock().await;

            let prior = self.records.read().await.get(&record.identity).cloned();
            let (next, outcome) = match prior {
                Some(prior) => (
                    merge_records(&prior, record, self.max_post_refs),
                    UpsertOutcome::Merged,
                ),
                // Self-merge dedups, orders and bounds the post refs.
                None => (
                    merge_records(record, record, self.max_post_refs),
                    UpsertOutcome::Inserted,
                ),
            };
            self.records
                .write()
                .await
                .insert(record.identity.clone(), next);
            outcome
        };
        self.release_identity_lock(&record.identity, &lock);
        Ok(outcome)
    }

    async fn query(&self, region: &BoundingRegion) -> Result<Vec<RestaurantRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|r| r.is_resolved())
            .filter(|r| {
                r.coordinates.is_some_and(|c| {
                    (region.min_lat..=region.max_lat).contains(&c.lat())
                        && (region.min_lon..=region.max_lon).contains(&c.lon())
                })
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use buzzmap_core::{
        restaurant_identity, Coordinates, GeocodeStatus, Platform, PostRef, RestaurantRecord,
    };
    use chrono::{DateTime, Duration, TimeZone, Utc};

    use super::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn record(post_id: &str, buzz: f64, coords: Option<Coordinates>) -> RestaurantRecord {
        RestaurantRecord {
            identity: restaurant_identity("Cafe Kitsune", Some("東京都港区南青山3-15-2")),
            name: "Cafe Kitsune".to_owned(),
            address: Some("東京都港区南青山3-15-2".to_owned()),
            coordinates: coords,
            geocode_status: if coords.is_some() {
                GeocodeStatus::Resolved
            } else {
                GeocodeStatus::Unresolved
            },
            buzz_score: buzz,
            post_refs: vec![PostRef {
                platform: Platform::Instagram,
                post_id: post_id.to_owned(),
                url: None,
                buzz_score: buzz,
                posted_at: t0(),
            }],
            first_seen_at: t0(),
            last_seen_at: t0(),
        }
    }

    fn aoyama() -> Coordinates {
        Coordinates::new(35.665, 139.712).unwrap()
    }

    #[tokio::test]
    async fn upsert_is_idempotent_under_retry() {
        let store = MemoryDatasetStore::new(20);
        let r = record("p1", 30.0, Some(aoyama()));

        assert_eq!(store.upsert(&r).await.unwrap(), UpsertOutcome::Inserted);
        let once = store.get(&r.identity).await.unwrap();
        assert_eq!(store.upsert(&r).await.unwrap(), UpsertOutcome::Merged);
        let twice = store.get(&r.identity).await.unwrap();

        assert_eq!(once, twice);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn concurrent_upserts_keep_highest_buzz_and_all_posts() {
        let store = Arc::new(MemoryDatasetStore::new(100));
        let mut handles = Vec::new();
        for i in 0..32u32 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let r = record(&format!("p{i}"), f64::from(i), Some(aoyama()));
                store.upsert(&r).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let all = store.all().await;
        assert_eq!(all.len(), 1);
        assert!((all[0].buzz_score - 31.0).abs() < f64::EPSILON);
        assert_eq!(all[0].post_refs.len(), 32);
        assert!(store.identity_locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn identity_locks_are_released_after_upsert() {
        let store = MemoryDatasetStore::new(20);
        for i in 0..10 {
            let mut r = record("p1", 1.0, Some(aoyama()));
            r.identity = restaurant_identity(&format!("Stall {i}"), None);
            store.upsert(&r).await.unwrap();
        }

        assert_eq!(store.len().await, 10);
        assert!(store.identity_locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn resolved_record_is_never_downgraded() {
        let store = MemoryDatasetStore::new(20);
        store.upsert(&record("p1", 5.0, Some(aoyama()))).await.unwrap();
        store.upsert(&record("p2", 9.0, None)).await.unwrap();

        let stored = store.all().await.remove(0);
        assert_eq!(stored.geocode_status, GeocodeStatus::Resolved);
        assert_eq!(stored.coordinates, Some(aoyama()));
        assert!((stored.buzz_score - 9.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn query_excludes_unresolved_and_outside_box() {
        let store = MemoryDatasetStore::new(20);
        store.upsert(&record("p1", 5.0, Some(aoyama()))).await.unwrap();

        let mut unresolved = record("p2", 50.0, None);
        unresolved.identity = restaurant_identity("Nowhere Bar", None);
        store.upsert(&unresolved).await.unwrap();

        let mut osaka = record("p3", 70.0, Coordinates::new(34.69, 135.50));
        osaka.identity = restaurant_identity("Osaka Spot", None);
        store.upsert(&osaka).await.unwrap();

        let region = BoundingRegion::around(aoyama(), 3.0);
        let hits = store.query(&region).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "Cafe Kitsune");
    }

    #[tokio::test]
    async fn insert_trims_post_refs_to_bound() {
        let store = MemoryDatasetStore::new(2);
        let mut r = record("p1", 5.0, Some(aoyama()));
        for (i, id) in ["p2", "p3"].iter().enumerate() {
            r.post_refs.push(PostRef {
                platform: Platform::Youtube,
                post_id: (*id).to_owned(),
                url: None,
                buzz_score: 1.0,
                posted_at: t0() + Duration::hours(i64::try_from(i).unwrap() + 1),
            });
        }
        store.upsert(&r).await.unwrap();
        let stored = store.get(&r.identity).await.unwrap();
        let ids: Vec<_> = stored.post_refs.iter().map(|p| p.post_id.as_str()).collect();
        assert_eq!(ids, vec!["p2", "p3"]);
    }
}
