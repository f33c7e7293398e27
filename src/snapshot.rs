//! Cached entity snapshots for offline rendering.
//!
//! Pre-loaded from the server while online, read at any connectivity
//! state, never authoritative for writes. Last-write-wins: a put fully
//! replaces the stored snapshot; there is no merge logic.

use crate::error::StorageResult;
use crate::store::Store;
use crate::types::{ManifestEntry, TripSnapshot};
use chrono::NaiveDate;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

const TRIPS: &str = "trips";
const MANIFEST: &str = "manifest";

/// Read-mostly local copies of server-owned trips and manifests.
#[derive(Clone)]
pub struct SnapshotStore {
    store: Arc<Store>,
}

impl SnapshotStore {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn put_trip(&self, trip: &TripSnapshot) -> StorageResult<()> {
        self.store.put(TRIPS, &serde_json::to_value(trip)?)
    }

    /// Replace the cached trips in one transaction; the pre-load fetch
    /// calls this with the server's answer.
    pub fn put_trips(&self, trips: &[TripSnapshot]) -> StorageResult<()> {
        self.store.transaction(|tx| {
            for trip in trips {
                tx.put(TRIPS, &serde_json::to_value(trip)?)?;
            }
            Ok(())
        })?;
        debug!(count = trips.len(), "trip snapshots cached");
        Ok(())
    }

    pub fn trip(&self, id: &str) -> StorageResult<Option<TripSnapshot>> {
        match self.store.get(TRIPS, id)? {
            Some(doc) => Ok(Some(serde_json::from_value(doc)?)),
            None => Ok(None),
        }
    }

    /// Trips on a given calendar day, via the date index.
    pub fn trips_on(&self, date: NaiveDate) -> StorageResult<Vec<TripSnapshot>> {
        let docs = self
            .store
            .query_by_index(TRIPS, "date", &Value::from(date.to_string()))?;
        docs.into_iter()
            .map(|doc| serde_json::from_value(doc).map_err(Into::into))
            .collect()
    }

    /// Cache the server's manifest for a trip. Entries arrive already
    /// synced; the recorder flips them back to unsynced on local edits.
    pub fn put_manifest(&self, entries: &[ManifestEntry]) -> StorageResult<()> {
        self.store.transaction(|tx| {
            for entry in entries {
                let mut doc = serde_json::to_value(entry)?;
                if let Some(map) = doc.as_object_mut() {
                    map.insert(
                        "key".to_string(),
                        Value::from(ManifestEntry::key(&entry.trip_id, &entry.traveler_id)),
                    );
                }
                tx.put(MANIFEST, &doc)?;
            }
            Ok(())
        })?;
        debug!(count = entries.len(), "manifest entries cached");
        Ok(())
    }

    pub fn manifest_for(&self, trip_id: &str) -> StorageResult<Vec<ManifestEntry>> {
        let docs = self
            .store
            .query_by_index(MANIFEST, "trip_id", &Value::from(trip_id))?;
        docs.into_iter()
            .map(|doc| serde_json::from_value(doc).map_err(Into::into))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn snapshots(dir: &tempfile::TempDir) -> SnapshotStore {
        let store = Arc::new(Store::open(dir.path().join("guide.duckdb")).unwrap());
        SnapshotStore::new(store)
    }

    fn trip(id: &str, date: &str) -> TripSnapshot {
        TripSnapshot {
            id: id.to_string(),
            name: format!("Trip {}", id),
            date: date.parse().unwrap(),
            guide_id: Some("G1".to_string()),
            meeting_point: None,
            capacity: Some(12),
        }
    }

    #[test]
    fn preload_then_read_offline() {
        let dir = tempdir().unwrap();
        let cache = snapshots(&dir);

        cache
            .put_trips(&[trip("T1", "2026-08-07"), trip("T2", "2026-08-08")])
            .unwrap();

        let t1 = cache.trip("T1").unwrap().unwrap();
        assert_eq!(t1.name, "Trip T1");
        assert!(cache.trip("T404").unwrap().is_none());

        let today = cache.trips_on("2026-08-07".parse().unwrap()).unwrap();
        assert_eq!(today.len(), 1);
        assert_eq!(today[0].id, "T1");
    }

    #[test]
    fn put_replaces_wholesale() {
        let dir = tempdir().unwrap();
        let cache = snapshots(&dir);

        cache.put_trip(&trip("T1", "2026-08-07")).unwrap();
        let mut updated = trip("T1", "2026-08-09");
        updated.capacity = None;
        cache.put_trip(&updated).unwrap();

        let stored = cache.trip("T1").unwrap().unwrap();
        assert_eq!(stored.date.to_string(), "2026-08-09");
        assert!(stored.capacity.is_none());
    }

    #[test]
    fn manifest_round_trip() {
        let dir = tempdir().unwrap();
        let cache = snapshots(&dir);

        cache
            .put_manifest(&[
                ManifestEntry {
                    trip_id: "T1".to_string(),
                    traveler_id: "P1".to_string(),
                    traveler_name: Some("Ada".to_string()),
                    boarded: false,
                    returned: false,
                    synced: true,
                },
                ManifestEntry {
                    trip_id: "T1".to_string(),
                    traveler_id: "P2".to_string(),
                    traveler_name: Some("Grace".to_string()),
                    boarded: false,
                    returned: false,
                    synced: true,
                },
            ])
            .unwrap();

        let entries = cache.manifest_for("T1").unwrap();
        assert_eq!(entries.len(), 2);
        assert!(cache.manifest_for("T9").unwrap().is_empty());
    }
}
