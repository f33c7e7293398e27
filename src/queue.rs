//! Durable outbound mutation queue.
//!
//! Append-only, FIFO, at-least-once. Once [`MutationQueue::enqueue`]
//! returns, the mutation survives restart and reboot; it leaves the pending
//! set only when the server acknowledges it (`mark_synced`) or when an
//! operator dead-letters it. The queue never reorders, deduplicates, or
//! merges entries — insertion order is the ordering guarantee.
//!
//! Delivery is at-least-once, not exactly-once: if `mark_synced` fails
//! after a successful server call, the next drain resubmits. Server
//! handlers deduplicate on the natural key carried in each payload.

use crate::error::{StorageError, StorageResult};
use crate::store::{Store, StoreTx};
use crate::types::{DeadLetter, Mutation, RecordRef};
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

const MUTATIONS: &str = "mutations";
const DEAD_LETTERS: &str = "dead_letters";

/// Handle over the `mutations` collection. Cheap to clone.
#[derive(Clone)]
pub struct MutationQueue {
    store: Arc<Store>,
}

impl MutationQueue {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Append a mutation with a strictly increasing id. Never touches the
    /// network.
    pub fn enqueue(&self, mutation_type: &str, payload: Value) -> StorageResult<i64> {
        self.store
            .transaction(|tx| enqueue_in(tx, mutation_type, payload, None))
    }

    /// Append a mutation and run the caller's local write in the same
    /// transaction, so the optimistic record and its delivery wrapper can
    /// never diverge. `record_ref` points at the record whose `synced`
    /// flag should follow the mutation's.
    pub fn enqueue_with(
        &self,
        mutation_type: &str,
        payload: Value,
        record_ref: Option<RecordRef>,
        f: impl FnOnce(&StoreTx<'_>) -> StorageResult<()>,
    ) -> StorageResult<i64> {
        self.store.transaction(|tx| {
            f(tx)?;
            enqueue_in(tx, mutation_type, payload, record_ref)
        })
    }

    /// All unsynced mutations in FIFO replay order (id ascending).
    pub fn list_pending(&self) -> StorageResult<Vec<Mutation>> {
        let docs = self
            .store
            .query_by_index(MUTATIONS, "synced", &json!(false))?;
        docs.into_iter()
            .map(|doc| serde_json::from_value(doc).map_err(StorageError::from))
            .collect()
    }

    /// Number of mutations still waiting to reach the server. Drives the
    /// "N items waiting to sync" indicator.
    pub fn pending_count(&self) -> StorageResult<usize> {
        Ok(self.list_pending()?.len())
    }

    /// Flip `synced` on a mutation and, when it carries a record
    /// reference, on the underlying record in the same transaction.
    /// Idempotent; an unknown id (already pruned) is not an error.
    pub fn mark_synced(&self, id: i64) -> StorageResult<()> {
        self.store.transaction(|tx| {
            let Some(doc) = tx.get(MUTATIONS, id)? else {
                debug!(id, "mark_synced for unknown mutation, ignoring");
                return Ok(());
            };
            let mut mutation: Mutation = serde_json::from_value(doc)?;
            if mutation.synced {
                return Ok(());
            }
            mutation.synced = true;
            tx.put(MUTATIONS, &serde_json::to_value(&mutation)?)?;

            if let Some(record_ref) = &mutation.record_ref {
                if let Some(mut record) = tx.get(record_ref.collection.as_str(), record_ref.key.as_str())? {
                    if let Some(map) = record.as_object_mut() {
                        map.insert("synced".to_string(), Value::from(true));
                    }
                    tx.put(record_ref.collection.as_str(), &record)?;
                }
            }
            Ok(())
        })
    }

    /// Record one more drain cycle in which no route matched the mutation.
    /// Returns the updated counter.
    pub fn note_skipped(&self, id: i64) -> StorageResult<u32> {
        self.store.transaction(|tx| {
            let Some(doc) = tx.get(MUTATIONS, id)? else {
                return Ok(0);
            };
            let mut mutation: Mutation = serde_json::from_value(doc)?;
            mutation.skip_cycles = mutation.skip_cycles.saturating_add(1);
            tx.put(MUTATIONS, &serde_json::to_value(&mutation)?)?;
            Ok(mutation.skip_cycles)
        })
    }

    /// Move a stuck mutation out of the pending set into the operator's
    /// dead-letter collection.
    pub fn dead_letter(&self, id: i64, reason: &str) -> StorageResult<()> {
        self.store.transaction(|tx| {
            let Some(doc) = tx.get(MUTATIONS, id)? else {
                return Ok(());
            };
            let mutation: Mutation = serde_json::from_value(doc)?;
            let letter = DeadLetter {
                id: mutation.id,
                mutation_type: mutation.mutation_type,
                payload: mutation.payload,
                enqueued_at: mutation.enqueued_at,
                dead_lettered_at: Utc::now(),
                reason: reason.to_string(),
                skip_cycles: mutation.skip_cycles,
            };
            tx.put(DEAD_LETTERS, &serde_json::to_value(&letter)?)?;
            tx.delete(MUTATIONS, id)?;
            Ok(())
        })
    }

    /// All dead letters.
    pub fn list_dead_letters(&self) -> StorageResult<Vec<DeadLetter>> {
        self.store
            .scan(DEAD_LETTERS)?
            .into_iter()
            .map(|doc| serde_json::from_value(doc).map_err(StorageError::from))
            .collect()
    }

    /// Drop every dead letter. Operator-only escape hatch.
    pub fn purge_dead_letters(&self) -> StorageResult<usize> {
        self.store.transaction(|tx| {
            let letters = tx.scan(DEAD_LETTERS)?;
            let mut purged = 0;
            for doc in letters {
                let letter: DeadLetter = serde_json::from_value(doc)?;
                tx.delete(DEAD_LETTERS, letter.id.to_string())?;
                purged += 1;
            }
            Ok(purged)
        })
    }

    /// Put a dead letter back on the queue under a fresh id (it re-enters
    /// at the tail; the original capture timestamp is preserved in the
    /// payload's natural key).
    pub fn requeue_dead_letter(&self, id: i64) -> StorageResult<Option<i64>> {
        self.store.transaction(|tx| {
            let Some(doc) = tx.get(DEAD_LETTERS, id)? else {
                return Ok(None);
            };
            let letter: DeadLetter = serde_json::from_value(doc)?;
            tx.delete(DEAD_LETTERS, id)?;
            let new_id = enqueue_in(tx, &letter.mutation_type, letter.payload, None)?;
            Ok(Some(new_id))
        })
    }

    /// Drop synced mutations older than the retention window. Returns how
    /// many were removed.
    pub fn prune_synced(&self, older_than: Duration) -> StorageResult<usize> {
        let cutoff = Utc::now() - older_than;
        self.store.transaction(|tx| {
            let synced = tx.query_by_index(MUTATIONS, "synced", &json!(true))?;
            let mut pruned = 0;
            for doc in synced {
                let mutation: Mutation = serde_json::from_value(doc)?;
                if mutation.enqueued_at < cutoff {
                    tx.delete(MUTATIONS, mutation.id)?;
                    pruned += 1;
                }
            }
            Ok(pruned)
        })
    }
}

fn enqueue_in(
    tx: &StoreTx<'_>,
    mutation_type: &str,
    payload: Value,
    record_ref: Option<RecordRef>,
) -> StorageResult<i64> {
    let mutation = Mutation {
        id: 0, // assigned by add()
        mutation_type: mutation_type.to_string(),
        payload,
        enqueued_at: Utc::now(),
        synced: false,
        skip_cycles: 0,
        record_ref,
    };
    tx.add(MUTATIONS, &serde_json::to_value(&mutation)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn open_queue(dir: &tempfile::TempDir) -> MutationQueue {
        let store = Arc::new(Store::open(dir.path().join("guide.duckdb")).unwrap());
        MutationQueue::new(store)
    }

    #[test]
    fn pending_survive_restart_in_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("guide.duckdb");

        let queue = MutationQueue::new(Arc::new(Store::open(&path).unwrap()));
        let a = queue.enqueue("attendance_check_in", json!({ "tripId": "T1" })).unwrap();
        let b = queue.enqueue("attendance_check_out", json!({ "tripId": "T1" })).unwrap();
        let c = queue.enqueue("manifest_boarding", json!({ "tripId": "T1" })).unwrap();
        queue.mark_synced(b).unwrap();
        drop(queue);

        let queue = MutationQueue::new(Arc::new(Store::open(&path).unwrap()));
        let pending = queue.list_pending().unwrap();
        let ids: Vec<i64> = pending.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![a, c]);
        assert!(pending.iter().all(|m| !m.synced));
    }

    #[test]
    fn list_pending_is_fifo() {
        let dir = tempdir().unwrap();
        let queue = open_queue(&dir);
        for n in 0..5 {
            queue.enqueue("attendance_check_in", json!({ "n": n })).unwrap();
        }
        let pending = queue.list_pending().unwrap();
        let ns: Vec<i64> = pending
            .iter()
            .map(|m| m.payload["n"].as_i64().unwrap())
            .collect();
        assert_eq!(ns, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn mark_synced_is_idempotent_and_tolerates_unknown_ids() {
        let dir = tempdir().unwrap();
        let queue = open_queue(&dir);
        let id = queue.enqueue("attendance_check_in", json!({})).unwrap();

        queue.mark_synced(id).unwrap();
        queue.mark_synced(id).unwrap();
        queue.mark_synced(9999).unwrap();

        assert_eq!(queue.pending_count().unwrap(), 0);
    }

    #[test]
    fn mark_synced_flips_the_referenced_record() {
        let dir = tempdir().unwrap();
        let queue = open_queue(&dir);
        let id = queue
            .enqueue_with(
                "attendance_check_in",
                json!({ "tripId": "T1" }),
                Some(RecordRef {
                    collection: "attendance".to_string(),
                    key: "T1:G1:check_in:t0".to_string(),
                }),
                |tx| {
                    tx.put(
                        "attendance",
                        &json!({ "key": "T1:G1:check_in:t0", "trip_id": "T1", "synced": false }),
                    )
                },
            )
            .unwrap();

        queue.mark_synced(id).unwrap();
        let record = queue
            .store()
            .get("attendance", "T1:G1:check_in:t0")
            .unwrap()
            .unwrap();
        assert_eq!(record["synced"], true);
    }

    #[test]
    fn enqueue_with_is_atomic() {
        let dir = tempdir().unwrap();
        let queue = open_queue(&dir);
        let result = queue.enqueue_with("attendance_check_in", json!({}), None, |_tx| {
            Err(StorageError::UnknownCollection("boom".into()))
        });
        assert!(result.is_err());
        assert_eq!(queue.pending_count().unwrap(), 0);
    }

    #[test]
    fn dead_letter_moves_out_of_pending_and_requeues() {
        let dir = tempdir().unwrap();
        let queue = open_queue(&dir);
        let id = queue.enqueue("bogus_type", json!({ "x": 1 })).unwrap();

        assert_eq!(queue.note_skipped(id).unwrap(), 1);
        assert_eq!(queue.note_skipped(id).unwrap(), 2);

        queue.dead_letter(id, "no route for type 'bogus_type'").unwrap();
        assert_eq!(queue.pending_count().unwrap(), 0);

        let letters = queue.list_dead_letters().unwrap();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].id, id);
        assert_eq!(letters[0].skip_cycles, 2);

        let new_id = queue.requeue_dead_letter(id).unwrap().expect("requeued");
        assert!(new_id > id);
        assert!(queue.list_dead_letters().unwrap().is_empty());
        let pending = queue.list_pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].payload["x"], 1);
    }

    #[test]
    fn prune_drops_only_old_synced_entries() {
        let dir = tempdir().unwrap();
        let queue = open_queue(&dir);
        let old = queue.enqueue("attendance_check_in", json!({})).unwrap();
        let fresh = queue.enqueue("attendance_check_in", json!({})).unwrap();
        queue.mark_synced(old).unwrap();
        queue.mark_synced(fresh).unwrap();

        // Nothing is older than a day yet.
        assert_eq!(queue.prune_synced(Duration::days(1)).unwrap(), 0);
        // Everything synced is older than "zero seconds ago".
        assert_eq!(queue.prune_synced(Duration::zero()).unwrap(), 2);
        assert_eq!(queue.pending_count().unwrap(), 0);
    }
}
