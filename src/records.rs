//! Recorders: domain actions captured as local records plus queued
//! mutations.
//!
//! Each recorder performs the optimistic local write and the enqueue in a
//! single store transaction, so the record and its delivery wrapper cannot
//! diverge. Storage failures propagate to the caller unchanged — the UI
//! must tell the user the action was NOT saved.

use crate::error::StorageResult;
use crate::queue::MutationQueue;
use crate::types::{
    AttendanceEvent, DocumentUpload, ManifestEntry, ManifestEvent, ManifestKind, RecordRef,
};
use base64::Engine;
use chrono::Utc;
use serde_json::Value;
use tracing::debug;

const ATTENDANCE: &str = "attendance";
const MANIFEST: &str = "manifest";

/// Captures guide check-in/check-out events.
#[derive(Clone)]
pub struct AttendanceRecorder {
    queue: MutationQueue,
}

impl AttendanceRecorder {
    pub fn new(queue: MutationQueue) -> Self {
        Self { queue }
    }

    /// Write the attendance record and enqueue its mutation. Returns the
    /// mutation id.
    pub fn record(&self, event: &AttendanceEvent) -> StorageResult<i64> {
        let key = event.natural_key();
        let mut doc = serde_json::to_value(event)?;
        if let Some(map) = doc.as_object_mut() {
            map.insert("key".to_string(), Value::from(key.clone()));
            map.insert("synced".to_string(), Value::from(false));
        }
        let payload = serde_json::to_value(event)?;

        let id = self.queue.enqueue_with(
            event.kind.mutation_type(),
            payload,
            Some(RecordRef {
                collection: ATTENDANCE.to_string(),
                key: key.clone(),
            }),
            |tx| tx.put(ATTENDANCE, &doc),
        )?;
        debug!(mutation = id, %key, "attendance event recorded");
        Ok(id)
    }

    /// All attendance records captured for one trip.
    pub fn for_trip(&self, trip_id: &str) -> StorageResult<Vec<AttendanceEvent>> {
        let docs = self
            .queue
            .store()
            .query_by_index(ATTENDANCE, "trip_id", &Value::from(trip_id))?;
        docs.into_iter()
            .map(|doc| serde_json::from_value(doc).map_err(Into::into))
            .collect()
    }
}

/// Captures traveler boarding/return events against the manifest.
#[derive(Clone)]
pub struct ManifestRecorder {
    queue: MutationQueue,
}

impl ManifestRecorder {
    pub fn new(queue: MutationQueue) -> Self {
        Self { queue }
    }

    /// Update the traveler's manifest entry and enqueue the event. The
    /// entry is created if the traveler was not pre-loaded (walk-up
    /// booking while offline).
    pub fn record(&self, event: &ManifestEvent) -> StorageResult<i64> {
        let key = ManifestEntry::key(&event.trip_id, &event.traveler_id);
        let payload = serde_json::to_value(event)?;
        let event = event.clone();

        let id = self.queue.enqueue_with(
            event.kind.mutation_type(),
            payload,
            Some(RecordRef {
                collection: MANIFEST.to_string(),
                key: key.clone(),
            }),
            |tx| {
                let mut entry: ManifestEntry = match tx.get(MANIFEST, key.as_str())? {
                    Some(doc) => serde_json::from_value(doc)?,
                    None => ManifestEntry {
                        trip_id: event.trip_id.clone(),
                        traveler_id: event.traveler_id.clone(),
                        traveler_name: None,
                        boarded: false,
                        returned: false,
                        synced: false,
                    },
                };
                match event.kind {
                    ManifestKind::Boarding => entry.boarded = true,
                    ManifestKind::Return => entry.returned = true,
                }
                entry.synced = false;

                let mut doc = serde_json::to_value(&entry)?;
                if let Some(map) = doc.as_object_mut() {
                    map.insert("key".to_string(), Value::from(key.clone()));
                }
                tx.put(MANIFEST, &doc)
            },
        )?;
        debug!(mutation = id, %key, "manifest event recorded");
        Ok(id)
    }
}

/// Queues trip document uploads (waiver scans, incident photos).
///
/// Documents have no offline render surface, so there is no local record —
/// only the mutation.
#[derive(Clone)]
pub struct DocumentRecorder {
    queue: MutationQueue,
}

impl DocumentRecorder {
    pub fn new(queue: MutationQueue) -> Self {
        Self { queue }
    }

    pub fn upload(
        &self,
        trip_id: &str,
        guide_id: &str,
        file_name: &str,
        content_type: &str,
        bytes: &[u8],
    ) -> StorageResult<i64> {
        let upload = DocumentUpload {
            trip_id: trip_id.to_string(),
            guide_id: guide_id.to_string(),
            file_name: file_name.to_string(),
            content_type: content_type.to_string(),
            data_base64: base64::engine::general_purpose::STANDARD.encode(bytes),
            recorded_at: Utc::now(),
        };
        let id = self
            .queue
            .enqueue("document_upload", serde_json::to_value(&upload)?)?;
        debug!(mutation = id, file_name, "document upload queued");
        Ok(id)
    }
}
