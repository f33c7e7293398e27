//! Record types captured by the guide app while offline.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A queued outbound operation awaiting server acknowledgement.
///
/// Immutable once created except for the `synced` flag (and the
/// `skip_cycles` bookkeeping counter maintained by the drain loop). Synced
/// entries are kept as an audit trail until pruned by retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mutation {
    /// Locally assigned, strictly increasing. Replay order tie-break.
    #[serde(default)]
    pub id: i64,
    /// Tag resolved against the route table, e.g. `attendance_check_in`.
    #[serde(rename = "type")]
    pub mutation_type: String,
    /// Opaque structured data; becomes the HTTP request body verbatim.
    pub payload: serde_json::Value,
    pub enqueued_at: DateTime<Utc>,
    pub synced: bool,
    /// Consecutive drain cycles in which no route matched this mutation.
    #[serde(default)]
    pub skip_cycles: u32,
    /// Local record whose `synced` flag follows this mutation's, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_ref: Option<RecordRef>,
}

/// Pointer from a mutation to the locally written record it delivers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordRef {
    pub collection: String,
    pub key: String,
}

/// A mutation evicted from the pending queue after repeated unroutable
/// cycles. Inspectable and requeue-able by an operator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub id: i64,
    #[serde(rename = "type")]
    pub mutation_type: String,
    pub payload: serde_json::Value,
    pub enqueued_at: DateTime<Utc>,
    pub dead_lettered_at: DateTime<Utc>,
    pub reason: String,
    pub skip_cycles: u32,
}

/// Device GPS fix captured alongside attendance events.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
    /// Reported accuracy radius in meters.
    pub accuracy: f64,
}

/// Direction of an attendance event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceKind {
    CheckIn,
    CheckOut,
}

impl AttendanceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceKind::CheckIn => "check_in",
            AttendanceKind::CheckOut => "check_out",
        }
    }

    /// Mutation type tag this event is delivered under.
    pub fn mutation_type(&self) -> &'static str {
        match self {
            AttendanceKind::CheckIn => "attendance_check_in",
            AttendanceKind::CheckOut => "attendance_check_out",
        }
    }
}

/// A guide check-in/check-out captured at the moment of the action.
///
/// The (trip, guide, kind, timestamp) tuple is the natural key the server
/// deduplicates on when a retry resubmits an already-applied event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceEvent {
    pub trip_id: String,
    pub guide_id: String,
    pub kind: AttendanceKind,
    pub recorded_at: DateTime<Utc>,
    pub location: Option<GeoPoint>,
    #[serde(default)]
    pub is_late: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub penalty_amount: Option<f64>,
    #[serde(default)]
    pub synced: bool,
}

impl AttendanceEvent {
    /// Composite identity, also the storage key. Append-only: a repeated
    /// action at a different instant is a new record.
    pub fn natural_key(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.trip_id,
            self.guide_id,
            self.kind.as_str(),
            self.recorded_at.to_rfc3339()
        )
    }
}

/// Direction of a manifest event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManifestKind {
    Boarding,
    Return,
}

impl ManifestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ManifestKind::Boarding => "boarding",
            ManifestKind::Return => "return",
        }
    }

    pub fn mutation_type(&self) -> &'static str {
        match self {
            ManifestKind::Boarding => "manifest_boarding",
            ManifestKind::Return => "manifest_return",
        }
    }
}

/// A traveler boarding or returning to the vehicle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEvent {
    pub trip_id: String,
    pub traveler_id: String,
    pub kind: ManifestKind,
    pub recorded_at: DateTime<Utc>,
}

impl ManifestEvent {
    pub fn natural_key(&self) -> String {
        format!(
            "{}:{}:{}",
            self.trip_id,
            self.traveler_id,
            self.kind.as_str()
        )
    }
}

/// Per-traveler manifest state rendered by the boarding screen.
///
/// Pre-loaded from the server while online and updated optimistically by
/// the manifest recorder; keyed by (trip, traveler).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub trip_id: String,
    pub traveler_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traveler_name: Option<String>,
    #[serde(default)]
    pub boarded: bool,
    #[serde(default)]
    pub returned: bool,
    #[serde(default)]
    pub synced: bool,
}

impl ManifestEntry {
    pub fn key(trip_id: &str, traveler_id: &str) -> String {
        format!("{}:{}", trip_id, traveler_id)
    }
}

/// A trip document upload (waiver scan, incident photo, receipt).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentUpload {
    pub trip_id: String,
    pub guide_id: String,
    pub file_name: String,
    pub content_type: String,
    /// File bytes, base64-encoded for the JSON body.
    pub data_base64: String,
    pub recorded_at: DateTime<Utc>,
}

/// Read-mostly local copy of a server-owned trip, kept for offline
/// rendering. Last-write-wins; never authoritative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TripSnapshot {
    pub id: String,
    pub name: String,
    pub date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guide_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meeting_point: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<u32>,
}
