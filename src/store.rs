//! Local durable store.
//!
//! One embedded DuckDB file holding named collections of JSON documents.
//! Each collection is a table of `(key, doc, idx_*)`: the primary key is
//! extracted from the document, secondary index fields are copied into
//! dedicated columns at write time so they can be scanned with plain SQL.
//!
//! Schema evolution is an explicit ordered list of [`Migration`]s applied
//! exactly once at [`Store::open`]; a newer version may add collections and
//! indexes but never destroys existing data, so mutations queued under an
//! older app build survive an upgrade. There is no reactive "collection
//! missing, reopen at version+1" path anywhere in the crate.
//!
//! All operations are durable before returning and never touch the network.
//! Failures surface as [`StorageError`] to the caller; the store does not
//! retry internally, since an unpersisted write is an immediate data-loss
//! risk the UI must report.

use crate::error::{StorageError, StorageResult};
use chrono::Utc;
use duckdb::{params, Connection, ToSql};
use serde_json::Value;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::info;
use uuid::{NoContext, Timestamp, Uuid};

/// How a collection derives its primary key.
#[derive(Debug, Clone, Copy)]
pub enum KeyKind {
    /// Key is the named document field, stored as text.
    Field(&'static str),
    /// Key is assigned from a per-collection sequence and written back into
    /// the named document field as an `i64`.
    Auto(&'static str),
}

/// Declarative description of one named collection.
#[derive(Debug)]
pub struct CollectionDef {
    pub name: &'static str,
    pub key: KeyKind,
    pub indexes: &'static [&'static str],
    /// Schema version that introduced this collection.
    pub since_version: i64,
}

/// Collections of the guide app store.
pub const COLLECTIONS: &[CollectionDef] = &[
    CollectionDef {
        name: "meta",
        key: KeyKind::Field("key"),
        indexes: &[],
        since_version: 1,
    },
    CollectionDef {
        name: "trips",
        key: KeyKind::Field("id"),
        indexes: &["date"],
        since_version: 1,
    },
    CollectionDef {
        name: "manifest",
        key: KeyKind::Field("key"),
        indexes: &["trip_id"],
        since_version: 1,
    },
    CollectionDef {
        name: "attendance",
        key: KeyKind::Field("key"),
        indexes: &["trip_id"],
        since_version: 1,
    },
    CollectionDef {
        name: "mutations",
        key: KeyKind::Auto("id"),
        indexes: &["synced"],
        since_version: 1,
    },
    CollectionDef {
        name: "dead_letters",
        key: KeyKind::Field("id"),
        indexes: &[],
        since_version: 2,
    },
];

struct Migration {
    version: i64,
    name: &'static str,
    apply: fn(&Connection) -> duckdb::Result<()>,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "guide app collections",
        apply: migrate_v1,
    },
    Migration {
        version: 2,
        name: "dead letter collection",
        apply: migrate_v2,
    },
];

fn migrate_v1(conn: &Connection) -> duckdb::Result<()> {
    create_collections_since(conn, 1)
}

fn migrate_v2(conn: &Connection) -> duckdb::Result<()> {
    create_collections_since(conn, 2)
}

fn create_collections_since(conn: &Connection, version: i64) -> duckdb::Result<()> {
    for def in COLLECTIONS.iter().filter(|d| d.since_version == version) {
        create_collection(conn, def)?;
    }
    Ok(())
}

fn create_collection(conn: &Connection, def: &CollectionDef) -> duckdb::Result<()> {
    let key_type = match def.key {
        KeyKind::Field(_) => "TEXT",
        KeyKind::Auto(_) => "BIGINT",
    };
    let mut columns = format!("key {} PRIMARY KEY, doc TEXT NOT NULL", key_type);
    for field in def.indexes {
        columns.push_str(&format!(", idx_{} TEXT", field));
    }
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        def.name, columns
    ))?;
    for field in def.indexes {
        conn.execute_batch(&format!(
            "CREATE INDEX IF NOT EXISTS {}_idx_{} ON {} (idx_{})",
            def.name, field, def.name, field
        ))?;
    }
    if let KeyKind::Auto(_) = def.key {
        conn.execute_batch(&format!(
            "CREATE SEQUENCE IF NOT EXISTS {}_key_seq START 1",
            def.name
        ))?;
    }
    Ok(())
}

/// Primary key of a stored document.
#[derive(Debug, Clone)]
pub enum Key {
    Int(i64),
    Text(String),
}

impl Key {
    fn as_text(&self) -> String {
        match self {
            Key::Int(i) => i.to_string(),
            Key::Text(s) => s.clone(),
        }
    }

    fn as_int(&self) -> Option<i64> {
        match self {
            Key::Int(i) => Some(*i),
            Key::Text(s) => s.parse().ok(),
        }
    }
}

impl From<i64> for Key {
    fn from(value: i64) -> Self {
        Key::Int(value)
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key::Text(value.to_string())
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Key::Text(value)
    }
}

/// Text encoding used for index columns and field-derived keys.
fn index_repr(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn collection_def(name: &str) -> StorageResult<&'static CollectionDef> {
    COLLECTIONS
        .iter()
        .find(|d| d.name == name)
        .ok_or_else(|| StorageError::UnknownCollection(name.to_string()))
}

/// Handle to the embedded database. Shared via `Arc`; the inner mutex
/// serializes every operation, matching the single-logical-writer model.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the store at `path` and bring the schema up to
    /// date. Idempotent: reopening at the same version applies nothing.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version BIGINT PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at TEXT NOT NULL
            )",
        )?;
        let current: i64 = conn.query_row(
            "SELECT coalesce(max(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )?;
        for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
            conn.execute_batch("BEGIN")?;
            let applied = (migration.apply)(&conn).and_then(|_| {
                conn.execute(
                    "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?, ?, ?)",
                    params![migration.version, migration.name, Utc::now().to_rfc3339()],
                )
                .map(|_| ())
            });
            match applied {
                Ok(()) => {
                    conn.execute_batch("COMMIT")?;
                    info!(
                        version = migration.version,
                        name = migration.name,
                        "applied store migration"
                    );
                }
                Err(e) => {
                    let _ = conn.execute_batch("ROLLBACK");
                    return Err(e.into());
                }
            }
        }
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Upsert by primary key.
    pub fn put(&self, collection: &str, doc: &Value) -> StorageResult<()> {
        let def = collection_def(collection)?;
        put_in(&self.conn(), def, doc)
    }

    /// Point lookup. Absence is `None`, not an error.
    pub fn get(&self, collection: &str, key: impl Into<Key>) -> StorageResult<Option<Value>> {
        let def = collection_def(collection)?;
        get_in(&self.conn(), def, &key.into())
    }

    /// Insert-only write against an auto-keyed collection; returns the
    /// assigned id, which is also written into the stored document.
    pub fn add(&self, collection: &str, doc: &Value) -> StorageResult<i64> {
        let def = collection_def(collection)?;
        add_in(&self.conn(), def, doc)
    }

    /// Remove a document. Returns whether anything was deleted.
    pub fn delete(&self, collection: &str, key: impl Into<Key>) -> StorageResult<bool> {
        let def = collection_def(collection)?;
        delete_in(&self.conn(), def, &key.into())
    }

    /// All documents whose indexed field equals `value`, ordered by
    /// primary key ascending.
    pub fn query_by_index(
        &self,
        collection: &str,
        index: &str,
        value: &Value,
    ) -> StorageResult<Vec<Value>> {
        let def = collection_def(collection)?;
        query_by_index_in(&self.conn(), def, index, value)
    }

    /// Every document in the collection, ordered by primary key ascending.
    pub fn scan(&self, collection: &str) -> StorageResult<Vec<Value>> {
        let def = collection_def(collection)?;
        scan_in(&self.conn(), def)
    }

    /// Run `f` inside a single transaction. Commits on `Ok`, rolls back on
    /// `Err`. This is the recorders' "local write + enqueue as one logical
    /// unit" guarantee.
    ///
    /// `f` must go through the provided [`StoreTx`]; calling back into the
    /// `Store` itself from inside `f` would deadlock on the connection
    /// mutex.
    pub fn transaction<T>(
        &self,
        f: impl FnOnce(&StoreTx<'_>) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let conn = self.conn();
        conn.execute_batch("BEGIN")?;
        let tx = StoreTx { conn: &*conn };
        match f(&tx) {
            Ok(value) => {
                conn.execute_batch("COMMIT")?;
                Ok(value)
            }
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }

    /// Stable identity of this device, generated once and persisted in the
    /// `meta` collection.
    pub fn device_id(&self) -> StorageResult<String> {
        let conn = self.conn();
        let def = collection_def("meta")?;
        if let Some(doc) = get_in(&conn, def, &Key::from("device_id"))? {
            if let Some(existing) = doc.get("value").and_then(Value::as_str) {
                return Ok(existing.to_string());
            }
        }
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());
        let id = format!("{}-{}", host, Uuid::new_v7(Timestamp::now(NoContext)));
        put_in(
            &conn,
            def,
            &serde_json::json!({ "key": "device_id", "value": id }),
        )?;
        Ok(id)
    }
}

/// Store operations scoped to an open transaction.
pub struct StoreTx<'a> {
    conn: &'a Connection,
}

impl StoreTx<'_> {
    pub fn put(&self, collection: &str, doc: &Value) -> StorageResult<()> {
        put_in(self.conn, collection_def(collection)?, doc)
    }

    pub fn get(&self, collection: &str, key: impl Into<Key>) -> StorageResult<Option<Value>> {
        get_in(self.conn, collection_def(collection)?, &key.into())
    }

    pub fn add(&self, collection: &str, doc: &Value) -> StorageResult<i64> {
        add_in(self.conn, collection_def(collection)?, doc)
    }

    pub fn delete(&self, collection: &str, key: impl Into<Key>) -> StorageResult<bool> {
        delete_in(self.conn, collection_def(collection)?, &key.into())
    }

    pub fn query_by_index(
        &self,
        collection: &str,
        index: &str,
        value: &Value,
    ) -> StorageResult<Vec<Value>> {
        query_by_index_in(self.conn, collection_def(collection)?, index, value)
    }

    pub fn scan(&self, collection: &str) -> StorageResult<Vec<Value>> {
        scan_in(self.conn, collection_def(collection)?)
    }
}

fn put_in(conn: &Connection, def: &CollectionDef, doc: &Value) -> StorageResult<()> {
    let doc_text = serde_json::to_string(doc)?;
    let index_values: Vec<Option<String>> = def
        .indexes
        .iter()
        .map(|field| doc.get(*field).map(index_repr))
        .collect();

    let mut columns = String::from("key, doc");
    let mut placeholders = String::from("?, ?");
    for field in def.indexes {
        columns.push_str(&format!(", idx_{}", field));
        placeholders.push_str(", ?");
    }
    let sql = format!(
        "INSERT OR REPLACE INTO {} ({}) VALUES ({})",
        def.name, columns, placeholders
    );

    match def.key {
        KeyKind::Field(field) => {
            let key = doc
                .get(field)
                .map(index_repr)
                .ok_or_else(|| StorageError::MissingKeyField {
                    collection: def.name.to_string(),
                    field: field.to_string(),
                })?;
            let mut sql_params: Vec<&dyn ToSql> = vec![&key, &doc_text];
            for value in &index_values {
                sql_params.push(value);
            }
            conn.execute(&sql, sql_params.as_slice())?;
        }
        KeyKind::Auto(field) => {
            let key = doc
                .get(field)
                .and_then(Value::as_i64)
                .ok_or_else(|| StorageError::MissingKeyField {
                    collection: def.name.to_string(),
                    field: field.to_string(),
                })?;
            let mut sql_params: Vec<&dyn ToSql> = vec![&key, &doc_text];
            for value in &index_values {
                sql_params.push(value);
            }
            conn.execute(&sql, sql_params.as_slice())?;
        }
    }
    Ok(())
}

fn add_in(conn: &Connection, def: &CollectionDef, doc: &Value) -> StorageResult<i64> {
    let field = match def.key {
        KeyKind::Auto(field) => field,
        KeyKind::Field(_) => return Err(StorageError::NotAutoKeyed(def.name.to_string())),
    };
    let id: i64 = conn.query_row(
        &format!("SELECT nextval('{}_key_seq')", def.name),
        [],
        |row| row.get(0),
    )?;

    let mut doc = doc.clone();
    match doc.as_object_mut() {
        Some(map) => {
            map.insert(field.to_string(), Value::from(id));
        }
        None => {
            return Err(StorageError::MissingKeyField {
                collection: def.name.to_string(),
                field: field.to_string(),
            })
        }
    }
    let doc_text = serde_json::to_string(&doc)?;
    let index_values: Vec<Option<String>> = def
        .indexes
        .iter()
        .map(|f| doc.get(*f).map(index_repr))
        .collect();

    let mut columns = String::from("key, doc");
    let mut placeholders = String::from("?, ?");
    for f in def.indexes {
        columns.push_str(&format!(", idx_{}", f));
        placeholders.push_str(", ?");
    }
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        def.name, columns, placeholders
    );
    let mut sql_params: Vec<&dyn ToSql> = vec![&id, &doc_text];
    for value in &index_values {
        sql_params.push(value);
    }
    conn.execute(&sql, sql_params.as_slice())?;
    Ok(id)
}

fn get_in(conn: &Connection, def: &CollectionDef, key: &Key) -> StorageResult<Option<Value>> {
    let sql = format!("SELECT doc FROM {} WHERE key = ?", def.name);
    let row: duckdb::Result<String> = match def.key {
        KeyKind::Field(_) => {
            let key = key.as_text();
            conn.query_row(&sql, params![key], |row| row.get(0))
        }
        KeyKind::Auto(_) => {
            let key = key
                .as_int()
                .ok_or_else(|| StorageError::InvalidKey(def.name.to_string()))?;
            conn.query_row(&sql, params![key], |row| row.get(0))
        }
    };
    match row {
        Ok(text) => Ok(Some(serde_json::from_str(&text)?)),
        Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn delete_in(conn: &Connection, def: &CollectionDef, key: &Key) -> StorageResult<bool> {
    let sql = format!("DELETE FROM {} WHERE key = ?", def.name);
    let deleted = match def.key {
        KeyKind::Field(_) => {
            let key = key.as_text();
            conn.execute(&sql, params![key])?
        }
        KeyKind::Auto(_) => {
            let key = key
                .as_int()
                .ok_or_else(|| StorageError::InvalidKey(def.name.to_string()))?;
            conn.execute(&sql, params![key])?
        }
    };
    Ok(deleted > 0)
}

fn query_by_index_in(
    conn: &Connection,
    def: &CollectionDef,
    index: &str,
    value: &Value,
) -> StorageResult<Vec<Value>> {
    if !def.indexes.contains(&index) {
        return Err(StorageError::UnknownIndex {
            collection: def.name.to_string(),
            index: index.to_string(),
        });
    }
    let sql = format!(
        "SELECT doc FROM {} WHERE idx_{} = ? ORDER BY key",
        def.name, index
    );
    let needle = index_repr(value);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![needle], |row| row.get::<_, String>(0))?;
    let mut docs = Vec::new();
    for row in rows {
        docs.push(serde_json::from_str(&row?)?);
    }
    Ok(docs)
}

fn scan_in(conn: &Connection, def: &CollectionDef) -> StorageResult<Vec<Value>> {
    let sql = format!("SELECT doc FROM {} ORDER BY key", def.name);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    let mut docs = Vec::new();
    for row in rows {
        docs.push(serde_json::from_str(&row?)?);
    }
    Ok(docs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn open_store(dir: &tempfile::TempDir) -> Store {
        Store::open(dir.path().join("guide.duckdb")).expect("open store")
    }

    #[test]
    fn open_is_idempotent_and_preserves_data() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("guide.duckdb");

        let store = Store::open(&path).unwrap();
        store
            .put("trips", &json!({ "id": "T1", "name": "Reef tour", "date": "2026-08-07" }))
            .unwrap();
        drop(store);

        let store = Store::open(&path).unwrap();
        let trip = store.get("trips", "T1").unwrap().expect("trip survives reopen");
        assert_eq!(trip["name"], "Reef tour");
    }

    #[test]
    fn get_missing_is_none_not_error() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        assert!(store.get("trips", "nope").unwrap().is_none());
    }

    #[test]
    fn put_is_upsert() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        store
            .put("trips", &json!({ "id": "T1", "name": "Old", "date": "2026-08-07" }))
            .unwrap();
        store
            .put("trips", &json!({ "id": "T1", "name": "New", "date": "2026-08-08" }))
            .unwrap();
        let trip = store.get("trips", "T1").unwrap().unwrap();
        assert_eq!(trip["name"], "New");

        // Index column follows the replacement.
        let on_old = store
            .query_by_index("trips", "date", &json!("2026-08-07"))
            .unwrap();
        assert!(on_old.is_empty());
        let on_new = store
            .query_by_index("trips", "date", &json!("2026-08-08"))
            .unwrap();
        assert_eq!(on_new.len(), 1);
    }

    #[test]
    fn add_assigns_monotonic_ids() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        let a = store
            .add("mutations", &json!({ "type": "x", "payload": {}, "synced": false }))
            .unwrap();
        let b = store
            .add("mutations", &json!({ "type": "y", "payload": {}, "synced": false }))
            .unwrap();
        assert!(b > a);

        let doc = store.get("mutations", a).unwrap().unwrap();
        assert_eq!(doc["id"], a);
    }

    #[test]
    fn add_rejects_field_keyed_collections() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        let err = store.add("trips", &json!({ "id": "T1" })).unwrap_err();
        assert!(matches!(err, StorageError::NotAutoKeyed(_)));
    }

    #[test]
    fn unknown_collection_and_index_are_typed_errors() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        assert!(matches!(
            store.get("bogus", "k").unwrap_err(),
            StorageError::UnknownCollection(_)
        ));
        assert!(matches!(
            store.query_by_index("trips", "bogus", &json!("x")).unwrap_err(),
            StorageError::UnknownIndex { .. }
        ));
    }

    #[test]
    fn query_by_index_matches_booleans() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        store
            .add("mutations", &json!({ "type": "a", "payload": {}, "synced": false }))
            .unwrap();
        store
            .add("mutations", &json!({ "type": "b", "payload": {}, "synced": true }))
            .unwrap();
        let pending = store
            .query_by_index("mutations", "synced", &json!(false))
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0]["type"], "a");
    }

    #[test]
    fn transaction_rolls_back_on_error() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        let result = store.transaction(|tx| {
            tx.put("trips", &json!({ "id": "T9", "name": "Ghost", "date": "2026-01-01" }))?;
            Err::<(), _>(StorageError::UnknownCollection("boom".into()))
        });
        assert!(result.is_err());
        assert!(store.get("trips", "T9").unwrap().is_none());
    }

    #[test]
    fn device_id_is_stable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("guide.duckdb");
        let store = Store::open(&path).unwrap();
        let first = store.device_id().unwrap();
        assert_eq!(first, store.device_id().unwrap());
        drop(store);

        let store = Store::open(&path).unwrap();
        assert_eq!(first, store.device_id().unwrap());
    }

    #[test]
    fn migrations_are_recorded_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("guide.duckdb");
        let store = Store::open(&path).unwrap();
        drop(store);
        // A second open must not re-apply; INSERTs on the primary-keyed
        // schema_migrations table would fail if it tried.
        let store = Store::open(&path).unwrap();
        store
            .put("dead_letters", &json!({ "id": 1, "type": "x" }))
            .unwrap();
    }
}
