//! Record store boundary.
//!
//! The lifecycle engine persists identities through the [`RecordStore`]
//! trait. Records cross the boundary as self-contained JSON object maps.
//! [`MemoryRecordStore`] is a process-local implementation that keeps the
//! canonical JSON bytes of every record.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use serde_json::{Map, Value};
use serde_json_canonicalizer::to_string as jcs_canonicalize;

use crate::error::StoreError;
use crate::types::Did;

/// Entity kind under which DID records are stored
pub const DID_ENTITY_KIND: &str = "did";

/// Serialized form of a record
pub type Record = Map<String, Value>;

/// Storage collaborator used by the lifecycle engine.
///
/// Calls may block on I/O. The engine never retries a failed call.
pub trait RecordStore: Send + Sync {
    /// Loads the record stored under `key`, or `None` if there is none
    fn load(&self, kind: &str, key: &str) -> Result<Option<Record>, StoreError>;

    /// Stores `record` under `key`.
    ///
    /// With `auto_create` unset the key must already exist, otherwise the
    /// store reports [`StoreError::NotFound`]. With it set an existing
    /// record is overwritten.
    fn save(&self, kind: &str, key: &str, record: Record, auto_create: bool) -> Result<(), StoreError>;

    /// Stores `record` only if `key` is free, otherwise reports
    /// [`StoreError::AlreadyExists`].
    ///
    /// The check and the write must be atomic: two concurrent creations of
    /// the same key are arbitrated here, and exactly one of them succeeds.
    fn create(&self, kind: &str, key: &str, record: Record) -> Result<(), StoreError>;
}

/// Converts a DID to its stored form
pub fn to_record(did: &Did) -> Result<Record, StoreError> {
    match serde_json::to_value(did)? {
        Value::Object(map) => Ok(map),
        _ => Err(StoreError::Backend("DID did not serialize to an object".to_string())),
    }
}

/// Rebuilds a DID from its stored form
pub fn from_record(record: Record) -> Result<Did, StoreError> {
    Ok(serde_json::from_value(Value::Object(record))?)
}

/// In-memory record store holding canonical JSON
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: Mutex<HashMap<(String, String), Vec<u8>>>,
    loads: AtomicUsize,
    saves: AtomicUsize,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored bytes for a key, exactly as persisted
    pub fn raw(&self, kind: &str, key: &str) -> Option<Vec<u8>> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(kind.to_string(), key.to_string()))
            .cloned()
    }

    /// Number of records held
    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of `load` calls served so far
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Number of `save` calls served so far
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl RecordStore for MemoryRecordStore {
    fn load(&self, kind: &str, key: &str) -> Result<Option<Record>, StoreError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        match records.get(&(kind.to_string(), key.to_string())) {
            Some(bytes) => Ok(Some(serde_json::from_slice(bytes)?)),
            None => Ok(None),
        }
    }

    fn save(&self, kind: &str, key: &str, record: Record, auto_create: bool) -> Result<(), StoreError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        let bytes = canonical_bytes(&record)?;

        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let id = (kind.to_string(), key.to_string());
        if !auto_create && !records.contains_key(&id) {
            return Err(StoreError::NotFound);
        }
        records.insert(id, bytes);
        Ok(())
    }

    fn create(&self, kind: &str, key: &str, record: Record) -> Result<(), StoreError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        let bytes = canonical_bytes(&record)?;

        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        match records.entry((kind.to_string(), key.to_string())) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists),
            Entry::Vacant(slot) => {
                slot.insert(bytes);
                Ok(())
            }
        }
    }
}

fn canonical_bytes(record: &Record) -> Result<Vec<u8>, StoreError> {
    Ok(jcs_canonicalize(record)
        .map_err(|e| StoreError::Backend(e.to_string()))?
        .into_bytes())
}
