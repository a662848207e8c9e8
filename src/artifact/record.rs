//! The record table half of the Artifact Store (§3, §4.D): a persistence
//! interface in the same shape as `auth::store::AuthStore`, since the real
//! relational driver is equally out of scope here (§1).

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::Serialize;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize)]
pub struct ArtifactRecord {
    pub sha1: String,
    pub name: String,
    pub size: u64,
}

#[async_trait::async_trait]
pub trait ArtifactRecordStore: Send + Sync {
    /// Inserts `record` keyed by its `sha1` iff absent. Returns the row now
    /// on file, and whether this call created it (`false` means a row for
    /// this `sha1` already existed, per §4.D's "already exists" case).
    async fn insert_if_absent(&self, record: ArtifactRecord) -> Result<(ArtifactRecord, bool)>;

    async fn get(&self, sha1: &str) -> Result<ArtifactRecord>;
}

#[derive(Default)]
pub struct InMemoryArtifactRecordStore {
    records: RwLock<HashMap<String, ArtifactRecord>>,
}

impl InMemoryArtifactRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ArtifactRecordStore for InMemoryArtifactRecordStore {
    async fn insert_if_absent(&self, record: ArtifactRecord) -> Result<(ArtifactRecord, bool)> {
        let mut records = self.records.write();
        if let Some(existing) = records.get(&record.sha1) {
            return Ok((existing.clone(), false));
        }
        records.insert(record.sha1.clone(), record.clone());
        Ok((record, true))
    }

    async fn get(&self, sha1: &str) -> Result<ArtifactRecord> {
        self.records
            .read()
            .get(sha1)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("artifact {sha1}")))
    }
}
