//! Content-addressed blob storage (§4.D): SHA-1 over the content decides the
//! filename under `<data_root>/artifact_data/`; the record table (see
//! [`crate::artifact::record`]) is consulted second, per the crash-ordering
//! open question in §9 (blob-then-row, reconciled on startup is noted there
//! as a future hardening, not required here).

use sha1::{Digest, Sha1};

use crate::artifact::record::{ArtifactRecord, ArtifactRecordStore};
use crate::config::data_path;
use crate::error::{Error, Result};

pub enum PutOutcome {
    Created(ArtifactRecord),
    AlreadyExists(ArtifactRecord),
}

pub struct ArtifactStore {
    records: Box<dyn ArtifactRecordStore>,
}

impl ArtifactStore {
    pub fn new(records: Box<dyn ArtifactRecordStore>) -> Self {
        Self { records }
    }

    fn blob_path(sha1: &str) -> camino::Utf8PathBuf {
        data_path("artifact_data").join(sha1)
    }

    /// Hashes `bytes`, writes the blob if its hash isn't already on disk, and
    /// inserts the record. Idempotent: re-uploading identical content never
    /// produces a second blob or a second row.
    pub async fn put(&self, bytes: &[u8], name: &str) -> Result<PutOutcome> {
        let sha1 = hex_sha1(bytes);
        let blob_path = Self::blob_path(&sha1);

        if !blob_path.exists() {
            if let Some(parent) = blob_path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|error| Error::Internal(anyhow::anyhow!(error).context("creating artifact_data dir")))?;
            }
            std::fs::write(&blob_path, bytes)
                .map_err(|error| Error::Internal(anyhow::anyhow!(error).context("writing artifact blob")))?;
        }

        let record = ArtifactRecord {
            sha1,
            name: name.to_owned(),
            size: bytes.len() as u64,
        };

        let (record, created) = self.records.insert_if_absent(record).await?;
        Ok(if created {
            PutOutcome::Created(record)
        } else {
            PutOutcome::AlreadyExists(record)
        })
    }

    pub async fn get(&self, sha1: &str) -> Result<(ArtifactRecord, Vec<u8>)> {
        let record = self.records.get(sha1).await?;
        let bytes = std::fs::read(Self::blob_path(sha1))
            .map_err(|_| Error::NotFound(format!("artifact blob {sha1}")))?;
        Ok((record, bytes))
    }
}

fn hex_sha1(bytes: &[u8]) -> String {
    let digest = Sha1::new().chain_update(bytes).finalize();
    hex::encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::record::InMemoryArtifactRecordStore;

    fn store(data_root: &std::path::Path) -> ArtifactStore {
        // SAFETY: single-threaded test, no concurrent env mutation.
        unsafe { std::env::set_var("SATOP_DATA_ROOT", data_root) };
        ArtifactStore::new(Box::new(InMemoryArtifactRecordStore::new()))
    }

    #[tokio::test]
    async fn duplicate_upload_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        let first = store.put(b"hello world", "a.bin").await.unwrap();
        let second = store.put(b"hello world", "b.bin").await.unwrap();

        let first_record = match first {
            PutOutcome::Created(record) => record,
            PutOutcome::AlreadyExists(_) => panic!("expected first upload to create"),
        };
        let second_record = match second {
            PutOutcome::AlreadyExists(record) => record,
            PutOutcome::Created(_) => panic!("expected second upload to find existing"),
        };

        assert_eq!(first_record.sha1, second_record.sha1);
        assert_eq!(second_record.name, "a.bin"); // first writer's name wins

        unsafe { std::env::remove_var("SATOP_DATA_ROOT") };
    }

    #[tokio::test]
    async fn get_returns_stored_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        let outcome = store.put(b"payload", "f.bin").await.unwrap();
        let sha1 = match outcome {
            PutOutcome::Created(record) => record.sha1,
            PutOutcome::AlreadyExists(record) => record.sha1,
        };

        let (record, bytes) = store.get(&sha1).await.unwrap();
        assert_eq!(record.size, 7);
        assert_eq!(bytes, b"payload");

        unsafe { std::env::remove_var("SATOP_DATA_ROOT") };
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let err = store.get("deadbeef").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        unsafe { std::env::remove_var("SATOP_DATA_ROOT") };
    }
}
