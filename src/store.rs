//! Local JSON record store.
//!
//! Records are written one file per record under `<store_dir>/records/`, and
//! `<store_dir>/index.json` maps content checksums to the record that first
//! claimed them. The index backs duplicate detection.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use rk_core::RecordId;
use rk_pipeline::collaborators::{DuplicateIndex, DuplicateRecord, RecordStore};
use rk_pipeline::{MediaRecord, Session};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

const INDEX_FILE: &str = "index.json";
const RECORDS_DIR: &str = "records";

#[derive(Debug, Default, Serialize, Deserialize)]
struct Index {
    #[serde(default)]
    by_checksum: BTreeMap<String, DuplicateRecord>,
}

/// Stored form of a record: the record plus who wrote it.
#[derive(Debug, Serialize, Deserialize)]
pub struct StoredRecord {
    pub record_id: RecordId,
    pub stored_by: String,
    #[serde(flatten)]
    pub record: MediaRecord,
}

/// File-system record store and duplicate index.
pub struct JsonRecordStore {
    root: PathBuf,
    /// Loaded on first use; the lock serializes index updates.
    index: Mutex<Option<Index>>,
}

impl JsonRecordStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            index: Mutex::new(None),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, id: RecordId) -> PathBuf {
        self.root.join(RECORDS_DIR).join(format!("{id}.json"))
    }

    async fn load_index(&self) -> rk_core::Result<Index> {
        let path = self.root.join(INDEX_FILE);
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                rk_core::Error::Storage(format!("corrupt index {}: {e}", path.display()))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Index::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Write `bytes` next to `path` and rename it into place.
    async fn write_atomic(path: &Path, bytes: &[u8]) -> rk_core::Result<()> {
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Read back a stored record.
    pub async fn get(&self, id: RecordId) -> rk_core::Result<StoredRecord> {
        let path = self.record_path(id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(rk_core::Error::not_found("record", id));
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes)
            .map_err(|e| rk_core::Error::Storage(format!("corrupt record {id}: {e}")))
    }
}

#[async_trait]
impl DuplicateIndex for JsonRecordStore {
    async fn find_by_checksum(&self, checksum: &str) -> rk_core::Result<Option<DuplicateRecord>> {
        let mut guard = self.index.lock().await;
        if guard.is_none() {
            *guard = Some(self.load_index().await?);
        }
        Ok(guard
            .as_ref()
            .and_then(|index| index.by_checksum.get(checksum))
            .cloned())
    }
}

#[async_trait]
impl RecordStore for JsonRecordStore {
    async fn persist(&self, record: &MediaRecord, session: &Session) -> rk_core::Result<RecordId> {
        let record_id = RecordId::generate();
        let stored = StoredRecord {
            record_id,
            stored_by: session.user_id.clone(),
            record: record.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&stored)
            .map_err(|e| rk_core::Error::Storage(format!("serialize record: {e}")))?;

        tokio::fs::create_dir_all(self.root.join(RECORDS_DIR)).await?;
        Self::write_atomic(&self.record_path(record_id), &bytes).await?;

        let Some(checksum) = record.checksum.clone() else {
            tracing::debug!(%record_id, "Record has no checksum; not indexed");
            return Ok(record_id);
        };

        let mut guard = self.index.lock().await;
        if guard.is_none() {
            *guard = Some(self.load_index().await?);
        }
        let Some(index) = guard.as_mut() else {
            return Err(rk_core::Error::Internal("index not loaded".into()));
        };
        // Reprocessed files keep pointing at their first record.
        index
            .by_checksum
            .entry(checksum.clone())
            .or_insert_with(|| DuplicateRecord {
                record_id,
                checksum,
                file_path: record.file_path.clone(),
                ingested_at: Utc::now(),
            });
        let bytes = serde_json::to_vec_pretty(&*index)
            .map_err(|e| rk_core::Error::Storage(format!("serialize index: {e}")))?;
        Self::write_atomic(&self.root.join(INDEX_FILE), &bytes).await?;

        tracing::debug!(%record_id, path = %self.record_path(record_id).display(), "Record stored");
        Ok(record_id)
    }
}
