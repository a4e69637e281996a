//! Subject record storage.

use crate::{flatten, validate_subject_id, write_atomic, StoreError};
use async_trait::async_trait;
use rollcall_core::{Candidate, SubjectRecord};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// Persistence for subject records.
///
/// There is no index: [`all_descriptors`](DescriptorStore::all_descriptors)
/// rebuilds the full scan set on every call, O(total descriptors).
#[async_trait]
pub trait DescriptorStore: Send + Sync {
    /// Persist a record. An existing record with the same id is replaced.
    async fn put(&self, record: &SubjectRecord) -> Result<(), StoreError>;

    /// Every stored descriptor tagged with its owner, in a stable order.
    async fn all_descriptors(&self) -> Result<Vec<Candidate>, StoreError>;

    /// Number of loadable subject records.
    async fn subject_count(&self) -> Result<usize, StoreError>;
}

fn check_record(record: &SubjectRecord) -> Result<(), StoreError> {
    validate_subject_id(&record.identity.student_id)?;
    if record.descriptors.is_empty() {
        return Err(StoreError::EmptyRecord(record.identity.student_id.clone()));
    }
    Ok(())
}

/// One `<studentId>.json` file per subject under a single directory.
pub struct FsDescriptorStore {
    dir: PathBuf,
    expected_dim: usize,
}

impl FsDescriptorStore {
    /// Open (and create if needed) a descriptor directory.
    ///
    /// Stored descriptors whose length differs from `expected_dim` are skipped on load.
    pub async fn open(dir: impl Into<PathBuf>, expected_dim: usize) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        tracing::info!(dir = %dir.display(), expected_dim, "descriptor store opened");
        Ok(Self { dir, expected_dim })
    }

    fn record_path(&self, student_id: &str) -> PathBuf {
        self.dir.join(format!("{student_id}.json"))
    }

    /// Load every well-formed record, sorted by file name.
    async fn load_records(&self) -> Result<Vec<SubjectRecord>, StoreError> {
        let mut paths = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_json = path.extension().is_some_and(|ext| ext == "json");
            let hidden = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with('.'));
            if is_json && !hidden {
                paths.push(path);
            }
        }
        paths.sort();

        let mut records = Vec::with_capacity(paths.len());
        for path in paths {
            let raw = match tokio::fs::read_to_string(&path).await {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable descriptor file");
                    continue;
                }
            };
            let record: SubjectRecord = match serde_json::from_str(&raw) {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping malformed descriptor file");
                    continue;
                }
            };
            if let Some(record) = retain_valid(record, self.expected_dim, &path) {
                records.push(record);
            }
        }

        Ok(records)
    }
}

/// Drop descriptors of the wrong length; drop the record if none remain.
fn retain_valid(mut record: SubjectRecord, expected_dim: usize, path: &Path) -> Option<SubjectRecord> {
    let before = record.descriptors.len();
    record.descriptors.retain(|d| d.len() == expected_dim);
    let dropped = before - record.descriptors.len();

    if dropped > 0 {
        tracing::warn!(
            path = %path.display(),
            dropped,
            expected_dim,
            "skipping descriptors with wrong dimensionality"
        );
    }
    if record.descriptors.is_empty() {
        tracing::warn!(path = %path.display(), "skipping record with no usable descriptors");
        return None;
    }
    Some(record)
}

#[async_trait]
impl DescriptorStore for FsDescriptorStore {
    async fn put(&self, record: &SubjectRecord) -> Result<(), StoreError> {
        check_record(record)?;
        let path = self.record_path(&record.identity.student_id);
        let json = serde_json::to_vec_pretty(record)?;
        write_atomic(&path, &json).await?;
        tracing::info!(
            student_id = %record.identity.student_id,
            descriptors = record.descriptors.len(),
            "subject record saved"
        );
        Ok(())
    }

    async fn all_descriptors(&self) -> Result<Vec<Candidate>, StoreError> {
        Ok(flatten(self.load_records().await?))
    }

    async fn subject_count(&self) -> Result<usize, StoreError> {
        Ok(self.load_records().await?.len())
    }
}

/// In-process store in insertion order. Contents are lost on restart.
#[derive(Default)]
pub struct MemoryDescriptorStore {
    records: RwLock<Vec<SubjectRecord>>,
}

impl MemoryDescriptorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DescriptorStore for MemoryDescriptorStore {
    async fn put(&self, record: &SubjectRecord) -> Result<(), StoreError> {
        check_record(record)?;
        let mut records = self.records.write().await;
        match records
            .iter_mut()
            .find(|r| r.identity.student_id == record.identity.student_id)
        {
            Some(existing) => *existing = record.clone(),
            None => records.push(record.clone()),
        }
        Ok(())
    }

    async fn all_descriptors(&self) -> Result<Vec<Candidate>, StoreError> {
        Ok(flatten(self.records.read().await.clone()))
    }

    async fn subject_count(&self) -> Result<usize, StoreError> {
        Ok(self.records.read().await.len())
    }
}
