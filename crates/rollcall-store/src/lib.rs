//! rollcall-store: persistence for subject records and captured images.
//!
//! Descriptors are kept as one JSON file per subject and rescanned on every
//! match; images are written per enrollment slot, optionally sealed with
//! AES-256-GCM.

pub mod descriptors;
pub mod error;
pub mod images;

pub use descriptors::{DescriptorStore, FsDescriptorStore, MemoryDescriptorStore};
pub use error::StoreError;
pub use images::{FsImageStore, ImageStore, SealedImageStore};

use rollcall_core::{Candidate, SubjectRecord};
use std::path::Path;
use std::sync::Arc;

const MAX_SUBJECT_ID_LEN: usize = 128;

/// Check that a subject identifier is usable as a file name.
///
/// Allowed: ASCII letters, digits, `_`, `-`, `.`; must not start with `.`.
pub fn validate_subject_id(id: &str) -> Result<(), StoreError> {
    let ok = !id.is_empty()
        && id.len() <= MAX_SUBJECT_ID_LEN
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if ok {
        Ok(())
    } else {
        Err(StoreError::InvalidSubjectId(id.to_string()))
    }
}

/// Flatten records into the `(owner, descriptor)` scan set, preserving order.
pub fn flatten(records: Vec<SubjectRecord>) -> Vec<Candidate> {
    records
        .into_iter()
        .flat_map(|record| {
            let owner = Arc::new(record.identity);
            record
                .descriptors
                .into_iter()
                .map(move |descriptor| Candidate {
                    owner: owner.clone(),
                    descriptor,
                })
        })
        .collect()
}

/// Write via a hidden temp file and rename, so readers never see a partial file.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| StoreError::InvalidSubjectId(path.display().to_string()))?;
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));

    tokio::fs::write(&tmp, bytes).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}
