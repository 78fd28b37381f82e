//! Result store -- the most recent batch as a pretty-printed JSON file.
//!
//! A re-run never rewrites history: fresh outcomes are merged by id into the
//! stored batch, and the full stored batch is written back.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::matrix::{Batch, CaseId, TestCase};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no stored results at {path}; run the tests first")]
    Missing { path: PathBuf },

    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("stored results at {path} are malformed: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode results: {0}")]
    Encode(#[source] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct ResultStore {
    path: PathBuf,
}

impl ResultStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored batch. A missing or unreadable file is an error; there
    /// is nothing sensible to list or re-run without it.
    pub fn load(&self) -> Result<Batch, StoreError> {
        let content = std::fs::read_to_string(&self.path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                StoreError::Missing {
                    path: self.path.clone(),
                }
            } else {
                StoreError::Io {
                    path: self.path.clone(),
                    source,
                }
            }
        })?;
        let batch: Batch = serde_json::from_str(&content).map_err(|source| StoreError::Malformed {
            path: self.path.clone(),
            source,
        })?;
        debug!(path = %self.path.display(), cases = batch.len(), "Loaded stored results");
        Ok(batch)
    }

    /// Overwrite the store with `batch`.
    ///
    /// Written to a sibling temp file first, then renamed into place.
    pub fn save(&self, batch: &Batch) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(batch).map_err(StoreError::Encode)?;
        let tmp = self.path.with_extension("json.tmp");
        let io_error = |source: std::io::Error| StoreError::Io {
            path: self.path.clone(),
            source,
        };
        std::fs::write(&tmp, json).map_err(io_error)?;
        std::fs::rename(&tmp, &self.path).map_err(io_error)?;
        info!(path = %self.path.display(), cases = batch.len(), "Saved results");
        Ok(())
    }

    /// Merge a re-run subset into the stored batch and persist the result.
    pub fn save_rerun(&self, fresh: &Batch) -> Result<Batch, StoreError> {
        let mut stored = self.load()?;
        let updated = merge_outcomes(&mut stored, fresh);
        debug!(updated, stored = stored.len(), "Merged re-run outcomes");
        self.save(&stored)?;
        Ok(stored)
    }
}

/// Copy the outcome of every fresh case onto the stored case with the same
/// id. Stored order, membership and identity fields are kept. Returns the
/// number of stored cases updated.
pub fn merge_outcomes(stored: &mut Batch, fresh: &Batch) -> usize {
    let by_id: HashMap<CaseId, &TestCase> = fresh.iter().map(|c| (c.id, c)).collect();
    let mut updated = 0;
    for case in stored.iter_mut() {
        if let Some(fresh_case) = by_id.get(&case.id) {
            case.take_outcome_from(fresh_case);
            updated += 1;
        }
    }
    if updated < by_id.len() {
        warn!(
            fresh = by_id.len(),
            updated, "Some re-run cases are no longer in the stored results"
        );
    }
    updated
}
