//! Local draft store.
//!
//! Holds work-in-progress test records keyed by `(service_id, test_type)`,
//! one JSON file each, until they are submitted or discarded. Only raw rows
//! and tolerance are kept; derived rows are recomputed when a draft is shown.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::paths;
use crate::types::{TestRecord, TestType};

/// Listing entry for a stored draft.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DraftSummary {
    pub service_id: String,
    pub test_type: TestType,
    pub rows: usize,
    pub saved_at: DateTime<Utc>,
}

/// Filesystem-backed draft store.
#[derive(Debug, Clone)]
pub struct DraftStore {
    root: PathBuf,
}

impl DraftStore {
    /// Store at the standard drafts directory.
    pub fn open() -> Self {
        Self::at(paths::drafts_dir())
    }

    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn draft_path(&self, service_id: &str, test: TestType) -> Result<PathBuf> {
        if service_id.is_empty() {
            anyhow::bail!("Service ID must not be empty");
        }
        Ok(self
            .root
            .join(service_dir_name(service_id))
            .join(format!("{}.json", test.slug())))
    }

    /// Save or replace the draft for the record's key.
    pub fn save(&self, record: &TestRecord) -> Result<PathBuf> {
        let path = self.draft_path(&record.service_id, record.test_type)?;
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create draft directory: {}", dir.display()))?;

        // Write to temp file first, then rename so readers never see half a draft
        let temp_path = path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(record)?;
        std::fs::write(&temp_path, content)?;
        std::fs::rename(&temp_path, &path)?;

        info!(
            service_id = %record.service_id,
            test = record.test_type.slug(),
            rows = record.rows.len(),
            "Draft saved"
        );
        Ok(path)
    }

    /// Load a draft, if one exists.
    pub fn load(&self, service_id: &str, test: TestType) -> Result<Option<TestRecord>> {
        let path = self.draft_path(service_id, test)?;
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&path)?;
        let record: TestRecord = serde_json::from_str(&content)
            .with_context(|| format!("Corrupt draft: {}", path.display()))?;

        // The file must hold the key it is stored under
        if record.service_id != service_id || record.test_type != test {
            anyhow::bail!(
                "Draft {} belongs to {} / {}, not {} / {}",
                path.display(),
                record.service_id,
                record.test_type.slug(),
                service_id,
                test.slug()
            );
        }
        Ok(Some(record))
    }

    /// Delete a draft. Returns whether one existed.
    pub fn discard(&self, service_id: &str, test: TestType) -> Result<bool> {
        let path = self.draft_path(service_id, test)?;
        if !path.exists() {
            return Ok(false);
        }

        std::fs::remove_file(&path)?;
        debug!(service_id = %service_id, test = test.slug(), "Draft discarded");

        // Drop the service directory once its last draft is gone
        if let Some(dir) = path.parent() {
            let _ = std::fs::remove_dir(dir);
        }
        Ok(true)
    }

    /// All drafts, optionally for one service, most recent first.
    pub fn list(&self, service_id: Option<&str>) -> Result<Vec<DraftSummary>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut drafts = Vec::new();
        for service_dir in std::fs::read_dir(&self.root)? {
            let service_dir = service_dir?.path();
            if !service_dir.is_dir() {
                continue;
            }

            for entry in std::fs::read_dir(&service_dir)? {
                let path = entry?.path();
                if path.extension().is_some_and(|e| e == "json") {
                    match read_summary(&path) {
                        Ok(summary) => drafts.push(summary),
                        Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable draft"),
                    }
                }
            }
        }

        if let Some(service_id) = service_id {
            drafts.retain(|d| d.service_id == service_id);
        }
        drafts.sort_by(|a, b| b.saved_at.cmp(&a.saved_at));
        Ok(drafts)
    }
}

fn read_summary(path: &Path) -> Result<DraftSummary> {
    let content = std::fs::read_to_string(path)?;
    let record: TestRecord = serde_json::from_str(&content)?;
    Ok(DraftSummary {
        service_id: record.service_id,
        test_type: record.test_type,
        rows: record.rows.len(),
        saved_at: record.saved_at,
    })
}

/// Directory name for a service id: hex of its bytes, so distinct ids never
/// share a directory and no id can leave the store root.
fn service_dir_name(service_id: &str) -> String {
    hex::encode(service_id.as_bytes())
}
