//! Outbox for reliable record delivery.
//!
//! Every submitted test record is written to the outbox before it is sent.
//! A record that cannot be saved stays on disk and can be retried later
//! without re-parsing the source file.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{paths, SpoolConfig};
use crate::error::SpoolError;
use crate::types::TestRecord;

/// Envelope written to the outbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpooledRecord {
    pub entry_id: Uuid,
    pub correlation_id: String,
    pub workstation_id: String,
    pub agent_version: String,
    pub spooled_at: DateTime<Utc>,
    pub record: TestRecord,
}

/// Entry counts per outbox directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SpoolStatus {
    pub pending: usize,
    pub uploading: usize,
    pub failed: usize,
    pub completed: usize,
    pub pending_bytes: u64,
}

/// Outbox manager.
#[derive(Debug, Clone)]
pub struct Spool {
    config: SpoolConfig,
    pending_dir: PathBuf,
    uploading_dir: PathBuf,
    failed_dir: PathBuf,
    completed_dir: PathBuf,
}

impl Spool {
    /// Outbox at the standard location.
    pub fn new(config: &SpoolConfig) -> Result<Self> {
        Self::at(paths::spool_dir(), config)
    }

    /// Outbox rooted at `root`.
    pub fn at(root: impl AsRef<Path>, config: &SpoolConfig) -> Result<Self> {
        let root = root.as_ref();
        let spool = Self {
            config: config.clone(),
            pending_dir: root.join("pending"),
            uploading_dir: root.join("uploading"),
            failed_dir: root.join("failed"),
            completed_dir: root.join("completed"),
        };

        for dir in [
            &spool.pending_dir,
            &spool.uploading_dir,
            &spool.failed_dir,
            &spool.completed_dir,
        ] {
            std::fs::create_dir_all(dir)
                .map_err(|e| SpoolError::NotWritable(format!("{}: {}", dir.display(), e)))?;
        }

        Ok(spool)
    }

    /// Generate a correlation ID for tracing.
    fn generate_correlation_id(&self, workstation_id: &str) -> String {
        let timestamp = Utc::now().format("%Y%m%d%H%M%S");
        let random: u32 = rand::random();
        format!("{}-{}-{:08x}", workstation_id, timestamp, random)
    }

    /// Write a record to the pending directory.
    pub fn enqueue(
        &self,
        record: &TestRecord,
        workstation_id: &str,
    ) -> Result<PathBuf, SpoolError> {
        self.check_limits()?;
        self.cleanup_old_entries()?;

        let now = Utc::now();
        let entry = SpooledRecord {
            entry_id: Uuid::new_v4(),
            correlation_id: self.generate_correlation_id(workstation_id),
            workstation_id: workstation_id.to_string(),
            agent_version: env!("CARGO_PKG_VERSION").to_string(),
            spooled_at: now,
            record: record.clone(),
        };

        let json = serde_json::to_string_pretty(&entry)?;

        // Timestamp prefix keeps lexical order equal to submission order
        let filename = format!(
            "{}_{}.json",
            now.format("%Y%m%dT%H%M%S%.6f"),
            entry.entry_id.simple()
        );
        let temp_path = self.pending_dir.join(format!(".{}.tmp", filename));
        let final_path = self.pending_dir.join(&filename);

        // Write to temp file first, then rename (atomic on most filesystems)
        std::fs::write(&temp_path, &json)
            .map_err(|e| SpoolError::FileOperation(e.to_string()))?;
        std::fs::rename(&temp_path, &final_path)
            .map_err(|e| SpoolError::FileOperation(e.to_string()))?;

        info!(
            service_id = %record.service_id,
            test = record.test_type.slug(),
            correlation_id = %entry.correlation_id,
            path = %final_path.display(),
            "Record queued"
        );

        Ok(final_path)
    }

    /// Read an outbox entry.
    pub fn read_entry(&self, path: &Path) -> Result<SpooledRecord, SpoolError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| SpoolError::FileOperation(e.to_string()))?;
        Ok(serde_json::from_str(&content)?)
    }

    fn check_limits(&self) -> Result<(), SpoolError> {
        let size_mb = calculate_dir_size(&self.pending_dir) / (1024 * 1024);

        if size_mb >= self.config.max_pending_mb {
            return Err(SpoolError::Full(size_mb, self.config.max_pending_mb));
        }

        Ok(())
    }

    /// Remove pending and failed entries older than max_age_days.
    fn cleanup_old_entries(&self) -> Result<(), SpoolError> {
        let cutoff = Utc::now() - Duration::days(self.config.max_age_days as i64);

        self.cleanup_old_in_dir(&self.pending_dir, cutoff)?;
        self.cleanup_old_in_dir(&self.failed_dir, cutoff)?;

        Ok(())
    }

    fn cleanup_old_in_dir(&self, dir: &Path, cutoff: DateTime<Utc>) -> Result<(), SpoolError> {
        if !dir.exists() {
            return Ok(());
        }

        let entries =
            std::fs::read_dir(dir).map_err(|e| SpoolError::FileOperation(e.to_string()))?;

        for entry in entries.flatten() {
            let path = entry.path();
            let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
                continue;
            };
            let modified: DateTime<Utc> = modified.into();
            if modified < cutoff {
                warn!(
                    path = %path.display(),
                    age_days = (Utc::now() - modified).num_days(),
                    "Removing stale outbox entry (max_age_days exceeded)"
                );
                if let Err(e) = std::fs::remove_file(&path) {
                    error!(path = %path.display(), error = %e, "Failed to remove stale entry");
                }
            }
        }

        Ok(())
    }

    /// Pending entries, oldest first.
    pub fn get_pending(&self) -> Result<Vec<PathBuf>> {
        list_entries(&self.pending_dir)
    }

    /// Failed entries, oldest first.
    pub fn get_failed(&self) -> Result<Vec<PathBuf>> {
        list_entries(&self.failed_dir)
    }

    pub fn mark_uploading(&self, path: &Path) -> Result<PathBuf> {
        move_entry(path, &self.uploading_dir)
    }

    pub fn mark_completed(&self, path: &Path) -> Result<()> {
        let new_path = move_entry(path, &self.completed_dir)?;
        info!(path = %new_path.display(), "Record saved");

        self.cleanup_completed()?;
        Ok(())
    }

    pub fn mark_failed(&self, path: &Path) -> Result<PathBuf> {
        let new_path = move_entry(path, &self.failed_dir)?;
        warn!(path = %new_path.display(), "Record marked as failed");
        Ok(new_path)
    }

    /// Move an entry back to pending (for retry).
    pub fn mark_pending(&self, path: &Path) -> Result<PathBuf> {
        let new_path = move_entry(path, &self.pending_dir)?;
        debug!(path = %new_path.display(), "Record returned to pending");
        Ok(new_path)
    }

    /// Move every failed entry back to pending. Returns how many moved.
    pub fn requeue_failed(&self) -> Result<usize> {
        let failed = self.get_failed()?;
        for path in &failed {
            self.mark_pending(path)?;
        }
        Ok(failed.len())
    }

    fn cleanup_completed(&self) -> Result<()> {
        let entries = list_entries(&self.completed_dir)?;
        if entries.len() <= self.config.completed_retention_count {
            return Ok(());
        }

        let to_remove = entries.len() - self.config.completed_retention_count;
        for path in entries.into_iter().take(to_remove) {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(path = %path.display(), error = %e, "Failed to cleanup completed entry");
            }
        }

        Ok(())
    }

    /// Move entries left in uploading by an interrupted run back to pending.
    pub fn recover(&self) -> Result<usize> {
        let stranded = list_entries(&self.uploading_dir)?;
        let mut recovered = 0;

        for path in stranded {
            match self.mark_pending(&path) {
                Ok(_) => recovered += 1,
                Err(e) => error!(
                    path = %path.display(),
                    error = %e,
                    "Failed to recover uploading entry"
                ),
            }
        }

        if recovered > 0 {
            info!(count = recovered, "Recovered interrupted outbox entries");
        }
        Ok(recovered)
    }

    pub fn status(&self) -> Result<SpoolStatus> {
        Ok(SpoolStatus {
            pending: list_entries(&self.pending_dir)?.len(),
            uploading: list_entries(&self.uploading_dir)?.len(),
            failed: list_entries(&self.failed_dir)?.len(),
            completed: list_entries(&self.completed_dir)?.len(),
            pending_bytes: calculate_dir_size(&self.pending_dir),
        })
    }
}

/// `.json` entries of a directory sorted by name, which is submission order.
fn list_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();

    entries.sort();
    Ok(entries)
}

fn move_entry(path: &Path, dir: &Path) -> Result<PathBuf> {
    let filename = path
        .file_name()
        .ok_or_else(|| anyhow::anyhow!("Invalid outbox path: {}", path.display()))?;
    let new_path = dir.join(filename);

    std::fs::rename(path, &new_path)?;
    Ok(new_path)
}

fn calculate_dir_size(path: &Path) -> u64 {
    std::fs::read_dir(path)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter_map(|e| e.metadata().ok())
                .map(|m| m.len())
                .sum()
        })
        .unwrap_or(0)
}
