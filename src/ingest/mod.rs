//! Ingestion pipeline: file bytes to grouped measurement rows.
//!
//! Reads a file (local, or fetched through the backend proxy), parses its
//! sections and groups the parsed fields into one row set per test type.
//! Derived values are computed on demand and never stored.

use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::IngestError;
use crate::metrics::{self, DerivedParams};
use crate::parser::{self, ParseOptions, ParseReport};
use crate::reader::{self, fetch::Fetcher, FileFormat};
use crate::types::{DerivedRow, MeasurementRow, SourceInfo, TestRecord, TestType, Tolerance};

/// Result of ingesting one file.
#[derive(Debug, Clone)]
pub struct IngestResult {
    pub source: SourceInfo,
    pub report: ParseReport,
    pub groups: BTreeMap<TestType, Vec<MeasurementRow>>,
}

impl IngestResult {
    /// Rows for one test type; empty when the file had no such section.
    pub fn rows(&self, test: TestType) -> &[MeasurementRow] {
        self.groups.get(&test).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Build the record persisted for `service_id`.
    pub fn record(&self, service_id: &str, test: TestType, tolerance: Tolerance) -> TestRecord {
        TestRecord {
            service_id: service_id.to_string(),
            test_type: test,
            rows: self.rows(test).to_vec(),
            tolerance,
            source: Some(self.source.clone()),
            saved_at: Utc::now(),
        }
    }
}

/// Runs the read → parse → group pipeline with fixed options.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ingestor {
    options: ParseOptions,
}

impl Ingestor {
    pub fn new(config: &Config) -> Self {
        Self {
            options: ParseOptions {
                strict: config.ingest.strict,
            },
        }
    }

    pub fn with_options(options: ParseOptions) -> Self {
        Self { options }
    }

    /// Ingest in-memory bytes. `hint` is a file name, extension or MIME type.
    pub fn ingest_bytes(
        &self,
        name: &str,
        bytes: &[u8],
        hint: &str,
    ) -> Result<IngestResult, IngestError> {
        let start = Instant::now();
        let format = FileFormat::from_hint(hint)?;
        let grid = reader::read_as(bytes, format)?;
        let report = parser::parse(&grid, self.options)?;

        for title in &report.unrecognized_sections {
            warn!(file = %name, section = %title, "Skipped unrecognized section");
        }
        if report.unmapped_cells > 0 {
            debug!(file = %name, cells = report.unmapped_cells, "Dropped unmapped cells");
        }

        let groups = parser::group_rows(&report.fields);

        info!(
            file = %name,
            format = format.name(),
            rows = grid.len(),
            fields = report.fields.len(),
            tests = groups.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "File ingested"
        );

        Ok(IngestResult {
            source: SourceInfo {
                file_name: name.to_string(),
                sha256: fingerprint(bytes),
                format: format.name().to_string(),
            },
            report,
            groups,
        })
    }

    /// Ingest a local file. The format comes from `format` when given,
    /// otherwise from the file extension.
    pub fn ingest_path(
        &self,
        path: &Path,
        format: Option<&str>,
    ) -> Result<IngestResult, IngestError> {
        let bytes = std::fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        let hint = format.unwrap_or(&name).to_string();

        self.ingest_bytes(&name, &bytes, &hint)
    }

    /// Fetch a file through the backend proxy, then ingest it.
    pub async fn ingest_url(
        &self,
        fetcher: &Fetcher,
        url: &str,
        format: Option<&str>,
        cancel: oneshot::Receiver<()>,
    ) -> Result<IngestResult, IngestError> {
        let file = fetcher.fetch(url, cancel).await?;
        let hint = format.unwrap_or(&file.hint).to_string();
        self.ingest_bytes(&file.name, &file.bytes, &hint)
    }
}

/// Compute derived rows for one test with the configured tolerance and unit.
pub fn derive(config: &Config, test: TestType, rows: &[MeasurementRow]) -> Vec<DerivedRow> {
    let params = DerivedParams::new(test, config.tolerance_for(test), config.ingest.leakage_unit);
    metrics::compute(rows, &params)
}

/// Recompute derived rows for a loaded record using its own tolerance.
pub fn derive_record(config: &Config, record: &TestRecord) -> Vec<DerivedRow> {
    let params = DerivedParams::new(record.test_type, record.tolerance, config.ingest.leakage_unit);
    metrics::compute(&record.rows, &params)
}

/// SHA-256 of the file content, hex encoded.
pub fn fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
