//! Submit and pull commands.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{error, info};

use crate::cli::render::{self, DerivedOutput};
use crate::cli::load_config;
use crate::drafts::DraftStore;
use crate::ingest::{self, Ingestor};
use crate::metrics::VerdictSummary;
use crate::spool::Spool;
use crate::types::{TestRecord, TestType};
use crate::uploader::Uploader;

/// Run the submit command.
pub async fn submit(
    config_path: Option<&Path>,
    service_id: &str,
    test: Option<TestType>,
    file: Option<PathBuf>,
    format: Option<String>,
) -> Result<()> {
    let config = load_config(config_path)?;
    let drafts = DraftStore::open();

    let records: Vec<TestRecord> = match file {
        Some(path) => {
            let result = Ingestor::new(&config)
                .ingest_path(&path, format.as_deref())
                .with_context(|| format!("Failed to parse {}", path.display()))?;

            let tests: Vec<TestType> = match test {
                Some(t) => vec![t],
                None => result.groups.keys().copied().collect(),
            };
            tests
                .into_iter()
                .filter(|t| !result.rows(*t).is_empty())
                .map(|t| result.record(service_id, t, config.tolerance_for(t)))
                .collect()
        }
        None => {
            let mut records = Vec::new();
            for summary in drafts.list(Some(service_id))? {
                if test.is_some_and(|t| t != summary.test_type) {
                    continue;
                }
                if let Some(record) = drafts.load(service_id, summary.test_type)? {
                    records.push(record);
                }
            }
            records
        }
    };

    if records.is_empty() {
        anyhow::bail!("Nothing to submit for service '{}'", service_id);
    }

    let spool = Spool::new(&config.spool)?;
    let uploader = Uploader::new(&config.backend, spool.clone())?;
    let workstation_id = config.agent.resolved_workstation_id();

    println!();
    let mut failures = 0;
    for record in &records {
        let path = spool.enqueue(record, &workstation_id)?;

        match uploader.upload_with_retry(&path).await {
            Ok(()) => {
                println!("Saved: {} / {}", service_id, record.test_type.slug());
                if drafts.discard(service_id, record.test_type)? {
                    info!(test = record.test_type.slug(), "Submitted draft removed");
                }
            }
            Err(e) => {
                error!(test = record.test_type.slug(), error = %e, "Submit failed");
                println!("FAILED: {} / {}: {}", service_id, record.test_type.slug(), e);
                failures += 1;
            }
        }
    }
    println!();

    if failures > 0 {
        println!("{} record(s) kept in the outbox. Run 'qaingest outbox retry' to resend.", failures);
        anyhow::bail!("{} of {} records not saved", failures, records.len());
    }

    Ok(())
}

/// Run the pull command.
pub async fn pull(
    config_path: Option<&Path>,
    service_id: &str,
    test: TestType,
    save_draft: bool,
    json: bool,
) -> Result<()> {
    let config = load_config(config_path)?;
    let spool = Spool::new(&config.spool)?;
    let uploader = Uploader::new(&config.backend, spool)?;

    let record = uploader
        .load(service_id, test)
        .await
        .with_context(|| format!("Failed to load {} / {}", service_id, test.slug()))?;

    let derived = ingest::derive_record(&config, &record);

    if json {
        render::print_json(&DerivedOutput {
            test_type: record.test_type,
            tolerance: record.tolerance,
            summary: VerdictSummary::from_rows(&derived),
            rows: &derived,
        })?;
    } else {
        render::print_derived(record.test_type, record.tolerance, &derived);
        println!();
    }

    if save_draft {
        DraftStore::open().save(&record)?;
        if !json {
            println!("Saved draft: {} / {}", service_id, test.slug());
        }
    }

    Ok(())
}
