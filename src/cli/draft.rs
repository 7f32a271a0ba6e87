//! Draft command - manage locally saved drafts.

use anyhow::Result;
use std::path::Path;

use crate::cli::render::{self, DerivedOutput};
use crate::cli::{load_config, DraftAction};
use crate::drafts::DraftStore;
use crate::ingest;
use crate::metrics::VerdictSummary;

/// Run the draft command.
pub async fn run(config_path: Option<&Path>, action: DraftAction) -> Result<()> {
    let store = DraftStore::open();

    match action {
        DraftAction::List { service } => {
            let drafts = store.list(service.as_deref())?;

            println!();
            if drafts.is_empty() {
                println!("No drafts in {}", store.root().display());
                println!();
                return Ok(());
            }

            println!("{:<20} {:<34} {:>5}  SAVED", "SERVICE", "TEST", "ROWS");
            println!("{}", "-".repeat(80));
            for draft in drafts {
                println!(
                    "{:<20} {:<34} {:>5}  {}",
                    draft.service_id,
                    draft.test_type.slug(),
                    draft.rows,
                    draft.saved_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
            println!();
        }
        DraftAction::Show {
            service,
            test,
            json,
        } => {
            let config = load_config(config_path)?;
            let Some(record) = store.load(&service, test)? else {
                anyhow::bail!("No draft for {} / {}", service, test.slug());
            };

            let derived = ingest::derive_record(&config, &record);
            if json {
                render::print_json(&DerivedOutput {
                    test_type: record.test_type,
                    tolerance: record.tolerance,
                    summary: VerdictSummary::from_rows(&derived),
                    rows: &derived,
                })?;
            } else {
                if let Some(ref source) = record.source {
                    println!();
                    println!(
                        "Source: {} ({}, sha256 {})",
                        source.file_name,
                        source.format,
                        source.sha256.get(..12).unwrap_or(&source.sha256)
                    );
                }
                render::print_derived(record.test_type, record.tolerance, &derived);
                println!();
            }
        }
        DraftAction::Discard { service, test } => {
            if store.discard(&service, test)? {
                println!("Discarded draft {} / {}", service, test.slug());
            } else {
                println!("No draft for {} / {}", service, test.slug());
            }
        }
    }

    Ok(())
}
