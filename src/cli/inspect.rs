//! Parse, compute and fetch commands.

use anyhow::{Context, Result};
use std::path::Path;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::cli::render::{self, DerivedOutput};
use crate::cli::{load_config, ParseArgs};
use crate::config::Config;
use crate::drafts::DraftStore;
use crate::error::IngestError;
use crate::ingest::{self, IngestResult, Ingestor};
use crate::metrics::VerdictSummary;
use crate::parser::ParseOptions;
use crate::reader::fetch::Fetcher;
use crate::types::TestType;

fn ingestor(config: &Config, args: &ParseArgs) -> Ingestor {
    Ingestor::with_options(ParseOptions {
        strict: args.strict || config.ingest.strict,
    })
}

/// Run the parse command.
pub async fn parse(config_path: Option<&Path>, path: &Path, args: ParseArgs) -> Result<()> {
    let config = load_config(config_path)?;
    let result = ingestor(&config, &args)
        .ingest_path(path, args.format.as_deref())
        .with_context(|| format!("Failed to parse {}", path.display()))?;

    if args.json {
        return render::print_json(&result.report);
    }

    render::print_report(&result.report);
    for (test, rows) in &result.groups {
        println!("{}: {} rows", test.title(), rows.len());
    }
    println!();
    Ok(())
}

/// Run the compute command.
pub async fn compute(
    config_path: Option<&Path>,
    path: &Path,
    test: Option<TestType>,
    draft: Option<String>,
    args: ParseArgs,
) -> Result<()> {
    let config = load_config(config_path)?;
    let result = ingestor(&config, &args)
        .ingest_path(path, args.format.as_deref())
        .with_context(|| format!("Failed to parse {}", path.display()))?;

    show_derived(&config, &result, test, args.json)?;
    if let Some(service_id) = draft {
        save_drafts(&config, &result, test, &service_id)?;
    }
    Ok(())
}

/// Run the fetch command. Ctrl-C cancels an in-flight download.
pub async fn fetch(
    config_path: Option<&Path>,
    url: &str,
    timeout: Option<u64>,
    test: Option<TestType>,
    draft: Option<String>,
    args: ParseArgs,
) -> Result<()> {
    let config = load_config(config_path)?;
    let mut fetcher = Fetcher::new(&config.backend)?;
    if let Some(secs) = timeout {
        fetcher = fetcher.with_timeout(Duration::from_secs(secs));
    }

    let (cancel_tx, cancel_rx) = oneshot::channel();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling fetch");
            let _ = cancel_tx.send(());
        }
    });

    let result = ingestor(&config, &args)
        .ingest_url(&fetcher, url, args.format.as_deref(), cancel_rx)
        .await;
    ctrl_c.abort();

    if let Err(IngestError::Fetch(ref e)) = result {
        if e.is_retryable() {
            println!("Fetch failed ({}); the file may be reachable if you try again.", e);
        }
    }
    let result = result.with_context(|| format!("Failed to ingest {}", url))?;

    show_derived(&config, &result, test, args.json)?;
    if let Some(service_id) = draft {
        save_drafts(&config, &result, test, &service_id)?;
    }
    Ok(())
}

fn selected_tests(result: &IngestResult, test: Option<TestType>) -> Vec<TestType> {
    match test {
        Some(test) => vec![test],
        None => result.groups.keys().copied().collect(),
    }
}

fn show_derived(
    config: &Config,
    result: &IngestResult,
    test: Option<TestType>,
    json: bool,
) -> Result<()> {
    let tests = selected_tests(result, test);

    let derived: Vec<_> = tests
        .iter()
        .map(|t| (*t, ingest::derive(config, *t, result.rows(*t))))
        .collect();

    if json {
        let output: Vec<DerivedOutput> = derived
            .iter()
            .map(|(t, rows)| DerivedOutput {
                test_type: *t,
                tolerance: config.tolerance_for(*t),
                summary: VerdictSummary::from_rows(rows),
                rows,
            })
            .collect();
        return render::print_json(&output);
    }

    if derived.is_empty() {
        println!();
        println!("No recognized test sections in {}", result.source.file_name);
        println!();
        return Ok(());
    }

    for (t, rows) in &derived {
        render::print_derived(*t, config.tolerance_for(*t), rows);
    }
    println!();
    Ok(())
}

fn save_drafts(
    config: &Config,
    result: &IngestResult,
    test: Option<TestType>,
    service_id: &str,
) -> Result<()> {
    let store = DraftStore::open();

    for t in selected_tests(result, test) {
        if result.rows(t).is_empty() {
            continue;
        }
        let record = result.record(service_id, t, config.tolerance_for(t));
        let path = store.save(&record)?;
        info!(path = %path.display(), "Draft written");
        println!("Saved draft: {} / {}", service_id, t.slug());
    }

    Ok(())
}
