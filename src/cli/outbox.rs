//! Outbox command - inspect and resend queued records.

use anyhow::Result;
use std::path::Path;

use crate::cli::{load_config, OutboxAction};
use crate::spool::Spool;
use crate::uploader::Uploader;

/// Run the outbox command.
pub async fn run(config_path: Option<&Path>, action: OutboxAction) -> Result<()> {
    let config = load_config(config_path)?;
    let spool = Spool::new(&config.spool)?;

    match action {
        OutboxAction::Status => {
            let status = spool.status()?;

            println!();
            println!("Outbox");
            println!("======");
            println!("Pending: {} ({} KB)", status.pending, status.pending_bytes / 1024);
            println!("Uploading: {}", status.uploading);
            println!("Failed: {}", status.failed);
            println!("Completed (retained): {}", status.completed);

            let failed = spool.get_failed()?;
            if !failed.is_empty() {
                println!();
                println!("Failed records");
                println!("--------------");
                for path in failed {
                    match spool.read_entry(&path) {
                        Ok(entry) => println!(
                            "  {} / {}  queued {}",
                            entry.record.service_id,
                            entry.record.test_type.slug(),
                            entry.spooled_at.format("%Y-%m-%d %H:%M:%S")
                        ),
                        Err(e) => println!("  {} (unreadable: {})", path.display(), e),
                    }
                }
                println!();
                println!("Run 'qaingest outbox retry' to resend them.");
            }
            println!();
        }
        OutboxAction::Retry => {
            let requeued = spool.requeue_failed()?;
            let uploader = Uploader::new(&config.backend, spool)?;
            let summary = uploader.flush().await?;

            println!();
            println!("Requeued failed records: {}", requeued);
            println!("Saved: {}", summary.saved);
            println!("Failed: {}", summary.failed);

            let status = uploader.spool().status()?;
            if status.failed > 0 {
                println!("Kept in outbox: {}", status.failed);
            }
            println!();

            if summary.failed > 0 {
                anyhow::bail!("{} record(s) still not saved", summary.failed);
            }
        }
    }

    Ok(())
}
