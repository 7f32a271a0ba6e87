//! QA Ingest
//!
//! Reads radiology QA test sheets (delimited text or spreadsheet workbooks),
//! extracts the measurement rows of each recognized test section, computes
//! derived metrics with pass/fail verdicts, and persists test records to the
//! backend through a local outbox.

use anyhow::Result;
use clap::Parser;
use tracing::{debug, info};

mod cli;
mod config;
mod drafts;
mod error;
mod ingest;
mod metrics;
mod parser;
mod reader;
mod schema;
mod spool;
mod types;
mod uploader;

use cli::{Cli, Command};

fn main() {
    if let Err(e) = real_main() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

#[tokio::main]
async fn real_main() -> Result<()> {
    let cli = Cli::parse();

    // An unreadable config is reported by the command itself
    let configured = cli::load_config(cli.config_path.as_deref())
        .ok()
        .map(|config| config.agent.log_level);
    let level = cli.effective_log_level(configured.as_deref());

    // Persistence commands keep a JSON log trail; everything else logs to the console
    let _guard = match &cli.command {
        Command::Submit { .. } | Command::Outbox { .. } => init_file_logging(&level)?,
        _ => init_console_logging(&level)?,
    };

    debug!(version = env!("CARGO_PKG_VERSION"), "qaingest starting");

    let config_path = cli.config_path.as_deref();

    match cli.command {
        Command::Parse { path, args } => cli::inspect::parse(config_path, &path, args).await,
        Command::Compute {
            path,
            test,
            draft,
            args,
        } => cli::inspect::compute(config_path, &path, test, draft, args).await,
        Command::Fetch {
            url,
            timeout,
            test,
            draft,
            args,
        } => cli::inspect::fetch(config_path, &url, timeout, test, draft, args).await,
        Command::Submit {
            service,
            test,
            file,
            format,
        } => {
            info!(service_id = %service, "Submitting records");
            cli::submit::submit(config_path, &service, test, file, format).await
        }
        Command::Pull {
            service,
            test,
            save_draft,
            json,
        } => cli::submit::pull(config_path, &service, test, save_draft, json).await,
        Command::Draft { action } => cli::draft::run(config_path, action).await,
        Command::Outbox { action } => cli::outbox::run(config_path, action).await,
        Command::Schema { action } => cli::schema::run(action).await,
        Command::Config { action } => cli::config::run(config_path, action).await,
        Command::Version => {
            println!("qaingest {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_console_logging(level: &str) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    // Logs go to stderr so `--json` output on stdout stays parseable
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .init();

    Ok(None)
}

fn init_file_logging(level: &str) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let log_dir = config::paths::log_dir()?;

    let file_appender = tracing_appender::rolling::Builder::new()
        .rotation(tracing_appender::rolling::Rotation::DAILY)
        .filename_prefix("qaingest")
        .filename_suffix("log")
        .max_log_files(10)
        .build(&log_dir)?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_ansi(false)
                .json()
                .with_writer(non_blocking),
        )
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr.with_max_level(tracing::Level::WARN)),
        )
        .init();

    Ok(Some(guard))
}
