//! CLI command definitions and handlers.

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::types::TestType;

pub mod config;
pub mod draft;
pub mod inspect;
pub mod outbox;
pub mod render;
pub mod schema;
pub mod submit;

/// QA Ingest - parse radiology QA test sheets and compute derived metrics.
#[derive(Parser, Debug)]
#[command(name = "qaingest")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Log level [default: agent.log_level from config, else info]
    #[arg(long, env = "QAINGEST_LOG_LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Path to config file
    #[arg(long = "config", env = "QAINGEST_CONFIG")]
    pub config_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Level from `--log-level` when given, else the configured one, else info.
    pub fn effective_log_level(&self, configured: Option<&str>) -> String {
        match (&self.log_level, configured) {
            (Some(level), _) => level.as_str().to_string(),
            (None, Some(level)) => level.to_lowercase(),
            (None, None) => LogLevel::Info.as_str().to_string(),
        }
    }
}

#[derive(Debug, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Options shared by commands that parse a file.
#[derive(Args, Debug, Clone)]
pub struct ParseArgs {
    /// Override the format hint (csv, tsv, xlsx, or a MIME type)
    #[arg(long)]
    pub format: Option<String>,

    /// Fail on unrecognized sections and unmapped columns
    #[arg(long)]
    pub strict: bool,

    /// Print JSON instead of tables
    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Parse a file and show the sections and fields found
    Parse {
        /// Path to a CSV/TSV file or spreadsheet workbook
        path: PathBuf,

        #[command(flatten)]
        args: ParseArgs,
    },

    /// Parse a file and compute derived metrics and verdicts
    Compute {
        /// Path to a CSV/TSV file or spreadsheet workbook
        path: PathBuf,

        /// Only this test type
        #[arg(long)]
        test: Option<TestType>,

        /// Save the parsed rows as drafts for this service
        #[arg(long, value_name = "SERVICE_ID")]
        draft: Option<String>,

        #[command(flatten)]
        args: ParseArgs,
    },

    /// Fetch an attached file through the backend proxy and compute it
    Fetch {
        /// File URL
        url: String,

        /// Give up after this many seconds (default: backend.fetch_timeout_seconds)
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,

        /// Only this test type
        #[arg(long)]
        test: Option<TestType>,

        /// Save the parsed rows as drafts for this service
        #[arg(long, value_name = "SERVICE_ID")]
        draft: Option<String>,

        #[command(flatten)]
        args: ParseArgs,
    },

    /// Save test records to the backend (from a file, or from drafts)
    Submit {
        /// Service the records belong to
        #[arg(long)]
        service: String,

        /// Only this test type
        #[arg(long)]
        test: Option<TestType>,

        /// Parse this file instead of using saved drafts
        #[arg(long)]
        file: Option<PathBuf>,

        /// Override the format hint for --file
        #[arg(long)]
        format: Option<String>,
    },

    /// Load a stored record from the backend and recompute it
    Pull {
        #[arg(long)]
        service: String,

        #[arg(long)]
        test: TestType,

        /// Also keep it as a local draft
        #[arg(long)]
        save_draft: bool,

        #[arg(long)]
        json: bool,
    },

    /// Manage local drafts
    Draft {
        #[command(subcommand)]
        action: DraftAction,
    },

    /// Inspect and retry the persistence outbox
    Outbox {
        #[command(subcommand)]
        action: OutboxAction,
    },

    /// Show test schemas
    Schema {
        #[command(subcommand)]
        action: SchemaAction,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand, Debug)]
pub enum DraftAction {
    /// List drafts
    List {
        /// Filter by service ID
        #[arg(long)]
        service: Option<String>,
    },

    /// Show a draft with recomputed values
    Show {
        #[arg(long)]
        service: String,

        #[arg(long)]
        test: TestType,

        #[arg(long)]
        json: bool,
    },

    /// Delete a draft
    Discard {
        #[arg(long)]
        service: String,

        #[arg(long)]
        test: TestType,
    },
}

#[derive(Subcommand, Debug)]
pub enum OutboxAction {
    /// Show outbox counts and failed records
    Status,

    /// Move failed records back to pending and send everything pending
    Retry,
}

#[derive(Subcommand, Debug)]
pub enum SchemaAction {
    /// List test types with their section markers
    List,

    /// Show fields, formula and default tolerance of a test type
    Show {
        test: TestType,
    },

    /// Show which field a header or label maps to (exact, case-sensitive)
    Resolve {
        test: TestType,

        /// Header or label text as it appears in the sheet
        text: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Validate configuration file
    Validate,

    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,
}

/// Load config from `--config` when given, else the standard location.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_flag_wins_over_config() {
        let cli = Cli::try_parse_from(["qaingest", "--log-level", "debug", "version"]).unwrap();
        assert_eq!(cli.effective_log_level(Some("warn")), "debug");
    }

    #[test]
    fn test_log_level_falls_back_to_config_then_info() {
        let mut cli = Cli::try_parse_from(["qaingest", "version"]).unwrap();
        cli.log_level = None;
        assert_eq!(cli.effective_log_level(Some("WARN")), "warn");
        assert_eq!(cli.effective_log_level(None), "info");
    }

    #[test]
    fn test_schema_resolve_parses_test_and_text() {
        let cli = Cli::try_parse_from([
            "qaingest",
            "schema",
            "resolve",
            "linearity_of_ma_loading",
            "mA Station",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Command::Schema {
                action: SchemaAction::Resolve { test: TestType::LinearityOfMaLoading, ref text }
            } if text == "mA Station"
        ));
    }
}
