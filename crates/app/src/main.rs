use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use kesef_core::StatementId;
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::{AppState, UploadRequest};

const DEFAULT_OWNER: &str = "local";

#[derive(Parser, Debug)]
#[command(name = "kesef", version, about = "Bank and card statement ingestion")]
struct Cli {
    /// Path to kesef.toml (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store a CSV or PDF statement, register it and process it
    Upload {
        file: PathBuf,

        /// Bank profile name (detected from the file name when omitted)
        #[arg(long)]
        bank: Option<String>,

        #[arg(long, default_value = DEFAULT_OWNER)]
        owner: String,

        /// Currency code (defaults to `default_currency`)
        #[arg(long)]
        currency: Option<String>,
    },

    /// Re-run processing for a registered statement
    Process { id: i64 },

    /// Wait for a statement to finish and print its progress
    Status { id: i64 },

    /// Fail statements stuck in processing past `stale_after_secs`
    Sweep,

    /// Income and expense report over stored transactions
    Summary {
        #[arg(long, default_value = DEFAULT_OWNER)]
        owner: String,

        /// First day included (YYYY-MM-DD)
        #[arg(long)]
        from: Option<NaiveDate>,

        /// Last day included (YYYY-MM-DD)
        #[arg(long)]
        to: Option<NaiveDate>,
    },

    /// List known categories
    Categories,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("serialize output")?;
    println!("{json}");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = config::load_config(cli.config.as_deref())?;
    let state = AppState::open(config).await?;

    match cli.command {
        Command::Upload {
            file,
            bank,
            owner,
            currency,
        } => {
            let report = commands::upload(
                &state,
                UploadRequest {
                    path: file,
                    owner,
                    bank,
                    currency,
                },
            )
            .await?;
            tracing::info!(statement_id = %report.statement_id, status = ?report.progress.status, "upload finished");
            print_json(&report.outcome)?;
            if !report.outcome.is_success() {
                return Ok(ExitCode::FAILURE);
            }
        }

        Command::Process { id } => {
            let outcome = commands::process(&state, StatementId(id)).await;
            print_json(&outcome)?;
            if !outcome.is_success() {
                return Ok(ExitCode::FAILURE);
            }
        }

        Command::Status { id } => {
            let progress = commands::status(&state, StatementId(id)).await?;
            print_json(&progress)?;
        }

        Command::Sweep => {
            let swept = commands::sweep(&state).await?;
            println!("Failed {swept} stale statement(s)");
        }

        Command::Summary { owner, from, to } => {
            let range = commands::summary_range(from, to);
            let summary = commands::summary(&state, &owner, range).await?;
            print_json(&summary)?;
        }

        Command::Categories => {
            let categories = commands::categories(&state).await?;
            print_json(&categories)?;
        }
    }

    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_upload_flags() {
        let cli = Cli::try_parse_from([
            "kesef", "upload", "march.csv", "--bank", "One Zero", "--currency", "eur",
        ])
        .unwrap();
        match cli.command {
            Command::Upload {
                file,
                bank,
                owner,
                currency,
            } => {
                assert_eq!(file, PathBuf::from("march.csv"));
                assert_eq!(bank.as_deref(), Some("One Zero"));
                assert_eq!(owner, DEFAULT_OWNER);
                assert_eq!(currency.as_deref(), Some("eur"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn parses_summary_dates() {
        let cli = Cli::try_parse_from(["kesef", "summary", "--from", "2024-03-01"]).unwrap();
        match cli.command {
            Command::Summary { from, to, .. } => {
                assert_eq!(from, NaiveDate::from_ymd_opt(2024, 3, 1));
                assert_eq!(to, None);
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert!(Cli::try_parse_from(["kesef", "summary", "--from", "March"]).is_err());
    }
}
