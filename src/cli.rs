use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::commands::convert_properties::{self, ConvertPropertiesOptions};
use crate::commands::inspect::{self, InspectOptions};
use crate::commands::migrate::{self, MigrateOptions};
use crate::commands::CommandReport;
use crate::logging;

const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (build ", env!("BUILD_UUID"), ")");

#[derive(Debug, Parser)]
#[command(
    name = "biomaj-migrate",
    version = VERSION,
    about = "Migrate legacy BioMAJ bank metadata into per-bank documents"
)]
struct Cli {
    /// Print the report as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct ConfigArgs {
    /// Target global.properties.
    #[arg(short = 'c', long = "config")]
    config: PathBuf,

    /// Legacy global.properties.
    #[arg(short = 'o', long = "oldconfig")]
    oldconfig: PathBuf,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Convert bank properties, then import every legacy bank.
    Migrate {
        #[command(flatten)]
        paths: ConfigArgs,

        /// Keep removed productions as history.
        #[arg(short = 'H', long = "keep-history", alias = "keep_history")]
        keep_history: bool,

        /// SQLite export of the legacy database; overrides database.url.
        #[arg(long = "legacy-db")]
        legacy_db: Option<PathBuf>,

        /// Only migrate this bank. Repeatable.
        #[arg(long = "bank")]
        banks: Vec<String>,

        #[arg(long)]
        dry_run: bool,

        #[arg(long)]
        skip_properties: bool,
    },
    /// Only convert legacy bank properties.
    ConvertProperties {
        #[command(flatten)]
        paths: ConfigArgs,

        #[arg(long)]
        dry_run: bool,
    },
    /// Describe the legacy database without writing anything.
    Inspect {
        #[arg(short = 'o', long = "oldconfig")]
        oldconfig: Option<PathBuf>,

        #[arg(long = "legacy-db")]
        legacy_db: Option<PathBuf>,
    },
}

fn render(report: &CommandReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    let status = if report.ok { "ok" } else { "issues" };
    println!("{}: {status}", report.command);
    for detail in &report.details {
        println!("  {detail}");
    }
    for issue in &report.issues {
        println!("  ! {issue}");
    }
    Ok(())
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    logging::init();

    let report = match cli.command {
        Command::Migrate {
            paths,
            keep_history,
            legacy_db,
            banks,
            dry_run,
            skip_properties,
        } => migrate::run(&MigrateOptions {
            config: paths.config,
            oldconfig: paths.oldconfig,
            keep_history,
            legacy_db,
            banks,
            dry_run,
            skip_properties,
        })?,
        Command::ConvertProperties { paths, dry_run } => {
            convert_properties::run(&ConvertPropertiesOptions {
                config: paths.config,
                oldconfig: paths.oldconfig,
                dry_run,
            })?
        }
        Command::Inspect {
            oldconfig,
            legacy_db,
        } => inspect::run(&InspectOptions {
            oldconfig,
            legacy_db,
        })?,
    };
    render(&report, cli.json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn migrate_accepts_repeated_banks() {
        let cli = Cli::try_parse_from([
            "biomaj-migrate",
            "migrate",
            "-c",
            "/new/global.properties",
            "-o",
            "/old/global.properties",
            "-H",
            "--bank",
            "ecoli",
            "--bank",
            "alu",
            "--json",
        ])
        .expect("parse");
        assert!(cli.json);
        match cli.command {
            Command::Migrate {
                keep_history,
                banks,
                ..
            } => {
                assert!(keep_history);
                assert_eq!(banks, vec!["ecoli".to_string(), "alu".to_string()]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
