//! stable-compare CLI - prod/stage parity checks for stable tables.

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use stable_compare::{
    Comparator, CompareError, ComparisonReport, Config, MemoryWarehouse, TableComparison,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "stable-compare")]
#[command(about = "Compare prod and stage copies of stable tables for one partition")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file (defaults apply when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    /// Read tables from a JSON fixture file instead of the warehouse API
    #[arg(long)]
    fixture: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare every matching table for one partition date
    Compare {
        /// Partition date (YYYY-MM-DD)
        #[arg(long)]
        date: NaiveDate,

        /// Only estimate bytes for content queries
        #[arg(long)]
        dry_run: bool,

        /// Override number of concurrent table checks
        #[arg(long)]
        parallelism: Option<usize>,

        /// Override the table filter (regex over project.dataset.table)
        #[arg(long)]
        filter: Option<String>,
    },

    /// List the prod -> stage table pairs that would be compared
    ListTables {
        /// Override the table filter (regex over project.dataset.table)
        #[arg(long)]
        filter: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<u8, CompareError> {
    let cli = Cli::parse();

    // Logging is configured once, before any worker starts
    setup_logging(&cli.verbosity, &cli.log_format);

    let mut config = match &cli.config {
        Some(path) => {
            let config = Config::load(path)?;
            info!("Loaded configuration from {:?}", path);
            config
        }
        None => Config::default(),
    };

    match cli.command {
        Commands::Compare {
            date,
            dry_run,
            parallelism,
            filter,
        } => {
            if dry_run {
                config.comparison.dry_run = true;
            }
            if let Some(p) = parallelism {
                config.comparison.parallelism = p;
            }
            if filter.is_some() {
                config.comparison.filter = filter;
            }
            config.validate()?;

            let comparator = build_comparator(config, cli.fixture.as_ref())?;
            let report = comparator.run(date).await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_summary(&report);
            }
            Ok(report.exit_code())
        }
        Commands::ListTables { filter } => {
            if filter.is_some() {
                config.comparison.filter = filter;
            }
            config.validate()?;

            let comparator = build_comparator(config, cli.fixture.as_ref())?;
            let pairs = comparator.list_pairs().await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&pairs)?);
            } else {
                for pair in &pairs {
                    println!("{}", pair);
                }
            }
            Ok(0)
        }
    }
}

fn build_comparator(config: Config, fixture: Option<&PathBuf>) -> Result<Comparator, CompareError> {
    match fixture {
        Some(path) => {
            let warehouse = MemoryWarehouse::load_fixture(path)?;
            info!("Loaded fixture tables from {:?}", path);
            Ok(Comparator::with_warehouse(config, Arc::new(warehouse)))
        }
        None => Comparator::new(config),
    }
}

fn print_summary(report: &ComparisonReport) {
    println!("\nComparison {}", report.run_id);
    println!("=================================");
    println!("Partition:    {}", report.partition_date);
    println!("Dry run:      {}", report.dry_run);
    println!("Duration:     {:.1}s", report.duration_seconds);
    println!("Tables:       {}", report.tables_total);
    println!("In sync:      {}", report.tables_in_sync);
    println!("Differences:  {}", report.tables_with_differences);
    println!("Failed:       {}", report.tables_failed);

    let problems: Vec<&TableComparison> =
        report.tables.iter().filter(|t| !t.is_in_sync()).collect();
    if !problems.is_empty() {
        println!("\nTables with problems:");
        for table in problems {
            match (&table.error, &table.content_diff) {
                (Some(error), _) => println!("  - {}: {}", table.table, error),
                (None, Some(diff)) => println!(
                    "  - {}: {} rows differ ({} missing in stage, {} missing in prod, {} changed)",
                    table.table,
                    diff.mismatch_count(),
                    diff.missing_in_stage,
                    diff.missing_in_prod,
                    diff.content_mismatches
                ),
                (None, None) => println!("  - {}", table.table),
            }
        }
    }
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
