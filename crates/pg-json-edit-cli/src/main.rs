//! pg-json-edit CLI - edit a live PostgreSQL database as a JSON document.

use clap::{Parser, Subcommand};
use pg_json_edit::{Change, ConnectOptions, DumpOptions, PgDriver, SyncEngine, SyncError};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::Level;

#[derive(Parser)]
#[command(name = "pg-json-edit")]
#[command(about = "Edit a live PostgreSQL database as a JSON document")]
#[command(version)]
struct Cli {
    /// PostgreSQL connection string or URL
    #[arg(long, env = "DATABASE_URL")]
    url: String,

    /// Schema namespace to operate on
    #[arg(long, default_value = "public")]
    db_schema: String,

    /// TLS mode: disable, require, verify-ca, verify-full
    #[arg(long, default_value = "disable")]
    ssl_mode: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "warn")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Dump the database to a JSON document (nested by default)
    Dump {
        /// Destination file
        output: PathBuf,

        /// Maximum rows per table (the base snapshot is always complete)
        #[arg(long)]
        limit: Option<u64>,

        /// Maximum rows per nested child sequence
        #[arg(long)]
        nested_limit: Option<usize>,

        /// Write the flat layout instead of the nested one
        #[arg(long)]
        flat: bool,

        /// Skip the base snapshot and JSON-schema companion files
        #[arg(long)]
        no_base: bool,
    },

    /// Show the changes a sync would apply, without touching the database
    Preview {
        /// Edited document
        file: PathBuf,
    },

    /// Apply edits as a three-way merge against the base snapshot
    Sync {
        /// Edited document
        file: PathBuf,
    },

    /// Make the database match the file exactly (deletes unmentioned rows)
    Reset {
        /// Edited document
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), SyncError> {
    let cli = Cli::parse();
    setup_logging(&cli.verbosity)?;

    let options = ConnectOptions::new(&cli.url).with_ssl_mode(&cli.ssl_mode);
    let driver = Arc::new(PgDriver::connect(&options).await?);
    let engine = SyncEngine::new(driver).with_namespace(&cli.db_schema);

    match cli.command {
        Commands::Dump {
            output,
            limit,
            nested_limit,
            flat,
            no_base,
        } => {
            let mut dump_options = DumpOptions::new(output);
            dump_options.limit = limit;
            dump_options.nested_limit = nested_limit;
            dump_options.flat = flat;
            dump_options.no_base = no_base;

            let report = engine.dump(&dump_options).await?;
            println!(
                "Dumped {} rows across {} tables to {}",
                report.rows,
                report.tables,
                report.path.display()
            );
            for (table, skipped) in &report.truncated {
                println!("  {} truncated ({} rows skipped)", table, skipped);
            }
            if let Some(base) = &report.base_path {
                println!("Base snapshot: {}", base.display());
            }
        }
        Commands::Preview { file } => {
            let changes = engine.preview(&file).await?;
            if changes.is_empty() {
                println!("No changes.");
            } else {
                for change in &changes {
                    println!("{}", describe(change));
                }
                println!("{} changes total.", changes.len());
            }
        }
        Commands::Sync { file } => {
            let report = engine.sync(&file).await?;
            println!(
                "Applied {} changes ({} inserts, {} updates, {} deletes).",
                report.total(),
                report.inserts,
                report.updates,
                report.deletes
            );
        }
        Commands::Reset { file } => {
            let report = engine.reset(&file).await?;
            println!(
                "Reset applied {} changes ({} inserts, {} updates, {} deletes).",
                report.total(),
                report.inserts,
                report.updates,
                report.deletes
            );
        }
    }

    Ok(())
}

/// One human-readable line per change.
fn describe(change: &Change) -> String {
    match change {
        Change::Insert { table, row } => {
            format!("+ {} {}", table, compact(row))
        }
        Change::Update {
            table,
            primary_key,
            new_values,
            ..
        } => {
            let columns: Vec<&str> = new_values.keys().map(String::as_str).collect();
            format!("~ {} {}: {}", table, compact(primary_key), columns.join(", "))
        }
        Change::Delete {
            table, primary_key, ..
        } => {
            format!("- {} {}", table, compact(primary_key))
        }
    }
}

fn compact(row: &pg_json_edit::FlatRow) -> String {
    let object: serde_json::Map<String, serde_json::Value> =
        row.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    serde_json::to_string(&object).unwrap_or_else(|_| "{}".to_string())
}

fn setup_logging(verbosity: &str) -> Result<(), SyncError> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        other => {
            return Err(SyncError::Config(format!(
                "Invalid verbosity '{}'. Valid options: debug, info, warn, error",
                other
            )));
        }
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}
