//! lookup-table: build and query the layered parity table.
//!
//! Usage:
//!   lookup-table build --config table.toml          # build ./lookup_table
//!   lookup-table query --table lookup_table 3 42    # prints odd / even
//!   lookup-table inspect --table lookup_table       # layer summary (JSON)

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use lookup_table::builder::{LeafSeed, TableBuilder};
use lookup_table::config::BuildConfig;
use lookup_table::lookup::LookupTable;
use lookup_table::storage::table_file;

#[derive(Parser)]
#[command(name = "lookup-table", about = "Layered compressed parity lookup table", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build the table and write it to disk.
    Build {
        /// Path to the TOML build configuration. Defaults apply when omitted.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Override the configured output path.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Report whether each number is odd or even.
    Query {
        #[arg(short, long, default_value = "lookup_table")]
        table: PathBuf,
        /// Log the path taken through every layer.
        #[arg(short, long)]
        verbose: bool,
        #[arg(required = true)]
        numbers: Vec<u64>,
    },
    /// Print the layer structure of a built table as JSON.
    Inspect {
        #[arg(short, long, default_value = "lookup_table")]
        table: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Command::Query { verbose: true, .. } => "debug",
        _ => "info",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let result = match cli.command {
        Command::Build { config, output } => run_build(config, output).await,
        Command::Query { table, numbers, .. } => run_query(table, &numbers),
        Command::Inspect { table } => run_inspect(table),
    };

    if let Err(e) = result {
        error!(error = %format!("{e:#}"), "Command failed");
        std::process::exit(1);
    }
}

async fn run_build(config: Option<PathBuf>, output: Option<PathBuf>) -> anyhow::Result<()> {
    let mut cfg = match config {
        Some(path) => BuildConfig::from_file(&path)
            .with_context(|| format!("loading config {path:?}"))?,
        None => BuildConfig::default(),
    };
    if let Some(output) = output {
        cfg.output = output;
    }

    info!(
        widths = ?cfg.widths,
        address_bits = cfg.address_bits,
        work_dir = ?cfg.work_dir,
        output = ?cfg.output,
        "Starting table build"
    );

    let builder = TableBuilder::from_config(&cfg).context("preparing builder")?;
    let seed = LeafSeed::parity(builder.plan().leaf_bits()).context("building leaf seed")?;
    let root = builder.build(seed).await.context("building lookup table")?;
    table_file::save_table(&root, &cfg.output).context("writing lookup table")?;
    Ok(())
}

fn run_query(table: PathBuf, numbers: &[u64]) -> anyhow::Result<()> {
    let table = LookupTable::open(&table).with_context(|| format!("loading table {table:?}"))?;
    for &num in numbers {
        let odd = table.is_odd(num).with_context(|| format!("looking up {num}"))?;
        println!("{}", if odd { "odd" } else { "even" });
    }
    Ok(())
}

fn run_inspect(table: PathBuf) -> anyhow::Result<()> {
    let table = LookupTable::open(&table).with_context(|| format!("loading table {table:?}"))?;
    let layers = table.summary().context("walking table layers")?;
    println!("{}", serde_json::to_string_pretty(&layers)?);
    Ok(())
}
