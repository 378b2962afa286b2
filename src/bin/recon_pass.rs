//! recon-pass
//!
//! Batch driver over a persistent data directory: ingest connector output,
//! run reconciliation passes and inspect the published tables.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use recondb::storage::persistent::open_store;
use recondb::{EntityType, IngestRequest, IngestSummary, ReconConfig, ReconError, ReconResult, Reconciler};

#[derive(Parser, Debug)]
#[command(name = "recon-pass", version, about = "Identity reconciliation batch driver")]
struct Cli {
    /// Data directory holding the raw journal and table snapshots.
    #[arg(short, long, env = "RECON_DATA_DIR", default_value = "./recon-data")]
    data_dir: PathBuf,

    /// TOML configuration file; built-in rule tables when omitted.
    #[arg(short, long, env = "RECON_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest JSON lines (one request per line, `-` for stdin).
    Ingest {
        input: PathBuf,
    },
    /// Rebuild derived tables; every type plus relationships by default.
    Reconcile {
        #[arg(short, long)]
        entity_type: Option<EntityType>,
    },
    /// Show one consolidated entity and its master record.
    Show {
        entity_type: EntityType,
        natural_key: String,
    },
    /// Show the ranked lab relationships of one computing asset.
    Relationships {
        asset_key: String,
    },
    /// Show the asset summary of one lab.
    Lab {
        lab_key: String,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_env("RECON_LOG").unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> ReconResult<()> {
    let config = match &cli.config {
        Some(path) => ReconConfig::from_file(path)?,
        None => ReconConfig::default(),
    };
    let stores = open_store(&cli.data_dir, Some(config.persistent.clone()))?;
    let recon = Reconciler::with_persistent(&stores, config)?;

    match cli.command {
        Command::Ingest { input } => print(&ingest(&recon, &input)?),
        Command::Reconcile { entity_type: Some(entity_type) } => {
            let pass = recon.reconcile(entity_type)?;
            let relationships = match entity_type {
                EntityType::Lab | EntityType::ComputingAsset => Some(recon.reconcile_relationships()?),
                EntityType::Person | EntityType::Department => None,
            };
            print(&json!({ "pass": pass, "relationships": relationships }))
        }
        Command::Reconcile { entity_type: None } => print(&recon.reconcile_all()?),
        Command::Show {
            entity_type,
            natural_key,
        } => {
            let query = recon.query();
            let entity = query.entity(entity_type, &natural_key)?;
            let master = query.master_for(entity_type, &natural_key)?;
            print(&json!({
                "entity": entity,
                "master": master.as_ref().map(|(m, _)| m),
                "mappings": master.as_ref().map(|(_, mappings)| mappings),
            }))
        }
        Command::Relationships { asset_key } => {
            let query = recon.query();
            print(&json!({
                "summary": query.object_summary(&asset_key)?,
                "relationships": query.relationships_for_object(&asset_key)?,
            }))
        }
        Command::Lab { lab_key } => print(&recon.query().subject_summary(&lab_key)?),
    }
}

fn ingest(recon: &Reconciler, input: &Path) -> ReconResult<IngestSummary> {
    let reader: Box<dyn BufRead> = if input.as_os_str() == "-" {
        Box::new(BufReader::new(io::stdin()))
    } else {
        let file = File::open(input)
            .map_err(|e| ReconError::internal(format!("failed to open {}: {e}", input.display())))?;
        Box::new(BufReader::new(file))
    };

    let mut requests = Vec::new();
    let mut malformed = 0usize;
    for (idx, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| ReconError::internal(format!("failed to read input: {e}")))?;
        if line.trim().is_empty() {
            continue;
        }
        match IngestRequest::from_json_line(&line) {
            Ok(request) => requests.push(request),
            Err(err) => {
                malformed += 1;
                warn!(line = idx + 1, error = %err, "skipping malformed line");
            }
        }
    }

    let mut summary = recon.ingest_all(requests)?;
    summary.rejected += malformed;
    Ok(summary)
}

fn print<T: Serialize>(value: &T) -> ReconResult<()> {
    let out = serde_json::to_string_pretty(value)
        .map_err(|e| ReconError::internal(format!("failed to render output: {e}")))?;
    println!("{out}");
    Ok(())
}
