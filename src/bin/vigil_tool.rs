use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use vigil::storage::{DurabilityMode, PersistenceManager, RecoveredState, recover_dir};

#[derive(Parser)]
#[command(name = "vigil-tool")]
#[command(about = "Offline tooling for a vigil data directory")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Summarize snapshot + journal without modifying them
    Inspect {
        #[arg(long, env = "VIGIL_DATA_DIR")]
        data_dir: PathBuf,
        /// Print one line per owner
        #[arg(long)]
        owners: bool,
    },
    /// Fold the journal into a fresh snapshot and truncate it
    Compact {
        #[arg(long, env = "VIGIL_DATA_DIR")]
        data_dir: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Inspect { data_dir, owners } => inspect(&data_dir, owners),
        Command::Compact { data_dir } => compact(&data_dir),
    }
}

fn ensure_dir(data_dir: &Path) -> Result<()> {
    if !data_dir.is_dir() {
        bail!("{} is not a directory", data_dir.display());
    }
    Ok(())
}

fn inspect(data_dir: &Path, owners: bool) -> Result<()> {
    ensure_dir(data_dir)?;
    let (metadata, state) = recover_dir(data_dir)
        .with_context(|| format!("failed to read {}", data_dir.display()))?;

    match metadata {
        Some(meta) => println!(
            "snapshot: {} records, {} trustees, {} beneficiaries (taken {})",
            meta.record_count,
            meta.trustee_count,
            meta.beneficiary_count,
            meta.created_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "unknown".to_string())
        ),
        None => println!("snapshot: none"),
    }
    println!("journal: {} entries replayed", state.replayed_entries);
    print_summary(&state);

    if owners {
        let mut records: Vec<_> = state.records.values().collect();
        records.sort_by(|a, b| a.user_id().cmp(b.user_id()));
        for record in records {
            println!(
                "  {:<24} {:<22} last_active={} deadline={}",
                record.user_id().as_str(),
                record.state().as_str(),
                record.last_active_at().to_rfc3339(),
                record.deadline().to_rfc3339()
            );
        }
    }
    Ok(())
}

fn print_summary(state: &RecoveredState) {
    let mut by_state: BTreeMap<&str, usize> = BTreeMap::new();
    for record in state.records.values() {
        *by_state.entry(record.state().as_str()).or_default() += 1;
    }
    println!("owners: {}", state.records.len());
    for (name, count) in by_state {
        println!("  {name}: {count}");
    }
    println!("trustees: {}", state.trustees.len());
    println!("beneficiaries: {}", state.beneficiaries.len());
}

fn compact(data_dir: &Path) -> Result<()> {
    ensure_dir(data_dir)?;
    let mut manager = PersistenceManager::new(data_dir, DurabilityMode::Sync)
        .with_context(|| format!("failed to open {}", data_dir.display()))?;
    let state = manager.recover().context("failed to recover state")?;
    let replayed = state.replayed_entries;
    let snapshot = state.into_snapshot(Utc::now());
    manager
        .checkpoint(&snapshot)
        .context("failed to write snapshot")?;
    println!(
        "compacted {} journal entries into a snapshot of {} records",
        replayed, snapshot.metadata.record_count
    );
    Ok(())
}
