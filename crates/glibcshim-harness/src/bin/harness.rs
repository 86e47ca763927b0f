//! CLI entrypoint for the glibcshim introspection harness.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use serde::Serialize;

use glibcshim_abi::api::dump_catalog_stats;
use glibcshim_abi::{catalog, context};
use glibcshim_harness::report::timestamp;
use glibcshim_harness::{
    CatalogReport, HarnessError, ImageReport, LoadReport, ModuleReport, Report, ResolveReport,
    SymbolReport, read_image,
};
use glibcshim_runtime::{LogLevel, set_log_level};

/// Introspection tooling for glibcshim.
#[derive(Debug, Parser)]
#[command(name = "glibcshim-harness")]
#[command(about = "Inspect the glibcshim catalog, resolver and loader")]
struct Cli {
    /// Raise the shim's log level to debug for this run.
    #[arg(long, global = true)]
    verbose: bool,
    /// Fixed timestamp string for reproducible reports.
    #[arg(long, global = true)]
    timestamp: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Report wrapper and pass-through counts.
    CatalogStats {
        /// Include every catalog row.
        #[arg(long)]
        entries: bool,
        /// Output JSON path (if omitted, prints to stdout).
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Resolve symbols as foreign code would see them.
    Resolve {
        /// Symbol names.
        #[arg(required = true)]
        names: Vec<String>,
        /// Leave addresses out so reports compare across runs.
        #[arg(long)]
        no_addresses: bool,
        /// Output JSON path (if omitted, prints to stdout).
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Parse a foreign image and report how its imports would bind.
    Inspect {
        /// Path of the shared object.
        path: PathBuf,
        /// Output JSON path (if omitted, prints to stdout).
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Load a foreign image through the shim loader.
    Load {
        /// Path of the shared object.
        path: PathBuf,
        /// Keep the image loaded (report only; the process exits right after).
        #[arg(long)]
        keep: bool,
        /// Output JSON path (if omitted, prints to stdout).
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn emit<T: Serialize>(
    kind: &str,
    fixed_timestamp: Option<String>,
    payload: T,
    output: Option<&Path>,
) -> Result<(), HarnessError> {
    let report = Report::new(kind, timestamp(fixed_timestamp), payload)?;
    let json = report.to_json()?;
    match output {
        Some(path) => {
            std::fs::write(path, json + "\n").map_err(|source| HarnessError::Write {
                path: path.to_path_buf(),
                source,
            })?;
            eprintln!("Wrote {kind} report to {} (sha256 {})", path.display(), report.sha256);
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    if cli.verbose {
        set_log_level(LogLevel::Debug);
    }

    match cli.command {
        Command::CatalogStats { entries, output } => {
            let stats = dump_catalog_stats();
            let payload = CatalogReport::from_catalog(catalog(), stats, entries);
            emit("catalog-stats", cli.timestamp, payload, output.as_deref())?;
        }
        Command::Resolve {
            names,
            no_addresses,
            output,
        } => {
            let symbols: Vec<SymbolReport> = names
                .iter()
                .map(|name| SymbolReport::new(name, context().resolve(name), !no_addresses))
                .collect();
            let payload = ResolveReport::new(symbols);
            let unresolved = payload.unresolved;
            emit("resolve", cli.timestamp, payload, output.as_deref())?;
            if unresolved > 0 {
                return Err(format!("{unresolved} symbol(s) did not resolve").into());
            }
        }
        Command::Inspect { path, output } => {
            let image = read_image(&path)?;
            let payload = ImageReport::new(&path, &image, |name| {
                context().resolve(name).map(|r| r.origin)
            });
            if payload.unresolved > 0 {
                eprintln!(
                    "{}: {} mandatory import(s) are defined nowhere; loading would fail",
                    path.display(),
                    payload.unresolved
                );
            }
            emit("inspect", cli.timestamp, payload, output.as_deref())?;
        }
        Command::Load { path, keep, output } => {
            let handle = context().load(&path).map_err(HarnessError::from)?;
            let modules: Vec<ModuleReport> = context()
                .enumerate_loaded()
                .iter()
                .map(ModuleReport::from)
                .collect();
            if !keep {
                context().unload(handle).map_err(HarnessError::from)?;
            }
            let payload = LoadReport {
                path: path.display().to_string(),
                handle: format!("{handle:#x}"),
                modules,
                unloaded: !keep,
            };
            emit("load", cli.timestamp, payload, output.as_deref())?;
        }
    }
    Ok(())
}
