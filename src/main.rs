//! CLI entry point for fxi-export
//!
//! Exports runs from an on-disk catalog into HDF5/TIFF archives.
//!
//! # Usage
//!
//! Export a run by scan id, uid prefix or negative offset:
//! ```bash
//! fxi-export export 123456
//! fxi-export export -2 --output-dir /data/users/export
//! ```
//!
//! Export the most recent run (the entry point of scheduled jobs):
//! ```bash
//! fxi-export latest
//! ```
//!
//! Inspect the catalog and the effective configuration:
//! ```bash
//! fxi-export list --limit 10
//! fxi-export show-config --binning 2
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use fxi_export::catalog::{Catalog, DirectoryCatalog, ScanRef, StartDoc};
use fxi_export::config::{Overrides, Settings};
use fxi_export::export::{export_single_scan, ScanType};
use fxi_export::logging;
use fxi_export::storage::ArchiveRegistry;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "fxi-export")]
#[command(about = "Export FXI beamline scans to HDF5 and TIFF archives", long_about = None)]
struct Cli {
    /// Configuration file (default: ./fxi_export.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Catalog root directory
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    /// Directory receiving exported files
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    /// Mosaic binning factor for raster scans
    #[arg(long, global = true)]
    binning: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Row range kept in exposure-time tiles, as `start:end`
    #[arg(long, global = true, value_parser = parse_range)]
    crop_rows: Option<[usize; 2]>,

    /// Column range kept in exposure-time tiles, as `start:end`
    #[arg(long, global = true, value_parser = parse_range)]
    crop_cols: Option<[usize; 2]>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export one run
    Export {
        /// Scan id, uid prefix, or negative offset (-1 is the latest run)
        #[arg(allow_hyphen_values = true)]
        scan: String,
    },

    /// Export the most recent run
    Latest,

    /// List recent runs in the catalog
    List {
        /// Number of runs to show
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Print the effective configuration as TOML
    ShowConfig,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            catalog_root: self.catalog.clone(),
            output_dir: self.output_dir.clone(),
            binning: self.binning,
            log_level: self.log_level.clone(),
            crop_rows: self.crop_rows,
            crop_cols: self.crop_cols,
        }
    }
}

fn parse_range(s: &str) -> Result<[usize; 2], String> {
    let (start, end) = s
        .split_once(':')
        .ok_or_else(|| format!("expected start:end, got '{s}'"))?;
    let start = start
        .trim()
        .parse()
        .map_err(|e| format!("invalid range start '{start}': {e}"))?;
    let end = end
        .trim()
        .parse()
        .map_err(|e| format!("invalid range end '{end}': {e}"))?;
    Ok([start, end])
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref(), &cli.overrides())
        .context("Failed to load configuration")?;

    if let Commands::ShowConfig = cli.command {
        print!("{}", settings.to_toml()?);
        return Ok(());
    }

    logging::init_from_config(&settings)?;

    match cli.command {
        Commands::Export { scan } => {
            let scan: ScanRef = scan.parse()?;
            run_export(&settings, &scan)
        }
        Commands::Latest => run_export(&settings, &ScanRef::latest()),
        Commands::List { limit } => list_runs(&settings, limit),
        Commands::ShowConfig => Ok(()),
    }
}

fn open_catalog(settings: &Settings) -> Result<DirectoryCatalog> {
    DirectoryCatalog::open(&settings.catalog.root)
        .with_context(|| format!("Failed to open catalog {}", settings.catalog.root.display()))
}

fn run_export(settings: &Settings, scan: &ScanRef) -> Result<()> {
    let catalog = open_catalog(settings)?;
    let registry = ArchiveRegistry::new();
    if !registry.is_available(&settings.export.archive_format) {
        bail!(
            "Archive format '{}' is not available (built with: {})",
            settings.export.archive_format,
            registry.list_formats().join(", ")
        );
    }
    let archives = registry.create(&settings.export.archive_format)?;

    let report = export_single_scan(&catalog, scan, archives.as_ref(), settings)
        .with_context(|| format!("Failed to export scan {scan}"))?;

    println!("Exported scan #{} ({})", report.scan_id, report.scan_type);
    for path in &report.outputs {
        println!("  {}", path.display());
    }
    for warning in &report.warnings {
        println!("  warning: {warning}");
    }
    Ok(())
}

fn list_runs(settings: &Settings, limit: usize) -> Result<()> {
    let catalog = open_catalog(settings)?;
    let tz = settings.time_zone()?;

    for start in catalog.starts()?.iter().rev().take(limit) {
        println!("{}", describe_run(start, tz));
    }
    Ok(())
}

fn describe_run(start: &StartDoc, tz: chrono_tz::Tz) -> String {
    let scan_id = start
        .scan_id()
        .map_or_else(|_| "?".to_string(), |id| id.to_string());
    let plan = start.plan_name().unwrap_or("?");
    let uid = start.uid().unwrap_or("?");
    let time = start
        .time()
        .ok()
        .and_then(|t| chrono::DateTime::from_timestamp(t.floor() as i64, 0))
        .map_or_else(
            || "?".to_string(),
            |dt| dt.with_timezone(&tz).format("%Y-%m-%d %H:%M:%S").to_string(),
        );
    let marker = if plan.parse::<ScanType>().is_ok() {
        ""
    } else {
        "  (unsupported)"
    };
    format!("{scan_id:>8}  {time}  {plan:<28} {uid}{marker}")
}
