//! # FXI Export Library
//!
//! Exports runs recorded by the full-field X-ray imaging beamline from a run
//! catalog into per-scan archives (HDF5 datasets, TIFF rasters and text
//! coordinate tables).
//!
//! ## Crate Structure
//!
//! - **`align`**: the timestamp-to-angle aligner. Converts catalog and
//!   detector timestamps to a common local clock and interpolates the
//!   rotation motor trace onto camera frames.
//! - **`catalog`**: the `Catalog` and `ScanSource` traits plus the on-disk
//!   `DirectoryCatalog` and the in-memory `MemoryCatalog`.
//! - **`config`**: layered `Settings` (defaults, TOML file, environment,
//!   command line) built with `figment`.
//! - **`error`**: the `ExportError` enum shared by every module.
//! - **`export`**: one handler per supported scan type and the registry that
//!   dispatches on the run's plan name.
//! - **`imaging`**: array reductions, normalization, binning and mosaics.
//! - **`logging`**: `tracing` subscriber setup.
//! - **`storage`**: archive sinks (HDF5, memory), TIFF output and atomic
//!   file writes.
//!
//! ## Example
//!
//! ```no_run
//! use fxi_export::catalog::{DirectoryCatalog, ScanRef};
//! use fxi_export::config::{Overrides, Settings};
//! use fxi_export::export::export_single_scan;
//! use fxi_export::storage::ArchiveRegistry;
//!
//! # fn main() -> Result<(), fxi_export::ExportError> {
//! let settings = Settings::load(None, &Overrides::default())?;
//! let catalog = DirectoryCatalog::open(&settings.catalog.root)?;
//! let archives = ArchiveRegistry::new().create(&settings.export.archive_format)?;
//! let report = export_single_scan(&catalog, &ScanRef::latest(), archives.as_ref(), &settings)?;
//! println!("wrote {} files", report.outputs.len());
//! # Ok(())
//! # }
//! ```

pub mod align;
pub mod catalog;
pub mod config;
pub mod error;
pub mod export;
pub mod imaging;
pub mod logging;
pub mod storage;

pub use error::{ExportError, ExportResult};
