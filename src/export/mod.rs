//! Per-scan-type exporters.
//!
//! [`export_single_scan`] resolves a run, maps its plan name onto a
//! [`ScanType`], and dispatches to the handler registered for that type in an
//! [`ExporterRegistry`]. Handlers read the run through an [`ExportContext`] and
//! record every file they write in an [`ExportReport`].
//!
//! Handlers are grouped by acquisition layout:
//!
//! - [`tomo`]: step and fly tomography with rotation angles.
//! - [`xanes`]: energy scans, including multi-position variants.
//! - [`stack`]: single-stream stacks (focus scans, counts, delay scans).
//! - [`raster`]: tiled mosaics and grid scans.

pub mod common;
pub mod enrich;
pub mod raster;
pub mod stack;
#[cfg(test)]
mod testing;
pub mod tomo;
pub mod xanes;

use crate::catalog::{Catalog, ScanRef, ScanSource, StartDoc};
use crate::config::Settings;
use crate::error::{ExportError, ExportResult};
use crate::storage::ArchiveFactory;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Acquisition plans that can be exported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScanType {
    /// `tomo_scan`
    TomoScan,
    /// `fly_scan`
    FlyScan,
    /// `fly_scan2`
    FlyScan2,
    /// `user_fly_only`
    UserFlyOnly,
    /// `xanes_scan`
    XanesScan,
    /// `xanes_scan2`
    XanesScan2,
    /// `xanes_scan_img_only`
    XanesScanImgOnly,
    /// `z_scan`
    ZScan,
    /// `z_scan2`
    ZScan2,
    /// `test_scan`
    TestScan,
    /// `count`
    Count,
    /// `delay_count`
    DelayCount,
    /// `delay_scan`
    DelayScan,
    /// `multipos_count`
    MultiposCount,
    /// `grid2D_rel`
    Grid2dRel,
    /// `raster_2D`
    Raster2d,
    /// `raster_2D_2`
    Raster2d2,
    /// `multipos_2D_xanes_scan2`
    Multipos2dXanesScan2,
    /// `multipos_2D_xanes_scan3`
    Multipos2dXanesScan3,
    /// `scan_change_expo_time`
    ScanChangeExpoTime,
}

impl ScanType {
    /// Every supported plan.
    pub const ALL: [ScanType; 20] = [
        ScanType::TomoScan,
        ScanType::FlyScan,
        ScanType::FlyScan2,
        ScanType::UserFlyOnly,
        ScanType::XanesScan,
        ScanType::XanesScan2,
        ScanType::XanesScanImgOnly,
        ScanType::ZScan,
        ScanType::ZScan2,
        ScanType::TestScan,
        ScanType::Count,
        ScanType::DelayCount,
        ScanType::DelayScan,
        ScanType::MultiposCount,
        ScanType::Grid2dRel,
        ScanType::Raster2d,
        ScanType::Raster2d2,
        ScanType::Multipos2dXanesScan2,
        ScanType::Multipos2dXanesScan3,
        ScanType::ScanChangeExpoTime,
    ];

    /// Plan name as recorded in start documents.
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanType::TomoScan => "tomo_scan",
            ScanType::FlyScan => "fly_scan",
            ScanType::FlyScan2 => "fly_scan2",
            ScanType::UserFlyOnly => "user_fly_only",
            ScanType::XanesScan => "xanes_scan",
            ScanType::XanesScan2 => "xanes_scan2",
            ScanType::XanesScanImgOnly => "xanes_scan_img_only",
            ScanType::ZScan => "z_scan",
            ScanType::ZScan2 => "z_scan2",
            ScanType::TestScan => "test_scan",
            ScanType::Count => "count",
            ScanType::DelayCount => "delay_count",
            ScanType::DelayScan => "delay_scan",
            ScanType::MultiposCount => "multipos_count",
            ScanType::Grid2dRel => "grid2D_rel",
            ScanType::Raster2d => "raster_2D",
            ScanType::Raster2d2 => "raster_2D_2",
            ScanType::Multipos2dXanesScan2 => "multipos_2D_xanes_scan2",
            ScanType::Multipos2dXanesScan3 => "multipos_2D_xanes_scan3",
            ScanType::ScanChangeExpoTime => "scan_change_expo_time",
        }
    }

    /// Plans that had a different layout before May 2021.
    pub fn has_legacy_layout(&self) -> bool {
        matches!(
            self,
            ScanType::TomoScan | ScanType::FlyScan | ScanType::XanesScan | ScanType::XanesScan2
        )
    }
}

impl FromStr for ScanType {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ScanType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ExportError::UnsupportedScanType {
                plan_name: s.to_string(),
                legacy: false,
            })
    }
}

impl fmt::Display for ScanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Start of the current acquisition layout, 2021-05-01T00:00:00 UTC.
const LAYOUT_CHANGE_UNIX_SECS: f64 = 1_619_827_200.0;

/// Offset subtracted from start times before comparing against the layout
/// change. Archived runs were classified with this ten day shift, so runs up to
/// 2021-05-11T00:00:00 UTC keep the legacy layout.
const LEGACY_CLOCK_OFFSET_SECS: f64 = 10.0 * 86_400.0;

/// Whether a run predates the current layout of its plan.
///
/// Unknown plan names are never legacy.
pub fn is_legacy(start: &StartDoc) -> ExportResult<bool> {
    let legacy_plan = start
        .plan_name()?
        .parse::<ScanType>()
        .is_ok_and(|t| t.has_legacy_layout());
    if !legacy_plan {
        return Ok(false);
    }
    Ok(start.time()? - LEGACY_CLOCK_OFFSET_SECS < LAYOUT_CHANGE_UNIX_SECS)
}

/// What one export produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportReport {
    /// Scan number of the exported run.
    pub scan_id: i64,
    /// Plan of the exported run.
    pub scan_type: ScanType,
    /// Files and directories written, in creation order.
    pub outputs: Vec<PathBuf>,
    /// Non-fatal problems (missing enrichment, skipped repeats).
    pub warnings: Vec<String>,
}

impl ExportReport {
    /// Empty report for a run.
    pub fn new(scan_id: i64, scan_type: ScanType) -> Self {
        Self {
            scan_id,
            scan_type,
            outputs: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Record a non-fatal problem.
    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}

/// Everything a handler may touch while exporting one run.
pub struct ExportContext<'a> {
    /// Catalog the run came from, for handlers that load companion runs.
    pub catalog: &'a dyn Catalog,
    /// The run being exported.
    pub scan: &'a dyn ScanSource,
    /// Where archives are created.
    pub archives: &'a dyn ArchiveFactory,
    /// Effective configuration.
    pub settings: &'a Settings,
}

impl<'a> ExportContext<'a> {
    /// Start document of the run being exported.
    pub fn start(&self) -> &'a StartDoc {
        self.scan.start()
    }
}

/// Export handler signature.
pub type ExportFn = fn(&ExportContext<'_>, &mut ExportReport) -> ExportResult<()>;

/// Registry of export handlers keyed by scan type.
pub struct ExporterRegistry {
    handlers: HashMap<ScanType, ExportFn>,
}

impl Default for ExporterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ExporterRegistry {
    /// Registry with the built-in handler for every [`ScanType`].
    pub fn new() -> Self {
        let mut registry = Self {
            handlers: HashMap::new(),
        };

        registry.register(ScanType::TomoScan, tomo::export_tomo_scan);
        registry.register(ScanType::FlyScan, tomo::export_fly_scan);
        registry.register(ScanType::FlyScan2, tomo::export_fly_scan2);
        registry.register(ScanType::UserFlyOnly, tomo::export_user_fly_only);

        registry.register(ScanType::XanesScan, xanes::export_xanes_scan);
        registry.register(ScanType::XanesScan2, xanes::export_xanes_scan);
        registry.register(ScanType::XanesScanImgOnly, xanes::export_xanes_scan_img_only);
        registry.register(ScanType::Multipos2dXanesScan2, xanes::export_multipos_2d_xanes_scan2);
        registry.register(ScanType::Multipos2dXanesScan3, xanes::export_multipos_2d_xanes_scan3);

        registry.register(ScanType::ZScan, stack::export_z_scan);
        registry.register(ScanType::ZScan2, stack::export_z_scan2);
        registry.register(ScanType::TestScan, stack::export_test_scan);
        registry.register(ScanType::Count, stack::export_count);
        registry.register(ScanType::DelayCount, stack::export_count);
        registry.register(ScanType::DelayScan, stack::export_delay_scan);
        registry.register(ScanType::MultiposCount, stack::export_multipos_count);

        registry.register(ScanType::Grid2dRel, raster::export_grid2d_rel);
        registry.register(ScanType::Raster2d, raster::export_raster_2d);
        registry.register(ScanType::Raster2d2, raster::export_raster_2d_2);
        registry.register(ScanType::ScanChangeExpoTime, raster::export_scan_change_expo_time);

        registry
    }

    /// Replace or add a handler.
    pub fn register(&mut self, scan_type: ScanType, handler: ExportFn) {
        self.handlers.insert(scan_type, handler);
    }

    /// Handler for `scan_type`.
    pub fn get(&self, scan_type: ScanType) -> Option<ExportFn> {
        self.handlers.get(&scan_type).copied()
    }

    /// Scan types with a handler, in declaration order.
    pub fn supported(&self) -> Vec<ScanType> {
        let mut types: Vec<ScanType> = self.handlers.keys().copied().collect();
        types.sort();
        types
    }

    /// Export one run with the handlers of this registry.
    pub fn export(
        &self,
        catalog: &dyn Catalog,
        scan: &ScanRef,
        archives: &dyn ArchiveFactory,
        settings: &Settings,
    ) -> ExportResult<ExportReport> {
        let source = catalog.resolve(scan)?;
        let start = source.start();
        let scan_id = start.scan_id()?;
        let plan_name = start.plan_name()?;

        tracing::info!(scan_id, scan_type = plan_name, "Exporting scan");

        if is_legacy(start)? {
            return Err(ExportError::UnsupportedScanType {
                plan_name: plan_name.to_string(),
                legacy: true,
            });
        }

        let scan_type: ScanType = plan_name.parse()?;
        let handler = self
            .get(scan_type)
            .ok_or_else(|| ExportError::UnsupportedScanType {
                plan_name: plan_name.to_string(),
                legacy: false,
            })?;

        let ctx = ExportContext {
            catalog,
            scan: &*source,
            archives,
            settings,
        };
        let mut report = ExportReport::new(scan_id, scan_type);
        handler(&ctx, &mut report)?;

        tracing::info!(
            scan_id,
            scan_type = %scan_type,
            outputs = report.outputs.len(),
            warnings = report.warnings.len(),
            "Export finished"
        );
        Ok(report)
    }
}

/// Export one run with the built-in handlers.
pub fn export_single_scan(
    catalog: &dyn Catalog,
    scan: &ScanRef,
    archives: &dyn ArchiveFactory,
    settings: &Settings,
) -> ExportResult<ExportReport> {
    ExporterRegistry::new().export(catalog, scan, archives, settings)
}
