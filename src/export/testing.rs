//! Run builders shared by the exporter unit tests.

use super::{export_single_scan, ExportReport};
use crate::align::EPICS_EPOCH_UNIX_SECS;
use crate::catalog::{ImageStream, MemoryCatalog, MemoryScan, ScanRef, StartDoc, Table};
use crate::config::Settings;
use crate::error::ExportResult;
use crate::storage::{MemoryArchive, MemoryArchiveFactory};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// 2023-03-01T15:00:00Z
pub const RUN_TIME: f64 = 1_677_682_800.0;

pub fn start(plan: &str, scan_id: i64) -> StartDoc {
    StartDoc::default()
        .with_field("uid", format!("{plan}-{scan_id}-uid"))
        .with_field("scan_id", scan_id)
        .with_field("plan_name", plan)
        .with_field("time", RUN_TIME + scan_id as f64)
        .with_field("note", "sample A")
        .with_field("XEng", 8.333)
}

/// Baseline snapshot with magnification 300 and one lakeshore channel.
pub fn baseline() -> Table {
    let mut columns = BTreeMap::new();
    for (name, value) in [
        ("zp_z", 10.0),
        ("DetU_z", 310.0),
        ("zps_sx", 1.5),
        ("zps_sy", -2.0),
        ("zps_sz", 3.25),
        ("zps_pi_r", 0.0),
        ("lakeshore_A", 77.0),
    ] {
        columns.insert(name.to_string(), vec![value, value + 1.0]);
    }
    Table::new("baseline", vec![RUN_TIME, RUN_TIME + 60.0], columns).unwrap()
}

/// Image stream whose pixel values come from `value(event, frame)`.
pub fn images(
    events: usize,
    frames: usize,
    rows: usize,
    cols: usize,
    value: impl Fn(usize, usize) -> u16,
) -> ImageStream {
    let mut data = Vec::with_capacity(events * frames * rows * cols);
    for e in 0..events {
        for f in 0..frames {
            data.extend(std::iter::repeat(value(e, f)).take(rows * cols));
        }
    }
    ImageStream::from_shape_vec([events, frames, rows, cols], data, None).unwrap()
}

/// Like [`images`], with one detector timestamp per frame at
/// `RUN_TIME + frame_index * dt` (converted to the detector epoch).
pub fn timed_images(
    events: usize,
    frames: usize,
    rows: usize,
    cols: usize,
    dt: f64,
    value: impl Fn(usize, usize) -> u16,
) -> ImageStream {
    let plain = images(events, frames, rows, cols, value);
    let ts: Vec<f64> = (0..events * frames)
        .map(|i| RUN_TIME - EPICS_EPOCH_UNIX_SECS as f64 + i as f64 * dt)
        .collect();
    ImageStream::new(plain.frames().clone(), Some(ts)).unwrap()
}

/// Rotation monitor sampled at `RUN_TIME + t` for each `(t, angle)`.
pub fn rotation_monitor(samples: &[(f64, f64)]) -> Table {
    let time = samples.iter().map(|(t, _)| RUN_TIME + t).collect();
    let mut columns = BTreeMap::new();
    columns.insert(
        "zps_pi_r".to_string(),
        samples.iter().map(|(_, a)| *a).collect(),
    );
    Table::new("zps_pi_r_monitor", time, columns).unwrap()
}

pub fn settings(output_dir: &Path) -> Settings {
    let mut settings = Settings::default();
    settings.export.output_dir = output_dir.to_path_buf();
    settings.export.archive_format = "memory".to_string();
    settings
}

/// Export the latest run of `catalog` into memory archives.
pub fn export(
    catalog: &MemoryCatalog,
    settings: &Settings,
) -> (ExportResult<ExportReport>, MemoryArchiveFactory) {
    let archives = MemoryArchiveFactory::new();
    let result = export_single_scan(catalog, &ScanRef::latest(), &archives, settings);
    (result, archives)
}

pub fn single(scan: MemoryScan) -> MemoryCatalog {
    MemoryCatalog::new().with_scan(scan)
}

pub fn archive(archives: &MemoryArchiveFactory, path: PathBuf) -> MemoryArchive {
    archives
        .archive(&path)
        .unwrap_or_else(|| panic!("no archive at {}; have {:?}", path.display(), archives.paths()))
}
