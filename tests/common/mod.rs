//! Fixtures shared by the integration tests: runs written to an on-disk
//! catalog below a temporary directory.

#![allow(dead_code)]

use fxi_export::align::EPICS_EPOCH_UNIX_SECS;
use fxi_export::catalog::{DirectoryCatalog, ImageStream, MemoryScan, StartDoc, Table};
use fxi_export::config::Settings;
use std::collections::BTreeMap;
use std::path::Path;
use tempfile::TempDir;

/// 2023-03-01T15:00:00Z
pub const RUN_TIME: f64 = 1_677_682_800.0;

pub fn start(plan: &str, scan_id: i64) -> StartDoc {
    StartDoc::default()
        .with_field("uid", format!("{plan}-{scan_id}-uid"))
        .with_field("scan_id", scan_id)
        .with_field("plan_name", plan)
        .with_field("time", RUN_TIME + scan_id as f64)
        .with_field("note", "integration")
        .with_field("XEng", 9.0)
}

/// Baseline with magnification 300 and a lakeshore channel.
pub fn baseline() -> Table {
    let mut columns = BTreeMap::new();
    for (name, value) in [
        ("zp_z", 10.0),
        ("DetU_z", 310.0),
        ("zps_sx", 0.5),
        ("zps_sy", 1.0),
        ("zps_sz", 2.0),
        ("zps_pi_r", 0.0),
        ("lakeshore_B", 80.0),
    ] {
        columns.insert(name.to_string(), vec![value, value]);
    }
    Table::new("baseline", vec![RUN_TIME, RUN_TIME + 30.0], columns).unwrap()
}

/// Frames with one detector timestamp per frame, one second apart from
/// `RUN_TIME`.
pub fn frames(
    events: usize,
    per_event: usize,
    rows: usize,
    cols: usize,
    value: impl Fn(usize, usize) -> u16,
) -> ImageStream {
    let mut data = Vec::with_capacity(events * per_event * rows * cols);
    for e in 0..events {
        for f in 0..per_event {
            data.extend(std::iter::repeat(value(e, f)).take(rows * cols));
        }
    }
    let timestamps = (0..events * per_event)
        .map(|i| RUN_TIME - EPICS_EPOCH_UNIX_SECS as f64 + i as f64)
        .collect();
    ImageStream::from_shape_vec([events, per_event, rows, cols], data, Some(timestamps)).unwrap()
}

/// Rotation monitor sampled at `RUN_TIME + t`.
pub fn rotation_monitor(samples: &[(f64, f64)]) -> Table {
    let mut columns = BTreeMap::new();
    columns.insert(
        "zps_pi_r".to_string(),
        samples.iter().map(|(_, angle)| *angle).collect(),
    );
    Table::new(
        "zps_pi_r_monitor",
        samples.iter().map(|(t, _)| RUN_TIME + t).collect(),
        columns,
    )
    .unwrap()
}

/// Write `runs` into a fresh catalog directory and index it.
pub fn catalog(runs: &[MemoryScan]) -> (TempDir, DirectoryCatalog) {
    let root = TempDir::new().unwrap();
    for run in runs {
        DirectoryCatalog::write_run(root.path(), run).unwrap();
    }
    let catalog = DirectoryCatalog::open(root.path()).unwrap();
    (root, catalog)
}

pub fn settings(output_dir: &Path, archive_format: &str) -> Settings {
    let mut settings = Settings::default();
    settings.export.output_dir = output_dir.to_path_buf();
    settings.export.archive_format = archive_format.to_string();
    settings
}
