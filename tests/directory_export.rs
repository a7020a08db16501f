//! End-to-end exports from an on-disk catalog into in-memory archives.

mod common;

use common::*;
use fxi_export::catalog::{Catalog, MemoryScan, ScanRef};
use fxi_export::export::{export_single_scan, ExporterRegistry, ScanType};
use fxi_export::storage::{MemoryArchiveFactory, StoredDataset};
use fxi_export::ExportError;
use tempfile::TempDir;

fn monitor() -> fxi_export::catalog::Table {
    rotation_monitor(&[(0.0, 0.0), (2.0, 20.0), (4.0, 40.0), (5.0, 30.0)])
}

fn count_run(scan_id: i64) -> MemoryScan {
    MemoryScan::new(start("count", scan_id).with_field("detectors", vec!["Andor"]))
        .with_images("primary", "Andor_image", frames(2, 1, 2, 2, |e, _| 100 + e as u16))
        .with_table(baseline())
}

#[test]
fn fly_scan2_round_trips_through_disk() {
    let out = TempDir::new().unwrap();
    let run = MemoryScan::new(start("fly_scan2", 500))
        .with_images(
            "primary",
            "Andor_image",
            frames(6, 2, 2, 3, |e, f| match e {
                4 => 900,
                5 => 30,
                _ => (e * 2 + f) as u16,
            }),
        )
        .with_table(baseline())
        .with_table(monitor());
    let (_root, catalog) = catalog(&[run]);

    let archives = MemoryArchiveFactory::new();
    let report = export_single_scan(
        &catalog,
        &ScanRef::latest(),
        &archives,
        &settings(out.path(), "memory"),
    )
    .unwrap();

    assert_eq!(report.scan_id, 500);
    assert_eq!(report.scan_type, ScanType::FlyScan2);
    assert!(report.warnings.is_empty());

    let archive = archives.archive(&out.path().join("fly_scan2_id_500.h5")).unwrap();
    let angle = archive.get("angle").and_then(StoredDataset::as_floats).unwrap();
    assert_eq!(angle, &[0.0, 10.0, 20.0, 30.0, 40.0][..]);
    assert_eq!(archive.get("img_tomo").unwrap().shape(), vec![5, 2, 3]);
    assert_eq!(archive.get("Pixel Size").and_then(StoredDataset::as_str), Some("21.666666666666668nm"));
    assert_eq!(
        archive.get("lakeshore/lakeshore_B").and_then(StoredDataset::as_floats),
        Some(&[80.0, 80.0][..])
    );
}

#[test]
fn scan_references_pick_the_right_run() {
    let out = TempDir::new().unwrap();
    let (_root, catalog) = catalog(&[count_run(601), count_run(602), count_run(603)]);
    assert_eq!(catalog.starts().unwrap().len(), 3);

    let settings = settings(out.path(), "memory");
    for (scan, expected) in [
        (ScanRef::latest(), 603),
        (ScanRef::Recent(3), 601),
        (ScanRef::ScanId(602), 602),
        ("count-601".parse().unwrap(), 601),
    ] {
        let archives = MemoryArchiveFactory::new();
        let report = export_single_scan(&catalog, &scan, &archives, &settings).unwrap();
        assert_eq!(report.scan_id, expected, "reference {scan}");
        assert_eq!(
            archives.paths(),
            vec![out.path().join(format!("count_id_{expected}.h5"))]
        );
    }

    let missing = export_single_scan(
        &catalog,
        &ScanRef::ScanId(999),
        &MemoryArchiveFactory::new(),
        &settings,
    );
    assert!(matches!(missing, Err(ExportError::ScanNotFound(_))));
}

#[test]
fn user_fly_only_reads_companion_runs_from_disk() {
    let out = TempDir::new().unwrap();
    let dark = MemoryScan::new(start("count", 700))
        .with_images("primary", "Andor_image", frames(1, 2, 2, 2, |_, _| 5));
    let flat = MemoryScan::new(start("count", 701))
        .with_images("primary", "Andor_image", frames(1, 2, 2, 2, |_, _| 500));
    let fly = MemoryScan::new(
        start("user_fly_only", 702)
            .with_arg("dark_scan_id", 700)
            .with_arg("bkg_scan_id", 701),
    )
    .with_images("primary", "Andor_image", frames(4, 2, 2, 2, |e, f| (e * 2 + f) as u16))
    .with_table(baseline())
    .with_table(monitor());
    let (_root, catalog) = catalog(&[dark, flat, fly]);

    let archives = MemoryArchiveFactory::new();
    export_single_scan(
        &catalog,
        &ScanRef::latest(),
        &archives,
        &settings(out.path(), "memory"),
    )
    .unwrap();

    let archive = archives.archive(&out.path().join("fly_scan_id_702.h5")).unwrap();
    let dark = archive.get("img_dark").and_then(StoredDataset::as_u16).unwrap();
    assert!(dark.iter().all(|&v| v == 5));
    // Cutoff 5 minus one chunk of 2 frames.
    assert_eq!(archive.get("img_tomo").unwrap().shape(), vec![3, 2, 2]);
    assert!(!archive.contains("Magnification"));
}

#[test]
fn unknown_and_legacy_plans_are_rejected() {
    let out = TempDir::new().unwrap();
    let unknown = MemoryScan::new(start("mystery_scan", 800));
    let legacy = MemoryScan::new(start("fly_scan", 801).with_field("time", 1_600_000_000.0));
    let (_root, catalog) = catalog(&[legacy, unknown]);
    let settings = settings(out.path(), "memory");

    match export_single_scan(&catalog, &ScanRef::ScanId(800), &MemoryArchiveFactory::new(), &settings) {
        Err(ExportError::UnsupportedScanType { plan_name, legacy }) => {
            assert_eq!(plan_name, "mystery_scan");
            assert!(!legacy);
        }
        other => panic!("unexpected result {other:?}"),
    }
    match export_single_scan(&catalog, &ScanRef::ScanId(801), &MemoryArchiveFactory::new(), &settings) {
        Err(ExportError::UnsupportedScanType { legacy, .. }) => assert!(legacy),
        other => panic!("unexpected result {other:?}"),
    }
}

#[test]
fn missing_stream_fails_without_output() {
    let out = TempDir::new().unwrap();
    let run = MemoryScan::new(start("xanes_scan", 900).with_field("eng_list", vec![8.3, 8.4]))
        .with_images("primary", "Andor_image", frames(2, 2, 2, 2, |_, _| 50))
        .with_images("flat", "Andor_image", frames(2, 2, 2, 2, |_, _| 100))
        .with_table(baseline());
    let (_root, catalog) = catalog(&[run]);

    let archives = MemoryArchiveFactory::new();
    let result = export_single_scan(
        &catalog,
        &ScanRef::latest(),
        &archives,
        &settings(out.path(), "memory"),
    );
    match result {
        Err(ExportError::StreamNotFound { stream }) => assert_eq!(stream, "dark"),
        other => panic!("unexpected result {other:?}"),
    }
    assert!(archives.paths().is_empty());
    assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 0);
}

#[test]
fn registry_covers_every_scan_type() {
    let registry = ExporterRegistry::new();
    assert_eq!(registry.supported().len(), ScanType::ALL.len());
    for scan_type in ScanType::ALL {
        let parsed: ScanType = scan_type.as_str().parse().unwrap();
        assert_eq!(parsed, scan_type);
        assert!(registry.get(scan_type).is_some());
    }
}
