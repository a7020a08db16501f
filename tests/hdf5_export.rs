//! Exports written as real HDF5 files.

#![cfg(feature = "storage_hdf5")]

mod common;

use common::*;
use fxi_export::catalog::{MemoryScan, ScanRef};
use fxi_export::export::export_single_scan;
use fxi_export::storage::{ArchiveRegistry, Hdf5ArchiveFactory};
use hdf5::types::VarLenUnicode;
use hdf5::File;
use tempfile::TempDir;

#[test]
fn z_scan_archive_on_disk() {
    let out = TempDir::new().unwrap();
    let values = [30u16, 50, 110, 10];
    let run = MemoryScan::new(start("z_scan", 300).with_arg("steps", 2).with_arg("note", "focus"))
        .with_images("primary", "Andor_image", frames(4, 2, 3, 4, |e, _| values[e]))
        .with_table(baseline());
    let (_root, catalog) = catalog(&[run]);

    let report = export_single_scan(
        &catalog,
        &ScanRef::latest(),
        &Hdf5ArchiveFactory,
        &settings(out.path(), "hdf5"),
    )
    .unwrap();
    let path = out.path().join("z_scan_id_300.h5");
    assert_eq!(report.outputs, vec![path.clone()]);

    let file = File::open(&path).unwrap();
    let norm = file.dataset("img_norm").unwrap();
    assert_eq!(norm.shape(), vec![2, 3, 4]);
    let values: Vec<f32> = norm.read_raw().unwrap();
    assert!((values[0] - 0.2).abs() < 1e-6);
    assert!((values[12] - 0.4).abs() < 1e-6);

    let note: VarLenUnicode = file.dataset("note").unwrap().read_scalar().unwrap();
    assert_eq!(note.as_str(), "focus");
    let lakeshore: Vec<f64> = file
        .group("lakeshore")
        .unwrap()
        .dataset("lakeshore_B")
        .unwrap()
        .read_raw()
        .unwrap();
    assert_eq!(lakeshore, vec![80.0, 80.0]);
}

#[test]
fn failed_export_leaves_no_partial_file() {
    let out = TempDir::new().unwrap();
    // Only one event: the z_scan layout needs images, a flat and a dark.
    let run = MemoryScan::new(start("z_scan", 301).with_arg("steps", 2))
        .with_images("primary", "Andor_image", frames(1, 1, 2, 2, |_, _| 1))
        .with_table(baseline());
    let (_root, catalog) = catalog(&[run]);

    let archives = ArchiveRegistry::new().create("hdf5").unwrap();
    let result = export_single_scan(
        &catalog,
        &ScanRef::latest(),
        archives.as_ref(),
        &settings(out.path(), "hdf5"),
    );
    assert!(result.is_err());
    assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 0);
}
