//! On-disk catalog.
//!
//! # Layout
//!
//! ```text
//! <root>/
//!   <run>/
//!     start.json                 start document
//!     <stream>/table.json        {"time": [...], "data": {"<column>": [...]}}
//!     <stream>/<field>.json      {"dtype": "uint16", "shape": [e, f, rows, cols],
//!                                 "timestamps": [...]}       (timestamps optional)
//!     <stream>/<field>.bin       raw little-endian uint16 frames
//! ```
//!
//! Frame files are memory-mapped when read.

use super::memory::MemoryScan;
use super::{select_run, Catalog, ImageStream, ScanRef, ScanSource, StartDoc, Table};
use crate::error::{ExportError, ExportResult};
use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

const START_FILE: &str = "start.json";
const TABLE_FILE: &str = "table.json";

/// Descriptor stored next to a frame file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FrameDescriptor {
    dtype: String,
    shape: [usize; 4],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timestamps: Option<Vec<f64>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TableFile {
    time: Vec<f64>,
    #[serde(default)]
    data: BTreeMap<String, Vec<f64>>,
}

/// Catalog backed by a directory of runs.
#[derive(Debug, Clone)]
pub struct DirectoryCatalog {
    root: PathBuf,
    runs: Vec<(PathBuf, StartDoc)>,
}

impl DirectoryCatalog {
    /// Index every run directory below `root`.
    ///
    /// Subdirectories without a start document are skipped.
    pub fn open<P: AsRef<Path>>(root: P) -> ExportResult<Self> {
        let root = root.as_ref().to_path_buf();
        let mut runs = Vec::new();
        for entry in fs::read_dir(&root)? {
            let dir = entry?.path();
            let start_path = dir.join(START_FILE);
            if !start_path.is_file() {
                continue;
            }
            let value: serde_json::Value =
                serde_json::from_reader(BufReader::new(File::open(&start_path)?))?;
            runs.push((dir, StartDoc::from_value(value)?));
        }

        runs.sort_by(|a, b| {
            let ta = a.1.time().unwrap_or(f64::NEG_INFINITY);
            let tb = b.1.time().unwrap_or(f64::NEG_INFINITY);
            ta.total_cmp(&tb)
        });

        tracing::debug!(root = ?root, runs = runs.len(), "Indexed catalog directory");
        Ok(Self { root, runs })
    }

    /// Catalog root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of indexed runs.
    pub fn len(&self) -> usize {
        self.runs.len()
    }

    /// True when no runs were found.
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Write a run below `root` in the on-disk layout.
    ///
    /// The run directory is named after the run uid. Returns its path.
    pub fn write_run<P: AsRef<Path>>(root: P, scan: &MemoryScan) -> ExportResult<PathBuf> {
        let uid = scan.start.uid()?;
        let dir = root.as_ref().join(uid);
        fs::create_dir_all(&dir)?;
        write_json(&dir.join(START_FILE), &scan.start)?;

        for table in scan.tables.values() {
            let stream_dir = dir.join(table.stream());
            fs::create_dir_all(&stream_dir)?;
            let data = table
                .column_names()
                .map(|name| Ok((name.to_string(), table.column(name)?.to_vec())))
                .collect::<ExportResult<BTreeMap<_, _>>>()?;
            let file = TableFile {
                time: table.time().to_vec(),
                data,
            };
            write_json(&stream_dir.join(TABLE_FILE), &file)?;
        }

        for ((stream, field), images) in &scan.images {
            let stream_dir = dir.join(stream);
            fs::create_dir_all(&stream_dir)?;
            let shape = images.frames().shape();
            let descriptor = FrameDescriptor {
                dtype: "uint16".to_string(),
                shape: [shape[0], shape[1], shape[2], shape[3]],
                timestamps: images.timestamps().map(<[f64]>::to_vec),
            };
            write_json(&stream_dir.join(format!("{field}.json")), &descriptor)?;

            let mut out = BufWriter::new(File::create(stream_dir.join(format!("{field}.bin")))?);
            for value in images.frames().iter() {
                out.write_all(&value.to_le_bytes())?;
            }
            out.flush()?;
        }

        tracing::debug!(run = ?dir, "Wrote catalog run");
        Ok(dir)
    }
}

impl Catalog for DirectoryCatalog {
    fn resolve(&self, scan: &ScanRef) -> ExportResult<Box<dyn ScanSource + '_>> {
        let starts: Vec<StartDoc> = self.runs.iter().map(|(_, doc)| doc.clone()).collect();
        let index = select_run(&starts, scan)?;
        let (dir, start) = &self.runs[index];
        Ok(Box::new(DirectoryScan {
            dir: dir.clone(),
            start: start.clone(),
        }))
    }

    fn starts(&self) -> ExportResult<Vec<StartDoc>> {
        Ok(self.runs.iter().map(|(_, doc)| doc.clone()).collect())
    }
}

/// A run stored in a [`DirectoryCatalog`].
#[derive(Debug, Clone)]
pub struct DirectoryScan {
    dir: PathBuf,
    start: StartDoc,
}

impl DirectoryScan {
    fn stream_dir(&self, stream: &str) -> ExportResult<PathBuf> {
        let path = self.dir.join(stream);
        if path.is_dir() {
            Ok(path)
        } else {
            Err(ExportError::StreamNotFound {
                stream: stream.to_string(),
            })
        }
    }
}

impl ScanSource for DirectoryScan {
    fn start(&self) -> &StartDoc {
        &self.start
    }

    fn stream_names(&self) -> Vec<String> {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .filter(|e| e.path().is_dir())
            .filter_map(|e| e.file_name().into_string().ok())
            .collect();
        names.sort();
        names
    }

    fn images(&self, stream: &str, field: &str) -> ExportResult<ImageStream> {
        let stream_dir = self.stream_dir(stream)?;
        let descriptor_path = stream_dir.join(format!("{field}.json"));
        if !descriptor_path.is_file() {
            return Err(ExportError::FieldNotFound {
                stream: stream.to_string(),
                field: field.to_string(),
            });
        }
        let descriptor: FrameDescriptor =
            serde_json::from_reader(BufReader::new(File::open(&descriptor_path)?))?;
        if descriptor.dtype != "uint16" {
            return Err(ExportError::FieldType {
                key: format!("{stream}/{field}"),
                expected: "uint16 frames",
            });
        }

        let data = read_frames(&stream_dir.join(format!("{field}.bin")), &descriptor.shape)?;
        ImageStream::from_shape_vec(descriptor.shape, data, descriptor.timestamps)
    }

    fn table(&self, stream: &str) -> ExportResult<Table> {
        let stream_dir = self.stream_dir(stream)?;
        let path = stream_dir.join(TABLE_FILE);
        if !path.is_file() {
            return Err(ExportError::StreamNotFound {
                stream: stream.to_string(),
            });
        }
        let file: TableFile = serde_json::from_reader(BufReader::new(File::open(&path)?))?;
        Table::new(stream, file.time, file.data)
    }
}

#[allow(unsafe_code)]
fn read_frames(path: &Path, shape: &[usize; 4]) -> ExportResult<Vec<u16>> {
    let expected_bytes = shape
        .iter()
        .try_fold(std::mem::size_of::<u16>(), |acc, &dim| acc.checked_mul(dim))
        .ok_or_else(|| {
            ExportError::ShapeMismatch(format!(
                "{} descriptor shape {:?} is too large",
                path.display(),
                shape
            ))
        })?;
    if expected_bytes == 0 {
        return Ok(Vec::new());
    }

    let file = File::open(path)?;
    // SAFETY: the mapping is read-only and dropped before this function returns;
    // catalog frame files are written once and not modified while being read.
    let mmap = unsafe { Mmap::map(&file)? };
    if mmap.len() != expected_bytes {
        return Err(ExportError::ShapeMismatch(format!(
            "{} holds {} bytes, descriptor shape {:?} needs {}",
            path.display(),
            mmap.len(),
            shape,
            expected_bytes
        )));
    }

    Ok(mmap
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> ExportResult<()> {
    let mut out = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut out, value)?;
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn scan(scan_id: i64, time: f64) -> MemoryScan {
        let start = StartDoc::default()
            .with_field("uid", format!("run-{scan_id}"))
            .with_field("scan_id", scan_id)
            .with_field("time", time)
            .with_field("plan_name", "count");
        let images = ImageStream::from_shape_vec(
            [2, 1, 2, 3],
            (0..12).map(|v| v * 1000).collect(),
            Some(vec![1.0, 2.0]),
        )
        .unwrap();
        let mut columns = BTreeMap::new();
        columns.insert("zp_z".to_string(), vec![2.5]);
        MemoryScan::new(start)
            .with_images("primary", "Andor_image", images)
            .with_table(Table::new("baseline", vec![time], columns).unwrap())
    }

    #[test]
    fn round_trips_runs_through_disk() {
        let dir = TempDir::new().unwrap();
        DirectoryCatalog::write_run(dir.path(), &scan(7, 200.0)).unwrap();
        DirectoryCatalog::write_run(dir.path(), &scan(6, 100.0)).unwrap();
        fs::create_dir(dir.path().join("not-a-run")).unwrap();

        let catalog = DirectoryCatalog::open(dir.path()).unwrap();
        assert_eq!(catalog.len(), 2);

        let latest = catalog.resolve(&ScanRef::latest()).unwrap();
        assert_eq!(latest.start().scan_id().unwrap(), 7);
        assert_eq!(latest.stream_names(), vec!["baseline", "primary"]);

        let images = latest.images("primary", "Andor_image").unwrap();
        assert_eq!(images.frames().shape(), &[2, 1, 2, 3]);
        assert_eq!(images.frames()[[1, 0, 1, 2]], 11_000);
        assert_eq!(images.timestamps(), Some(&[1.0, 2.0][..]));

        let baseline = latest.table("baseline").unwrap();
        assert_eq!(baseline.first("zp_z").unwrap(), 2.5);
    }

    #[test]
    fn truncated_frame_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let run = DirectoryCatalog::write_run(dir.path(), &scan(1, 1.0)).unwrap();
        let bin = run.join("primary").join("Andor_image.bin");
        let bytes = fs::read(&bin).unwrap();
        fs::write(&bin, &bytes[..bytes.len() - 2]).unwrap();

        let catalog = DirectoryCatalog::open(dir.path()).unwrap();
        let scan = catalog.resolve(&ScanRef::ScanId(1)).unwrap();
        assert!(matches!(
            scan.images("primary", "Andor_image"),
            Err(ExportError::ShapeMismatch(_))
        ));
        assert!(matches!(
            scan.images("dark", "Andor_image"),
            Err(ExportError::StreamNotFound { .. })
        ));
        assert!(matches!(
            scan.images("primary", "detA1_image"),
            Err(ExportError::FieldNotFound { .. })
        ));
    }

    #[test]
    fn oversized_descriptor_shape_is_rejected() {
        let dir = TempDir::new().unwrap();
        let run = DirectoryCatalog::write_run(dir.path(), &scan(2, 1.0)).unwrap();
        let descriptor = serde_json::json!({
            "dtype": "uint16",
            "shape": [usize::MAX, 2, 2, 3],
        });
        fs::write(
            run.join("primary").join("Andor_image.json"),
            descriptor.to_string(),
        )
        .unwrap();

        let catalog = DirectoryCatalog::open(dir.path()).unwrap();
        let scan = catalog.resolve(&ScanRef::ScanId(2)).unwrap();
        match scan.images("primary", "Andor_image") {
            Err(ExportError::ShapeMismatch(msg)) => assert!(msg.contains("too large")),
            other => panic!("unexpected result {other:?}"),
        }
    }
}
