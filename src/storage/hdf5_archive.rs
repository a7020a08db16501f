//! HDF5 archive backend.
//!
//! Each archive is an HDF5 file written to a hidden temporary path next to its
//! destination and renamed into place when committed. Scalars are stored as
//! zero-dimensional datasets, strings as variable-length UTF-8.

use super::atomic::AtomicFile;
use super::{ArchiveFactory, ArchiveSink, Dataset};
use crate::error::{ExportError, ExportResult};
use hdf5::types::VarLenUnicode;
use hdf5::{File, Group};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Creates HDF5 archives.
#[derive(Debug, Clone, Copy, Default)]
pub struct Hdf5ArchiveFactory;

impl ArchiveFactory for Hdf5ArchiveFactory {
    fn name(&self) -> &'static str {
        "hdf5"
    }

    fn create(&self, path: &Path) -> ExportResult<Box<dyn ArchiveSink>> {
        let target = AtomicFile::new(path)?;
        let file = File::create(target.temp_path())?;
        Ok(Box::new(Hdf5Archive {
            file: Some(file),
            target: Some(target),
        }))
    }
}

/// Open HDF5 archive. Dropped without commit, the file is closed and removed.
pub struct Hdf5Archive {
    // Declared before `target` so the handle closes before the temp file is removed.
    file: Option<File>,
    target: Option<AtomicFile>,
}

impl Hdf5Archive {
    fn file(&self) -> ExportResult<&File> {
        self.file
            .as_ref()
            .ok_or_else(|| ExportError::Storage("archive already closed".into()))
    }

    fn parent_group(&self, name: &str) -> ExportResult<(Group, String)> {
        let file = self.file()?;
        let mut group = file.group("/")?;
        let mut parts: Vec<&str> = name.split('/').filter(|p| !p.is_empty()).collect();
        let leaf = parts
            .pop()
            .ok_or_else(|| ExportError::Storage(format!("invalid dataset name '{name}'")))?;
        for part in parts {
            group = if group.link_exists(part) {
                group.group(part)?
            } else {
                group.create_group(part)?
            };
        }
        Ok((group, leaf.to_string()))
    }
}

fn to_var_len_unicode(value: &str) -> ExportResult<VarLenUnicode> {
    VarLenUnicode::from_str(value)
        .map_err(|e| ExportError::Storage(format!("invalid string dataset: {e}")))
}

impl ArchiveSink for Hdf5Archive {
    fn path(&self) -> &Path {
        self.target
            .as_ref()
            .map(AtomicFile::dest)
            .unwrap_or_else(|| Path::new(""))
    }

    fn put(&mut self, name: &str, data: Dataset<'_>) -> ExportResult<()> {
        let (group, leaf) = self.parent_group(name)?;
        let leaf = leaf.as_str();
        match data {
            Dataset::Str(value) => {
                group
                    .new_dataset::<VarLenUnicode>()
                    .shape(())
                    .create(leaf)?
                    .write_scalar(&to_var_len_unicode(value)?)?;
            }
            Dataset::Int(value) => {
                group
                    .new_dataset::<i64>()
                    .shape(())
                    .create(leaf)?
                    .write_scalar(&value)?;
            }
            Dataset::Float(value) => {
                group
                    .new_dataset::<f64>()
                    .shape(())
                    .create(leaf)?
                    .write_scalar(&value)?;
            }
            Dataset::Floats(values) => {
                group
                    .new_dataset::<f64>()
                    .shape(values.len())
                    .create(leaf)?
                    .write(values)?;
            }
            Dataset::U16(array) => {
                let array = array.as_standard_layout();
                group
                    .new_dataset::<u16>()
                    .shape(array.shape().to_vec())
                    .create(leaf)?
                    .write(&array)?;
            }
            Dataset::F32(array) => {
                let array = array.as_standard_layout();
                group
                    .new_dataset::<f32>()
                    .shape(array.shape().to_vec())
                    .create(leaf)?
                    .write(&array)?;
            }
        }
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> ExportResult<PathBuf> {
        if let Some(file) = self.file.take() {
            file.close()?;
        }
        let target = self
            .target
            .take()
            .ok_or_else(|| ExportError::Storage("archive already committed".into()))?;
        let path = target.commit()?;
        tracing::info!(path = ?path, "Wrote HDF5 archive");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use tempfile::TempDir;

    #[test]
    fn writes_scalars_arrays_and_groups() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("tomo_scan_id_7.h5");

        let mut sink = Hdf5ArchiveFactory.create(&dest).unwrap();
        sink.put("scan_id", Dataset::Int(7)).unwrap();
        sink.put("Pixel Size", Dataset::Str("21.5nm")).unwrap();
        sink.put("angle", Dataset::Floats(&[0.0, 90.0, 180.0])).unwrap();
        let img = Array3::<u16>::from_elem((2, 3, 4), 9);
        sink.put("img_tomo", img.view().into()).unwrap();
        sink.put("lakeshore/A", Dataset::Float(77.5)).unwrap();
        assert!(!dest.exists());
        sink.commit().unwrap();

        let file = File::open(&dest).unwrap();
        assert_eq!(file.dataset("scan_id").unwrap().read_scalar::<i64>().unwrap(), 7);
        let pxl: VarLenUnicode = file.dataset("Pixel Size").unwrap().read_scalar().unwrap();
        assert_eq!(pxl.as_str(), "21.5nm");
        assert_eq!(file.dataset("img_tomo").unwrap().shape(), vec![2, 3, 4]);
        let temp = file.group("lakeshore").unwrap().dataset("A").unwrap();
        assert_eq!(temp.read_scalar::<f64>().unwrap(), 77.5);
    }

    #[test]
    fn uncommitted_archive_leaves_no_file() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("partial.h5");
        let mut sink = Hdf5ArchiveFactory.create(&dest).unwrap();
        sink.put("scan_id", Dataset::Int(1)).unwrap();
        drop(sink);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
