//! Archive output.
//!
//! Exporters write named datasets into an [`ArchiveSink`] obtained from an
//! [`ArchiveFactory`]. A sink only becomes visible at its final path when
//! [`ArchiveSink::commit`] succeeds; dropping it earlier discards everything
//! written so far.
//!
//! Backends:
//!
//! - `hdf5` (feature `storage_hdf5`): [`Hdf5ArchiveFactory`], one HDF5 file per
//!   archive.
//! - `memory`: [`MemoryArchiveFactory`], keeps committed archives in memory for
//!   inspection.
//!
//! Rasters and coordinate tables do not go through a sink; they are written
//! with [`tiff_writer`] and [`atomic::write_text`].

pub mod atomic;
#[cfg(feature = "storage_hdf5")]
pub mod hdf5_archive;
pub mod memory;
pub mod tiff_writer;

#[cfg(feature = "storage_hdf5")]
pub use hdf5_archive::Hdf5ArchiveFactory;
pub use memory::{MemoryArchive, MemoryArchiveFactory};

use crate::error::{ExportError, ExportResult};
use ndarray::{ArrayD, ArrayViewD};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Value written under a dataset name.
#[derive(Debug, Clone)]
pub enum Dataset<'a> {
    /// Variable-length UTF-8 string scalar.
    Str(&'a str),
    /// Integer scalar.
    Int(i64),
    /// Float scalar.
    Float(f64),
    /// One-dimensional float array.
    Floats(&'a [f64]),
    /// `u16` array of any rank.
    U16(ArrayViewD<'a, u16>),
    /// `f32` array of any rank.
    F32(ArrayViewD<'a, f32>),
}

impl<'a> From<&'a str> for Dataset<'a> {
    fn from(value: &'a str) -> Self {
        Dataset::Str(value)
    }
}

impl<'a> From<&'a String> for Dataset<'a> {
    fn from(value: &'a String) -> Self {
        Dataset::Str(value)
    }
}

impl From<i64> for Dataset<'_> {
    fn from(value: i64) -> Self {
        Dataset::Int(value)
    }
}

impl From<f64> for Dataset<'_> {
    fn from(value: f64) -> Self {
        Dataset::Float(value)
    }
}

impl<'a> From<&'a [f64]> for Dataset<'a> {
    fn from(value: &'a [f64]) -> Self {
        Dataset::Floats(value)
    }
}

impl<'a> From<&'a Vec<f64>> for Dataset<'a> {
    fn from(value: &'a Vec<f64>) -> Self {
        Dataset::Floats(value)
    }
}

impl<'a, D: ndarray::Dimension> From<ndarray::ArrayView<'a, u16, D>> for Dataset<'a> {
    fn from(value: ndarray::ArrayView<'a, u16, D>) -> Self {
        Dataset::U16(value.into_dyn())
    }
}

impl<'a, D: ndarray::Dimension> From<ndarray::ArrayView<'a, f32, D>> for Dataset<'a> {
    fn from(value: ndarray::ArrayView<'a, f32, D>) -> Self {
        Dataset::F32(value.into_dyn())
    }
}

impl Dataset<'_> {
    /// Owned copy of the value.
    pub fn to_stored(&self) -> StoredDataset {
        match self {
            Dataset::Str(s) => StoredDataset::Str((*s).to_string()),
            Dataset::Int(i) => StoredDataset::Int(*i),
            Dataset::Float(f) => StoredDataset::Float(*f),
            Dataset::Floats(v) => StoredDataset::Floats(v.to_vec()),
            Dataset::U16(a) => StoredDataset::U16(a.to_owned()),
            Dataset::F32(a) => StoredDataset::F32(a.to_owned()),
        }
    }

    /// Array shape; scalars have an empty shape.
    pub fn shape(&self) -> Vec<usize> {
        match self {
            Dataset::Str(_) | Dataset::Int(_) | Dataset::Float(_) => Vec::new(),
            Dataset::Floats(v) => vec![v.len()],
            Dataset::U16(a) => a.shape().to_vec(),
            Dataset::F32(a) => a.shape().to_vec(),
        }
    }
}

/// Owned dataset value, as kept by in-memory archives.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredDataset {
    /// String scalar.
    Str(String),
    /// Integer scalar.
    Int(i64),
    /// Float scalar.
    Float(f64),
    /// One-dimensional float array.
    Floats(Vec<f64>),
    /// `u16` array.
    U16(ArrayD<u16>),
    /// `f32` array.
    F32(ArrayD<f32>),
}

impl StoredDataset {
    /// String value, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            StoredDataset::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Integer value, if this is an integer.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            StoredDataset::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Float value, if this is a float scalar.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            StoredDataset::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Float list, if this is a float list.
    pub fn as_floats(&self) -> Option<&[f64]> {
        match self {
            StoredDataset::Floats(v) => Some(v),
            _ => None,
        }
    }

    /// `u16` array, if this is one.
    pub fn as_u16(&self) -> Option<&ArrayD<u16>> {
        match self {
            StoredDataset::U16(a) => Some(a),
            _ => None,
        }
    }

    /// `f32` array, if this is one.
    pub fn as_f32(&self) -> Option<&ArrayD<f32>> {
        match self {
            StoredDataset::F32(a) => Some(a),
            _ => None,
        }
    }

    /// Array shape; scalars have an empty shape.
    pub fn shape(&self) -> Vec<usize> {
        match self {
            StoredDataset::Str(_) | StoredDataset::Int(_) | StoredDataset::Float(_) => Vec::new(),
            StoredDataset::Floats(v) => vec![v.len()],
            StoredDataset::U16(a) => a.shape().to_vec(),
            StoredDataset::F32(a) => a.shape().to_vec(),
        }
    }
}

/// An archive being written.
pub trait ArchiveSink {
    /// Final path of the archive.
    fn path(&self) -> &Path;

    /// Write a dataset. Names containing `/` create intermediate groups.
    fn put(&mut self, name: &str, data: Dataset<'_>) -> ExportResult<()>;

    /// Close the archive and move it to its final path.
    fn commit(self: Box<Self>) -> ExportResult<PathBuf>;
}

/// Creates archives.
pub trait ArchiveFactory {
    /// Backend identifier, e.g. `hdf5`.
    fn name(&self) -> &'static str;

    /// Start a new archive that will land at `path` on commit.
    fn create(&self, path: &Path) -> ExportResult<Box<dyn ArchiveSink>>;
}

type FactoryCtor = Box<dyn Fn() -> Box<dyn ArchiveFactory> + Send + Sync>;

/// Registry of archive backends keyed by name.
///
/// Backends are registered based on enabled Cargo features:
/// - `storage_hdf5` → `hdf5`
///
/// `memory` is always available.
pub struct ArchiveRegistry {
    factories: HashMap<String, FactoryCtor>,
}

impl Default for ArchiveRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiveRegistry {
    /// Registry with every backend compiled into this build.
    pub fn new() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };

        #[cfg(feature = "storage_hdf5")]
        registry.register("hdf5", || Box::new(Hdf5ArchiveFactory));

        registry.register("memory", || Box::new(MemoryArchiveFactory::new()));

        registry
    }

    /// Register a custom backend.
    pub fn register<F>(&mut self, name: &str, ctor: F)
    where
        F: Fn() -> Box<dyn ArchiveFactory> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Box::new(ctor));
    }

    /// Instantiate the backend called `name`.
    pub fn create(&self, name: &str) -> ExportResult<Box<dyn ArchiveFactory>> {
        if let Some(ctor) = self.factories.get(name) {
            return Ok(ctor());
        }
        if name == "hdf5" {
            return Err(ExportError::FeatureNotEnabled("storage_hdf5".to_string()));
        }
        Err(ExportError::Configuration(format!(
            "Unknown archive format '{name}'. Available: {}",
            self.list_formats().join(", ")
        )))
    }

    /// Registered backend names, sorted.
    pub fn list_formats(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Whether `name` is registered.
    pub fn is_available(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}
