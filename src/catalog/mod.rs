//! Access to catalogued runs.
//!
//! A [`Catalog`] resolves a [`ScanRef`] into a [`ScanSource`], which exposes the
//! run's start document and its named data streams. Exporters receive the
//! source explicitly and never reach for a process-wide handle.
//!
//! Two implementations ship with the crate:
//!
//! - [`DirectoryCatalog`]: runs laid out on disk, one directory per run.
//! - [`MemoryCatalog`]: runs assembled in memory.

pub mod directory;
pub mod document;
pub mod memory;
pub mod stream;

pub use directory::DirectoryCatalog;
pub use document::StartDoc;
pub use memory::{MemoryCatalog, MemoryScan};
pub use stream::{ImageStream, Table};

use crate::error::{ExportError, ExportResult};
use std::fmt;
use std::str::FromStr;

/// Reference to a run inside a catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanRef {
    /// The n-th most recent run, 1-based (`-1` is the latest).
    Recent(usize),
    /// Scan number; the most recent run carrying it wins.
    ScanId(i64),
    /// Prefix of the run uid.
    Uid(String),
}

impl ScanRef {
    /// The most recent run.
    pub fn latest() -> Self {
        ScanRef::Recent(1)
    }
}

impl FromStr for ScanRef {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ExportError::ScanNotFound("empty scan reference".into()));
        }
        match s.parse::<i64>() {
            Ok(n) if n < 0 => Ok(ScanRef::Recent(n.unsigned_abs() as usize)),
            Ok(0) => Err(ExportError::ScanNotFound("scan reference 0".into())),
            Ok(n) => Ok(ScanRef::ScanId(n)),
            Err(_) => Ok(ScanRef::Uid(s.to_string())),
        }
    }
}

impl fmt::Display for ScanRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanRef::Recent(n) => write!(f, "-{n}"),
            ScanRef::ScanId(id) => write!(f, "{id}"),
            ScanRef::Uid(uid) => write!(f, "{uid}"),
        }
    }
}

/// One run: start document plus data streams.
pub trait ScanSource {
    /// Start document of the run.
    fn start(&self) -> &StartDoc;

    /// Names of the streams recorded for the run.
    fn stream_names(&self) -> Vec<String>;

    /// Image events of `field` in `stream`.
    fn images(&self, stream: &str, field: &str) -> ExportResult<ImageStream>;

    /// Scalar table recorded as `stream`.
    fn table(&self, stream: &str) -> ExportResult<Table>;

    /// Whether the run recorded `stream`.
    fn has_stream(&self, stream: &str) -> bool {
        self.stream_names().iter().any(|name| name == stream)
    }
}

impl<T: ScanSource + ?Sized> ScanSource for &T {
    fn start(&self) -> &StartDoc {
        (**self).start()
    }

    fn stream_names(&self) -> Vec<String> {
        (**self).stream_names()
    }

    fn images(&self, stream: &str, field: &str) -> ExportResult<ImageStream> {
        (**self).images(stream, field)
    }

    fn table(&self, stream: &str) -> ExportResult<Table> {
        (**self).table(stream)
    }
}

/// Collection of runs.
pub trait Catalog {
    /// Resolve a reference to a run.
    fn resolve(&self, scan: &ScanRef) -> ExportResult<Box<dyn ScanSource + '_>>;

    /// Start documents of every run, oldest first.
    fn starts(&self) -> ExportResult<Vec<StartDoc>>;
}

/// Pick the run matching `scan` from start documents ordered oldest first.
///
/// Returns the index into `starts`.
pub fn select_run(starts: &[StartDoc], scan: &ScanRef) -> ExportResult<usize> {
    let found = match scan {
        ScanRef::Recent(n) => starts.len().checked_sub(*n),
        ScanRef::ScanId(id) => starts
            .iter()
            .rposition(|doc| doc.scan_id().ok() == Some(*id)),
        ScanRef::Uid(prefix) => starts
            .iter()
            .rposition(|doc| doc.uid().is_ok_and(|uid| uid.starts_with(prefix.as_str()))),
    };
    found.ok_or_else(|| ExportError::ScanNotFound(scan.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(uid: &str, scan_id: i64, time: f64) -> StartDoc {
        StartDoc::default()
            .with_field("uid", uid)
            .with_field("scan_id", scan_id)
            .with_field("time", time)
    }

    #[test]
    fn parse_scan_refs() {
        assert_eq!("-1".parse::<ScanRef>().unwrap(), ScanRef::latest());
        assert_eq!("-3".parse::<ScanRef>().unwrap(), ScanRef::Recent(3));
        assert_eq!("1042".parse::<ScanRef>().unwrap(), ScanRef::ScanId(1042));
        assert_eq!(
            "8f3a".parse::<ScanRef>().unwrap(),
            ScanRef::Uid("8f3a".to_string())
        );
        assert!("0".parse::<ScanRef>().is_err());
        assert!("  ".parse::<ScanRef>().is_err());
    }

    #[test]
    fn select_by_each_reference_kind() {
        let starts = vec![doc("aaa1", 10, 1.0), doc("bbb2", 11, 2.0), doc("ccc3", 10, 3.0)];

        assert_eq!(select_run(&starts, &ScanRef::latest()).unwrap(), 2);
        assert_eq!(select_run(&starts, &ScanRef::Recent(3)).unwrap(), 0);
        assert!(select_run(&starts, &ScanRef::Recent(4)).is_err());

        // repeated scan ids resolve to the most recent run
        assert_eq!(select_run(&starts, &ScanRef::ScanId(10)).unwrap(), 2);
        assert_eq!(select_run(&starts, &ScanRef::Uid("bb".into())).unwrap(), 1);
        assert!(matches!(
            select_run(&starts, &ScanRef::ScanId(99)),
            Err(ExportError::ScanNotFound(s)) if s == "99"
        ));
    }
}
