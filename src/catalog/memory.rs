//! In-memory catalog.

use super::{select_run, Catalog, ImageStream, ScanRef, ScanSource, StartDoc, Table};
use crate::error::{ExportError, ExportResult};
use std::collections::{BTreeMap, BTreeSet};

/// A run held entirely in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryScan {
    pub(super) start: StartDoc,
    pub(super) images: BTreeMap<(String, String), ImageStream>,
    pub(super) tables: BTreeMap<String, Table>,
}

impl MemoryScan {
    /// Empty run with the given start document.
    pub fn new(start: StartDoc) -> Self {
        Self {
            start,
            ..Default::default()
        }
    }

    /// Attach image events of `field` under `stream`.
    pub fn with_images(mut self, stream: &str, field: &str, images: ImageStream) -> Self {
        self.images
            .insert((stream.to_string(), field.to_string()), images);
        self
    }

    /// Attach a scalar table under its stream name.
    pub fn with_table(mut self, table: Table) -> Self {
        self.tables.insert(table.stream().to_string(), table);
        self
    }
}

impl ScanSource for MemoryScan {
    fn start(&self) -> &StartDoc {
        &self.start
    }

    fn stream_names(&self) -> Vec<String> {
        let names: BTreeSet<&String> = self
            .images
            .keys()
            .map(|(stream, _)| stream)
            .chain(self.tables.keys())
            .collect();
        names.into_iter().cloned().collect()
    }

    fn images(&self, stream: &str, field: &str) -> ExportResult<ImageStream> {
        if let Some(images) = self.images.get(&(stream.to_string(), field.to_string())) {
            return Ok(images.clone());
        }
        if self.has_stream(stream) {
            Err(ExportError::FieldNotFound {
                stream: stream.to_string(),
                field: field.to_string(),
            })
        } else {
            Err(ExportError::StreamNotFound {
                stream: stream.to_string(),
            })
        }
    }

    fn table(&self, stream: &str) -> ExportResult<Table> {
        self.tables
            .get(stream)
            .cloned()
            .ok_or_else(|| ExportError::StreamNotFound {
                stream: stream.to_string(),
            })
    }
}

/// Catalog of in-memory runs, kept ordered by start time.
#[derive(Debug, Clone, Default)]
pub struct MemoryCatalog {
    runs: Vec<MemoryScan>,
}

impl MemoryCatalog {
    /// Empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a run.
    pub fn insert(&mut self, scan: MemoryScan) {
        let time = scan.start.time().unwrap_or(f64::NEG_INFINITY);
        let at = self
            .runs
            .partition_point(|r| r.start.time().unwrap_or(f64::NEG_INFINITY) <= time);
        self.runs.insert(at, scan);
    }

    /// Builder form of [`MemoryCatalog::insert`].
    pub fn with_scan(mut self, scan: MemoryScan) -> Self {
        self.insert(scan);
        self
    }
}

impl Catalog for MemoryCatalog {
    fn resolve(&self, scan: &ScanRef) -> ExportResult<Box<dyn ScanSource + '_>> {
        let starts: Vec<StartDoc> = self.runs.iter().map(|r| r.start.clone()).collect();
        let index = select_run(&starts, scan)?;
        Ok(Box::new(&self.runs[index]))
    }

    fn starts(&self) -> ExportResult<Vec<StartDoc>> {
        Ok(self.runs.iter().map(|r| r.start.clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(scan_id: i64, time: f64) -> MemoryScan {
        let start = StartDoc::default()
            .with_field("uid", format!("uid-{scan_id}"))
            .with_field("scan_id", scan_id)
            .with_field("time", time);
        let images = ImageStream::from_shape_vec([1, 1, 1, 1], vec![7], None).unwrap();
        MemoryScan::new(start)
            .with_images("primary", "Andor_image", images)
            .with_table(Table::new("baseline", vec![time], BTreeMap::new()).unwrap())
    }

    #[test]
    fn resolves_latest_by_time_not_insertion() {
        let catalog = MemoryCatalog::new().with_scan(run(2, 20.0)).with_scan(run(1, 10.0));
        let latest = catalog.resolve(&ScanRef::latest()).unwrap();
        assert_eq!(latest.start().scan_id().unwrap(), 2);
        assert_eq!(catalog.starts().unwrap().len(), 2);
    }

    #[test]
    fn stream_lookup_errors_are_specific() {
        let scan = run(1, 1.0);
        assert_eq!(scan.stream_names(), vec!["baseline", "primary"]);
        assert!(matches!(
            scan.images("primary", "detA1_image"),
            Err(ExportError::FieldNotFound { .. })
        ));
        assert!(matches!(
            scan.images("dark", "Andor_image"),
            Err(ExportError::StreamNotFound { .. })
        ));
        assert!(scan.table("zps_pi_r_monitor").is_err());
    }
}
