//! Temperature-controller readings appended to finished archives.
//!
//! Readings are optional: every failure here is reported as
//! [`ExportError::Enrichment`] so the caller can downgrade it to a warning.

use crate::catalog::ScanSource;
use crate::config::LakeshoreConfig;
use crate::error::{ExportError, ExportResult};
use crate::storage::ArchiveSink;

/// Group the readings are written under.
pub const LAKESHORE_GROUP: &str = "lakeshore";

/// Copy every column of the configured stream whose name starts with the
/// configured prefix into `lakeshore/<column>`.
pub fn attach_lakeshore(
    scan: &dyn ScanSource,
    config: &LakeshoreConfig,
    sink: &mut dyn ArchiveSink,
) -> ExportResult<usize> {
    let table = scan
        .table(&config.stream)
        .map_err(|e| ExportError::Enrichment(format!("stream '{}': {e}", config.stream)))?;

    let channels: Vec<(String, Vec<f64>)> = table
        .column_names()
        .filter(|name| name.starts_with(config.prefix.as_str()))
        .map(|name| {
            table
                .column(name)
                .map(|values| (name.to_string(), values.to_vec()))
        })
        .collect::<ExportResult<_>>()
        .map_err(|e| ExportError::Enrichment(e.to_string()))?;

    if channels.is_empty() {
        return Err(ExportError::Enrichment(format!(
            "no '{}*' columns in stream '{}'",
            config.prefix, config.stream
        )));
    }

    for (name, values) in &channels {
        sink.put(&format!("{LAKESHORE_GROUP}/{name}"), values.into())
            .map_err(|e| ExportError::Enrichment(format!("writing {name}: {e}")))?;
    }

    tracing::debug!(
        channels = channels.len(),
        path = ?sink.path(),
        "Attached lakeshore readings"
    );
    Ok(channels.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{MemoryScan, StartDoc, Table};
    use crate::storage::{ArchiveFactory, MemoryArchiveFactory, StoredDataset};
    use std::collections::BTreeMap;
    use std::path::Path;

    fn scan_with_baseline(columns: &[(&str, Vec<f64>)]) -> MemoryScan {
        let columns: BTreeMap<String, Vec<f64>> = columns
            .iter()
            .map(|(name, values)| (name.to_string(), values.clone()))
            .collect();
        let baseline = Table::new("baseline", vec![0.0, 1.0], columns).unwrap();
        MemoryScan::new(StartDoc::default()).with_table(baseline)
    }

    #[test]
    fn copies_prefixed_columns() {
        let scan = scan_with_baseline(&[
            ("lakeshore_A", vec![77.0, 78.0]),
            ("lakeshore_B", vec![4.0, 4.5]),
            ("zp_z", vec![1.0, 1.0]),
        ]);
        let factory = MemoryArchiveFactory::new();
        let mut sink = factory.create(Path::new("a.h5")).unwrap();

        let n = attach_lakeshore(&scan, &LakeshoreConfig::default(), sink.as_mut()).unwrap();
        assert_eq!(n, 2);
        sink.commit().unwrap();

        let archive = factory.archive(Path::new("a.h5")).unwrap();
        assert_eq!(
            archive.get("lakeshore/lakeshore_A").and_then(StoredDataset::as_floats),
            Some(&[77.0, 78.0][..])
        );
        assert!(!archive.contains("lakeshore/zp_z"));
    }

    #[test]
    fn missing_readings_are_enrichment_errors() {
        let factory = MemoryArchiveFactory::new();
        let mut sink = factory.create(Path::new("b.h5")).unwrap();

        let no_channels = scan_with_baseline(&[("zp_z", vec![1.0, 1.0])]);
        let err = attach_lakeshore(&no_channels, &LakeshoreConfig::default(), sink.as_mut())
            .unwrap_err();
        assert!(err.is_enrichment());

        let no_stream = MemoryScan::new(StartDoc::default());
        let err = attach_lakeshore(&no_stream, &LakeshoreConfig::default(), sink.as_mut())
            .unwrap_err();
        assert!(err.is_enrichment());
    }
}
