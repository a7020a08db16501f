//! Values and plumbing shared by the exporters.

use super::{enrich, ExportContext, ExportReport};
use crate::align::{align_timestamps, catalog_timestamps, detector_timestamps, ensure_single_sweep, AlignedAngles};
use crate::catalog::{ImageStream, Table};
use crate::error::{ExportError, ExportResult};
use crate::storage::ArchiveSink;
use std::ops::Range;
use std::path::PathBuf;

/// Image field recorded by the area detector.
pub const DETECTOR_FIELD: &str = "Andor_image";

/// Stream holding the beamline snapshot taken around each run.
pub const BASELINE_STREAM: &str = "baseline";

/// Detector pixel pitch in nanometres.
const DETECTOR_PIXEL_NM: f64 = 6500.0;

/// Whether an archive gets temperature-controller readings appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lakeshore {
    /// Attach readings; failure becomes a report warning.
    Attach,
    /// Leave the archive as written.
    Skip,
}

/// Zone plate optics derived from the baseline snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Optics {
    /// Objective magnification.
    pub magnification: f64,
    /// Effective pixel size in nanometres.
    pub pixel_size: f64,
}

impl Optics {
    /// `M = (DetU_z / zp_z - 1) * 10`, pixel size `6500 / M`.
    pub fn from_positions(zp_z: f64, det_u_z: f64) -> ExportResult<Self> {
        let magnification = (det_u_z / zp_z - 1.0) * 10.0;
        let pixel_size = DETECTOR_PIXEL_NM / magnification;
        if !magnification.is_finite() || !pixel_size.is_finite() {
            return Err(ExportError::ShapeMismatch(format!(
                "cannot derive magnification from zp_z={zp_z}, DetU_z={det_u_z}"
            )));
        }
        Ok(Self {
            magnification,
            pixel_size,
        })
    }

    /// Read `zp_z` and `DetU_z` from the first baseline row.
    pub fn from_baseline(baseline: &Table) -> ExportResult<Self> {
        Self::from_positions(baseline.first("zp_z")?, baseline.first("DetU_z")?)
    }

    /// Pixel size label, e.g. `21.666666666666668nm`.
    pub fn pixel_size_label(&self) -> String {
        format!("{}nm", python_float(self.pixel_size))
    }

    /// Write `Magnification` and `Pixel Size`.
    pub fn put(&self, sink: &mut dyn ArchiveSink) -> ExportResult<()> {
        sink.put("Magnification", self.magnification.into())?;
        sink.put("Pixel Size", self.pixel_size_label().as_str().into())
    }
}

/// Sample stage position at the start of the run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InitialPositions {
    /// `zps_sx`
    pub x: f64,
    /// `zps_sy`
    pub y: f64,
    /// `zps_sz`
    pub z: f64,
    /// `zps_pi_r`
    pub r: f64,
}

impl InitialPositions {
    /// Read the stage motors from the first baseline row.
    pub fn from_baseline(baseline: &Table) -> ExportResult<Self> {
        Ok(Self {
            x: baseline.first("zps_sx")?,
            y: baseline.first("zps_sy")?,
            z: baseline.first("zps_sz")?,
            r: baseline.first("zps_pi_r")?,
        })
    }

    /// Write `x_ini`, `y_ini`, `z_ini`, `r_ini`.
    pub fn put(&self, sink: &mut dyn ArchiveSink) -> ExportResult<()> {
        sink.put("x_ini", self.x.into())?;
        sink.put("y_ini", self.y.into())?;
        sink.put("z_ini", self.z.into())?;
        sink.put("r_ini", self.r.into())
    }
}

/// Format a float the way Python's `str(float)` does.
///
/// Shortest round-trip digits, a trailing `.0` on integral values, and
/// scientific notation outside `[1e-4, 1e16)`.
pub fn python_float(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if value == 0.0 {
        return if value.is_sign_negative() { "-0.0" } else { "0.0" }.to_string();
    }

    let magnitude = value.abs();
    if (1e-4..1e16).contains(&magnitude) {
        let text = format!("{value}");
        if text.contains('.') {
            text
        } else {
            format!("{text}.0")
        }
    } else {
        let text = format!("{value:e}");
        match text.split_once('e') {
            Some((mantissa, exponent)) => {
                let (sign, digits) = match exponent.strip_prefix('-') {
                    Some(digits) => ('-', digits),
                    None => ('+', exponent),
                };
                format!("{mantissa}e{sign}{digits:0>2}")
            }
            None => text,
        }
    }
}

/// Number of grid steps in an inclusive `[start, end]` range of unit steps.
pub fn grid_extent(range: &[f64], key: &str) -> ExportResult<usize> {
    match range {
        [first, last, ..] => {
            let count = (last - first + 1.0).round();
            if count >= 1.0 {
                Ok(count as usize)
            } else {
                Err(ExportError::ShapeMismatch(format!(
                    "{key} [{first}, {last}] describes an empty grid"
                )))
            }
        }
        _ => Err(ExportError::FieldType {
            key: key.to_string(),
            expected: "two-element range",
        }),
    }
}

impl ExportContext<'_> {
    /// Images of the detector field in `stream`.
    pub fn detector(&self, stream: &str) -> ExportResult<ImageStream> {
        self.scan.images(stream, DETECTOR_FIELD)
    }

    /// The baseline snapshot table.
    pub fn baseline(&self) -> ExportResult<Table> {
        self.scan.table(BASELINE_STREAM)
    }

    /// Optics derived from the baseline snapshot.
    pub fn optics(&self) -> ExportResult<Optics> {
        Optics::from_baseline(&self.baseline()?)
    }

    /// Path under the configured output directory.
    pub fn output_path(&self, relative: impl AsRef<std::path::Path>) -> PathBuf {
        self.settings.export.output_dir.join(relative)
    }

    /// Detector timestamps of the frames in `frames`, flattened frame order.
    pub fn frame_timestamps<'s>(
        &self,
        images: &'s ImageStream,
        stream: &str,
        frames: Range<usize>,
    ) -> ExportResult<&'s [f64]> {
        let timestamps = images.timestamps().ok_or_else(|| ExportError::FieldNotFound {
            stream: stream.to_string(),
            field: format!("{DETECTOR_FIELD} timestamps"),
        })?;
        timestamps.get(frames.clone()).ok_or_else(|| {
            ExportError::ShapeMismatch(format!(
                "frames {frames:?} requested from {} timestamps",
                timestamps.len()
            ))
        })
    }

    /// Interpolate rotation angles for frames acquired at raw detector times.
    pub fn align_frames(&self, frame_timestamps: &[f64]) -> ExportResult<AlignedAngles> {
        let alignment = &self.settings.alignment;
        let tz = self.settings.time_zone()?;

        let motor = self.scan.table(&alignment.motor_stream)?;
        let positions = motor.column(&alignment.motor_column)?;
        let motor_times = catalog_timestamps(motor.time(), tz)?;
        let frame_times = detector_timestamps(frame_timestamps, tz)?;

        let aligned = align_timestamps(&frame_times, &motor_times, positions)?;
        if alignment.reject_non_monotonic {
            ensure_single_sweep(&aligned, alignment.sweep_tolerance)?;
        }
        Ok(aligned)
    }

    /// Create an archive at `relative`, fill it, optionally attach
    /// temperature readings, and commit it.
    ///
    /// Nothing is left at the destination when `fill` fails.
    pub fn write_archive<F>(
        &self,
        report: &mut ExportReport,
        relative: impl AsRef<std::path::Path>,
        lakeshore: Lakeshore,
        fill: F,
    ) -> ExportResult<PathBuf>
    where
        F: FnOnce(&mut dyn ArchiveSink) -> ExportResult<()>,
    {
        let path = self.output_path(relative);
        let mut sink = self.archives.create(&path)?;
        fill(sink.as_mut())?;

        if lakeshore == Lakeshore::Attach && self.settings.lakeshore.enabled {
            if let Err(e) = enrich::attach_lakeshore(self.scan, &self.settings.lakeshore, sink.as_mut()) {
                if !e.is_enrichment() {
                    return Err(e);
                }
                tracing::warn!(path = ?path, error = %e, "Failed to attach lakeshore readings");
                report.warn(format!("fails to write lakeshore info into {}: {e}", path.display()));
            }
        }

        let written = sink.commit()?;
        report.outputs.push(written.clone());
        Ok(written)
    }

    /// Record a file written outside an archive sink.
    pub fn record_output(&self, report: &mut ExportReport, path: PathBuf) {
        report.outputs.push(path);
    }
}
