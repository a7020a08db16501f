//! Data streams of a run: detector image events and scalar tables.

use crate::error::{ExportError, ExportResult};
use ndarray::{s, Array4, ArrayView3};
use std::collections::BTreeMap;

/// Ordered detector events of one image field.
///
/// Frames are stored as `(events, frames_per_event, rows, cols)`.
#[derive(Debug, Clone)]
pub struct ImageStream {
    frames: Array4<u16>,
    timestamps: Option<Vec<f64>>,
}

impl ImageStream {
    /// Wrap a frame array with optional per-frame detector timestamps.
    ///
    /// Timestamps, when present, must hold one value per frame in
    /// event-major order.
    pub fn new(frames: Array4<u16>, timestamps: Option<Vec<f64>>) -> ExportResult<Self> {
        if let Some(ts) = &timestamps {
            let expected = frames.shape()[0] * frames.shape()[1];
            if ts.len() != expected {
                return Err(ExportError::ShapeMismatch(format!(
                    "{} detector timestamps for {expected} frames",
                    ts.len()
                )));
            }
        }
        Ok(Self { frames, timestamps })
    }

    /// Build from a flat buffer in `(events, frames, rows, cols)` order.
    pub fn from_shape_vec(
        shape: [usize; 4],
        data: Vec<u16>,
        timestamps: Option<Vec<f64>>,
    ) -> ExportResult<Self> {
        let frames = Array4::from_shape_vec(shape, data)
            .map_err(|e| ExportError::ShapeMismatch(format!("image stream {shape:?}: {e}")))?;
        Self::new(frames, timestamps)
    }

    /// All frames, `(events, frames_per_event, rows, cols)`.
    pub fn frames(&self) -> &Array4<u16> {
        &self.frames
    }

    /// Number of events.
    pub fn events(&self) -> usize {
        self.frames.shape()[0]
    }

    /// Frames recorded per event.
    pub fn frames_per_event(&self) -> usize {
        self.frames.shape()[1]
    }

    /// Frame height.
    pub fn rows(&self) -> usize {
        self.frames.shape()[2]
    }

    /// Frame width.
    pub fn cols(&self) -> usize {
        self.frames.shape()[3]
    }

    /// Frames of a single event, `(frames_per_event, rows, cols)`.
    pub fn event(&self, index: usize) -> ExportResult<ArrayView3<'_, u16>> {
        if index >= self.events() {
            return Err(ExportError::ShapeMismatch(format!(
                "event {index} requested from a stream of {} events",
                self.events()
            )));
        }
        Ok(self.frames.slice(s![index, .., .., ..]))
    }

    /// Events in `range`, flattened into one frame stack.
    pub fn flatten_events(
        &self,
        range: std::ops::Range<usize>,
    ) -> ExportResult<ArrayView3<'_, u16>> {
        if range.start > range.end || range.end > self.events() {
            return Err(ExportError::ShapeMismatch(format!(
                "events {range:?} requested from a stream of {} events",
                self.events()
            )));
        }
        let count = (range.end - range.start) * self.frames_per_event();
        let shape = (count, self.rows(), self.cols());
        self.frames
            .slice(s![range, .., .., ..])
            .into_shape_with_order(shape)
            .map_err(|e| ExportError::ShapeMismatch(format!("flattening events: {e}")))
    }

    /// Every frame of the stream as one stack, `(events * frames, rows, cols)`.
    pub fn flatten(&self) -> ExportResult<ArrayView3<'_, u16>> {
        self.flatten_events(0..self.events())
    }

    /// Raw detector timestamps, one per frame.
    pub fn timestamps(&self) -> Option<&[f64]> {
        self.timestamps.as_deref()
    }
}

/// Scalar stream: a `time` column plus named numeric columns.
#[derive(Debug, Clone, Default)]
pub struct Table {
    stream: String,
    time: Vec<f64>,
    columns: BTreeMap<String, Vec<f64>>,
}

impl Table {
    /// Build a table; every column must match the `time` column length.
    pub fn new(
        stream: impl Into<String>,
        time: Vec<f64>,
        columns: BTreeMap<String, Vec<f64>>,
    ) -> ExportResult<Self> {
        let stream = stream.into();
        for (name, values) in &columns {
            if values.len() != time.len() {
                return Err(ExportError::ShapeMismatch(format!(
                    "column '{name}' of stream '{stream}' has {} rows, time has {}",
                    values.len(),
                    time.len()
                )));
            }
        }
        Ok(Self {
            stream,
            time,
            columns,
        })
    }

    /// Stream this table was read from.
    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Row timestamps, Unix seconds.
    pub fn time(&self) -> &[f64] {
        &self.time
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.time.len()
    }

    /// True when the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    /// Column names in sorted order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// Values of a named column.
    pub fn column(&self, name: &str) -> ExportResult<&[f64]> {
        self.columns
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| ExportError::FieldNotFound {
                stream: self.stream.clone(),
                field: name.to_string(),
            })
    }

    /// First row of a named column.
    pub fn first(&self, name: &str) -> ExportResult<f64> {
        self.column(name)?.first().copied().ok_or_else(|| {
            ExportError::ShapeMismatch(format!(
                "column '{name}' of stream '{}' is empty",
                self.stream
            ))
        })
    }
}
