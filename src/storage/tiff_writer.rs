//! Single-page grayscale TIFF output.
//!
//! 16-bit detector counts go through the `image` crate's TIFF encoder;
//! 32-bit float rasters (normalized tiles, binned mosaics) through the `tiff`
//! crate, which supports floating-point samples. Both are written atomically.

use super::atomic::write_atomic;
use crate::error::{ExportError, ExportResult};
use ndarray::ArrayView2;
use std::path::{Path, PathBuf};
use tiff::encoder::{colortype, TiffEncoder};

/// TIFF export for 2D rasters.
pub struct TiffWriter;

impl TiffWriter {
    /// Write a 16-bit grayscale TIFF.
    pub fn write_u16<P: AsRef<Path>>(raster: ArrayView2<'_, u16>, path: P) -> ExportResult<PathBuf> {
        let path = path.as_ref();
        let (width, height) = dimensions(&raster.dim())?;
        let bytes: Vec<u8> = raster.iter().flat_map(|v| v.to_ne_bytes()).collect();

        let written = write_atomic(path, |out| {
            let encoder = image::codecs::tiff::TiffEncoder::new(out);
            encoder.encode(&bytes, width, height, image::ExtendedColorType::L16)?;
            Ok(())
        })?;

        tracing::debug!(
            path = ?written,
            dimensions = format!("{}x{}", width, height),
            bit_depth = 16,
            "Wrote 16-bit TIFF"
        );
        Ok(written)
    }

    /// Write a 32-bit float grayscale TIFF.
    pub fn write_f32<P: AsRef<Path>>(raster: ArrayView2<'_, f32>, path: P) -> ExportResult<PathBuf> {
        let path = path.as_ref();
        let (width, height) = dimensions(&raster.dim())?;
        let samples: Vec<f32> = raster.iter().copied().collect();

        let written = write_atomic(path, |out| {
            TiffEncoder::new(out)?.write_image::<colortype::Gray32Float>(width, height, &samples)?;
            Ok(())
        })?;

        tracing::debug!(
            path = ?written,
            dimensions = format!("{}x{}", width, height),
            bit_depth = 32,
            "Wrote float TIFF"
        );
        Ok(written)
    }
}

fn dimensions(&(rows, cols): &(usize, usize)) -> ExportResult<(u32, u32)> {
    if rows == 0 || cols == 0 {
        return Err(ExportError::ShapeMismatch(format!(
            "cannot write an empty {rows}x{cols} raster"
        )));
    }
    let width = u32::try_from(cols)
        .map_err(|_| ExportError::ShapeMismatch(format!("raster width {cols} too large")))?;
    let height = u32::try_from(rows)
        .map_err(|_| ExportError::ShapeMismatch(format!("raster height {rows} too large")))?;
    Ok((width, height))
}
