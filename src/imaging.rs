//! Array transforms used by the exporters.
//!
//! All arithmetic happens in `f32`. Reductions follow the usual conventions of
//! scientific array libraries: the median of an even count averages the two
//! middle values, and normalization replaces NaN and infinite results with 0
//! (flat equal to dark produces a division by zero on dead pixels).

use crate::error::{ExportError, ExportResult};
use ndarray::{s, Array, Array2, ArrayView, ArrayView2, ArrayView3, Axis, Dimension, RemoveAxis, Zip};
use std::ops::Range;

/// Convert detector counts to `f32`.
pub fn to_f32<D: Dimension>(frames: ArrayView<'_, u16, D>) -> Array<f32, D> {
    frames.mapv(f32::from)
}

/// Mean along `axis`.
pub fn mean_axis<D: Dimension + RemoveAxis>(
    a: ArrayView<'_, f32, D>,
    axis: usize,
) -> ExportResult<Array<f32, D::Smaller>> {
    check_axis(a.shape(), axis)?;
    a.mean_axis(Axis(axis))
        .ok_or_else(|| ExportError::ShapeMismatch(format!("mean over empty axis {axis}")))
}

/// Mean along `axis`, keeping it with length 1.
pub fn mean_keep<D: Dimension + RemoveAxis>(
    a: ArrayView<'_, f32, D>,
    axis: usize,
) -> ExportResult<Array<f32, D>> {
    let reduced = mean_axis(a, axis)?;
    into_kept_axis::<D>(reduced, axis)
}

/// Median along `axis`.
pub fn median_axis<D: Dimension + RemoveAxis>(
    a: ArrayView<'_, f32, D>,
    axis: usize,
) -> ExportResult<Array<f32, D::Smaller>> {
    check_axis(a.shape(), axis)?;
    if a.len_of(Axis(axis)) == 0 {
        return Err(ExportError::ShapeMismatch(format!(
            "median over empty axis {axis}"
        )));
    }
    Ok(a.map_axis(Axis(axis), |lane| {
        let mut values: Vec<f32> = lane.iter().copied().collect();
        median(&mut values)
    }))
}

/// Median along `axis`, keeping it with length 1.
pub fn median_keep<D: Dimension + RemoveAxis>(
    a: ArrayView<'_, f32, D>,
    axis: usize,
) -> ExportResult<Array<f32, D>> {
    let reduced = median_axis(a, axis)?;
    into_kept_axis::<D>(reduced, axis)
}

fn median(values: &mut [f32]) -> f32 {
    values.sort_by(f32::total_cmp);
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    }
}

fn check_axis(shape: &[usize], axis: usize) -> ExportResult<()> {
    if axis < shape.len() {
        Ok(())
    } else {
        Err(ExportError::ShapeMismatch(format!(
            "axis {axis} out of range for shape {shape:?}"
        )))
    }
}

fn into_kept_axis<D: Dimension + RemoveAxis>(
    reduced: Array<f32, D::Smaller>,
    axis: usize,
) -> ExportResult<Array<f32, D>> {
    reduced
        .insert_axis(Axis(axis))
        .into_dimensionality::<D>()
        .map_err(|e| ExportError::ShapeMismatch(format!("restoring axis {axis}: {e}")))
}

/// `(signal - dark) / (flat - dark)`.
///
/// `dark` and `flat` may have length 1 along any axis where `signal` is longer
/// and are broadcast. Non-finite results become 0.
pub fn normalize<D: Dimension>(
    signal: ArrayView<'_, f32, D>,
    dark: ArrayView<'_, f32, D>,
    flat: ArrayView<'_, f32, D>,
) -> ExportResult<Array<f32, D>> {
    let dark = broadcast_to(&dark, &signal, "dark")?;
    let flat = broadcast_to(&flat, &signal, "flat")?;
    let mut out = Array::<f32, D>::zeros(signal.raw_dim());
    Zip::from(&mut out)
        .and(&signal)
        .and(&dark)
        .and(&flat)
        .for_each(|o, &s, &d, &f| *o = finite_or_zero((s - d) / (f - d)));
    Ok(out)
}

/// `signal - dark` with broadcasting and non-finite results set to 0.
pub fn subtract_dark<D: Dimension>(
    signal: ArrayView<'_, f32, D>,
    dark: ArrayView<'_, f32, D>,
) -> ExportResult<Array<f32, D>> {
    let dark = broadcast_to(&dark, &signal, "dark")?;
    let mut out = Array::<f32, D>::zeros(signal.raw_dim());
    Zip::from(&mut out)
        .and(&signal)
        .and(&dark)
        .for_each(|o, &s, &d| *o = finite_or_zero(s - d));
    Ok(out)
}

fn broadcast_to<'a, D: Dimension>(
    reference: &'a ArrayView<'_, f32, D>,
    signal: &ArrayView<'_, f32, D>,
    name: &str,
) -> ExportResult<ArrayView<'a, f32, D>> {
    reference.broadcast(signal.raw_dim()).ok_or_else(|| {
        ExportError::ShapeMismatch(format!(
            "{name} shape {:?} does not broadcast to {:?}",
            reference.shape(),
            signal.shape()
        ))
    })
}

fn finite_or_zero(v: f32) -> f32 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}

/// `num` evenly spaced values from `start` to `stop` inclusive.
pub fn linspace(start: f64, stop: f64, num: usize) -> Vec<f64> {
    match num {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (num - 1) as f64;
            let mut values: Vec<f64> = (0..num).map(|i| start + i as f64 * step).collect();
            values[num - 1] = stop;
            values
        }
    }
}

/// Sum `factor x factor` blocks. Trailing rows and columns that do not fill a
/// whole block are dropped.
pub fn bin2d(image: ArrayView2<'_, f32>, factor: usize) -> ExportResult<Array2<f32>> {
    if factor == 0 {
        return Err(ExportError::Configuration(
            "binning factor must be at least 1".into(),
        ));
    }
    let (rows, cols) = image.dim();
    let (out_rows, out_cols) = (rows / factor, cols / factor);
    let mut out = Array2::<f32>::zeros((out_rows, out_cols));
    for ((r, c), value) in out.indexed_iter_mut() {
        *value = image
            .slice(s![r * factor..(r + 1) * factor, c * factor..(c + 1) * factor])
            .sum();
    }
    Ok(out)
}

/// Assemble `x_num * y_num` tiles into one image.
///
/// Tiles are ordered x-major: tile `i * y_num + j` covers row block `j` and
/// column block `i`.
pub fn mosaic(tiles: ArrayView3<'_, f32>, x_num: usize, y_num: usize) -> ExportResult<Array2<f32>> {
    let (count, height, width) = tiles.dim();
    if count != x_num * y_num {
        return Err(ExportError::ShapeMismatch(format!(
            "{count} tiles for a {x_num} x {y_num} mosaic"
        )));
    }
    let mut patch = Array2::<f32>::zeros((y_num * height, x_num * width));
    for i in 0..x_num {
        for j in 0..y_num {
            patch
                .slice_mut(s![j * height..(j + 1) * height, i * width..(i + 1) * width])
                .assign(&tiles.index_axis(Axis(0), i * y_num + j));
        }
    }
    Ok(patch)
}

/// Copy a rectangular region.
pub fn crop2d(
    image: ArrayView2<'_, f32>,
    rows: Range<usize>,
    cols: Range<usize>,
) -> ExportResult<Array2<f32>> {
    let (height, width) = image.dim();
    if rows.start > rows.end || rows.end > height || cols.start > cols.end || cols.end > width {
        return Err(ExportError::ShapeMismatch(format!(
            "crop {rows:?} x {cols:?} outside a {height} x {width} image"
        )));
    }
    Ok(image.slice(s![rows, cols]).to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array3};

    #[test]
    fn median_averages_middle_pair() {
        let a = array![[1.0f32, 10.0], [3.0, 20.0], [2.0, 40.0], [100.0, 30.0]];
        let m = median_axis(a.view(), 0).unwrap();
        assert_eq!(m, array![2.5f32, 25.0]);

        let kept = median_keep(a.view(), 0).unwrap();
        assert_eq!(kept.shape(), &[1, 2]);
    }

    #[test]
    fn mean_keeps_axis() {
        let a = Array3::<f32>::from_shape_fn((2, 2, 2), |(k, _, _)| k as f32);
        let m = mean_keep(a.view(), 0).unwrap();
        assert_eq!(m.shape(), &[1, 2, 2]);
        assert!(m.iter().all(|&v| v == 0.5));
        assert!(mean_axis(a.view(), 3).is_err());
    }

    #[test]
    fn normalize_broadcasts_and_zeroes_non_finite() {
        let signal = array![[[5.0f32, 2.0]], [[9.0, 2.0]]];
        let dark = array![[[1.0f32, 2.0]]];
        let flat = array![[[9.0f32, 2.0]]];
        let n = normalize(signal.view(), dark.view(), flat.view()).unwrap();
        assert_eq!(n, array![[[0.5f32, 0.0]], [[1.0, 0.0]]]);

        let wrong = array![[[1.0f32, 2.0, 3.0]]];
        assert!(normalize(signal.view(), wrong.view(), flat.view()).is_err());
    }

    #[test]
    fn linspace_matches_endpoints() {
        assert_eq!(linspace(0.0, 180.0, 3), vec![0.0, 90.0, 180.0]);
        assert_eq!(linspace(5.0, 9.0, 1), vec![5.0]);
        assert!(linspace(0.0, 1.0, 0).is_empty());
    }

    #[test]
    fn bin_sums_blocks_and_drops_remainder() {
        let a = Array2::<f32>::ones((5, 4));
        let b = bin2d(a.view(), 2).unwrap();
        assert_eq!(b.shape(), &[2, 2]);
        assert!(b.iter().all(|&v| v == 4.0));
        assert!(bin2d(a.view(), 0).is_err());
    }

    #[test]
    fn mosaic_places_tiles_x_major() {
        let tiles = Array3::<f32>::from_shape_fn((6, 1, 1), |(k, _, _)| k as f32);
        let patch = mosaic(tiles.view(), 3, 2).unwrap();
        // rows are y blocks, columns are x blocks
        assert_eq!(patch, array![[0.0f32, 2.0, 4.0], [1.0, 3.0, 5.0]]);
        assert!(mosaic(tiles.view(), 2, 2).is_err());
    }

    #[test]
    fn crop_checks_bounds() {
        let a = Array2::<f32>::from_shape_fn((4, 4), |(r, c)| (r * 4 + c) as f32);
        let c = crop2d(a.view(), 1..3, 2..4).unwrap();
        assert_eq!(c, array![[6.0f32, 7.0], [10.0, 11.0]]);
        assert!(crop2d(a.view(), 0..5, 0..1).is_err());
    }
}
