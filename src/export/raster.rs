//! Exporters for tiled raster scans.
//!
//! Tiles are written either one TIFF per tile (`grid2D_rel`,
//! `scan_change_expo_time`) or assembled into a binned mosaic with a
//! coordinate table (`raster_2D`, `raster_2D_2`).

use super::common::{grid_extent, Lakeshore};
use super::{ExportContext, ExportReport};
use crate::catalog::StartDoc;
use crate::error::{ExportError, ExportResult};
use crate::imaging::{bin2d, crop2d, linspace, mean_keep, median_axis, mosaic, normalize, to_f32};
use crate::storage::atomic::write_text;
use crate::storage::tiff_writer::TiffWriter;
use ndarray::{s, Array3, Axis};
use std::fmt::Write as _;
use std::fs;

/// Dark frames leading a `raster_2D_2` run.
const RASTER2_DARK_FRAMES: usize = 5;
/// Dark frames per exposure leading a `scan_change_expo_time` run.
const EXPO_DARK_FRAMES: usize = 5;
/// Frames per tile: one image per exposure, then five flats per exposure.
const EXPO_TILE_FRAMES: usize = 12;

/// `grid2D_rel`: one 16-bit TIFF per tile in `grid2D_rel_id_<id>/`.
pub fn export_grid2d_rel(ctx: &ExportContext<'_>, report: &mut ExportReport) -> ExportResult<()> {
    let start = ctx.start();
    let scan_id = start.scan_id()?;
    let num1 = start.count("plan_args.num1")?;
    let num2 = start.count("plan_args.num2")?;

    let images = ctx.detector("primary")?;
    let frames = images.flatten()?;
    let total = frames.len_of(Axis(0));
    if total < num1 * num2 {
        return Err(ExportError::ShapeMismatch(format!(
            "{num1} x {num2} grid needs {} frames, found {total}",
            num1 * num2
        )));
    }

    let dir = ctx.output_path(format!("grid2D_rel_id_{scan_id}"));
    fs::create_dir_all(&dir)?;
    for i in 0..num1 {
        for j in 0..num2 {
            let tile = frames.index_axis(Axis(0), i * num2 + j);
            TiffWriter::write_u16(tile, dir.join(format!("img_{i}_{j}.tif")))?;
        }
    }
    tracing::info!(scan_id, tiles = num1 * num2, dir = ?dir, "Wrote grid tiles");
    ctx.record_output(report, dir);
    Ok(())
}

/// Tile grid and physical step of a raster run.
#[derive(Debug, Clone, PartialEq)]
struct RasterGrid {
    x_list: Vec<f64>,
    y_list: Vec<f64>,
    img_size_x: f64,
    img_size_y: f64,
    pxl: f64,
}

impl RasterGrid {
    fn read(start: &StartDoc) -> ExportResult<Self> {
        let x_range = start.float_list("plan_args.x_range")?;
        let y_range = start.float_list("plan_args.y_range")?;
        let x_num = grid_extent(&x_range, "plan_args.x_range")?;
        let y_num = grid_extent(&y_range, "plan_args.y_range")?;
        Ok(Self {
            x_list: linspace(x_range[0], x_range[1], x_num),
            y_list: linspace(y_range[0], y_range[1], y_num),
            img_size_x: start.float("plan_args.img_sizeX")?,
            img_size_y: start.float("plan_args.img_sizeY")?,
            pxl: start.float("plan_args.pxl")?,
        })
    }

    fn x_num(&self) -> usize {
        self.x_list.len()
    }

    fn y_num(&self) -> usize {
        self.y_list.len()
    }

    fn tiles(&self) -> usize {
        self.x_num() * self.y_num()
    }

    /// Tab-separated grid indices and offsets in micrometers, x-major.
    fn coordinate_table(&self) -> String {
        let mut table = String::from("cord_x\tcord_y\tx_pos_relative\ty_pos_relative\n");
        for &x in &self.x_list {
            for &y in &self.y_list {
                let x_pos = x * self.pxl * self.img_size_x / 1000.0;
                let y_pos = y * self.pxl * self.img_size_y / 1000.0;
                let _ = writeln!(table, "{x:3.0}\t{y:3.0}\t{x_pos:3.3}\t\t{y_pos:3.3}");
            }
        }
        table
    }
}

/// Normalized tiles with their references, `(tiles, rows, cols)`.
struct RasterTiles {
    img: Array3<f32>,
    img_dark: Array3<f32>,
    img_bkg: Array3<f32>,
}

/// Mosaic, bin and write the coordinate table, the TIFF and the archive.
fn write_raster(
    ctx: &ExportContext<'_>,
    report: &mut ExportReport,
    grid: &RasterGrid,
    tiles: RasterTiles,
) -> ExportResult<()> {
    let start = ctx.start();
    let scan_id = start.scan_id()?;
    let x_eng = start.x_eng()?;
    let optics = ctx.optics()?;
    let binning = ctx.settings.export.binning;

    let patch = mosaic(tiles.img.view(), grid.x_num(), grid.y_num())?;
    let patch_bin = bin2d(patch.view(), binning)?;
    tracing::info!(
        scan_id,
        x_num = grid.x_num(),
        y_num = grid.y_num(),
        binning,
        "Assembled raster mosaic"
    );

    let cord = write_text(
        ctx.output_path(format!("raster2D_scan_{scan_id}_cord.txt")),
        &grid.coordinate_table(),
    )?;
    ctx.record_output(report, cord);

    let tiff = TiffWriter::write_f32(
        patch_bin.view(),
        ctx.output_path(format!("raster2D_scan_{scan_id}_binning_{binning}.tiff")),
    )?;
    ctx.record_output(report, tiff);

    ctx.write_archive(
        report,
        format!("raster2D_scan_{scan_id}_binning_{binning}.h5"),
        Lakeshore::Attach,
        |sink| {
            sink.put("img_patch", patch_bin.view().insert_axis(Axis(0)).into())?;
            sink.put("img", tiles.img.view().into())?;
            sink.put("img_dark", tiles.img_dark.view().into())?;
            sink.put("img_bkg", tiles.img_bkg.view().into())?;
            sink.put("XEng", x_eng.into())?;
            optics.put(sink)
        },
    )?;
    Ok(())
}

/// `raster_2D`: darks first, shared flats last, tiles in between.
pub fn export_raster_2d(ctx: &ExportContext<'_>, report: &mut ExportReport) -> ExportResult<()> {
    let start = ctx.start();
    let num_dark = start.count("num_dark_images")?;
    let num_bkg = start.count("num_bkg_images")?;
    let grid = RasterGrid::read(start)?;

    let frames = to_f32(ctx.detector("primary")?.flatten()?);
    let total = frames.len_of(Axis(0));
    if num_dark == 0 || num_bkg == 0 || total < num_dark + num_bkg {
        return Err(ExportError::ShapeMismatch(format!(
            "{total} frames cannot hold {num_dark} darks and {num_bkg} flats"
        )));
    }

    let img_dark = mean_keep(frames.slice(s![..num_dark, .., ..]), 0)?;
    let img_bkg = mean_keep(frames.slice(s![total - num_bkg.., .., ..]), 0)?;
    let img = normalize(
        frames.slice(s![num_dark..total - num_bkg, .., ..]),
        img_dark.view(),
        img_bkg.view(),
    )?;

    write_raster(ctx, report, &grid, RasterTiles { img, img_dark, img_bkg })
}

/// `raster_2D_2`: five darks, then each tile followed by its own flats.
pub fn export_raster_2d_2(ctx: &ExportContext<'_>, report: &mut ExportReport) -> ExportResult<()> {
    let start = ctx.start();
    let num_bkg = start.count("plan_args.num_bkg")?;
    let grid = RasterGrid::read(start)?;

    let frames = to_f32(ctx.detector("primary")?.flatten()?);
    let (total, rows, cols) = frames.dim();
    let stride = num_bkg + 1;
    let needed = RASTER2_DARK_FRAMES + grid.tiles() * stride;
    if num_bkg == 0 || total < needed {
        return Err(ExportError::ShapeMismatch(format!(
            "{} tiles with {num_bkg} flats each need {needed} frames, found {total}",
            grid.tiles()
        )));
    }

    let img_dark = mean_keep(frames.slice(s![..RASTER2_DARK_FRAMES, .., ..]), 0)?;
    let mut img = Array3::<f32>::zeros((grid.tiles(), rows, cols));
    let mut img_bkg = Array3::<f32>::zeros((1, rows, cols));
    for i in 0..grid.tiles() {
        let index = RASTER2_DARK_FRAMES + i * stride;
        img_bkg = mean_keep(frames.slice(s![index + 1..index + stride, .., ..]), 0)?;
        let tile = normalize(
            frames.slice(s![index..index + 1, .., ..]),
            img_dark.view(),
            img_bkg.view(),
        )?;
        img.slice_mut(s![i..i + 1, .., ..]).assign(&tile);
    }

    write_raster(ctx, report, &grid, RasterTiles { img, img_dark, img_bkg })
}

/// `scan_change_expo_time`: every tile imaged at two exposure times, each
/// normalized against its own darks and flats.
///
/// Tiles land in `scan_<id>/t1` and `scan_<id>/t2`, cropped to the
/// configured ranges, with a summary archive in `scan_<id>/`.
pub fn export_scan_change_expo_time(
    ctx: &ExportContext<'_>,
    report: &mut ExportReport,
) -> ExportResult<()> {
    let start = ctx.start();
    let plan_name = start.plan_name()?;
    let scan_id = start.scan_id()?;
    let uid = start.uid()?;
    let note = start.display("plan_args.note")?;
    let x_eng = start.x_eng()?;
    let pxl = start.float("plan_args.pxl")?;
    let step_x = start.float("plan_args.img_sizeX")? * pxl;
    let step_y = start.float("plan_args.img_sizeY")? * pxl;
    let nx = grid_extent(&start.float_list("plan_args.x_range")?, "plan_args.x_range")?;
    let ny = grid_extent(&start.float_list("plan_args.y_range")?, "plan_args.y_range")?;
    let optics = ctx.optics()?;

    let frames = to_f32(ctx.detector("primary")?.flatten()?);
    let (total, rows, cols) = frames.dim();
    let needed = 2 * EXPO_DARK_FRAMES + nx * ny * EXPO_TILE_FRAMES;
    if total < needed {
        return Err(ExportError::ShapeMismatch(format!(
            "{nx} x {ny} tiles need {needed} frames, found {total}"
        )));
    }

    let crop_rows = ctx.settings.export.crop_rows.map_or(0..rows, |[a, b]| a..b);
    let crop_cols = ctx.settings.export.crop_cols.map_or(0..cols, |[a, b]| a..b);

    let dark_t1 = median_axis(frames.slice(s![..EXPO_DARK_FRAMES, .., ..]), 0)?;
    let dark_t2 = median_axis(frames.slice(s![EXPO_DARK_FRAMES..2 * EXPO_DARK_FRAMES, .., ..]), 0)?;

    let dir = format!("scan_{scan_id}");
    let mut pos_x = Vec::with_capacity(nx * ny);
    let mut pos_y = Vec::with_capacity(nx * ny);
    let mut idx = 0usize;
    for ii in 0..nx {
        if ii % 100 == 0 {
            tracing::debug!(ii, nx, "Exporting raster column");
        }
        for jj in 0..ny {
            pos_x.push(ii as f64 * step_x);
            pos_y.push(jj as f64 * step_y);
            idx += 1;

            let id_c = 2 * EXPO_DARK_FRAMES + (ii * ny + jj) * EXPO_TILE_FRAMES;
            let bkg_t1 = median_axis(frames.slice(s![id_c + 2..id_c + 7, .., ..]), 0)?;
            let bkg_t2 = median_axis(frames.slice(s![id_c + 7..id_c + 12, .., ..]), 0)?;
            let img_t1 = normalize(frames.index_axis(Axis(0), id_c), dark_t1.view(), bkg_t1.view())?;
            let img_t2 =
                normalize(frames.index_axis(Axis(0), id_c + 1), dark_t2.view(), bkg_t2.view())?;

            for (exposure, img) in [("t1", &img_t1), ("t2", &img_t2)] {
                let cropped = crop2d(img.view(), crop_rows.clone(), crop_cols.clone())?;
                let path = ctx.output_path(format!("{dir}/{exposure}/img_{exposure}_{idx:05}.tiff"));
                let written = TiffWriter::write_f32(cropped.view(), path)?;
                ctx.record_output(report, written);
            }
        }
    }
    tracing::info!(scan_id, tiles = idx, "Wrote exposure tiles");

    ctx.write_archive(
        report,
        format!("{dir}/scan_change_expo_time_id_{scan_id}.h5"),
        Lakeshore::Skip,
        |sink| {
            sink.put("scan_id", scan_id.into())?;
            sink.put("scan_type", plan_name.into())?;
            sink.put("uid", uid.into())?;
            sink.put("pxl_sz", optics.pixel_size.into())?;
            sink.put("note", note.as_str().into())?;
            sink.put("XEng", x_eng.into())?;
            sink.put("pos_x", pos_x.as_slice().into())?;
            sink.put("pos_y", pos_y.as_slice().into())
        },
    )?;
    Ok(())
}
