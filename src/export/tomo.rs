//! Tomography exporters: step scans and fly-scans.
//!
//! Fly-scans carry no commanded angles. Each frame's angle is interpolated
//! from the rotation monitor at the frame's detector timestamp, and frames
//! recorded after the stage reached its end point are dropped together with
//! their angles.

use super::common::{InitialPositions, Lakeshore, Optics, DETECTOR_FIELD};
use super::{ExportContext, ExportReport};
use crate::catalog::ScanRef;
use crate::error::{ExportError, ExportResult};
use crate::imaging::{linspace, mean_keep, median_axis, median_keep, to_f32};
use crate::storage::ArchiveSink;
use ndarray::{s, Array3, ArrayView3, Axis};

/// `tomo_scan`: step tomography with repeated frames per angle.
pub fn export_tomo_scan(ctx: &ExportContext<'_>, report: &mut ExportReport) -> ExportResult<()> {
    let start = ctx.start();
    let scan_id = start.scan_id()?;
    let x_eng = start.x_eng()?;
    let angles = linspace(
        start.float("plan_args.start")?,
        start.float("plan_args.stop")?,
        start.count("plan_args.num")?,
    );

    let primary = ctx.detector("primary")?;
    let img_tomo = median_axis(to_f32(primary.frames().view()).view(), 1)?;

    let dark = ctx.detector("dark")?;
    let flat = ctx.detector("flat")?;
    let img_dark = dark.event(0)?;
    let img_bkg = flat.event(0)?;
    let img_dark_avg = median_keep(to_f32(img_dark).view(), 0)?;
    let img_bkg_avg = median_keep(to_f32(img_bkg).view(), 0)?;

    ctx.write_archive(
        report,
        format!("tomo_scan_id_{scan_id}.h5"),
        Lakeshore::Attach,
        |sink| {
            sink.put("scan_id", scan_id.into())?;
            sink.put("X_eng", x_eng.into())?;
            sink.put("img_bkg", img_bkg.into())?;
            sink.put("img_dark", img_dark.into())?;
            sink.put("img_bkg_avg", img_bkg_avg.view().into())?;
            sink.put("img_dark_avg", img_dark_avg.view().into())?;
            sink.put("img_tomo", img_tomo.view().into())?;
            sink.put("angle", (&angles).into())
        },
    )?;
    Ok(())
}

/// Datasets common to every fly-scan archive.
struct FlyArchive<'a> {
    note: String,
    uid: &'a str,
    scan_id: i64,
    scan_time: f64,
    x_eng: f64,
    img_bkg: ArrayView3<'a, u16>,
    img_dark: ArrayView3<'a, u16>,
    img_bkg_avg: Array3<f32>,
    img_dark_avg: Array3<f32>,
    img_tomo: ArrayView3<'a, u16>,
    angle: &'a [f64],
    positions: InitialPositions,
    optics: Option<Optics>,
}

impl FlyArchive<'_> {
    fn put(&self, sink: &mut dyn ArchiveSink) -> ExportResult<()> {
        sink.put("note", self.note.as_str().into())?;
        sink.put("uid", self.uid.into())?;
        sink.put("scan_id", self.scan_id.into())?;
        sink.put("scan_time", self.scan_time.into())?;
        sink.put("X_eng", self.x_eng.into())?;
        sink.put("img_bkg", self.img_bkg.into())?;
        sink.put("img_dark", self.img_dark.into())?;
        sink.put("img_bkg_avg", self.img_bkg_avg.view().into())?;
        sink.put("img_dark_avg", self.img_dark_avg.view().into())?;
        sink.put("img_tomo", self.img_tomo.into())?;
        sink.put("angle", self.angle.into())?;
        self.positions.put(sink)?;
        if let Some(optics) = &self.optics {
            optics.put(sink)?;
        }
        Ok(())
    }
}

/// `fly_scan`: one primary event holds the whole rotation; dark and flat
/// frames come from their own streams.
pub fn export_fly_scan(ctx: &ExportContext<'_>, report: &mut ExportReport) -> ExportResult<()> {
    let start = ctx.start();
    let scan_id = start.scan_id()?;
    let baseline = ctx.baseline()?;

    let primary = ctx.detector("primary")?;
    let timestamps = ctx.frame_timestamps(&primary, "primary", 0..primary.frames_per_event())?;
    let aligned = ctx.align_frames(timestamps)?;
    let img_tomo = primary.event(0)?.slice_move(s![..aligned.cutoff, .., ..]);

    let dark = ctx.detector("dark")?;
    let flat = ctx.detector("flat")?;
    let img_dark = dark.event(0)?;
    let img_bkg = flat.event(0)?;

    let archive = FlyArchive {
        note: start.note()?,
        uid: start.uid()?,
        scan_id,
        scan_time: start.time()?,
        x_eng: start.x_eng()?,
        img_bkg,
        img_dark,
        img_bkg_avg: median_keep(to_f32(img_bkg).view(), 0)?,
        img_dark_avg: median_keep(to_f32(img_dark).view(), 0)?,
        img_tomo,
        angle: aligned.sweep(),
        positions: InitialPositions::from_baseline(&baseline)?,
        optics: Some(Optics::from_baseline(&baseline)?),
    };

    ctx.write_archive(
        report,
        format!("fly_scan_id_{scan_id}.h5"),
        Lakeshore::Skip,
        |sink| archive.put(sink),
    )?;
    Ok(())
}

/// `fly_scan2`: the last two primary events are the dark and flat sets, every
/// event before them is part of the rotation.
pub fn export_fly_scan2(ctx: &ExportContext<'_>, report: &mut ExportReport) -> ExportResult<()> {
    let start = ctx.start();
    let scan_id = start.scan_id()?;
    let baseline = ctx.baseline()?;

    let primary = ctx.detector("primary")?;
    let events = primary.events();
    if events < 3 {
        return Err(ExportError::ShapeMismatch(format!(
            "fly_scan2 needs rotation, flat and dark events in 'primary', found {events} events"
        )));
    }
    let img_dark = primary.event(events - 1)?;
    let img_bkg = primary.event(events - 2)?;

    let imgs = primary.flatten_events(0..events - 2)?;
    let timestamps = ctx.frame_timestamps(&primary, "primary", 0..imgs.len_of(Axis(0)))?;
    let aligned = ctx.align_frames(timestamps)?;
    let img_tomo = imgs.slice_move(s![..aligned.cutoff, .., ..]);

    let archive = FlyArchive {
        note: start.note()?,
        uid: start.uid()?,
        scan_id,
        scan_time: start.time()?,
        x_eng: start.x_eng()?,
        img_bkg,
        img_dark,
        img_bkg_avg: mean_keep(to_f32(img_bkg).view(), 0)?,
        img_dark_avg: mean_keep(to_f32(img_dark).view(), 0)?,
        img_tomo,
        angle: aligned.sweep(),
        positions: InitialPositions::from_baseline(&baseline)?,
        optics: Some(Optics::from_baseline(&baseline)?),
    };

    ctx.write_archive(
        report,
        format!("fly_scan2_id_{scan_id}.h5"),
        Lakeshore::Attach,
        |sink| archive.put(sink),
    )?;
    Ok(())
}

/// First primary event of another run, used as dark or flat set.
fn companion_event(ctx: &ExportContext<'_>, scan_id: i64) -> ExportResult<Array3<u16>> {
    let run = ctx.catalog.resolve(&ScanRef::ScanId(scan_id))?;
    let images = run.images("primary", DETECTOR_FIELD)?;
    Ok(images.event(0)?.to_owned())
}

/// `user_fly_only`: a fly-scan without its own dark and flat frames; those
/// are taken from the runs named by `dark_scan_id` and `bkg_scan_id`.
///
/// Output lands in `fly_scan_id_<id>.h5` so downstream tools treat it like
/// any other fly-scan.
pub fn export_user_fly_only(ctx: &ExportContext<'_>, report: &mut ExportReport) -> ExportResult<()> {
    let start = ctx.start();
    let scan_id = start.scan_id()?;
    let baseline = ctx.baseline()?;

    let img_dark = companion_event(ctx, start.int("plan_args.dark_scan_id")?)?;
    let img_bkg = companion_event(ctx, start.int("plan_args.bkg_scan_id")?)?;

    let primary = ctx.detector("primary")?;
    let chunk = primary.frames_per_event();
    let imgs = primary.flatten()?;
    let timestamps = ctx.frame_timestamps(&primary, "primary", 0..imgs.len_of(Axis(0)))?;
    let aligned = ctx.align_frames(timestamps)?;

    // The final chunk straddles the end of the sweep.
    let keep = aligned.cutoff.saturating_sub(chunk);
    let img_tomo = imgs.slice_move(s![..keep, .., ..]);

    let archive = FlyArchive {
        note: start.note()?,
        uid: start.uid()?,
        scan_id,
        scan_time: start.time()?,
        x_eng: start.x_eng()?,
        img_bkg: img_bkg.view(),
        img_dark: img_dark.view(),
        img_bkg_avg: mean_keep(to_f32(img_bkg.view()).view(), 0)?,
        img_dark_avg: mean_keep(to_f32(img_dark.view()).view(), 0)?,
        img_tomo,
        angle: &aligned.angles[..keep],
        positions: InitialPositions::from_baseline(&baseline)?,
        optics: None,
    };

    ctx.write_archive(
        report,
        format!("fly_scan_id_{scan_id}.h5"),
        Lakeshore::Attach,
        |sink| archive.put(sink),
    )?;
    Ok(())
}
