//! Exporters for runs that record images, flats and darks in one stream.

use super::common::{Lakeshore, Optics};
use super::{ExportContext, ExportReport};
use crate::error::{ExportError, ExportResult};
use crate::imaging::{mean_axis, mean_keep, normalize, to_f32};
use ndarray::{s, Array3, Array4, ArrayD, Axis};

/// Image detectors accepted by `delay_scan`.
const DELAY_SCAN_DETECTORS: [&str; 2] = ["detA1", "Andor"];

/// Normalized stack written by the focus and test scans.
struct NormalizedStack {
    img_bkg: ArrayD<f32>,
    img_dark: ArrayD<f32>,
    img: ArrayD<f32>,
    img_norm: ArrayD<f32>,
}

fn write_normalized_stack(
    ctx: &ExportContext<'_>,
    report: &mut ExportReport,
    stack: NormalizedStack,
) -> ExportResult<()> {
    let start = ctx.start();
    let plan_name = start.plan_name()?;
    let scan_id = start.scan_id()?;
    let uid = start.uid()?;
    let x_eng = start.x_eng()?;
    let note = start.plan_note();
    let optics = ctx.optics()?;

    ctx.write_archive(
        report,
        format!("{plan_name}_id_{scan_id}.h5"),
        Lakeshore::Attach,
        |sink| {
            sink.put("uid", uid.into())?;
            sink.put("scan_id", scan_id.into())?;
            sink.put("note", note.as_str().into())?;
            sink.put("X_eng", x_eng.into())?;
            sink.put("img_bkg", stack.img_bkg.view().into())?;
            sink.put("img_dark", stack.img_dark.view().into())?;
            sink.put("img", stack.img.view().into())?;
            sink.put("img_norm", stack.img_norm.view().into())?;
            optics.put(sink)
        },
    )?;
    Ok(())
}

/// `z_scan`: `steps` image events, then one flat event, with the dark event
/// last.
pub fn export_z_scan(ctx: &ExportContext<'_>, report: &mut ExportReport) -> ExportResult<()> {
    let num = ctx.start().count("plan_args.steps")?;
    let images = ctx.detector("primary")?;
    let events = images.events();
    if events < num + 2 {
        return Err(ExportError::ShapeMismatch(format!(
            "z_scan with {num} steps needs {} events, found {events}",
            num + 2
        )));
    }

    let all = to_f32(images.frames().view());
    let img = mean_axis(all.slice(s![..num, .., .., ..]), 1)?;
    let img_bkg = mean_keep(all.index_axis(Axis(0), num), 0)?;
    let img_dark = mean_keep(all.index_axis(Axis(0), events - 1), 0)?;
    let img_norm = normalize(img.view(), img_dark.view(), img_bkg.view())?;

    write_normalized_stack(
        ctx,
        report,
        NormalizedStack {
            img_bkg: img_bkg.into_dyn(),
            img_dark: img_dark.into_dyn(),
            img: img.into_dyn(),
            img_norm: img_norm.into_dyn(),
        },
    )
}

/// `z_scan2`: a dark event followed by alternating image and flat events.
pub fn export_z_scan2(ctx: &ExportContext<'_>, report: &mut ExportReport) -> ExportResult<()> {
    let images = ctx.detector("primary")?;
    let means = mean_axis(to_f32(images.frames().view()).view(), 1)?;
    let events = means.len_of(Axis(0));
    if events < 3 || events % 2 == 0 {
        return Err(ExportError::ShapeMismatch(format!(
            "z_scan2 needs a dark event plus image/flat pairs, found {events} events"
        )));
    }

    let img_dark = means.index_axis(Axis(0), 0);
    let img = means.slice(s![1..;2, .., ..]);
    let img_bkg = means.slice(s![2..;2, .., ..]);
    let img_norm = normalize(img, img_dark.insert_axis(Axis(0)), img_bkg)?;

    write_normalized_stack(
        ctx,
        report,
        NormalizedStack {
            img_bkg: img_bkg.to_owned().into_dyn(),
            img_dark: img_dark.to_owned().into_dyn(),
            img: img.to_owned().into_dyn(),
            img_norm: img_norm.into_dyn(),
        },
    )
}

/// `test_scan`: single-frame events; `num_img` images, `num_bkg` flats, and
/// `num_bkg` darks at the end.
pub fn export_test_scan(ctx: &ExportContext<'_>, report: &mut ExportReport) -> ExportResult<()> {
    let start = ctx.start();
    let num = start.count("plan_args.num_img")?;
    let num_bkg = start.count("plan_args.num_bkg")?;

    let images = ctx.detector("primary")?;
    if images.frames_per_event() != 1 {
        return Err(ExportError::ShapeMismatch(format!(
            "test_scan expects one frame per event, found {}",
            images.frames_per_event()
        )));
    }
    let frames = to_f32(images.flatten()?);
    let total = frames.len_of(Axis(0));
    if num_bkg == 0 || total < num + num_bkg {
        return Err(ExportError::ShapeMismatch(format!(
            "test_scan with {num} images and {num_bkg} flats cannot be read from {total} frames"
        )));
    }

    let img = frames.slice(s![..num, .., ..]);
    let img_bkg = mean_keep(frames.slice(s![num..num + num_bkg, .., ..]), 0)?;
    let img_dark = mean_keep(frames.slice(s![total - num_bkg.., .., ..]), 0)?;
    let img_norm = normalize(img, img_dark.view(), img_bkg.view())?;

    write_normalized_stack(
        ctx,
        report,
        NormalizedStack {
            img_bkg: img_bkg.into_dyn(),
            img_dark: img_dark.into_dyn(),
            img: img.to_owned().into_dyn(),
            img_norm: img_norm.into_dyn(),
        },
    )
}

/// First detector listed in the start document.
fn first_detector(ctx: &ExportContext<'_>) -> ExportResult<String> {
    ctx.start()
        .str_list("detectors")?
        .into_iter()
        .next()
        .ok_or_else(|| ExportError::missing("detectors"))
}

/// Every frame of `<detector>_image` as one `f32` stack.
fn detector_frames(ctx: &ExportContext<'_>, detector: &str) -> ExportResult<Array3<f32>> {
    let images = ctx.scan.images("primary", &format!("{detector}_image"))?;
    Ok(to_f32(images.flatten()?))
}

/// `count` and `delay_count`: plain frame stacks.
///
/// Magnification is best effort; runs without optics in their baseline get
/// 0 and a warning.
pub fn export_count(ctx: &ExportContext<'_>, report: &mut ExportReport) -> ExportResult<()> {
    let start = ctx.start();
    let scan_id = start.scan_id()?;
    let uid = start.uid()?;
    let detector = first_detector(ctx)?;
    let img = detector_frames(ctx, &detector)?;

    let (magnification, pixel_size) = match ctx.optics() {
        Ok(optics) => (optics.magnification, optics.pixel_size_label()),
        Err(e) => {
            tracing::warn!(scan_id, error = %e, "Failed to calculate magnification and pixel size");
            report.warn(format!("fails to calculate magnification and pxl size: {e}"));
            (0.0, "0nm".to_string())
        }
    };

    ctx.write_archive(
        report,
        format!("count_id_{scan_id}.h5"),
        Lakeshore::Attach,
        |sink| {
            sink.put("img", img.view().into())?;
            sink.put("uid", uid.into())?;
            sink.put("scan_id", scan_id.into())?;
            sink.put("Magnification", magnification.into())?;
            sink.put("Pixel Size", pixel_size.as_str().into())
        },
    )?;
    Ok(())
}

/// `delay_scan`: frames recorded while a motor steps; only image detectors
/// produce an archive.
pub fn export_delay_scan(ctx: &ExportContext<'_>, report: &mut ExportReport) -> ExportResult<()> {
    let start = ctx.start();
    let plan_name = start.plan_name()?;
    let scan_id = start.scan_id()?;
    let uid = start.uid()?;
    let x_eng = start.x_eng()?;
    let note = start.plan_note();
    let motor = start.str("plan_args.motor")?;
    let mot_start = start.float("plan_args.start")?;
    let mot_stop = start.float("plan_args.stop")?;
    let mot_steps = start.int("plan_args.steps")?;
    let optics = ctx.optics()?;

    let detector = first_detector(ctx)?;
    if !DELAY_SCAN_DETECTORS.contains(&detector.as_str()) {
        tracing::warn!(scan_id, detector = %detector, "No image stored in this scan");
        report.warn(format!("no image stored in this scan (detector {detector})"));
        return Ok(());
    }
    let img = detector_frames(ctx, &detector)?;

    ctx.write_archive(
        report,
        format!("{plan_name}_id_{scan_id}.h5"),
        Lakeshore::Attach,
        |sink| {
            sink.put("img", img.view().into())?;
            sink.put("uid", uid.into())?;
            sink.put("scan_id", scan_id.into())?;
            sink.put("X_eng", x_eng.into())?;
            sink.put("note", note.as_str().into())?;
            sink.put("start", mot_start.into())?;
            sink.put("stop", mot_stop.into())?;
            sink.put("steps", mot_steps.into())?;
            sink.put("motor", motor.into())?;
            optics.put(sink)
        },
    )?;
    Ok(())
}

/// `multipos_count`: `num_dark_images` darks, then for every repeat an
/// image/flat pair per position.
pub fn export_multipos_count(ctx: &ExportContext<'_>, report: &mut ExportReport) -> ExportResult<()> {
    let start = ctx.start();
    let plan_name = start.plan_name()?;
    let scan_id = start.scan_id()?;
    let uid = start.uid()?;
    let note = start.note()?;
    let num_dark = start.count("num_dark_images")?;
    let num_pos = start.count("num_of_position")?;
    let optics = ctx.optics()?;

    let frames = to_f32(ctx.detector("primary")?.flatten()?);
    let total = frames.len_of(Axis(0));
    if num_dark == 0 || num_pos == 0 || total < num_dark + 2 * num_pos {
        return Err(ExportError::ShapeMismatch(format!(
            "{total} frames hold no complete repeat of {num_pos} positions after {num_dark} darks"
        )));
    }
    let num_repeat = (total - num_dark) / num_pos / 2;

    let img_dark_avg = mean_axis(frames.slice(s![..num_dark, .., ..]), 0)?;
    let (_, rows, cols) = frames.dim();
    let mut img_group = Array4::<f32>::zeros((num_pos, num_repeat, rows, cols));

    for j in 0..num_repeat {
        let index = num_dark + j * num_pos * 2;
        tracing::debug!(index, total = num_pos * 2 * num_repeat, "Normalizing repeat");
        for i in 0..num_pos {
            let img = frames.index_axis(Axis(0), index + i * 2);
            let bkg = frames.index_axis(Axis(0), index + i * 2 + 1);
            let norm = normalize(img, img_dark_avg.view(), bkg)?;
            img_group.slice_mut(s![i, j, .., ..]).assign(&norm);
        }
    }

    ctx.write_archive(
        report,
        format!("{plan_name}_id_{scan_id}.h5"),
        Lakeshore::Attach,
        |sink| {
            sink.put("uid", uid.into())?;
            sink.put("scan_id", scan_id.into())?;
            sink.put("note", note.as_str().into())?;
            optics.put(sink)?;
            for i in 0..num_pos {
                let name = format!("img_pos{}", i + 1);
                if num_repeat == 1 {
                    sink.put(&name, img_group.slice(s![i, 0, .., ..]).into())?;
                } else {
                    sink.put(&name, img_group.slice(s![i, .., .., ..]).into())?;
                }
            }
            Ok(())
        },
    )?;
    Ok(())
}
