//! XANES exporters: image stacks across an energy list.

use super::common::{Lakeshore, Optics};
use super::{ExportContext, ExportReport};
use crate::catalog::StartDoc;
use crate::error::{ExportError, ExportResult};
use crate::imaging::{mean_axis, normalize, subtract_dark, to_f32};
use crate::storage::ArchiveSink;
use ndarray::{s, Array3, ArrayView2, ArrayView3, Axis};

/// Per-run fields written to every XANES archive.
struct XanesHeader<'a> {
    plan_name: &'a str,
    uid: &'a str,
    scan_id: i64,
    note: String,
    scan_time: f64,
    eng_list: Vec<f64>,
    optics: Optics,
}

impl<'a> XanesHeader<'a> {
    fn read(ctx: &ExportContext<'a>) -> ExportResult<Self> {
        let start: &'a StartDoc = ctx.start();
        Ok(Self {
            plan_name: start.plan_name()?,
            uid: start.uid()?,
            scan_id: start.scan_id()?,
            note: start.note()?,
            scan_time: start.time()?,
            eng_list: start.float_list("eng_list")?,
            optics: ctx.optics()?,
        })
    }

    fn put(
        &self,
        sink: &mut dyn ArchiveSink,
        img_bkg: ArrayView3<'_, f32>,
        img_dark: ndarray::ArrayViewD<'_, f32>,
        img_xanes: ArrayView3<'_, f32>,
    ) -> ExportResult<()> {
        sink.put("uid", self.uid.into())?;
        sink.put("scan_id", self.scan_id.into())?;
        sink.put("note", self.note.as_str().into())?;
        sink.put("scan_time", self.scan_time.into())?;
        sink.put("X_eng", (&self.eng_list).into())?;
        sink.put("img_bkg", img_bkg.into())?;
        sink.put("img_dark", img_dark.into())?;
        sink.put("img_xanes", img_xanes.into())?;
        self.optics.put(sink)
    }
}

/// Average every event of `stream` over its repeated frames.
fn event_means(ctx: &ExportContext<'_>, stream: &str) -> ExportResult<Array3<f32>> {
    let images = ctx.detector(stream)?;
    mean_axis(to_f32(images.frames().view()).view(), 1)
}

/// `xanes_scan` and `xanes_scan2`: one primary event per energy, normalized
/// against the averaged dark and flat events.
pub fn export_xanes_scan(ctx: &ExportContext<'_>, report: &mut ExportReport) -> ExportResult<()> {
    let header = XanesHeader::read(ctx)?;
    let img_xanes_avg = event_means(ctx, "primary")?;
    let img_dark_avg = event_means(ctx, "dark")?;
    let img_bkg_avg = event_means(ctx, "flat")?;
    let img_xanes_norm = normalize(img_xanes_avg.view(), img_dark_avg.view(), img_bkg_avg.view())?;

    ctx.write_archive(
        report,
        format!("{}_id_{}.h5", header.plan_name, header.scan_id),
        Lakeshore::Attach,
        |sink| {
            header.put(
                sink,
                img_bkg_avg.view(),
                img_dark_avg.view().into_dyn(),
                img_xanes_norm.view(),
            )
        },
    )?;
    Ok(())
}

/// `xanes_scan_img_only`: no flat field was recorded, so frames are only
/// dark-subtracted and `img_bkg` is written as ones.
pub fn export_xanes_scan_img_only(ctx: &ExportContext<'_>, report: &mut ExportReport) -> ExportResult<()> {
    let header = XanesHeader::read(ctx)?;
    let img_xanes_avg = event_means(ctx, "primary")?;
    let img_dark_avg = event_means(ctx, "dark")?;
    let img_bkg_avg = Array3::<f32>::ones(img_dark_avg.raw_dim());
    let img_xanes_norm = subtract_dark(img_xanes_avg.view(), img_dark_avg.view())?;

    ctx.write_archive(
        report,
        format!("{}_id_{}_img_only.h5", header.plan_name, header.scan_id),
        Lakeshore::Attach,
        |sink| {
            header.put(
                sink,
                img_bkg_avg.view(),
                img_dark_avg.view().into_dyn(),
                img_xanes_norm.view(),
            )
        },
    )?;
    Ok(())
}

/// `multipos_2D_xanes_scan2`: for each repeat, every energy visits all
/// positions in turn; one flat per energy.
///
/// Each repeat is exported on its own. A repeat that fails is logged and
/// recorded as a warning, and the remaining repeats still run.
pub fn export_multipos_2d_xanes_scan2(
    ctx: &ExportContext<'_>,
    report: &mut ExportReport,
) -> ExportResult<()> {
    let start = ctx.start();
    let header = XanesHeader::read(ctx)?;
    let num_eng = start.count("num_eng")?;
    let num_pos = start.count("num_pos")?;
    let repeat_num = if start.has("plan_args.repeat_num") {
        start.count("plan_args.repeat_num")?
    } else {
        1
    };

    let img_xanes = event_means(ctx, "primary")?;
    let img_dark = event_means(ctx, "dark")?;
    let img_bkg = event_means(ctx, "flat")?;

    for repeat in 0..repeat_num {
        tracing::info!(repeat, "Exporting repeat");
        let result = export_repeat(
            ctx,
            report,
            &header,
            repeat,
            (num_eng, num_pos),
            img_xanes.view(),
            img_dark.view(),
            img_bkg.view(),
        );
        if let Err(e) = result {
            tracing::warn!(repeat, error = %e, "Failed to export repeat");
            report.warn(format!("fails in export repeat# {repeat}: {e}"));
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn export_repeat(
    ctx: &ExportContext<'_>,
    report: &mut ExportReport,
    header: &XanesHeader<'_>,
    repeat: usize,
    (num_eng, num_pos): (usize, usize),
    img_xanes: ArrayView3<'_, f32>,
    img_dark: ArrayView3<'_, f32>,
    img_bkg: ArrayView3<'_, f32>,
) -> ExportResult<()> {
    let id_s = repeat * num_eng;
    let id_e = (repeat + 1) * num_eng;
    if id_e * num_pos > img_xanes.len_of(Axis(0)) || id_e > img_bkg.len_of(Axis(0)) {
        return Err(ExportError::ShapeMismatch(format!(
            "repeat {repeat} needs {} images and {id_e} flats, have {} and {}",
            id_e * num_pos,
            img_xanes.len_of(Axis(0)),
            img_bkg.len_of(Axis(0))
        )));
    }
    let img_x = img_xanes.slice(s![id_s * num_pos..id_e * num_pos, .., ..]);
    let img_b = img_bkg.slice(s![id_s..id_e, .., ..]);

    for j in 0..num_pos {
        let img_p = img_x.slice(s![j..;num_pos, .., ..]);
        let img_p_n = normalize(img_p, img_dark, img_b)?;
        ctx.write_archive(
            report,
            format!(
                "{}_id_{}_repeat_{repeat:02}_pos_{j:02}.h5",
                header.plan_name, header.scan_id
            ),
            Lakeshore::Skip,
            |sink| header.put(sink, img_bkg, img_dark.into_dyn(), img_p_n.view()),
        )?;
    }
    Ok(())
}

/// `multipos_2D_xanes_scan3`: a single stream holding one dark event, then
/// every position at every energy, then one flat per energy.
pub fn export_multipos_2d_xanes_scan3(
    ctx: &ExportContext<'_>,
    report: &mut ExportReport,
) -> ExportResult<()> {
    let start = ctx.start();
    let header = XanesHeader::read(ctx)?;
    let num_eng = start.count("num_eng")?;
    let num_pos = start.count("num_pos")?;

    let imgs = event_means(ctx, "primary")?;
    let events = imgs.len_of(Axis(0));
    if events < 1 + num_eng * num_pos || events < num_eng {
        return Err(ExportError::ShapeMismatch(format!(
            "{events} events cannot hold a dark, {num_eng} x {num_pos} images and {num_eng} flats"
        )));
    }
    let img_dark: ArrayView2<'_, f32> = imgs.index_axis(Axis(0), 0);
    let img_bkg = imgs.slice(s![events - num_eng.., .., ..]);

    for j in 0..num_pos {
        let indices: Vec<usize> = (0..num_eng).map(|i| 1 + i * num_pos + j).collect();
        let img_p = imgs.select(Axis(0), &indices);
        let img_xanes = normalize(img_p.view(), img_dark.insert_axis(Axis(0)), img_bkg)?;
        ctx.write_archive(
            report,
            format!("{}_id_{}_pos_{j}.h5", header.plan_name, header.scan_id),
            Lakeshore::Attach,
            |sink| header.put(sink, img_bkg, img_dark.into_dyn(), img_xanes.view()),
        )?;
    }
    Ok(())
}
