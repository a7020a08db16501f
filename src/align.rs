//! Timestamp-angle alignment for fly-scans.
//!
//! During a fly-scan the rotation stage moves continuously while the camera
//! acquires frames. The stage position is polled on its own clock, so every
//! frame needs an angle interpolated from the motor trace at the frame's
//! acquisition time.
//!
//! The alignment works in two layers:
//!
//! - [`align_angles`] operates on plain relative seconds: it shifts both series
//!   onto a common zero-based time base, interpolates the motor positions at the
//!   frame times and locates the end of the sweep.
//! - [`align_timestamps`] accepts zone-localized timestamps and first converts
//!   them to day-relative seconds (`day*86400 + hour*3600 + min*60 + sec + us*1e-6`).
//!
//! The day-relative conversion assumes both series fall within one calendar day.
//! Scans spanning midnight (or a month boundary) produce a discontinuous time
//! base; this is logged as a warning and not corrected.
//!
//! # Example
//!
//! ```
//! use fxi_export::align::align_angles;
//!
//! let aligned = align_angles(&[0.0, 1.0, 2.0, 3.0], &[0.0, 2.0], &[10.0, 20.0])?;
//! assert_eq!(aligned.angles, vec![10.0, 15.0, 20.0, 20.0]);
//! assert_eq!(aligned.cutoff, 4);
//! # Ok::<(), fxi_export::align::AlignError>(())
//! ```

use chrono::{DateTime, Datelike, TimeZone, Timelike};
use chrono_tz::Tz;
use thiserror::Error;

/// Seconds between the Unix epoch and the EPICS epoch (1990-01-01T00:00:00Z).
pub const EPICS_EPOCH_UNIX_SECS: i64 = 631_152_000;

/// Errors raised by the aligner.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AlignError {
    /// The motor trace has no samples, so nothing can be interpolated.
    #[error("motor position series is empty")]
    EmptyMotorSeries,

    /// Motor timestamps and positions have different lengths.
    #[error("motor series length mismatch: {timestamps} timestamps vs {positions} positions")]
    LengthMismatch {
        /// Number of motor timestamps.
        timestamps: usize,
        /// Number of motor positions.
        positions: usize,
    },

    /// A raw timestamp could not be represented as a date-time.
    #[error("timestamp {0} is out of range")]
    InvalidTimestamp(f64),

    /// The aligned angles do not describe a single increasing sweep.
    #[error("rotation is not a single sweep: direction reverses at frame {index}")]
    NonMonotonicSweep {
        /// First frame index at which the direction reversal exceeds the tolerance.
        index: usize,
    },
}

/// Result of aligning frame timestamps against a motor trace.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedAngles {
    /// One interpolated angle per frame, in frame order.
    pub angles: Vec<f64>,
    /// Index of the sweep maximum plus one. Frames at or beyond this index
    /// belong to the return phase.
    pub cutoff: usize,
}

impl AlignedAngles {
    /// Angles of the forward sweep (`angles[..cutoff]`).
    pub fn sweep(&self) -> &[f64] {
        &self.angles[..self.cutoff]
    }

    /// Number of aligned frames.
    pub fn len(&self) -> usize {
        self.angles.len()
    }

    /// True when no frames were aligned.
    pub fn is_empty(&self) -> bool {
        self.angles.is_empty()
    }
}

/// One-dimensional piecewise linear interpolation.
///
/// Evaluates the function sampled at `(xp, fp)` at every point of `x`. Samples
/// are sorted by `xp` first, so the trace does not have to arrive in time
/// order. Points left of the first sample take `fp` of the first sample,
/// points right of the last sample take `fp` of the last sample.
pub fn interp(x: &[f64], xp: &[f64], fp: &[f64]) -> Result<Vec<f64>, AlignError> {
    if xp.len() != fp.len() {
        return Err(AlignError::LengthMismatch {
            timestamps: xp.len(),
            positions: fp.len(),
        });
    }
    if xp.is_empty() {
        return Err(AlignError::EmptyMotorSeries);
    }

    let mut samples: Vec<(f64, f64)> = xp.iter().copied().zip(fp.iter().copied()).collect();
    samples.sort_by(|a, b| a.0.total_cmp(&b.0));

    let (first_x, first_f) = samples[0];
    let (last_x, last_f) = samples[samples.len() - 1];

    let values = x
        .iter()
        .map(|&xi| {
            if xi <= first_x {
                return first_f;
            }
            if xi >= last_x {
                return last_f;
            }
            // first sample strictly to the right of xi; a NaN point or sample
            // time leaves no bracketing pair and evaluates to NaN
            let upper = samples.partition_point(|&(t, _)| t <= xi);
            let bracket = upper
                .checked_sub(1)
                .and_then(|lower| samples.get(lower))
                .zip(samples.get(upper));
            match bracket {
                Some((&(x0, f0), _)) if x0 == xi => f0,
                Some((&(x0, f0), &(x1, f1))) => f0 + (xi - x0) * (f1 - f0) / (x1 - x0),
                None => f64::NAN,
            }
        })
        .collect();

    Ok(values)
}

/// Align frames to motor positions on relative-second time bases.
///
/// Both series are shifted by the minimum value observed across the two, the
/// motor positions are interpolated at every frame time and the sweep cutoff
/// is computed as the position of the maximum angle plus one. When the maximum
/// occurs several times (a clamped tail repeats the last sample) the last
/// occurrence wins. An empty frame series yields no angles and a cutoff of 0.
pub fn align_angles(
    frame_times: &[f64],
    motor_times: &[f64],
    motor_positions: &[f64],
) -> Result<AlignedAngles, AlignError> {
    if motor_times.len() != motor_positions.len() {
        return Err(AlignError::LengthMismatch {
            timestamps: motor_times.len(),
            positions: motor_positions.len(),
        });
    }
    if motor_times.is_empty() {
        return Err(AlignError::EmptyMotorSeries);
    }

    let offset = frame_times
        .iter()
        .chain(motor_times.iter())
        .copied()
        .fold(f64::INFINITY, f64::min);

    let frames: Vec<f64> = frame_times.iter().map(|t| t - offset).collect();
    let motor: Vec<f64> = motor_times.iter().map(|t| t - offset).collect();

    let angles = interp(&frames, &motor, motor_positions)?;
    let cutoff = sweep_cutoff(&angles);

    tracing::debug!(
        frames = angles.len(),
        motor_samples = motor.len(),
        cutoff,
        "Aligned frame timestamps to motor trace"
    );

    Ok(AlignedAngles { angles, cutoff })
}

/// Index of the last maximum plus one, or 0 for an empty series.
fn sweep_cutoff(angles: &[f64]) -> usize {
    let mut best = f64::NEG_INFINITY;
    let mut cutoff = 0;
    for (i, &angle) in angles.iter().enumerate() {
        if angle >= best {
            best = angle;
            cutoff = i + 1;
        }
    }
    cutoff
}

/// Seconds since the start of the month, as used for the alignment time base.
pub fn day_relative_seconds<Z: TimeZone>(t: &DateTime<Z>) -> f64 {
    let micros = (t.nanosecond() % 1_000_000_000) / 1_000;
    f64::from(t.day()) * 86_400.0
        + f64::from(t.hour()) * 3_600.0
        + f64::from(t.minute()) * 60.0
        + f64::from(t.second())
        + f64::from(micros) * 1e-6
}

/// Align zone-localized frame timestamps to a zone-localized motor trace.
pub fn align_timestamps<Z: TimeZone>(
    frame_times: &[DateTime<Z>],
    motor_times: &[DateTime<Z>],
    motor_positions: &[f64],
) -> Result<AlignedAngles, AlignError> {
    let days = frame_times
        .iter()
        .chain(motor_times.iter())
        .map(|t| t.date_naive());
    if let (Some(first), Some(last)) = (days.clone().min(), days.max()) {
        if first != last {
            tracing::warn!(
                first_day = %first,
                last_day = %last,
                "Alignment timestamps span more than one calendar day; day-relative time base is discontinuous"
            );
        }
    }

    let frames: Vec<f64> = frame_times.iter().map(day_relative_seconds).collect();
    let motor: Vec<f64> = motor_times.iter().map(day_relative_seconds).collect();
    align_angles(&frames, &motor, motor_positions)
}

/// Reject aligned angles that do not describe one forward sweep.
///
/// Before the cutoff the angle must not drop by more than `tolerance` between
/// consecutive frames; after the cutoff it must not climb again by more than
/// `tolerance`. Oscillating scans fail here instead of being truncated at an
/// arbitrary peak.
pub fn ensure_single_sweep(aligned: &AlignedAngles, tolerance: f64) -> Result<(), AlignError> {
    let angles = &aligned.angles;
    for i in 1..aligned.cutoff {
        if angles[i] < angles[i - 1] - tolerance {
            return Err(AlignError::NonMonotonicSweep { index: i });
        }
    }
    for i in aligned.cutoff.max(1)..angles.len() {
        if angles[i] > angles[i - 1] + tolerance {
            return Err(AlignError::NonMonotonicSweep { index: i });
        }
    }
    Ok(())
}

/// Convert seconds since the Unix epoch into date-times in `tz`.
pub fn catalog_timestamps(epoch_secs: &[f64], tz: Tz) -> Result<Vec<DateTime<Tz>>, AlignError> {
    epoch_secs
        .iter()
        .map(|&secs| epoch_to_datetime(secs, 0, tz))
        .collect()
}

/// Convert detector hardware timestamps (seconds since the EPICS epoch) into
/// date-times in `tz`.
pub fn detector_timestamps(raw: &[f64], tz: Tz) -> Result<Vec<DateTime<Tz>>, AlignError> {
    raw.iter()
        .map(|&secs| epoch_to_datetime(secs, EPICS_EPOCH_UNIX_SECS, tz))
        .collect()
}

fn epoch_to_datetime(secs: f64, epoch_offset: i64, tz: Tz) -> Result<DateTime<Tz>, AlignError> {
    if !secs.is_finite() {
        return Err(AlignError::InvalidTimestamp(secs));
    }
    let whole = secs.floor();
    let nanos = (((secs - whole) * 1e9).round() as u32).min(999_999_999);
    let whole = whole as i64;

    whole
        .checked_add(epoch_offset)
        .and_then(|unix| DateTime::from_timestamp(unix, nanos))
        .map(|utc| utc.with_timezone(&tz))
        .ok_or(AlignError::InvalidTimestamp(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tracing_test::traced_test;

    #[test]
    fn concrete_scenario_clamps_and_cuts_after_last_peak() {
        let aligned = align_angles(&[0.0, 1.0, 2.0, 3.0], &[0.0, 2.0], &[10.0, 20.0]).unwrap();
        assert_eq!(aligned.angles, vec![10.0, 15.0, 20.0, 20.0]);
        assert_eq!(aligned.cutoff, 4);
        assert_eq!(aligned.sweep().len(), 4);
    }

    #[test]
    fn exact_at_knots() {
        let times = [3.0, 7.5, 11.0, 20.25];
        let positions = [0.0, 45.0, 90.0, 180.0];
        let aligned = align_angles(&times, &times, &positions).unwrap();
        assert_eq!(aligned.angles, positions.to_vec());
    }

    #[test]
    fn output_follows_frame_order() {
        let frames = [4.0, 0.0, 2.0, 1.0, 3.0];
        let aligned = align_angles(&frames, &[0.0, 4.0], &[0.0, 40.0]).unwrap();
        assert_eq!(aligned.angles, vec![40.0, 0.0, 20.0, 10.0, 30.0]);
        assert_eq!(aligned.len(), frames.len());
    }

    #[test]
    fn rise_then_fall_cuts_after_peak() {
        let motor_t = [0.0, 1.0, 2.0, 3.0, 4.0, 5.0];
        let motor_p = [0.0, 60.0, 120.0, 180.0, 90.0, 0.0];
        let aligned = align_angles(&motor_t, &motor_t, &motor_p).unwrap();
        assert_eq!(aligned.cutoff, 4);
        assert_eq!(aligned.sweep(), &[0.0, 60.0, 120.0, 180.0]);
    }

    #[test]
    fn translation_invariant() {
        let frames = [0.1, 0.7, 1.3, 2.9, 3.4];
        let motor_t = [0.0, 1.0, 2.0, 3.0];
        let motor_p = [0.0, 10.0, 25.0, 30.0];
        let base = align_angles(&frames, &motor_t, &motor_p).unwrap();

        let offset = 86_400.0 * 17.0 + 0.25;
        let shifted_frames: Vec<f64> = frames.iter().map(|t| t + offset).collect();
        let shifted_motor: Vec<f64> = motor_t.iter().map(|t| t + offset).collect();
        let shifted = align_angles(&shifted_frames, &shifted_motor, &motor_p).unwrap();

        assert_eq!(base.cutoff, shifted.cutoff);
        for (a, b) in base.angles.iter().zip(&shifted.angles) {
            assert!((a - b).abs() < 1e-9, "{a} != {b}");
        }
    }

    #[test]
    fn empty_motor_series_is_an_error() {
        let err = align_angles(&[0.0, 1.0], &[], &[]).unwrap_err();
        assert_eq!(err, AlignError::EmptyMotorSeries);
    }

    #[test]
    fn single_motor_sample_is_broadcast() {
        let aligned = align_angles(&[0.0, 5.0, 10.0], &[5.0], &[42.0]).unwrap();
        assert_eq!(aligned.angles, vec![42.0, 42.0, 42.0]);
    }

    #[test]
    fn mismatched_motor_lengths_are_rejected() {
        let err = align_angles(&[0.0], &[0.0, 1.0], &[1.0]).unwrap_err();
        assert_eq!(
            err,
            AlignError::LengthMismatch {
                timestamps: 2,
                positions: 1
            }
        );
    }

    #[test]
    fn empty_frames_give_zero_cutoff() {
        let aligned = align_angles(&[], &[0.0, 1.0], &[0.0, 1.0]).unwrap();
        assert!(aligned.is_empty());
        assert_eq!(aligned.cutoff, 0);
    }

    #[test]
    fn interp_sorts_unordered_samples() {
        let values = interp(&[1.5], &[2.0, 1.0, 3.0], &[20.0, 10.0, 30.0]).unwrap();
        assert_eq!(values, vec![15.0]);
    }

    #[test]
    fn nan_frame_time_gives_nan_angle() {
        let aligned = align_angles(&[0.5, f64::NAN], &[0.0, 1.0], &[0.0, 10.0]).unwrap();
        assert_eq!(aligned.angles[0], 5.0);
        assert!(aligned.angles[1].is_nan());
        assert_eq!(aligned.cutoff, 1);
    }

    #[test]
    fn nan_motor_time_does_not_bracket() {
        let values = interp(&[0.5, 1.5], &[0.0, 1.0, f64::NAN], &[0.0, 10.0, 99.0]).unwrap();
        assert_eq!(values[0], 5.0);
        assert!(values[1].is_nan());
        assert!(interp(&[0.5], &[-f64::NAN, 1.0], &[0.0, 10.0]).is_ok());
    }

    #[test]
    fn day_relative_seconds_uses_local_fields() {
        let t = Utc.with_ymd_and_hms(2023, 3, 14, 1, 2, 3).unwrap()
            + chrono::Duration::microseconds(250_000);
        let expected = 14.0 * 86_400.0 + 3_600.0 + 120.0 + 3.0 + 0.25;
        assert!((day_relative_seconds(&t) - expected).abs() < 1e-9);
    }

    #[test]
    fn detector_epoch_is_1990() {
        let converted = detector_timestamps(&[0.0, 1.5], chrono_tz::UTC).unwrap();
        assert_eq!(converted[0].timestamp(), EPICS_EPOCH_UNIX_SECS);
        assert_eq!(converted[1].timestamp_millis(), EPICS_EPOCH_UNIX_SECS * 1000 + 1500);

        let eastern = detector_timestamps(&[0.0], chrono_tz::US::Eastern).unwrap();
        assert_eq!(eastern[0].hour(), 19);
        assert_eq!(eastern[0].day(), 31);
    }

    #[test]
    fn non_finite_timestamps_are_rejected() {
        let err = catalog_timestamps(&[f64::NAN], chrono_tz::UTC).unwrap_err();
        assert!(matches!(err, AlignError::InvalidTimestamp(_)));
    }

    #[test]
    fn datetime_alignment_matches_numeric_alignment() {
        let tz = chrono_tz::US::Eastern;
        let base = 1_700_000_000.0;
        let frames = catalog_timestamps(&[base + 0.5, base + 1.0, base + 1.5], tz).unwrap();
        let motor = catalog_timestamps(&[base, base + 2.0], tz).unwrap();
        let aligned = align_timestamps(&frames, &motor, &[0.0, 180.0]).unwrap();
        assert_eq!(aligned.angles, vec![45.0, 90.0, 135.0]);
        assert_eq!(aligned.cutoff, 3);
    }

    #[test]
    #[traced_test]
    fn day_rollover_is_logged() {
        let tz = chrono_tz::UTC;
        let midnight = Utc.with_ymd_and_hms(2023, 5, 2, 0, 0, 0).unwrap().timestamp() as f64;
        let frames = catalog_timestamps(&[midnight - 1.0, midnight + 1.0], tz).unwrap();
        let motor = catalog_timestamps(&[midnight - 2.0, midnight + 2.0], tz).unwrap();
        align_timestamps(&frames, &motor, &[0.0, 4.0]).unwrap();
        assert!(logs_contain("more than one calendar day"));
    }

    #[test]
    fn single_sweep_validation() {
        let good = AlignedAngles {
            angles: vec![0.0, 90.0, 180.0, 90.0, 0.0, 0.0],
            cutoff: 3,
        };
        assert!(ensure_single_sweep(&good, 0.01).is_ok());

        let dips = AlignedAngles {
            angles: vec![0.0, 90.0, 30.0, 180.0],
            cutoff: 4,
        };
        assert_eq!(
            ensure_single_sweep(&dips, 0.01),
            Err(AlignError::NonMonotonicSweep { index: 2 })
        );

        let oscillates = AlignedAngles {
            angles: vec![0.0, 180.0, 0.0, 170.0],
            cutoff: 2,
        };
        assert_eq!(
            ensure_single_sweep(&oscillates, 0.01),
            Err(AlignError::NonMonotonicSweep { index: 3 })
        );

        let jitter = AlignedAngles {
            angles: vec![0.0, 10.0, 9.995, 20.0],
            cutoff: 4,
        };
        assert!(ensure_single_sweep(&jitter, 0.01).is_ok());
    }
}
