//! Flux calibration of a target dynamic spectrum against an observation of a calibrator source.
//!
//! The calibrator is cleaned in two passes. The first flags samples at or above an absolute
//! threshold and samples well above a robust per-channel baseline, dilates those flags, and
//! interpolates over them in time. The second flags samples well above the median of their
//! channel group and interpolates again. The cleaned calibrator is averaged in time, interpolated onto the target's
//! axes, and used with a flux model to scale the target into solar flux units.

use std::fmt::Display;

use derive_builder::Builder;
use itertools::izip;
use log::{debug, trace, warn};

use crate::{
    averaging::{averaging_stride, avg_1d},
    constants::{
        DEFAULT_ABS_THRESHOLD, DEFAULT_CAL_TIME_AVG, DEFAULT_DILATION_FREQ_PIXELS,
        DEFAULT_DILATION_TIME_PIXELS, DEFAULT_GROUP_MEDIAN_RATIO, DEFAULT_GROUP_NUM_CHANS,
        DEFAULT_LOWER_PERCENTILE, DEFAULT_RATIO_FLAG, DEFAULT_UPPER_PERCENTILE,
        REFERENCE_CALIBRATOR,
    },
    flux::model_flux_array,
    ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, Axis, Zip},
    types::{DynamicSpectrum, Mask},
    util::{interp, interp_many, median_mut, percentile_sorted, progress_bar, sort_floats},
    with_increment_duration, BfdsError,
};

/// Options for calibrating a target against a calibrator observation.
///
/// # Examples
///
/// ```rust
/// use bfds::CalibrationContextBuilder;
///
/// let cal_ctx = CalibrationContextBuilder::default()
///     .reference_calibrator("TauA")
///     .group_num_chans(10_usize)
///     .draw_progress(false)
///     .build()
///     .unwrap();
/// assert_eq!(cal_ctx.cal_time_avg, 16);
/// ```
#[derive(Builder, Debug, Clone)]
pub struct CalibrationContext {
    /// Calibrator samples at or above this are flagged
    #[builder(default = "DEFAULT_ABS_THRESHOLD")]
    pub abs_threshold: f32,
    /// Calibrator samples above this multiple of their channel's baseline are flagged
    #[builder(default = "DEFAULT_RATIO_FLAG")]
    pub ratio_flag: f64,
    /// Lower percentile of the samples in a channel's baseline
    #[builder(default = "DEFAULT_LOWER_PERCENTILE")]
    pub lower_percentile: f64,
    /// Upper percentile of the samples in a channel's baseline
    #[builder(default = "DEFAULT_UPPER_PERCENTILE")]
    pub upper_percentile: f64,
    /// Flags are dilated by this many pixels along the frequency index
    #[builder(default = "DEFAULT_DILATION_TIME_PIXELS")]
    pub dilation_time_pixels: usize,
    /// Flags are dilated by this many pixels along the time index
    #[builder(default = "DEFAULT_DILATION_FREQ_PIXELS")]
    pub dilation_freq_pixels: usize,
    /// Channels per group in the second pass
    #[builder(default = "DEFAULT_GROUP_NUM_CHANS")]
    pub group_num_chans: usize,
    /// Samples above this multiple of their group median are flagged in the second pass
    #[builder(default = "DEFAULT_GROUP_MEDIAN_RATIO")]
    pub group_median_ratio: f64,
    /// Time samples averaged together in the cleaned calibrator
    #[builder(default = "DEFAULT_CAL_TIME_AVG")]
    pub cal_time_avg: usize,
    /// Name of the calibrator source, used to look up its flux model
    #[builder(default = "REFERENCE_CALIBRATOR.to_string()", setter(into))]
    pub reference_calibrator: String,
    /// Whether to draw progress bars
    #[builder(default = "true")]
    pub draw_progress: bool,
}

impl Default for CalibrationContext {
    fn default() -> Self {
        Self {
            abs_threshold: DEFAULT_ABS_THRESHOLD,
            ratio_flag: DEFAULT_RATIO_FLAG,
            lower_percentile: DEFAULT_LOWER_PERCENTILE,
            upper_percentile: DEFAULT_UPPER_PERCENTILE,
            dilation_time_pixels: DEFAULT_DILATION_TIME_PIXELS,
            dilation_freq_pixels: DEFAULT_DILATION_FREQ_PIXELS,
            group_num_chans: DEFAULT_GROUP_NUM_CHANS,
            group_median_ratio: DEFAULT_GROUP_MEDIAN_RATIO,
            cal_time_avg: DEFAULT_CAL_TIME_AVG,
            reference_calibrator: REFERENCE_CALIBRATOR.to_string(),
            draw_progress: true,
        }
    }
}

impl Display for CalibrationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Will calibrate against the {} flux model.",
            self.reference_calibrator
        )?;
        writeln!(
            f,
            "Will flag calibrator samples at or above {:e}, or above {}x the mean of the {}-{} percentiles of their channel.",
            self.abs_threshold, self.ratio_flag, self.lower_percentile, self.upper_percentile
        )?;
        writeln!(
            f,
            "Will dilate flags by {} channels and {} timesteps.",
            self.dilation_time_pixels, self.dilation_freq_pixels
        )?;
        writeln!(
            f,
            "Will flag calibrator samples above {}x the median of groups of {} channels.",
            self.group_median_ratio, self.group_num_chans
        )?;
        writeln!(
            f,
            "Will average the cleaned calibrator by {} in time.",
            self.cal_time_avg
        )?;
        Ok(())
    }
}

/// The result of [`CalibrationContext::calibrate`].
#[derive(Debug, Clone)]
pub struct CalibrationResult {
    /// The target in solar flux units, dimensions `[time][frequency]`
    pub calibrated: Array2<f32>,
    /// The calibrator as given
    pub raw_calibrator: Array2<f32>,
    /// The calibrator after both cleaning passes, before time averaging
    pub cleaned_calibrator: Array2<f32>,
    /// Calibrator response on the target's axes
    pub surface: Array2<f64>,
    /// Samples kept by the first pass, after dilation. `false` where the sample was flagged.
    pub first_mask: Mask,
    /// Samples kept by the second pass
    pub second_mask: Mask,
    /// Channels with no unflagged samples in either pass, sorted. These were filled with the
    /// mean of the preceding channels.
    pub fallback_channels: Vec<usize>,
}

/// Keep samples below `abs_threshold`. Samples at or above it, and `NaN`, are flagged.
pub fn absolute_threshold_mask(cal: ArrayView2<f32>, abs_threshold: f32) -> Mask {
    cal.mapv(|value| value < abs_threshold)
}

/// Flag samples above `ratio_flag` times their channel's baseline. The baseline is the mean of
/// the samples between the `lower_percentile` and `upper_percentile` values of the channel.
/// Everything else is kept.
pub fn relative_excess_mask(
    cal: ArrayView2<f32>,
    lower_percentile: f64,
    upper_percentile: f64,
    ratio_flag: f64,
) -> Mask {
    let mut mask = Mask::from_elem(cal.dim(), true);
    for (chan_idx, (channel, mut chan_mask)) in izip!(cal.columns(), mask.columns_mut()).enumerate()
    {
        let mut sorted: Vec<f64> = channel
            .iter()
            .map(|&value| value as f64)
            .filter(|value| value.is_finite())
            .collect();
        sort_floats(&mut sorted);
        let lower = percentile_sorted(&sorted, lower_percentile);
        let upper = percentile_sorted(&sorted, upper_percentile);
        let window: Vec<f64> = sorted
            .iter()
            .copied()
            .filter(|&value| value >= lower && value <= upper)
            .collect();
        if window.is_empty() {
            trace!("channel {chan_idx} has an empty percentile window");
            continue;
        }
        let baseline = window.iter().sum::<f64>() / window.len() as f64;
        for (&value, kept) in izip!(channel, chan_mask.iter_mut()) {
            *kept = !(value as f64 > ratio_flag * baseline);
        }
    }
    mask
}

fn dilate_lanes(mask: &mut Mask, axis: Axis, radius: usize) {
    if radius == 0 {
        return;
    }
    let mut counts: Vec<usize> = Vec::new();
    for mut lane in mask.lanes_mut(axis) {
        let n = lane.len();
        counts.clear();
        counts.push(0);
        let mut running = 0;
        for &kept in lane.iter() {
            running += usize::from(!kept);
            counts.push(running);
        }
        for (idx, kept) in lane.iter_mut().enumerate() {
            let lower = idx.saturating_sub(radius);
            let upper = (idx + radius + 1).min(n);
            *kept = counts[upper] == counts[lower];
        }
    }
}

/// Extend every flagged (`false`) sample to its neighbours within `dilation_time_pixels` along
/// the frequency index and `dilation_freq_pixels` along the time index.
///
/// # Examples
///
/// ```rust
/// use bfds::{calibration::dilate_mask, ndarray::Array2};
///
/// let mut mask = Array2::from_elem((40, 10), true);
/// mask[[20, 5]] = false;
/// let dilated = dilate_mask(mask.view(), 2, 16);
/// assert_eq!(dilated.iter().filter(|&&kept| !kept).count(), 33 * 5);
/// assert!(!dilated[[4, 3]] && !dilated[[36, 7]]);
/// assert!(dilated[[3, 5]] && dilated[[20, 8]]);
/// ```
pub fn dilate_mask(
    mask: ArrayView2<bool>,
    dilation_time_pixels: usize,
    dilation_freq_pixels: usize,
) -> Mask {
    let mut dilated = mask.to_owned();
    dilate_lanes(&mut dilated, Axis(0), dilation_freq_pixels);
    dilate_lanes(&mut dilated, Axis(1), dilation_time_pixels);
    dilated
}

/// Replace flagged (`false` in `mask`) and non-finite samples of each channel by linear
/// interpolation over `time_axis` from the channel's kept samples, holding the edge values
/// outside their span.
///
/// A channel with nothing to interpolate from is filled with the mean of the channel means so
/// far (zero for the first channel). Returns the filled data and the indices of such channels.
pub fn interpolate_masked(
    data: ArrayView2<f32>,
    mask: ArrayView2<bool>,
    time_axis: ArrayView1<f64>,
) -> (Array2<f32>, Vec<usize>) {
    let mut filled = data.to_owned();
    let mut fallback_channels = vec![];
    let mut sum_of_means = 0_f64;
    let mut num_means = 0_usize;

    for (chan_idx, (mut channel, chan_mask)) in
        izip!(filled.columns_mut(), mask.columns()).enumerate()
    {
        let (xp, fp): (Vec<f64>, Vec<f64>) = izip!(time_axis, channel.iter(), chan_mask)
            .filter(|&(_, value, &kept)| kept && value.is_finite())
            .map(|(&time, &value, _)| (time, value as f64))
            .unzip();

        if xp.is_empty() {
            let fill = if num_means > 0 {
                sum_of_means / num_means as f64
            } else {
                0.
            };
            warn!("channel {chan_idx} has no unflagged samples, filling with {fill}");
            channel.fill(fill as f32);
            fallback_channels.push(chan_idx);
            continue;
        }

        for (&time, value, &kept) in izip!(time_axis, channel.iter_mut(), chan_mask) {
            if !kept || !value.is_finite() {
                *value = interp(time, &xp, &fp) as f32;
            }
        }
        sum_of_means += channel.iter().map(|&value| value as f64).sum::<f64>() / channel.len() as f64;
        num_means += 1;
    }
    (filled, fallback_channels)
}

/// Flag samples above `median_ratio` times the median of their timestep within groups of
/// `group_num_chans` adjacent channels. The last group may be smaller. Everything else is kept.
pub fn group_median_mask(data: ArrayView2<f32>, group_num_chans: usize, median_ratio: f64) -> Mask {
    let num_freqs = data.ncols();
    let mut mask = Mask::from_elem(data.dim(), true);
    if group_num_chans == 0 {
        return mask;
    }
    let mut scratch: Vec<f64> = Vec::with_capacity(group_num_chans);
    for group_start in (0..num_freqs).step_by(group_num_chans) {
        let group_end = (group_start + group_num_chans).min(num_freqs);
        let group = data.slice(s![.., group_start..group_end]);
        let mut group_mask = mask.slice_mut(s![.., group_start..group_end]);
        for (row, mut row_mask) in izip!(group.rows(), group_mask.rows_mut()) {
            scratch.clear();
            scratch.extend(
                row.iter()
                    .map(|&value| value as f64)
                    .filter(|value| value.is_finite()),
            );
            let median = median_mut(&mut scratch);
            for (&value, kept) in izip!(row, row_mask.iter_mut()) {
                *kept = !(value as f64 > median_ratio * median);
            }
        }
    }
    mask
}

/// Interpolate a calibrator response onto the target's axes. Each calibrator timestep is first
/// interpolated along frequency onto `target_freqs`, then each resulting channel is interpolated
/// along time onto `target_times`. Values are held constant outside the calibrator's axes.
pub fn build_calibration_surface(
    cal: ArrayView2<f32>,
    cal_times: ArrayView1<f64>,
    cal_freqs: ArrayView1<f64>,
    target_times: ArrayView1<f64>,
    target_freqs: ArrayView1<f64>,
) -> Array2<f64> {
    let (cal_freqs, target_freqs) = (cal_freqs.to_vec(), target_freqs.to_vec());
    let mut by_freq = Array2::<f64>::zeros((cal.nrows(), target_freqs.len()));
    for (cal_row, mut out_row) in izip!(cal.rows(), by_freq.rows_mut()) {
        let fp: Vec<f64> = cal_row.iter().map(|&value| value as f64).collect();
        out_row.assign(&Array1::from(interp_many(&target_freqs, &cal_freqs, &fp)));
    }

    let (cal_times, target_times) = (cal_times.to_vec(), target_times.to_vec());
    let mut surface = Array2::<f64>::zeros((target_times.len(), target_freqs.len()));
    for (cal_chan, mut out_chan) in izip!(by_freq.columns(), surface.columns_mut()) {
        let fp = cal_chan.to_vec();
        out_chan.assign(&Array1::from(interp_many(&target_times, &cal_times, &fp)));
    }
    surface
}

fn scale_by_model(
    target: ArrayView2<f32>,
    response: ArrayView2<f64>,
    model: ArrayView1<f64>,
) -> Array2<f32> {
    let mut calibrated = Array2::<f32>::zeros(target.dim());
    Zip::from(&mut calibrated)
        .and(&target)
        .and(&response)
        .and_broadcast(&model)
        .for_each(|out, &value, &response, &flux| {
            *out = (value as f64 * (flux / response)) as f32;
        });
    calibrated
}

/// Scale `target` into solar flux units: `target × model_flux(calibrator, f) / surface`.
///
/// # Errors
///
/// - [`BfdsError::UnknownCalibrator`] if there is no flux model for `calibrator`
/// - [`BfdsError::BadArrayShape`] if `surface` or `freqs_mhz` do not match `target`
pub fn apply_flux_model(
    target: ArrayView2<f32>,
    surface: ArrayView2<f64>,
    freqs_mhz: ArrayView1<f64>,
    calibrator: &str,
) -> Result<Array2<f32>, BfdsError> {
    let model = model_flux_array(calibrator, freqs_mhz)?;
    if surface.dim() != target.dim() {
        return Err(BfdsError::BadArrayShape {
            argument: "surface".into(),
            function: "apply_flux_model".into(),
            expected: format!("{:?}", target.dim()),
            received: format!("{:?}", surface.dim()),
        });
    }
    if freqs_mhz.len() != target.ncols() {
        return Err(BfdsError::BadArrayShape {
            argument: "freqs_mhz".into(),
            function: "apply_flux_model".into(),
            expected: format!("({},)", target.ncols()),
            received: format!("({},)", freqs_mhz.len()),
        });
    }
    Ok(scale_by_model(target, surface, model.view()))
}

/// Calibrate `target` against a single calibrator bandpass, measured at `freq_cal`.
///
/// The bandpass is linearly interpolated onto the target frequencies strictly inside the span of
/// `freq_cal`. Target channels outside that span take the value of the nearest channel inside it.
///
/// # Errors
///
/// - [`BfdsError::UnknownCalibrator`] if there is no flux model for `calibrator`
/// - [`BfdsError::BadArrayShape`] if `bandpass` and `freq_cal`, or `target` and `target_freqs`,
///   differ in length
pub fn calibrate_with_bandpass(
    target: ArrayView2<f32>,
    target_freqs: ArrayView1<f64>,
    bandpass: ArrayView1<f64>,
    freq_cal: ArrayView1<f64>,
    calibrator: &str,
) -> Result<Array2<f32>, BfdsError> {
    let model = model_flux_array(calibrator, target_freqs)?;
    if bandpass.len() != freq_cal.len() {
        return Err(BfdsError::BadArrayShape {
            argument: "bandpass".into(),
            function: "calibrate_with_bandpass".into(),
            expected: format!("({},)", freq_cal.len()),
            received: format!("({},)", bandpass.len()),
        });
    }
    if target_freqs.len() != target.ncols() {
        return Err(BfdsError::BadArrayShape {
            argument: "target_freqs".into(),
            function: "calibrate_with_bandpass".into(),
            expected: format!("({},)", target.ncols()),
            received: format!("({},)", target_freqs.len()),
        });
    }

    let xp = freq_cal.to_vec();
    let fp = bandpass.to_vec();
    let min_cal = xp.iter().copied().fold(f64::INFINITY, f64::min);
    let max_cal = xp.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let inside: Vec<usize> = target_freqs
        .iter()
        .enumerate()
        .filter(|&(_, &freq)| freq > min_cal && freq < max_cal)
        .map(|(idx, _)| idx)
        .collect();

    let mut interpolated: Array1<f64> = target_freqs.mapv(|freq| interp(freq, &xp, &fp));
    match (inside.first(), inside.last()) {
        (Some(&first), Some(&last)) => {
            let (first_value, last_value) = (interpolated[first], interpolated[last]);
            interpolated.slice_mut(s![..first]).fill(first_value);
            interpolated.slice_mut(s![last + 1..]).fill(last_value);
        }
        _ => warn!(
            "no target channel is inside the calibrator's span [{min_cal}, {max_cal}] MHz, holding bandpass edges"
        ),
    }

    let response = interpolated
        .broadcast(target.dim())
        .ok_or_else(|| BfdsError::BadArrayShape {
            argument: "bandpass".into(),
            function: "calibrate_with_bandpass".into(),
            expected: format!("{:?}", target.dim()),
            received: format!("({},)", interpolated.len()),
        })?;
    Ok(scale_by_model(target, response, model.view()))
}

impl CalibrationContext {
    /// A one line description of the tasks calibration will do.
    pub fn as_comment(&self) -> String {
        [
            Some(format!("calibrating against {}", self.reference_calibrator)),
            Some(format!(
                "dilating flags by {}x{}",
                self.dilation_freq_pixels, self.dilation_time_pixels
            )),
            Some(format!("groups of {}", self.group_num_chans)),
            if self.cal_time_avg > 1 {
                Some(format!("averaging by {}", self.cal_time_avg))
            } else {
                None
            },
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<String>>()
        .join(", ")
    }

    fn validate(&self) -> Result<(), BfdsError> {
        for (argument, value) in [
            ("group_num_chans", self.group_num_chans),
            ("cal_time_avg", self.cal_time_avg),
        ] {
            if value == 0 {
                return Err(BfdsError::InvalidCompression {
                    argument: argument.to_string(),
                    value,
                });
            }
        }
        Ok(())
    }

    /// Clean `calibrator` and use it to calibrate `target` into solar flux units.
    ///
    /// `calibrator` may be on different axes to `target`, its response is interpolated onto the
    /// target's axes.
    ///
    /// # Errors
    ///
    /// - [`BfdsError::UnknownCalibrator`] if there is no flux model for the reference calibrator,
    ///   before any work is done
    /// - [`BfdsError::InvalidCompression`] if `group_num_chans` or `cal_time_avg` is zero
    /// - [`BfdsError::BadArrayShape`] if the calibrator is empty
    pub fn calibrate(
        &self,
        target: &DynamicSpectrum,
        calibrator: &DynamicSpectrum,
    ) -> Result<CalibrationResult, BfdsError> {
        let model = model_flux_array(&self.reference_calibrator, target.freq_axis.view())?;
        self.validate()?;
        let (cal_num_times, cal_num_freqs) = calibrator.data.dim();
        if cal_num_times == 0 || cal_num_freqs == 0 {
            return Err(BfdsError::BadArrayShape {
                argument: "calibrator".into(),
                function: "CalibrationContext::calibrate".into(),
                expected: "at least one timestep and channel".into(),
                received: format!("{:?}", calibrator.data.dim()),
            });
        }
        debug!(
            "calibrating {:?} against {:?}: {}",
            target.data.dim(),
            calibrator.data.dim(),
            self.as_comment()
        );

        let progress = progress_bar(self.draw_progress, 4, "calibrate");
        let raw = calibrator.data.view();
        let cal_times = calibrator.time_axis.view();

        let first_mask = with_increment_duration!("flag", {
            let mut mask = absolute_threshold_mask(raw, self.abs_threshold);
            let excess = relative_excess_mask(
                raw,
                self.lower_percentile,
                self.upper_percentile,
                self.ratio_flag,
            );
            mask.zip_mut_with(&excess, |kept, &within_baseline| *kept &= within_baseline);
            dilate_mask(
                mask.view(),
                self.dilation_time_pixels,
                self.dilation_freq_pixels,
            )
        });
        let (first_pass, mut fallback_channels) = with_increment_duration!(
            "interpolate",
            interpolate_masked(raw, first_mask.view(), cal_times)
        );
        trace!(
            "first pass flagged {} of {} calibrator samples",
            first_mask.iter().filter(|&&kept| !kept).count(),
            first_mask.len()
        );
        progress.inc(1);

        let second_mask = with_increment_duration!(
            "flag",
            group_median_mask(first_pass.view(), self.group_num_chans, self.group_median_ratio)
        );
        let (cleaned, second_fallbacks) = with_increment_duration!(
            "interpolate",
            interpolate_masked(first_pass.view(), second_mask.view(), cal_times)
        );
        fallback_channels.extend(second_fallbacks);
        fallback_channels.sort_unstable();
        fallback_channels.dedup();
        progress.inc(1);

        let surface = with_increment_duration!("surface", {
            let time_avg = self.cal_time_avg.min(cal_num_times);
            let cal_avg = averaging_stride(cleaned.view(), time_avg, Axis(0));
            let cal_avg_times = avg_1d(cal_times, time_avg);
            build_calibration_surface(
                cal_avg.view(),
                cal_avg_times.view(),
                calibrator.freq_axis.view(),
                target.time_axis.view(),
                target.freq_axis.view(),
            )
        });
        progress.inc(1);

        let calibrated = scale_by_model(target.data.view(), surface.view(), model.view());
        progress.inc(1);
        progress.finish();

        if !fallback_channels.is_empty() {
            warn!(
                "{} calibrator channels were entirely flagged: {:?}",
                fallback_channels.len(),
                fallback_channels
            );
        }

        Ok(CalibrationResult {
            calibrated,
            raw_calibrator: calibrator.data.clone(),
            cleaned_calibrator: cleaned,
            surface,
            first_mask,
            second_mask,
            fallback_channels,
        })
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;
    use crate::{flux::model_flux, ndarray::Array};

    fn calibrator(num_times: usize, num_freqs: usize) -> DynamicSpectrum {
        let data = Array2::from_shape_fn((num_times, num_freqs), |(t, f)| {
            1e12 * (1. + 1e-3 * t as f32) + 1e10 * f as f32
        });
        DynamicSpectrum::new(
            data,
            Array::linspace(1_650_000_000., 1_650_000_000. + num_times as f64 - 1., num_times),
            Array::linspace(30., 30. + 0.2 * (num_freqs as f64 - 1.), num_freqs),
        )
        .unwrap()
    }

    fn quiet_ctx() -> CalibrationContext {
        CalibrationContextBuilder::default()
            .draw_progress(false)
            .build()
            .unwrap()
    }

    #[test]
    fn test_dilation_idempotent_when_saturated() {
        let full = Mask::from_elem((50, 20), false);
        assert_eq!(dilate_mask(full.view(), 2, 16), full);
        let empty = Mask::from_elem((50, 20), true);
        assert_eq!(dilate_mask(empty.view(), 2, 16), empty);
    }

    #[test]
    fn test_dilation_clips_at_edges() {
        let mut mask = Mask::from_elem((10, 10), true);
        mask[[0, 9]] = false;
        let dilated = dilate_mask(mask.view(), 1, 3);
        assert_eq!(dilated.iter().filter(|&&kept| !kept).count(), 4 * 2);
        assert!(!dilated[[3, 8]]);
        assert!(dilated[[4, 9]]);
    }

    #[test]
    fn test_absolute_threshold_keeps_samples_below() {
        let cal = crate::ndarray::array![[1e12_f32, 2e14], [f32::NAN, 1e14], [9.9e13, 0.]];
        let mask = absolute_threshold_mask(cal.view(), 1e14);
        assert_eq!(
            mask,
            crate::ndarray::array![[true, false], [false, false], [true, true]]
        );
    }

    #[test]
    fn test_relative_excess_flags_spikes_only() {
        let mut cal = Array2::from_elem((100, 2), 10_f32);
        cal[[30, 0]] = 16.;
        cal[[31, 0]] = 14.;
        let mask = relative_excess_mask(cal.view(), 15., 40., 1.5);
        assert!(!mask[[30, 0]]);
        assert_eq!(mask.iter().filter(|&&kept| !kept).count(), 1);
    }

    #[test]
    fn test_interpolate_masked_fills_linearly() {
        let data = crate::ndarray::array![[1_f32], [100.], [100.], [4.]];
        let mask = crate::ndarray::array![[true], [false], [false], [true]];
        let times = crate::ndarray::array![0., 1., 2., 3.];
        let (filled, fallbacks) = interpolate_masked(data.view(), mask.view(), times.view());
        assert_abs_diff_eq!(filled, crate::ndarray::array![[1_f32], [2.], [3.], [4.]]);
        assert!(fallbacks.is_empty());
    }

    #[test]
    fn test_interpolate_masked_fallback_uses_running_mean() {
        let data = Array2::from_shape_fn((4, 4), |(_, f)| (f + 1) as f32 * 10.);
        let mut mask = Mask::from_elem((4, 4), true);
        mask.column_mut(0).fill(false);
        mask.column_mut(3).fill(false);
        let times = Array::linspace(0., 3., 4);
        let (filled, fallbacks) = interpolate_masked(data.view(), mask.view(), times.view());
        assert_eq!(fallbacks, vec![0, 3]);
        // nothing before the first channel
        assert!(filled.column(0).iter().all(|&v| v == 0.));
        assert!(filled.column(3).iter().all(|&v| v == 25.));
    }

    #[test]
    fn test_group_median_mask() {
        let mut data = Array2::from_elem((3, 7), 5_f32);
        data[[1, 2]] = 11.;
        data[[2, 6]] = 9.;
        let mask = group_median_mask(data.view(), 3, 2.);
        assert!(!mask[[1, 2]]);
        // the last group has a single channel, which is its own median
        assert!(mask[[2, 6]]);
        assert_eq!(mask.iter().filter(|&&kept| !kept).count(), 1);
    }

    #[test]
    fn test_spike_is_interpolated_away() {
        let cal = calibrator(200, 50);
        let mut spiked = cal.clone();
        spiked.data.row_mut(100).mapv_inplace(|v| v * 10.);

        let result = quiet_ctx().calibrate(&cal, &spiked).unwrap();
        assert!(result.first_mask.row(100).iter().all(|&kept| !kept));
        assert!(result.first_mask.row(50).iter().all(|&kept| kept));
        assert!(result.fallback_channels.is_empty());
        for f in 0..50 {
            let expected = (spiked.data[[99, f]] + spiked.data[[101, f]]) / 2.;
            let cleaned = result.cleaned_calibrator[[100, f]];
            assert!(((cleaned - expected) / expected).abs() < 0.05);
        }
        assert!(result.calibrated.iter().all(|value| value.is_finite()));
    }

    #[test]
    fn test_self_calibration_of_spiked_calibrator_is_finite() {
        let mut cal = calibrator(200, 50);
        cal.data.row_mut(100).mapv_inplace(|v| v * 10.);

        let result = quiet_ctx().calibrate(&cal, &cal).unwrap();
        // only the spike and its dilation are flagged
        let num_flagged = result.first_mask.iter().filter(|&&kept| !kept).count();
        assert_eq!(num_flagged, 33 * 50);
        assert!(result.fallback_channels.is_empty());
        for f in [0, 3, 49] {
            let expected = (cal.data[[99, f]] + cal.data[[101, f]]) / 2.;
            assert_abs_diff_eq!(
                result.cleaned_calibrator[[100, f]],
                expected,
                epsilon = expected * 0.05
            );
        }
        assert!(result.calibrated.iter().all(|value| value.is_finite()));
        // the unspiked timesteps calibrate to the model
        let expected = model_flux("CasA", cal.freq_axis[3]).unwrap();
        assert_abs_diff_eq!(
            result.calibrated[[50, 3]] as f64,
            expected,
            epsilon = expected * 1e-2
        );
    }

    #[test]
    fn test_surface_equal_to_model_is_exact() {
        let target = calibrator(20, 8);
        let model = model_flux_array("CasA", target.freq_axis.view()).unwrap();
        let surface = model.broadcast(target.data.dim()).unwrap().to_owned();
        let calibrated = apply_flux_model(
            target.data.view(),
            surface.view(),
            target.freq_axis.view(),
            "CasA",
        )
        .unwrap();
        assert_eq!(calibrated, target.data);
    }

    #[test]
    fn test_build_calibration_surface_interpolates_both_axes() {
        let cal = crate::ndarray::array![[1_f32, 2.], [3., 4.]];
        let surface = build_calibration_surface(
            cal.view(),
            crate::ndarray::array![0., 10.].view(),
            crate::ndarray::array![30., 40.].view(),
            crate::ndarray::array![0., 5., 20.].view(),
            crate::ndarray::array![35., 50.].view(),
        );
        assert_abs_diff_eq!(
            surface,
            crate::ndarray::array![[1.5, 2.], [2.5, 3.], [3.5, 4.]],
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_self_calibration_gives_model_flux() {
        let cal = calibrator(160, 30);
        let result = quiet_ctx().calibrate(&cal, &cal).unwrap();
        // away from the edges of the averaged time axis
        for t in 8..152 {
            for f in 0..30 {
                let expected = model_flux("CasA", cal.freq_axis[f]).unwrap();
                assert_abs_diff_eq!(
                    result.calibrated[[t, f]] as f64,
                    expected,
                    epsilon = expected * 1e-4
                );
            }
        }
    }

    #[test]
    fn test_unknown_calibrator_fails_first() {
        let cal = calibrator(20, 8);
        let ctx = CalibrationContextBuilder::default()
            .reference_calibrator("CygA")
            .cal_time_avg(0_usize)
            .draw_progress(false)
            .build()
            .unwrap();
        assert!(matches!(
            ctx.calibrate(&cal, &cal),
            Err(BfdsError::UnknownCalibrator { .. })
        ));
    }

    #[test]
    fn test_calibrate_with_bandpass_holds_edges() {
        let target = Array2::from_elem((2, 5), 4_f32);
        let target_freqs = crate::ndarray::array![10., 20., 30., 40., 50.];
        let freq_cal = crate::ndarray::array![15., 45.];
        let bandpass = crate::ndarray::array![2., 8.];
        let calibrated = calibrate_with_bandpass(
            target.view(),
            target_freqs.view(),
            bandpass.view(),
            freq_cal.view(),
            "CasA",
        )
        .unwrap();
        let expected_bandpass = [3., 3., 5., 7., 7.];
        for (f, &bp) in expected_bandpass.iter().enumerate() {
            let expected = 4. / bp * model_flux("CasA", target_freqs[f]).unwrap();
            assert_abs_diff_eq!(calibrated[[1, f]] as f64, expected, epsilon = expected * 1e-6);
        }
    }

    #[test]
    fn test_display_and_comment() {
        let ctx = quiet_ctx();
        let display = format!("{ctx}");
        assert!(display.contains("CasA"));
        assert!(display.contains("groups of 15 channels"));
        assert_eq!(
            ctx.as_comment(),
            "calibrating against CasA, dilating flags by 16x2, groups of 15, averaging by 16"
        );
    }
}
