//! Time averaging that leaves out samples hit by local discharges, which show up as very bright,
//! short, broadband spikes.

use std::{fmt::Display, ops::Range};

use derive_builder::Builder;
use log::{debug, warn};

use crate::{
    bandpass::remove_bandpass,
    constants::{
        DEFAULT_BANDPASS_REMOVAL_RANGE, DEFAULT_DISCHARGE_FREQ_RANGE, DEFAULT_DISCHARGE_PEAK_RATIO,
        DEFAULT_DISCHARGE_STRIDE, DISCHARGE_ABS_CUTOFF,
    },
    ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, Axis},
    util::progress_bar,
    BfdsError,
};

/// Options for [`DischargeContext::average`].
///
/// # Examples
///
/// ```rust
/// use bfds::{ndarray::Array2, DischargeContextBuilder};
///
/// let mut spectrum = Array2::from_elem((100, 4), 1_f32);
/// // a discharge
/// spectrum.row_mut(40).fill(50.);
///
/// let ctx = DischargeContextBuilder::default()
///     .stride(20_usize)
///     .freq_range([0, 4])
///     .remove_bandpass(false)
///     .draw_progress(false)
///     .build()
///     .unwrap();
/// let averaged = ctx.average(spectrum.view(), 0..100).unwrap();
/// assert_eq!(averaged.data.dim(), (4, 4));
/// assert!(averaged.data.iter().all(|&v| v == 1.));
/// ```
#[derive(Builder, Debug, Clone)]
pub struct DischargeContext {
    /// Time samples per output sample
    #[builder(default = "DEFAULT_DISCHARGE_STRIDE")]
    pub stride: usize,
    /// Channel indices `[start, end)` averaged into the light curve that discharges are detected
    /// in. Clamped to the spectrum.
    #[builder(default = "DEFAULT_DISCHARGE_FREQ_RANGE")]
    pub freq_range: [usize; 2],
    /// A sample this much brighter than a neighbour is a peak
    #[builder(default = "DEFAULT_DISCHARGE_PEAK_RATIO")]
    pub peak_ratio: f64,
    /// Whether to divide each channel of the result by its quiet level
    #[builder(default = "true")]
    pub remove_bandpass: bool,
    /// Whether to draw progress bars
    #[builder(default = "true")]
    pub draw_progress: bool,
}

impl Default for DischargeContext {
    fn default() -> Self {
        Self {
            stride: DEFAULT_DISCHARGE_STRIDE,
            freq_range: DEFAULT_DISCHARGE_FREQ_RANGE,
            peak_ratio: DEFAULT_DISCHARGE_PEAK_RATIO,
            remove_bandpass: true,
            draw_progress: true,
        }
    }
}

impl Display for DischargeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Will average every {} timesteps, rejecting peaks above {}x their neighbours in channels {:?}.",
            self.stride, self.peak_ratio, self.freq_range
        )?;
        writeln!(
            f,
            "Will {}remove the bandpass.",
            if self.remove_bandpass { "" } else { "not " }
        )?;
        Ok(())
    }
}

/// The result of [`DischargeContext::average`].
#[derive(Debug, Clone)]
pub struct DischargeAverage {
    /// One averaged sample per window, dimensions `[window][frequency]`
    pub data: Array2<f32>,
    /// Time index at the centre of the first window
    pub first_center: usize,
    /// Time index at the centre of the last window
    pub last_center: usize,
    /// Samples left out of the averages
    pub num_rejected: usize,
}

/// Which samples of `light_curve` to keep. A sample is rejected if it, or either neighbour, is a
/// local peak, if it exceeds the mean by more than twice the standard deviation, or if it exceeds
/// [`DISCHARGE_ABS_CUTOFF`]. Non-finite samples are always rejected.
fn quiet_samples(light_curve: ArrayView1<f64>, peak_ratio: f64) -> Vec<bool> {
    let n = light_curve.len();
    let mut is_peak = vec![false; n];
    for idx in 1..n.saturating_sub(1) {
        let (prev, this, next) = (
            light_curve[idx - 1],
            light_curve[idx],
            light_curve[idx + 1],
        );
        is_peak[idx] = prev * peak_ratio < this || this > next * peak_ratio;
    }

    let finite: Vec<f64> = light_curve.iter().copied().filter(|v| v.is_finite()).collect();
    let mean = finite.iter().sum::<f64>() / finite.len() as f64;
    let std = (finite.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / finite.len() as f64).sqrt();
    let ceiling = (2. * std + mean).min(DISCHARGE_ABS_CUTOFF);

    (0..n)
        .map(|idx| {
            let near_peak = is_peak[idx]
                || (idx > 0 && is_peak[idx - 1])
                || (idx + 1 < n && is_peak[idx + 1]);
            !near_peak && light_curve[idx] <= ceiling
        })
        .collect()
}

fn nan_mean(values: ArrayView1<f32>) -> f64 {
    let (sum, count) = values
        .iter()
        .filter(|value| !value.is_nan())
        .fold((0_f64, 0_usize), |(sum, count), &value| {
            (sum + value as f64, count + 1)
        });
    if count == 0 {
        f64::NAN
    } else {
        sum / count as f64
    }
}

impl DischargeContext {
    /// Average `spectrum` over the time indices `idx_range` in windows of `stride`, leaving out
    /// discharges. The last window, and any partial window, are dropped. A window where every
    /// sample is rejected is `NaN`.
    ///
    /// # Errors
    ///
    /// - [`BfdsError::InvalidCompression`] if `stride` is zero
    /// - [`BfdsError::BadArrayShape`] if `idx_range` is outside `spectrum`
    pub fn average(
        &self,
        spectrum: ArrayView2<f32>,
        idx_range: Range<usize>,
    ) -> Result<DischargeAverage, BfdsError> {
        if self.stride == 0 {
            return Err(BfdsError::InvalidCompression {
                argument: "stride".into(),
                value: self.stride,
            });
        }
        let (num_times, num_freqs) = spectrum.dim();
        if idx_range.start > idx_range.end || idx_range.end > num_times {
            return Err(BfdsError::BadArrayShape {
                argument: "idx_range".into(),
                function: "DischargeContext::average".into(),
                expected: format!("a range within 0..{num_times}"),
                received: format!("{idx_range:?}"),
            });
        }

        let mut freq_start = self.freq_range[0].min(num_freqs);
        let mut freq_end = self.freq_range[1].min(num_freqs);
        if freq_start >= freq_end {
            warn!(
                "channel range {:?} is empty for {num_freqs} channels, using the whole band",
                self.freq_range
            );
            (freq_start, freq_end) = (0, num_freqs);
        }

        let stride = self.stride;
        let num_windows = ((idx_range.end - idx_range.start) / stride).saturating_sub(1);
        debug!(
            "averaging {num_windows} windows of {stride} from {:?}, detecting in channels {freq_start}..{freq_end}",
            idx_range
        );

        let progress = progress_bar(self.draw_progress, num_windows, "discharge");
        let mut data = Array2::<f32>::zeros((num_windows, num_freqs));
        let mut num_rejected = 0;
        for (window_idx, mut out) in data.outer_iter_mut().enumerate() {
            let window_start = idx_range.start + window_idx * stride;
            let window = spectrum.slice(s![window_start..window_start + stride, ..]);
            let light_curve: Array1<f64> = window
                .slice(s![.., freq_start..freq_end])
                .axis_iter(Axis(0))
                .map(nan_mean)
                .collect();
            let keep = quiet_samples(light_curve.view(), self.peak_ratio);

            let num_kept = keep.iter().filter(|&&kept| kept).count();
            num_rejected += stride - num_kept;
            if num_kept == 0 {
                out.fill(f32::NAN);
                progress.inc(1);
                continue;
            }
            let mut sums = Array1::<f64>::zeros(num_freqs);
            for (row, _) in window
                .outer_iter()
                .zip(keep.iter())
                .filter(|&(_, &kept)| kept)
            {
                sums.zip_mut_with(&row, |sum, &value| *sum += value as f64);
            }
            out.zip_mut_with(&sums, |out, &sum| *out = (sum / num_kept as f64) as f32);
            progress.inc(1);
        }
        progress.finish();

        if num_rejected > 0 {
            debug!("rejected {num_rejected} samples as discharges");
        }

        let data = if self.remove_bandpass && num_windows > 0 {
            remove_bandpass(data.view(), DEFAULT_BANDPASS_REMOVAL_RANGE)
        } else {
            data
        };

        let first_center = idx_range.start + stride / 2;
        Ok(DischargeAverage {
            data,
            first_center,
            last_center: first_center + num_windows.saturating_sub(1) * stride,
            num_rejected,
        })
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;
    use crate::ndarray::array;

    fn ctx(stride: usize, remove_bandpass: bool) -> DischargeContext {
        DischargeContextBuilder::default()
            .stride(stride)
            .freq_range([0, 8])
            .remove_bandpass(remove_bandpass)
            .draw_progress(false)
            .build()
            .unwrap()
    }

    #[test]
    fn test_quiet_samples_rejects_peak_and_neighbours() {
        let light_curve = array![1., 1., 1., 1., 5., 1., 1., 1., 1., 1.];
        let keep = quiet_samples(light_curve.view(), 1.08);
        assert_eq!(
            keep,
            vec![true, true, true, false, false, false, true, true, true, true]
        );
    }

    #[test]
    fn test_quiet_samples_absolute_cutoff() {
        let light_curve = Array1::from_elem(10, 1e13);
        assert!(quiet_samples(light_curve.view(), 1.08).iter().all(|&kept| !kept));
    }

    #[test]
    fn test_discharge_left_out_of_average() {
        let mut spectrum = Array2::from_shape_fn((400, 8), |(_, f)| (f + 1) as f32);
        spectrum.slice_mut(s![150..152, ..]).mapv_inplace(|v| v * 40.);
        let averaged = ctx(50, false).average(spectrum.view(), 0..400).unwrap();
        assert_eq!(averaged.data.dim(), (7, 8));
        for row in averaged.data.outer_iter() {
            for (f, &value) in row.iter().enumerate() {
                assert_abs_diff_eq!(value, (f + 1) as f32, epsilon = 1e-6);
            }
        }
        assert!(averaged.num_rejected >= 2);
        assert_eq!(averaged.first_center, 25);
        assert_eq!(averaged.last_center, 325);
    }

    #[test]
    fn test_remove_bandpass_normalises_channels() {
        let spectrum = Array2::from_shape_fn((1000, 8), |(t, f)| {
            (f + 1) as f32 * (1. + 0.01 * (t / 100) as f32)
        });
        let averaged = ctx(100, true).average(spectrum.view(), 0..1000).unwrap();
        let first = averaged.data.row(0).to_owned();
        for &value in first.iter() {
            assert_abs_diff_eq!(value, first[0], epsilon = 1e-6);
        }
    }

    #[test]
    fn test_average_rejects_bad_range() {
        let spectrum = Array2::<f32>::zeros((10, 2));
        assert!(matches!(
            ctx(2, false).average(spectrum.view(), 0..11),
            Err(BfdsError::BadArrayShape { .. })
        ));
        assert!(matches!(
            ctx(0, false).average(spectrum.view(), 0..10),
            Err(BfdsError::InvalidCompression { .. })
        ));
    }
}
