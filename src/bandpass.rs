//! Robust per-channel baselines from percentile-trimmed means.

use log::{trace, warn};

use crate::{
    constants::BANDPASS_MAX_SAMPLES,
    ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, Axis, Zip},
    util::sort_floats,
};

/// The mean of the sorted samples with ranks in `[floor(lo * n), floor(hi * n))`, where
/// `ratio_range = [lo, hi]`. This excludes both noise dips and interference spikes.
///
/// An empty window, e.g. from too few samples, gives `NaN`.
///
/// # Examples
///
/// ```rust
/// use bfds::{ndarray::Array1, partition_avg};
///
/// let values: Array1<f32> = (1..=100).map(|v| v as f32).collect();
/// assert_eq!(partition_avg(values.view(), [0.2, 0.8]), 50.5);
/// ```
pub fn partition_avg(values: ArrayView1<f32>, ratio_range: [f64; 2]) -> f64 {
    let mut sorted = values.to_vec();
    sort_floats(&mut sorted);
    let n = sorted.len();
    let lo = ((ratio_range[0] * n as f64).floor().max(0.) as usize).min(n);
    let hi = ((ratio_range[1] * n as f64).floor().max(0.) as usize).min(n);
    if hi <= lo {
        return f64::NAN;
    }
    let window = &sorted[lo..hi];
    window.iter().map(|&v| v as f64).sum::<f64>() / window.len() as f64
}

/// The [`partition_avg`] of each channel's light curve, usually with
/// [`crate::constants::DEFAULT_PARTITION_RANGE`]. Light curves longer than
/// [`BANDPASS_MAX_SAMPLES`] are subsampled with a stride of `num_times / BANDPASS_MAX_SAMPLES`.
pub fn build_bandpass(spectrum: ArrayView2<f32>, ratio_range: [f64; 2]) -> Array1<f64> {
    let (num_times, num_freqs) = spectrum.dim();
    let stride = if num_times > BANDPASS_MAX_SAMPLES {
        num_times / BANDPASS_MAX_SAMPLES
    } else {
        1
    };
    trace!("building bandpass of {num_freqs} channels, sampling every {stride} timesteps");
    let sampled = spectrum.slice(s![..;stride, ..]);
    let bandpass: Array1<f64> = sampled
        .axis_iter(Axis(1))
        .map(|light_curve| partition_avg(light_curve, ratio_range))
        .collect();
    let num_empty = bandpass.iter().filter(|v| v.is_nan()).count();
    if num_empty > 0 {
        warn!("{num_empty} bandpass channels had an empty ratio window {ratio_range:?}");
    }
    bandpass
}

/// Divide each channel by the [`partition_avg`] of its samples in `ratio_range`, usually a quiet
/// window like `[0.1, 0.3]`.
pub fn remove_bandpass(spectrum: ArrayView2<f32>, ratio_range: [f64; 2]) -> Array2<f32> {
    let baseline: Array1<f64> = spectrum
        .axis_iter(Axis(1))
        .map(|channel| partition_avg(channel, ratio_range))
        .collect();
    let mut normalised = spectrum.to_owned();
    Zip::from(normalised.columns_mut())
        .and(&baseline)
        .for_each(|mut channel, &base| channel.mapv_inplace(|v| (v as f64 / base) as f32));
    normalised
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;
    use crate::{
        constants::{DEFAULT_BANDPASS_REMOVAL_RANGE, DEFAULT_PARTITION_RANGE},
        ndarray::array,
    };

    #[test]
    fn test_partition_avg_trims_both_ends() {
        let values: Array1<f32> = (1..=100).rev().map(|v| v as f32).collect();
        assert_abs_diff_eq!(partition_avg(values.view(), [0.2, 0.8]), 50.5);
        assert_abs_diff_eq!(partition_avg(values.view(), [0., 1.]), 50.5);
        assert_abs_diff_eq!(partition_avg(values.view(), [0.1, 0.3]), 20.5);
    }

    #[test]
    fn test_partition_avg_ignores_spikes() {
        let mut values = Array1::from_elem(50, 10_f32);
        values[3] = 1e9;
        values[40] = 0.;
        assert_abs_diff_eq!(partition_avg(values.view(), [0.2, 0.8]), 10.);
    }

    #[test]
    fn test_partition_avg_empty_window_is_nan() {
        assert!(partition_avg(array![1_f32, 2.].view(), [0.2, 0.4]).is_nan());
        assert!(partition_avg(Array1::<f32>::zeros(0).view(), [0.2, 0.8]).is_nan());
    }

    #[test]
    fn test_build_bandpass_per_channel() {
        let spectrum = Array2::from_shape_fn((2500, 3), |(t, f)| {
            if t % 97 == 0 {
                1e6
            } else {
                (f + 1) as f32 * 10.
            }
        });
        let bandpass = build_bandpass(spectrum.view(), DEFAULT_PARTITION_RANGE);
        assert_abs_diff_eq!(bandpass, array![10., 20., 30.], epsilon = 1e-9);
    }

    #[test]
    fn test_remove_bandpass_flattens_channels() {
        let spectrum = Array2::from_shape_fn((40, 4), |(t, f)| (f + 1) as f32 * (1. + (t % 2) as f32));
        let flat = remove_bandpass(spectrum.view(), DEFAULT_BANDPASS_REMOVAL_RANGE);
        // the quiet window holds the low samples
        for channel in flat.columns() {
            assert_abs_diff_eq!(channel[0], 1., epsilon = 1e-6);
            assert_abs_diff_eq!(channel[1], 2., epsilon = 1e-6);
        }
    }
}
