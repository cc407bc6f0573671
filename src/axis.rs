//! Resolve absolute time and frequency axes from observation metadata.

use hifitime::Epoch;
use log::trace;

use crate::{
    constants::HZ_TO_MHZ,
    ndarray::{Array, Array1, ArrayView1},
    BfdsError,
};

/// The time and frequency axes of a dynamic spectrum.
#[derive(Debug, Clone, PartialEq)]
pub struct Axes {
    /// Timestamp of each time index \[unix seconds\]
    pub time: Array1<f64>,
    /// Frequency of each channel \[MHz\]
    pub freq: Array1<f64>,
}

/// Evenly spaced timestamps spanning `[start, end]` inclusive, in unix seconds.
///
/// # Examples
///
/// ```rust
/// use bfds::resolve_time_axis;
/// use hifitime::Epoch;
///
/// let start = Epoch::from_unix_seconds(1_600_000_000.);
/// let end = Epoch::from_unix_seconds(1_600_000_004.);
/// let axis = resolve_time_axis(start, end, 5).unwrap();
/// assert_eq!(axis.len(), 5);
/// assert!((axis[1] - 1_600_000_001.).abs() < 1e-6);
/// ```
///
/// # Errors
///
/// Will return [`BfdsError::InvalidAxis`] if `num_samples` is zero.
pub fn resolve_time_axis(
    start: Epoch,
    end: Epoch,
    num_samples: usize,
) -> Result<Array1<f64>, BfdsError> {
    if num_samples == 0 {
        return Err(BfdsError::InvalidAxis {
            num_samples,
            reason: "a time axis needs at least one sample".into(),
        });
    }
    let start_s = start.to_unix_seconds();
    if num_samples == 1 {
        return Ok(Array1::from_elem(1, start_s));
    }
    // offsets are computed from the span so that precision does not depend on the epoch
    let span_s = (end - start).to_seconds();
    let step_s = span_s / (num_samples - 1) as f64;
    let mut axis: Array1<f64> = (0..num_samples)
        .map(|idx| start_s + step_s * idx as f64)
        .collect();
    axis[num_samples - 1] = start_s + span_s;
    Ok(axis)
}

/// Scale raw frequency values (e.g. Hz) by `scale` (e.g. [`HZ_TO_MHZ`]).
///
/// # Errors
///
/// Will return [`BfdsError::InvalidAxis`] if `raw` is empty or `scale` is not finite.
pub fn resolve_freq_axis(raw: ArrayView1<f64>, scale: f64) -> Result<Array1<f64>, BfdsError> {
    if raw.is_empty() {
        return Err(BfdsError::InvalidAxis {
            num_samples: 0,
            reason: "a frequency axis needs at least one channel".into(),
        });
    }
    if !scale.is_finite() {
        return Err(BfdsError::InvalidAxis {
            num_samples: raw.len(),
            reason: format!("frequency scale factor {scale} is not finite"),
        });
    }
    Ok(raw.mapv(|freq| freq * scale))
}

/// Resolve both axes of an observation. Raw frequencies are in Hz.
///
/// # Errors
///
/// See [`resolve_time_axis`] and [`resolve_freq_axis`].
pub fn resolve_axes(
    start: Epoch,
    end: Epoch,
    num_times: usize,
    raw_freqs_hz: ArrayView1<f64>,
) -> Result<Axes, BfdsError> {
    trace!("resolving axes for {num_times} timesteps between {start} and {end}");
    Ok(Axes {
        time: resolve_time_axis(start, end, num_times)?,
        freq: resolve_freq_axis(raw_freqs_hz, HZ_TO_MHZ)?,
    })
}

impl Axes {
    /// Axes for a spectrum whose raw frequencies are already in MHz, sampled evenly on
    /// `[first_mhz, last_mhz]`. Mostly useful for synthetic data.
    ///
    /// # Errors
    ///
    /// See [`resolve_time_axis`].
    pub fn linear(
        start: Epoch,
        end: Epoch,
        num_times: usize,
        first_mhz: f64,
        last_mhz: f64,
        num_freqs: usize,
    ) -> Result<Self, BfdsError> {
        if num_freqs == 0 {
            return Err(BfdsError::InvalidAxis {
                num_samples: num_freqs,
                reason: "a frequency axis needs at least one channel".into(),
            });
        }
        Ok(Self {
            time: resolve_time_axis(start, end, num_times)?,
            freq: Array::linspace(first_mhz, last_mhz, num_freqs),
        })
    }
}
