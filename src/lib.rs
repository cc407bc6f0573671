#![warn(missing_docs)]
#![warn(clippy::missing_safety_doc)]
#![warn(clippy::missing_errors_doc)]

//! bfds turns very large beamformed dynamic spectra (time × frequency intensity arrays) from a
//! radio telescope into small, RFI-flagged, flux-calibrated spectra.
//!
//! # Examples
//!
//! Downsample a spectrum, flagging RFI as we go, then calibrate it against a calibrator
//! observation.
//!
//! ```rust
//! use bfds::{
//!     ndarray::{Array, Array2},
//!     CalibrationContextBuilder, Device, DownsampleContextBuilder, DynamicSpectrum, RfiDetector,
//!     constants::DOWNSAMPLE_AGGRESSIVENESS,
//! };
//!
//! let (num_times, num_freqs) = (64, 32);
//! let raw = Array2::from_shape_fn((num_times, num_freqs), |(t, f)| 1e12 + (t + f) as f32 * 1e9);
//! let time_axis = Array::linspace(0., 63., num_times);
//! let freq_axis = Array::linspace(30., 80., num_freqs);
//!
//! let ds_ctx = DownsampleContextBuilder::default()
//!     .t_compression_ratio(4_usize)
//!     .f_compression_ratio(2_usize)
//!     .segment_cap(8_usize)
//!     .flagging(true)
//!     .detector(Some(RfiDetector::new(DOWNSAMPLE_AGGRESSIVENESS, Device::Cpu)))
//!     .draw_progress(false)
//!     .build()
//!     .unwrap();
//! let downsampled = ds_ctx
//!     .downsample(&raw, time_axis.view(), freq_axis.view(), 0., 1.)
//!     .unwrap();
//! let target = downsampled.into_spectrum().unwrap();
//!
//! let calibrator = DynamicSpectrum::new(
//!     Array2::from_elem((64, 32), 1e12_f32),
//!     Array::linspace(0., 63., 64),
//!     Array::linspace(30., 80., 32),
//! )
//! .unwrap();
//! let cal_ctx = CalibrationContextBuilder::default()
//!     .draw_progress(false)
//!     .build()
//!     .unwrap();
//! let result = cal_ctx.calibrate(&target, &calibrator).unwrap();
//! assert_eq!(result.calibrated.dim(), target.data.dim());
//! assert!(result.first_mask.iter().all(|&kept| kept));
//! ```
//!
//! # Details
//!
//! Arrays are [`ndarray`] arrays with dimensions `[time][frequency]`. Sources that are too large
//! to hold in memory are read through the [`SpectrumSource`] trait, a contiguous range of time
//! samples at a time.

use lazy_static::lazy_static;
use std::{collections::HashMap, sync::Mutex, time::Duration};

pub mod averaging;
pub mod axis;
pub mod bandpass;
pub mod calibration;
pub mod constants;
pub mod discharge;
pub mod downsample;
pub mod error;
pub mod flux;
pub mod rfi;
pub mod selection;
pub mod types;
pub mod util;

pub use ndarray;

pub use axis::{resolve_axes, resolve_freq_axis, resolve_time_axis, Axes};
pub use bandpass::{build_bandpass, partition_avg, remove_bandpass};
pub use calibration::{CalibrationContext, CalibrationContextBuilder, CalibrationResult};
pub use discharge::{DischargeAverage, DischargeContext, DischargeContextBuilder};
pub use downsample::{DownsampleContext, DownsampleContextBuilder, Downsampled};
pub use error::BfdsError;
pub use flux::{known_calibrators, model_flux, model_flux_array};
pub use rfi::{Device, RfiDetector};
pub use selection::{plan_chunks, time_index_range, ObsChunk};
pub use types::{DynamicSpectrum, Flags, Mask, SpectrumSource};

lazy_static! {
    static ref DURATIONS: Mutex<HashMap<String, Duration>> = Mutex::new(HashMap::new());
}

/// Add `duration` to the running total for `name`.
pub fn increment_duration(name: &str, duration: Duration) {
    if let Ok(mut durations) = DURATIONS.lock() {
        *durations.entry(name.to_string()).or_insert(Duration::ZERO) += duration;
    }
}

/// A snapshot of the time spent in each named phase so far.
pub fn get_durations() -> HashMap<String, Duration> {
    DURATIONS
        .lock()
        .map(|durations| durations.clone())
        .unwrap_or_default()
}

/// Evaluate an expression, adding the time it took to the running total for `$name`.
#[macro_export]
macro_rules! with_increment_duration {
    ($name:expr, $e:expr $(,)?) => {{
        let _now = std::time::Instant::now();
        let _res = $e;
        $crate::increment_duration($name, _now.elapsed());
        _res
    }};
}
