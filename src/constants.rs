// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Useful constants.
//!
//! Most of these are empirically tuned defaults. They are exposed so that the
//! builder contexts can override them, but their values should not change
//! without new calibration evidence.

/// Multiply a frequency in Hz by this to get MHz.
pub const HZ_TO_MHZ: f64 = 1e-6;

/// Multiply a flux density in Jansky by this to get solar flux units.
pub const JY_TO_SFU: f64 = 1e-4;

/// Aggressiveness of the RFI kernels: vertical line, horizontal line, time
/// edges, frequency edges. The larger, the more aggressive; (0, 4] is sensible.
pub const DEFAULT_AGGRESSIVENESS: [f32; 4] = [1.6, 1.65, 0.5, 0.5];

/// Aggressiveness used when flagging during downsampling.
pub const DOWNSAMPLE_AGGRESSIVENESS: [f32; 4] = [1.66, 1.66, 0.45, 0.45];

/// A pixel is flagged when its consensus count exceeds this.
pub const FLAG_CONSENSUS_EPSILON: f32 = 1e-7;

/// Time samples per segment, before downsampling.
pub const DEFAULT_SEGMENT_CAP: usize = 256;

/// Rank window used for the calibrator bandpass.
pub const DEFAULT_PARTITION_RANGE: [f64; 2] = [0.2, 0.8];

/// Light curves longer than this are subsampled when building a bandpass.
pub const BANDPASS_MAX_SAMPLES: usize = 1000;

/// Rank window used to normalise a spectrum by its quiet-time bandpass.
pub const DEFAULT_BANDPASS_REMOVAL_RANGE: [f64; 2] = [0.1, 0.3];

/// Calibrator samples at or above this are flagged.
pub const DEFAULT_ABS_THRESHOLD: f32 = 1e14;

/// Samples exceeding this multiple of their channel's quiet mean are flagged.
pub const DEFAULT_RATIO_FLAG: f64 = 1.5;

/// Lower percentile of the quiet window of a channel.
pub const DEFAULT_LOWER_PERCENTILE: f64 = 15.0;

/// Upper percentile of the quiet window of a channel.
pub const DEFAULT_UPPER_PERCENTILE: f64 = 40.0;

/// Dilation margin applied along the frequency index.
pub const DEFAULT_DILATION_TIME_PIXELS: usize = 2;

/// Dilation margin applied along the time index.
pub const DEFAULT_DILATION_FREQ_PIXELS: usize = 16;

/// Channels per group in the second flagging pass.
pub const DEFAULT_GROUP_NUM_CHANS: usize = 15;

/// Samples exceeding this multiple of their group median are flagged.
pub const DEFAULT_GROUP_MEDIAN_RATIO: f64 = 2.0;

/// Time averaging factor of the cleaned calibrator.
pub const DEFAULT_CAL_TIME_AVG: usize = 16;

/// The calibrator used to normalise calibrated output.
pub const REFERENCE_CALIBRATOR: &str = "CasA";

/// Chunks never extend past this many seconds before the end of an observation.
pub const CHUNK_END_MARGIN_S: f64 = 10.0;

/// Chopped chunks start on a multiple of this many seconds (a quarter hour).
pub const CHOP_OFF_ALIGNMENT_S: f64 = 900.0;

/// Time samples per window when rejecting discharges.
pub const DEFAULT_DISCHARGE_STRIDE: usize = 96;

/// Frequency index window used to build the discharge light curve.
pub const DEFAULT_DISCHARGE_FREQ_RANGE: [usize; 2] = [1600, 3500];

/// A light curve sample exceeding its neighbour by this factor is a peak.
pub const DEFAULT_DISCHARGE_PEAK_RATIO: f64 = 1.08;

/// Light curve samples above this are always rejected.
pub const DISCHARGE_ABS_CUTOFF: f64 = 0.5e13;
