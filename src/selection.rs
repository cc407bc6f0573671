//! Selecting wall-clock chunks of an observation, and the time indices they cover.
//!
//! Observations are usually far too large to process at once. [`plan_chunks`] splits an
//! observation into fixed-duration chunks, each carrying the fractional time range that the
//! [`crate::DownsampleContext`] expects. [`time_index_range`] converts such a fractional range
//! into the time indices of a particular array.
//!
//! # Examples
//!
//! ```rust
//! use bfds::{plan_chunks, time_index_range};
//! use hifitime::{Duration, Epoch};
//!
//! let obs_start = Epoch::from_unix_seconds(1_650_000_000.);
//! let obs_end = obs_start + Duration::from_seconds(3600.);
//!
//! // quarter hour chunks
//! let chunks = plan_chunks(obs_start, obs_end, Duration::from_seconds(900.), None, false).unwrap();
//! assert_eq!(chunks.len(), 4);
//!
//! // the last chunk stops short of the end of the observation
//! let last = chunks.last().unwrap();
//! assert!(last.t_ratio_end < 1.);
//!
//! let idxs = time_index_range(chunks[0].t_ratio_start, chunks[0].t_ratio_end, 3601).unwrap();
//! assert_eq!(idxs, 0..900);
//! ```

use std::ops::Range;

use hifitime::{Duration, Epoch};
use log::{debug, warn};

use crate::{
    constants::{CHOP_OFF_ALIGNMENT_S, CHUNK_END_MARGIN_S},
    BfdsError,
};

/// A wall-clock chunk of an observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObsChunk {
    /// When the chunk starts
    pub start: Epoch,
    /// When the chunk ends
    pub end: Epoch,
    /// Start of the chunk as a fraction of the observation
    pub t_ratio_start: f64,
    /// End of the chunk as a fraction of the observation
    pub t_ratio_end: f64,
}

/// Convert a fractional time range of an array with `num_times` samples into time indices,
/// `floor(ratio * (num_times - 1))` at each end.
///
/// # Errors
///
/// Will return [`BfdsError::InvalidRatio`] unless `0 <= t_ratio_start < t_ratio_end <= 1`.
pub fn time_index_range(
    t_ratio_start: f64,
    t_ratio_end: f64,
    num_times: usize,
) -> Result<Range<usize>, BfdsError> {
    if !(0. ..=1.).contains(&t_ratio_start)
        || !(0. ..=1.).contains(&t_ratio_end)
        || t_ratio_start >= t_ratio_end
    {
        return Err(BfdsError::InvalidRatio {
            start: t_ratio_start,
            end: t_ratio_end,
        });
    }
    let last_idx = num_times.saturating_sub(1) as f64;
    let idx_start = (t_ratio_start * last_idx).floor() as usize;
    let idx_end = (t_ratio_end * last_idx).floor() as usize;
    Ok(idx_start..idx_end)
}

/// Split an observation into chunks of `chunk_duration`.
///
/// With `chop_off`, the first chunk starts on the next quarter hour (unix time) at or after
/// `obs_start`. Unless `num_chunks` is given, as many whole chunks as fit before `obs_end` are
/// planned, and at least one. No chunk ends later than ten seconds before `obs_end`; chunks that
/// would be empty after this are dropped.
///
/// # Errors
///
/// Will return [`BfdsError::InvalidTimeRange`] if `obs_end` is not after `obs_start`, or
/// `chunk_duration` is not positive.
pub fn plan_chunks(
    obs_start: Epoch,
    obs_end: Epoch,
    chunk_duration: Duration,
    num_chunks: Option<usize>,
    chop_off: bool,
) -> Result<Vec<ObsChunk>, BfdsError> {
    let obs_span_s = (obs_end - obs_start).to_seconds();
    let chunk_s = chunk_duration.to_seconds();
    if obs_span_s <= 0. || chunk_s <= 0. {
        return Err(BfdsError::InvalidTimeRange {
            start: format!("{obs_start}"),
            end: format!("{obs_end}"),
        });
    }

    let chunk_start = if chop_off {
        let aligned_s =
            (obs_start.to_unix_seconds() / CHOP_OFF_ALIGNMENT_S).ceil() * CHOP_OFF_ALIGNMENT_S;
        Epoch::from_unix_seconds(aligned_s)
    } else {
        obs_start
    };

    let num_chunks = num_chunks.unwrap_or_else(|| {
        let fitting = ((obs_end - chunk_start).to_seconds() / chunk_s).floor();
        fitting.max(1.) as usize
    });
    debug!("planning {num_chunks} chunks of {chunk_duration} from {chunk_start}");

    let latest_end = obs_end - Duration::from_seconds(CHUNK_END_MARGIN_S);
    let ratio = |epoch: Epoch| ((epoch - obs_start).to_seconds() / obs_span_s).clamp(0., 1.);

    let mut chunks = Vec::with_capacity(num_chunks);
    for chunk_idx in 0..num_chunks {
        let start = chunk_start + chunk_duration * chunk_idx as f64;
        let nominal_end = chunk_start + chunk_duration * (chunk_idx + 1) as f64;
        let end = if latest_end < nominal_end {
            latest_end
        } else {
            nominal_end
        };
        let (t_ratio_start, t_ratio_end) = (ratio(start), ratio(end));
        if t_ratio_start >= t_ratio_end {
            warn!("chunk {chunk_idx} ({start} to {end}) is outside the observation, skipping");
            continue;
        }
        chunks.push(ObsChunk {
            start,
            end,
            t_ratio_start,
            t_ratio_end,
        });
    }
    Ok(chunks)
}
