//! Memory-bounded downsampling of dynamic spectra, with optional RFI flagging.

use std::fmt::Display;

use derive_builder::Builder;
use log::{debug, trace, warn};

use crate::{
    averaging::{avg_1d, block_average_2d, stride_sample},
    constants::DEFAULT_SEGMENT_CAP,
    ndarray::{concatenate, s, Array1, Array2, ArrayView1, Axis},
    selection::time_index_range,
    types::{DynamicSpectrum, SpectrumSource},
    util::progress_bar,
    with_increment_duration, BfdsError, RfiDetector,
};

/// Options for downsampling a selection of a dynamic spectrum.
///
/// # Examples
///
/// ```rust
/// use bfds::{ndarray::{Array, Array2}, DownsampleContextBuilder};
///
/// let data = Array2::from_elem((100, 8), 2_f32);
/// let time_axis = Array::linspace(0., 99., 100);
/// let freq_axis = Array::linspace(10., 17., 8);
///
/// let ctx = DownsampleContextBuilder::default()
///     .t_compression_ratio(10_usize)
///     .f_compression_ratio(4_usize)
///     .draw_progress(false)
///     .build()
///     .unwrap();
/// let downsampled = ctx
///     .downsample(&data, time_axis.view(), freq_axis.view(), 0., 1.)
///     .unwrap();
/// // 99 samples are selected, so the last partial block is dropped
/// assert_eq!(downsampled.data.dim(), (9, 2));
/// assert!(downsampled.data.iter().all(|&v| v == 2.));
/// ```
#[derive(Builder, Debug, Clone)]
pub struct DownsampleContext {
    /// Time samples averaged into one output sample
    #[builder(default = "1")]
    pub t_compression_ratio: usize,
    /// Channels averaged into one output channel
    #[builder(default = "1")]
    pub f_compression_ratio: usize,
    /// Output time samples per segment. Peak memory is proportional to
    /// `segment_cap * t_compression_ratio * num_chans`.
    #[builder(default = "DEFAULT_SEGMENT_CAP")]
    pub segment_cap: usize,
    /// Whether to block average. Otherwise samples are simply strided.
    #[builder(default = "true")]
    pub averaging: bool,
    /// Whether to flag RFI before averaging each segment
    #[builder(default = "false")]
    pub flagging: bool,
    /// The detector used when `flagging`
    #[builder(default)]
    pub detector: Option<RfiDetector>,
    /// Whether to draw progress bars
    #[builder(default = "true")]
    pub draw_progress: bool,
}

impl Default for DownsampleContext {
    fn default() -> Self {
        Self {
            t_compression_ratio: 1,
            f_compression_ratio: 1,
            segment_cap: DEFAULT_SEGMENT_CAP,
            averaging: true,
            flagging: false,
            detector: None,
            draw_progress: true,
        }
    }
}

/// The result of [`DownsampleContext::downsample`].
#[derive(Debug, Clone)]
pub struct Downsampled {
    /// Downsampled samples, dimensions `[time][frequency]`
    pub data: Array2<f32>,
    /// Timestamp of each output time sample
    pub time_axis: Array1<f64>,
    /// Frequency of each output channel
    pub freq_axis: Array1<f64>,
    /// Segments that were shorter than one output sample and contributed nothing
    pub num_short_segments: usize,
    /// Output samples where every input sample was flagged. These are `NaN`.
    pub num_fully_flagged: usize,
}

impl Downsampled {
    /// Convert into a [`DynamicSpectrum`].
    ///
    /// # Errors
    ///
    /// Will return [`BfdsError::BadArrayShape`] if the axes do not match the data, which only
    /// happens when the frequency axis given to the downsampler was shorter than the data.
    pub fn into_spectrum(self) -> Result<DynamicSpectrum, BfdsError> {
        DynamicSpectrum::new(self.data, self.time_axis, self.freq_axis)
    }
}

impl Display for DownsampleContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Will {} by {} in time and {} in frequency.",
            if self.averaging {
                "average"
            } else {
                "stride sample"
            },
            self.t_compression_ratio,
            self.f_compression_ratio
        )?;
        if self.averaging {
            writeln!(
                f,
                "Will read segments of {} time samples.",
                self.segment_cap * self.t_compression_ratio
            )?;
        }
        match (self.flagging, &self.detector) {
            (true, Some(detector)) => writeln!(
                f,
                "Will flag RFI with aggressiveness {:?} on {:?}.",
                detector.aggressiveness(),
                detector.device()
            )?,
            (true, None) => writeln!(f, "Will flag RFI, but no detector is configured!")?,
            (false, _) => writeln!(f, "Will not flag RFI.")?,
        }
        Ok(())
    }
}

impl DownsampleContext {
    /// A one line description of the tasks downsampling will do.
    pub fn as_comment(&self) -> String {
        [
            Some(format!(
                "{} {}x{}",
                if self.averaging {
                    "averaging"
                } else {
                    "stride sampling"
                },
                self.t_compression_ratio,
                self.f_compression_ratio
            )),
            if self.averaging {
                Some(format!("segments of {}", self.segment_cap))
            } else {
                None
            },
            if self.flagging && self.averaging {
                Some("rfi flagging".to_string())
            } else {
                None
            },
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<String>>()
        .join(", ")
    }

    /// Time samples read per segment.
    pub fn segment_len(&self) -> usize {
        self.segment_cap * self.t_compression_ratio
    }

    /// Estimate the peak memory in bytes needed to process one segment of `num_chans` channels.
    pub fn estimate_segment_bytes(&self, num_chans: usize) -> usize {
        let num_samples = self.segment_len() * num_chans;
        let raw = num_samples * std::mem::size_of::<f32>();
        if self.flagging {
            // flags, plus the detector's intermediate channels
            raw + num_samples * std::mem::size_of::<bool>()
                + 4 * num_samples * std::mem::size_of::<f32>()
        } else {
            raw
        }
    }

    fn validate(&self) -> Result<(), BfdsError> {
        for (argument, value) in [
            ("t_compression_ratio", self.t_compression_ratio),
            ("f_compression_ratio", self.f_compression_ratio),
            ("segment_cap", self.segment_cap),
        ] {
            if value == 0 {
                return Err(BfdsError::InvalidCompression {
                    argument: argument.to_string(),
                    value,
                });
            }
        }
        if self.flagging && self.detector.is_none() {
            return Err(BfdsError::MissingDetector);
        }
        Ok(())
    }

    /// Downsample the fraction `[t_ratio_start, t_ratio_end)` of `source`.
    ///
    /// `time_axis` and `freq_axis` describe the full source. Time indices are selected with
    /// [`time_index_range`], and processed in segments of [`DownsampleContext::segment_len`]
    /// samples so that the whole selection never needs to be in memory.
    ///
    /// # Errors
    ///
    /// - [`BfdsError::InvalidRatio`] for an invalid ratio range
    /// - [`BfdsError::InvalidCompression`] if a ratio or the segment cap is zero
    /// - [`BfdsError::MissingDetector`] if flagging without a detector
    /// - [`BfdsError::BadArrayShape`] if the axes do not match the source
    /// - errors from [`SpectrumSource::read_time_range`] are passed through unchanged
    pub fn downsample<S: SpectrumSource + ?Sized>(
        &self,
        source: &S,
        time_axis: ArrayView1<f64>,
        freq_axis: ArrayView1<f64>,
        t_ratio_start: f64,
        t_ratio_end: f64,
    ) -> Result<Downsampled, BfdsError> {
        self.validate()?;
        let (num_times, num_freqs) = source.dim();
        if time_axis.len() != num_times {
            return Err(BfdsError::BadArrayShape {
                argument: "time_axis".into(),
                function: "DownsampleContext::downsample".into(),
                expected: format!("({num_times},)"),
                received: format!("({},)", time_axis.len()),
            });
        }
        if freq_axis.len() != num_freqs {
            return Err(BfdsError::BadArrayShape {
                argument: "freq_axis".into(),
                function: "DownsampleContext::downsample".into(),
                expected: format!("({num_freqs},)"),
                received: format!("({},)", freq_axis.len()),
            });
        }
        let idx_range = time_index_range(t_ratio_start, t_ratio_end, num_times)?;
        debug!(
            "downsampling time indices {:?} of {:?}: {}",
            idx_range,
            (num_times, num_freqs),
            self.as_comment()
        );

        let (rt, rf) = (self.t_compression_ratio, self.f_compression_ratio);
        let segment_len = self.segment_len();
        let segment_starts: Vec<usize> = idx_range.clone().step_by(segment_len).collect();

        let progress = progress_bar(self.draw_progress, segment_starts.len(), "downsample");

        let mut data_segments: Vec<Array2<f32>> = Vec::with_capacity(segment_starts.len());
        let mut time_segments: Vec<Array1<f64>> = Vec::with_capacity(segment_starts.len());
        let mut num_short_segments = 0;
        let mut num_fully_flagged = 0;

        for segment_start in segment_starts {
            let segment_end = (segment_start + segment_len).min(idx_range.end);
            let segment_times = time_axis.slice(s![segment_start..segment_end]);

            if !self.averaging {
                // keep the stride aligned to the start of the selection
                let offset = (rt - (segment_start - idx_range.start) % rt) % rt;
                let first = segment_start + offset;
                if first < segment_end {
                    let segment = with_increment_duration!(
                        "read",
                        source.read_time_range(first..segment_end)?
                    );
                    data_segments.push(stride_sample(segment.view(), rt, rf));
                    time_segments.push(
                        time_axis
                            .slice(s![first..segment_end;rt])
                            .to_owned(),
                    );
                }
                progress.inc(1);
                continue;
            }

            if segment_end - segment_start < rt {
                trace!("segment {segment_start}..{segment_end} is shorter than {rt}, skipping");
                num_short_segments += 1;
                progress.inc(1);
                continue;
            }

            let segment = with_increment_duration!(
                "read",
                source.read_time_range(segment_start..segment_end)?
            );

            let flags = match (self.flagging, &self.detector) {
                (true, Some(detector)) => Some(with_increment_duration!(
                    "flag",
                    detector.flag(segment.view())
                )),
                _ => None,
            };

            let (averaged, segment_fully_flagged) = with_increment_duration!(
                "average",
                block_average_2d(
                    segment.view(),
                    flags.as_ref().map(|flags| flags.view()),
                    rt,
                    rf
                )
            );
            num_fully_flagged += segment_fully_flagged;
            data_segments.push(averaged);
            time_segments.push(avg_1d(segment_times, rt));
            progress.inc(1);
        }
        progress.finish();

        if num_short_segments > 0 {
            warn!("{num_short_segments} segments were shorter than {rt} samples and were skipped");
        }
        if num_fully_flagged > 0 {
            warn!("{num_fully_flagged} output samples were entirely flagged and are NaN");
        }

        let out_freqs = if self.averaging {
            num_freqs / rf
        } else {
            (num_freqs + rf - 1) / rf
        };
        let data = if data_segments.is_empty() {
            Array2::zeros((0, out_freqs))
        } else {
            let views: Vec<_> = data_segments.iter().map(|segment| segment.view()).collect();
            concatenate(Axis(0), &views).map_err(|err| BfdsError::BadArrayShape {
                argument: "segments".into(),
                function: "DownsampleContext::downsample".into(),
                expected: format!("segments with {out_freqs} channels"),
                received: err.to_string(),
            })?
        };
        let time_axis: Array1<f64> = time_segments
            .iter()
            .flat_map(|segment| segment.iter().copied())
            .collect();
        let freq_axis = if self.averaging {
            avg_1d(freq_axis, rf)
        } else {
            freq_axis.slice(s![..;rf]).to_owned()
        };

        Ok(Downsampled {
            data,
            time_axis,
            freq_axis,
            num_short_segments,
            num_fully_flagged,
        })
    }
}
