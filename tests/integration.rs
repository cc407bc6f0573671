use std::{cell::Cell, ops::Range};

use approx::assert_abs_diff_eq;
use bfds::{
    constants::{DOWNSAMPLE_AGGRESSIVENESS, HZ_TO_MHZ},
    get_durations,
    ndarray::{concatenate, Array, Array1, Array2, Axis},
    plan_chunks, resolve_axes, BfdsError, CalibrationContextBuilder, Device,
    DischargeContextBuilder, DownsampleContextBuilder, DynamicSpectrum, RfiDetector,
    SpectrumSource,
};
use hifitime::{Duration, Epoch};

/// An in-memory source that remembers how much it was asked to read at once.
struct RecordingSource {
    data: Array2<f32>,
    longest_read: Cell<usize>,
    num_reads: Cell<usize>,
}

impl RecordingSource {
    fn new(data: Array2<f32>) -> Self {
        Self {
            data,
            longest_read: Cell::new(0),
            num_reads: Cell::new(0),
        }
    }
}

impl SpectrumSource for RecordingSource {
    fn dim(&self) -> (usize, usize) {
        self.data.dim()
    }

    fn read_time_range(&self, range: Range<usize>) -> Result<Array2<f32>, BfdsError> {
        self.longest_read
            .set(self.longest_read.get().max(range.len()));
        self.num_reads.set(self.num_reads.get() + 1);
        self.data.read_time_range(range)
    }
}

struct UnreadableSource;

impl SpectrumSource for UnreadableSource {
    fn dim(&self) -> (usize, usize) {
        (100, 4)
    }

    fn read_time_range(&self, _: Range<usize>) -> Result<Array2<f32>, BfdsError> {
        Err(BfdsError::Source {
            source: "dataset STOKES_0 is truncated".into(),
        })
    }
}

fn instrument_gain(num_times: usize, num_freqs: usize) -> Array2<f32> {
    Array2::from_shape_fn((num_times, num_freqs), |(_, f)| {
        1e12 * (1. + 0.5 * f as f32 / (num_freqs - 1) as f32)
    })
}

#[test]
fn test_chunked_downsample_then_calibrate() {
    env_logger::try_init().unwrap_or(());

    let (num_times, num_freqs) = (1201, 64);
    let obs_start = Epoch::from_unix_seconds(1_650_000_000.);
    let obs_end = obs_start + Duration::from_seconds(1200.);
    let raw_freqs_hz: Array1<f64> = Array::linspace(30e6, 93e6, num_freqs);
    let axes = resolve_axes(obs_start, obs_end, num_times, raw_freqs_hz.view()).unwrap();
    assert_abs_diff_eq!(axes.freq[1], 31., epsilon = 1e-9);

    // the sun is three times brighter than the calibrator
    let source = RecordingSource::new(instrument_gain(num_times, num_freqs) * 3.);

    let ds_ctx = DownsampleContextBuilder::default()
        .t_compression_ratio(10_usize)
        .f_compression_ratio(4_usize)
        .segment_cap(8_usize)
        .draw_progress(false)
        .build()
        .unwrap();

    let chunks = plan_chunks(obs_start, obs_end, Duration::from_seconds(600.), None, false).unwrap();
    assert_eq!(chunks.len(), 2);

    let downsampled: Vec<_> = chunks
        .iter()
        .map(|chunk| {
            ds_ctx
                .downsample(
                    &source,
                    axes.time.view(),
                    axes.freq.view(),
                    chunk.t_ratio_start,
                    chunk.t_ratio_end,
                )
                .unwrap()
        })
        .collect();
    assert!(source.longest_read.get() <= ds_ctx.segment_len());
    assert!(source.num_reads.get() > 2);
    assert!(get_durations().contains_key("read"));

    let data_views: Vec<_> = downsampled.iter().map(|ds| ds.data.view()).collect();
    let time_views: Vec<_> = downsampled.iter().map(|ds| ds.time_axis.view()).collect();
    let target = DynamicSpectrum::new(
        concatenate(Axis(0), &data_views).unwrap(),
        concatenate(Axis(0), &time_views).unwrap(),
        downsampled[0].freq_axis.clone(),
    )
    .unwrap();
    // 600 + 590 samples, averaged by 10 and 4
    assert_eq!(target.data.dim(), (119, 16));

    let cal_num_times = 300;
    let calibrator = DynamicSpectrum::new(
        instrument_gain(cal_num_times, num_freqs),
        Array::linspace(
            obs_start.to_unix_seconds(),
            obs_end.to_unix_seconds(),
            cal_num_times,
        ),
        raw_freqs_hz.mapv(|freq| freq * HZ_TO_MHZ),
    )
    .unwrap();

    let cal_ctx = CalibrationContextBuilder::default()
        .draw_progress(false)
        .build()
        .unwrap();
    let result = cal_ctx.calibrate(&target, &calibrator).unwrap();
    assert!(result.fallback_channels.is_empty());
    assert!(result.first_mask.iter().all(|&kept| kept));
    assert!(result.second_mask.iter().all(|&kept| kept));

    for (chan_idx, &freq) in target.freq_axis.iter().enumerate() {
        let expected = 3. * bfds::model_flux("CasA", freq).unwrap();
        for &value in result.calibrated.column(chan_idx) {
            assert_abs_diff_eq!(value as f64, expected, epsilon = expected * 1e-4);
        }
    }
}

#[test]
fn test_flagging_suppresses_rfi() {
    env_logger::try_init().unwrap_or(());

    let mut data = Array2::from_elem((256, 32), 100_f32);
    data.row_mut(50).fill(1e6);
    data.row_mut(170).fill(1e6);
    let source = RecordingSource::new(data);
    let time_axis = Array::linspace(1_650_000_000., 1_650_000_255., 256);
    let freq_axis = Array::linspace(30., 61., 32);

    let builder = DownsampleContextBuilder::default()
        .t_compression_ratio(4_usize)
        .f_compression_ratio(4_usize)
        .segment_cap(16_usize)
        .draw_progress(false)
        .clone();
    let unflagged = builder
        .clone()
        .build()
        .unwrap()
        .downsample(&source, time_axis.view(), freq_axis.view(), 0., 1.)
        .unwrap();
    let flagged = builder
        .clone()
        .flagging(true)
        .detector(Some(RfiDetector::new(
            DOWNSAMPLE_AGGRESSIVENESS,
            Device::Parallel { num_threads: 2 },
        )))
        .build()
        .unwrap()
        .downsample(&source, time_axis.view(), freq_axis.view(), 0., 1.)
        .unwrap();

    let max_finite = |data: &Array2<f32>| {
        data.iter()
            .copied()
            .filter(|value| value.is_finite())
            .fold(f32::MIN, f32::max)
    };
    assert!(max_finite(&unflagged.data) > 1e5);
    assert!(max_finite(&flagged.data) < 1e3);
}

#[test]
fn test_source_errors_pass_through() {
    env_logger::try_init().unwrap_or(());

    let ds_ctx = DownsampleContextBuilder::default()
        .draw_progress(false)
        .build()
        .unwrap();
    let time_axis = Array::linspace(0., 99., 100);
    let freq_axis = Array::linspace(30., 33., 4);
    let err = ds_ctx
        .downsample(&UnreadableSource, time_axis.view(), freq_axis.view(), 0., 1.)
        .unwrap_err();
    assert!(matches!(err, BfdsError::Source { .. }));
    assert!(err.to_string().contains("STOKES_0 is truncated"));
}

#[test]
fn test_quick_look_rejects_discharges() {
    env_logger::try_init().unwrap_or(());

    let mut data = Array2::from_shape_fn((2000, 8), |(_, f)| 1e10 * (f + 1) as f32);
    for discharge_idx in [130, 700, 1501] {
        data.row_mut(discharge_idx).mapv_inplace(|value| value * 30.);
    }

    // the default channel window is beyond these 8 channels, so the whole band is used
    let ctx = DischargeContextBuilder::default()
        .draw_progress(false)
        .build()
        .unwrap();
    let quick_look = ctx.average(data.view(), 0..2000).unwrap();
    assert_eq!(quick_look.data.dim(), (19, 8));
    assert_eq!(quick_look.first_center, 48);
    assert!(quick_look.num_rejected >= 3);
    for &value in quick_look.data.iter() {
        assert_abs_diff_eq!(value, 1., epsilon = 1e-5);
    }
}
