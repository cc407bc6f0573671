//! Containers for dynamic spectra and the sources they are read from.

use std::ops::Range;

use crate::{
    ndarray::{s, Array1, Array2, ArrayView2},
    BfdsError,
};

/// A boolean array with the shape of a spectrum. `true` means the sample is
/// trusted and kept, `false` that it is flagged.
pub type Mask = Array2<bool>;

/// An interference map with the shape of a spectrum. `true` means the pixel is likely
/// interference and is excluded from averages.
pub type Flags = Array2<bool>;

/// A time × frequency intensity matrix, with the axes it was sampled on.
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicSpectrum {
    /// Samples, dimensions `[time][frequency]`
    pub data: Array2<f32>,
    /// Timestamp of each time index \[unix seconds\]
    pub time_axis: Array1<f64>,
    /// Frequency of each frequency index \[MHz\]
    pub freq_axis: Array1<f64>,
}

impl DynamicSpectrum {
    /// Bundle a spectrum with its axes.
    ///
    /// # Errors
    ///
    /// Will return [`BfdsError::BadArrayShape`] if an axis length does not
    /// match the corresponding dimension of `data`.
    pub fn new(
        data: Array2<f32>,
        time_axis: Array1<f64>,
        freq_axis: Array1<f64>,
    ) -> Result<Self, BfdsError> {
        let (num_times, num_freqs) = data.dim();
        if time_axis.len() != num_times {
            return Err(BfdsError::BadArrayShape {
                argument: "time_axis".into(),
                function: "DynamicSpectrum::new".into(),
                expected: format!("({num_times},)"),
                received: format!("({},)", time_axis.len()),
            });
        }
        if freq_axis.len() != num_freqs {
            return Err(BfdsError::BadArrayShape {
                argument: "freq_axis".into(),
                function: "DynamicSpectrum::new".into(),
                expected: format!("({num_freqs},)"),
                received: format!("({},)", freq_axis.len()),
            });
        }
        Ok(Self {
            data,
            time_axis,
            freq_axis,
        })
    }

    /// The number of time samples.
    pub fn num_times(&self) -> usize {
        self.data.dim().0
    }

    /// The number of frequency channels.
    pub fn num_freqs(&self) -> usize {
        self.data.dim().1
    }
}

/// Anything that can hand out contiguous ranges of time samples from a
/// `[time][frequency]` array, e.g. a dataset in an HDF5 file.
///
/// Readers only need to support contiguous reads; callers never hold on to
/// more than one range at a time.
pub trait SpectrumSource {
    /// The shape of the full array, `(num_times, num_freqs)`.
    fn dim(&self) -> (usize, usize);

    /// Read the time samples in `range`, all frequencies.
    ///
    /// # Errors
    ///
    /// Errors from the underlying reader should be wrapped in
    /// [`BfdsError::Source`].
    fn read_time_range(&self, range: Range<usize>) -> Result<Array2<f32>, BfdsError>;
}

impl SpectrumSource for Array2<f32> {
    fn dim(&self) -> (usize, usize) {
        Array2::dim(self)
    }

    fn read_time_range(&self, range: Range<usize>) -> Result<Array2<f32>, BfdsError> {
        self.view().read_time_range(range)
    }
}

impl SpectrumSource for ArrayView2<'_, f32> {
    fn dim(&self) -> (usize, usize) {
        ArrayView2::dim(self)
    }

    fn read_time_range(&self, range: Range<usize>) -> Result<Array2<f32>, BfdsError> {
        let num_times = ArrayView2::dim(self).0;
        if range.start > range.end || range.end > num_times {
            return Err(BfdsError::BadArrayShape {
                argument: "range".into(),
                function: "SpectrumSource::read_time_range".into(),
                expected: format!("a range within 0..{num_times}"),
                received: format!("{range:?}"),
            });
        }
        Ok(self.slice(s![range, ..]).to_owned())
    }
}

impl SpectrumSource for DynamicSpectrum {
    fn dim(&self) -> (usize, usize) {
        self.data.dim()
    }

    fn read_time_range(&self, range: Range<usize>) -> Result<Array2<f32>, BfdsError> {
        self.data.view().read_time_range(range)
    }
}
