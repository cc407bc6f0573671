//! Errors that can occur while downsampling, flagging or calibrating dynamic spectra.

use thiserror::Error;

#[derive(Error, Debug)]
/// All the errors that can be returned by this crate.
pub enum BfdsError {
    #[error("cannot build an axis from {num_samples} samples: {reason}")]
    /// An axis could not be resolved from the provided metadata.
    InvalidAxis {
        /// The number of samples that was requested
        num_samples: usize,
        /// Why the axis is invalid
        reason: String,
    },

    #[error("invalid time ratio range [{start}, {end}), expected 0 <= start < end <= 1")]
    /// The fractional time range of a selection is out of bounds.
    InvalidRatio {
        /// The fractional start of the selection
        start: f64,
        /// The fractional end of the selection
        end: f64,
    },

    #[error("invalid value {value} for {argument}, must be at least 1")]
    /// A compression ratio or segment length is zero.
    InvalidCompression {
        /// The name of the offending argument
        argument: String,
        /// The value that was received
        value: usize,
    },

    #[error("flagging was requested but no RFI detector was configured")]
    /// Flagging was enabled on a downsampler without an [`crate::RfiDetector`].
    MissingDetector,

    #[error("{name} is not in the calibrators list")]
    /// The flux model has no entry for the given calibrator.
    UnknownCalibrator {
        /// The calibrator name that was looked up
        name: String,
    },

    #[error("bad array shape supplied to argument {argument} of function {function}. expected {expected}, received {received}")]
    /// Error for bad array shape in provided argument
    BadArrayShape {
        /// The argument name within the function
        argument: String,
        /// The function name
        function: String,
        /// The expected shape
        expected: String,
        /// The shape that was received instead
        received: String,
    },

    #[error("observation ends ({end}) before it starts ({start})")]
    /// An observation's end time is not after its start time.
    InvalidTimeRange {
        /// Observation start, formatted
        start: String,
        /// Observation end, formatted
        end: String,
    },

    #[error("could not read from spectrum source: {source}")]
    /// An error raised by the provider of spectrum samples, passed through unchanged.
    Source {
        /// The provider's error
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}
