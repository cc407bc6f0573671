//! Block averaging primitives shared by the downsampler and the calibrator.

use log::trace;

use crate::ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, Axis, Zip};

/// Mean of consecutive non-overlapping blocks of `n` samples. A trailing partial block is
/// dropped.
///
/// # Examples
///
/// ```rust
/// use bfds::{averaging::avg_1d, ndarray::array};
///
/// let averaged = avg_1d(array![0., 1., 2., 3., 4.].view(), 2);
/// assert_eq!(averaged, array![0.5, 2.5]);
/// ```
pub fn avg_1d(values: ArrayView1<f64>, n: usize) -> Array1<f64> {
    if n == 0 {
        return Array1::zeros(0);
    }
    values
        .exact_chunks(n)
        .into_iter()
        .map(|block| block.iter().sum::<f64>() / n as f64)
        .collect()
}

/// Average `n_point` consecutive samples along `axis`, dropping a trailing partial block.
///
/// This is meant for small averaging factors on large arrays, the result is still large.
pub fn averaging_stride(values: ArrayView2<f32>, n_point: usize, axis: Axis) -> Array2<f32> {
    let (rt, rf) = match axis {
        Axis(0) => (n_point, 1),
        _ => (1, n_point),
    };
    block_average_2d(values, None, rt, rf).0
}

/// Mean of each `rt × rf` block of `values`, dropping trailing partial blocks along either
/// axis.
///
/// When `flags` is given, interference samples (`true`, as in [`crate::Flags`]) are left out of
/// each mean. A block with no unflagged samples is `NaN`. Returns the averaged array and the
/// number of such blocks.
///
/// Sums are accumulated in `f64`, in row-major order within each block, so the result for a
/// block only depends on the samples in that block.
///
/// # Examples
///
/// ```rust
/// use bfds::{averaging::block_average_2d, ndarray::array};
///
/// let values = array![[1_f32, 2., 3., 4.], [5., 6., 7., 8.]];
/// let flags = array![[false, true, false, false], [false, true, true, true]];
/// let (averaged, num_fully_flagged) = block_average_2d(values.view(), Some(flags.view()), 2, 2);
/// assert_eq!(averaged, array![[3_f32, 3.5]]);
/// assert_eq!(num_fully_flagged, 0);
/// ```
pub fn block_average_2d(
    values: ArrayView2<f32>,
    flags: Option<ArrayView2<bool>>,
    rt: usize,
    rf: usize,
) -> (Array2<f32>, usize) {
    let (num_times, num_freqs) = values.dim();
    if rt == 0 || rf == 0 {
        return (Array2::zeros((0, 0)), 0);
    }
    let out_dim = (num_times / rt, num_freqs / rf);
    trace!(
        "averaging {:?} by ({}, {}) into {:?}",
        values.dim(),
        rt,
        rf,
        out_dim
    );
    let mut averaged = Array2::<f32>::zeros(out_dim);
    let mut num_fully_flagged = 0;
    Zip::indexed(&mut averaged).for_each(|(t, f), out| {
        let block = values.slice(s![t * rt..(t + 1) * rt, f * rf..(f + 1) * rf]);
        let (sum, count) = match flags {
            Some(flags) => {
                let block_flags = flags.slice(s![t * rt..(t + 1) * rt, f * rf..(f + 1) * rf]);
                block
                    .iter()
                    .zip(block_flags.iter())
                    .filter(|&(_, &flagged)| !flagged)
                    .fold((0_f64, 0_usize), |(sum, count), (&value, _)| {
                        (sum + value as f64, count + 1)
                    })
            }
            None => (block.iter().map(|&v| v as f64).sum(), rt * rf),
        };
        *out = if count == 0 {
            num_fully_flagged += 1;
            f32::NAN
        } else {
            (sum / count as f64) as f32
        };
    });
    (averaged, num_fully_flagged)
}

/// Every `rt`th time sample and `rf`th channel, starting at the first.
pub fn stride_sample(values: ArrayView2<f32>, rt: usize, rf: usize) -> Array2<f32> {
    values
        .slice(s![..;rt.max(1), ..;rf.max(1)])
        .to_owned()
}
