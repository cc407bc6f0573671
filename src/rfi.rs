//! Rule-based RFI detection with fixed directional convolution kernels.
//!
//! Each kernel responds to one morphology: a transient (a line across all frequencies at one
//! time), a narrow band (a line across all times at one frequency), or the leading and trailing
//! edges of extended structure in either direction. A pixel is only flagged when its neighbours
//! agree, which is checked by convolving the thresholded response with a boolean copy of the
//! kernel.

use std::sync::Arc;

use itertools::izip;
use log::{trace, warn};
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::{
    constants::{DEFAULT_AGGRESSIVENESS, FLAG_CONSENSUS_EPSILON},
    ndarray::{Array2, ArrayView2, Zip},
    types::Flags,
};

/// Where the detector's convolutions run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Device {
    /// Serial, on the calling thread.
    #[default]
    Cpu,
    /// On a dedicated rayon thread pool. `num_threads == 0` lets rayon decide.
    Parallel {
        /// Threads in the pool
        num_threads: usize,
    },
}

/// A fixed-kernel RFI detector. Construct once and reuse for every block.
#[derive(Debug, Clone)]
pub struct RfiDetector {
    aggressiveness: [f32; 4],
    device: Device,
    /// vertical, horizontal
    line_kernels: [Array2<f32>; 2],
    line_bool_kernels: [Array2<f32>; 2],
    /// left, right, upper, lower
    edge_kernels: [Array2<f32>; 4],
    edge_bool_kernels: [Array2<f32>; 4],
    spread_kernel: Array2<f32>,
    pool: Option<Arc<ThreadPool>>,
}

impl Default for RfiDetector {
    fn default() -> Self {
        Self::new(DEFAULT_AGGRESSIVENESS, Device::Cpu)
    }
}

/// 1 where a kernel is positive, 0 elsewhere.
fn boolean_kernel(kernel: &Array2<f32>) -> Array2<f32> {
    kernel.mapv(|w| if w > 0. { 1. } else { 0. })
}

fn heaviside(values: &Array2<f32>) -> Array2<f32> {
    values.mapv(|v| if v > 0. { 1. } else { 0. })
}

/// Cross-correlate `input` with an odd-sized `kernel`, zero padded so that the output has the
/// shape of the input.
fn correlate_same(input: ArrayView2<f32>, kernel: ArrayView2<f32>, parallel: bool) -> Array2<f32> {
    let (num_rows, num_cols) = input.dim();
    let (kernel_rows, kernel_cols) = kernel.dim();
    let (row_offset, col_offset) = ((kernel_rows / 2) as isize, (kernel_cols / 2) as isize);
    let taps: Vec<(isize, isize, f32)> = kernel
        .indexed_iter()
        .filter(|&(_, &weight)| weight != 0.)
        .map(|((row, col), &weight)| (row as isize - row_offset, col as isize - col_offset, weight))
        .collect();

    let mut output = Array2::<f32>::zeros((num_rows, num_cols));
    let pixel = |(row, col): (usize, usize), out: &mut f32| {
        let mut acc = 0.;
        for &(d_row, d_col, weight) in &taps {
            let (src_row, src_col) = (row as isize + d_row, col as isize + d_col);
            if src_row < 0
                || src_col < 0
                || src_row as usize >= num_rows
                || src_col as usize >= num_cols
            {
                continue;
            }
            acc += weight * input[[src_row as usize, src_col as usize]];
        }
        *out = acc;
    };
    if parallel {
        Zip::indexed(&mut output).par_for_each(pixel);
    } else {
        Zip::indexed(&mut output).for_each(pixel);
    }
    output
}

impl RfiDetector {
    /// Build the kernels for the given aggressiveness `[vertical, horizontal, time edge,
    /// frequency edge]`. Larger values flag more; `(0, 4]` is sensible.
    ///
    /// If a dedicated pool can not be built for [`Device::Parallel`], the global rayon pool is
    /// used instead.
    pub fn new(aggressiveness: [f32; 4], device: Device) -> Self {
        let [a_vert, a_horiz, a_time_edge, a_freq_edge] = aggressiveness;

        // dimensions are [time][frequency]
        let vertical =
            Array2::from_shape_fn((3, 3), |(t, _)| if t == 1 { a_vert } else { -1. });
        let horizontal =
            Array2::from_shape_fn((3, 3), |(_, f)| if f == 1 { a_horiz } else { -1. });
        let left = Array2::from_shape_fn((5, 5), |(t, _)| if t < 3 { a_time_edge } else { -1. });
        let right = Array2::from_shape_fn((5, 5), |(t, _)| if t >= 2 { a_time_edge } else { -1. });
        let upper = Array2::from_shape_fn((5, 5), |(_, f)| if f < 3 { a_freq_edge } else { -1. });
        let lower = Array2::from_shape_fn((5, 5), |(_, f)| if f >= 2 { a_freq_edge } else { -1. });

        let line_kernels = [vertical, horizontal];
        let edge_kernels = [left, right, upper, lower];

        let pool = match device {
            Device::Cpu => None,
            Device::Parallel { num_threads } => {
                match ThreadPoolBuilder::new().num_threads(num_threads).build() {
                    Ok(pool) => Some(Arc::new(pool)),
                    Err(err) => {
                        warn!("could not build a thread pool for RFI detection, using the global pool: {err}");
                        None
                    }
                }
            }
        };

        Self {
            aggressiveness,
            device,
            line_bool_kernels: [
                boolean_kernel(&line_kernels[0]),
                boolean_kernel(&line_kernels[1]),
            ],
            edge_bool_kernels: [
                boolean_kernel(&edge_kernels[0]),
                boolean_kernel(&edge_kernels[1]),
                boolean_kernel(&edge_kernels[2]),
                boolean_kernel(&edge_kernels[3]),
            ],
            line_kernels,
            edge_kernels,
            spread_kernel: Array2::ones((5, 5)),
            pool,
        }
    }

    /// The aggressiveness the kernels were built with.
    pub fn aggressiveness(&self) -> [f32; 4] {
        self.aggressiveness
    }

    /// Where the convolutions run.
    pub fn device(&self) -> Device {
        self.device
    }

    /// Flag a `[time][frequency]` block. `true` means the pixel is likely interference.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use bfds::{ndarray::Array2, Device, RfiDetector};
    ///
    /// let mut block = Array2::<f32>::zeros((16, 16));
    /// block.row_mut(8).fill(100.);
    /// let flags = RfiDetector::default().flag(block.view());
    /// assert!(flags.row(8).iter().all(|&flag| flag));
    /// assert!(!flags[[2, 2]]);
    /// ```
    pub fn flag(&self, block: ArrayView2<f32>) -> Flags {
        trace!("flagging block of shape {:?}", block.dim());
        match &self.pool {
            Some(pool) => pool.install(|| self.flag_inner(block)),
            None => self.flag_inner(block),
        }
    }

    fn flag_inner(&self, block: ArrayView2<f32>) -> Flags {
        let parallel = matches!(self.device, Device::Parallel { .. });

        let line_candidates: Vec<Array2<f32>> = self
            .line_kernels
            .iter()
            .map(|kernel| heaviside(&correlate_same(block, kernel.view(), parallel)))
            .collect();

        let mut consensus = Array2::<f32>::zeros(block.dim());
        for (candidates, bool_kernel) in izip!(&line_candidates, &self.line_bool_kernels) {
            consensus += &correlate_same(candidates.view(), bool_kernel.view(), parallel);
        }

        // pixels already explained by a line, widened to the extent of the edge kernels
        let spread: Vec<Array2<f32>> = line_candidates
            .iter()
            .map(|candidates| {
                heaviside(&correlate_same(
                    candidates.view(),
                    self.spread_kernel.view(),
                    parallel,
                ))
            })
            .collect();

        for (idx, (kernel, bool_kernel)) in
            izip!(&self.edge_kernels, &self.edge_bool_kernels).enumerate()
        {
            let response = heaviside(&correlate_same(block, kernel.view(), parallel));
            let edges = heaviside(&(response - &spread[idx / 2]));
            consensus += &correlate_same(edges.view(), bool_kernel.view(), parallel);
        }

        consensus.mapv(|count| count > FLAG_CONSENSUS_EPSILON)
    }
}
