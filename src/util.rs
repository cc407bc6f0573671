//! Utility functions

use std::cmp::Ordering;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

/// A progress bar of `len` steps labelled `message`, drawn to stderr only if `draw_progress`.
pub(crate) fn progress_bar(draw_progress: bool, len: usize, message: &'static str) -> ProgressBar {
    let draw_target = if draw_progress {
        ProgressDrawTarget::stderr()
    } else {
        ProgressDrawTarget::hidden()
    };
    let progress = ProgressBar::with_draw_target(Some(len as u64), draw_target);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{msg:16}: [{elapsed_precise}] [{wide_bar:.cyan/blue}] {percent:3}% ({eta:5})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    progress.set_message(message);
    progress
}

/// Sort a slice of floats in ascending order, with NaNs last.
pub fn sort_floats<F: PartialOrd + Copy>(values: &mut [F]) {
    values.sort_by(|a, b| match a.partial_cmp(b) {
        Some(ord) => ord,
        None => match (a.partial_cmp(a), b.partial_cmp(b)) {
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            _ => Ordering::Equal,
        },
    });
}

/// The `q`th percentile (`0 <= q <= 100`) of an ascending, non-empty slice,
/// linearly interpolated between the closest ranks.
///
/// # Examples
///
/// ```rust
/// use bfds::util::percentile_sorted;
///
/// let values = [1., 2., 3., 4., 5.];
/// assert_eq!(percentile_sorted(&values, 50.), 3.);
/// assert_eq!(percentile_sorted(&values, 25.), 2.);
/// assert!((percentile_sorted(&values, 10.) - 1.4).abs() < 1e-12);
/// ```
pub fn percentile_sorted(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let rank = (q.clamp(0., 100.) / 100.) * (n - 1) as f64;
            let lower = rank.floor() as usize;
            let upper = (lower + 1).min(n - 1);
            let frac = rank - lower as f64;
            sorted[lower] + (sorted[upper] - sorted[lower]) * frac
        }
    }
}

/// The median of a slice. Reorders the slice in place.
pub fn median_mut(values: &mut [f64]) -> f64 {
    let n = values.len();
    if n == 0 {
        return f64::NAN;
    }
    sort_floats(values);
    if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.
    }
}

/// Piecewise linear interpolation of `(xp, fp)` at `x`.
///
/// `xp` must be monotonic, either increasing or decreasing. Outside the span of
/// `xp` the nearest edge value of `fp` is returned. An empty `xp` gives NaN.
///
/// # Examples
///
/// ```rust
/// use bfds::util::interp;
///
/// assert_eq!(interp(1.5, &[1., 2., 3.], &[10., 20., 30.]), 15.);
/// assert_eq!(interp(1.5, &[3., 2., 1.], &[30., 20., 10.]), 15.);
/// assert_eq!(interp(-1., &[1., 2., 3.], &[10., 20., 30.]), 10.);
/// assert_eq!(interp(9., &[1., 2., 3.], &[10., 20., 30.]), 30.);
/// ```
pub fn interp(x: f64, xp: &[f64], fp: &[f64]) -> f64 {
    let n = xp.len().min(fp.len());
    if n == 0 {
        return f64::NAN;
    }
    if n == 1 {
        return fp[0];
    }
    let increasing = xp[n - 1] >= xp[0];
    let (first, last) = if increasing { (0, n - 1) } else { (n - 1, 0) };
    if x <= xp[first] {
        return fp[first];
    }
    if x >= xp[last] {
        return fp[last];
    }
    // index of the first xp beyond x, in sorted order
    let upper = if increasing {
        xp[..n].partition_point(|&v| v <= x)
    } else {
        xp[..n].partition_point(|&v| v > x)
    };
    let lower = upper - 1;
    let (x0, x1, f0, f1) = (xp[lower], xp[upper], fp[lower], fp[upper]);
    if x1 == x0 {
        return f0;
    }
    f0 + (f1 - f0) * (x - x0) / (x1 - x0)
}

/// [`interp`] evaluated at every point of `xs`.
pub fn interp_many(xs: &[f64], xp: &[f64], fp: &[f64]) -> Vec<f64> {
    xs.iter().map(|&x| interp(x, xp, fp)).collect()
}
