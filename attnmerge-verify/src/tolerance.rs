//! Element-wise closeness checks between candidate results.

use attnmerge::dtype::DType;
use attnmerge::{Error, Result};

/// Absolute and relative tolerance for one comparison.
///
/// An element passes when `|actual - expected| <= atol + rtol * |expected|`.
/// Infinities must match exactly and NaN never passes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerance {
    pub atol: f32,
    pub rtol: f32,
}

impl Tolerance {
    /// Tolerance for results stored in `dtype`.
    ///
    /// The lowest-precision class (bf16) gets a looser relative bound.
    #[must_use]
    pub const fn for_dtype(dtype: DType) -> Self {
        let rtol = if dtype.is_lowest_precision() { 1e-2 } else { 1e-3 };
        Self { atol: 1e-3, rtol }
    }

    #[must_use]
    #[allow(clippy::float_cmp)]
    pub fn allows(&self, actual: f32, expected: f32) -> bool {
        if actual.is_infinite() || expected.is_infinite() {
            return actual == expected;
        }
        // NaN fails the comparison below.
        (actual - expected).abs() <= self.atol + self.rtol * expected.abs()
    }
}

/// Largest element-wise `|a - b|`.
///
/// Equal elements (matching infinities included) contribute zero; any NaN
/// or unmatched infinity makes the result infinite.
#[must_use]
#[allow(clippy::float_cmp)]
pub fn max_abs_diff(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(&x, &y)| {
            if x == y {
                0.0
            } else {
                let d = (x - y).abs();
                if d.is_nan() {
                    f32::INFINITY
                } else {
                    d
                }
            }
        })
        .fold(0.0, f32::max)
}

/// Check `actual` against `expected` element-wise.
///
/// Returns the max abs diff on success.
///
/// # Errors
/// Returns [`Error::ShapeMismatch`] on a length mismatch and
/// [`Error::ToleranceExceeded`] naming the first violating element.
pub fn check_close(
    tensor: &str,
    candidate: &str,
    reference: &str,
    actual: &[f32],
    expected: &[f32],
    tolerance: Tolerance,
) -> Result<f32> {
    if actual.len() != expected.len() {
        return Err(Error::ShapeMismatch {
            expected: vec![expected.len()],
            got: vec![actual.len()],
        });
    }
    let violation = actual
        .iter()
        .zip(expected)
        .position(|(&a, &e)| !tolerance.allows(a, e));
    let max_diff = max_abs_diff(actual, expected);

    match violation {
        None => Ok(max_diff),
        Some(index) => Err(Error::ToleranceExceeded {
            tensor: tensor.to_string(),
            candidate: candidate.to_string(),
            reference: reference.to_string(),
            max_abs_diff: max_diff,
            index,
            actual: actual[index],
            expected: expected[index],
        }),
    }
}
