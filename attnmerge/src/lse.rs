//! Log-sum-exp values and the per-(head, token) merge rule.
//!
//! A partial attention result carries the log-sum-exp of the softmax
//! logits it was normalized with. Two partial results over disjoint key
//! ranges combine as
//!
//! ```text
//! lse   = ln(exp(lse_a) + exp(lse_b))
//! out   = out_a * exp(lse_a - lse) + out_b * exp(lse_b - lse)
//! ```
//!
//! evaluated with max-subtraction so large LSE magnitudes do not overflow.
//!
//! Tensors encode "this chunk saw no keys" as an LSE of `+inf`. Inside the
//! merge that sentinel is lifted into [`LseValue::NoContribution`] so the
//! arithmetic never sees an infinity and `inf - inf` cannot occur.

/// A log-sum-exp statistic for one (head, token) pair of a partial result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LseValue {
    /// The chunk contributed with this log-sum-exp.
    Valid(f32),
    /// The chunk had no valid keys for this pair; its weight is zero.
    NoContribution,
}

impl LseValue {
    /// Lift a raw tensor value.
    ///
    /// `+inf` is the on-tensor sentinel. `-inf` is `ln(0)`, which also means
    /// zero weight, so it maps to the same variant. NaN stays `Valid` and
    /// propagates.
    #[inline]
    #[must_use]
    pub fn from_raw(v: f32) -> Self {
        if v.is_infinite() {
            Self::NoContribution
        } else {
            Self::Valid(v)
        }
    }

    /// Lower back to the on-tensor encoding (`+inf` for no contribution).
    #[inline]
    #[must_use]
    pub fn to_raw(self) -> f32 {
        match self {
            Self::Valid(v) => v,
            Self::NoContribution => f32::INFINITY,
        }
    }
}

/// Scale factors and merged LSE for one (head, token) pair.
///
/// `prefix_scale + suffix_scale == 1` up to rounding; both lie in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MergeWeights {
    pub prefix_scale: f32,
    pub suffix_scale: f32,
    pub lse: LseValue,
}

impl MergeWeights {
    /// Combine the two chunk statistics.
    ///
    /// When neither chunk contributed the output is the plain average of the
    /// two partial outputs and the merged LSE is again `NoContribution`.
    #[must_use]
    pub fn new(prefix: LseValue, suffix: LseValue) -> Self {
        match (prefix, suffix) {
            (LseValue::Valid(p), LseValue::Valid(s)) => {
                let max_lse = p.max(s);
                let p_se = (p - max_lse).exp();
                let s_se = (s - max_lse).exp();
                let out_se = p_se + s_se;
                Self {
                    prefix_scale: p_se / out_se,
                    suffix_scale: s_se / out_se,
                    lse: LseValue::Valid(out_se.ln() + max_lse),
                }
            }
            (LseValue::NoContribution, LseValue::Valid(s)) => Self {
                prefix_scale: 0.0,
                suffix_scale: 1.0,
                lse: LseValue::Valid(s),
            },
            (LseValue::Valid(p), LseValue::NoContribution) => Self {
                prefix_scale: 1.0,
                suffix_scale: 0.0,
                lse: LseValue::Valid(p),
            },
            (LseValue::NoContribution, LseValue::NoContribution) => Self {
                prefix_scale: 0.5,
                suffix_scale: 0.5,
                lse: LseValue::NoContribution,
            },
        }
    }

    /// Convenience wrapper over raw tensor values.
    ///
    /// Two `-inf` inputs merge to `-inf` rather than the `+inf` sentinel;
    /// any `+inf` input with no valid partner yields the sentinel.
    #[inline]
    #[must_use]
    #[allow(clippy::float_cmp)]
    pub fn from_raw(prefix_lse: f32, suffix_lse: f32) -> Self {
        let mut weights = Self::new(LseValue::from_raw(prefix_lse), LseValue::from_raw(suffix_lse));
        if prefix_lse == f32::NEG_INFINITY && suffix_lse == f32::NEG_INFINITY {
            weights.lse = LseValue::Valid(f32::NEG_INFINITY);
        }
        weights
    }

    /// Weighted sum of one feature of the two partial outputs.
    ///
    /// A zero-weight side is skipped entirely, so whatever its partial
    /// output holds (including non-finite values) never reaches the result.
    #[inline]
    #[must_use]
    pub fn blend(&self, prefix: f32, suffix: f32) -> f32 {
        if self.prefix_scale == 0.0 {
            suffix * self.suffix_scale
        } else if self.suffix_scale == 0.0 {
            prefix * self.prefix_scale
        } else {
            prefix * self.prefix_scale + suffix * self.suffix_scale
        }
    }
}
