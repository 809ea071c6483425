//! Seeded merge inputs shared by every candidate of a run.

use attnmerge::dtype::DType;
use attnmerge::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::VerifyConfig;

/// Host-side inputs of one merge.
///
/// Partial outputs are already rounded to `dtype`, so converting them into
/// any backend's tensor of that dtype is exact.
#[derive(Debug, Clone)]
pub struct MergeInputs {
    pub num_tokens: usize,
    pub num_heads: usize,
    pub head_size: usize,
    pub dtype: DType,
    /// `[tokens, heads, head_size]`
    pub prefix_output: Vec<f32>,
    /// `[heads, tokens]`
    pub prefix_lse: Vec<f32>,
    /// `[tokens, heads, head_size]`
    pub suffix_output: Vec<f32>,
    /// `[heads, tokens]`
    pub suffix_lse: Vec<f32>,
}

/// Standard normal sample (Box-Muller).
fn randn(rng: &mut StdRng) -> f32 {
    let u1: f32 = rng.gen_range(1e-7f32..1.0f32);
    let u2: f32 = rng.gen_range(0.0f32..std::f32::consts::TAU);
    (-2.0 * u1.ln()).sqrt() * u2.cos()
}

fn randn_vec(rng: &mut StdRng, len: usize) -> Vec<f32> {
    (0..len).map(|_| randn(rng)).collect()
}

fn round_to(dtype: DType, v: f32) -> f32 {
    match dtype {
        DType::F32 => v,
        DType::F16 => half::f16::from_f32(v).to_f32(),
        DType::BF16 => half::bf16::from_f32(v).to_f32(),
    }
}

impl MergeInputs {
    /// Draw inputs for `config`.
    ///
    /// LSEs are standard normal with `+inf` at rate `sentinel_rate`, masked
    /// independently per side. Unless `allow_dual_sentinel` is set,
    /// positions masked on both sides are cleared from both masks.
    ///
    /// # Errors
    /// Returns an error if the config fails validation.
    pub fn generate(config: &VerifyConfig) -> Result<Self> {
        config.validate()?;
        let mut rng = StdRng::seed_from_u64(config.seed);
        let n_lse = config.num_heads * config.num_tokens;
        let n_out = n_lse * config.head_size;

        let mut prefix_lse = randn_vec(&mut rng, n_lse);
        let mut suffix_lse = randn_vec(&mut rng, n_lse);

        let rate = config.sentinel_rate;
        let mut mask_prefix: Vec<bool> = (0..n_lse).map(|_| rng.gen_bool(rate)).collect();
        let mut mask_suffix: Vec<bool> = (0..n_lse).map(|_| rng.gen_bool(rate)).collect();
        if !config.allow_dual_sentinel {
            for (p, s) in mask_prefix.iter_mut().zip(mask_suffix.iter_mut()) {
                if *p && *s {
                    *p = false;
                    *s = false;
                }
            }
        }
        for (lse, &masked) in prefix_lse.iter_mut().zip(&mask_prefix) {
            if masked {
                *lse = f32::INFINITY;
            }
        }
        for (lse, &masked) in suffix_lse.iter_mut().zip(&mask_suffix) {
            if masked {
                *lse = f32::INFINITY;
            }
        }

        let dtype = config.dtype;
        let prefix_output = (0..n_out).map(|_| round_to(dtype, randn(&mut rng))).collect();
        let suffix_output = (0..n_out).map(|_| round_to(dtype, randn(&mut rng))).collect();

        Ok(Self {
            num_tokens: config.num_tokens,
            num_heads: config.num_heads,
            head_size: config.head_size,
            dtype,
            prefix_output,
            prefix_lse,
            suffix_output,
            suffix_lse,
        })
    }

    #[must_use]
    pub fn output_shape(&self) -> [usize; 3] {
        [self.num_tokens, self.num_heads, self.head_size]
    }

    /// Head-major LSE shape.
    #[must_use]
    pub fn lse_shape(&self) -> [usize; 2] {
        [self.num_heads, self.num_tokens]
    }

    /// Number of `+inf` entries in (prefix, suffix) LSEs.
    #[must_use]
    pub fn sentinel_counts(&self) -> (usize, usize) {
        let count = |lse: &[f32]| lse.iter().filter(|&&v| v == f32::INFINITY).count();
        (count(&self.prefix_lse), count(&self.suffix_lse))
    }

    /// Number of pairs where both LSEs are `+inf`.
    #[must_use]
    pub fn dual_sentinel_count(&self) -> usize {
        self.prefix_lse
            .iter()
            .zip(&self.suffix_lse)
            .filter(|&(&p, &s)| p == f32::INFINITY && s == f32::INFINITY)
            .count()
    }
}
