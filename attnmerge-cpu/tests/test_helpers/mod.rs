//! Shared helpers for CPU merge integration tests.
//!
//! Provides seeded input data and a naive attention that also reports the
//! log-sum-exp of its logits, so split-KV results can be checked against an
//! unsplit computation.

#![allow(dead_code)]

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Uniform values in `[-1, 1)` from a fixed seed.
pub fn random_vec(seed: u64, len: usize) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.gen_range(-1.0f32..1.0)).collect()
}

/// Non-causal attention of `q` over `kv_len` keys.
///
/// `q` is `[tokens, heads, head_size]`, `k` and `v` are
/// `[kv_len, heads, head_size]`. Returns the output `[tokens, heads,
/// head_size]` and the LSE `[heads, tokens]`. With no keys the output is
/// zero and the LSE is `+inf`.
#[allow(clippy::cast_precision_loss, clippy::needless_range_loop)]
pub fn attention_with_lse(
    q: &[f32],
    k: &[f32],
    v: &[f32],
    tokens: usize,
    kv_len: usize,
    heads: usize,
    head_size: usize,
) -> (Vec<f32>, Vec<f32>) {
    let scale = 1.0 / (head_size as f32).sqrt();
    let mut output = vec![0.0f32; tokens * heads * head_size];
    let mut lse = vec![f32::INFINITY; heads * tokens];

    if kv_len == 0 {
        return (output, lse);
    }

    for t in 0..tokens {
        for h in 0..heads {
            let q_off = (t * heads + h) * head_size;
            let q_vec = &q[q_off..q_off + head_size];

            let mut scores: Vec<f32> = (0..kv_len)
                .map(|pos| {
                    let k_off = (pos * heads + h) * head_size;
                    let dot: f32 = q_vec
                        .iter()
                        .zip(&k[k_off..k_off + head_size])
                        .map(|(a, b)| a * b)
                        .sum();
                    dot * scale
                })
                .collect();

            let max_score = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let mut sum_exp = 0.0f32;
            for score in &mut scores {
                *score = (*score - max_score).exp();
                sum_exp += *score;
            }
            lse[h * tokens + t] = max_score + sum_exp.ln();

            let o_off = (t * heads + h) * head_size;
            for pos in 0..kv_len {
                let weight = scores[pos] / sum_exp;
                let v_off = (pos * heads + h) * head_size;
                for d in 0..head_size {
                    output[o_off + d] += weight * v[v_off + d];
                }
            }
        }
    }

    (output, lse)
}

/// Assert element-wise closeness, reporting the first offending index.
pub fn assert_close(actual: &[f32], expected: &[f32], atol: f32) {
    assert_eq!(actual.len(), expected.len(), "length mismatch");
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!(
            (a - e).abs() <= atol,
            "index {i}: {a} vs {e} (atol {atol})"
        );
    }
}
