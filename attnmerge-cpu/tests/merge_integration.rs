//! Integration tests for the CPU merge backends.
//!
//! Checks the merge against attention computed over the whole key/value
//! sequence, plus algebraic properties of the merge itself.

mod test_helpers;

use attnmerge::backend::MergeOps;
use attnmerge::dtype::DType;
use attnmerge::tensor::Tensor;
use attnmerge::Error;
use attnmerge_cpu::{CpuBackend, CpuTensor, ReferenceBackend};
use proptest::prelude::*;

use test_helpers::{assert_close, attention_with_lse, random_vec};

/// Split a `[kv_len, heads, head_size]` tensor at key position `at`.
fn split_keys(data: &[f32], at: usize, heads: usize, head_size: usize) -> (&[f32], &[f32]) {
    data.split_at(at * heads * head_size)
}

/// Merge F32 host data with the CPU engine; `dims` is `(tokens, heads, head_size)`.
fn merge_f32(
    prefix: &[f32],
    prefix_lse: &[f32],
    suffix: &[f32],
    suffix_lse: &[f32],
    dims: (usize, usize, usize),
) -> (Vec<f32>, Vec<f32>) {
    let (tokens, heads, head_size) = dims;
    let out_shape = [tokens, heads, head_size];
    let lse_shape = [heads, tokens];
    let (out, lse) = CpuBackend::merge_attn_states(
        &CpuTensor::from_f32(&out_shape, prefix),
        &CpuTensor::from_f32(&lse_shape, prefix_lse),
        &CpuTensor::from_f32(&out_shape, suffix),
        &CpuTensor::from_f32(&lse_shape, suffix_lse),
        true,
    )
    .unwrap();
    (out.to_f32_vec(), lse.unwrap().to_f32_vec())
}

#[test]
fn merge_of_split_attention_matches_unsplit() {
    let (tokens, heads, head_size, kv_len) = (5, 3, 16, 37);
    let q = random_vec(1, tokens * heads * head_size);
    let k = random_vec(2, kv_len * heads * head_size);
    let v = random_vec(3, kv_len * heads * head_size);

    let (full_out, full_lse) = attention_with_lse(&q, &k, &v, tokens, kv_len, heads, head_size);

    for split in [1, 12, 18, 36] {
        let (k_pre, k_suf) = split_keys(&k, split, heads, head_size);
        let (v_pre, v_suf) = split_keys(&v, split, heads, head_size);
        let prefix = attention_with_lse(&q, k_pre, v_pre, tokens, split, heads, head_size);
        let suffix =
            attention_with_lse(&q, k_suf, v_suf, tokens, kv_len - split, heads, head_size);

        let dims = (tokens, heads, head_size);
        let (out, lse) = merge_f32(&prefix.0, &prefix.1, &suffix.0, &suffix.1, dims);
        assert_close(&out, &full_out, 1e-5);
        assert_close(&lse, &full_lse, 1e-5);
    }
}

#[test]
fn empty_prefix_chunk_reproduces_unsplit_exactly() {
    let (tokens, heads, head_size, kv_len) = (3, 2, 8, 9);
    let q = random_vec(10, tokens * heads * head_size);
    let k = random_vec(11, kv_len * heads * head_size);
    let v = random_vec(12, kv_len * heads * head_size);

    let full = attention_with_lse(&q, &k, &v, tokens, kv_len, heads, head_size);
    let empty = attention_with_lse(&q, &[], &[], tokens, 0, heads, head_size);
    assert!(empty.1.iter().all(|&x| x == f32::INFINITY));

    let dims = (tokens, heads, head_size);
    let (out, lse) = merge_f32(&empty.0, &empty.1, &full.0, &full.1, dims);
    assert_eq!(out, full.0);
    assert_eq!(lse, full.1);
}

#[test]
fn engine_and_reference_agree_on_split_attention() {
    let (tokens, heads, head_size, kv_len) = (7, 4, 24, 20);
    let q = random_vec(20, tokens * heads * head_size);
    let k = random_vec(21, kv_len * heads * head_size);
    let v = random_vec(22, kv_len * heads * head_size);
    let (k_pre, k_suf) = split_keys(&k, 8, heads, head_size);
    let (v_pre, v_suf) = split_keys(&v, 8, heads, head_size);
    let prefix = attention_with_lse(&q, k_pre, v_pre, tokens, 8, heads, head_size);
    let suffix = attention_with_lse(&q, k_suf, v_suf, tokens, 12, heads, head_size);

    let out_shape = [tokens, heads, head_size];
    let lse_shape = [heads, tokens];
    for dtype in [DType::F32, DType::F16, DType::BF16] {
        let p = CpuTensor::from_f32_as(&out_shape, dtype, &prefix.0);
        let s = CpuTensor::from_f32_as(&out_shape, dtype, &suffix.0);
        let p_lse = CpuTensor::from_f32(&lse_shape, &prefix.1);
        let s_lse = CpuTensor::from_f32(&lse_shape, &suffix.1);

        let (engine, engine_lse) =
            CpuBackend::merge_attn_states(&p, &p_lse, &s, &s_lse, true).unwrap();
        let (reference, reference_lse) =
            ReferenceBackend::merge_attn_states(&p, &p_lse, &s, &s_lse, true).unwrap();

        assert_eq!(engine.dtype(), dtype);
        // One rounding step of the output dtype apart at most.
        let atol = match dtype {
            DType::F32 => 1e-6,
            DType::F16 => 1e-3,
            DType::BF16 => 1e-2,
        };
        assert_close(&engine.to_f32_vec(), &reference.to_f32_vec(), atol);
        assert_close(
            engine_lse.unwrap().as_f32_slice(),
            reference_lse.unwrap().as_f32_slice(),
            1e-6,
        );
    }
}

#[test]
fn mismatched_suffix_shape_is_rejected() {
    let lse = CpuTensor::zeros(&[2, 3], DType::F32);
    let p = CpuTensor::zeros(&[3, 2, 4], DType::F32);
    let s = CpuTensor::zeros(&[3, 2, 5], DType::F32);
    for result in [
        CpuBackend::merge_attn_states(&p, &lse, &s, &lse, false),
        ReferenceBackend::merge_attn_states(&p, &lse, &s, &lse, false),
    ] {
        assert!(matches!(result, Err(Error::ShapeMismatch { .. })));
    }
}

#[test]
fn token_major_lse_is_rejected_by_head_major_entry_point() {
    let p = CpuTensor::zeros(&[3, 2, 4], DType::F16);
    let lse = CpuTensor::zeros(&[3, 2], DType::F32);
    let err = CpuBackend::merge_attn_states(&p, &lse, &p, &lse, true).unwrap_err();
    assert!(matches!(err, Error::ShapeMismatch { .. }));
}

// ---- Properties ----

/// An LSE value, `+inf` (no contribution) about a fifth of the time.
fn lse_value() -> impl Strategy<Value = f32> {
    prop_oneof![4 => -30.0f32..30.0, 1 => Just(f32::INFINITY)]
}

/// Merge inputs for random small shapes: (dims, prefix, prefix_lse, suffix, suffix_lse).
#[allow(clippy::type_complexity)]
fn merge_case(
) -> impl Strategy<Value = ((usize, usize, usize), Vec<f32>, Vec<f32>, Vec<f32>, Vec<f32>)> {
    (1usize..5, 1usize..5, 1usize..9).prop_flat_map(|(tokens, heads, head_size)| {
        let n_out = tokens * heads * head_size;
        let n_lse = tokens * heads;
        (
            Just((tokens, heads, head_size)),
            prop::collection::vec(-1.0f32..1.0, n_out),
            prop::collection::vec(lse_value(), n_lse),
            prop::collection::vec(-1.0f32..1.0, n_out),
            prop::collection::vec(lse_value(), n_lse),
        )
    })
}

proptest! {
    #[test]
    fn prop_merge_is_symmetric(((t, h, d), p, p_lse, s, s_lse) in merge_case()) {
        let forward = merge_f32(&p, &p_lse, &s, &s_lse, (t, h, d));
        let backward = merge_f32(&s, &s_lse, &p, &p_lse, (t, h, d));
        prop_assert_eq!(forward.0, backward.0);
        prop_assert_eq!(forward.1, backward.1);
    }

    #[test]
    fn prop_never_nan(((t, h, d), p, p_lse, s, s_lse) in merge_case()) {
        let (out, lse) = merge_f32(&p, &p_lse, &s, &s_lse, (t, h, d));
        prop_assert!(out.iter().all(|x| !x.is_nan()));
        prop_assert!(lse.iter().all(|x| !x.is_nan()));
    }

    #[test]
    fn prop_output_is_convex_combination(((t, h, d), p, p_lse, s, s_lse) in merge_case()) {
        let (out, _) = merge_f32(&p, &p_lse, &s, &s_lse, (t, h, d));
        for ((o, a), b) in out.iter().zip(&p).zip(&s) {
            prop_assert!(*o >= a.min(*b) - 1e-6 && *o <= a.max(*b) + 1e-6);
        }
    }

    #[test]
    fn prop_shift_invariance(
        ((t, h, d), p, p_lse, s, s_lse) in merge_case(),
        c in -20.0f32..20.0
    ) {
        let shifted_p: Vec<f32> = p_lse.iter().map(|x| x + c).collect();
        let shifted_s: Vec<f32> = s_lse.iter().map(|x| x + c).collect();
        let (out, lse) = merge_f32(&p, &p_lse, &s, &s_lse, (t, h, d));
        let (out_c, lse_c) = merge_f32(&p, &shifted_p, &s, &shifted_s, (t, h, d));

        for (a, b) in out.iter().zip(&out_c) {
            prop_assert!((a - b).abs() <= 1e-4, "{} vs {}", a, b);
        }
        for (a, b) in lse.iter().zip(&lse_c) {
            if a.is_infinite() {
                prop_assert_eq!(*a, *b);
            } else {
                prop_assert!((a + c - b).abs() <= 1e-4 * (1.0 + b.abs()), "{} + {} vs {}", a, c, b);
            }
        }
    }

    #[test]
    fn prop_one_sided_sentinel_is_exact(
        ((t, h, d), p, _p_lse, s, s_lse) in merge_case()
    ) {
        let no_prefix = vec![f32::INFINITY; t * h];
        let (out, lse) = merge_f32(&p, &no_prefix, &s, &s_lse, (t, h, d));
        for (pair, &s_val) in s_lse.iter().enumerate() {
            // Pairs where the suffix is also empty fall back to the average.
            if s_val.is_finite() {
                prop_assert_eq!(lse[pair], s_val);
            }
        }
        for token in 0..t {
            for head in 0..h {
                if s_lse[head * t + token].is_finite() {
                    let off = (token * h + head) * d;
                    prop_assert_eq!(&out[off..off + d], &s[off..off + d]);
                }
            }
        }
    }

    #[test]
    fn prop_engine_matches_reference(((t, h, d), p, p_lse, s, s_lse) in merge_case()) {
        let out_shape = [t, h, d];
        let lse_shape = [h, t];
        let args = (
            CpuTensor::from_f32(&out_shape, &p),
            CpuTensor::from_f32(&lse_shape, &p_lse),
            CpuTensor::from_f32(&out_shape, &s),
            CpuTensor::from_f32(&lse_shape, &s_lse),
        );
        let (e_out, e_lse) =
            CpuBackend::merge_attn_states(&args.0, &args.1, &args.2, &args.3, true).unwrap();
        let (r_out, r_lse) =
            ReferenceBackend::merge_attn_states(&args.0, &args.1, &args.2, &args.3, true).unwrap();

        for (a, b) in e_out.as_f32_slice().iter().zip(r_out.as_f32_slice()) {
            prop_assert!((a - b).abs() <= 1e-6, "{} vs {}", a, b);
        }
        for (a, b) in e_lse.unwrap().as_f32_slice().iter().zip(r_lse.unwrap().as_f32_slice()) {
            prop_assert!(a == b || (a - b).abs() <= 1e-6, "{} vs {}", a, b);
        }
    }
}
