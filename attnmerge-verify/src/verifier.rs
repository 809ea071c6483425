//! Runs merge candidates over identical inputs and compares their results.

use std::time::Instant;

use attnmerge::{Error, Result};
use attnmerge_cpu::{CpuBackend, ReferenceBackend};
use serde::Serialize;

use crate::candidate::{BackendCandidate, MergeCandidate, MergeResult, TokenMajorCandidate};
use crate::config::{SweepConfig, VerifyConfig};
use crate::inputs::MergeInputs;
use crate::tolerance::{check_close, Tolerance};

/// Average wall time of one candidate's timed runs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateTiming {
    pub name: String,
    pub avg_ms: f64,
}

/// Max abs differences of one candidate against the reference.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Comparison {
    pub candidate: String,
    pub reference: String,
    pub output_max_diff: f32,
    /// `None` when the run did not request the merged LSE.
    pub lse_max_diff: Option<f32>,
}

/// Outcome of a passing verification run.
#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    pub config: VerifyConfig,
    pub reference: String,
    pub timings: Vec<CandidateTiming>,
    pub comparisons: Vec<Comparison>,
}

impl VerifyReport {
    #[must_use]
    pub fn timing(&self, name: &str) -> Option<&CandidateTiming> {
        self.timings.iter().find(|t| t.name == name)
    }

    /// How many times faster `candidate` ran than `baseline`.
    #[must_use]
    pub fn speedup(&self, candidate: &str, baseline: &str) -> Option<f64> {
        let candidate = self.timing(candidate)?.avg_ms;
        let baseline = self.timing(baseline)?.avg_ms;
        (candidate > 0.0).then(|| baseline / candidate)
    }
}

/// An ordered set of candidates with one designated reference.
///
/// The first registered candidate is the reference unless
/// [`set_reference`](Self::set_reference) picks another.
#[derive(Default)]
pub struct Verifier {
    candidates: Vec<Box<dyn MergeCandidate>>,
    reference: usize,
}

impl Verifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The reference backend, the parallel engine and its token-major path.
    #[must_use]
    pub fn with_cpu_backends() -> Self {
        Self::new()
            .with(BackendCandidate::<ReferenceBackend>::new())
            .with(BackendCandidate::<CpuBackend>::new())
            .with(TokenMajorCandidate)
    }

    /// Builder form of [`register`](Self::register).
    #[must_use]
    pub fn with(mut self, candidate: impl MergeCandidate + 'static) -> Self {
        self.register(Box::new(candidate));
        self
    }

    pub fn register(&mut self, candidate: Box<dyn MergeCandidate>) {
        self.candidates.push(candidate);
    }

    /// Use the candidate called `name` as the reference.
    ///
    /// # Errors
    /// Returns [`Error::Config`] if no candidate has that name.
    pub fn set_reference(&mut self, name: &str) -> Result<()> {
        self.reference = self
            .candidates
            .iter()
            .position(|c| c.name() == name)
            .ok_or_else(|| Error::Config(format!("no candidate named {name}")))?;
        Ok(())
    }

    #[must_use]
    pub fn candidate_names(&self) -> Vec<&str> {
        self.candidates.iter().map(|c| c.name()).collect()
    }

    /// Run every candidate on inputs drawn from `config`, then compare each
    /// non-reference candidate against the reference.
    ///
    /// Candidates run one after another, never concurrently.
    ///
    /// # Errors
    /// Returns an error if the config is invalid, no candidate is
    /// registered, a candidate fails, or a result is out of tolerance.
    pub fn run(&self, config: &VerifyConfig) -> Result<VerifyReport> {
        if self.candidates.is_empty() {
            return Err(Error::Config("no candidates registered".into()));
        }
        let inputs = MergeInputs::generate(config)?;
        let (prefix_sentinels, suffix_sentinels) = inputs.sentinel_counts();
        tracing::info!(
            tokens = config.num_tokens,
            heads = config.num_heads,
            head_size = config.head_size,
            dtype = %config.dtype,
            prefix_sentinels,
            suffix_sentinels,
            "verifying merge"
        );

        let mut timings = Vec::with_capacity(self.candidates.len());
        let mut results = Vec::with_capacity(self.candidates.len());
        for candidate in &self.candidates {
            let (timing, result) = time_candidate(candidate.as_ref(), &inputs, config)?;
            tracing::info!(candidate = %timing.name, avg_ms = timing.avg_ms, "timed");
            timings.push(timing);
            results.push(result);
        }

        let reference = &self.candidates[self.reference];
        let expected = &results[self.reference];
        let tolerance = Tolerance::for_dtype(config.dtype);
        let mut comparisons = Vec::new();
        for (i, (candidate, actual)) in self.candidates.iter().zip(&results).enumerate() {
            if i == self.reference {
                continue;
            }
            let comparison =
                compare(candidate.name(), reference.name(), actual, expected, tolerance)
                    .inspect_err(|e| tracing::warn!(error = %e, "verification failed"))?;
            tracing::info!(
                candidate = %comparison.candidate,
                reference = %comparison.reference,
                output_max_diff = comparison.output_max_diff,
                lse_max_diff = ?comparison.lse_max_diff,
                "match"
            );
            comparisons.push(comparison);
        }

        Ok(VerifyReport {
            config: config.clone(),
            reference: reference.name().to_string(),
            timings,
            comparisons,
        })
    }

    /// Run every case of `sweep`. Cases pass or fail independently; the
    /// result of each is returned in [`SweepConfig::cases`] order.
    ///
    /// # Errors
    /// Returns an error only if the sweep itself fails validation.
    pub fn run_sweep(&self, sweep: &SweepConfig) -> Result<Vec<Result<VerifyReport>>> {
        sweep.validate()?;
        let results: Vec<_> = sweep.cases().iter().map(|case| self.run(case)).collect();
        let failed = results.iter().filter(|r| r.is_err()).count();
        tracing::info!(cases = results.len(), failed, "sweep finished");
        Ok(results)
    }
}

/// Warm up, then time `repeat_iters` runs. Returns the last run's result.
fn time_candidate(
    candidate: &dyn MergeCandidate,
    inputs: &MergeInputs,
    config: &VerifyConfig,
) -> Result<(CandidateTiming, MergeResult)> {
    for _ in 0..config.warmup_iters {
        candidate.merge(inputs, config.want_lse)?;
    }

    let mut total_ms = 0.0;
    let mut last = None;
    for _ in 0..config.repeat_iters {
        let start = Instant::now();
        let result = candidate.merge(inputs, config.want_lse)?;
        total_ms += start.elapsed().as_secs_f64() * 1e3;
        last = Some(result);
    }
    let result = last.ok_or_else(|| Error::Config("repeat_iters must be at least 1".into()))?;

    #[allow(clippy::cast_precision_loss)]
    let avg_ms = total_ms / config.repeat_iters as f64;
    Ok((
        CandidateTiming {
            name: candidate.name().to_string(),
            avg_ms,
        },
        result,
    ))
}

fn compare(
    candidate: &str,
    reference: &str,
    actual: &MergeResult,
    expected: &MergeResult,
    tolerance: Tolerance,
) -> Result<Comparison> {
    let output_max_diff = check_close(
        "output",
        candidate,
        reference,
        &actual.output,
        &expected.output,
        tolerance,
    )?;
    let lse_max_diff = match (&actual.output_lse, &expected.output_lse) {
        (Some(a), Some(e)) => Some(check_close(
            "output_lse",
            candidate,
            reference,
            a,
            e,
            tolerance,
        )?),
        (None, None) => None,
        _ => {
            return Err(Error::Other(format!(
                "{candidate} and {reference} disagree on whether output_lse was produced"
            )))
        }
    };
    Ok(Comparison {
        candidate: candidate.to_string(),
        reference: reference.to_string(),
        output_max_diff,
        lse_max_diff,
    })
}
