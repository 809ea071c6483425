//! Cross-implementation verification of split-KV attention state merges.
//!
//! Every registered [`MergeCandidate`] runs on the same seeded
//! [`MergeInputs`]. Results are compared against one reference candidate
//! with a dtype-dependent [`Tolerance`], and each candidate's average wall
//! time is recorded in the [`VerifyReport`].
//!
//! ```no_run
//! use attnmerge_verify::{Verifier, VerifyConfig};
//!
//! let report = Verifier::with_cpu_backends().run(&VerifyConfig::default())?;
//! println!("{:?}", report.speedup("cpu", "reference"));
//! # Ok::<(), attnmerge::Error>(())
//! ```

#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

pub mod candidate;
pub mod config;
pub mod inputs;
pub mod tolerance;
pub mod verifier;

pub use candidate::{BackendCandidate, MergeCandidate, MergeResult, TokenMajorCandidate};
pub use config::{SweepConfig, VerifyConfig};
pub use inputs::MergeInputs;
pub use tolerance::{check_close, max_abs_diff, Tolerance};
pub use verifier::{CandidateTiming, Comparison, Verifier, VerifyReport};
