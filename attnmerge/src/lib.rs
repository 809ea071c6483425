//! attnmerge: merging split-KV attention states
//!
//! Attention over a long key/value sequence can be computed in chunks, each
//! producing a partial output normalized over its own keys together with the
//! log-sum-exp (LSE) of its logits. This crate defines the types and op
//! traits for combining two such partial states into the result an unsplit
//! softmax attention would have produced.
//!
//! Backend-specific implementations live in separate crates.

#[allow(clippy::missing_errors_doc, clippy::doc_markdown)]
pub mod backend;
pub mod dtype;
pub mod error;
pub mod lse;
pub mod shape;
pub mod tensor;

pub use backend::{Backend, MergeOps, TensorDataOps, TensorFactory};
pub use dtype::{DType, TensorDType};
pub use error::{Error, Result};
pub use lse::{LseValue, MergeWeights};
pub use shape::{LseLayout, MergeShape};
pub use tensor::Tensor;
