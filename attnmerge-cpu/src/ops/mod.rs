//! CPU implementations of the backend op traits.

pub mod merge;
pub mod reference;
pub mod tensor_ops;
pub mod transpose;
