//! # Conditional Random Field
//!
//! Structured loss and decoding over label sequences: a masked negative
//! log-likelihood computed with the forward algorithm, and Viterbi decoding.

pub mod model;
pub mod viterbi;

pub use model::{Crf, Reduction};
pub use viterbi::ViterbiDecoder;
