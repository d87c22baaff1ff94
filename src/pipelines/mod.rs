//! # Pipeline Module
//!
//! High-level orchestration of ASMC decoding jobs and FastSMC IBD detection.
//! Coordinates loading, decoding and output.

pub mod fastsmc;
pub mod posterior_sums;

pub use fastsmc::{FastSmc, FastSmcPipeline, FastSmcReport};
pub use posterior_sums::AsmcPipeline;
