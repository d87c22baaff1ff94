//! # Model Module
//!
//! The coalescent HMM and the IBD detector built on it.
//!
//! ## Core Algorithms
//! - `quantities`: Precomputed transition, emission and CSFS tables
//! - `emission`/`forward_backward`: Per-site tables and the linear-time lane kernel
//! - `hmm`: Pairwise decoder with the batch buffer and posterior sums
//! - `seed_hash`: GERMLINE word hashing for IBD candidates
//! - `ibd`: Segment calling and age estimation from posteriors
//!
//! ## Why Linear-Time Forward-Backward
//!
//! The discretized coalescent transition has a fixed shape: staying in a
//! state, falling to any more recent state with a probability that only
//! depends on the target, or rising through a product of ratios. Prefix and
//! suffix sums over the previous vector therefore give every entry of the
//! next one in O(states) rather than O(states²).

pub mod emission;
pub mod forward_backward;
pub mod hmm;
pub mod ibd;
pub mod observation;
pub mod quantities;
pub mod seed_hash;
pub mod sharding;
pub mod synthetic;
