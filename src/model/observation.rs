//! # Pair Observations and the Batch Buffer
//!
//! A `PairObservation` names one pairwise decoding unit: two haplotypes and
//! the site range decoded jointly. The `BatchBuffer` accumulates observations
//! until it reaches capacity; the decoder then flushes it through the
//! forward-backward kernel.
//!
//! Buffer states:
//!
//! ```text
//! Empty --push--> Accumulating --push reaching capacity--> Full
//! Full --flush--> Empty        Accumulating --flush--> Empty
//! Empty --flush--> Empty (no-op)
//! ```
//!
//! Pushing into a `Full` buffer is a `CapacityInvariantViolation`: the owner
//! must flush before appending again.

use std::fmt;

use crate::data::haplotype::{HapSlot, SampleIdx};
use crate::error::{AsmcError, Result};

/// One pair of haplotypes over a site range
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PairObservation {
    pub hap_a: HapSlot,
    pub ind_a: SampleIdx,
    pub hap_b: HapSlot,
    pub ind_b: SampleIdx,
    /// First site of the range
    pub from: usize,
    /// Number of sites in the range
    pub len: usize,
    /// Alleles are folded (1 codes the minor allele)
    pub folded: bool,
}

impl PairObservation {
    /// Half-open site range
    pub fn range(&self) -> std::ops::Range<usize> {
        self.from..self.from + self.len
    }

    /// Same pair restricted to `[from, to)`
    pub fn restricted(&self, from: usize, to: usize) -> Self {
        Self {
            from,
            len: to.saturating_sub(from),
            ..*self
        }
    }
}

impl fmt::Display for PairObservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}:{})-({}:{})",
            self.ind_a.0, self.hap_a, self.ind_b.0, self.hap_b
        )
    }
}

/// Observable state of the batch buffer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferState {
    Empty,
    Accumulating,
    Full,
}

/// Ordered pending observations with a fixed capacity
#[derive(Clone, Debug)]
pub struct BatchBuffer {
    observations: Vec<PairObservation>,
    capacity: usize,
}

impl BatchBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            observations: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Append one observation. Returns `Full` when the owner must flush now.
    pub fn push(&mut self, obs: PairObservation) -> Result<BufferState> {
        if self.observations.len() >= self.capacity {
            return Err(AsmcError::CapacityInvariantViolation {
                len: self.observations.len() + 1,
                capacity: self.capacity,
            });
        }
        self.observations.push(obs);
        Ok(self.state())
    }

    pub fn state(&self) -> BufferState {
        match self.observations.len() {
            0 => BufferState::Empty,
            n if n >= self.capacity => BufferState::Full,
            _ => BufferState::Accumulating,
        }
    }

    /// Remove and return the pending observations, leaving the buffer empty
    pub fn drain(&mut self) -> Vec<PairObservation> {
        std::mem::replace(&mut self.observations, Vec::with_capacity(self.capacity))
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn observations(&self) -> &[PairObservation] {
        &self.observations
    }
}
