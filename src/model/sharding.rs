//! # Pair Sharding
//!
//! Partition of the unordered individual-pair space `{(i, j) : i <= j < n}`
//! into `jobs` contiguous, disjoint ranges of the linear pair index. Job
//! `job_index` (1-based) owns `[total * (job_index - 1) / jobs, total * job_index / jobs)`.
//! The partition knows nothing about threads or processes: any backend can
//! run the shards and sum their results.

use serde::{Deserialize, Serialize};

use crate::data::haplotype::SampleIdx;
use crate::error::{AsmcError, Result};

/// One shard of the pair space
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairShard {
    pub jobs: usize,
    /// 1-based
    pub job_index: usize,
}

impl Default for PairShard {
    fn default() -> Self {
        Self::full()
    }
}

impl PairShard {
    /// The shard covering every pair
    pub fn full() -> Self {
        Self {
            jobs: 1,
            job_index: 1,
        }
    }

    pub fn new(jobs: usize, job_index: usize) -> Result<Self> {
        if jobs == 0 || job_index == 0 || job_index > jobs {
            return Err(AsmcError::config(format!(
                "job index {} must be between 1 and jobs ({})",
                job_index, jobs
            )));
        }
        Ok(Self { jobs, job_index })
    }

    /// Half-open range of linear pair indices owned by this shard
    pub fn range(&self, n_individuals: usize) -> (u64, u64) {
        let total = total_pairs(n_individuals) as u128;
        let jobs = self.jobs as u128;
        let j = self.job_index as u128;
        let start = total * (j - 1) / jobs;
        let end = total * j / jobs;
        (start as u64, end as u64)
    }

    /// Whether the unordered pair `{a, b}` belongs to this shard
    pub fn contains(&self, n_individuals: usize, a: SampleIdx, b: SampleIdx) -> bool {
        let idx = pair_index(n_individuals, a, b);
        let (start, end) = self.range(n_individuals);
        idx >= start && idx < end
    }

    /// Iterate the pairs `(i, j)` with `i <= j` owned by this shard, in index order
    pub fn pairs(&self, n_individuals: usize) -> ShardPairs {
        let (start, end) = self.range(n_individuals);
        let (i, j) = if start < end {
            pair_from_index(n_individuals, start)
        } else {
            (0, 0)
        };
        ShardPairs {
            n: n_individuals,
            i,
            j,
            remaining: end - start,
        }
    }
}

/// Number of unordered pairs including self pairs
pub fn total_pairs(n_individuals: usize) -> u64 {
    let n = n_individuals as u64;
    n * (n + 1) / 2
}

/// Linear index of the unordered pair `{a, b}` (self pairs included)
pub fn pair_index(n_individuals: usize, a: SampleIdx, b: SampleIdx) -> u64 {
    let (i, j) = if a <= b { (a.0, b.0) } else { (b.0, a.0) };
    let (i, j, n) = (i as u64, j as u64, n_individuals as u64);
    // rows before i hold n, n-1, ..., n-i+1 pairs
    i * n - i * i.saturating_sub(1) / 2 + (j - i)
}

fn pair_from_index(n_individuals: usize, idx: u64) -> (usize, usize) {
    let n = n_individuals as u64;
    let mut row_start = 0u64;
    for i in 0..n {
        let row_len = n - i;
        if idx < row_start + row_len {
            return (i as usize, (i + idx - row_start) as usize);
        }
        row_start += row_len;
    }
    (n_individuals, n_individuals)
}

/// Iterator over the pairs of a shard
#[derive(Clone, Debug)]
pub struct ShardPairs {
    n: usize,
    i: usize,
    j: usize,
    remaining: u64,
}

impl Iterator for ShardPairs {
    type Item = (SampleIdx, SampleIdx);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let item = (SampleIdx::from(self.i), SampleIdx::from(self.j));
        self.remaining -= 1;
        self.j += 1;
        if self.j == self.n {
            self.i += 1;
            self.j = self.i;
        }
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let r = self.remaining as usize;
        (r, Some(r))
    }
}

impl ExactSizeIterator for ShardPairs {}
