//! # Workspace Pattern for HMM Buffers
//!
//! Pre-allocated buffers for the forward-backward kernel, reused across
//! batches to avoid allocations in the decoding loop.
//!
//! ## Design
//! Buffers live outside the decoder so that `&self` decoding calls can run
//! concurrently, each worker passing its own `&mut LaneWorkspace`.
//!
//! All buffers hold `f32x8` values: one lane per pair decoded together.

use wide::f32x8;

/// Number of pairs decoded together
pub const LANES: usize = 8;

/// Workspace for the lane kernel
#[derive(Debug)]
pub struct LaneWorkspace {
    /// Forward values, then posteriors, flattened `[site][state]`
    pub alpha: Vec<f32x8>,

    /// Backward values at the current site (n_states)
    pub beta: Vec<f32x8>,

    /// Backward values times emission at the next site (n_states)
    pub beta_emit: Vec<f32x8>,

    /// Emission at the current site (n_states)
    pub emit: Vec<f32x8>,

    /// Suffix sums of the previous forward vector (n_states + 1)
    pub suffix: Vec<f32x8>,

    /// 1.0 where the pair is homozygous at a site, per site of the range
    pub hom: Vec<f32x8>,

    /// 1.0 where the pair is homozygous for the minor allele, per site of the range
    pub hom_minor: Vec<f32x8>,

    n_states: usize,
    n_sites: usize,
}

impl LaneWorkspace {
    /// Create a new workspace with given capacities
    pub fn new(n_states: usize, n_sites: usize) -> Self {
        let zero = f32x8::splat(0.0);
        Self {
            alpha: vec![zero; n_states * n_sites],
            beta: vec![zero; n_states],
            beta_emit: vec![zero; n_states],
            emit: vec![zero; n_states],
            suffix: vec![zero; n_states + 1],
            hom: vec![zero; n_sites],
            hom_minor: vec![zero; n_sites],
            n_states,
            n_sites,
        }
    }

    /// Resize buffers for new dimensions
    pub fn resize(&mut self, n_states: usize, n_sites: usize) {
        let zero = f32x8::splat(0.0);
        self.alpha.resize(n_states * n_sites, zero);
        self.beta.resize(n_states, zero);
        self.beta_emit.resize(n_states, zero);
        self.emit.resize(n_states, zero);
        self.suffix.resize(n_states + 1, zero);
        self.hom.resize(n_sites, zero);
        self.hom_minor.resize(n_sites, zero);
        self.n_states = n_states;
        self.n_sites = n_sites;
    }

    /// Clear all buffers (set to zero)
    pub fn clear(&mut self) {
        let zero = f32x8::splat(0.0);
        for buf in [
            &mut self.alpha,
            &mut self.beta,
            &mut self.beta_emit,
            &mut self.emit,
            &mut self.suffix,
            &mut self.hom,
            &mut self.hom_minor,
        ] {
            buf.fill(zero);
        }
    }

    pub fn n_states(&self) -> usize {
        self.n_states
    }

    pub fn n_sites(&self) -> usize {
        self.n_sites
    }

    /// Posterior of one lane at a site offset of the decoded range
    #[inline]
    pub fn posterior(&self, site_offset: usize, state: usize, lane: usize) -> f32 {
        let v: [f32; LANES] = self.alpha[site_offset * self.n_states + state].into();
        v[lane]
    }

    /// Posterior column (all states) of one lane at a site offset
    pub fn posterior_column(&self, site_offset: usize, lane: usize, out: &mut [f32]) {
        let row = &self.alpha[site_offset * self.n_states..(site_offset + 1) * self.n_states];
        for (o, v) in out.iter_mut().zip(row) {
            let arr: [f32; LANES] = (*v).into();
            *o = arr[lane];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workspace_sizes() {
        let mut ws = LaneWorkspace::new(4, 10);
        assert_eq!(ws.alpha.len(), 40);
        assert_eq!(ws.suffix.len(), 5);
        ws.resize(6, 3);
        assert_eq!(ws.alpha.len(), 18);
        assert_eq!(ws.hom.len(), 3);
        assert_eq!(ws.n_states(), 6);
    }

    #[test]
    fn test_posterior_lane_access() {
        let mut ws = LaneWorkspace::new(2, 2);
        ws.alpha[3] = f32x8::from([0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
        assert_eq!(ws.posterior(1, 1, 5), 5.0);
        let mut col = [0.0f32; 2];
        ws.posterior_column(1, 7, &mut col);
        assert_eq!(col, [0.0, 7.0]);
        ws.clear();
        assert_eq!(ws.posterior(1, 1, 5), 0.0);
    }
}
