//! # Decoding Quantities
//!
//! ## Role
//! The precomputed, read-only tables the decoder runs on: the discretized
//! time grid, the initial state distribution, the emission tables and the
//! transition vectors. Loaded once (see `io::quantities`) and shared across
//! decoders behind an `Arc`.
//!
//! ## Transition structure
//! For an inter-site genetic distance ρ the transition from state `j` to
//! state `k` is
//! - `D[k]` when `j == k`
//! - `B[k]` when `j > k`
//! - `U[j] * R[j+1] * ... * R[k-1]` when `j < k`
//!
//! which lets the forward and backward passes run in O(states) per site.
//! Vectors are keyed by the distance rounded with [`round_morgans`].
//!
//! ## CSFS tables
//! One table per decoding mode, indexed `[undistinguished][distinguished][state]`
//! with `csfs_samples - 1` undistinguished rows.

use rustc_hash::FxHashMap;

use crate::config::DecodingMode;
use crate::error::{AsmcError, Result};

/// Smallest distance kept by rounding (Morgans)
pub const MIN_MORGANS: f32 = 1e-10;

/// Clamp a genetic distance to `MIN_MORGANS` and round it to 3 significant digits
pub fn round_morgans(distance: f32) -> f32 {
    let x = f64::from(distance.max(MIN_MORGANS));
    let exponent = x.log10().floor() as i32;
    let factor = 10f64.powi(2 - exponent);
    ((x * factor).round() / factor) as f32
}

/// Transition vectors for one rounded distance
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TransitionVectors {
    /// Stay in the same state
    pub d: Vec<f32>,
    /// Move to state `k` from any later state
    pub b: Vec<f32>,
    /// Leave state `j` upwards
    pub u: Vec<f32>,
    /// Pass through state `l` on the way up
    pub r: Vec<f32>,
}

impl TransitionVectors {
    fn check_len(&self, states: usize, distance: f32) -> Result<()> {
        for (name, v) in [("D", &self.d), ("B", &self.b), ("U", &self.u), ("R", &self.r)] {
            if v.len() != states {
                return Err(AsmcError::load(
                    "decoding quantities",
                    format!(
                        "transition vector {} at distance {} has {} values, expected {}",
                        name,
                        distance,
                        v.len(),
                        states
                    ),
                ));
            }
        }
        Ok(())
    }
}

/// CSFS emission table for one decoding mode
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CsfsTable {
    rows: Vec<[Vec<f32>; 3]>,
}

impl CsfsTable {
    /// Build from `[undistinguished][distinguished][state]` rows
    pub fn new(rows: Vec<[Vec<f32>; 3]>) -> Self {
        Self { rows }
    }

    /// Emission vector over states
    #[inline]
    pub fn emission(&self, undistinguished: usize, distinguished: usize) -> &[f32] {
        &self.rows[undistinguished][distinguished]
    }

    /// Number of undistinguished rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[[Vec<f32>; 3]] {
        &self.rows
    }
}

/// Raw tables for [`DecodingQuantities::from_parts`]
#[derive(Clone, Debug, Default)]
pub struct QuantityParts {
    pub states: usize,
    pub csfs_samples: usize,
    pub time_vector: Vec<f32>,
    pub size_vector: Vec<f32>,
    pub discretization: Vec<f32>,
    pub expected_times: Vec<f32>,
    pub initial_state_prob: Vec<f32>,
    pub classic_emission_table: [Vec<f32>; 3],
    pub compressed_emission_table: [Vec<f32>; 2],
    /// (distance in Morgans, vectors)
    pub transitions: Vec<(f32, TransitionVectors)>,
    pub csfs: Vec<(DecodingMode, CsfsTable)>,
}

/// Immutable precomputed HMM tables
#[derive(Clone, Debug)]
pub struct DecodingQuantities {
    states: usize,
    csfs_samples: usize,
    time_vector: Vec<f32>,
    size_vector: Vec<f32>,
    discretization: Vec<f32>,
    expected_times: Vec<f32>,
    initial_state_prob: Vec<f32>,
    classic_emission_table: [Vec<f32>; 3],
    compressed_emission_table: [Vec<f32>; 2],
    /// Keyed by `round_morgans(distance).to_bits()`
    transitions: FxHashMap<u32, TransitionVectors>,
    csfs: FxHashMap<DecodingMode, CsfsTable>,
}

impl DecodingQuantities {
    /// Validate and assemble tables built in memory
    pub fn from_parts(parts: QuantityParts) -> Result<Self> {
        let n = parts.states;
        let fail = |msg: String| AsmcError::load("decoding quantities", msg);

        if n == 0 {
            return Err(fail("number of states must be positive".to_string()));
        }
        if parts.discretization.len() != parts.expected_times.len() + 1 {
            return Err(fail(format!(
                "time grid mismatch: {} discretization boundaries for {} expected times",
                parts.discretization.len(),
                parts.expected_times.len()
            )));
        }
        if parts.expected_times.len() != n {
            return Err(fail(format!(
                "{} expected times for {} states",
                parts.expected_times.len(),
                n
            )));
        }
        if parts.discretization.windows(2).any(|w| !(w[1] > w[0])) {
            return Err(fail("discretization boundaries must increase".to_string()));
        }
        if parts.initial_state_prob.len() != n {
            return Err(fail(format!(
                "initial state distribution has {} values, expected {}",
                parts.initial_state_prob.len(),
                n
            )));
        }
        let emission_rows = parts
            .classic_emission_table
            .iter()
            .chain(parts.compressed_emission_table.iter());
        for row in emission_rows {
            if row.len() != n {
                return Err(fail(format!(
                    "emission table row has {} values, expected {}",
                    row.len(),
                    n
                )));
            }
        }
        if parts.transitions.is_empty() {
            return Err(fail("no transition vectors".to_string()));
        }

        let mut transitions = FxHashMap::default();
        for (distance, vectors) in parts.transitions {
            vectors.check_len(n, distance)?;
            transitions.insert(round_morgans(distance).to_bits(), vectors);
        }

        let mut csfs = FxHashMap::default();
        for (mode, table) in parts.csfs {
            if table.len() + 1 != parts.csfs_samples {
                return Err(fail(format!(
                    "CSFS table for {} has {} undistinguished rows, expected {}",
                    mode,
                    table.len(),
                    parts.csfs_samples.saturating_sub(1)
                )));
            }
            if table
                .rows()
                .iter()
                .flat_map(|r| r.iter())
                .any(|v| v.len() != n)
            {
                return Err(fail(format!("CSFS table for {} has rows of wrong length", mode)));
            }
            csfs.insert(mode, table);
        }

        Ok(Self {
            states: n,
            csfs_samples: parts.csfs_samples,
            time_vector: parts.time_vector,
            size_vector: parts.size_vector,
            discretization: parts.discretization,
            expected_times: parts.expected_times,
            initial_state_prob: parts.initial_state_prob,
            classic_emission_table: parts.classic_emission_table,
            compressed_emission_table: parts.compressed_emission_table,
            transitions,
            csfs,
        })
    }

    /// Load from a (possibly gzip-compressed) decoding quantities file
    pub fn load(path: &std::path::Path) -> Result<Self> {
        crate::io::quantities::read_decoding_quantities(path)
    }

    pub fn states(&self) -> usize {
        self.states
    }

    pub fn csfs_samples(&self) -> usize {
        self.csfs_samples
    }

    pub fn discretization(&self) -> &[f32] {
        &self.discretization
    }

    pub fn expected_times(&self) -> &[f32] {
        &self.expected_times
    }

    pub fn initial_state_prob(&self) -> &[f32] {
        &self.initial_state_prob
    }

    pub fn time_vector(&self) -> &[f32] {
        &self.time_vector
    }

    pub fn size_vector(&self) -> &[f32] {
        &self.size_vector
    }

    /// Emission rows for 0, 1 and 2 derived alleles in the pair
    pub fn classic_emission(&self) -> &[Vec<f32>; 3] {
        &self.classic_emission_table
    }

    /// Emission rows for homozygous and heterozygous pairs
    pub fn compressed_emission(&self) -> &[Vec<f32>; 2] {
        &self.compressed_emission_table
    }

    /// Transition vectors for a genetic distance in Morgans
    pub fn transition(&self, distance: f32) -> Option<&TransitionVectors> {
        self.transitions.get(&round_morgans(distance).to_bits())
    }

    /// All transition entries, sorted by distance
    pub fn transitions(&self) -> Vec<(f32, &TransitionVectors)> {
        let mut out: Vec<_> = self
            .transitions
            .iter()
            .map(|(k, v)| (f32::from_bits(*k), v))
            .collect();
        out.sort_by(|a, b| a.0.total_cmp(&b.0));
        out
    }

    pub fn csfs(&self, mode: DecodingMode) -> Option<&CsfsTable> {
        self.csfs.get(&mode)
    }

    /// Number of states whose lower boundary lies below `time`
    pub fn state_threshold(&self, time: f32) -> usize {
        self.discretization[..self.states]
            .iter()
            .take_while(|&&b| b < time)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts(states: usize) -> QuantityParts {
        let v = vec![0.5f32; states];
        QuantityParts {
            states,
            csfs_samples: 4,
            discretization: (0..=states).map(|i| (i * 10) as f32).collect(),
            expected_times: (0..states).map(|i| (i * 10 + 5) as f32).collect(),
            initial_state_prob: vec![1.0 / states as f32; states],
            classic_emission_table: [v.clone(), v.clone(), v.clone()],
            compressed_emission_table: [v.clone(), v.clone()],
            transitions: vec![(
                0.001,
                TransitionVectors {
                    d: v.clone(),
                    b: v.clone(),
                    u: v.clone(),
                    r: v.clone(),
                },
            )],
            csfs: vec![(
                DecodingMode::ArrayFolded,
                CsfsTable::new(vec![[v.clone(), v.clone(), v.clone()]; 3]),
            )],
            ..QuantityParts::default()
        }
    }

    #[test]
    fn test_round_morgans() {
        assert_eq!(round_morgans(1e-12), 1e-10);
        assert_eq!(round_morgans(0.123), 0.123);
        assert_eq!(round_morgans(2.34), 2.34);
        assert_eq!(round_morgans(10.25), 10.3);
        assert_eq!(round_morgans(0.0012345), 0.00123);
        assert_eq!(round_morgans(-1.0), 1e-10);
    }

    #[test]
    fn test_from_parts_and_lookup() {
        let dq = DecodingQuantities::from_parts(parts(4)).unwrap();
        assert_eq!(dq.states(), 4);
        assert_eq!(dq.discretization().len(), dq.expected_times().len() + 1);
        assert!(dq.transition(0.0010001).is_some());
        assert!(dq.transition(0.002).is_none());
        assert!(dq.csfs(DecodingMode::ArrayFolded).is_some());
        assert!(dq.csfs(DecodingMode::Sequence).is_none());
    }

    #[test]
    fn test_grid_mismatch_is_load_error() {
        let mut p = parts(4);
        p.discretization.pop();
        assert!(matches!(
            DecodingQuantities::from_parts(p),
            Err(AsmcError::Load { .. })
        ));
    }

    #[test]
    fn test_csfs_row_count_checked() {
        let mut p = parts(4);
        p.csfs_samples = 10;
        assert!(DecodingQuantities::from_parts(p).is_err());
    }

    #[test]
    fn test_state_threshold() {
        let dq = DecodingQuantities::from_parts(parts(4)).unwrap();
        // boundaries 0, 10, 20, 30, 40
        assert_eq!(dq.state_threshold(0.0), 0);
        assert_eq!(dq.state_threshold(15.0), 2);
        assert_eq!(dq.state_threshold(30.0), 3);
        assert_eq!(dq.state_threshold(1e6), 4);
    }
}
