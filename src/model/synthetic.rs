//! # Synthetic Model and Panel
//!
//! Small, fully determined decoding quantities and haplotype panels for
//! tests and benchmarks. The model is a star-shaped chain over an
//! 8-interval time grid: from any state the chain leaves with probability
//! `r(ρ) = 1 - exp(-rate·ρ)` and lands in state `k` with probability
//! `π_k`, which factors exactly into the `D/B/U/R` vectors the decoder uses.
//! Heterozygosity grows with the expected time of the state.

use bitvec::prelude::*;

use crate::config::DecodingMode;
use crate::data::haplotype::HapSlot;
use crate::data::panel::{Data, HapBits, Individual, Site};
use crate::error::Result;
use crate::model::quantities::{CsfsTable, DecodingQuantities, QuantityParts, TransitionVectors};

const BOUNDARIES: [f32; 9] = [
    0.0, 20.0, 50.0, 150.0, 500.0, 1500.0, 5000.0, 15000.0, 1.0e9,
];
const EXPECTED_TIMES: [f32; 8] = [
    10.0, 35.0, 100.0, 300.0, 1000.0, 3000.0, 10000.0, 30000.0,
];

/// Parameters of the synthetic model
#[derive(Clone, Debug)]
pub struct SyntheticModel {
    pub csfs_samples: usize,
    /// Genetic distance between consecutive sites (Morgans)
    pub site_spacing: f64,
    /// State switching rate per Morgan
    pub rate: f64,
    /// Geometric decay of the stationary distribution over states
    pub decay: f64,
}

impl Default for SyntheticModel {
    fn default() -> Self {
        Self {
            csfs_samples: 10,
            site_spacing: 1e-4,
            rate: 400.0,
            decay: 0.7,
        }
    }
}

impl SyntheticModel {
    pub fn states(&self) -> usize {
        EXPECTED_TIMES.len()
    }

    fn stationary(&self) -> Vec<f32> {
        let w: Vec<f64> = (0..self.states()).map(|k| self.decay.powi(k as i32)).collect();
        let total: f64 = w.iter().sum();
        w.iter().map(|v| (v / total) as f32).collect()
    }

    fn heterozygosity(&self) -> Vec<f32> {
        EXPECTED_TIMES
            .iter()
            .map(|&t| 0.5 * (1.0 - (-f64::from(t) / 150.0).exp()) as f32)
            .collect()
    }

    /// Transition vectors for one inter-site distance
    pub fn transition(&self, distance: f64) -> TransitionVectors {
        let pi = self.stationary();
        let n = pi.len();
        let r = (1.0 - (-self.rate * distance).exp()) as f32;
        TransitionVectors {
            d: pi.iter().map(|&p| 1.0 - r + r * p).collect(),
            b: pi.iter().map(|&p| r * p).collect(),
            u: (0..n)
                .map(|j| if j + 1 < n { r * pi[j + 1] } else { 0.0 })
                .collect(),
            r: (0..n)
                .map(|l| if l + 1 < n { pi[l + 1] / pi[l] } else { 1.0 })
                .collect(),
        }
    }

    /// Decoding quantities covering the site spacing of [`panel`]
    pub fn quantities(&self) -> Result<DecodingQuantities> {
        let h = self.heterozygosity();
        let hom_major: Vec<f32> = h.iter().map(|&x| 0.7 * (1.0 - x)).collect();
        let hom_minor: Vec<f32> = h.iter().map(|&x| 0.3 * (1.0 - x)).collect();
        let hom: Vec<f32> = h.iter().map(|&x| 1.0 - x).collect();
        let classic = [hom_major, h.clone(), hom_minor];

        let rows = vec![classic.clone(); self.csfs_samples.saturating_sub(1)];
        let csfs = DecodingMode::ALL
            .into_iter()
            .map(|mode| (mode, CsfsTable::new(rows.clone())))
            .collect();

        DecodingQuantities::from_parts(QuantityParts {
            states: self.states(),
            csfs_samples: self.csfs_samples,
            time_vector: vec![0.0],
            size_vector: vec![10_000.0],
            discretization: BOUNDARIES.to_vec(),
            expected_times: EXPECTED_TIMES.to_vec(),
            initial_state_prob: self.stationary(),
            classic_emission_table: classic,
            compressed_emission_table: [hom, h],
            transitions: vec![(self.site_spacing as f32, self.transition(self.site_spacing))],
            csfs,
        })
    }
}

/// Two haplotypes forced identical over `[from, to)`
#[derive(Clone, Copy, Debug)]
pub struct PlantedSegment {
    pub ind_a: usize,
    pub hap_a: HapSlot,
    pub ind_b: usize,
    pub hap_b: HapSlot,
    pub from: usize,
    pub to: usize,
}

/// Seeded xorshift64 generator
struct XorShift(u64);

impl XorShift {
    fn new(seed: u64) -> Self {
        Self(seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1)
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }
}

/// Random diploid individuals and evenly spaced sites
pub fn individuals_and_sites(
    n_individuals: usize,
    n_sites: usize,
    site_spacing: f64,
    seed: u64,
    planted: Option<&PlantedSegment>,
) -> (Vec<Individual>, Vec<Site>) {
    let mut rng = XorShift::new(seed);
    let freqs: Vec<f64> = (0..n_sites).map(|_| 0.05 + 0.45 * rng.next_f64()).collect();

    let mut haps: Vec<HapBits> = (0..2 * n_individuals)
        .map(|_| {
            let mut h = bitvec![u64, Lsb0; 0; n_sites];
            for (site, &p) in freqs.iter().enumerate() {
                if rng.next_f64() < p {
                    h.set(site, true);
                }
            }
            h
        })
        .collect();

    if let Some(seg) = planted {
        let a = 2 * seg.ind_a + seg.hap_a.offset();
        let b = 2 * seg.ind_b + seg.hap_b.offset();
        for site in seg.from..seg.to.min(n_sites) {
            let v = haps[a][site];
            haps[b].set(site, v);
        }
    }

    let mut columns = haps.into_iter();
    let mut individuals = Vec::with_capacity(n_individuals);
    for i in 0..n_individuals {
        if let (Some(first), Some(second)) = (columns.next(), columns.next()) {
            individuals.push(Individual::diploid(
                format!("FAM{}", i),
                format!("IND{}", i),
                first,
                second,
            ));
        }
    }

    let sites = (0..n_sites)
        .map(|k| Site {
            chrom: "1".to_string(),
            id: format!("rs{}", k + 1),
            bp: 1_000 + 1_000 * k as u64,
            gen_pos: site_spacing * k as f64,
        })
        .collect();

    (individuals, sites)
}

/// Folded panel decoded with CSFS emissions
pub fn panel(
    n_individuals: usize,
    n_sites: usize,
    seed: u64,
    planted: Option<&PlantedSegment>,
    csfs_samples: usize,
) -> Result<Data> {
    let spacing = SyntheticModel::default().site_spacing;
    let (individuals, sites) = individuals_and_sites(n_individuals, n_sites, spacing, seed, planted);
    Data::from_individuals(individuals, sites, csfs_samples, true, true)
}

/// Three diploids sharing one haplotype everywhere except the second
/// haplotype of individual 2, which differs at `odd_site`. The model gives a
/// heterozygous site zero likelihood in every state, so exactly the pairs
/// involving that haplotype have no valid posterior.
pub fn degenerate_fixture(n_sites: usize, odd_site: usize) -> Result<(Data, DecodingQuantities)> {
    let model = SyntheticModel::default();
    let n = model.states();
    let base = model.quantities()?;
    let dq = DecodingQuantities::from_parts(QuantityParts {
        states: n,
        csfs_samples: model.csfs_samples,
        time_vector: base.time_vector().to_vec(),
        size_vector: base.size_vector().to_vec(),
        discretization: base.discretization().to_vec(),
        expected_times: base.expected_times().to_vec(),
        initial_state_prob: base.initial_state_prob().to_vec(),
        classic_emission_table: base.classic_emission().clone(),
        compressed_emission_table: [vec![1.0; n], vec![0.0; n]],
        transitions: vec![(model.site_spacing as f32, model.transition(model.site_spacing))],
        csfs: Vec::new(),
    })?;

    let shared: HapBits = (0..n_sites).map(|k| k % 3 == 0).collect();
    let mut odd = shared.clone();
    if odd_site < n_sites {
        let v = odd[odd_site];
        odd.set(odd_site, !v);
    }
    let (_, sites) = individuals_and_sites(0, n_sites, model.site_spacing, 1, None);
    let individuals = vec![
        Individual::diploid("FAM0", "IND0", shared.clone(), shared.clone()),
        Individual::diploid("FAM1", "IND1", shared.clone(), shared.clone()),
        Individual::diploid("FAM2", "IND2", shared, odd),
    ];
    let data = Data::from_individuals(individuals, sites, model.csfs_samples, true, false)?;
    Ok((data, dq))
}
