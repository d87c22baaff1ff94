//! # IBD Calling and Age Estimation
//!
//! Given the posterior of one pair over a decoded range, the IBD probability
//! at a site is the posterior mass of the states whose lower time boundary
//! lies below the IBD time threshold. Maximal runs of sites where it reaches
//! the recall's probability threshold are IBD segments if they are at least
//! `min_m` centimorgans long.
//!
//! The age of a segment comes from the posterior summed over its sites,
//! restricted to the recent states unless conditioning is turned off.

use serde::{Deserialize, Serialize};

use crate::data::haplotype::{HapSlot, SampleIdx};
use crate::data::panel::Data;
use crate::model::observation::PairObservation;

/// One called IBD segment
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IbdSegment {
    pub ind_a: SampleIdx,
    pub hap_a: HapSlot,
    pub ind_b: SampleIdx,
    pub hap_b: HapSlot,
    /// First site (inclusive)
    pub start_site: usize,
    /// Last site (inclusive)
    pub end_site: usize,
    pub start_bp: u64,
    pub end_bp: u64,
    /// Genetic length (cM)
    pub length_cm: f32,
    /// Mean IBD probability over the segment
    pub score: f32,
    pub posterior_mean_age: Option<f32>,
    pub map_age: Option<f32>,
}

/// Segment calling rules
#[derive(Clone, Debug)]
pub struct IbdCaller {
    /// States counted as IBD: `0..ibd_states`
    pub ibd_states: usize,
    /// Minimum IBD probability of a site inside a segment
    pub probability_threshold: f32,
    /// Minimum segment length (cM)
    pub min_m: f32,
    /// Restrict the age posterior to the IBD states
    pub conditional_ages: bool,
    pub posterior_mean_age: bool,
    pub map_age: bool,
}

impl IbdCaller {
    /// IBD probability per site of a `[state][offset]` posterior
    pub fn ibd_probability(&self, posterior: &[Vec<f32>]) -> Vec<f32> {
        let len = posterior.first().map_or(0, |row| row.len());
        let mut out = vec![0.0f32; len];
        for row in &posterior[..self.ibd_states.min(posterior.len())] {
            for (o, &p) in out.iter_mut().zip(row) {
                *o += p;
            }
        }
        out
    }

    /// Call segments of `obs` from its posterior over `obs.range()`
    pub fn call(
        &self,
        data: &Data,
        obs: &PairObservation,
        posterior: &[Vec<f32>],
        expected_times: &[f32],
    ) -> Vec<IbdSegment> {
        let probability = self.ibd_probability(posterior);
        let gen = data.genetic_positions();
        let sites = data.site_map();

        let mut segments = Vec::new();
        let mut offset = 0;
        while offset < probability.len() {
            if probability[offset] < self.probability_threshold {
                offset += 1;
                continue;
            }
            let start = offset;
            while offset < probability.len() && probability[offset] >= self.probability_threshold {
                offset += 1;
            }
            let end = offset - 1;

            let (first, last) = (obs.from + start, obs.from + end);
            let length_cm = ((gen[last] - gen[first]) * 100.0) as f32;
            if length_cm < self.min_m {
                continue;
            }
            let score =
                probability[start..=end].iter().sum::<f32>() / (end - start + 1) as f32;
            let (posterior_mean_age, map_age) = self.age(posterior, start..end + 1, expected_times);

            segments.push(IbdSegment {
                ind_a: obs.ind_a,
                hap_a: obs.hap_a,
                ind_b: obs.ind_b,
                hap_b: obs.hap_b,
                start_site: first,
                end_site: last,
                start_bp: sites[first].bp,
                end_bp: sites[last].bp,
                length_cm,
                score,
                posterior_mean_age,
                map_age,
            });
        }
        segments
    }

    fn age(
        &self,
        posterior: &[Vec<f32>],
        offsets: std::ops::Range<usize>,
        expected_times: &[f32],
    ) -> (Option<f32>, Option<f32>) {
        if !self.posterior_mean_age && !self.map_age {
            return (None, None);
        }
        let states = if self.conditional_ages {
            self.ibd_states.min(posterior.len())
        } else {
            posterior.len()
        };
        let mass: Vec<f64> = posterior[..states]
            .iter()
            .map(|row| row[offsets.clone()].iter().map(|&p| f64::from(p)).sum())
            .collect();
        let total: f64 = mass.iter().sum();
        if !(total > 0.0) {
            return (None, None);
        }

        let mean = mass
            .iter()
            .zip(expected_times)
            .map(|(m, &t)| m / total * f64::from(t))
            .sum::<f64>() as f32;
        let best = mass
            .iter()
            .enumerate()
            .fold(0, |best, (k, &m)| if m > mass[best] { k } else { best });

        (
            self.posterior_mean_age.then_some(mean),
            self.map_age.then_some(expected_times[best]),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::panel::{Individual, Site};
    use bitvec::prelude::*;

    fn data(n_sites: usize) -> Data {
        let sites = (0..n_sites)
            .map(|k| Site {
                chrom: "1".to_string(),
                id: format!("s{}", k),
                bp: 100 * (k as u64 + 1),
                gen_pos: 0.001 * k as f64,
            })
            .collect();
        let h = || bitvec![u64, Lsb0; 0; n_sites];
        let individuals = vec![
            Individual::diploid("F", "A", h(), h()),
            Individual::diploid("F", "B", h(), h()),
        ];
        Data::from_individuals(individuals, sites, 4, true, false).unwrap()
    }

    fn obs(len: usize) -> PairObservation {
        PairObservation {
            hap_a: HapSlot::First,
            ind_a: SampleIdx::new(0),
            hap_b: HapSlot::First,
            ind_b: SampleIdx::new(1),
            from: 0,
            len,
            folded: true,
        }
    }

    fn caller() -> IbdCaller {
        IbdCaller {
            ibd_states: 1,
            probability_threshold: 0.5,
            min_m: 0.5,
            conditional_ages: false,
            posterior_mean_age: true,
            map_age: true,
        }
    }

    /// Two states; state 0 is recent
    fn posterior(recent: &[f32]) -> Vec<Vec<f32>> {
        vec![recent.to_vec(), recent.iter().map(|p| 1.0 - p).collect()]
    }

    #[test]
    fn test_runs_above_threshold() {
        let d = data(20);
        let mut p = vec![0.1f32; 20];
        for v in &mut p[3..12] {
            *v = 0.9;
        }
        // too short: 0.1 cM
        p[15] = 0.8;
        p[16] = 0.8;
        let segs = caller().call(&d, &obs(20), &posterior(&p), &[10.0, 1000.0]);
        assert_eq!(segs.len(), 1);
        let s = &segs[0];
        assert_eq!((s.start_site, s.end_site), (3, 11));
        assert_eq!((s.start_bp, s.end_bp), (400, 1200));
        assert!((s.length_cm - 0.8).abs() < 1e-4);
        assert!((s.score - 0.9).abs() < 1e-6);
        // unconditional: mean of 0.9 * 10 + 0.1 * 1000
        assert!((s.posterior_mean_age.unwrap() - 109.0).abs() < 1e-2);
        assert_eq!(s.map_age, Some(10.0));
    }

    #[test]
    fn test_conditional_age_uses_recent_states() {
        let d = data(10);
        let mut c = caller();
        c.conditional_ages = true;
        c.min_m = 0.0;
        let segs = c.call(&d, &obs(10), &posterior(&[0.7; 10]), &[10.0, 1000.0]);
        assert_eq!(segs.len(), 1);
        assert_eq!(segs[0].posterior_mean_age, Some(10.0));
    }

    #[test]
    fn test_range_offsets_map_to_sites() {
        let d = data(30);
        let mut o = obs(10);
        o.from = 15;
        let mut c = caller();
        c.min_m = 0.0;
        c.map_age = false;
        let segs = c.call(&d, &o, &posterior(&[0.95; 10]), &[10.0, 1000.0]);
        assert_eq!((segs[0].start_site, segs[0].end_site), (15, 24));
        assert_eq!(segs[0].map_age, None);
    }
}
