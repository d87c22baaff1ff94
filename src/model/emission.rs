//! # Per-site Emission and Transition Tables
//!
//! The decoder never looks at the raw decoding quantities inside the
//! recursion. At construction it resolves, for every site of the panel:
//!
//! - the emission vectors, stored as `e1`, `e0 - e1` and `e2 - e0` so that
//!   the emission of a pair is `e1 + hom * (e0 - e1) + hom_minor * (e2 - e0)`;
//! - the transition vectors for the distance from the previous site.
//!
//! CSFS emissions are used at the first site and at every site at least
//! `skip_csfs_distance` Morgans past the last CSFS site. Other sites use the
//! compressed table, which cannot tell the two homozygous states apart.

use tracing::debug;

use crate::config::DecodingMode;
use crate::data::panel::Data;
use crate::error::{AsmcError, Result};
use crate::model::quantities::{round_morgans, DecodingQuantities, TransitionVectors};

/// Emission vectors for every site, flattened `[site][state]`
#[derive(Clone, Debug)]
pub struct SiteEmissions {
    states: usize,
    e1: Vec<f32>,
    e0_minus_1: Vec<f32>,
    e2_minus_0: Vec<f32>,
    uses_csfs: Vec<bool>,
}

impl SiteEmissions {
    pub fn build(
        data: &Data,
        dq: &DecodingQuantities,
        mode: DecodingMode,
        skip_csfs_distance: f32,
    ) -> Result<Self> {
        let states = dq.states();
        let n_sites = data.sites();
        let uses_csfs = csfs_sites(data, skip_csfs_distance);

        let csfs = if uses_csfs.iter().any(|&u| u) {
            Some(dq.csfs(mode).ok_or_else(|| {
                AsmcError::config(format!(
                    "CSFS emissions requested but the decoding quantities have no {} table",
                    mode
                ))
            })?)
        } else {
            None
        };

        let mut e1 = Vec::with_capacity(n_sites * states);
        let mut e0_minus_1 = Vec::with_capacity(n_sites * states);
        let mut e2_minus_0 = Vec::with_capacity(n_sites * states);
        let [hom, het] = dq.compressed_emission();
        let zeros = vec![0.0f32; states];

        for (site, &use_csfs) in uses_csfs.iter().enumerate() {
            match (use_csfs, csfs) {
                (true, Some(table)) => {
                    let mut rows: [&[f32]; 3] = [&zeros, &zeros, &zeros];
                    for (d, row) in rows.iter_mut().enumerate() {
                        let u = data.undistinguished(site, d);
                        if u < 0 {
                            // no pair can carry d derived alleles here
                            continue;
                        }
                        let u = u as usize;
                        if u >= table.len() {
                            return Err(AsmcError::load(
                                "decoding quantities",
                                format!(
                                    "undistinguished count {} at site {} exceeds the CSFS table ({} rows)",
                                    u,
                                    site,
                                    table.len()
                                ),
                            ));
                        }
                        *row = table.emission(u, d);
                    }
                    e1.extend_from_slice(rows[1]);
                    e0_minus_1.extend(rows[0].iter().zip(rows[1]).map(|(a, b)| a - b));
                    e2_minus_0.extend(rows[2].iter().zip(rows[0]).map(|(a, b)| a - b));
                }
                _ => {
                    e1.extend_from_slice(het);
                    e0_minus_1.extend(hom.iter().zip(het).map(|(a, b)| a - b));
                    e2_minus_0.extend(std::iter::repeat(0.0f32).take(states));
                }
            }
        }

        debug!(
            sites = n_sites,
            csfs_sites = uses_csfs.iter().filter(|&&u| u).count(),
            "Prepared site emissions"
        );

        Ok(Self {
            states,
            e1,
            e0_minus_1,
            e2_minus_0,
            uses_csfs,
        })
    }

    /// `(e1, e0 - e1, e2 - e0)` at a site
    #[inline]
    pub fn site(&self, site: usize) -> (&[f32], &[f32], &[f32]) {
        let r = site * self.states..(site + 1) * self.states;
        (
            &self.e1[r.clone()],
            &self.e0_minus_1[r.clone()],
            &self.e2_minus_0[r],
        )
    }

    pub fn uses_csfs(&self, site: usize) -> bool {
        self.uses_csfs[site]
    }
}

fn csfs_sites(data: &Data, skip_csfs_distance: f32) -> Vec<bool> {
    let n = data.sites();
    let mut out = vec![false; n];
    if !data.using_csfs() || !skip_csfs_distance.is_finite() || n == 0 {
        return out;
    }
    let gen = data.genetic_positions();
    let skip = f64::from(skip_csfs_distance);
    out[0] = true;
    let mut last = gen[0];
    for site in 1..n {
        if gen[site] - last >= skip {
            out[site] = true;
            last = gen[site];
        }
    }
    out
}

/// Transition vectors to every site from the one before it
#[derive(Clone, Debug)]
pub struct SiteTransitions {
    vectors: Vec<TransitionVectors>,
    /// `site_index[site]` points into `vectors`; unused for site 0
    site_index: Vec<u32>,
}

impl SiteTransitions {
    pub fn build(data: &Data, dq: &DecodingQuantities) -> Result<Self> {
        let gen = data.genetic_positions();
        let mut vectors: Vec<TransitionVectors> = Vec::new();
        let mut key_to_index = rustc_hash::FxHashMap::<u32, u32>::default();
        let mut site_index = vec![0u32; gen.len()];

        for site in 1..gen.len() {
            let distance = round_morgans((gen[site] - gen[site - 1]) as f32);
            let key = distance.to_bits();
            let idx = match key_to_index.get(&key) {
                Some(&idx) => idx,
                None => {
                    let t = dq.transition(distance).ok_or_else(|| {
                        AsmcError::load(
                            "decoding quantities",
                            format!(
                                "no transition vectors for genetic distance {} (between sites {} and {})",
                                distance,
                                site - 1,
                                site
                            ),
                        )
                    })?;
                    vectors.push(t.clone());
                    let idx = (vectors.len() - 1) as u32;
                    key_to_index.insert(key, idx);
                    idx
                }
            };
            site_index[site] = idx;
        }

        Ok(Self {
            vectors,
            site_index,
        })
    }

    /// Transition from `site - 1` to `site`
    #[inline]
    pub fn to_site(&self, site: usize) -> &TransitionVectors {
        &self.vectors[self.site_index[site] as usize]
    }

    /// Number of distinct distances in the panel
    pub fn distinct(&self) -> usize {
        self.vectors.len()
    }
}
