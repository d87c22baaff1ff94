//! # Haplotype Panel
//!
//! ## Role
//! `Data` holds the individuals, the site map and the per-site allele counts
//! the decoder needs to turn a pair of haplotypes into emissions.
//!
//! ## Derived per-site state
//! - Folding: with `fold_data`, a site whose derived-allele count exceeds half
//!   of the haplotypes is flipped in every haplotype so that `1` always codes
//!   the minor allele. Flipped sites are recorded.
//! - Undistinguished counts: for a pair carrying `d` derived alleles at a
//!   site, the remaining `derived - d` alleles among the other haplotypes,
//!   projected onto `csfs_samples - 2` samples when the panel is larger.
//!   Impossible values are stored as `-1`.
//!
//! Haplotypes are stored as `BitVec<u64, Lsb0>` over sites.

use std::path::Path;

use bitvec::prelude::*;
use tracing::{info, info_span};

use crate::config::{with_suffix, DecodingParams};
use crate::data::genetic_map::GeneticMap;
use crate::data::haplotype::{HapIdx, HapSlot, SampleIdx, Samples};
use crate::error::{AsmcError, Result};
use crate::io::haps;
use crate::model::sharding::PairShard;

/// Alleles of one haplotype over all sites
pub type HapBits = BitVec<u64, Lsb0>;

/// One site of the panel
#[derive(Clone, Debug, PartialEq)]
pub struct Site {
    pub chrom: String,
    pub id: String,
    /// Physical position (bp)
    pub bp: u64,
    /// Genetic position (Morgans)
    pub gen_pos: f64,
}

/// Genotype category of a pair at one site
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GenotypeCategory {
    HomMajor,
    Het,
    HomMinor,
}

impl GenotypeCategory {
    pub fn from_alleles(a: bool, b: bool) -> Self {
        match (a, b) {
            (false, false) => GenotypeCategory::HomMajor,
            (true, true) => GenotypeCategory::HomMinor,
            _ => GenotypeCategory::Het,
        }
    }

    /// Number of derived alleles carried by the pair
    pub fn index(self) -> usize {
        match self {
            GenotypeCategory::HomMajor => 0,
            GenotypeCategory::Het => 1,
            GenotypeCategory::HomMinor => 2,
        }
    }
}

/// One individual with one (haploid) or two (diploid) haplotypes
#[derive(Clone, Debug)]
pub struct Individual {
    pub family_id: String,
    pub id: String,
    haplotypes: Vec<HapBits>,
}

impl Individual {
    pub fn diploid(
        family_id: impl Into<String>,
        id: impl Into<String>,
        first: HapBits,
        second: HapBits,
    ) -> Self {
        Self {
            family_id: family_id.into(),
            id: id.into(),
            haplotypes: vec![first, second],
        }
    }

    pub fn haploid(family_id: impl Into<String>, id: impl Into<String>, hap: HapBits) -> Self {
        Self {
            family_id: family_id.into(),
            id: id.into(),
            haplotypes: vec![hap],
        }
    }

    pub fn is_diploid(&self) -> bool {
        self.haplotypes.len() == 2
    }

    pub fn ploidy(&self) -> usize {
        self.haplotypes.len()
    }

    pub fn hap(&self, slot: HapSlot) -> Option<&HapBits> {
        self.haplotypes.get(slot.offset())
    }

    pub fn haplotypes(&self) -> &[HapBits] {
        &self.haplotypes
    }
}

/// Options controlling how a panel is loaded
#[derive(Clone, Debug)]
pub struct PanelOptions {
    pub csfs_samples: usize,
    pub fold_data: bool,
    pub using_csfs: bool,
    /// Genetic map; defaults to `<root>.map[.gz]`
    pub map_file: Option<std::path::PathBuf>,
}

impl PanelOptions {
    pub fn from_params(params: &DecodingParams, csfs_samples: usize) -> Self {
        Self {
            csfs_samples,
            fold_data: params.fold_data,
            using_csfs: params.using_csfs,
            map_file: params.map_file.clone(),
        }
    }
}

/// Panel of individuals over a sequence of sites
#[derive(Clone, Debug)]
pub struct Data {
    samples: Samples,
    individuals: Vec<Individual>,
    sites: Vec<Site>,
    gen_pos: Vec<f64>,
    site_was_flipped: Vec<bool>,
    /// Derived-allele count per site, after folding
    derived: Vec<u32>,
    /// Undistinguished count per site for 0, 1 and 2 distinguished derived alleles
    undistinguished: Vec<[i32; 3]>,
    n_haps: usize,
    csfs_samples: usize,
    fold_data: bool,
    using_csfs: bool,
    shard: PairShard,
}

impl Data {
    /// Number of sites in the panel at `root`, without parsing alleles
    pub fn count_hap_lines(root: &Path) -> Result<usize> {
        let path = haps::find_hap_file(root)?;
        haps::count_lines(&path)
    }

    /// Load the panel at `root` expecting `sequence_length` sites
    pub fn load(root: &Path, sequence_length: usize, options: &PanelOptions) -> Result<Self> {
        Self::load_sharded(root, sequence_length, options, PairShard::full())
    }

    /// Load the panel at `root` for one shard of the pair space
    pub fn load_sharded(
        root: &Path,
        sequence_length: usize,
        options: &PanelOptions,
        shard: PairShard,
    ) -> Result<Self> {
        let _span = info_span!("load_panel", root = %root.display()).entered();

        let samples = haps::read_samples(&haps::find_samples_file(root)?)?;
        let hap_path = haps::find_hap_file(root)?;
        let panel = haps::read_haps(&hap_path, samples.len(), sequence_length)?;

        let map = match &options.map_file {
            Some(path) => GeneticMap::from_file(path)?,
            None => GeneticMap::from_file(&find_map_file(root)?)?,
        };

        let sites = panel
            .sites
            .into_iter()
            .map(|s| Site {
                gen_pos: map.gen_pos_morgans(s.bp),
                chrom: s.chrom,
                id: s.id,
                bp: s.bp,
            })
            .collect();

        let mut columns = panel.haplotypes.into_iter();
        let mut individuals = Vec::with_capacity(samples.len());
        for s in 0..samples.len() {
            let idx = SampleIdx::from(s);
            let (Some(first), Some(second)) = (columns.next(), columns.next()) else {
                return Err(AsmcError::load("panel", "fewer haplotype columns than samples"));
            };
            individuals.push(Individual::diploid(
                samples.family_id(idx),
                &samples[idx],
                first,
                second,
            ));
        }

        let data = Self::build(individuals, sites, options, shard, &hap_path)?;
        info!(
            individuals = data.individuals.len(),
            sites = data.sites.len(),
            flipped = data.n_flipped(),
            "Loaded panel"
        );
        Ok(data)
    }

    /// In-memory constructor with the same validation as `load`
    pub fn from_individuals(
        individuals: Vec<Individual>,
        sites: Vec<Site>,
        csfs_samples: usize,
        fold_data: bool,
        using_csfs: bool,
    ) -> Result<Self> {
        let options = PanelOptions {
            csfs_samples,
            fold_data,
            using_csfs,
            map_file: None,
        };
        Self::build(
            individuals,
            sites,
            &options,
            PairShard::full(),
            Path::new("<in-memory panel>"),
        )
    }

    fn build(
        mut individuals: Vec<Individual>,
        sites: Vec<Site>,
        options: &PanelOptions,
        shard: PairShard,
        source: &Path,
    ) -> Result<Self> {
        let n_sites = sites.len();
        if individuals.is_empty() || n_sites == 0 {
            return Err(AsmcError::load("panel", "panel has no individuals or no sites"));
        }
        for (k, pair) in sites.windows(2).enumerate() {
            if pair[1].bp <= pair[0].bp {
                return Err(AsmcError::format(
                    source,
                    k + 2,
                    format!("physical position {} is not increasing", pair[1].bp),
                ));
            }
            if !(pair[1].gen_pos >= pair[0].gen_pos) {
                return Err(AsmcError::format(
                    source,
                    k + 2,
                    format!("genetic position {} is decreasing", pair[1].gen_pos),
                ));
            }
        }
        for ind in &individuals {
            if ind.haplotypes.is_empty() || ind.haplotypes.len() > 2 {
                return Err(AsmcError::invalid_data(format!(
                    "individual {} must carry one or two haplotypes",
                    ind.id
                )));
            }
            if let Some(bad) = ind.haplotypes.iter().find(|h| h.len() != n_sites) {
                return Err(AsmcError::format(
                    source,
                    0,
                    format!(
                        "individual {} has {} alleles, expected {}",
                        ind.id,
                        bad.len(),
                        n_sites
                    ),
                ));
            }
        }

        let n_haps: usize = individuals.iter().map(|i| i.ploidy()).sum();
        if n_haps < 2 {
            return Err(AsmcError::load("panel", "at least two haplotypes are required"));
        }
        if options.using_csfs && options.csfs_samples < 2 {
            return Err(AsmcError::config(format!(
                "CSFS emissions need at least 2 samples, the table has {}",
                options.csfs_samples
            )));
        }

        let mut derived = vec![0u32; n_sites];
        for hap in individuals.iter().flat_map(|i| i.haplotypes.iter()) {
            for site in hap.iter_ones() {
                derived[site] += 1;
            }
        }

        let mut site_was_flipped = vec![false; n_sites];
        if options.fold_data {
            for (site, count) in derived.iter_mut().enumerate() {
                if *count as usize * 2 > n_haps {
                    site_was_flipped[site] = true;
                    *count = (n_haps - *count as usize) as u32;
                }
            }
            for hap in individuals.iter_mut().flat_map(|i| i.haplotypes.iter_mut()) {
                for (site, &flip) in site_was_flipped.iter().enumerate() {
                    if flip {
                        let v = hap[site];
                        hap.set(site, !v);
                    }
                }
            }
        }

        let undistinguished = derived
            .iter()
            .map(|&c| undistinguished_counts(c as usize, n_haps, options.csfs_samples))
            .collect();

        let samples = Samples::from_ids_with_ploidy(
            individuals
                .iter()
                .map(|i| (i.family_id.clone(), i.id.clone()))
                .collect(),
            individuals.iter().map(|i| i.is_diploid()).collect(),
        );
        let gen_pos = sites.iter().map(|s| s.gen_pos).collect();

        Ok(Self {
            samples,
            individuals,
            sites,
            gen_pos,
            site_was_flipped,
            derived,
            undistinguished,
            n_haps,
            csfs_samples: options.csfs_samples,
            fold_data: options.fold_data,
            using_csfs: options.using_csfs,
            shard,
        })
    }

    pub fn individuals(&self) -> &[Individual] {
        &self.individuals
    }

    pub fn n_individuals(&self) -> usize {
        self.individuals.len()
    }

    pub fn samples(&self) -> &Samples {
        &self.samples
    }

    /// Number of sites (the sequence length)
    pub fn sites(&self) -> usize {
        self.sites.len()
    }

    pub fn site_map(&self) -> &[Site] {
        &self.sites
    }

    /// Genetic positions in Morgans
    pub fn genetic_positions(&self) -> &[f64] {
        &self.gen_pos
    }

    pub fn n_haps(&self) -> usize {
        self.n_haps
    }

    pub fn csfs_samples(&self) -> usize {
        self.csfs_samples
    }

    pub fn fold_data(&self) -> bool {
        self.fold_data
    }

    pub fn using_csfs(&self) -> bool {
        self.using_csfs
    }

    pub fn shard(&self) -> PairShard {
        self.shard
    }

    pub fn site_was_flipped(&self) -> &[bool] {
        &self.site_was_flipped
    }

    fn n_flipped(&self) -> usize {
        self.site_was_flipped.iter().filter(|&&f| f).count()
    }

    /// Checked lookup of one haplotype
    pub fn haplotype(&self, individual: SampleIdx, slot: HapSlot) -> Result<&HapBits> {
        let ind = self.individuals.get(individual.as_usize()).ok_or_else(|| {
            AsmcError::invalid_data(format!(
                "individual {} out of range ({} individuals)",
                individual.0,
                self.individuals.len()
            ))
        })?;
        ind.hap(slot).ok_or_else(|| {
            AsmcError::invalid_data(format!(
                "individual {} is haploid and has no haplotype {}",
                ind.id, slot
            ))
        })
    }

    /// Haplotype by global index
    pub fn hap_by_index(&self, hap: HapIdx) -> &HapBits {
        let (sample, slot) = self.samples.hap_owner(hap);
        &self.individuals[sample.as_usize()].haplotypes[slot.offset()]
    }

    /// Allele (after folding) of one haplotype at a site
    pub fn allele(&self, individual: SampleIdx, slot: HapSlot, site: usize) -> Result<bool> {
        let hap = self.haplotype(individual, slot)?;
        hap.get(site).map(|b| *b).ok_or_else(|| {
            AsmcError::invalid_data(format!("site {} out of range ({} sites)", site, hap.len()))
        })
    }

    /// Genotype category of two haplotypes at a site
    pub fn observation(
        &self,
        ind_a: SampleIdx,
        slot_a: HapSlot,
        ind_b: SampleIdx,
        slot_b: HapSlot,
        site: usize,
    ) -> Result<GenotypeCategory> {
        Ok(GenotypeCategory::from_alleles(
            self.allele(ind_a, slot_a, site)?,
            self.allele(ind_b, slot_b, site)?,
        ))
    }

    /// Derived (minor, when folded) allele count at a site
    pub fn derived_count(&self, site: usize) -> u32 {
        self.derived[site]
    }

    pub fn minor_allele_frequency(&self, site: usize) -> f32 {
        let c = self.derived[site] as usize;
        c.min(self.n_haps - c) as f32 / self.n_haps as f32
    }

    /// Undistinguished count at a site for a pair carrying `distinguished` derived alleles
    #[inline]
    pub fn undistinguished(&self, site: usize, distinguished: usize) -> i32 {
        self.undistinguished[site][distinguished]
    }
}

/// Undistinguished counts for 0, 1 and 2 distinguished derived alleles
fn undistinguished_counts(derived: usize, n_haps: usize, csfs_samples: usize) -> [i32; 3] {
    let mut out = [-1i32; 3];
    let others = n_haps.saturating_sub(2);
    for (d, slot) in out.iter_mut().enumerate() {
        if derived < d || derived - d > others {
            continue;
        }
        let u = derived - d;
        *slot = if csfs_samples >= 2 && csfs_samples < n_haps {
            let target = (csfs_samples - 2) as f64;
            (u as f64 * target / others as f64).round() as i32
        } else {
            u as i32
        };
    }
    out
}

fn find_map_file(root: &Path) -> Result<std::path::PathBuf> {
    [".map.gz", ".map"]
        .iter()
        .map(|suffix| with_suffix(root, suffix))
        .find(|p| p.exists())
        .ok_or_else(|| {
            AsmcError::load(
                "genetic map",
                format!("no {}.map or {}.map.gz found", root.display(), root.display()),
            )
        })
}
