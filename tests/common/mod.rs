//! Shared fixtures: synthetic panels written to temporary directories.
#![allow(dead_code)]

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use asmc::config::with_suffix;
use asmc::io::quantities::write_decoding_quantities;
use asmc::model::synthetic::SyntheticModel;
use asmc::DecodingQuantities;
use flate2::write::GzEncoder;
use flate2::Compression;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub const SITE_SPACING_CM: f64 = 0.01;

/// Builds a panel root (`.hap.gz`, `.samples`, `.map`, `.decodingQuantities.gz`)
pub struct PanelBuilder {
    n_individuals: usize,
    n_sites: usize,
    seed: u64,
    /// (hap_a, hap_b, from, to): copy hap_a into hap_b over `[from, to)`
    planted: Vec<(usize, usize, usize, usize)>,
    gzip: bool,
}

impl PanelBuilder {
    pub fn new(n_individuals: usize, n_sites: usize) -> Self {
        Self {
            n_individuals,
            n_sites,
            seed: 7,
            planted: Vec::new(),
            gzip: true,
        }
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Make haplotype `hap_b` identical to `hap_a` over sites `[from, to)`
    pub fn planted(mut self, hap_a: usize, hap_b: usize, from: usize, to: usize) -> Self {
        self.planted.push((hap_a, hap_b, from, to));
        self
    }

    pub fn plain_text(mut self) -> Self {
        self.gzip = false;
        self
    }

    /// Haplotype matrix `[hap][site]`
    pub fn haplotypes(&self) -> Vec<Vec<u8>> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let freqs: Vec<f64> = (0..self.n_sites).map(|_| rng.gen_range(0.05..0.5)).collect();
        let mut haps: Vec<Vec<u8>> = (0..2 * self.n_individuals)
            .map(|_| freqs.iter().map(|&p| u8::from(rng.gen::<f64>() < p)).collect())
            .collect();
        for &(a, b, from, to) in &self.planted {
            for site in from..to.min(self.n_sites) {
                haps[b][site] = haps[a][site];
            }
        }
        haps
    }

    pub fn build(self, dir: &Path) -> PathBuf {
        let root = dir.join("panel");
        let haps = self.haplotypes();

        let mut samples = File::create(with_suffix(&root, ".samples")).unwrap();
        writeln!(samples, "ID_1 ID_2 missing").unwrap();
        writeln!(samples, "0 0 0").unwrap();
        for i in 0..self.n_individuals {
            writeln!(samples, "FAM{} IND{} 0", i, i).unwrap();
        }

        let mut lines = String::new();
        for site in 0..self.n_sites {
            lines.push_str(&format!("1 rs{} {} A G", site + 1, bp(site)));
            for hap in &haps {
                lines.push(' ');
                lines.push(if hap[site] == 1 { '1' } else { '0' });
            }
            lines.push('\n');
        }
        if self.gzip {
            let file = File::create(with_suffix(&root, ".hap.gz")).unwrap();
            let mut gz = GzEncoder::new(BufWriter::new(file), Compression::fast());
            gz.write_all(lines.as_bytes()).unwrap();
            gz.finish().unwrap().flush().unwrap();
        } else {
            std::fs::write(with_suffix(&root, ".hap"), lines).unwrap();
        }

        let mut map = File::create(with_suffix(&root, ".map")).unwrap();
        for site in 0..self.n_sites {
            writeln!(map, "1 rs{} {} {}", site + 1, site as f64 * SITE_SPACING_CM, bp(site)).unwrap();
        }

        write_decoding_quantities(
            &with_suffix(&root, ".decodingQuantities.gz"),
            &quantities(),
        )
        .unwrap();
        root
    }
}

pub fn bp(site: usize) -> u64 {
    1_000 + 1_000 * site as u64
}

pub fn quantities() -> DecodingQuantities {
    SyntheticModel::default().quantities().unwrap()
}
