//! # GERMLINE Seed Index
//!
//! ## Role
//! Fast pre-screening of IBD candidates. Informative sites (minor allele
//! frequency at least `min_maf`) are cut into words of [`WORD_SIZE`]
//! consecutive sites. Every haplotype's alleles in a word pack into one
//! `u64` seed; haplotypes sharing a seed collide in the word's hash table.
//!
//! ## Matching
//! Walking the words left to right, each colliding pair opens or extends a
//! match. A match tolerates up to `gap` consecutive words without a
//! collision; after that it is closed and kept as a candidate when its
//! genetic length reaches `min_m` centimorgans. Words whose number of
//! distinct seeds per haplotype falls below `skip` are too uninformative to
//! hash and are passed over without affecting open matches. Buckets holding
//! more than `max_seeds` haplotypes are split by the next word's seeds.

use std::ops::Range;

use rayon::prelude::*;
use rustc_hash::FxHashMap;
use tracing::{debug, info, instrument};

use crate::config::WORD_SIZE;
use crate::data::haplotype::HapIdx;
use crate::data::panel::Data;

/// Per-haplotype word seeds over the informative sites
#[derive(Clone, Debug)]
pub struct SeedIndex {
    /// Panel site of each informative site
    informative: Vec<usize>,
    n_words: usize,
    /// Flattened `[hap][word]`
    seeds: Vec<u64>,
    n_haps: usize,
}

impl SeedIndex {
    /// Hash every haplotype of the panel, in parallel over haplotypes
    #[instrument(skip(data), fields(haps = data.n_haps()))]
    pub fn build(data: &Data, min_maf: f32) -> Self {
        let informative: Vec<usize> = (0..data.sites())
            .filter(|&site| data.minor_allele_frequency(site) >= min_maf)
            .collect();
        let n_words = informative.len().div_ceil(WORD_SIZE);
        let n_haps = data.n_haps();

        let seeds: Vec<u64> = (0..n_haps)
            .into_par_iter()
            .flat_map_iter(|h| {
                let hap = data.hap_by_index(HapIdx::from(h));
                let informative = &informative;
                informative.chunks(WORD_SIZE).map(move |word| {
                    word.iter()
                        .enumerate()
                        .fold(0u64, |acc, (bit, &site)| acc | (u64::from(hap[site]) << bit))
                })
            })
            .collect();

        debug!(informative = informative.len(), words = n_words, "Built seed index");
        Self {
            informative,
            n_words,
            seeds,
            n_haps,
        }
    }

    pub fn n_words(&self) -> usize {
        self.n_words
    }

    pub fn n_haps(&self) -> usize {
        self.n_haps
    }

    pub fn n_informative(&self) -> usize {
        self.informative.len()
    }

    #[inline]
    pub fn seed(&self, hap: usize, word: usize) -> u64 {
        self.seeds[hap * self.n_words + word]
    }

    /// Half-open panel site range covered by a word
    pub fn word_sites(&self, word: usize) -> Range<usize> {
        let first = word * WORD_SIZE;
        let last = ((word + 1) * WORD_SIZE).min(self.informative.len()) - 1;
        self.informative[first]..self.informative[last] + 1
    }

    /// Group haplotypes by their seed at `word`
    fn buckets(&self, word: usize, members: impl Iterator<Item = u32>) -> Vec<Vec<u32>> {
        let mut table: FxHashMap<u64, Vec<u32>> = FxHashMap::default();
        for h in members {
            table.entry(self.seed(h as usize, word)).or_default().push(h);
        }
        let mut buckets: Vec<Vec<u32>> = table.into_values().collect();
        buckets.sort_unstable_by_key(|b| b[0]);
        buckets
    }
}

/// GERMLINE tuning options
#[derive(Clone, Copy, Debug)]
pub struct GermlineOptions {
    /// Minimum distinct seeds per haplotype for a word to be hashed
    pub skip: f32,
    /// Consecutive words without collision tolerated inside a match
    pub gap: usize,
    /// Split buckets larger than this with the next word (0 = never)
    pub max_seeds: usize,
    /// Minimum match length (cM)
    pub min_m: f32,
}

/// A closed match: two haplotypes sharing seeds over a run of words
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct CandidateSegment {
    pub hap_a: HapIdx,
    pub hap_b: HapIdx,
    pub start_word: usize,
    /// Inclusive
    pub end_word: usize,
}

#[derive(Clone, Copy, Debug)]
struct ActiveMatch {
    start_word: usize,
    last_word: usize,
}

/// Run the word-by-word matcher over the whole index
#[instrument(skip_all, fields(words = index.n_words()))]
pub fn find_candidates(
    data: &Data,
    index: &SeedIndex,
    opts: &GermlineOptions,
) -> Vec<CandidateSegment> {
    let gen_cm = |site: usize| data.genetic_positions()[site] * 100.0;
    let length_cm = |m: &ActiveMatch| {
        gen_cm(index.word_sites(m.last_word).end - 1) - gen_cm(index.word_sites(m.start_word).start)
    };

    let mut active: FxHashMap<(u32, u32), ActiveMatch> = FxHashMap::default();
    let mut out = Vec::new();
    let mut skipped_words = 0usize;

    let close = |key: (u32, u32), m: ActiveMatch, out: &mut Vec<CandidateSegment>| {
        if length_cm(&m) >= f64::from(opts.min_m) {
            out.push(CandidateSegment {
                hap_a: HapIdx::new(key.0),
                hap_b: HapIdx::new(key.1),
                start_word: m.start_word,
                end_word: m.last_word,
            });
        }
    };

    for word in 0..index.n_words() {
        let buckets = index.buckets(word, 0..index.n_haps() as u32);
        let ratio = buckets.len() as f32 / index.n_haps() as f32;
        if ratio < opts.skip {
            skipped_words += 1;
            // carry open matches over this word
            for m in active.values_mut() {
                if m.last_word + 1 == word {
                    m.last_word = word;
                }
            }
            continue;
        }

        let mut pairs = Vec::new();
        for bucket in &buckets {
            collide(index, bucket, word, opts.max_seeds, &mut pairs);
        }
        for (a, b) in pairs {
            active
                .entry((a, b))
                .and_modify(|m| m.last_word = word)
                .or_insert(ActiveMatch {
                    start_word: word,
                    last_word: word,
                });
        }

        let expired: Vec<(u32, u32)> = active
            .iter()
            .filter(|(_, m)| word - m.last_word > opts.gap)
            .map(|(k, _)| *k)
            .collect();
        for key in expired {
            if let Some(m) = active.remove(&key) {
                close(key, m, &mut out);
            }
        }
    }
    for (key, m) in active.drain() {
        close(key, m, &mut out);
    }

    out.sort_unstable();
    info!(
        candidates = out.len(),
        skipped_words,
        "GERMLINE candidate search finished"
    );
    out
}

/// Emit the pairs of one bucket, splitting oversized buckets by the next word
fn collide(
    index: &SeedIndex,
    bucket: &[u32],
    word: usize,
    max_seeds: usize,
    pairs: &mut Vec<(u32, u32)>,
) {
    if max_seeds > 0 && bucket.len() > max_seeds {
        let mut next = word + 1;
        let mut sub: Vec<Vec<u32>> = vec![bucket.to_vec()];
        while next < index.n_words() && sub.iter().any(|b| b.len() > max_seeds) {
            sub = sub
                .into_iter()
                .flat_map(|b| {
                    if b.len() > max_seeds {
                        index.buckets(next, b.into_iter())
                    } else {
                        vec![b]
                    }
                })
                .collect();
            next += 1;
        }
        for b in sub {
            push_pairs(&b, pairs);
        }
        return;
    }
    push_pairs(bucket, pairs);
}

fn push_pairs(bucket: &[u32], pairs: &mut Vec<(u32, u32)>) {
    for (i, &a) in bucket.iter().enumerate() {
        for &b in &bucket[i + 1..] {
            pairs.push((a.min(b), a.max(b)));
        }
    }
}
