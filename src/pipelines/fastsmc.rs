//! # FastSMC Pipeline
//!
//! IBD detection and dating on top of the pairwise decoder:
//! 1. Candidate generation: GERMLINE matches over hashed words, or every
//!    haplotype pair of the shard over the whole chromosome
//! 2. Shard restriction with the same partition as `Hmm::decode_all`
//! 3. Widening by one word per side and merging of overlapping candidates
//! 4. Decoding each candidate range on rayon workers
//! 5. Segment calling and age estimation
//! 6. Writing segments in text or binary form

use std::sync::Arc;

use rayon::prelude::*;
use tracing::{info, info_span, instrument, warn};

use crate::config::DecodingParams;
use crate::data::haplotype::HapSlot;
use crate::data::panel::{Data, PanelOptions};
use crate::error::{AsmcError, Result};
use crate::io::ibd::{ibd_path, IbdHeader, IbdWriter};
use crate::model::hmm::Hmm;
use crate::model::ibd::{IbdCaller, IbdSegment};
use crate::model::observation::PairObservation;
use crate::model::quantities::DecodingQuantities;
use crate::model::seed_hash::{find_candidates, GermlineOptions, SeedIndex};
use crate::model::sharding::PairShard;
use crate::utils::telemetry::{Stage, TelemetryBlackboard};

/// Counters and segments of one FastSMC run
#[derive(Clone, Debug, Default)]
pub struct FastSmcReport {
    /// Candidate ranges decoded after merging
    pub candidates: usize,
    pub decoded: u64,
    /// Candidates with a degenerate posterior
    pub skipped: u64,
    pub segments: Vec<IbdSegment>,
}

/// IBD detection over one panel
pub struct FastSmc<'a> {
    params: &'a DecodingParams,
    data: &'a Data,
    hmm: &'a Hmm,
    telemetry: Option<Arc<TelemetryBlackboard>>,
}

#[derive(Default)]
struct ChunkOutcome {
    decoded: u64,
    skipped: u64,
    segments: Vec<IbdSegment>,
}

impl<'a> FastSmc<'a> {
    pub fn new(params: &'a DecodingParams, data: &'a Data, hmm: &'a Hmm) -> Self {
        Self {
            params,
            data,
            hmm,
            telemetry: None,
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<TelemetryBlackboard>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Find, decode and call every candidate of the shard
    pub fn run(&self) -> Result<FastSmcReport> {
        let shard = PairShard::new(self.params.jobs, self.params.job_ind)?;

        self.stage(Stage::CandidateSearch);
        let candidates = if self.params.germline {
            self.germline_candidates(shard)
        } else {
            self.all_pair_candidates(shard)
        };
        if let Some(t) = &self.telemetry {
            t.add_candidates(candidates.len() as u64);
            t.set_total_pairs(candidates.len() as u64);
        }

        self.stage(Stage::IbdDecoding);
        let caller = self.caller();
        let outcomes = {
            let _span = info_span!("decode_candidates", candidates = candidates.len()).entered();
            candidates
                .par_chunks(self.params.batch_size.max(1))
                .map(|chunk| self.decode_chunk(chunk, &caller))
                .collect::<Result<Vec<ChunkOutcome>>>()?
        };

        let mut report = FastSmcReport {
            candidates: candidates.len(),
            ..FastSmcReport::default()
        };
        for outcome in outcomes {
            report.decoded += outcome.decoded;
            report.skipped += outcome.skipped;
            report.segments.extend(outcome.segments);
        }
        if let Some(t) = &self.telemetry {
            t.add_segments(report.segments.len() as u64);
        }
        info!(
            candidates = report.candidates,
            decoded = report.decoded,
            skipped = report.skipped,
            segments = report.segments.len(),
            "FastSMC finished"
        );
        Ok(report)
    }

    fn stage(&self, stage: Stage) {
        if let Some(t) = &self.telemetry {
            t.set_stage(stage);
        }
    }

    fn caller(&self) -> IbdCaller {
        IbdCaller {
            ibd_states: self.hmm.state_threshold(self.params.time as f32),
            probability_threshold: self.params.probability_threshold(),
            min_m: self.params.min_m,
            conditional_ages: !self.params.no_conditional_age_estimates,
            posterior_mean_age: self.params.do_per_pair_posterior_mean,
            map_age: self.params.do_per_pair_map,
        }
    }

    /// GERMLINE matches of the shard, widened by one word and merged per pair
    #[instrument(skip_all)]
    fn germline_candidates(&self, shard: PairShard) -> Vec<PairObservation> {
        let index = SeedIndex::build(self.data, self.params.min_maf);
        if index.n_words() == 0 {
            warn!("No informative sites to hash");
            return Vec::new();
        }
        let opts = GermlineOptions {
            skip: self.params.skip,
            gap: self.params.gap,
            max_seeds: self.params.max_seeds,
            min_m: self.params.min_m,
        };
        let samples = self.data.samples();
        let n = self.data.n_individuals();
        let last_word = index.n_words() - 1;
        let folded = self.data.fold_data();

        let mut widened: Vec<PairObservation> = find_candidates(self.data, &index, &opts)
            .into_iter()
            .filter_map(|c| {
                let (ind_a, hap_a) = samples.hap_owner(c.hap_a);
                let (ind_b, hap_b) = samples.hap_owner(c.hap_b);
                if !shard.contains(n, ind_a, ind_b) {
                    return None;
                }
                let from = index.word_sites(c.start_word.saturating_sub(1)).start;
                let to = index.word_sites((c.end_word + 1).min(last_word)).end;
                Some(PairObservation {
                    hap_a,
                    ind_a,
                    hap_b,
                    ind_b,
                    from,
                    len: to - from,
                    folded,
                })
            })
            .collect();

        let found = widened.len();
        let merged = merge_overlapping(&mut widened);
        info!(found, merged = merged.len(), "GERMLINE candidates in shard");
        merged
    }

    /// Every haplotype pair of the shard over the whole chromosome
    fn all_pair_candidates(&self, shard: PairShard) -> Vec<PairObservation> {
        let n = self.data.n_individuals();
        let mut out = Vec::new();
        for (a, b) in shard.pairs(n) {
            if self.params.within_only && a != b {
                continue;
            }
            let ploidy_a = self.data.individuals()[a.as_usize()].ploidy();
            let ploidy_b = self.data.individuals()[b.as_usize()].ploidy();
            if a == b {
                if ploidy_a == 2 {
                    out.push(self.hmm.make_pair_obs(HapSlot::First, a, HapSlot::Second, b));
                }
                continue;
            }
            for &slot_a in &HapSlot::BOTH[..ploidy_a] {
                for &slot_b in &HapSlot::BOTH[..ploidy_b] {
                    out.push(self.hmm.make_pair_obs(slot_a, a, slot_b, b));
                }
            }
        }
        info!(candidates = out.len(), "All haplotype pairs of the shard are candidates");
        out
    }

    fn decode_chunk(&self, chunk: &[PairObservation], caller: &IbdCaller) -> Result<ChunkOutcome> {
        let mut outcome = ChunkOutcome::default();
        let times = self.hmm.expected_times();
        for obs in chunk {
            let range = obs.range();
            match self.hmm.decode_range(obs, range.start, range.end) {
                Ok(posterior) => {
                    outcome.decoded += 1;
                    outcome
                        .segments
                        .extend(caller.call(self.data, obs, &posterior, times));
                }
                Err(e) if e.is_recoverable() => {
                    warn!(pair = %obs, error = %e, "Skipping candidate");
                    outcome.skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }
        if let Some(t) = &self.telemetry {
            t.add_decoded(outcome.decoded);
            t.add_skipped(outcome.skipped);
        }
        Ok(outcome)
    }
}

/// Sort candidates by pair then start, and merge ranges of one pair that overlap
fn merge_overlapping(candidates: &mut [PairObservation]) -> Vec<PairObservation> {
    let key = |o: &PairObservation| (o.ind_a, o.hap_a, o.ind_b, o.hap_b);
    candidates.sort_by_key(|o| (key(o), o.from, o.len));

    let mut merged: Vec<PairObservation> = Vec::with_capacity(candidates.len());
    for &obs in candidates.iter() {
        match merged.last_mut() {
            Some(last) if key(last) == key(&obs) && obs.from <= last.range().end => {
                let end = last.range().end.max(obs.range().end);
                last.len = end - last.from;
            }
            _ => merged.push(obs),
        }
    }
    merged
}

/// Load inputs, run FastSMC and write the segments of one job
pub struct FastSmcPipeline {
    params: DecodingParams,
    telemetry: Option<Arc<TelemetryBlackboard>>,
}

impl FastSmcPipeline {
    /// `params` must have been processed
    pub fn new(params: DecodingParams) -> Self {
        Self {
            params,
            telemetry: None,
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<TelemetryBlackboard>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn run(&mut self) -> Result<FastSmcReport> {
        if !self.params.fastsmc {
            return Err(AsmcError::config("FastSMC pipeline needs FastSMC options"));
        }
        let stage = |s: Stage| {
            if let Some(t) = &self.telemetry {
                t.set_stage(s);
            }
        };

        stage(Stage::LoadingQuantities);
        let dq = Arc::new(DecodingQuantities::load(&self.params.quantities_path())?);

        stage(Stage::LoadingData);
        let root = self.params.in_file_root.clone();
        let sites = Data::count_hap_lines(&root)?;
        let options = PanelOptions::from_params(&self.params, dq.csfs_samples());
        let shard = PairShard::new(self.params.jobs, self.params.job_ind)?;
        let data = Arc::new(Data::load_sharded(&root, sites, &options, shard)?);

        let mut hmm = Hmm::new(Arc::clone(&data), dq, &self.params)?;
        if let Some(t) = &self.telemetry {
            hmm = hmm.with_telemetry(Arc::clone(t));
        }

        let mut fastsmc = FastSmc::new(&self.params, &data, &hmm);
        if let Some(t) = &self.telemetry {
            fastsmc = fastsmc.with_telemetry(Arc::clone(t));
        }
        let report = fastsmc.run()?;

        stage(Stage::WritingOutput);
        let path = ibd_path(&self.params);
        let _span = info_span!("write_ibd", path = %path.display()).entered();
        let mut writer = IbdWriter::create(
            &path,
            self.params.bin_out,
            IbdHeader::new(&self.params, &data),
        )?;
        for seg in &report.segments {
            writer.write(seg)?;
        }
        let written = writer.written();
        writer.finish()?;
        info!(segments = written, path = %path.display(), "Wrote IBD segments");

        stage(Stage::Complete);
        Ok(report)
    }
}
