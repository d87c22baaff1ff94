//! # Pairwise Decoder
//!
//! ## Role
//! `Hmm` turns pairs of haplotypes into coalescence-time posteriors. It owns
//! the batch buffer, one lane workspace and the aggregated return values; the
//! panel and the decoding quantities are shared read-only behind `Arc`s.
//!
//! ## Two ways in
//! - Synchronous: [`Hmm::decode`], [`Hmm::decode_range`] and
//!   [`Hmm::decode_summarize`] take `&self`, allocate their own workspace and
//!   leave the buffer and the sums untouched. FastSMC calls them from rayon
//!   workers.
//! - Buffered: [`Hmm::decode_pair`], [`Hmm::decode_pairs`] and
//!   [`Hmm::decode_all`] push observations into the buffer; a full buffer is
//!   flushed through the kernel in the same call, and
//!   [`Hmm::finish_decoding`] flushes the remainder. Flushed posteriors are
//!   added into [`DecodingReturnValues`] in buffer order.
//!
//! Consecutive observations sharing a site range are decoded eight at a time.
//! Lanes never interact, so the batch capacity does not change any result.

use std::sync::{Arc, Mutex};

use ndarray::Array2;
use tracing::{debug, info, info_span, warn};

use crate::config::DecodingParams;
use crate::data::haplotype::{HapSlot, SampleIdx};
use crate::data::panel::{Data, GenotypeCategory};
use crate::error::{AsmcError, Result};
use crate::io::per_pair::PerPairWriter;
use crate::model::emission::{SiteEmissions, SiteTransitions};
use crate::model::forward_backward::{forward_backward, KernelTables, LanePair};
use crate::model::observation::{BatchBuffer, BufferState, PairObservation};
use crate::model::quantities::DecodingQuantities;
use crate::model::sharding::PairShard;
use crate::utils::telemetry::TelemetryBlackboard;
use crate::utils::workspace::{LaneWorkspace, LANES};

/// Aggregated results of buffered decoding
#[derive(Clone, Debug)]
pub struct DecodingReturnValues {
    /// Posterior summed over decoded pairs, `[site, state]`. Always shaped
    /// `(sites, states)`; stays zero unless posterior sums were requested.
    pub sum_over_pairs: Array2<f64>,
    /// Sums split by the pair's genotype at each site (hom major, het, hom minor)
    pub sum_over_pairs_00: Option<Array2<f64>>,
    pub sum_over_pairs_01: Option<Array2<f64>>,
    pub sum_over_pairs_11: Option<Array2<f64>>,
    pub sites: usize,
    pub states: usize,
    pub site_was_flipped: Vec<bool>,
    pub pairs_decoded: u64,
    pub pairs_skipped: u64,
}

impl DecodingReturnValues {
    pub fn new(sites: usize, states: usize, major_minor: bool, flipped: &[bool]) -> Self {
        let table = || Array2::zeros((sites, states));
        Self {
            sum_over_pairs: table(),
            sum_over_pairs_00: major_minor.then(table),
            sum_over_pairs_01: major_minor.then(table),
            sum_over_pairs_11: major_minor.then(table),
            sites,
            states,
            site_was_flipped: flipped.to_vec(),
            pairs_decoded: 0,
            pairs_skipped: 0,
        }
    }

    /// Add another shard's sums and counters into this one
    pub fn merge(&mut self, other: &DecodingReturnValues) -> Result<()> {
        if (self.sites, self.states) != (other.sites, other.states) {
            return Err(AsmcError::invalid_data(format!(
                "cannot merge sums of shape {}x{} into {}x{}",
                other.sites, other.states, self.sites, self.states
            )));
        }
        self.sum_over_pairs += &other.sum_over_pairs;
        for (mine, theirs) in [
            (&mut self.sum_over_pairs_00, &other.sum_over_pairs_00),
            (&mut self.sum_over_pairs_01, &other.sum_over_pairs_01),
            (&mut self.sum_over_pairs_11, &other.sum_over_pairs_11),
        ] {
            if let (Some(m), Some(t)) = (mine.as_mut(), theirs.as_ref()) {
                *m += t;
            }
        }
        self.pairs_decoded += other.pairs_decoded;
        self.pairs_skipped += other.pairs_skipped;
        Ok(())
    }
}

/// Per-site summaries of one pair's posterior
#[derive(Clone, Debug, PartialEq)]
pub struct PairSummary {
    /// Expected time of the most likely state
    pub map: Vec<f32>,
    /// Posterior mean of the expected time
    pub posterior_mean: Vec<f32>,
}

/// Pairwise coalescence-time decoder
pub struct Hmm {
    data: Arc<Data>,
    dq: Arc<DecodingQuantities>,
    emissions: SiteEmissions,
    transitions: SiteTransitions,
    scaling_skip: usize,
    within_only: bool,
    do_posterior_sums: bool,
    do_major_minor: bool,

    buffer: BatchBuffer,
    workspace: LaneWorkspace,
    return_values: DecodingReturnValues,
    column: Vec<f32>,

    /// Behind a mutex so `&Hmm` can be shared with decoding workers
    per_pair: Option<Mutex<PerPairWriter>>,
    telemetry: Option<Arc<TelemetryBlackboard>>,
}

impl Hmm {
    /// Prepare a decoder. `params` must have been processed.
    pub fn new(
        data: Arc<Data>,
        dq: Arc<DecodingQuantities>,
        params: &DecodingParams,
    ) -> Result<Self> {
        let _span = info_span!("hmm_setup").entered();

        if data.using_csfs() && data.csfs_samples() != dq.csfs_samples() {
            return Err(AsmcError::config(format!(
                "panel was prepared for {} CSFS samples, decoding quantities have {}",
                data.csfs_samples(),
                dq.csfs_samples()
            )));
        }
        if params.scaling_skip == 0 {
            return Err(AsmcError::config("--scaling-skip must be at least 1"));
        }

        let emissions = SiteEmissions::build(
            &data,
            &dq,
            params.decoding_mode,
            params.skip_csfs_distance,
        )?;
        let transitions = SiteTransitions::build(&data, &dq)?;

        let states = dq.states();
        let sites = data.sites();
        let return_values = DecodingReturnValues::new(
            sites,
            states,
            params.do_major_minor_posterior_sums,
            data.site_was_flipped(),
        );

        info!(
            states,
            sites,
            distances = transitions.distinct(),
            mode = %params.decoding_mode,
            batch = params.batch_capacity(),
            "Decoder ready"
        );

        Ok(Self {
            emissions,
            transitions,
            scaling_skip: params.scaling_skip,
            within_only: params.within_only,
            do_posterior_sums: params.do_posterior_sums,
            do_major_minor: params.do_major_minor_posterior_sums,
            buffer: BatchBuffer::new(params.batch_capacity()),
            workspace: LaneWorkspace::new(states, sites),
            return_values,
            column: vec![0.0; states],
            per_pair: None,
            telemetry: None,
            data,
            dq,
        })
    }

    /// Write per-pair MAP / posterior means for every flushed pair
    pub fn with_per_pair_writer(mut self, writer: PerPairWriter) -> Self {
        self.per_pair = Some(Mutex::new(writer));
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<TelemetryBlackboard>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Detach the per-pair writer so the caller can close it
    pub fn take_per_pair_writer(&mut self) -> Option<PerPairWriter> {
        self.per_pair
            .take()
            .map(|m| m.into_inner().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn data(&self) -> &Arc<Data> {
        &self.data
    }

    pub fn quantities(&self) -> &Arc<DecodingQuantities> {
        &self.dq
    }

    pub fn states(&self) -> usize {
        self.dq.states()
    }

    pub fn expected_times(&self) -> &[f32] {
        self.dq.expected_times()
    }

    /// Number of states whose lower time boundary is below `time`
    pub fn state_threshold(&self, time: f32) -> usize {
        self.dq.state_threshold(time)
    }

    pub fn batch_buffer(&self) -> &BatchBuffer {
        &self.buffer
    }

    pub fn decoding_return_values(&self) -> &DecodingReturnValues {
        &self.return_values
    }

    /// Observation of two haplotypes over the whole panel
    pub fn make_pair_obs(
        &self,
        hap_a: HapSlot,
        ind_a: SampleIdx,
        hap_b: HapSlot,
        ind_b: SampleIdx,
    ) -> PairObservation {
        PairObservation {
            hap_a,
            ind_a,
            hap_b,
            ind_b,
            from: 0,
            len: self.data.sites(),
            folded: self.data.fold_data(),
        }
    }

    fn tables(&self) -> KernelTables<'_> {
        KernelTables {
            initial: self.dq.initial_state_prob(),
            emissions: &self.emissions,
            transitions: &self.transitions,
            scaling_skip: self.scaling_skip,
        }
    }

    fn lane_pair(&self, obs: &PairObservation) -> Result<LanePair<'_>> {
        let range = obs.range();
        if obs.len == 0 || range.end > self.data.sites() {
            return Err(AsmcError::invalid_data(format!(
                "site range {}..{} of {} is outside the panel ({} sites)",
                range.start,
                range.end,
                obs,
                self.data.sites()
            )));
        }
        Ok((
            self.data.haplotype(obs.ind_a, obs.hap_a)?,
            self.data.haplotype(obs.ind_b, obs.hap_b)?,
        ))
    }

    /// Decode up to eight observations sharing one site range into `ws`.
    ///
    /// Returns which lanes produced a valid posterior.
    pub fn decode_lanes(
        &self,
        chunk: &[PairObservation],
        ws: &mut LaneWorkspace,
    ) -> Result<[bool; LANES]> {
        let Some(first) = chunk.first() else {
            return Ok([false; LANES]);
        };
        if chunk.len() > LANES || chunk.iter().any(|o| o.range() != first.range()) {
            return Err(AsmcError::invalid_data(format!(
                "a lane chunk holds at most {} observations over one site range",
                LANES
            )));
        }
        let pairs = chunk
            .iter()
            .map(|o| self.lane_pair(o))
            .collect::<Result<Vec<_>>>()?;
        let range = first.range();
        Ok(forward_backward(
            &self.tables(),
            &pairs,
            range.start,
            range.end,
            ws,
        ))
    }

    /// Posterior `[state][site]` of one pair over its range
    pub fn decode(&self, obs: &PairObservation) -> Result<Vec<Vec<f32>>> {
        let mut ws = LaneWorkspace::new(self.states(), obs.len);
        let valid = self.decode_lanes(std::slice::from_ref(obs), &mut ws)?;
        if !valid[0] {
            return Err(AsmcError::degenerate(
                obs.to_string(),
                "posterior normaliser is zero or not finite",
            ));
        }
        let mut out = vec![vec![0.0f32; obs.len]; self.states()];
        let mut column = vec![0.0f32; self.states()];
        for offset in 0..obs.len {
            ws.posterior_column(offset, 0, &mut column);
            for (k, &p) in column.iter().enumerate() {
                out[k][offset] = p;
            }
        }
        Ok(out)
    }

    /// Posterior of one pair restricted to sites `[from, to)`
    pub fn decode_range(
        &self,
        obs: &PairObservation,
        from: usize,
        to: usize,
    ) -> Result<Vec<Vec<f32>>> {
        if from >= to || to > self.data.sites() {
            return Err(AsmcError::invalid_data(format!(
                "invalid site range {}..{} ({} sites)",
                from,
                to,
                self.data.sites()
            )));
        }
        self.decode(&obs.restricted(from, to))
    }

    /// Per-site MAP and posterior-mean times of one pair
    pub fn decode_summarize(&self, obs: &PairObservation) -> Result<PairSummary> {
        let posterior = self.decode(obs)?;
        let times = self.dq.expected_times();
        let mut map = Vec::with_capacity(obs.len);
        let mut posterior_mean = Vec::with_capacity(obs.len);
        for site in 0..obs.len {
            let mut best = 0;
            let mut mean = 0.0f32;
            for k in 0..posterior.len() {
                let p = posterior[k][site];
                if p > posterior[best][site] {
                    best = k;
                }
                mean += p * times[k];
            }
            map.push(times[best]);
            posterior_mean.push(mean);
        }
        Ok(PairSummary {
            map,
            posterior_mean,
        })
    }

    fn push(&mut self, obs: PairObservation) -> Result<()> {
        if self.buffer.push(obs)? == BufferState::Full {
            self.flush()?;
        }
        Ok(())
    }

    /// Queue the haplotype pairs of individuals `i` and `j`.
    ///
    /// Two individuals contribute every cross pair of their haplotypes; an
    /// individual with itself contributes its two haplotypes against each
    /// other (nothing when haploid).
    pub fn decode_pair(&mut self, i: usize, j: usize) -> Result<()> {
        let n = self.data.n_individuals();
        if i >= n || j >= n {
            return Err(AsmcError::invalid_data(format!(
                "individual pair ({}, {}) out of range ({} individuals)",
                i, j, n
            )));
        }
        let (a, b) = (SampleIdx::from(i), SampleIdx::from(j));
        let ploidy_a = self.data.individuals()[i].ploidy();
        let ploidy_b = self.data.individuals()[j].ploidy();

        if i == j {
            if ploidy_a == 2 {
                self.push(self.make_pair_obs(HapSlot::First, a, HapSlot::Second, b))?;
            }
            return Ok(());
        }
        for &slot_a in &HapSlot::BOTH[..ploidy_a] {
            for &slot_b in &HapSlot::BOTH[..ploidy_b] {
                self.push(self.make_pair_obs(slot_a, a, slot_b, b))?;
            }
        }
        Ok(())
    }

    /// Elementwise [`Hmm::decode_pair`]
    pub fn decode_pairs(&mut self, a: &[usize], b: &[usize]) -> Result<()> {
        if a.len() != b.len() {
            return Err(AsmcError::invalid_data(format!(
                "individual lists differ in length ({} vs {})",
                a.len(),
                b.len()
            )));
        }
        for (&i, &j) in a.iter().zip(b) {
            self.decode_pair(i, j)?;
        }
        Ok(())
    }

    /// Decode every individual pair of shard `job_index` (1-based) of `jobs`
    pub fn decode_all(&mut self, jobs: usize, job_index: usize) -> Result<()> {
        let shard = PairShard::new(jobs, job_index)?;
        let n = self.data.n_individuals();
        let _span = info_span!("decode_all", jobs, job_index).entered();

        let within_only = self.within_only;
        let wanted = |(a, b): &(SampleIdx, SampleIdx)| !within_only || a == b;
        if let Some(t) = &self.telemetry {
            let total: u64 = shard
                .pairs(n)
                .filter(wanted)
                .map(|(a, b)| self.haplotype_pairs(a, b))
                .sum();
            t.set_total_pairs(total);
        }
        info!(individual_pairs = shard.pairs(n).len(), within_only, "Decoding shard");

        for (a, b) in shard.pairs(n).filter(wanted) {
            self.decode_pair(a.as_usize(), b.as_usize())?;
        }
        self.finish_decoding()
    }

    /// Haplotype pairs queued by `decode_pair(a, b)`
    fn haplotype_pairs(&self, a: SampleIdx, b: SampleIdx) -> u64 {
        let ploidy = |s: SampleIdx| self.data.individuals()[s.as_usize()].ploidy() as u64;
        if a == b {
            ploidy(a) / 2
        } else {
            ploidy(a) * ploidy(b)
        }
    }

    /// Flush whatever the buffer holds. Safe to call repeatedly.
    pub fn finish_decoding(&mut self) -> Result<()> {
        self.flush()?;
        if let Some(writer) = self.per_pair.as_mut() {
            writer.get_mut().unwrap_or_else(|e| e.into_inner()).flush()?;
        }
        Ok(())
    }

    /// Decode and aggregate the whole buffer. The buffer is emptied even when
    /// a chunk fails; if later chunks were still queued the error is wrapped
    /// in `BatchAborted` with the number of observations never decoded.
    fn flush(&mut self) -> Result<()> {
        let batch = self.buffer.drain();
        if batch.is_empty() {
            return Ok(());
        }
        debug!(observations = batch.len(), "Flushing batch");

        let mut start = 0;
        while start < batch.len() {
            let range = batch[start].range();
            let mut end = start + 1;
            while end < batch.len() && end - start < LANES && batch[end].range() == range {
                end += 1;
            }
            if let Err(e) = self.flush_chunk(&batch[start..end]) {
                let dropped = batch.len() - end;
                if dropped == 0 {
                    return Err(e);
                }
                warn!(dropped, "Batch flush failed, remaining observations dropped");
                return Err(AsmcError::BatchAborted {
                    dropped,
                    source: Box::new(e),
                });
            }
            start = end;
        }
        Ok(())
    }

    fn flush_chunk(&mut self, chunk: &[PairObservation]) -> Result<()> {
        let mut ws = std::mem::replace(&mut self.workspace, LaneWorkspace::new(0, 0));
        let valid = self.decode_lanes(chunk, &mut ws);
        let valid = match valid {
            Ok(v) => v,
            Err(e) => {
                self.workspace = ws;
                return Err(e);
            }
        };

        let mut decoded = 0u64;
        let mut skipped = 0u64;
        let mut result = Ok(());
        for (lane, obs) in chunk.iter().enumerate() {
            if !valid[lane] {
                warn!(pair = %obs, "Skipping pair with degenerate posterior");
                skipped += 1;
                continue;
            }
            if let Err(e) = self.accumulate(obs, lane, &ws) {
                result = Err(e);
                break;
            }
            decoded += 1;
        }
        self.workspace = ws;

        self.return_values.pairs_decoded += decoded;
        self.return_values.pairs_skipped += skipped;
        if let Some(t) = &self.telemetry {
            t.add_decoded(decoded);
            t.add_skipped(skipped);
        }
        result
    }

    fn accumulate(&mut self, obs: &PairObservation, lane: usize, ws: &LaneWorkspace) -> Result<()> {
        let Self {
            data,
            dq,
            return_values,
            column,
            per_pair,
            do_posterior_sums,
            do_major_minor,
            ..
        } = self;
        let a = data.haplotype(obs.ind_a, obs.hap_a)?;
        let b = data.haplotype(obs.ind_b, obs.hap_b)?;
        let times = dq.expected_times();

        let summarize = per_pair.is_some();
        let mut map: Vec<f32> = Vec::with_capacity(if summarize { obs.len } else { 0 });
        let mut mean: Vec<f32> = Vec::with_capacity(if summarize { obs.len } else { 0 });

        for (offset, site) in obs.range().enumerate() {
            ws.posterior_column(offset, lane, column);

            if *do_posterior_sums {
                let mut row = return_values.sum_over_pairs.row_mut(site);
                for (acc, &p) in row.iter_mut().zip(column.iter()) {
                    *acc += f64::from(p);
                }
            }
            if *do_major_minor {
                let table = match GenotypeCategory::from_alleles(a[site], b[site]) {
                    GenotypeCategory::HomMajor => &mut return_values.sum_over_pairs_00,
                    GenotypeCategory::Het => &mut return_values.sum_over_pairs_01,
                    GenotypeCategory::HomMinor => &mut return_values.sum_over_pairs_11,
                };
                if let Some(table) = table.as_mut() {
                    let mut row = table.row_mut(site);
                    for (acc, &p) in row.iter_mut().zip(column.iter()) {
                        *acc += f64::from(p);
                    }
                }
            }
            if summarize {
                let (best, _) = column
                    .iter()
                    .enumerate()
                    .fold((0, f32::MIN), |acc, (k, &p)| if p > acc.1 { (k, p) } else { acc });
                map.push(times[best]);
                mean.push(column.iter().zip(times).map(|(p, t)| p * t).sum());
            }
        }

        if let Some(writer) = per_pair.as_mut() {
            writer
                .get_mut()
                .unwrap_or_else(|e| e.into_inner())
                .write_pair(data.samples(), obs, &map, &mean)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::synthetic::{self, SyntheticModel};

    fn decoder(batch_size: usize, no_batches: bool) -> Hmm {
        let dq = SyntheticModel::default().quantities().unwrap();
        let data = synthetic::panel(5, 80, 21, None, dq.csfs_samples()).unwrap();
        let mut params = DecodingParams::new("synthetic");
        params.batch_size = batch_size;
        params.no_batches = no_batches;
        params.do_posterior_sums = true;
        params.do_major_minor_posterior_sums = true;
        params.process_options().unwrap();
        Hmm::new(Arc::new(data), Arc::new(dq), &params).unwrap()
    }

    #[test]
    fn test_decode_pair_buffer_counts() {
        let mut hmm = decoder(64, false);
        hmm.decode_pair(0, 1).unwrap();
        assert_eq!(hmm.batch_buffer().len(), 4);
        hmm.decode_pair(2, 2).unwrap();
        assert_eq!(hmm.batch_buffer().len(), 5);
        assert_eq!(hmm.decoding_return_values().pairs_decoded, 0);

        hmm.finish_decoding().unwrap();
        assert!(hmm.batch_buffer().is_empty());
        assert_eq!(hmm.decoding_return_values().pairs_decoded, 5);

        // idempotent
        hmm.finish_decoding().unwrap();
        assert_eq!(hmm.decoding_return_values().pairs_decoded, 5);
    }

    #[test]
    fn test_full_buffer_flushes_in_call() {
        let mut hmm = decoder(8, false);
        hmm.decode_pair(0, 1).unwrap();
        assert_eq!(hmm.batch_buffer().len(), 4);
        hmm.decode_pair(0, 2).unwrap();
        assert_eq!(hmm.batch_buffer().len(), 0);
        assert_eq!(hmm.decoding_return_values().pairs_decoded, 8);
    }

    #[test]
    fn test_decode_pairs_length_mismatch() {
        let mut hmm = decoder(64, false);
        assert!(matches!(
            hmm.decode_pairs(&[0, 1], &[2]),
            Err(AsmcError::InvalidData { .. })
        ));
        assert!(hmm.decode_pair(0, 99).is_err());
    }

    #[test]
    fn test_decode_columns_sum_to_one() {
        let hmm = decoder(64, false);
        let obs = hmm.make_pair_obs(HapSlot::First, SampleIdx::new(0), HapSlot::Second, SampleIdx::new(3));
        let posterior = hmm.decode(&obs).unwrap();
        assert_eq!(posterior.len(), hmm.states());
        assert_eq!(posterior[0].len(), 80);
        for site in 0..80 {
            let total: f32 = posterior.iter().map(|row| row[site]).sum();
            assert!((total - 1.0).abs() < 1e-4);
        }
        // no side effects
        assert_eq!(hmm.decoding_return_values().pairs_decoded, 0);
    }

    #[test]
    fn test_sums_match_single_pair_decoding() {
        let mut hmm = decoder(64, false);
        hmm.decode_pair(1, 3).unwrap();
        hmm.finish_decoding().unwrap();

        let mut expected = Array2::<f64>::zeros((80, hmm.states()));
        for &sa in &HapSlot::BOTH {
            for &sb in &HapSlot::BOTH {
                let obs = hmm.make_pair_obs(sa, SampleIdx::new(1), sb, SampleIdx::new(3));
                let posterior = hmm.decode(&obs).unwrap();
                for (k, row) in posterior.iter().enumerate() {
                    for (site, &p) in row.iter().enumerate() {
                        expected[[site, k]] += f64::from(p);
                    }
                }
            }
        }
        assert_eq!(hmm.decoding_return_values().sum_over_pairs, expected);

        // the genotype split partitions the total
        let rv = hmm.decoding_return_values();
        let split = rv.sum_over_pairs_00.as_ref().unwrap()
            + rv.sum_over_pairs_01.as_ref().unwrap()
            + rv.sum_over_pairs_11.as_ref().unwrap();
        for (x, y) in split.iter().zip(rv.sum_over_pairs.iter()) {
            assert!((x - y).abs() < 1e-9);
        }
    }

    #[test]
    fn test_batch_capacity_does_not_change_sums() {
        let mut results = Vec::new();
        for (size, no_batches) in [(8, false), (64, false), (64, true)] {
            let mut hmm = decoder(size, no_batches);
            hmm.decode_all(1, 1).unwrap();
            results.push(hmm.decoding_return_values().sum_over_pairs.clone());
        }
        assert_eq!(results[0], results[1]);
        assert_eq!(results[0], results[2]);
    }

    #[test]
    fn test_decode_summarize() {
        let hmm = decoder(64, false);
        let obs = hmm.make_pair_obs(HapSlot::First, SampleIdx::new(2), HapSlot::First, SampleIdx::new(4));
        let summary = hmm.decode_summarize(&obs).unwrap();
        assert_eq!(summary.map.len(), 80);
        let times = hmm.expected_times();
        for (&m, &mean) in summary.map.iter().zip(&summary.posterior_mean) {
            assert!(times.contains(&m));
            assert!(mean >= times[0] && mean <= times[times.len() - 1]);
        }
    }

    fn default_decoder(n_individuals: usize, n_sites: usize) -> Hmm {
        let dq = SyntheticModel::default().quantities().unwrap();
        let data = synthetic::panel(n_individuals, n_sites, 5, None, dq.csfs_samples()).unwrap();
        let mut params = DecodingParams::new("synthetic");
        params.process_options().unwrap();
        Hmm::new(Arc::new(data), Arc::new(dq), &params).unwrap()
    }

    #[test]
    fn test_sum_table_shape_with_default_params() {
        let mut hmm = default_decoder(4, 50);
        let shape = (50, hmm.states());
        assert_eq!(hmm.decoding_return_values().sum_over_pairs.dim(), shape);

        hmm.decode_pair(0, 1).unwrap();
        hmm.finish_decoding().unwrap();
        let rv = hmm.decoding_return_values();
        assert_eq!(rv.sum_over_pairs.dim(), shape);
        assert_eq!(rv.pairs_decoded, 4);
        // sums were not requested
        assert!(rv.sum_over_pairs.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_default_capacity_fills_and_flushes() {
        let mut hmm = default_decoder(20, 40);
        assert_eq!(hmm.batch_buffer().capacity(), 64);
        let mut max_len = 0;
        for i in 1..=16 {
            hmm.decode_pair(0, i).unwrap();
            max_len = max_len.max(hmm.batch_buffer().len());
            assert!(hmm.batch_buffer().len() <= 64);
        }
        assert_eq!(max_len, 60);
        assert_eq!(hmm.batch_buffer().len(), 0);
        assert_eq!(hmm.decoding_return_values().pairs_decoded, 64);
    }

    #[test]
    fn test_decode_pair_and_decode_pairs_agree() {
        let mut one_by_one = decoder(64, false);
        one_by_one.decode_pair(0, 4).unwrap();
        one_by_one.decode_pair(1, 1).unwrap();
        assert_eq!(one_by_one.batch_buffer().len(), 5);

        let mut together = decoder(64, false);
        together.decode_pairs(&[0, 1], &[4, 1]).unwrap();
        assert_eq!(together.batch_buffer().len(), 5);
        assert_eq!(
            one_by_one.batch_buffer().observations(),
            together.batch_buffer().observations()
        );

        one_by_one.finish_decoding().unwrap();
        together.finish_decoding().unwrap();
        assert_eq!(
            one_by_one.decoding_return_values().sum_over_pairs,
            together.decoding_return_values().sum_over_pairs
        );
    }

    fn degenerate_decoder() -> Hmm {
        let (data, dq) = synthetic::degenerate_fixture(40, 20).unwrap();
        let mut params = DecodingParams::new("synthetic");
        params.do_posterior_sums = true;
        params.process_options().unwrap();
        Hmm::new(Arc::new(data), Arc::new(dq), &params).unwrap()
    }

    #[test]
    fn test_degenerate_lane_skipped_in_mixed_batch() {
        let mut mixed = degenerate_decoder();
        // four valid cross pairs and the degenerate within pair share one chunk
        mixed.decode_pair(0, 1).unwrap();
        mixed.decode_pair(2, 2).unwrap();
        mixed.finish_decoding().unwrap();

        let mut clean = degenerate_decoder();
        clean.decode_pair(0, 1).unwrap();
        clean.finish_decoding().unwrap();

        let rv = mixed.decoding_return_values();
        assert_eq!(rv.pairs_decoded, 4);
        assert_eq!(rv.pairs_skipped, 1);
        assert_eq!(rv.sum_over_pairs, clean.decoding_return_values().sum_over_pairs);

        let odd = mixed.make_pair_obs(HapSlot::First, SampleIdx::new(2), HapSlot::Second, SampleIdx::new(2));
        assert!(matches!(
            mixed.decode(&odd),
            Err(AsmcError::NumericDegeneracy { .. })
        ));
    }

    struct FailingSink;

    impl std::io::Write for FailingSink {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::other("disk full"))
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_failed_flush_reports_dropped_observations() {
        let mut hmm = decoder(64, false)
            .with_per_pair_writer(PerPairWriter::from_writers(Some(Box::new(FailingSink)), None));
        for j in 1..=3 {
            hmm.decode_pair(0, j).unwrap();
        }
        assert_eq!(hmm.batch_buffer().len(), 12);

        match hmm.finish_decoding() {
            Err(AsmcError::BatchAborted { dropped, source }) => {
                assert_eq!(dropped, 4);
                assert!(matches!(*source, AsmcError::Io(_)));
            }
            other => panic!("expected an aborted batch, got {:?}", other),
        }
        assert!(hmm.batch_buffer().is_empty());
        assert_eq!(hmm.decoding_return_values().pairs_decoded, 0);
    }

    #[test]
    fn test_decode_range_bounds() {
        let hmm = decoder(64, false);
        let obs = hmm.make_pair_obs(HapSlot::First, SampleIdx::new(0), HapSlot::First, SampleIdx::new(1));
        assert_eq!(hmm.decode_range(&obs, 10, 30).unwrap()[0].len(), 20);
        assert!(hmm.decode_range(&obs, 30, 10).is_err());
        assert!(hmm.decode_range(&obs, 0, 81).is_err());
    }
}
