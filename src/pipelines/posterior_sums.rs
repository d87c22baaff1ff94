//! # Posterior Sum Pipeline
//!
//! Orchestrates an ASMC decoding job:
//! 1. Load the decoding quantities
//! 2. Load the panel for the job's shard
//! 3. Decode every individual pair of the shard through the batch buffer
//! 4. Write the posterior sums and close the per-pair outputs

use std::sync::Arc;

use tracing::{info, info_span};

use crate::config::DecodingParams;
use crate::data::panel::{Data, PanelOptions};
use crate::error::{AsmcError, Result};
use crate::io::per_pair::PerPairWriter;
use crate::io::sums::write_sums;
use crate::model::hmm::{DecodingReturnValues, Hmm};
use crate::model::quantities::DecodingQuantities;
use crate::model::sharding::PairShard;
use crate::utils::telemetry::{Stage, TelemetryBlackboard};

/// ASMC decoding job
pub struct AsmcPipeline {
    params: DecodingParams,
    telemetry: Option<Arc<TelemetryBlackboard>>,
}

impl AsmcPipeline {
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

    fn stage(&self, stage: Stage) {
        if let Some(t) = &self.telemetry {
            t.set_stage(stage);
        }
    }

    pub fn run(&mut self) -> Result<DecodingReturnValues> {
        let params = &self.params;
        if !params.has_asmc_task() {
            return Err(AsmcError::config("no decoding output was requested"));
        }

        self.stage(Stage::LoadingQuantities);
        let dq = Arc::new(DecodingQuantities::load(&params.quantities_path())?);

        self.stage(Stage::LoadingData);
        let root = params.in_file_root.clone();
        let sites = Data::count_hap_lines(&root)?;
        let shard = PairShard::new(params.jobs, params.job_ind)?;
        let data = Arc::new(Data::load_sharded(
            &root,
            sites,
            &PanelOptions::from_params(params, dq.csfs_samples()),
            shard,
        )?);

        let out_root = params.out_root();
        let mut hmm = Hmm::new(data, dq, params)?;
        if params.do_per_pair_map || params.do_per_pair_posterior_mean {
            hmm = hmm.with_per_pair_writer(PerPairWriter::create(
                &out_root,
                params.do_per_pair_map,
                params.do_per_pair_posterior_mean,
            )?);
        }
        if let Some(t) = &self.telemetry {
            hmm = hmm.with_telemetry(Arc::clone(t));
        }

        self.stage(Stage::Decoding);
        hmm.decode_all(shard.jobs, shard.job_index)?;

        self.stage(Stage::WritingOutput);
        {
            let _span = info_span!("write_outputs", out = %out_root.display()).entered();
            write_sums(&out_root, hmm.decoding_return_values(), params.do_posterior_sums)?;
            if let Some(writer) = hmm.take_per_pair_writer() {
                writer.finish()?;
            }
        }

        let values = hmm.decoding_return_values().clone();
        info!(
            decoded = values.pairs_decoded,
            skipped = values.pairs_skipped,
            "Decoding job finished"
        );
        self.stage(Stage::Complete);
        Ok(values)
    }
}
