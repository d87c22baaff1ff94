//! # Configuration
//!
//! ## Role
//! `DecodingParams` carries every option of an ASMC or FastSMC run. It is
//! built either in code (tests, library users) or from the command line via
//! the clap-derived [`Cli`], and must go through [`DecodingParams::process_options`]
//! before it is handed to the decoder. Processing resolves derived fields
//! (decoding mode, folding, CSFS usage, default file names) and rejects
//! contradictory combinations with `AsmcError::Config`.
//!
//! ## Example CLI
//! ```bash
//! asmc decode --in-file-root data/panel --posterior-sums
//! asmc fastsmc --in-file-root data/panel --map data/panel.map.gz \
//!     --out-file-root out/panel --germline --min-m 1.5 --recall 3
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};

use crate::error::{AsmcError, Result};

/// Number of informative sites hashed together in one GERMLINE word
pub const WORD_SIZE: usize = 64;

/// Probability that TMRCA is below `time` required to call IBD, by recall level
const RECALL_PROBABILITY: [f32; 4] = [0.9, 0.75, 0.5, 0.25];

/// Which emission model the CSFS tables were computed for
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DecodingMode {
    Sequence,
    SequenceFolded,
    Array,
    ArrayFolded,
}

impl DecodingMode {
    pub const ALL: [DecodingMode; 4] = [
        DecodingMode::Sequence,
        DecodingMode::SequenceFolded,
        DecodingMode::Array,
        DecodingMode::ArrayFolded,
    ];

    /// Name used in decoding-quantities section headers
    pub fn as_str(self) -> &'static str {
        match self {
            DecodingMode::Sequence => "sequence",
            DecodingMode::SequenceFolded => "sequenceFolded",
            DecodingMode::Array => "array",
            DecodingMode::ArrayFolded => "arrayFolded",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.as_str() == name)
    }

    /// Resolve from the user-facing mode string and the ancestral-allele flag
    pub fn resolve(mode_string: &str, use_ancestral: bool) -> Result<Self> {
        match (mode_string.to_lowercase().as_str(), use_ancestral) {
            ("sequence", true) => Ok(DecodingMode::Sequence),
            ("sequence", false) => Ok(DecodingMode::SequenceFolded),
            ("array", true) => Ok(DecodingMode::Array),
            ("array", false) => Ok(DecodingMode::ArrayFolded),
            (other, _) => Err(AsmcError::config(format!(
                "unknown decoding mode '{}', choose from {{sequence, array}}",
                other
            ))),
        }
    }

    pub fn is_sequence(self) -> bool {
        matches!(self, DecodingMode::Sequence | DecodingMode::SequenceFolded)
    }

    pub fn is_folded(self) -> bool {
        matches!(self, DecodingMode::SequenceFolded | DecodingMode::ArrayFolded)
    }
}

impl fmt::Display for DecodingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options for a decoding run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DecodingParams {
    /// Prefix of the hap|haps[.gz] and sample|samples files
    pub in_file_root: PathBuf,
    /// Decoding quantities file (default: `<root>.decodingQuantities.gz`)
    pub decoding_quant_file: Option<PathBuf>,
    /// Output prefix (default: `<root>.<jobInd>-<jobs>`)
    pub out_file_root: Option<PathBuf>,
    /// Genetic map (`chr id cM bp`); without it the panel's own map is used
    pub map_file: Option<PathBuf>,

    pub decoding_mode_string: String,
    pub decoding_mode: DecodingMode,
    pub decoding_sequence: bool,
    pub fold_data: bool,
    pub use_ancestral: bool,
    pub using_csfs: bool,
    pub compress: bool,
    /// Genetic distance (Morgans) between two CSFS emissions; NaN means unset
    pub skip_csfs_distance: f32,

    pub no_batches: bool,
    pub batch_size: usize,
    /// Rescale forward/backward vectors every this many sites
    pub scaling_skip: usize,

    pub do_posterior_sums: bool,
    pub do_major_minor_posterior_sums: bool,
    pub do_per_pair_map: bool,
    pub do_per_pair_posterior_mean: bool,
    pub within_only: bool,

    /// Number of shards (0 = unset)
    pub jobs: usize,
    /// 1-based shard index (0 = unset)
    pub job_ind: usize,

    // FastSMC
    pub fastsmc: bool,
    pub recall_threshold: u8,
    /// Minimum segment length (cM)
    pub min_m: f32,
    pub germline: bool,
    pub bin_out: bool,
    /// IBD time threshold (generations)
    pub time: u32,
    pub no_conditional_age_estimates: bool,
    /// Skip words with distinct seeds per haplotype below this ratio
    pub skip: f32,
    pub min_maf: f32,
    /// Allowed consecutive mismatching words inside a match
    pub gap: usize,
    /// Refine hash buckets holding more haplotypes than this (0 = off)
    pub max_seeds: usize,
}

impl Default for DecodingParams {
    fn default() -> Self {
        Self {
            in_file_root: PathBuf::new(),
            decoding_quant_file: None,
            out_file_root: None,
            map_file: None,
            decoding_mode_string: "array".to_string(),
            decoding_mode: DecodingMode::ArrayFolded,
            decoding_sequence: false,
            fold_data: true,
            use_ancestral: false,
            using_csfs: true,
            compress: false,
            skip_csfs_distance: f32::NAN,
            no_batches: false,
            batch_size: 64,
            scaling_skip: 1,
            do_posterior_sums: false,
            do_major_minor_posterior_sums: false,
            do_per_pair_map: false,
            do_per_pair_posterior_mean: false,
            within_only: false,
            jobs: 0,
            job_ind: 0,
            fastsmc: false,
            recall_threshold: 3,
            min_m: 1.0,
            germline: false,
            bin_out: false,
            time: 100,
            no_conditional_age_estimates: false,
            skip: 0.0,
            min_maf: 0.0,
            gap: 1,
            max_seeds: 0,
        }
    }
}

impl DecodingParams {
    /// Defaults for a panel root, before processing
    pub fn new(in_file_root: impl Into<PathBuf>) -> Self {
        Self {
            in_file_root: in_file_root.into(),
            ..Self::default()
        }
    }

    /// Defaults for a FastSMC run on a panel root, before processing
    pub fn fastsmc(in_file_root: impl Into<PathBuf>) -> Self {
        Self {
            fastsmc: true,
            ..Self::new(in_file_root)
        }
    }

    /// Resolve derived fields and validate. Safe to call more than once.
    pub fn process_options(&mut self) -> Result<()> {
        if self.compress {
            if self.use_ancestral {
                return Err(AsmcError::config(
                    "--compress and --use-ancestral cannot be used together: \
                     a compressed emission cannot use ancestral allele information",
                ));
            }
            if !(self.skip_csfs_distance.is_nan() || self.skip_csfs_distance == f32::INFINITY) {
                return Err(AsmcError::config(
                    "--compress and --skip-csfs-distance cannot be used together: \
                     --compress is a shorthand for an infinite CSFS distance",
                ));
            }
            self.skip_csfs_distance = f32::INFINITY;
        } else if self.skip_csfs_distance.is_nan() {
            self.skip_csfs_distance = 0.0;
        }
        if self.skip_csfs_distance < 0.0 {
            return Err(AsmcError::config("--skip-csfs-distance must be non-negative"));
        }
        self.using_csfs = self.skip_csfs_distance.is_finite();

        self.decoding_mode_string = self.decoding_mode_string.to_lowercase();
        self.decoding_mode = DecodingMode::resolve(&self.decoding_mode_string, self.use_ancestral)?;
        self.decoding_sequence = self.decoding_mode.is_sequence();
        self.fold_data = !self.use_ancestral;

        if self.batch_size == 0 || self.batch_size % 8 != 0 {
            return Err(AsmcError::config(
                "--batch-size must be strictly positive and a multiple of 8",
            ));
        }
        if self.scaling_skip == 0 {
            return Err(AsmcError::config("--scaling-skip must be at least 1"));
        }

        if (self.jobs == 0) != (self.job_ind == 0) {
            return Err(AsmcError::config(
                "--jobs and --job-ind must either both be set or both be unset",
            ));
        }
        if self.jobs == 0 {
            self.jobs = 1;
            self.job_ind = 1;
        }
        if self.job_ind > self.jobs {
            return Err(AsmcError::config("--job-ind must be between 1 and --jobs inclusive"));
        }

        if self.fastsmc {
            if self.germline && self.within_only {
                return Err(AsmcError::config(
                    "--germline and --within-only cannot be used together",
                ));
            }
            if self.time == 0 {
                return Err(AsmcError::config("--time must be a positive integer"));
            }
            if self.recall_threshold > 3 {
                return Err(AsmcError::config("--recall must be between 0 and 3"));
            }
            if !(self.min_m >= 0.0) {
                return Err(AsmcError::config("--min-m must be non-negative"));
            }
        }

        if self.decoding_quant_file.is_none() {
            self.decoding_quant_file = Some(with_suffix(&self.in_file_root, ".decodingQuantities.gz"));
        }
        if self.out_file_root.is_none() {
            self.out_file_root = Some(with_suffix(
                &self.in_file_root,
                &format!(".{}-{}", self.job_ind, self.jobs),
            ));
        }
        Ok(())
    }

    /// Number of observations the batch buffer holds before it is flushed
    pub fn batch_capacity(&self) -> usize {
        if self.no_batches {
            1
        } else {
            self.batch_size
        }
    }

    /// Minimum IBD probability for a site to count as IBD
    pub fn probability_threshold(&self) -> f32 {
        RECALL_PROBABILITY[usize::from(self.recall_threshold.min(3))]
    }

    pub fn quantities_path(&self) -> PathBuf {
        self.decoding_quant_file
            .clone()
            .unwrap_or_else(|| with_suffix(&self.in_file_root, ".decodingQuantities.gz"))
    }

    pub fn out_root(&self) -> PathBuf {
        self.out_file_root.clone().unwrap_or_else(|| {
            with_suffix(&self.in_file_root, &format!(".{}-{}", self.job_ind, self.jobs))
        })
    }

    /// True when some output of the posterior-sum pipeline was requested
    pub fn has_asmc_task(&self) -> bool {
        self.do_posterior_sums
            || self.do_major_minor_posterior_sums
            || self.do_per_pair_map
            || self.do_per_pair_posterior_mean
    }
}

/// Append a suffix to a path prefix (`root` + `.hap.gz`)
pub fn with_suffix(root: &Path, suffix: &str) -> PathBuf {
    let mut s = root.as_os_str().to_os_string();
    s.push(suffix);
    PathBuf::from(s)
}

// ============================================================================
// Command line
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "asmc")]
#[command(about = "Pairwise coalescence-time decoding (ASMC) and IBD detection (FastSMC)", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Number of worker threads (default: all cores)
    #[arg(long, global = true, value_name = "INT")]
    pub threads: Option<usize>,

    /// Print span timings when stages finish
    #[arg(long, global = true)]
    pub profile: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Decode all pairs and write posterior sums / per-pair summaries
    Decode(DecodeArgs),
    /// Detect IBD segments and estimate their age
    Fastsmc(FastSmcArgs),
}

/// Options shared by both subcommands
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// Prefix of hap|haps|hap.gz|haps.gz and sample|samples file
    #[arg(long, alias = "inFileRoot", value_name = "PREFIX")]
    pub in_file_root: PathBuf,

    /// Decoding quantities file
    #[arg(long, alias = "decodingQuantFile", value_name = "FILE")]
    pub decoding_quant_file: Option<PathBuf>,

    /// Output prefix
    #[arg(long, alias = "outFileRoot", value_name = "PREFIX")]
    pub out_file_root: Option<PathBuf>,

    /// Decoding mode, one of {sequence, array}
    #[arg(long, default_value = "array")]
    pub mode: String,

    /// Number of jobs being done in parallel
    #[arg(long, default_value_t = 0)]
    pub jobs: usize,

    /// Job index (1..jobs)
    #[arg(long, alias = "jobInd", default_value_t = 0)]
    pub job_ind: usize,

    /// Compress emission to binary (no CSFS)
    #[arg(long)]
    pub compress: bool,

    /// Assume ancestral alleles are coded as 1 (otherwise 1 = minor)
    #[arg(long, alias = "useAncestral")]
    pub use_ancestral: bool,

    /// Genetic distance (Morgans) between two CSFS emissions
    #[arg(long, alias = "skipCSFSdistance", value_name = "FLOAT")]
    pub skip_csfs_distance: Option<f32>,

    /// Decode one observation at a time
    #[arg(long, alias = "noBatches")]
    pub no_batches: bool,

    /// Only decode pairs within individuals
    #[arg(long, alias = "withinOnly")]
    pub within_only: bool,

    /// Output per-pair MAP at each site
    #[arg(long, alias = "perPairMAP")]
    pub per_pair_map: bool,

    /// Output per-pair posterior means at each site
    #[arg(long, alias = "perPairPosteriorMeans")]
    pub per_pair_posterior_means: bool,
}

#[derive(Args, Debug, Clone)]
pub struct DecodeArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Output the sum of posteriors over pairs
    #[arg(long, alias = "posteriorSums")]
    pub posterior_sums: bool,

    /// Output posterior sums partitioned by major/minor observation
    #[arg(long, alias = "majorMinorPosteriorSums")]
    pub major_minor_posterior_sums: bool,

    /// Observations decoded jointly
    #[arg(long, alias = "batchSize", default_value_t = 64)]
    pub batch_size: usize,
}

#[derive(Args, Debug, Clone)]
pub struct FastSmcArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Genetic map file
    #[arg(long, value_name = "FILE")]
    pub map: Option<PathBuf>,

    /// Time threshold to define IBD, in generations
    #[arg(long, default_value_t = 100)]
    pub time: u32,

    /// Binary output
    #[arg(long)]
    pub bin: bool,

    /// Observations decoded jointly
    #[arg(long, alias = "batchSize", default_value_t = 16)]
    pub batch_size: usize,

    /// Recall level from 0 to 3 (higher value means higher recall)
    #[arg(long, default_value_t = 3)]
    pub recall: u8,

    /// Do not condition age estimates on TMRCA below the time threshold
    #[arg(long, alias = "noConditionalAgeEstimates")]
    pub no_conditional_age_estimates: bool,

    /// Use GERMLINE to pre-process IBD candidates
    #[arg(long, alias = "GERMLINE")]
    pub germline: bool,

    /// Minimum match length (cM)
    #[arg(long, default_value_t = 1.0)]
    pub min_m: f32,

    /// Skip words with (seeds/samples) less than this value
    #[arg(long, default_value_t = 0.0)]
    pub skip: f32,

    /// Minimum minor allele frequency of hashed sites
    #[arg(long, default_value_t = 0.0)]
    pub min_maf: f32,

    /// Allowed gaps
    #[arg(long, default_value_t = 1)]
    pub gap: usize,

    /// Dynamic hash seed cutoff (0 = off)
    #[arg(long, default_value_t = 0)]
    pub max_seeds: usize,
}

impl CommonArgs {
    fn apply(&self, params: &mut DecodingParams) {
        params.decoding_quant_file = self.decoding_quant_file.clone();
        params.out_file_root = self.out_file_root.clone();
        params.decoding_mode_string = self.mode.clone();
        params.jobs = self.jobs;
        params.job_ind = self.job_ind;
        params.compress = self.compress;
        params.use_ancestral = self.use_ancestral;
        params.skip_csfs_distance = self.skip_csfs_distance.unwrap_or(f32::NAN);
        params.no_batches = self.no_batches;
        params.within_only = self.within_only;
        params.do_per_pair_map = self.per_pair_map;
        params.do_per_pair_posterior_mean = self.per_pair_posterior_means;
    }
}

impl DecodeArgs {
    pub fn into_params(self) -> Result<DecodingParams> {
        let mut params = DecodingParams::new(self.common.in_file_root.clone());
        self.common.apply(&mut params);
        params.do_posterior_sums = self.posterior_sums;
        params.do_major_minor_posterior_sums = self.major_minor_posterior_sums;
        params.batch_size = self.batch_size;
        params.process_options()?;
        if !params.has_asmc_task() {
            return Err(AsmcError::config(
                "at least one of --posterior-sums, --major-minor-posterior-sums, \
                 --per-pair-map, --per-pair-posterior-means must be specified",
            ));
        }
        Ok(params)
    }
}

impl FastSmcArgs {
    pub fn into_params(self) -> Result<DecodingParams> {
        let mut params = DecodingParams::fastsmc(self.common.in_file_root.clone());
        self.common.apply(&mut params);
        params.map_file = self.map;
        params.time = self.time;
        params.bin_out = self.bin;
        params.batch_size = self.batch_size;
        params.recall_threshold = self.recall;
        params.no_conditional_age_estimates = self.no_conditional_age_estimates;
        params.germline = self.germline;
        params.min_m = self.min_m;
        params.skip = self.skip;
        params.min_maf = self.min_maf;
        params.gap = self.gap;
        params.max_seeds = self.max_seeds;
        params.process_options()?;
        Ok(params)
    }
}
