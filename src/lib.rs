//! # ASMC Library
//!
//! Pairwise coalescence-time decoding with the Ascertained Sequentially
//! Markovian Coalescent, and IBD segment detection and dating (FastSMC).
//!
//! ## Modules
//! - `config`: Decoding options and CLI argument parsing
//! - `data`: Panel, samples and genetic map
//! - `error`: Error types and result aliases
//! - `io`: Panel, decoding quantities and output files
//! - `model`: Coalescent HMM, GERMLINE hashing and IBD calling
//! - `pipelines`: Decoding job and FastSMC orchestration
//! - `utils`: Lane workspace, telemetry and thread pool setup

pub mod config;
pub mod data;
pub mod error;
pub mod io;
pub mod model;
pub mod pipelines;
pub mod utils;

// Re-export commonly used types
pub use config::{DecodingMode, DecodingParams};
pub use data::genetic_map::GeneticMap;
pub use data::haplotype::{HapIdx, HapSlot, SampleIdx, Samples};
pub use data::panel::{Data, Individual, Site};
pub use error::{AsmcError, Result};
pub use model::hmm::{DecodingReturnValues, Hmm, PairSummary};
pub use model::ibd::IbdSegment;
pub use model::observation::{BatchBuffer, BufferState, PairObservation};
pub use model::quantities::DecodingQuantities;
pub use model::sharding::PairShard;

pub use pipelines::{AsmcPipeline, FastSmc, FastSmcPipeline, FastSmcReport};
