//! # Data Module
//!
//! In-memory representation of the panel.
//!
//! - **Zero-cost newtypes:** `HapIdx`, `SampleIdx` keep haplotype and
//!   individual indices apart.
//! - **Bit-packed haplotypes:** one `BitVec<u64>` per haplotype, one bit per site.
//! - **Precomputed site tables:** genetic positions, folding flags and
//!   undistinguished counts are computed once at load time.

pub mod genetic_map;
pub mod haplotype;
pub mod panel;
