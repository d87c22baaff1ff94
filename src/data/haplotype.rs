//! # Individual and Haplotype Indices
//!
//! Index newtypes for individuals and haplotypes, plus the sample table read
//! from a `.samples` file. Haplotypes of an individual are addressed by a
//! 1-based slot (`1` or `2`), matching the panel column order.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{AsmcError, Result};

/// Zero-cost newtype for individual indices
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct SampleIdx(pub u32);

impl SampleIdx {
    pub fn new(idx: u32) -> Self {
        Self(idx)
    }

    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl From<u32> for SampleIdx {
    fn from(idx: u32) -> Self {
        Self(idx)
    }
}

impl From<usize> for SampleIdx {
    fn from(idx: usize) -> Self {
        Self(idx as u32)
    }
}

impl From<SampleIdx> for usize {
    fn from(idx: SampleIdx) -> usize {
        idx.0 as usize
    }
}

/// Zero-cost newtype for global haplotype indices (all haplotypes of all individuals)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct HapIdx(pub u32);

impl HapIdx {
    pub fn new(idx: u32) -> Self {
        Self(idx)
    }

    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl From<u32> for HapIdx {
    fn from(idx: u32) -> Self {
        Self(idx)
    }
}

impl From<usize> for HapIdx {
    fn from(idx: usize) -> Self {
        Self(idx as u32)
    }
}

/// Which haplotype of an individual
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum HapSlot {
    First,
    Second,
}

impl HapSlot {
    pub const BOTH: [HapSlot; 2] = [HapSlot::First, HapSlot::Second];

    /// Parse the 1-based slot number used on the command line and in outputs
    pub fn from_number(n: u8) -> Result<Self> {
        match n {
            1 => Ok(HapSlot::First),
            2 => Ok(HapSlot::Second),
            other => Err(AsmcError::invalid_data(format!(
                "haplotype slot must be 1 or 2, got {}",
                other
            ))),
        }
    }

    /// 1-based slot number
    pub fn number(self) -> u8 {
        match self {
            HapSlot::First => 1,
            HapSlot::Second => 2,
        }
    }

    /// 0-based offset within the individual
    pub fn offset(self) -> usize {
        self.number() as usize - 1
    }
}

impl fmt::Display for HapSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

/// A collection of samples (individuals)
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Samples {
    /// Family IDs (first column of the samples file)
    family_ids: Vec<Arc<str>>,
    /// Individual IDs
    ids: Vec<Arc<str>>,
    /// Whether each sample is diploid (true) or haploid (false)
    is_diploid: Vec<bool>,
    /// Map from individual ID to index for fast lookup
    #[serde(skip)]
    id_to_idx: HashMap<Arc<str>, SampleIdx>,
    /// hap_offset[i] = number of haplotypes from samples 0..i
    #[serde(skip)]
    hap_offset: Vec<usize>,
}

impl Samples {
    /// Create from (family ID, individual ID) pairs, all diploid
    pub fn from_ids(ids: Vec<(String, String)>) -> Self {
        let is_diploid = vec![true; ids.len()];
        Self::from_ids_with_ploidy(ids, is_diploid)
    }

    /// Create from IDs with explicit ploidy per sample
    pub fn from_ids_with_ploidy(ids: Vec<(String, String)>, is_diploid: Vec<bool>) -> Self {
        assert_eq!(ids.len(), is_diploid.len(), "ids and is_diploid must have same length");

        let (family_ids, ids): (Vec<Arc<str>>, Vec<Arc<str>>) = ids
            .into_iter()
            .map(|(fam, id)| (Arc::from(fam), Arc::from(id)))
            .unzip();

        let mut samples = Self {
            family_ids,
            ids,
            is_diploid,
            id_to_idx: HashMap::new(),
            hap_offset: Vec::new(),
        };
        samples.rebuild_lookups();
        samples
    }

    /// Recompute derived lookup tables (needed after deserialization)
    pub fn rebuild_lookups(&mut self) {
        self.id_to_idx = self
            .ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), SampleIdx::new(i as u32)))
            .collect();

        let mut offset = 0usize;
        self.hap_offset = Vec::with_capacity(self.ids.len() + 1);
        for &diploid in &self.is_diploid {
            self.hap_offset.push(offset);
            offset += if diploid { 2 } else { 1 };
        }
        self.hap_offset.push(offset);
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Number of haplotypes (2 per diploid sample, 1 per haploid)
    pub fn n_haps(&self) -> usize {
        self.hap_offset.last().copied().unwrap_or(0)
    }

    /// Whether a sample is diploid
    pub fn is_diploid(&self, sample: SampleIdx) -> bool {
        self.is_diploid[sample.as_usize()]
    }

    /// Number of haplotypes carried by a sample
    pub fn ploidy(&self, sample: SampleIdx) -> usize {
        if self.is_diploid(sample) {
            2
        } else {
            1
        }
    }

    /// Global haplotype index of a sample's slot
    pub fn hap_index(&self, sample: SampleIdx, slot: HapSlot) -> HapIdx {
        HapIdx::new((self.hap_offset[sample.as_usize()] + slot.offset()) as u32)
    }

    /// Sample and slot owning a global haplotype index
    pub fn hap_owner(&self, hap: HapIdx) -> (SampleIdx, HapSlot) {
        let h = hap.as_usize();
        // hap_offset is sorted; the owner is the last offset <= h
        let sample = match self.hap_offset.binary_search(&h) {
            Ok(mut i) => {
                // haploid samples share no offsets, but skip to the sample that starts here
                while i + 1 < self.hap_offset.len() - 1 && self.hap_offset[i + 1] == h {
                    i += 1;
                }
                i
            }
            Err(i) => i - 1,
        };
        let slot = if h == self.hap_offset[sample] {
            HapSlot::First
        } else {
            HapSlot::Second
        };
        (SampleIdx::new(sample as u32), slot)
    }

    /// Get sample index by individual ID
    pub fn index_of(&self, id: &str) -> Option<SampleIdx> {
        self.id_to_idx.get(id).copied()
    }

    /// Individual IDs
    pub fn ids(&self) -> &[Arc<str>] {
        &self.ids
    }

    /// Family ID of a sample
    pub fn family_id(&self, sample: SampleIdx) -> &str {
        &self.family_ids[sample.as_usize()]
    }
}

impl std::ops::Index<SampleIdx> for Samples {
    type Output = str;

    fn index(&self, idx: SampleIdx) -> &Self::Output {
        &self.ids[idx.as_usize()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<(String, String)> {
        names.iter().map(|n| (format!("fam_{}", n), n.to_string())).collect()
    }

    #[test]
    fn test_samples_survive_json_with_rebuilt_lookups() {
        let samples = Samples::from_ids_with_ploidy(ids(&["a", "b", "c"]), vec![true, false, true]);
        let json = serde_json::to_string(&samples).unwrap();
        let mut back: Samples = serde_json::from_str(&json).unwrap();
        back.rebuild_lookups();
        assert_eq!(back.ids(), samples.ids());
        assert_eq!(back.family_id(SampleIdx::new(1)), "fam_b");
        assert_eq!(back.index_of("c"), Some(SampleIdx::new(2)));
        assert_eq!(back.hap_owner(HapIdx::new(3)), (SampleIdx::new(2), HapSlot::First));
    }

    #[test]
    fn test_hap_slot_numbers() {
        assert_eq!(HapSlot::from_number(1).unwrap(), HapSlot::First);
        assert_eq!(HapSlot::from_number(2).unwrap(), HapSlot::Second);
        assert!(HapSlot::from_number(0).is_err());
        assert!(HapSlot::from_number(3).is_err());
        assert_eq!(HapSlot::Second.offset(), 1);
    }

    #[test]
    fn test_samples_n_haps() {
        let samples = Samples::from_ids(ids(&["A", "B", "C"]));
        assert_eq!(samples.len(), 3);
        assert_eq!(samples.n_haps(), 6);
        assert_eq!(samples.hap_index(SampleIdx::new(1), HapSlot::Second), HapIdx::new(3));
    }

    #[test]
    fn test_mixed_ploidy_offsets() {
        let samples =
            Samples::from_ids_with_ploidy(ids(&["A", "B", "C"]), vec![true, false, true]);
        assert_eq!(samples.n_haps(), 5);
        assert_eq!(samples.hap_index(SampleIdx::new(2), HapSlot::First), HapIdx::new(3));
        assert_eq!(samples.hap_owner(HapIdx::new(2)), (SampleIdx::new(1), HapSlot::First));
        assert_eq!(samples.hap_owner(HapIdx::new(4)), (SampleIdx::new(2), HapSlot::Second));
        assert_eq!(samples.hap_owner(HapIdx::new(1)), (SampleIdx::new(0), HapSlot::Second));
    }

    #[test]
    fn test_samples_lookup() {
        let samples = Samples::from_ids(ids(&["A", "B"]));
        assert_eq!(samples.index_of("A"), Some(SampleIdx::new(0)));
        assert_eq!(samples.index_of("B"), Some(SampleIdx::new(1)));
        assert_eq!(samples.index_of("C"), None);
        assert_eq!(samples.family_id(SampleIdx::new(1)), "fam_B");
    }
}
