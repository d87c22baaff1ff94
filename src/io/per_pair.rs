//! # Per-pair Output
//!
//! One line per decoded haplotype pair:
//!
//! ```text
//! <famA> <idA> <hapA> <famB> <idB> <hapB> <value at site 0> ... <value at last site>
//! ```
//!
//! `out.perPairMAP.gz` holds the expected time of the most likely state at
//! each site, `out.perPairPosteriorMeans.gz` the posterior mean time.
//! Values cover the decoded range of the pair.

use std::io::Write;
use std::path::Path;

use crate::config::with_suffix;
use crate::data::haplotype::Samples;
use crate::error::Result;
use crate::io::create_text;
use crate::model::observation::PairObservation;

pub const MAP_SUFFIX: &str = ".perPairMAP.gz";
pub const POSTERIOR_MEAN_SUFFIX: &str = ".perPairPosteriorMeans.gz";

/// Writers for the per-pair summaries requested by the run
pub struct PerPairWriter {
    map: Option<Box<dyn Write + Send>>,
    posterior_mean: Option<Box<dyn Write + Send>>,
    buf: ryu::Buffer,
}

impl PerPairWriter {
    /// Create the requested files under `out_root`
    pub fn create(out_root: &Path, map: bool, posterior_mean: bool) -> Result<Self> {
        let open = |suffix: &str| -> Result<Box<dyn Write + Send>> {
            let path = with_suffix(out_root, suffix);
            create_text(&path)
        };
        Ok(Self {
            map: if map { Some(open(MAP_SUFFIX)?) } else { None },
            posterior_mean: if posterior_mean {
                Some(open(POSTERIOR_MEAN_SUFFIX)?)
            } else {
                None
            },
            buf: ryu::Buffer::new(),
        })
    }

    /// Writers over arbitrary sinks
    pub fn from_writers(
        map: Option<Box<dyn Write + Send>>,
        posterior_mean: Option<Box<dyn Write + Send>>,
    ) -> Self {
        Self {
            map,
            posterior_mean,
            buf: ryu::Buffer::new(),
        }
    }

    pub fn wants_map(&self) -> bool {
        self.map.is_some()
    }

    pub fn wants_posterior_mean(&self) -> bool {
        self.posterior_mean.is_some()
    }

    /// Write the rows of one pair
    pub fn write_pair(
        &mut self,
        samples: &Samples,
        obs: &PairObservation,
        map: &[f32],
        posterior_mean: &[f32],
    ) -> Result<()> {
        let Self {
            map: map_out,
            posterior_mean: mean_out,
            buf,
        } = self;
        if let Some(out) = map_out.as_mut() {
            write_row(out.as_mut(), samples, obs, map, buf)?;
        }
        if let Some(out) = mean_out.as_mut() {
            write_row(out.as_mut(), samples, obs, posterior_mean, buf)?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        for out in [self.map.as_mut(), self.posterior_mean.as_mut()]
            .into_iter()
            .flatten()
        {
            out.flush()?;
        }
        Ok(())
    }

    /// Flush and close the files
    pub fn finish(mut self) -> Result<()> {
        self.flush()
    }
}

fn write_row(
    out: &mut (dyn Write + Send),
    samples: &Samples,
    obs: &PairObservation,
    values: &[f32],
    buf: &mut ryu::Buffer,
) -> Result<()> {
    write!(
        out,
        "{} {} {} {} {} {}",
        samples.family_id(obs.ind_a),
        &samples[obs.ind_a],
        obs.hap_a,
        samples.family_id(obs.ind_b),
        &samples[obs.ind_b],
        obs.hap_b
    )?;
    for v in values {
        out.write_all(b" ")?;
        out.write_all(buf.format(*v).as_bytes())?;
    }
    out.write_all(b"\n")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::haplotype::{HapSlot, SampleIdx};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<Vec<u8>>>);

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_row_layout() {
        let samples = Samples::from_ids(vec![
            ("F1".to_string(), "A".to_string()),
            ("F2".to_string(), "B".to_string()),
        ]);
        let sink = Shared::default();
        let mut writer = PerPairWriter::from_writers(Some(Box::new(sink.clone())), None);
        let obs = PairObservation {
            hap_a: HapSlot::First,
            ind_a: SampleIdx::new(0),
            hap_b: HapSlot::Second,
            ind_b: SampleIdx::new(1),
            from: 0,
            len: 2,
            folded: true,
        };
        writer.write_pair(&samples, &obs, &[10.0, 35.5], &[0.0, 0.0]).unwrap();
        writer.finish().unwrap();
        let text = String::from_utf8(sink.0.lock().unwrap().clone()).unwrap();
        assert_eq!(text, "F1 A 1 F2 B 2 10.0 35.5\n");
    }
}
