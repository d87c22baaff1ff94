//! # Genetic Map
//!
//! Physical-to-genetic position interpolation.
//!
//! Map files have four whitespace-separated columns, `chr id cM bp`, one line
//! per mapped position, optionally gzip-compressed. Positions between map
//! entries are linearly interpolated; positions outside the map are
//! extrapolated with the rate of the nearest interval.

use std::io::BufRead;
use std::path::Path;

use crate::error::{AsmcError, Result};
use crate::io::open_text;

/// Default scale factor: 1 cM per Mb (1e-6 cM per bp)
pub const DEFAULT_SCALE_FACTOR: f64 = 1e-6;

/// A genetic map for interpolating physical positions to genetic positions (cM)
#[derive(Clone, Debug, Default)]
pub struct GeneticMap {
    /// Physical positions (bp), strictly increasing
    positions: Vec<u64>,

    /// Genetic positions (cM) corresponding to physical positions
    gen_positions: Vec<f64>,
}

impl GeneticMap {
    /// Build from parallel position vectors
    pub fn new(positions: Vec<u64>, gen_positions: Vec<f64>) -> Result<Self> {
        if positions.len() != gen_positions.len() {
            return Err(AsmcError::load(
                "genetic map",
                format!(
                    "{} physical positions but {} genetic positions",
                    positions.len(),
                    gen_positions.len()
                ),
            ));
        }
        for i in 1..positions.len() {
            if positions[i] <= positions[i - 1] {
                return Err(AsmcError::load(
                    "genetic map",
                    format!("positions not in ascending order at {}", positions[i]),
                ));
            }
            if gen_positions[i] < gen_positions[i - 1] {
                return Err(AsmcError::load(
                    "genetic map",
                    format!("genetic position decreases at {}", positions[i]),
                ));
            }
        }
        Ok(Self {
            positions,
            gen_positions,
        })
    }

    /// Load a `chr id cM bp` map file, optionally gzip-compressed
    pub fn from_file(path: &Path) -> Result<Self> {
        let reader = open_text(path)?;

        let mut positions = Vec::new();
        let mut gen_positions = Vec::new();

        for (line_num, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 4 {
                return Err(AsmcError::format(
                    path,
                    line_num + 1,
                    format!("expected 4 columns, got {}", parts.len()),
                ));
            }

            let gen_pos: f64 = parts[2]
                .parse()
                .map_err(|_| AsmcError::format(path, line_num + 1, "invalid genetic position"))?;
            if !gen_pos.is_finite() {
                return Err(AsmcError::format(
                    path,
                    line_num + 1,
                    "genetic position is not finite",
                ));
            }

            let pos: u64 = parts[3]
                .parse()
                .map_err(|_| AsmcError::format(path, line_num + 1, "invalid physical position"))?;

            positions.push(pos);
            gen_positions.push(gen_pos);
        }

        Self::new(positions, gen_positions)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Interpolate genetic position (cM) from physical position (bp)
    pub fn gen_pos(&self, phys_pos: u64) -> f64 {
        if self.positions.is_empty() {
            return phys_pos as f64 * DEFAULT_SCALE_FACTOR;
        }

        match self.positions.binary_search(&phys_pos) {
            Ok(idx) => self.gen_positions[idx],
            Err(idx) => {
                if idx == 0 {
                    let rate = self.rate_between(0, 1);
                    self.gen_positions[0] - rate * (self.positions[0] - phys_pos) as f64
                } else if idx == self.positions.len() {
                    let last = self.positions.len() - 1;
                    let rate = if last > 0 {
                        self.rate_between(last - 1, last)
                    } else {
                        DEFAULT_SCALE_FACTOR
                    };
                    self.gen_positions[last] + rate * (phys_pos - self.positions[last]) as f64
                } else {
                    let p0 = self.positions[idx - 1] as f64;
                    let p1 = self.positions[idx] as f64;
                    let g0 = self.gen_positions[idx - 1];
                    let g1 = self.gen_positions[idx];
                    let t = (phys_pos as f64 - p0) / (p1 - p0);
                    g0 + t * (g1 - g0)
                }
            }
        }
    }

    /// Genetic position in Morgans
    pub fn gen_pos_morgans(&self, phys_pos: u64) -> f64 {
        self.gen_pos(phys_pos) / 100.0
    }

    /// Genetic distance between two physical positions (cM)
    pub fn gen_dist(&self, pos1: u64, pos2: u64) -> f64 {
        (self.gen_pos(pos2) - self.gen_pos(pos1)).abs()
    }

    fn rate_between(&self, a: usize, b: usize) -> f64 {
        if b >= self.positions.len() {
            return DEFAULT_SCALE_FACTOR;
        }
        let dp = (self.positions[b] - self.positions[a]) as f64;
        let rate = (self.gen_positions[b] - self.gen_positions[a]) / dp;
        // flat intervals at the map ends would pin every outside site to one position
        if rate > 0.0 {
            rate
        } else {
            0.0
        }
    }
}
