//! # Haplotype Panel Reader
//!
//! Reads the `.hap[s][.gz]` / `.sample[s]` pair addressed by a panel root.
//!
//! - haplotypes: one line per site, `chr id bp a0 a1 h1 ... h2N`, alleles `0`/`1`
//! - samples: two header lines, then `fam id missing` per individual

use std::io::BufRead;
use std::path::{Path, PathBuf};

use crate::config::with_suffix;
use crate::data::haplotype::Samples;
use crate::data::panel::HapBits;
use crate::error::{AsmcError, Result};
use crate::io::open_text;

const HAP_SUFFIXES: [&str; 4] = [".hap.gz", ".hap", ".haps.gz", ".haps"];
const SAMPLE_SUFFIXES: [&str; 2] = [".samples", ".sample"];
const LEADING_COLUMNS: usize = 5;

/// Site columns of one panel line
#[derive(Clone, Debug, PartialEq)]
pub struct SiteRecord {
    pub chrom: String,
    pub id: String,
    pub bp: u64,
}

/// Sites and haplotype columns of a panel
#[derive(Debug)]
pub struct HapsPanel {
    pub sites: Vec<SiteRecord>,
    /// One bit vector per haplotype column, in file order
    pub haplotypes: Vec<HapBits>,
}

/// First existing haplotype file for a root
pub fn find_hap_file(root: &Path) -> Result<PathBuf> {
    find_with_suffixes(root, &HAP_SUFFIXES, "haplotypes")
}

/// First existing samples file for a root
pub fn find_samples_file(root: &Path) -> Result<PathBuf> {
    find_with_suffixes(root, &SAMPLE_SUFFIXES, "samples")
}

fn find_with_suffixes(root: &Path, suffixes: &[&str], what: &str) -> Result<PathBuf> {
    suffixes
        .iter()
        .map(|s| with_suffix(root, s))
        .find(|p| p.is_file())
        .ok_or_else(|| {
            AsmcError::load(
                what,
                format!(
                    "none of {} found for root {}",
                    suffixes.join(", "),
                    root.display()
                ),
            )
        })
}

/// Count non-empty lines without parsing them
pub fn count_lines(path: &Path) -> Result<usize> {
    let mut reader = open_text(path)?;
    let mut count = 0usize;
    let mut buf = Vec::with_capacity(1 << 12);
    loop {
        buf.clear();
        let n = reader.read_until(b'\n', &mut buf)?;
        if n == 0 {
            break;
        }
        if buf.iter().any(|b| !b.is_ascii_whitespace()) {
            count += 1;
        }
    }
    Ok(count)
}

/// Read a samples file (all individuals diploid)
pub fn read_samples(path: &Path) -> Result<Samples> {
    let reader = open_text(path)?;
    let mut ids = Vec::new();
    for (line_num, line) in reader.lines().enumerate() {
        let line = line?;
        if line_num < 2 || line.trim().is_empty() {
            continue;
        }
        let mut fields = line.split_whitespace();
        match (fields.next(), fields.next()) {
            (Some(fam), Some(id)) => ids.push((fam.to_string(), id.to_string())),
            _ => {
                return Err(AsmcError::load(
                    "samples",
                    format!("{} line {}: expected at least 2 columns", path.display(), line_num + 1),
                ))
            }
        }
    }
    if ids.is_empty() {
        return Err(AsmcError::load(
            "samples",
            format!("{} lists no individuals", path.display()),
        ));
    }
    Ok(Samples::from_ids(ids))
}

/// Read a haplotype file with `n_samples` diploid individuals and `expected_sites` lines
pub fn read_haps(path: &Path, n_samples: usize, expected_sites: usize) -> Result<HapsPanel> {
    let reader = open_text(path)?;
    let n_cols = 2 * n_samples;
    let mut haplotypes: Vec<HapBits> = (0..n_cols)
        .map(|_| HapBits::with_capacity(expected_sites))
        .collect();
    let mut sites = Vec::with_capacity(expected_sites);

    for (line_num, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let lineno = line_num + 1;
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != LEADING_COLUMNS + n_cols {
            if sites.is_empty() {
                return Err(AsmcError::load(
                    "haplotypes",
                    format!(
                        "{} has {} haplotype columns, expected 2 x {} samples",
                        path.display(),
                        fields.len().saturating_sub(LEADING_COLUMNS),
                        n_samples
                    ),
                ));
            }
            return Err(AsmcError::format(
                path,
                lineno,
                format!("expected {} columns, got {}", LEADING_COLUMNS + n_cols, fields.len()),
            ));
        }
        if sites.len() == expected_sites {
            return Err(AsmcError::format(
                path,
                lineno,
                format!("more than the expected {} sites", expected_sites),
            ));
        }

        let bp: u64 = fields[2]
            .parse()
            .map_err(|_| AsmcError::format(path, lineno, "invalid physical position"))?;
        sites.push(SiteRecord {
            chrom: fields[0].to_string(),
            id: fields[1].to_string(),
            bp,
        });

        for (hap, token) in haplotypes.iter_mut().zip(&fields[LEADING_COLUMNS..]) {
            match *token {
                "0" => hap.push(false),
                "1" => hap.push(true),
                other => {
                    return Err(AsmcError::format(
                        path,
                        lineno,
                        format!("expected allele 0 or 1, got '{}'", other),
                    ))
                }
            }
        }
    }

    if sites.len() < expected_sites {
        return Err(AsmcError::format(
            path,
            sites.len() + 1,
            format!(
                "file truncated: {} sites read, {} expected",
                sites.len(),
                expected_sites
            ),
        ));
    }

    Ok(HapsPanel { sites, haplotypes })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_panel(dir: &Path) -> PathBuf {
        let root = dir.join("toy");
        fs::write(
            with_suffix(&root, ".samples"),
            "ID_1 ID_2 missing\n0 0 0\nf1 a 0\nf2 b 0\n",
        )
        .unwrap();
        fs::write(
            with_suffix(&root, ".hap"),
            "1 rs1 100 A G 0 1 0 0\n1 rs2 200 C T 1 1 0 1\n1 rs3 300 G A 0 0 0 1\n",
        )
        .unwrap();
        root
    }

    #[test]
    fn test_read_panel() {
        let dir = tempfile::tempdir().unwrap();
        let root = write_panel(dir.path());

        let samples = read_samples(&find_samples_file(&root).unwrap()).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples.family_id(crate::data::haplotype::SampleIdx::new(1)), "f2");

        let hap_path = find_hap_file(&root).unwrap();
        assert_eq!(count_lines(&hap_path).unwrap(), 3);

        let panel = read_haps(&hap_path, 2, 3).unwrap();
        assert_eq!(panel.sites.len(), 3);
        assert_eq!(panel.sites[1].bp, 200);
        assert_eq!(panel.haplotypes.len(), 4);
        assert!(panel.haplotypes[1][0]);
        assert!(panel.haplotypes[3][2]);
    }

    #[test]
    fn test_truncated_panel_is_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let root = write_panel(dir.path());
        let err = read_haps(&find_hap_file(&root).unwrap(), 2, 5).unwrap_err();
        assert!(matches!(err, AsmcError::Format { .. }));
    }

    #[test]
    fn test_bad_allele_is_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.hap");
        fs::write(&path, "1 rs1 100 A G 0 1\n1 rs2 200 A G 0 2\n").unwrap();
        let err = read_haps(&path, 1, 2).unwrap_err();
        assert!(matches!(err, AsmcError::Format { line: 2, .. }));
    }

    #[test]
    fn test_column_count_mismatch_is_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wide.hap");
        fs::write(&path, "1 rs1 100 A G 0 1 1 0\n").unwrap();
        let err = read_haps(&path, 1, 1).unwrap_err();
        assert!(matches!(err, AsmcError::Load { .. }));
    }

    #[test]
    fn test_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            find_hap_file(&dir.path().join("absent")),
            Err(AsmcError::Load { .. })
        ));
    }
}
