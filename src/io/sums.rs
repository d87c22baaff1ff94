//! # Posterior Sum Output
//!
//! `out.sumOverPairs.gz` holds one line per site with the posterior summed
//! over decoded pairs for every state. With major/minor sums the same
//! layout goes to `out.sumOverPairs00.gz`, `out.sumOverPairs01.gz` and
//! `out.sumOverPairs11.gz`. `out.siteWasFlipped.gz` lists the folded sites.

use std::io::Write;
use std::path::{Path, PathBuf};

use ndarray::Array2;
use tracing::info;

use crate::config::with_suffix;
use crate::error::Result;
use crate::io::create_text;
use crate::model::hmm::DecodingReturnValues;

pub const SUMS_SUFFIX: &str = ".sumOverPairs.gz";

fn write_table(path: &Path, table: &Array2<f64>) -> Result<()> {
    let mut out = create_text(path)?;
    let mut buf = ryu::Buffer::new();
    for row in table.rows() {
        for (k, v) in row.iter().enumerate() {
            if k > 0 {
                out.write_all(b" ")?;
            }
            out.write_all(buf.format(*v).as_bytes())?;
        }
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

/// Write the requested tables of `values` under `out_root`; returns the paths
/// written. The genotype split tables are written whenever they exist.
pub fn write_sums(
    out_root: &Path,
    values: &DecodingReturnValues,
    posterior_sums: bool,
) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    if posterior_sums {
        let path = with_suffix(out_root, SUMS_SUFFIX);
        write_table(&path, &values.sum_over_pairs)?;
        written.push(path);
    }
    for (tag, table) in [
        ("00", &values.sum_over_pairs_00),
        ("01", &values.sum_over_pairs_01),
        ("11", &values.sum_over_pairs_11),
    ] {
        if let Some(table) = table {
            let path = with_suffix(out_root, &format!(".sumOverPairs{}.gz", tag));
            write_table(&path, table)?;
            written.push(path);
        }
    }
    if !written.is_empty() {
        let path = with_suffix(out_root, ".siteWasFlipped.gz");
        let mut out = create_text(&path)?;
        for (site, &flipped) in values.site_was_flipped.iter().enumerate() {
            if flipped {
                writeln!(out, "{}", site)?;
            }
        }
        out.flush()?;
        written.push(path);
    }
    info!(files = written.len(), pairs = values.pairs_decoded, "Wrote posterior sums");
    Ok(written)
}

/// Read a sum table back as `[site][state]`
pub fn read_table(path: &Path) -> Result<Vec<Vec<f64>>> {
    use std::io::BufRead;

    let reader = crate::io::open_text(path)?;
    let mut rows = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        let row = line
            .split_whitespace()
            .map(|t| {
                t.parse::<f64>().map_err(|_| {
                    crate::error::AsmcError::format(path, i + 1, format!("bad value '{}'", t))
                })
            })
            .collect::<Result<Vec<f64>>>()?;
        rows.push(row);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_tables_written_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("run");
        let values = DecodingReturnValues {
            sum_over_pairs: array![[0.25, 0.75], [1.5, 0.5], [2.0, 0.0]],
            sum_over_pairs_00: None,
            sum_over_pairs_01: None,
            sum_over_pairs_11: None,
            sites: 3,
            states: 2,
            site_was_flipped: vec![false, true, false],
            pairs_decoded: 2,
            pairs_skipped: 0,
        };
        let paths = write_sums(&root, &values, true).unwrap();
        assert_eq!(paths.len(), 2);
        let rows = read_table(&paths[0]).unwrap();
        assert_eq!(rows, vec![vec![0.25, 0.75], vec![1.5, 0.5], vec![2.0, 0.0]]);
        let flipped = read_table(&paths[1]).unwrap();
        assert_eq!(flipped, vec![vec![1.0]]);
    }

    #[test]
    fn test_nothing_written_without_requested_tables() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("run");
        let values = DecodingReturnValues::new(3, 2, false, &[false; 3]);
        assert!(write_sums(&root, &values, false).unwrap().is_empty());
        assert!(!with_suffix(&root, SUMS_SUFFIX).exists());
    }
}
