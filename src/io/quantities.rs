//! # Decoding Quantities File
//!
//! Text format, optionally gzip-compressed (detected from the content):
//!
//! ```text
//! ASMC_DECODING_QUANTITIES 1
//! States
//! 8
//! CSFSSamples
//! 50
//! Discretization
//! 0 20 50 ...
//! ExpectedTimes
//! ...
//! InitialStateProb
//! ...
//! ClassicEmissionTable
//! <row for 0 derived>
//! <row for 1 derived>
//! <row for 2 derived>
//! CompressedEmissionTable
//! <hom row>
//! <het row>
//! Transitions
//! <distance> <D|B|U|R> <values>
//! CSFS arrayFolded
//! <undistinguished> <distinguished> <values>
//! ```
//!
//! `TimeVector` and `SizeVector` sections are optional.

use std::collections::BTreeMap;
use std::io::{BufRead, Write};
use std::path::Path;

use rustc_hash::FxHashMap;
use tracing::{debug, instrument};

use crate::config::DecodingMode;
use crate::error::{AsmcError, Result};
use crate::io::{create_text, open_text};
use crate::model::quantities::{CsfsTable, DecodingQuantities, QuantityParts, TransitionVectors};

pub const HEADER: &str = "ASMC_DECODING_QUANTITIES";
pub const VERSION: u32 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum Section {
    States,
    CsfsSamples,
    TimeVector,
    SizeVector,
    Discretization,
    ExpectedTimes,
    InitialStateProb,
    ClassicEmission,
    CompressedEmission,
    Transitions,
    Csfs(DecodingMode),
}

impl Section {
    fn parse(line: &str) -> Option<Self> {
        let mut tokens = line.split_whitespace();
        let name = tokens.next()?;
        let section = match name {
            "States" => Section::States,
            "CSFSSamples" => Section::CsfsSamples,
            "TimeVector" => Section::TimeVector,
            "SizeVector" => Section::SizeVector,
            "Discretization" => Section::Discretization,
            "ExpectedTimes" => Section::ExpectedTimes,
            "InitialStateProb" => Section::InitialStateProb,
            "ClassicEmissionTable" => Section::ClassicEmission,
            "CompressedEmissionTable" => Section::CompressedEmission,
            "Transitions" => Section::Transitions,
            "CSFS" => Section::Csfs(DecodingMode::from_name(tokens.next()?)?),
            _ => return None,
        };
        Some(section)
    }
}

fn fail(message: impl Into<String>) -> AsmcError {
    AsmcError::load("decoding quantities", message)
}

fn parse_values(line: &str, lineno: usize) -> Result<Vec<f32>> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    parse_tokens(&tokens, lineno)
}

fn parse_tokens(tokens: &[&str], lineno: usize) -> Result<Vec<f32>> {
    tokens
        .iter()
        .map(|t| {
            t.parse::<f32>()
                .map_err(|_| fail(format!("line {}: invalid number '{}'", lineno, t)))
        })
        .collect()
}

fn parse_scalar(rows: &[(usize, String)], name: &str) -> Result<usize> {
    match rows {
        [(lineno, line)] => line
            .trim()
            .parse()
            .map_err(|_| fail(format!("line {}: invalid {} value", lineno, name))),
        _ => Err(fail(format!("{} must hold exactly one value", name))),
    }
}

fn parse_vector(rows: &[(usize, String)], name: &str) -> Result<Vec<f32>> {
    match rows {
        [(lineno, line)] => parse_values(line, *lineno),
        _ => Err(fail(format!("{} must be a single row", name))),
    }
}

fn parse_table<const N: usize>(rows: &[(usize, String)], name: &str) -> Result<[Vec<f32>; N]> {
    if rows.len() != N {
        return Err(fail(format!("{} must have {} rows, found {}", name, N, rows.len())));
    }
    let mut out: [Vec<f32>; N] = std::array::from_fn(|_| Vec::new());
    for (slot, (lineno, line)) in out.iter_mut().zip(rows) {
        *slot = parse_values(line, *lineno)?;
    }
    Ok(out)
}

fn parse_transitions(rows: &[(usize, String)]) -> Result<Vec<(f32, TransitionVectors)>> {
    // BTreeMap over bit patterns keeps file order irrelevant and output deterministic
    let mut by_distance: BTreeMap<u32, TransitionVectors> = BTreeMap::new();
    for (lineno, line) in rows {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let [dist, kind, rest @ ..] = tokens.as_slice() else {
            return Err(fail(format!("line {}: expected '<distance> <D|B|U|R> <values>'", lineno)));
        };
        let distance: f32 = dist
            .parse()
            .map_err(|_| fail(format!("line {}: invalid distance '{}'", lineno, dist)))?;
        let values = parse_tokens(rest, *lineno)?;
        let entry = by_distance.entry(distance.to_bits()).or_default();
        let target = match *kind {
            "D" => &mut entry.d,
            "B" => &mut entry.b,
            "U" => &mut entry.u,
            "R" => &mut entry.r,
            other => {
                return Err(fail(format!(
                    "line {}: unknown transition vector '{}'",
                    lineno, other
                )))
            }
        };
        if !target.is_empty() {
            return Err(fail(format!(
                "line {}: duplicate {} vector for distance {}",
                lineno, kind, distance
            )));
        }
        *target = values;
    }
    Ok(by_distance
        .into_iter()
        .map(|(bits, v)| (f32::from_bits(bits), v))
        .collect())
}

fn parse_csfs(rows: &[(usize, String)], mode: DecodingMode) -> Result<CsfsTable> {
    let mut table: Vec<[Vec<f32>; 3]> = Vec::new();
    for (lineno, line) in rows {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let [u, d, rest @ ..] = tokens.as_slice() else {
            return Err(fail(format!(
                "line {}: expected '<undistinguished> <distinguished> <values>'",
                lineno
            )));
        };
        let (Ok(u), Ok(d)) = (u.parse::<usize>(), d.parse::<usize>()) else {
            return Err(fail(format!("line {}: invalid CSFS indices", lineno)));
        };
        if d > 2 {
            return Err(fail(format!(
                "line {}: distinguished count {} out of range in CSFS {}",
                lineno, d, mode
            )));
        }
        if table.len() <= u {
            table.resize_with(u + 1, Default::default);
        }
        table[u][d] = parse_tokens(rest, *lineno)?;
    }
    Ok(CsfsTable::new(table))
}

/// Read a decoding quantities file
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub fn read_decoding_quantities(path: &Path) -> Result<DecodingQuantities> {
    let reader = open_text(path)?;
    let mut lines = reader.lines().enumerate();

    match lines.next() {
        Some((_, Ok(first))) => {
            let mut tokens = first.split_whitespace();
            let version = match (tokens.next(), tokens.next()) {
                (Some(HEADER), Some(v)) => v.parse::<u32>().ok(),
                _ => None,
            };
            if version != Some(VERSION) {
                return Err(fail(format!(
                    "{} is not a version {} decoding quantities file",
                    path.display(),
                    VERSION
                )));
            }
        }
        Some((_, Err(e))) => return Err(e.into()),
        None => return Err(fail(format!("{} is empty", path.display()))),
    }

    let mut order: Vec<Section> = Vec::new();
    let mut sections: FxHashMap<Section, Vec<(usize, String)>> = FxHashMap::default();
    let mut current: Option<Section> = None;
    for (idx, line) in lines {
        let line = line?;
        let lineno = idx + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if is_section_header(trimmed) {
            let section = Section::parse(trimmed)
                .ok_or_else(|| fail(format!("line {}: unknown section '{}'", lineno, trimmed)))?;
            if sections.contains_key(&section) {
                return Err(fail(format!("line {}: duplicate section '{}'", lineno, trimmed)));
            }
            sections.insert(section, Vec::new());
            order.push(section);
            current = Some(section);
            continue;
        }
        let Some(section) = current else {
            return Err(fail(format!("line {}: data before the first section", lineno)));
        };
        if let Some(rows) = sections.get_mut(&section) {
            rows.push((lineno, trimmed.to_string()));
        }
    }

    let take = |s: Section| sections.get(&s).map(Vec::as_slice);
    let require = |s: Section, name: &str| {
        take(s).ok_or_else(|| fail(format!("missing mandatory section {}", name)))
    };

    let mut parts = QuantityParts {
        states: parse_scalar(require(Section::States, "States")?, "States")?,
        csfs_samples: parse_scalar(require(Section::CsfsSamples, "CSFSSamples")?, "CSFSSamples")?,
        discretization: parse_vector(
            require(Section::Discretization, "Discretization")?,
            "Discretization",
        )?,
        expected_times: parse_vector(
            require(Section::ExpectedTimes, "ExpectedTimes")?,
            "ExpectedTimes",
        )?,
        initial_state_prob: parse_vector(
            require(Section::InitialStateProb, "InitialStateProb")?,
            "InitialStateProb",
        )?,
        classic_emission_table: parse_table(
            require(Section::ClassicEmission, "ClassicEmissionTable")?,
            "ClassicEmissionTable",
        )?,
        compressed_emission_table: parse_table(
            require(Section::CompressedEmission, "CompressedEmissionTable")?,
            "CompressedEmissionTable",
        )?,
        transitions: parse_transitions(require(Section::Transitions, "Transitions")?)?,
        ..QuantityParts::default()
    };
    if let Some(rows) = take(Section::TimeVector) {
        parts.time_vector = parse_vector(rows, "TimeVector")?;
    }
    if let Some(rows) = take(Section::SizeVector) {
        parts.size_vector = parse_vector(rows, "SizeVector")?;
    }
    for section in &order {
        if let Section::Csfs(mode) = *section {
            if let Some(rows) = take(*section) {
                parts.csfs.push((mode, parse_csfs(rows, mode)?));
            }
        }
    }

    let dq = DecodingQuantities::from_parts(parts)?;
    debug!(
        states = dq.states(),
        csfs_samples = dq.csfs_samples(),
        transitions = dq.transitions().len(),
        "Loaded decoding quantities"
    );
    Ok(dq)
}

/// Every data row starts with a number; anything else opens a section
fn is_section_header(line: &str) -> bool {
    line.split_whitespace()
        .next()
        .is_some_and(|first| first.parse::<f32>().is_err())
}

fn write_row(out: &mut dyn Write, values: &[f32], buf: &mut ryu::Buffer) -> Result<()> {
    for (i, v) in values.iter().enumerate() {
        if i > 0 {
            out.write_all(b" ")?;
        }
        out.write_all(buf.format(*v).as_bytes())?;
    }
    out.write_all(b"\n")?;
    Ok(())
}

/// Write decoding quantities in the text format read by [`read_decoding_quantities`]
pub fn write_decoding_quantities(path: &Path, dq: &DecodingQuantities) -> Result<()> {
    let mut out = create_text(path)?;
    let mut buf = ryu::Buffer::new();

    writeln!(out, "{} {}", HEADER, VERSION)?;
    writeln!(out, "States\n{}", dq.states())?;
    writeln!(out, "CSFSSamples\n{}", dq.csfs_samples())?;
    if !dq.time_vector().is_empty() {
        writeln!(out, "TimeVector")?;
        write_row(&mut out, dq.time_vector(), &mut buf)?;
    }
    if !dq.size_vector().is_empty() {
        writeln!(out, "SizeVector")?;
        write_row(&mut out, dq.size_vector(), &mut buf)?;
    }
    writeln!(out, "Discretization")?;
    write_row(&mut out, dq.discretization(), &mut buf)?;
    writeln!(out, "ExpectedTimes")?;
    write_row(&mut out, dq.expected_times(), &mut buf)?;
    writeln!(out, "InitialStateProb")?;
    write_row(&mut out, dq.initial_state_prob(), &mut buf)?;
    writeln!(out, "ClassicEmissionTable")?;
    for row in dq.classic_emission() {
        write_row(&mut out, row, &mut buf)?;
    }
    writeln!(out, "CompressedEmissionTable")?;
    for row in dq.compressed_emission() {
        write_row(&mut out, row, &mut buf)?;
    }
    writeln!(out, "Transitions")?;
    for (distance, t) in dq.transitions() {
        for (kind, values) in [("D", &t.d), ("B", &t.b), ("U", &t.u), ("R", &t.r)] {
            write!(out, "{} {} ", buf.format(distance), kind)?;
            write_row(&mut out, values, &mut buf)?;
        }
    }
    for mode in DecodingMode::ALL {
        if let Some(table) = dq.csfs(mode) {
            writeln!(out, "CSFS {}", mode)?;
            for (u, row) in table.rows().iter().enumerate() {
                for (d, values) in row.iter().enumerate() {
                    write!(out, "{} {} ", u, d)?;
                    write_row(&mut out, values, &mut buf)?;
                }
            }
        }
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const MINIMAL: &str = "ASMC_DECODING_QUANTITIES 1
States
2
CSFSSamples
3
Discretization
0 10 1e9
ExpectedTimes
5 100
InitialStateProb
0.6 0.4
ClassicEmissionTable
0.9 0.8
0.1 0.2
0.05 0.1
CompressedEmissionTable
0.9 0.8
0.1 0.2
Transitions
0.001 D 0.99 0.98
0.001 B 0.005 0.01
0.001 U 0.004 0.0
0.001 R 1 1
CSFS arrayFolded
0 0 0.9 0.8
0 1 0.1 0.2
0 2 0.0 0.0
1 0 0.5 0.4
1 1 0.3 0.3
1 2 0.2 0.3
";

    #[test]
    fn test_read_minimal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dq.txt");
        fs::write(&path, MINIMAL).unwrap();

        let dq = read_decoding_quantities(&path).unwrap();
        assert_eq!(dq.states(), 2);
        assert_eq!(dq.csfs_samples(), 3);
        assert_eq!(dq.expected_times(), &[5.0, 100.0]);
        let t = dq.transition(0.001).unwrap();
        assert_eq!(t.b, vec![0.005, 0.01]);
        let csfs = dq.csfs(DecodingMode::ArrayFolded).unwrap();
        assert_eq!(csfs.len(), 2);
        assert_eq!(csfs.emission(1, 2), &[0.2, 0.3]);
    }

    #[test]
    fn test_write_then_read_gz() {
        let dir = tempfile::tempdir().unwrap();
        let txt = dir.path().join("dq.txt");
        fs::write(&txt, MINIMAL).unwrap();
        let dq = read_decoding_quantities(&txt).unwrap();

        let gz = dir.path().join("dq.decodingQuantities.gz");
        write_decoding_quantities(&gz, &dq).unwrap();
        let back = read_decoding_quantities(&gz).unwrap();
        assert_eq!(back.discretization(), dq.discretization());
        assert_eq!(back.transition(0.001), dq.transition(0.001));
        assert_eq!(
            back.csfs(DecodingMode::ArrayFolded),
            dq.csfs(DecodingMode::ArrayFolded)
        );
    }

    #[test]
    fn test_missing_section() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dq.txt");
        fs::write(&path, MINIMAL.replace("ExpectedTimes\n5 100\n", "")).unwrap();
        assert!(matches!(
            read_decoding_quantities(&path),
            Err(AsmcError::Load { .. })
        ));
    }

    #[test]
    fn test_unknown_section_and_bad_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dq.txt");
        fs::write(&path, MINIMAL.replace("Discretization", "Discretisation")).unwrap();
        assert!(read_decoding_quantities(&path).is_err());

        fs::write(&path, MINIMAL.replace("ASMC_DECODING_QUANTITIES 1", "SOMETHING 1")).unwrap();
        assert!(matches!(
            read_decoding_quantities(&path),
            Err(AsmcError::Load { .. })
        ));
    }
}
