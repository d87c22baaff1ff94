//! # I/O Module
//!
//! File reading/writing boundaries: the haplotype panel, the decoding
//! quantities table, and the output writers for posterior sums, per-pair
//! summaries and IBD segments. Text inputs may be gzip-compressed; outputs
//! ending in `.gz` are compressed.

pub mod haps;
pub mod ibd;
pub mod per_pair;
pub mod quantities;
pub mod sums;

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::{AsmcError, Result};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const BUFFER_SIZE: usize = 1 << 16;

/// Open a text file for line reading, decompressing when it starts with the gzip magic
pub fn open_text(path: &Path) -> Result<Box<dyn BufRead>> {
    let file = File::open(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => AsmcError::FileNotFound {
            path: path.to_path_buf(),
        },
        _ => AsmcError::Io(e),
    })?;
    let mut reader = BufReader::with_capacity(BUFFER_SIZE, file);
    let is_gzip = reader.fill_buf()?.starts_with(&GZIP_MAGIC);
    if is_gzip {
        Ok(Box::new(BufReader::with_capacity(
            BUFFER_SIZE,
            MultiGzDecoder::new(reader),
        )))
    } else {
        Ok(Box::new(reader))
    }
}

/// Create a text output file, gzip-compressed when the name ends in `.gz`
pub fn create_text(path: &Path) -> Result<Box<dyn Write + Send>> {
    let file = File::create(path)?;
    let writer = BufWriter::with_capacity(BUFFER_SIZE, file);
    if path.extension().and_then(|s| s.to_str()) == Some("gz") {
        Ok(Box::new(GzEncoder::new(writer, Compression::default())))
    } else {
        Ok(Box::new(writer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gzip_round_trip_by_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lines.gz");
        {
            let mut w = create_text(&path).unwrap();
            writeln!(w, "first").unwrap();
            writeln!(w, "second").unwrap();
        }
        // Renamed without the extension: detection must use the content
        let renamed = dir.path().join("lines.txt");
        std::fs::rename(&path, &renamed).unwrap();

        let lines: Vec<String> = open_text(&renamed)
            .unwrap()
            .lines()
            .collect::<std::io::Result<_>>()
            .unwrap();
        assert_eq!(lines, vec!["first", "second"]);
    }

    #[test]
    fn test_missing_file() {
        let err = open_text(Path::new("/nonexistent/file.hap")).err().unwrap();
        assert!(matches!(err, AsmcError::FileNotFound { .. }));
    }
}
