//! # IBD Segment Output
//!
//! Segments go to `<out>.<jobInd>.<jobs>.<gasmc|asmc>.<ibd.gz|bibd>`
//! (`gasmc` when candidates came from GERMLINE).
//!
//! Text (gzip), one tab-separated line per segment:
//!
//! ```text
//! famA idA hapA famB idB hapB chrom start_bp end_bp length_cM score [post_mean] [map]
//! ```
//!
//! Binary:
//! - [Magic 8 bytes] "FSMCIBD1"
//! - [Version u32 LE]
//! - [Metadata Length u64 LE]
//! - [Metadata JSON] (run options, sample ids, chromosome, age columns)
//! - [Records] fixed 52-byte little-endian records until end of file

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::{with_suffix, DecodingParams};
use crate::data::haplotype::{HapSlot, SampleIdx};
use crate::data::panel::Data;
use crate::error::{AsmcError, Result};
use crate::io::create_text;
use crate::model::ibd::IbdSegment;

pub const MAGIC: &[u8; 8] = b"FSMCIBD1";
pub const VERSION: u32 = 1;
const RECORD_LEN: usize = 52;

/// Output path for the segments of one job
pub fn ibd_path(params: &DecodingParams) -> PathBuf {
    let method = if params.germline { "gasmc" } else { "asmc" };
    let ext = if params.bin_out { "bibd" } else { "ibd.gz" };
    with_suffix(
        &params.out_root(),
        &format!(".{}.{}.{}.{}", params.job_ind, params.jobs, method, ext),
    )
}

/// JSON header of the binary format
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct IbdHeader {
    /// Run options; non-finite floats are stored as null
    pub params: serde_json::Value,
    /// (family id, individual id) per individual index
    pub samples: Vec<(String, String)>,
    pub chrom: String,
    pub posterior_mean_age: bool,
    pub map_age: bool,
}

impl IbdHeader {
    pub fn new(params: &DecodingParams, data: &Data) -> Self {
        let samples = data.samples();
        let ids = (0..samples.len())
            .map(|i| {
                let idx = SampleIdx::from(i);
                (samples.family_id(idx).to_string(), samples[idx].to_string())
            })
            .collect();
        Self {
            params: serde_json::to_value(params).unwrap_or(serde_json::Value::Null),
            samples: ids,
            chrom: data
                .site_map()
                .first()
                .map(|s| s.chrom.clone())
                .unwrap_or_default(),
            posterior_mean_age: params.do_per_pair_posterior_mean,
            map_age: params.do_per_pair_map,
        }
    }
}

enum Sink {
    Text(Box<dyn Write + Send>),
    Binary(BufWriter<File>),
}

/// Segment writer for either format
pub struct IbdWriter {
    sink: Sink,
    header: IbdHeader,
    buf: ryu::Buffer,
    written: u64,
}

impl IbdWriter {
    pub fn create(path: &Path, binary: bool, header: IbdHeader) -> Result<Self> {
        let sink = if binary {
            let mut w = BufWriter::new(File::create(path)?);
            let json = serde_json::to_vec(&header).map_err(|e| {
                AsmcError::invalid_data(format!("cannot encode IBD header: {}", e))
            })?;
            w.write_all(MAGIC)?;
            w.write_all(&VERSION.to_le_bytes())?;
            w.write_all(&(json.len() as u64).to_le_bytes())?;
            w.write_all(&json)?;
            Sink::Binary(w)
        } else {
            Sink::Text(create_text(path)?)
        };
        Ok(Self {
            sink,
            header,
            buf: ryu::Buffer::new(),
            written: 0,
        })
    }

    pub fn write(&mut self, seg: &IbdSegment) -> Result<()> {
        match &mut self.sink {
            Sink::Text(out) => {
                let h = &self.header;
                let (fam_a, id_a) = &h.samples[seg.ind_a.as_usize()];
                let (fam_b, id_b) = &h.samples[seg.ind_b.as_usize()];
                write!(
                    out,
                    "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
                    fam_a,
                    id_a,
                    seg.hap_a,
                    fam_b,
                    id_b,
                    seg.hap_b,
                    h.chrom,
                    seg.start_bp,
                    seg.end_bp,
                    self.buf.format(seg.length_cm),
                    ryu::Buffer::new().format(seg.score),
                )?;
                for (wanted, value) in [
                    (h.posterior_mean_age, seg.posterior_mean_age),
                    (h.map_age, seg.map_age),
                ] {
                    if wanted {
                        let v = value.unwrap_or(f32::NAN);
                        if v.is_finite() {
                            write!(out, "\t{}", self.buf.format(v))?;
                        } else {
                            out.write_all(b"\tNA")?;
                        }
                    }
                }
                out.write_all(b"\n")?;
            }
            Sink::Binary(out) => out.write_all(&encode_record(seg))?,
        }
        self.written += 1;
        Ok(())
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn finish(self) -> Result<()> {
        match self.sink {
            Sink::Text(mut out) => out.flush()?,
            Sink::Binary(mut out) => out.flush()?,
        }
        Ok(())
    }
}

fn encode_record(seg: &IbdSegment) -> [u8; RECORD_LEN] {
    let mut rec = [0u8; RECORD_LEN];
    let mut at = 0;
    let mut put = |bytes: &[u8]| {
        rec[at..at + bytes.len()].copy_from_slice(bytes);
        at += bytes.len();
    };
    put(&seg.ind_a.0.to_le_bytes());
    put(&[seg.hap_a.number()]);
    put(&seg.ind_b.0.to_le_bytes());
    put(&[seg.hap_b.number()]);
    put(&(seg.start_site as u32).to_le_bytes());
    put(&(seg.end_site as u32).to_le_bytes());
    put(&seg.start_bp.to_le_bytes());
    put(&seg.end_bp.to_le_bytes());
    put(&seg.length_cm.to_le_bytes());
    put(&seg.score.to_le_bytes());
    put(&seg.posterior_mean_age.unwrap_or(f32::NAN).to_le_bytes());
    put(&seg.map_age.unwrap_or(f32::NAN).to_le_bytes());
    // 2 bytes of padding
    rec
}

fn decode_record(rec: &[u8; RECORD_LEN]) -> Result<IbdSegment> {
    let u32_at = |i: usize| u32::from_le_bytes([rec[i], rec[i + 1], rec[i + 2], rec[i + 3]]);
    let f32_at = |i: usize| f32::from_bits(u32_at(i));
    let u64_at = |i: usize| (u64::from(u32_at(i + 4)) << 32) | u64::from(u32_at(i));
    let age = |v: f32| if v.is_nan() { None } else { Some(v) };
    Ok(IbdSegment {
        ind_a: SampleIdx::new(u32_at(0)),
        hap_a: HapSlot::from_number(rec[4])?,
        ind_b: SampleIdx::new(u32_at(5)),
        hap_b: HapSlot::from_number(rec[9])?,
        start_site: u32_at(10) as usize,
        end_site: u32_at(14) as usize,
        start_bp: u64_at(18),
        end_bp: u64_at(26),
        length_cm: f32_at(34),
        score: f32_at(38),
        posterior_mean_age: age(f32_at(42)),
        map_age: age(f32_at(46)),
    })
}

/// Read a binary segment file
pub fn read_binary_ibd(path: &Path) -> Result<(IbdHeader, Vec<IbdSegment>)> {
    let mut reader = BufReader::new(File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => AsmcError::FileNotFound {
            path: path.to_path_buf(),
        },
        _ => AsmcError::Io(e),
    })?);
    let bad = |msg: String| AsmcError::load("binary IBD file", msg);

    let mut magic = [0u8; 8];
    reader.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(bad(format!("{} is not a binary IBD file", path.display())));
    }
    let mut word = [0u8; 4];
    reader.read_exact(&mut word)?;
    let version = u32::from_le_bytes(word);
    if version != VERSION {
        return Err(bad(format!("unsupported version {}", version)));
    }
    let mut len = [0u8; 8];
    reader.read_exact(&mut len)?;
    let mut json = vec![0u8; u64::from_le_bytes(len) as usize];
    reader.read_exact(&mut json)?;
    let header: IbdHeader =
        serde_json::from_slice(&json).map_err(|e| bad(format!("bad header: {}", e)))?;

    let mut body = Vec::new();
    reader.read_to_end(&mut body)?;
    if body.len() % RECORD_LEN != 0 {
        return Err(bad(format!(
            "{} trailing bytes after the last record",
            body.len() % RECORD_LEN
        )));
    }
    let segments = body
        .chunks_exact(RECORD_LEN)
        .map(|chunk| {
            let mut rec = [0u8; RECORD_LEN];
            rec.copy_from_slice(chunk);
            decode_record(&rec)
        })
        .collect::<Result<Vec<_>>>()?;
    Ok((header, segments))
}
