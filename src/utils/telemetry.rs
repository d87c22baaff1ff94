//! # Telemetry Blackboard
//!
//! Thread-safe progress tracking for decoding and IBD detection runs.
//! Uses atomic counters that can be cheaply updated from the decoder and
//! from rayon workers.
//!
//! Workers bump counters; a background heartbeat thread periodically reads
//! and reports them.

use std::io::{self, IsTerminal, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::warn;

/// Processing stage for high-level progress tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Stage {
    Initializing = 0,
    LoadingQuantities = 1,
    LoadingData = 2,
    Decoding = 3,
    CandidateSearch = 4,
    IbdDecoding = 5,
    WritingOutput = 6,
    Complete = 7,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Initializing => "Initializing",
            Stage::LoadingQuantities => "Loading Quantities",
            Stage::LoadingData => "Loading Data",
            Stage::Decoding => "Decoding",
            Stage::CandidateSearch => "Candidate Search",
            Stage::IbdDecoding => "IBD Decoding",
            Stage::WritingOutput => "Writing Output",
            Stage::Complete => "Complete",
        }
    }

    fn from_u64(val: u64) -> Self {
        match val {
            0 => Stage::Initializing,
            1 => Stage::LoadingQuantities,
            2 => Stage::LoadingData,
            3 => Stage::Decoding,
            4 => Stage::CandidateSearch,
            5 => Stage::IbdDecoding,
            6 => Stage::WritingOutput,
            _ => Stage::Complete,
        }
    }
}

/// Shared progress counters.
///
/// All fields use relaxed ordering: the heartbeat only needs approximate
/// values.
pub struct TelemetryBlackboard {
    stage: AtomicU64,

    total_pairs: AtomicU64,
    pairs_decoded: AtomicU64,
    pairs_skipped: AtomicU64,

    candidates: AtomicU64,
    segments: AtomicU64,

    start_time: Instant,
    last_progress_nanos: AtomicU64,

    shutdown: AtomicBool,
}

impl TelemetryBlackboard {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[inline]
    pub fn set_stage(&self, stage: Stage) {
        self.stage.store(stage as u64, Ordering::Relaxed);
        self.touch_progress();
    }

    #[inline]
    pub fn stage(&self) -> Stage {
        Stage::from_u64(self.stage.load(Ordering::Relaxed))
    }

    /// Haplotype pairs expected in the current stage
    pub fn set_total_pairs(&self, total: u64) {
        self.total_pairs.store(total, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_decoded(&self, n: u64) {
        self.pairs_decoded.fetch_add(n, Ordering::Relaxed);
        self.touch_progress();
    }

    #[inline]
    pub fn add_skipped(&self, n: u64) {
        self.pairs_skipped.fetch_add(n, Ordering::Relaxed);
        self.touch_progress();
    }

    pub fn add_candidates(&self, n: u64) {
        self.candidates.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_segments(&self, n: u64) {
        self.segments.fetch_add(n, Ordering::Relaxed);
    }

    pub fn pairs_decoded(&self) -> u64 {
        self.pairs_decoded.load(Ordering::Relaxed)
    }

    pub fn pairs_skipped(&self) -> u64 {
        self.pairs_skipped.load(Ordering::Relaxed)
    }

    #[inline]
    fn touch_progress(&self) {
        let elapsed = self.start_time.elapsed().as_nanos() as u64;
        self.last_progress_nanos.store(elapsed, Ordering::Relaxed);
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }

    fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            stage: self.stage(),
            total_pairs: self.total_pairs.load(Ordering::Relaxed),
            pairs_decoded: self.pairs_decoded.load(Ordering::Relaxed),
            pairs_skipped: self.pairs_skipped.load(Ordering::Relaxed),
            candidates: self.candidates.load(Ordering::Relaxed),
            segments: self.segments.load(Ordering::Relaxed),
            elapsed_secs: self.elapsed_secs(),
            last_progress_nanos: self.last_progress_nanos.load(Ordering::Relaxed),
            current_nanos: self.start_time.elapsed().as_nanos() as u64,
        }
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn signal_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

impl Default for TelemetryBlackboard {
    fn default() -> Self {
        Self {
            stage: AtomicU64::new(Stage::Initializing as u64),
            total_pairs: AtomicU64::new(0),
            pairs_decoded: AtomicU64::new(0),
            pairs_skipped: AtomicU64::new(0),
            candidates: AtomicU64::new(0),
            segments: AtomicU64::new(0),
            start_time: Instant::now(),
            last_progress_nanos: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
        }
    }
}

struct TelemetrySnapshot {
    stage: Stage,
    total_pairs: u64,
    pairs_decoded: u64,
    pairs_skipped: u64,
    candidates: u64,
    segments: u64,
    elapsed_secs: f64,
    last_progress_nanos: u64,
    current_nanos: u64,
}

impl TelemetrySnapshot {
    fn pairs_done(&self) -> u64 {
        self.pairs_decoded + self.pairs_skipped
    }
}

/// Heartbeat output configuration
pub struct HeartbeatConfig {
    /// Interval between heartbeats (seconds)
    pub interval_secs: u64,
    /// Stall warning threshold (seconds with no progress)
    pub stall_threshold_secs: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            stall_threshold_secs: 300,
        }
    }
}

/// Handle to the heartbeat thread
pub struct HeartbeatHandle {
    handle: Option<JoinHandle<()>>,
    blackboard: Arc<TelemetryBlackboard>,
}

impl HeartbeatHandle {
    /// Spawn the heartbeat thread. If the thread cannot be created the run
    /// continues without progress reports.
    pub fn spawn(blackboard: Arc<TelemetryBlackboard>, config: HeartbeatConfig) -> Self {
        let bb = blackboard.clone();
        let is_tty = io::stderr().is_terminal();

        let handle = thread::Builder::new()
            .name("heartbeat".to_string())
            .spawn(move || {
                heartbeat_loop(bb, config, is_tty);
            });
        let handle = match handle {
            Ok(h) => Some(h),
            Err(e) => {
                warn!("Failed to spawn heartbeat thread: {}", e);
                None
            }
        };

        Self { handle, blackboard }
    }

    /// Signal shutdown and wait for the thread to finish
    pub fn shutdown(mut self) {
        self.blackboard.signal_shutdown();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for HeartbeatHandle {
    fn drop(&mut self) {
        self.blackboard.signal_shutdown();
    }
}

/// RSS in MB (Linux only)
fn get_rss_mb() -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string("/proc/self/statm")
            .ok()
            .and_then(|s| {
                let parts: Vec<&str> = s.split_whitespace().collect();
                // Second field is RSS in pages
                parts.get(1)?.parse::<u64>().ok()
            })
            .map(|pages| pages * 4096 / (1024 * 1024))
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

/// Format duration in human-readable form
fn format_duration(secs: f64) -> String {
    if secs < 60.0 {
        format!("{:.0}s", secs)
    } else if secs < 3600.0 {
        let mins = (secs / 60.0).floor();
        let remaining_secs = secs % 60.0;
        format!("{:.0}m{:.0}s", mins, remaining_secs)
    } else {
        format!("{:.1}h", secs / 3600.0)
    }
}

fn heartbeat_loop(bb: Arc<TelemetryBlackboard>, config: HeartbeatConfig, is_tty: bool) {
    let tick = Duration::from_millis(250);
    let interval = Duration::from_secs(config.interval_secs);
    let mut last_pairs = 0u64;
    let mut last_time = Instant::now();
    let mut last_report = Instant::now();

    loop {
        thread::sleep(tick);
        if bb.is_shutdown() {
            break;
        }
        if last_report.elapsed() < interval {
            continue;
        }
        last_report = Instant::now();

        let snap = bb.snapshot();

        let now = Instant::now();
        let dt = now.duration_since(last_time).as_secs_f64();
        let velocity = if dt > 0.1 {
            snap.pairs_done().saturating_sub(last_pairs) as f64 / dt
        } else {
            0.0
        };
        last_pairs = snap.pairs_done();
        last_time = now;

        let eta_str = if velocity > 0.0 && snap.total_pairs > snap.pairs_done() {
            format_duration((snap.total_pairs - snap.pairs_done()) as f64 / velocity)
        } else {
            "unknown".to_string()
        };

        let stall_secs =
            (snap.current_nanos.saturating_sub(snap.last_progress_nanos)) / 1_000_000_000;
        let is_stalled = stall_secs > config.stall_threshold_secs;

        let rss_mb = get_rss_mb();

        if is_tty {
            print_tty_progress(&snap, &eta_str, rss_mb, velocity, is_stalled);
        } else {
            print_log_progress(&snap, &eta_str, rss_mb, velocity, is_stalled);
        }
    }

    if is_tty {
        eprint!("\r\x1b[K");
        let _ = io::stderr().flush();
    }
}

/// Progress for a terminal (rewrites a single line)
fn print_tty_progress(
    snap: &TelemetrySnapshot,
    eta: &str,
    rss_mb: Option<u64>,
    velocity: f64,
    is_stalled: bool,
) {
    let progress_pct = if snap.total_pairs > 0 {
        (snap.pairs_done() as f64 / snap.total_pairs as f64 * 100.0).min(100.0)
    } else {
        0.0
    };

    let bar_width = 20;
    let filled = ((progress_pct / 100.0) * bar_width as f64) as usize;
    let bar: String = "=".repeat(filled.min(bar_width))
        + &" ".repeat(bar_width.saturating_sub(filled));

    let ibd_str = if snap.candidates > 0 || snap.segments > 0 {
        format!(" C{} S{}", snap.candidates, snap.segments)
    } else {
        String::new()
    };
    let mem_str = rss_mb.map(|mb| format!(" {}MB", mb)).unwrap_or_default();
    let stall_str = if is_stalled { " [STALLED]" } else { "" };

    eprint!(
        "\r[{}] {:>5.1}% | {} P{}/{}{} | {:.0} pairs/s | {} | ETA: {}{}{}    \x1b[K",
        bar,
        progress_pct,
        snap.stage.as_str(),
        snap.pairs_done(),
        snap.total_pairs,
        ibd_str,
        velocity,
        format_duration(snap.elapsed_secs),
        eta,
        mem_str,
        stall_str
    );
    let _ = io::stderr().flush();
}

/// Progress as a structured log line
fn print_log_progress(
    snap: &TelemetrySnapshot,
    eta: &str,
    rss_mb: Option<u64>,
    velocity: f64,
    is_stalled: bool,
) {
    eprintln!(
        "[HEARTBEAT] stage=\"{}\" pairs={}/{} skipped={} candidates={} segments={} \
         velocity={:.0}/s elapsed={:.0}s eta={} rss_mb={} stalled={}",
        snap.stage.as_str(),
        snap.pairs_done(),
        snap.total_pairs,
        snap.pairs_skipped,
        snap.candidates,
        snap.segments,
        velocity,
        snap.elapsed_secs,
        eta,
        rss_mb
            .map(|m| m.to_string())
            .unwrap_or_else(|| "?".to_string()),
        is_stalled
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_roundtrip() {
        for stage in [
            Stage::Initializing,
            Stage::LoadingQuantities,
            Stage::LoadingData,
            Stage::Decoding,
            Stage::CandidateSearch,
            Stage::IbdDecoding,
            Stage::WritingOutput,
            Stage::Complete,
        ] {
            assert_eq!(Stage::from_u64(stage as u64), stage);
        }
    }

    #[test]
    fn test_blackboard_updates() {
        let bb = TelemetryBlackboard::new();
        bb.set_stage(Stage::Decoding);
        bb.set_total_pairs(10);
        bb.add_decoded(4);
        bb.add_skipped(1);
        assert_eq!(bb.stage(), Stage::Decoding);
        assert_eq!(bb.snapshot().pairs_done(), 5);
        assert_eq!(bb.pairs_skipped(), 1);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(30.0), "30s");
        assert_eq!(format_duration(90.0), "1m30s");
        assert_eq!(format_duration(3661.0), "1.0h");
    }

    #[test]
    fn test_heartbeat_shuts_down() {
        let bb = TelemetryBlackboard::new();
        let hb = HeartbeatHandle::spawn(bb, HeartbeatConfig::default());
        hb.shutdown();
    }
}
