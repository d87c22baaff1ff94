//! # asmc: Coalescence-Time Decoding and IBD Detection
//!
//! ## Usage
//! ```bash
//! # Posterior sums over all pairs, job 1 of 10
//! asmc decode --in-file-root panel --posterior-sums --jobs 10 --job-ind 1
//!
//! # Per-pair posterior means for pairs within individuals
//! asmc decode --in-file-root panel --within-only --per-pair-posterior-means
//!
//! # IBD segments from GERMLINE candidates, binary output
//! asmc fastsmc --in-file-root panel --map panel.map.gz --germline --bin
//!
//! # With span timings
//! asmc --profile fastsmc --in-file-root panel
//! ```

use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use asmc::config::{Cli, Commands};
use asmc::pipelines::{AsmcPipeline, FastSmcPipeline};
use asmc::utils::telemetry::{HeartbeatConfig, HeartbeatHandle, Stage, TelemetryBlackboard};
use asmc::utils::threading::init_global_pool;

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

/// Initialize the tracing subscriber; span close events only when profiling
fn init_logging(profile: bool) {
    use tracing_subscriber::fmt::format::FmtSpan;
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let span_events = if profile {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_span_events(span_events)
                .with_target(false)
                .with_timer(fmt::time::uptime()),
        )
        .init();
}

fn run() -> Result<()> {
    let start = Instant::now();
    let cli = Cli::parse();

    init_logging(cli.profile);
    if cli.profile {
        eprintln!("=== Profiling enabled ===\n");
    }

    let n_threads = init_global_pool(cli.threads).context("configuring the thread pool")?;
    eprintln!("asmc v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("Threads: {}", n_threads);

    let telemetry = TelemetryBlackboard::new();
    let heartbeat = HeartbeatHandle::spawn(telemetry.clone(), HeartbeatConfig::default());
    telemetry.set_stage(Stage::Initializing);

    match cli.command {
        Commands::Decode(args) => {
            let params = args.into_params().context("invalid decoding options")?;
            eprintln!("Mode: ASMC ({})", params.decoding_mode);
            eprintln!("Input: {}", params.in_file_root.display());

            let values = AsmcPipeline::new(params)
                .with_telemetry(telemetry.clone())
                .run()
                .context("decoding job failed")?;
            info!(
                decoded = values.pairs_decoded,
                skipped = values.pairs_skipped,
                "Done"
            );
        }
        Commands::Fastsmc(args) => {
            let params = args.into_params().context("invalid FastSMC options")?;
            eprintln!("Mode: FastSMC ({})", params.decoding_mode);
            eprintln!("Input: {}", params.in_file_root.display());

            let report = FastSmcPipeline::new(params)
                .with_telemetry(telemetry.clone())
                .run()
                .context("FastSMC run failed")?;
            info!(
                candidates = report.candidates,
                segments = report.segments.len(),
                "Done"
            );
        }
    }

    telemetry.set_stage(Stage::Complete);
    heartbeat.shutdown();

    eprintln!("\nCompleted in {:.2}s", start.elapsed().as_secs_f64());
    Ok(())
}

#[cfg(test)]
mod tests {
    use asmc::{config, data, error, io, model, pipelines};

    #[test]
    fn test_module_imports() {
        let _ = config::DecodingParams::process_options;
        let _ = error::AsmcError::config("test");
        let _ = data::haplotype::SampleIdx::new;
        let _ = io::quantities::read_decoding_quantities;
        let _ = model::sharding::PairShard::new;
        let _ = pipelines::AsmcPipeline::new;
    }

    #[test]
    fn test_cli_parses_subcommands() {
        use clap::Parser;
        let cli = config::Cli::try_parse_from([
            "asmc",
            "--threads",
            "2",
            "fastsmc",
            "--in-file-root",
            "panel",
            "--germline",
            "--recall",
            "1",
        ])
        .unwrap();
        assert_eq!(cli.threads, Some(2));
        match cli.command {
            config::Commands::Fastsmc(args) => {
                assert!(args.germline);
                assert_eq!(args.recall, 1);
            }
            _ => panic!("expected fastsmc"),
        }
    }
}
