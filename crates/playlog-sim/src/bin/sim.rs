#![forbid(unsafe_code)]

use std::env;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use playlog_sim::campaign::{CampaignConfig, replay_seed, run_campaign};
use playlog_sim::VisitOutcome;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Run deterministic reconciliation campaigns.
#[derive(Parser, Debug)]
#[command(name = "playlog-sim", version)]
struct Args {
    /// First seed of the campaign.
    #[arg(long, default_value_t = 0)]
    seed_start: u64,

    /// Number of seeds to run.
    #[arg(long, default_value_t = 100)]
    seeds: u64,

    /// Simulated days per seed.
    #[arg(long)]
    days: Option<u32>,

    /// Replay one seed and print its visit trace instead of running a campaign.
    #[arg(long, value_name = "SEED")]
    replay: Option<u64>,

    /// Print the report as JSON.
    #[arg(long)]
    json: bool,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("PLAYLOG_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "playlog_sim=debug,playlog_core=debug"
        } else {
            "playlog_sim=info,warn"
        })
    });

    let format = env::var("PLAYLOG_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());
    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn main() -> Result<ExitCode> {
    init_tracing();
    let args = Args::parse();

    let mut config = CampaignConfig {
        seed_range: args.seed_start..args.seed_start.saturating_add(args.seeds),
        ..CampaignConfig::default()
    };
    if let Some(days) = args.days {
        config.days = days;
    }

    if let Some(seed) = args.replay {
        let trace = replay_seed(seed, &config)?;
        for visit in &trace.result.visits {
            println!(
                "day={} visit={} profile={:?} outcome={:?} watermark={} -> {}",
                visit.day,
                visit.visit,
                visit.profile,
                visit.outcome,
                visit.watermark_before,
                visit.watermark_after
            );
        }
        println!(
            "seed {seed}: updated={} no_update={} passed={}",
            trace.result.count(VisitOutcome::Updated),
            trace.result.count(VisitOutcome::NoUpdate),
            trace.oracle.passed
        );
        for violation in &trace.oracle.violations {
            println!("  {violation:?}");
        }
        return Ok(if trace.oracle.passed {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        });
    }

    let report = run_campaign(&config)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "campaign complete: seeds={} passed={} interesting={} first_failure={:?}",
            report.seeds_run,
            report.seeds_passed,
            report.interesting_states_reached,
            report.first_failure
        );
        for failure in &report.failures {
            for violation in &failure.violations {
                println!("  seed {}: {violation}", failure.seed);
            }
        }
    }

    Ok(if report.all_passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
