use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use clap::Parser;
use orientation_tracker_rs::replay::{load_records, replay_offline, tags_in_order};
use orientation_tracker_rs::sink::{JsonLinesSink, TickSink};
use orientation_tracker_rs::PipelineConfig;
use serde_json::json;

/// Offline replay of recorded tag notifications (no timers, deterministic)
#[derive(Parser, Debug)]
struct Args {
    /// Path to a notification log (.jsonl or .jsonl.gz)
    #[arg(long, conflicts_with = "log_dir")]
    log: Option<PathBuf>,

    /// Directory of logs to batch replay
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Pipeline config (JSON); tags default to the log's order of appearance
    #[arg(long)]
    config: Option<PathBuf>,

    /// Filter gain override
    #[arg(long)]
    beta: Option<f64>,

    /// Sample period override (seconds)
    #[arg(long)]
    sample_period: Option<f64>,

    /// Write emitted ticks as publisher payload lines (single log only)
    #[arg(long)]
    ticks_out: Option<PathBuf>,
}

fn is_log(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    name.ends_with(".jsonl") || name.ends_with(".jsonl.gz")
}

fn base_config(args: &Args) -> anyhow::Result<PipelineConfig> {
    let mut config = match args.config.as_ref() {
        Some(path) => PipelineConfig::read(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(beta) = args.beta {
        config.beta = beta;
    }
    if let Some(period) = args.sample_period {
        config.sample_period = period;
    }
    Ok(config)
}

fn run_once(path: &Path, args: &Args) -> anyhow::Result<serde_json::Value> {
    let records = load_records(path)?;
    let mut config = base_config(args)?;
    if config.tags.is_empty() {
        config.tags = tags_in_order(&records);
    }

    let report = replay_offline(&records, &config)?;

    if let Some(out) = args.ticks_out.as_ref() {
        let mut sink =
            JsonLinesSink::new(BufWriter::new(File::create(out)?)).with_flush_every(u64::MAX);
        for tick in &report.ticks {
            sink.publish(tick)?;
        }
        sink.flush()?;
        log::info!("Wrote {} ticks to {}", sink.published(), out.display());
    }

    let final_yaw: Vec<Option<f64>> = report
        .final_snapshots
        .iter()
        .map(|s| s.yaw_degrees())
        .collect();
    let first_tick = report.ticks.first().map(|t| t.timestamp);

    Ok(json!({
        "log": path.display().to_string(),
        "records": records.len(),
        "tags": config.tags,
        "beta": config.beta,
        "sample_period": config.sample_period,
        "ticks_emitted": report.ticks.len(),
        "ticks_withheld": report.withheld,
        "first_tick_secs": first_tick,
        "rejected_payloads": report.rejected,
        "ignored_records": report.ignored,
        "final_yaw_deg": final_yaw,
    }))
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let mut results = Vec::new();

    if let Some(dir) = args.log_dir.as_ref() {
        if args.ticks_out.is_some() {
            anyhow::bail!("--ticks-out only applies to a single --log");
        }
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() || !is_log(&path) {
                continue;
            }
            match run_once(&path, &args) {
                Ok(res) => results.push(res),
                Err(e) => log::error!("Failed {}: {}", path.display(), e),
            }
        }
    } else if let Some(log) = args.log.as_ref() {
        results.push(run_once(log, &args)?);
    } else {
        anyhow::bail!("Provide --log or --log-dir");
    }

    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}
