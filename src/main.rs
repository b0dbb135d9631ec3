use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use log::{info, warn};
use tokio::time::{sleep, Duration};

use orientation_tracker_rs::replay::{load_records, save_records, tags_in_order, ReplaySource};
use orientation_tracker_rs::sim::SimulatedSource;
use orientation_tracker_rs::sink::JsonLinesSink;
use orientation_tracker_rs::source::NotificationSource;
use orientation_tracker_rs::{PipelineConfig, PipelineScheduler};

#[derive(Parser, Debug)]
#[command(name = "orientation_tracker")]
#[command(about = "Multi-tag Madgwick orientation tracker", long_about = None)]
struct Args {
    /// Duration in seconds (0 = until Ctrl-C, or until the replay log ends)
    #[arg(value_name = "SECONDS", default_value = "0")]
    duration: u64,

    /// Pipeline config (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Tag identifier, in output order (repeatable)
    #[arg(long = "tag")]
    tags: Vec<String>,

    /// Filter gain
    #[arg(long)]
    beta: Option<f64>,

    /// Seconds between fusion ticks
    #[arg(long)]
    sample_period: Option<f64>,

    /// Replay a recorded notification log in real time instead of simulating
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Turn rate of simulated tags (deg/s)
    #[arg(long, default_value = "10.0")]
    yaw_rate: f64,

    /// Write a synthetic log of SECONDS (default 10) to this path and exit
    #[arg(long, conflicts_with = "replay")]
    record: Option<PathBuf>,

    /// Live status file, refreshed every 2 seconds
    #[arg(long)]
    status_file: Option<PathBuf>,
}

const DEFAULT_SIM_TAGS: [&str; 3] = ["tag-1", "tag-2", "tag-3"];

fn simulated_source(tags: &[String], yaw_rate: f64, movement_period: Duration) -> SimulatedSource {
    tags.iter()
        .enumerate()
        .fold(SimulatedSource::new(movement_period), |source, (i, tag)| {
            source.with_tag(tag, i as f64 * 30.0, yaw_rate)
        })
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = match args.config.as_ref() {
        Some(path) => PipelineConfig::read(path)?,
        None => PipelineConfig::default(),
    };
    if !args.tags.is_empty() {
        config.tags = args.tags.clone();
    }
    if let Some(beta) = args.beta {
        config.beta = beta;
    }
    if let Some(period) = args.sample_period {
        config.sample_period = period;
    }

    let replay_records = match args.replay.as_ref() {
        Some(path) => Some(load_records(path)?),
        None => None,
    };
    if config.tags.is_empty() {
        config.tags = match replay_records.as_ref() {
            Some(records) => tags_in_order(records),
            None => DEFAULT_SIM_TAGS.iter().map(|t| t.to_string()).collect(),
        };
    }
    config.validate()?;

    let movement_period = Duration::from_millis(10 * u64::from(config.movement.period_10ms.max(1)));

    if let Some(path) = args.record.as_ref() {
        let seconds = if args.duration > 0 { args.duration } else { 10 };
        let source = simulated_source(&config.tags, args.yaw_rate, movement_period);
        let records = source.synthesize_records(&config.tags, seconds as f64);
        save_records(path, &records)?;
        info!("Wrote {} records ({}s) to {}", records.len(), seconds, path.display());
        return Ok(());
    }

    info!("[{}] Orientation Tracker Starting", ts_now());
    info!("  Tags: {}", config.tags.join(", "));
    info!("  Duration: {} seconds (0=continuous)", args.duration);
    info!("  Beta: {}  Period: {:.3}s", config.beta, config.sample_period);
    info!(
        "  Movement control: {:02x?}  period: {:02x?}",
        config.movement.control_payload(),
        config.movement.period_payload()
    );

    let mut limit = (args.duration > 0).then(|| Duration::from_secs(args.duration));
    let source: Arc<dyn NotificationSource> = match replay_records {
        Some(records) => {
            let source = ReplaySource::new(records);
            // Stop shortly after the log runs out
            let log_end = source.duration() + Duration::from_secs(1);
            limit = Some(limit.map_or(log_end, |l| l.min(log_end)));
            info!("  Replaying {}", args.replay.as_ref().map(|p| p.display().to_string()).unwrap_or_default());
            Arc::new(source)
        }
        None => Arc::new(simulated_source(&config.tags, args.yaw_rate, movement_period)),
    };

    // About one flush per second at the default period
    let sink = JsonLinesSink::new(BufWriter::new(std::io::stdout())).with_flush_every(10);
    let scheduler = PipelineScheduler::new(config, source, Box::new(sink));

    // Update live status every 2 seconds
    if let Some(path) = args.status_file.clone() {
        let status = scheduler.status();
        tokio::spawn(async move {
            loop {
                sleep(Duration::from_secs(2)).await;
                let snapshot = status.borrow().clone();
                if let Err(e) = snapshot.save(&path) {
                    warn!("Failed to write status file {}: {}", path.display(), e);
                }
            }
        });
    }

    let shutdown = async move {
        match limit {
            Some(limit) => {
                tokio::select! {
                    _ = sleep(limit) => info!("[{}] Duration reached, stopping...", ts_now()),
                    _ = tokio::signal::ctrl_c() => info!("[{}] Interrupted, stopping...", ts_now()),
                }
            }
            None => {
                let _ = tokio::signal::ctrl_c().await;
                info!("[{}] Interrupted, stopping...", ts_now());
            }
        }
    };

    let summary = scheduler.run_until(shutdown).await?;

    if let Some(path) = args.status_file.as_ref() {
        summary.status.save(path)?;
    }

    info!("=== Final Stats ===");
    info!("Ticks emitted: {}", summary.ticks_emitted);
    info!("Ticks withheld (warm-up): {}", summary.ticks_withheld);
    info!("Ticks dropped: {}", summary.ticks_dropped);
    for tag in &summary.status.tags {
        info!(
            "  {}: {:?}, yaw {}, {} notifications, {} rejected, {} reconnect(s)",
            tag.tag_id,
            tag.status,
            tag.yaw_degrees
                .map(|y| format!("{:.2}°", y))
                .unwrap_or_else(|| "-".to_string()),
            tag.notifications,
            tag.rejected,
            tag.reconnects
        );
    }

    Ok(())
}

fn ts_now() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}
