//! mmWave vehicular sidelink simulator
//!
//! Runs one scenario file through the sidelink session and reports per-vehicle
//! statistics.

mod config;
mod scenario;

use anyhow::{Context, Result};
use clap::Parser;
use config::ScenarioConfig;
use layers::trace::{PacketTrace, SchedulingTrace, SinrReport};
use layers::SidelinkNetwork;
use serde::Serialize;
use std::cell::RefCell;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Scenario file (TOML or YAML)
    #[arg(short, long, default_value = "scenario.toml")]
    config: PathBuf,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Override the scenario seed
    #[arg(long)]
    seed: Option<u64>,

    /// Override the simulated duration in milliseconds
    #[arg(long)]
    duration_ms: Option<u64>,

    /// Write scheduling, SINR and packet traces as JSON lines
    #[arg(long)]
    trace_file: Option<PathBuf>,
}

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum TraceLine<'a> {
    Scheduling(&'a SchedulingTrace),
    Sinr(&'a SinrReport),
    TxPacket(&'a PacketTrace),
    RxPacket(&'a PacketTrace),
}

type SharedWriter = Rc<RefCell<BufWriter<File>>>;

fn write_line(writer: &SharedWriter, line: TraceLine<'_>) {
    let mut writer = writer.borrow_mut();
    let result = serde_json::to_writer(&mut *writer, &line)
        .map_err(std::io::Error::from)
        .and_then(|_| writer.write_all(b"\n"));
    if let Err(e) = result {
        warn!("Failed to write trace: {}", e);
    }
}

fn attach_trace_file(network: &mut SidelinkNetwork, path: &Path) -> Result<SharedWriter> {
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let writer: SharedWriter = Rc::new(RefCell::new(BufWriter::new(file)));
    let traces = network.traces_mut();

    let w = writer.clone();
    traces.connect_scheduling(move |record| write_line(&w, TraceLine::Scheduling(record)));
    let w = writer.clone();
    traces.connect_sinr(move |record| write_line(&w, TraceLine::Sinr(record)));
    let w = writer.clone();
    traces.connect_tx_packet(move |record| write_line(&w, TraceLine::TxPacket(record)));
    let w = writer.clone();
    traces.connect_rx_packet(move |record| write_line(&w, TraceLine::RxPacket(record)));

    info!("Writing traces to {}", path.display());
    Ok(writer)
}

fn report(network: &SidelinkNetwork) {
    info!("Per-vehicle statistics:");
    let (mut sent, mut received) = (0u64, 0u64);
    for device in network.devices() {
        let stats = device.stats();
        let sinr = stats
            .mean_sinr_db()
            .map(|sinr| format!("{:.2} dB", sinr))
            .unwrap_or_else(|| "n/a".to_string());
        info!(
            "  {} (RNTI {}): tx {} pkts / {} B, dropped {}, rx {} pkts / {} B, blocks {} ok / {} corrupted, mean SINR {}",
            device.node(),
            device.rnti(),
            stats.tx_packets,
            stats.tx_bytes,
            stats.dropped_packets,
            stats.rx_packets,
            stats.rx_bytes,
            stats.decoded_blocks,
            stats.corrupted_blocks,
            sinr
        );
        sent += stats.tx_packets;
        received += stats.rx_packets;
    }
    if sent > 0 {
        info!(
            "Delivered {} of {} packets ({:.1}%)",
            received,
            sent,
            100.0 * received as f64 / sent as f64
        );
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_line_number(true)
        .init();

    info!("Starting mmWave sidelink simulator");
    info!("Loading scenario from {}", args.config.display());
    let mut config = ScenarioConfig::from_file(&args.config)?;
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(duration_ms) = args.duration_ms {
        config.duration_ms = duration_ms;
    }

    info!("Configuration:");
    info!("  Seed: {}", config.seed);
    info!("  Duration: {} ms", config.duration_ms);
    info!(
        "  Carrier: {} GHz, {} MHz, numerology {}",
        config.carrier.center_frequency_ghz, config.carrier.bandwidth_mhz, config.carrier.numerology
    );
    info!("  Scenario: {:?}, beamforming {}", config.channel.scenario, config.channel.beamforming);

    let mut network = scenario::build_network(&config)?;
    let writer = args
        .trace_file
        .as_deref()
        .map(|path| attach_trace_file(&mut network, path))
        .transpose()?;

    network
        .run_until(config.duration())
        .context("Simulation aborted")?;
    info!("Simulation finished at {:?}", network.now());

    if let Some(writer) = writer {
        writer.borrow_mut().flush().context("Failed to flush traces")?;
    }
    report(&network);
    Ok(())
}
