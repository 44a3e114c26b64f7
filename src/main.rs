use std::fs::File;

use anyhow::Context;
use clap::Parser;
use crossbeam_channel::bounded;
use tracing::info;

use cxcap::{
    args::{convert_filter, Args},
    capture::{run_relay, ChunkReader, IntervalScheduler},
    control::GainPort,
    CaptureConfig,
};

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_max_level(convert_filter(args.verbose.log_level_filter()))
        .init();

    let mut cfg = CaptureConfig::new(&args.device);
    cfg.check_interval = args.check_interval;
    let port = GainPort::new(&args.device);

    // Program the requested starting level before the stream opens
    if let Some(level) = args.level {
        port.write_level(level)
            .with_context(|| format!("failed to set gain level on {}", args.device))?;
    }

    let width = port
        .sample_width()
        .with_context(|| format!("no sysfs parameters for {}", args.device))?;
    let tolerance = cfg.clip_tolerance();
    println!(
        "Clip tolerance: {tolerance} Sample width: {} bit",
        width.bits()
    );

    let source = File::open(&cfg.device_path)
        .with_context(|| format!("{} not found", cfg.device_path.display()))?;
    let sink = File::create(&args.output)
        .with_context(|| format!("failed to create {}", args.output.display()))?;

    let (stop_tx, stop_rx) = bounded(1);
    ctrlc::set_handler(move || {
        let _ = stop_tx.try_send(());
    })
    .context("failed to install the interrupt handler")?;

    info!(
        device = %cfg.device_path.display(),
        output = %args.output.display(),
        "starting capture"
    );
    let stats = run_relay(
        ChunkReader::new(source, cfg.chunk_size),
        sink,
        IntervalScheduler::new(cfg.check_interval),
        width,
        port,
        tolerance,
        stop_rx,
    )?;
    println!(
        "Capture complete: {} bytes in {} chunks",
        stats.bytes, stats.chunks
    );
    Ok(())
}
