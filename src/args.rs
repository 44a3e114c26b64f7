//! Argument parsing for running from the command line

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// File the raw capture stream is written to (created or truncated)
    pub output: PathBuf,
    /// cxadc device to capture from, as named under /dev and /sys/class/cxadc
    #[clap(short, long, default_value = "cxadc0")]
    #[clap(value_parser = valid_device_name)]
    pub device: String,
    /// Gain level to program into the card before capture starts
    #[clap(short, long)]
    #[clap(value_parser = clap::value_parser!(i64).range(0..=31))]
    pub level: Option<i64>,
    /// Chunks relayed between automatic gain checks
    #[clap(short, long, default_value_t = crate::CHECK_INTERVAL)]
    #[clap(value_parser = clap::value_parser!(i64).range(1..))]
    pub check_interval: i64,
    #[clap(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity,
}

/// Match verbosity filter with tracing subscriber log levels
pub fn convert_filter(filter: log::LevelFilter) -> tracing_subscriber::filter::LevelFilter {
    match filter {
        log::LevelFilter::Off => tracing_subscriber::filter::LevelFilter::OFF,
        log::LevelFilter::Error => tracing_subscriber::filter::LevelFilter::ERROR,
        log::LevelFilter::Warn => tracing_subscriber::filter::LevelFilter::WARN,
        log::LevelFilter::Info => tracing_subscriber::filter::LevelFilter::INFO,
        log::LevelFilter::Debug => tracing_subscriber::filter::LevelFilter::DEBUG,
        log::LevelFilter::Trace => tracing_subscriber::filter::LevelFilter::TRACE,
    }
}

fn valid_device_name(s: &str) -> Result<String, String> {
    if s.is_empty() || s.len() > 30 || s.contains('/') {
        return Err("invalid cxadc device name".to_string());
    }
    Ok(s.to_string())
}
