use anyhow::Result;
use clap::Parser;
use log::info;
use std::io::Write;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use loopband::{BandAggregator, DeviceRegistry, Settings};

/// Terminal band meter for whatever the system is currently playing.
#[derive(Parser)]
#[command(name = "loopband", about = "Loopback spectrum band meter")]
struct Args {
    /// Path to a JSON settings file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Endpoint name fragment to force as the default output.
    #[arg(long)]
    device: Option<String>,

    /// Number of bands to render (8-128).
    #[arg(long)]
    bands: Option<u8>,

    /// Show raw band values instead of the smoothed ones.
    #[arg(long)]
    raw: bool,

    /// Display refresh rate in frames per second.
    #[arg(long, default_value_t = 60)]
    fps: u64,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    // Settings file first, CLI flags on top.
    let mut settings = Settings::load_or_default(args.config.as_deref());
    if args.device.is_some() {
        settings.default_output = args.device;
    }
    if let Some(bands) = args.bands {
        settings.band_amount = Some(bands);
    }
    if args.raw {
        settings.use_buffered = Some(false);
    }

    info!("starting loopband meter");

    let registry = DeviceRegistry::start(settings.registry_settings())?;
    let mut aggregator = BandAggregator::new(settings.band_config(), registry.subscribe())?;

    let frame_time = Duration::from_millis(1000 / args.fps.max(1));
    let stdout = std::io::stdout();

    loop {
        aggregator.update();

        let mut line = String::with_capacity(aggregator.band_amount() as usize * 4);
        for i in 0..aggregator.band_amount() as usize {
            line.push(meter_char(aggregator.band(i)?));
        }

        let mut out = stdout.lock();
        write!(out, "\r{}", line)?;
        out.flush()?;

        thread::sleep(frame_time);
    }
}

fn meter_char(value: f32) -> char {
    const LEVELS: [char; 9] = [' ', '▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];
    let index = (value.clamp(0.0, 1.0) * (LEVELS.len() - 1) as f32).round() as usize;
    LEVELS[index]
}
