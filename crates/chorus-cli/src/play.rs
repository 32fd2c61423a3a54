//! `chorus play` and `chorus devices`.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chorus_audio::{device::list_output_devices, AudioEngine};
use chorus_core::{EngineConfig, PlayState, PlayerFlags, TrackId};
use clap::Args;
use tracing::info;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Args)]
pub struct PlayArgs {
    /// Pack file
    pub pack: PathBuf,

    /// Track index within the pack
    pub track: TrackId,

    /// Linear gain in [0, 1]
    #[arg(long, default_value_t = 1.0)]
    pub gain: f32,

    /// Restart the track when it ends. Runs until interrupted unless `--seconds` is given
    #[arg(long = "loop")]
    pub looping: bool,

    /// Read from the file on demand instead of loading it into memory
    #[arg(long)]
    pub streamed: bool,

    /// Stop after this many seconds
    #[arg(long)]
    pub seconds: Option<f64>,

    /// Engine configuration as JSON
    #[arg(long)]
    pub config: Option<PathBuf>,
}

pub fn execute(args: &PlayArgs) -> Result<()> {
    let config = match &args.config {
        Some(path) => EngineConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if args.seconds.is_some_and(|s| !s.is_finite() || s < 0.0) {
        anyhow::bail!("--seconds must be a non-negative number");
    }

    let engine = AudioEngine::with_default_output(config)?;
    let id = engine
        .load_resource_pack(0, &args.pack, args.streamed)
        .with_context(|| format!("Failed to load {}", args.pack.display()))?;

    let flags = if args.looping {
        PlayerFlags::LOOP
    } else {
        PlayerFlags::empty()
    };
    let handle = engine.create_voice_handle_with_flags(id.into(), args.track, flags)?;
    handle.set_gain(args.gain);
    info!("Playing track {} of {}", args.track, args.pack.display());

    let limit = args.seconds.map(Duration::from_secs_f64);
    let started = Instant::now();
    loop {
        std::thread::sleep(POLL_INTERVAL);
        if handle.state() == PlayState::Stopped {
            break;
        }
        if limit.is_some_and(|limit| started.elapsed() >= limit) {
            break;
        }
    }

    engine.destroy_voice_handle(handle);
    engine.terminate();
    Ok(())
}

pub fn devices() -> Result<()> {
    for name in list_output_devices()? {
        println!("{name}");
    }
    Ok(())
}
