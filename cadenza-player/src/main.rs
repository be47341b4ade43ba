//! Cadenza player binary
//!
//! Plays the files named on the command line with gapless/crossfaded
//! transitions, printing playback events until the queue runs out or
//! the process is interrupted.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cadenza_common::{PlaybackState, PlayerEvent, RepeatMode, Track};
use cadenza_player::decode::SymphoniaBackend;
use cadenza_player::{AudioOutput, PlaybackEngine, PlayerConfig};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "cadenza-player")]
#[command(about = "Gapless/crossfading local music player")]
#[command(version)]
struct Args {
    /// Audio files to enqueue, in order
    files: Vec<PathBuf>,

    /// Configuration file (TOML)
    #[arg(short, long, env = "CADENZA_CONFIG")]
    config: Option<PathBuf>,

    /// Crossfade duration in seconds (0 = gapless only)
    #[arg(long)]
    crossfade: Option<f64>,

    /// Start with shuffle enabled
    #[arg(long)]
    shuffle: bool,

    /// Repeat mode: off, all, or one
    #[arg(long, value_parser = parse_repeat)]
    repeat: Option<RepeatMode>,

    /// Master volume (0.0 - 1.0)
    #[arg(long)]
    volume: Option<f32>,

    /// Output device name (default device if omitted)
    #[arg(long, env = "CADENZA_DEVICE")]
    device: Option<String>,

    /// List output devices and exit
    #[arg(long)]
    list_devices: bool,
}

fn parse_repeat(s: &str) -> std::result::Result<RepeatMode, String> {
    match s {
        "off" => Ok(RepeatMode::Off),
        "all" => Ok(RepeatMode::All),
        "one" => Ok(RepeatMode::One),
        other => Err(format!("unknown repeat mode '{}' (off, all, one)", other)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cadenza_player=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    if args.list_devices {
        for name in AudioOutput::list_devices().context("Failed to enumerate devices")? {
            println!("{}", name);
        }
        return Ok(());
    }

    if args.files.is_empty() {
        anyhow::bail!("no input files (see --help)");
    }

    let mut config = PlayerConfig::load_or_default(args.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(crossfade) = args.crossfade {
        config.playback.crossfade_seconds = crossfade;
    }
    if let Some(volume) = args.volume {
        config.playback.volume = volume;
    }
    if let Some(device) = args.device.clone() {
        config.audio.device = Some(device);
    }

    let backend = Arc::new(SymphoniaBackend::new(cadenza_player::decode::OutputSpec {
        sample_rate: config.audio.sample_rate,
        channels: config.audio.channels,
    }));
    let audio = config.audio.clone();
    let engine =
        PlaybackEngine::new(config, backend).context("Failed to initialize playback engine")?;
    let control = engine.spawn_control_loop();

    for path in &args.files {
        if !path.is_file() {
            warn!("skipping missing file: {}", path.display());
            continue;
        }
        let track = Track::new(path.clone(), audio.sample_rate, audio.channels);
        engine
            .enqueue(track)
            .with_context(|| format!("Failed to enqueue {}", path.display()))?;
    }

    if let Some(repeat) = args.repeat {
        engine.set_repeat_mode(repeat)?;
    }
    if args.shuffle {
        engine.set_shuffle(true)?;
    }

    let mut output = AudioOutput::new(audio.device.clone(), audio.sample_rate, audio.channels)
        .context("Failed to open audio output")?;
    output.start(Arc::clone(&engine))?;
    info!(
        "playing {} file(s) on {}",
        engine.status().queue_len,
        output.device_name()
    );

    engine.play().context("Failed to start playback")?;

    tokio::select! {
        _ = watch_events(&engine) => {
            info!("queue finished");
        }
        _ = shutdown_signal() => {
            info!("interrupted");
        }
    }

    engine.shutdown();
    control.abort();
    output.stop()?;
    Ok(())
}

/// Print playback events until the engine stops.
async fn watch_events(engine: &Arc<PlaybackEngine>) {
    let mut rx = engine.subscribe();
    loop {
        match rx.recv().await {
            Ok(PlayerEvent::StateChanged { new_state, .. }) => {
                info!("state: {}", new_state);
                if new_state == PlaybackState::Stopped {
                    return;
                }
            }
            Ok(PlayerEvent::TrackChanged {
                track_id,
                queue_index,
                ..
            }) => {
                info!("now playing [{}]: {}", queue_index, track_id);
            }
            Ok(PlayerEvent::TransitionStarted {
                outgoing,
                incoming,
                duration_frames,
                ..
            }) => {
                info!(
                    "crossfade: {} -> {} ({} frames)",
                    outgoing, incoming, duration_frames
                );
            }
            Ok(PlayerEvent::DecodeError {
                track_id, message, ..
            }) => {
                warn!("decode error on {}: {}", track_id, message);
            }
            Ok(PlayerEvent::BufferUnderrun {
                track_id,
                total_frames,
                ..
            }) => {
                warn!("underrun on {} ({} frames total)", track_id, total_frames);
            }
            Ok(_) => {}
            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                warn!("event stream lagged by {} events", n);
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
