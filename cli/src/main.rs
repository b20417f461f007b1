//! Headless RTMP live publisher.

mod config;
mod reachability;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use crossbeam_channel::Receiver;
use livestream_encoder::{encoder_event_channel, HeadlessEncoder};
use livestream_engine::{reachability_channel, spawn_controller, Collaborators, PublishTimeoutPolicy};
use livestream_ipc::{
    command_channel, event_channel, Preset, SessionCommand, SessionEvent, SessionState,
};
use livestream_transport::{transport_event_channel, RtmpTransport};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::AppConfig;

#[derive(Parser, Debug)]
#[command(name = "livestream", version, about = "Headless RTMP live publisher")]
struct Cli {
    /// Config file (TOML). Defaults to ./livestream.toml when present.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Publish one session until Ctrl-C or an unrecoverable failure.
    Publish(PublishArgs),

    /// List built-in quality presets.
    Presets,
}

#[derive(Args, Debug)]
struct PublishArgs {
    /// Full publish URL (rtmp://host[:port]/app/key). Overrides server URL and key.
    #[arg(long)]
    url: Option<String>,

    /// Ingest server URL (rtmp://host[:port]/app).
    #[arg(long, env = "LIVESTREAM_SERVER_URL")]
    server_url: Option<String>,

    /// Stream key.
    #[arg(long, env = "LIVESTREAM_STREAM_KEY", hide_env_values = true)]
    stream_key: Option<String>,

    /// Quality preset: street, wifi or high-quality.
    #[arg(short, long)]
    preset: Option<String>,

    /// Enter publishing when the server never acknowledges the publish.
    #[arg(long)]
    assume_publishing: bool,

    /// Disable the TCP reachability probe.
    #[arg(long)]
    no_probe: bool,
}

fn init_logging() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "livestream=debug,livestream_engine=debug,livestream_transport=debug,livestream_encoder=debug,livestream_capture=debug".into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let app_config = AppConfig::discover(cli.config.as_deref())?;

    match cli.command {
        Command::Publish(args) => publish(args, &app_config),
        Command::Presets => {
            list_presets();
            Ok(())
        }
    }
}

fn list_presets() {
    for preset in Preset::all() {
        println!(
            "{:<14} {}x{}@{}  {}..{} kbps (start {})",
            preset.name,
            preset.width,
            preset.height,
            preset.frame_rate,
            preset.min_bitrate_kbps,
            preset.max_bitrate_kbps,
            preset.initial_bitrate_kbps
        );
    }
}

fn publish(args: PublishArgs, app_config: &AppConfig) -> Result<()> {
    let preset_name = args
        .preset
        .as_deref()
        .unwrap_or(&app_config.destination.preset);
    let preset = Preset::from_name(preset_name)
        .with_context(|| format!("unknown preset '{preset_name}'"))?;
    let destination =
        app_config.destination(args.url.as_deref(), args.server_url, args.stream_key);

    let mut engine_config = app_config.engine_config()?;
    if args.assume_publishing {
        engine_config.publish_timeout = PublishTimeoutPolicy::AssumePublishing;
    }

    let (command_tx, command_rx) = command_channel();
    let (event_tx, event_rx) = event_channel();
    let (transport_tx, transport_rx) = transport_event_channel();
    let (_encoder_tx, encoder_rx) = encoder_event_channel();
    let (reachability_tx, reachability_rx) = reachability_channel();

    let transport = RtmpTransport::new(transport_tx).context("failed to create RTMP transport")?;

    let running = Arc::new(AtomicBool::new(true));
    let probe_config = &app_config.reachability;
    let monitor = match reachability::probe_target(&destination.server_url) {
        Some((host, port)) if probe_config.enabled && !args.no_probe => Some(
            reachability::spawn_monitor(
                host,
                port,
                Duration::try_from_secs_f64(probe_config.interval_secs)
                    .context("invalid reachability.interval_secs")?,
                Duration::try_from_secs_f64(probe_config.timeout_secs)
                    .context("invalid reachability.timeout_secs")?,
                reachability_tx,
                Arc::clone(&running),
            )
            .context("failed to start reachability monitor")?,
        ),
        _ => None,
    };

    let collaborators = Collaborators {
        transport: Box::new(transport),
        transport_events: transport_rx,
        encoder: Box::new(HeadlessEncoder::new()),
        encoder_events: encoder_rx,
        capture: None,
        destinations: Box::new(destination),
        reachability: reachability_rx,
    };
    let controller = spawn_controller(engine_config, command_rx, event_tx, collaborators)
        .context("failed to start session thread")?;

    let stop_tx = command_tx.clone();
    ctrlc::set_handler(move || {
        info!("Interrupt received, stopping");
        let _ = stop_tx.try_send(SessionCommand::Stop);
    })
    .context("failed to install Ctrl-C handler")?;

    info!(preset = %preset.name, "Starting publish");
    command_tx
        .send(SessionCommand::Start {
            preset,
            destination: None,
        })
        .context("session thread exited early")?;

    let final_state = watch_events(&event_rx);

    running.store(false, Ordering::SeqCst);
    let _ = command_tx.send(SessionCommand::Shutdown);
    if controller.join().is_err() {
        error!("Session thread panicked");
    }
    if let Some(monitor) = monitor {
        let _ = monitor.join();
    }

    match final_state {
        SessionState::Failed { reason } => Err(anyhow!("session failed: {reason}")),
        state => {
            info!("{}", state.message());
            Ok(())
        }
    }
}

/// Log controller events until the session reaches a terminal state.
fn watch_events(event_rx: &Receiver<SessionEvent>) -> SessionState {
    let mut last = SessionState::Idle;

    for event in event_rx.iter() {
        match event {
            SessionEvent::StateChanged { current, .. } => {
                info!(state = current.name(), "{}", current.message());
                if current.is_terminal() {
                    return current;
                }
                last = current;
            }
            SessionEvent::Telemetry(snapshot) => debug!(
                bitrate_kbps = snapshot.current_bitrate_kbps,
                average_kbps = snapshot.average_bitrate_kbps,
                rtt_ms = snapshot.rtt_ms,
                queue = snapshot.queue_depth,
                dropped = snapshot.dropped_frames,
                "Telemetry"
            ),
            SessionEvent::Health(health) => debug!(health = health.name(), "{}", health.message()),
            SessionEvent::BitrateChanged { kbps } => info!(kbps, "Bitrate changed"),
            SessionEvent::DeviceError { device, message } => {
                warn!(device = device.name(), "{}", message)
            }
            SessionEvent::Ready => debug!("Session controller ready"),
            SessionEvent::Shutdown => break,
        }
    }

    last
}
