//! camlink: paced camera capture into an encoder, and a measured receive window

use std::path::PathBuf;

use camlink::capture::{FrameSource, V4l2Capture};
use camlink::display::Sdl2Display;
use camlink::error::ExitReason;
use camlink::pipeline::{
    CaptureStats, DecoderSource, EncoderSink, FrameReceiver, PacedCapture, ShutdownController,
};
use camlink::{utils, Config};
use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about = "Stream a camera to an RTSP server and watch it back")]
struct Cli {
    /// TOML configuration file; CAMLINK__SECTION__KEY variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Capture from the camera and publish through the encoder
    Send,
    /// Read the stream back and display it with an FPS readout
    Receive,
    /// List capture devices
    Devices,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("camlink=info")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Command::Send => send(config).await,
        Command::Receive => receive(config),
        Command::Devices => {
            for dev in utils::list_devices() {
                println!("{}\t{} ({})\t{:?}", dev.path, dev.card, dev.driver, dev.formats);
            }
            Ok(())
        }
    }
}

async fn send(mut config: Config) -> Result<()> {
    info!("camlink sender launching...");

    let shutdown = ShutdownController::new();
    let _signals = shutdown.listen()?;

    // Auto-detect capture device if needed
    if config.capture.device.path.is_empty() {
        config.capture.device = utils::auto_detect_device()?;
    }
    info!("Using capture device: {:?}", config.capture.device);

    let token = shutdown.token();
    let (reason, stats) = tokio::task::spawn_blocking(move || -> Result<(ExitReason, CaptureStats)> {
        let profile = config.capture.profile()?;
        let mut source = V4l2Capture::new(config.capture.clone(), profile);
        source.open()?;

        let settings = config.capture.settings();
        let sink = EncoderSink::spawn(
            &config.encoder,
            &config.stream,
            &profile,
            config.capture.fps,
            settings.stall_ceiling,
        )?;

        let mut capture = PacedCapture::new(source, sink, profile, settings);
        let reason = capture.run(&token);
        Ok((reason, capture.stats()))
    })
    .await??;

    info!(
        forwarded = stats.forwarded,
        transient = stats.transient_errors,
        rejected = stats.rejected,
        dropped_ticks = stats.dropped_ticks,
        reconnects = stats.reconnects,
        "camlink sender shutting down"
    );
    finish(reason)
}

fn receive(config: Config) -> Result<()> {
    info!("camlink receiver launching...");

    let shutdown = ShutdownController::new();
    let _signals = shutdown.listen()?;

    let settings = config.display.settings()?;
    let profile = config.display.profile()?;

    let source = DecoderSource::spawn(&config.encoder, &config.stream, profile)?;
    info!("Connecting to {}", config.stream.endpoint);

    // SDL must stay on this thread
    let sdl_context = sdl2::init().map_err(|e| eyre!(e))?;
    let display = Sdl2Display::new(&sdl_context, &config.display.title, profile)?;

    let mut receiver = FrameReceiver::new(source, display, settings);
    let reason = receiver.run(&shutdown.token());

    info!(
        displayed = receiver.stats().displayed,
        last_fps = receiver.fps().unwrap_or(0.0),
        "camlink receiver shutting down"
    );
    finish(reason)
}

fn finish(reason: ExitReason) -> Result<()> {
    if reason.is_fatal() {
        error!("{}", reason);
        return Err(eyre!("pipeline stopped: {reason}"));
    }
    info!("{}", reason);
    Ok(())
}
