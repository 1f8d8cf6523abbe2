// Rollcall command line scanner
// Runs a scanning session over an image sequence against a detection service

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use rollcall_eye::camera::ImageSequenceSource;
use rollcall_eye::capture::CaptureEncoder;
use rollcall_eye::client::{DetectionClient, Detector};
use rollcall_eye::config::ScannerConfig;
use rollcall_eye::overlay::OverlayRenderer;
use rollcall_eye::processing::{ResultTracker, TrackedCodes};
use rollcall_eye::session::ScannerSession;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rollcall")]
#[command(about = "Live code scanner with attendance counting", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (defaults to ~/.rollcall/config.toml)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Detection service base URL
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan an image sequence as if it were a live camera
    Scan {
        /// Directory of frames for the back camera
        #[arg(long, short)]
        source: PathBuf,

        /// Directory of frames for the front camera
        #[arg(long)]
        front: Option<PathBuf>,

        /// How long to keep scanning, in seconds
        #[arg(long, short, default_value = "5")]
        duration: u64,

        /// Only let every Nth eligible tick start a detection
        #[arg(long)]
        frame_skip: Option<u32>,

        /// JPEG quality for uploaded frames (1-100)
        #[arg(long)]
        quality: Option<u8>,

        /// Switch to the front camera halfway through
        #[arg(long)]
        switch_midway: bool,

        /// Write the final overlay raster to this PNG file
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Run a single detection on one image file
    Detect {
        /// Image to send
        image: PathBuf,

        /// Write the overlay for this image to a PNG file
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    let mut config = ScannerConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(url) = cli.api_url {
        config.api_url = url;
    }

    match cli.command {
        Commands::Scan {
            source,
            front,
            duration,
            frame_skip,
            quality,
            switch_midway,
            output,
        } => {
            if let Some(every) = frame_skip {
                config.scheduler.frame_skip = every;
            }
            if let Some(quality) = quality {
                config.capture.jpeg_quality = quality;
            }
            config.validate().map_err(anyhow::Error::msg).context("Invalid configuration")?;
            run_scan(config, &source, front.as_deref(), duration, switch_midway, output.as_deref()).await?;
        }
        Commands::Detect { image, output } => {
            config.validate().map_err(anyhow::Error::msg).context("Invalid configuration")?;
            detect_single(config, &image, output.as_deref()).await?;
        }
        Commands::Config => {
            let rendered = toml::to_string_pretty(&config).context("Failed to render configuration")?;
            println!("{}", rendered);
        }
    }

    Ok(())
}

async fn run_scan(
    config: ScannerConfig,
    source: &Path,
    front: Option<&Path>,
    duration: u64,
    switch_midway: bool,
    output: Option<&Path>,
) -> anyhow::Result<()> {
    let mut video = ImageSequenceSource::open(source)
        .with_context(|| format!("Failed to open image sequence {}", source.display()))?;
    if let Some(front) = front {
        video = video
            .with_front(front)
            .with_context(|| format!("Failed to open front sequence {}", front.display()))?;
    }
    if video.frame_count() == 0 {
        bail!("No frames found in {}", source.display());
    }

    let mut session = ScannerSession::new(config, Box::new(video)).context("Failed to create scanner session")?;
    let started = Instant::now();
    session.start();

    let total = Duration::from_secs(duration);
    if switch_midway {
        tokio::time::sleep(total / 2).await;
        match session.switch_facing().await {
            Ok(facing) => info!("Now scanning with the {} camera", facing),
            Err(e) => warn!("Could not switch camera: {}", e),
        }
        tokio::time::sleep(total - total / 2).await;
    } else {
        tokio::time::sleep(total).await;
    }

    let frame = session.render(started.elapsed());
    session.stop().await;

    if let Some(path) = output {
        frame
            .rasterize()
            .save(path)
            .with_context(|| format!("Failed to write overlay to {}", path.display()))?;
        info!("Overlay written to {}", path.display());
    }

    let tracked = session.tracked();
    let stats = session.stats();
    let scheduler = session.scheduler_stats();
    let report = json!({
        "session_id": session.session_id().to_string(),
        "present_count": stats.present_count,
        "total_seen": stats.total_seen,
        "counted_codes": session.counted_codes(),
        "tracked": tracked.tracked.iter().map(|t| t.label()).collect::<Vec<_>>(),
        "scheduler": {
            "ticks": scheduler.ticks,
            "cycles_started": scheduler.cycles_started,
            "cycles_completed": scheduler.cycles_completed,
            "cycles_failed": scheduler.cycles_failed,
            "capture_pending": scheduler.capture_pending,
            "skipped_in_flight": scheduler.skipped_in_flight,
            "skipped_by_frame_skip": scheduler.skipped_by_frame_skip,
            "discarded_after_teardown": scheduler.discarded_after_teardown,
            "max_in_flight": scheduler.max_in_flight,
        },
        "debug_log": session.debug_log().entries(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}

async fn detect_single(config: ScannerConfig, input: &Path, output: Option<&Path>) -> anyhow::Result<()> {
    let client = DetectionClient::new(&config).context("Failed to create detection client")?;
    let encoder = CaptureEncoder::new(&config.capture);

    let frame = image::open(input)
        .with_context(|| format!("Failed to read {}", input.display()))?
        .to_rgb8();
    let capture = encoder.encode(&frame).context("Failed to encode frame")?;
    info!(
        "Sending {}x{} frame ({} bytes) to {}",
        capture.width,
        capture.height,
        capture.jpeg.len(),
        client.endpoint()
    );

    let codes = capture.to_native(client.detect(&capture).await?);
    println!("{}", serde_json::to_string_pretty(&codes)?);

    if let Some(path) = output {
        let tracked = ResultTracker::new(&config.tracking).update(&codes, &TrackedCodes::new());
        let mut renderer = OverlayRenderer::new(&config.overlay);
        renderer.resize(frame.width(), frame.height());
        renderer.set_native_size(frame.width(), frame.height());
        renderer
            .render(&tracked, Duration::ZERO)
            .rasterize()
            .save(path)
            .with_context(|| format!("Failed to write overlay to {}", path.display()))?;
        info!("Overlay written to {}", path.display());
    }

    Ok(())
}
