use anyhow::{bail, Context};
use clap::{ArgGroup, Parser};
use opencv::{core::Size, highgui};
use std::path::PathBuf;

use flowtrack::io::{process_stream, FrameSink, RateMeter, VideoSink, VideoSource};
use flowtrack::{Config, FlowTracker};

const WINDOW_NAME: &str = "flowtrack";

#[derive(Parser)]
#[command(
    name = "flowtrack",
    about = "Optical-flow point tracking on video files and cameras",
    version = "0.1.0"
)]
#[command(group(ArgGroup::new("source").required(true).args(["input", "camera"])))]
struct Args {
    /// Path to a video file
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Camera index to capture from
    #[arg(long)]
    camera: Option<i32>,

    /// Output video path
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Path to a JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output width; resizes written frames (requires --height)
    #[arg(long, requires = "height")]
    width: Option<i32>,

    /// Output height; resizes written frames (requires --width)
    #[arg(long, requires = "width")]
    height: Option<i32>,

    /// Show annotated frames in a window (ESC stops)
    #[arg(short, long)]
    display: bool,

    /// Stop after this many frames (at least 1)
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    max_frames: Option<u64>,

    /// Frame rate written to the output file when the source does not report one
    #[arg(long, default_value_t = 30.0)]
    fps: f64,
}

/// Sink that discards frames, used when only displaying.
struct NullSink;

impl FrameSink for NullSink {
    fn write(&mut self, _frame: &opencv::core::Mat) -> flowtrack::error::Result<()> {
        Ok(())
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();
    let args = Args::parse();
    run(args)
}

fn run(args: Args) -> anyhow::Result<()> {
    let config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Config::default(),
    };

    let (mut source, mut meter) = match (&args.input, args.camera) {
        (Some(path), _) => (
            VideoSource::open_file(path)
                .with_context(|| format!("Failed to open input {}", path.display()))?,
            RateMeter::cumulative(),
        ),
        (None, Some(index)) => (
            VideoSource::open_camera(index, Some(Size::new(640, 480)))
                .with_context(|| format!("Failed to open camera {}", index))?,
            RateMeter::windowed(),
        ),
        (None, None) => bail!("Provide --input or --camera"),
    };

    let resize = match (args.width, args.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => Some(Size::new(w, h)),
        (Some(_), Some(_)) => bail!("--width and --height must be positive"),
        _ => None,
    };

    if args.output.is_none() && !args.display {
        tracing::warn!("No --output and no --display given; frames are tracked and discarded");
    }

    let mut display = args.display;
    if display {
        if let Err(err) = highgui::named_window(WINDOW_NAME, highgui::WINDOW_AUTOSIZE) {
            tracing::warn!("Failed to open display window: {}. Running headless.", err);
            display = false;
        }
    }

    let mut tracker = FlowTracker::new(&config).context("Invalid tracker configuration")?;
    let max_frames = args.max_frames;
    let on_frame = |index: u64, frame: &opencv::core::Mat| -> flowtrack::error::Result<bool> {
        if display {
            highgui::imshow(WINDOW_NAME, frame)?;
            if highgui::wait_key(1)? == 27 {
                tracing::info!("Tracking interrupted by user");
                return Ok(false);
            }
        }
        Ok(max_frames.map_or(true, |max| index < max))
    };

    tracing::info!("Tracking frames from {}", source.name());
    let summary = match &args.output {
        Some(path) => {
            let fps = source.fps().unwrap_or(args.fps);
            let mut sink = VideoSink::new(path, fps, resize);
            let summary = process_stream(&mut tracker, &mut source, &mut sink, &mut meter, on_frame)?;
            sink.finish()?;
            summary
        }
        None => process_stream(&mut tracker, &mut source, &mut NullSink, &mut meter, on_frame)?,
    };

    if display {
        highgui::destroy_all_windows()?;
    }

    tracing::info!(
        "Done: {} frames, {} tracks spawned, {} retired, {} live at end",
        summary.frames,
        summary.spawned,
        summary.retired,
        summary.live_tracks
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_frames_must_be_positive() {
        let parsed = Args::try_parse_from(["flowtrack", "--camera", "0", "--max-frames", "0"]);
        assert!(parsed.is_err());

        let args =
            Args::try_parse_from(["flowtrack", "--camera", "0", "--max-frames", "1"]).unwrap();
        assert_eq!(args.max_frames, Some(1));
    }

    #[test]
    fn test_source_is_required() {
        assert!(Args::try_parse_from(["flowtrack", "--display"]).is_err());
        assert!(Args::try_parse_from(["flowtrack", "-i", "in.mp4", "--camera", "0"]).is_err());
    }
}
