//! Frame sources and sinks around the tracker, and a driver that pumps frames
//! from one to the other.
//!
//! None of this is needed to use [`FlowTracker`] directly; it is the thin shell
//! the `flowtrack` binary runs on.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use opencv::{
    core::{Mat, Size},
    imgproc,
    prelude::*,
    videoio::{self, VideoCapture, VideoWriter},
};
use tracing::{debug, info};

use crate::detection::FeatureDetector;
use crate::error::{Result, TrackerError};
use crate::flow::MotionEstimator;
use crate::tracker::FlowTracker;

/// Pull-based supplier of frames. `Ok(None)` marks the end of the stream.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Option<Mat>>;

    fn frames(&mut self) -> Frames<'_, Self>
    where
        Self: Sized,
    {
        Frames { source: self }
    }
}

/// Iterator over the remaining frames of a source.
pub struct Frames<'a, S> {
    source: &'a mut S,
}

impl<S: FrameSource> Iterator for Frames<'_, S> {
    type Item = Result<Mat>;

    fn next(&mut self) -> Option<Self::Item> {
        self.source.next_frame().transpose()
    }
}

/// Consumer of processed frames, in order.
pub trait FrameSink {
    fn write(&mut self, frame: &Mat) -> Result<()>;
}

impl FrameSink for Vec<Mat> {
    fn write(&mut self, frame: &Mat) -> Result<()> {
        self.push(frame.try_clone()?);
        Ok(())
    }
}

/// Frames queued in memory.
#[derive(Default)]
pub struct MemorySource {
    frames: VecDeque<Mat>,
}

impl MemorySource {
    pub fn new(frames: Vec<Mat>) -> Self {
        Self { frames: frames.into() }
    }
}

impl FrameSource for MemorySource {
    fn next_frame(&mut self) -> Result<Option<Mat>> {
        Ok(self.frames.pop_front())
    }
}

/// Video file or camera read through OpenCV.
pub struct VideoSource {
    capture: VideoCapture,
    name: String,
}

impl VideoSource {
    pub fn open_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let name = path.as_ref().to_string_lossy().into_owned();
        let capture = VideoCapture::from_file(&name, videoio::CAP_ANY)?;
        Self::opened(capture, name)
    }

    /// Open camera `index`, asking for `size` when given.
    pub fn open_camera(index: i32, size: Option<Size>) -> Result<Self> {
        let mut capture = VideoCapture::new(index, videoio::CAP_ANY)?;
        if let Some(size) = size {
            capture.set(videoio::CAP_PROP_FRAME_WIDTH, size.width as f64)?;
            capture.set(videoio::CAP_PROP_FRAME_HEIGHT, size.height as f64)?;
        }
        Self::opened(capture, format!("camera {}", index))
    }

    fn opened(capture: VideoCapture, name: String) -> Result<Self> {
        if !capture.is_opened()? {
            return Err(TrackerError::SourceUnavailable(name));
        }
        info!("opened {}", name);
        Ok(VideoSource { capture, name })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Native frame rate reported by the container, if any.
    pub fn fps(&self) -> Option<f64> {
        let fps = self.capture.get(videoio::CAP_PROP_FPS).ok()?;
        (fps.is_finite() && fps > 0.0).then_some(fps)
    }
}

impl FrameSource for VideoSource {
    fn next_frame(&mut self) -> Result<Option<Mat>> {
        let mut frame = Mat::default();
        if !self.capture.read(&mut frame)? || frame.empty() {
            return Ok(None);
        }
        Ok(Some(frame))
    }
}

/// Resize `frame` to `size` unless it already has it.
pub fn fit_to(frame: &Mat, size: Size) -> Result<Mat> {
    if frame.size()? == size {
        return Ok(frame.try_clone()?);
    }
    let mut resized = Mat::default();
    imgproc::resize(frame, &mut resized, size, 0.0, 0.0, imgproc::INTER_LINEAR)?;
    Ok(resized)
}

/// Video file writer, opened on the first frame.
///
/// Output resolution is either the fixed `resize` target or the first frame's
/// size; later frames are scaled to it.
pub struct VideoSink {
    path: PathBuf,
    fps: f64,
    resize: Option<Size>,
    writer: Option<(VideoWriter, Size)>,
}

impl VideoSink {
    pub fn new<P: Into<PathBuf>>(path: P, fps: f64, resize: Option<Size>) -> Self {
        VideoSink {
            path: path.into(),
            fps,
            resize,
            writer: None,
        }
    }

    fn open(&self, frame: &Mat) -> Result<(VideoWriter, Size)> {
        let size = match self.resize {
            Some(size) => size,
            None => frame.size()?,
        };
        let fourcc = VideoWriter::fourcc('m', 'p', '4', 'v')?;
        let name = self.path.to_string_lossy();
        let writer = VideoWriter::new(&name, fourcc, self.fps, size, frame.channels() != 1)?;
        if !writer.is_opened()? {
            return Err(TrackerError::SinkUnavailable(name.into_owned()));
        }
        info!("writing {}x{} video to {}", size.width, size.height, name);
        Ok((writer, size))
    }

    /// Flush and close the file. Called on drop as well.
    pub fn finish(&mut self) -> Result<()> {
        if let Some((mut writer, _)) = self.writer.take() {
            writer.release()?;
        }
        Ok(())
    }
}

impl FrameSink for VideoSink {
    fn write(&mut self, frame: &Mat) -> Result<()> {
        if self.writer.is_none() {
            self.writer = Some(self.open(frame)?);
        }
        if let Some((writer, size)) = self.writer.as_mut() {
            let frame = fit_to(frame, *size)?;
            writer.write(&frame)?;
        }
        Ok(())
    }
}

impl Drop for VideoSink {
    fn drop(&mut self) {
        let _ = self.finish();
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateMode {
    /// Frames so far over time since the first frame
    Cumulative,
    /// Re-estimated whenever the window has elapsed
    Windowed(Duration),
}

/// Caller-side frame rate measurement feeding the tracker's readout.
#[derive(Debug, Clone)]
pub struct RateMeter {
    mode: RateMode,
    start: Option<Instant>,
    frames: u64,
    current: f64,
}

impl RateMeter {
    pub fn new(mode: RateMode) -> Self {
        RateMeter {
            mode,
            start: None,
            frames: 0,
            current: 0.0,
        }
    }

    pub fn cumulative() -> Self {
        Self::new(RateMode::Cumulative)
    }

    pub fn windowed() -> Self {
        Self::new(RateMode::Windowed(Duration::from_secs(1)))
    }

    pub fn sample(&mut self) -> f64 {
        self.sample_at(Instant::now())
    }

    /// Register a frame arriving at `now` and return the current rate.
    /// Zero until there is enough data.
    pub fn sample_at(&mut self, now: Instant) -> f64 {
        let start = *self.start.get_or_insert(now);
        let elapsed = now.saturating_duration_since(start);
        match self.mode {
            RateMode::Cumulative => {
                self.current = if elapsed.is_zero() {
                    0.0
                } else {
                    self.frames as f64 / elapsed.as_secs_f64()
                };
                self.frames += 1;
            }
            RateMode::Windowed(window) => {
                self.frames += 1;
                if elapsed > window {
                    self.current = self.frames as f64 / elapsed.as_secs_f64();
                    self.frames = 0;
                    self.start = Some(now);
                }
            }
        }
        self.current
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamSummary {
    pub frames: u64,
    pub spawned: usize,
    pub retired: usize,
    pub live_tracks: usize,
}

/// Pull every frame from `source`, track it, and write the annotated result to `sink`.
///
/// Output order matches input order one-to-one. After each frame `on_frame` sees
/// the frame index and the annotated frame; returning `false` stops the stream.
pub fn process_stream<D, P, S, K, F>(
    tracker: &mut FlowTracker<D, P>,
    source: &mut S,
    sink: &mut K,
    meter: &mut RateMeter,
    mut on_frame: F,
) -> Result<StreamSummary>
where
    D: FeatureDetector,
    P: MotionEstimator,
    S: FrameSource,
    K: FrameSink,
    F: FnMut(u64, &Mat) -> Result<bool>,
{
    let mut summary = StreamSummary::default();
    for frame in source.frames() {
        let frame = frame?;
        let fps = meter.sample();
        let output = tracker.process_frame(&frame, fps)?;
        sink.write(&output)?;

        let report = tracker.last_report();
        summary.frames += 1;
        summary.spawned += report.spawned.len();
        summary.retired += report.retired.len();
        summary.live_tracks = tracker.tracks().len();
        debug!(
            frame = summary.frames,
            live = summary.live_tracks,
            fps = fps,
            "processed frame"
        );

        if !on_frame(summary.frames, &output)? {
            break;
        }
    }
    info!(
        "processed {} frames, {} tracks spawned, {} retired",
        summary.frames, summary.spawned, summary.retired
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::prelude::*;
    use crate::config::Config;
    use crate::test_util::{textured_frame, uniform_frame, HEIGHT, WIDTH};
    use approx::assert_relative_eq;

    #[test]
    fn test_cumulative_rate() {
        let mut meter = RateMeter::cumulative();
        let t0 = Instant::now();

        assert_eq!(meter.sample_at(t0), 0.0);
        assert_relative_eq!(meter.sample_at(t0 + Duration::from_millis(500)), 2.0);
        assert_relative_eq!(meter.sample_at(t0 + Duration::from_secs(1)), 2.0);
    }

    #[test]
    fn test_windowed_rate() {
        let mut meter = RateMeter::windowed();
        let t0 = Instant::now();

        meter.sample_at(t0);
        for i in 1..10 {
            assert_eq!(meter.sample_at(t0 + Duration::from_millis(100 * i)), 0.0);
        }
        // 11 frames seen when the window closes at 1.25s
        let rate = meter.sample_at(t0 + Duration::from_millis(1250));
        assert_relative_eq!(rate, 11.0 / 1.25, epsilon = 1e-9);
        // Holds until the next window closes
        assert_relative_eq!(meter.sample_at(t0 + Duration::from_millis(1300)), rate);
    }

    #[test]
    fn test_frames_iterator_ends() {
        let mut source = MemorySource::new(vec![uniform_frame(8, 8), uniform_frame(8, 8)]);
        let frames: Vec<Mat> = source.frames().collect::<Result<_>>().unwrap();
        assert_eq!(frames.len(), 2);
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_process_stream_is_one_to_one() {
        let inputs: Vec<Mat> = (0..4).map(|i| textured_frame(i, i)).collect();
        let mut source = MemorySource::new(inputs);
        let mut sink: Vec<Mat> = Vec::new();
        let mut tracker = FlowTracker::new(&Config::default()).unwrap();

        let summary = process_stream(
            &mut tracker,
            &mut source,
            &mut sink,
            &mut RateMeter::cumulative(),
            |_, _| Ok(true),
        )
        .unwrap();

        assert_eq!(summary.frames, 4);
        assert_eq!(sink.len(), 4);
        assert_eq!(summary.live_tracks, tracker.tracks().len());
        assert!(summary.spawned >= summary.live_tracks);
        for out in &sink {
            assert_eq!(out.size().unwrap(), Size::new(WIDTH, HEIGHT));
        }
    }

    #[test]
    fn test_process_stream_stops_on_request() {
        let mut source = MemorySource::new((0..5).map(|_| uniform_frame(32, 32)).collect());
        let mut sink: Vec<Mat> = Vec::new();
        let mut tracker = FlowTracker::new(&Config::default()).unwrap();

        let summary = process_stream(
            &mut tracker,
            &mut source,
            &mut sink,
            &mut RateMeter::windowed(),
            |index, _| Ok(index < 2),
        )
        .unwrap();

        assert_eq!(summary.frames, 2);
        assert_eq!(sink.len(), 2);
    }

    #[test]
    fn test_process_stream_surfaces_contract_violation() {
        let mut source = MemorySource::new(vec![uniform_frame(32, 32), uniform_frame(16, 16)]);
        let mut sink: Vec<Mat> = Vec::new();
        let mut tracker = FlowTracker::new(&Config::default()).unwrap();

        let err = process_stream(
            &mut tracker,
            &mut source,
            &mut sink,
            &mut RateMeter::cumulative(),
            |_, _| Ok(true),
        )
        .unwrap_err();

        assert!(matches!(err, TrackerError::ResolutionMismatch { .. }));
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn test_fit_to() {
        let frame = uniform_frame(64, 48);
        assert_eq!(fit_to(&frame, Size::new(32, 32)).unwrap().size().unwrap(), Size::new(32, 32));
        assert_eq!(fit_to(&frame, Size::new(64, 48)).unwrap().size().unwrap(), Size::new(64, 48));
    }

    #[test]
    fn test_missing_file_is_unavailable() {
        assert!(VideoSource::open_file("/nonexistent/flowtrack-input.mp4").is_err());
    }
}
