use opencv::{
    core::{Mat, Size},
    prelude::*,
};
use tracing::{debug, warn};

use crate::config::Config;
use crate::detection::{FeatureDetector, ShiTomasiDetector};
use crate::error::{Result, TrackerError};
use crate::flow::{FlowResult, MotionEstimator, PyramidalLk};
use crate::lifecycle::{LifecycleManager, ReconcileReport, TrackSet};
use crate::utils::{check_frame, to_gray};
use crate::visualization::Annotator;

/// Per-stream point tracker: detects corners, follows them with optical flow and
/// draws the result.
///
/// One instance owns the state of one stream. Frames must be fed in order and
/// keep the same resolution for the lifetime of the instance (or until
/// [`FlowTracker::reset`]).
pub struct FlowTracker<D = ShiTomasiDetector, P = PyramidalLk> {
    detector: D,
    estimator: P,
    lifecycle: LifecycleManager,
    annotator: Annotator,
    /// Grayscale copy of the last processed frame
    prev_gray: Option<Mat>,
    frame_count: u64,
    reset_on_resolution_change: bool,
    last_report: ReconcileReport,
}

impl FlowTracker {
    /// Tracker with the OpenCV corner detector and pyramidal Lucas-Kanade.
    pub fn new(config: &Config) -> Result<Self> {
        config.validate()?;
        let detector = ShiTomasiDetector::new(config.detector.clone());
        let estimator = PyramidalLk::new(config.flow.clone())?;
        Self::with_strategies(config, detector, estimator)
    }
}

impl<D: FeatureDetector, P: MotionEstimator> FlowTracker<D, P> {
    /// Tracker with custom detection and motion estimation strategies.
    pub fn with_strategies(config: &Config, detector: D, estimator: P) -> Result<Self> {
        config.validate()?;
        Ok(FlowTracker {
            detector,
            estimator,
            lifecycle: LifecycleManager::new(config.lifecycle.clone()),
            annotator: Annotator::new(config.annotation.clone()),
            prev_gray: None,
            frame_count: 0,
            reset_on_resolution_change: config.reset_on_resolution_change,
            last_report: ReconcileReport::default(),
        })
    }

    pub fn tracks(&self) -> &TrackSet {
        self.lifecycle.tracks()
    }

    /// Frames processed successfully since creation or the last reset.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// What the last successful call changed.
    pub fn last_report(&self) -> &ReconcileReport {
        &self.last_report
    }

    /// Resolution the next frame must have, if any frame was retained.
    pub fn resolution(&self) -> Option<Size> {
        self.prev_gray.as_ref().and_then(|g| g.size().ok())
    }

    /// Forget all tracks and the retained frame. Identities keep counting up.
    pub fn reset(&mut self) {
        self.lifecycle.clear();
        self.prev_gray = None;
        self.frame_count = 0;
        self.last_report = ReconcileReport::default();
    }

    /// Track one frame and return an annotated copy of it.
    ///
    /// `fps` is the caller's measured processing rate and is only displayed.
    /// Fails only when `frame` breaks the input contract (empty, unsupported
    /// format, or a resolution different from the previous frame) or when the
    /// detector or estimator fails. The tracker state is left as it was in
    /// either case. With `reset_on_resolution_change` the reset is only
    /// committed once the new frame went through.
    pub fn process_frame(&mut self, frame: &Mat, fps: f64) -> Result<Mat> {
        let size = check_frame(frame)?;
        let restart = match self.resolution() {
            Some(expected) if expected != size => {
                if !self.reset_on_resolution_change {
                    warn!(
                        "frame resolution changed from {}x{} to {}x{}",
                        expected.width, expected.height, size.width, size.height
                    );
                    return Err(TrackerError::ResolutionMismatch { expected, actual: size });
                }
                debug!("resolution changed, re-initializing tracker");
                true
            }
            _ => false,
        };

        let gray = to_gray(frame)?.into_owned();

        // A restart works on a cleared copy so a failure below leaves the old state
        let mut restarted = None;
        let lifecycle = if restart {
            let mut fresh = self.lifecycle.clone();
            fresh.clear();
            restarted.insert(fresh)
        } else {
            &mut self.lifecycle
        };

        let (ids, results): (_, Vec<FlowResult>) = match self.prev_gray.as_ref() {
            Some(prev) if !restart => {
                let positions = lifecycle.tracks().positions();
                let results = self.estimator.propagate(prev, &gray, &positions)?;
                (lifecycle.tracks().ids(), results)
            }
            _ => (Vec::new(), Vec::new()),
        };

        let detector = &self.detector;
        let report = lifecycle.update(&ids, &results, size, |exclude, limit| {
            detector.detect(&gray, exclude, limit)
        })?;

        let output = self.annotator.annotate(frame, lifecycle.tracks(), fps)?;

        if let Some(fresh) = restarted {
            self.lifecycle = fresh;
            self.frame_count = 0;
        }
        self.prev_gray = Some(gray);
        self.frame_count += 1;
        self.last_report = report;
        Ok(output)
    }
}
