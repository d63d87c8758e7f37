use nalgebra::{distance, Point2};
use opencv::{
    core::{Mat, Point2f, Size, TermCriteria, TermCriteria_Type, Vector},
    prelude::*,
    video,
};

use crate::config::FlowConfig;
use crate::error::{Result, TrackerError};
use crate::utils::{from_cv_point, in_bounds, to_cv_point};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStatus {
    Valid,
    Failed,
}

/// Outcome of propagating one position into the current frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowResult {
    pub position: Point2<f32>,
    pub status: FlowStatus,
    /// 1.0 for a perfect round trip, 0.0 for failed points
    pub confidence: f32,
    /// Forward-backward round-trip error in pixels (infinite when a pass failed)
    pub error: f32,
}

impl FlowResult {
    pub fn failed(position: Point2<f32>) -> Self {
        FlowResult {
            position,
            status: FlowStatus::Failed,
            confidence: 0.0,
            error: f32::INFINITY,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.status == FlowStatus::Valid
    }
}

/// Sparse motion estimation between two consecutive grayscale frames.
pub trait MotionEstimator {
    /// Estimate where each of `positions` moved between `prev` and `curr`.
    ///
    /// Returns exactly one result per input position, in input order. Both frames
    /// must be single-channel and of equal size.
    fn propagate(&self, prev: &Mat, curr: &Mat, positions: &[Point2<f32>])
        -> Result<Vec<FlowResult>>;
}

/// Pyramidal Lucas-Kanade with a forward-backward consistency check.
pub struct PyramidalLk {
    config: FlowConfig,
    criteria: TermCriteria,
}

impl PyramidalLk {
    pub fn new(config: FlowConfig) -> Result<Self> {
        let criteria = TermCriteria::new(
            TermCriteria_Type::COUNT as i32 | TermCriteria_Type::EPS as i32,
            config.max_iterations,
            config.epsilon,
        )?;
        Ok(PyramidalLk { config, criteria })
    }

    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    fn track(
        &self,
        from: &Mat,
        to: &Mat,
        points: &Vector<Point2f>,
    ) -> Result<(Vector<Point2f>, Vector<u8>)> {
        let mut next = Vector::<Point2f>::new();
        let mut status = Vector::<u8>::new();
        let mut err = Vector::<f32>::new();
        video::calc_optical_flow_pyr_lk(
            from,
            to,
            points,
            &mut next,
            &mut status,
            &mut err,
            Size::new(self.config.window_size, self.config.window_size),
            self.config.pyramid_levels,
            self.criteria,
            0,
            self.config.min_eig_threshold,
        )?;
        Ok((next, status))
    }

    fn confidence(&self, error: f32) -> f32 {
        (1.0 - error / self.config.fb_threshold).clamp(0.0, 1.0)
    }
}

impl MotionEstimator for PyramidalLk {
    fn propagate(
        &self,
        prev: &Mat,
        curr: &Mat,
        positions: &[Point2<f32>],
    ) -> Result<Vec<FlowResult>> {
        if positions.is_empty() {
            return Ok(Vec::new());
        }
        let size = curr.size()?;
        let prev_size = prev.size()?;
        if prev_size != size {
            return Err(TrackerError::ResolutionMismatch {
                expected: prev_size,
                actual: size,
            });
        }

        let start: Vector<Point2f> = positions.iter().map(to_cv_point).collect();
        let (forward, fwd_status) = self.track(prev, curr, &start)?;
        let (backward, back_status) = self.track(curr, prev, &forward)?;

        let mut results = Vec::with_capacity(positions.len());
        for (i, origin) in positions.iter().enumerate() {
            let estimate = from_cv_point(&forward.get(i)?);
            let returned = from_cv_point(&backward.get(i)?);
            let tracked = fwd_status.get(i)? != 0 && back_status.get(i)? != 0;
            let error = if tracked { distance(origin, &returned) } else { f32::INFINITY };

            let valid = tracked
                && error.is_finite()
                && error <= self.config.fb_threshold
                && in_bounds(&estimate, size);

            let result = if valid {
                FlowResult {
                    position: estimate,
                    status: FlowStatus::Valid,
                    confidence: self.confidence(error),
                    error,
                }
            } else {
                let position = if estimate.x.is_finite() && estimate.y.is_finite() {
                    estimate
                } else {
                    *origin
                };
                FlowResult { error, ..FlowResult::failed(position) }
            };
            results.push(result);
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{FeatureDetector, ShiTomasiDetector};
    use crate::test_util::{textured_gray, uniform_gray, HEIGHT, WIDTH};
    use approx::assert_relative_eq;

    fn lk() -> PyramidalLk {
        PyramidalLk::new(FlowConfig::default()).unwrap()
    }

    #[test]
    fn test_empty_positions_is_noop() {
        let frame = textured_gray(0, 0);
        assert!(lk().propagate(&frame, &frame, &[]).unwrap().is_empty());
    }

    #[test]
    fn test_translation_is_recovered() {
        let prev = textured_gray(0, 0);
        let curr = textured_gray(3, 2);
        let corners = ShiTomasiDetector::default().detect(&prev, &[], 50).unwrap();
        assert!(!corners.is_empty());

        let results = lk().propagate(&prev, &curr, &corners).unwrap();
        assert_eq!(results.len(), corners.len());

        let valid: Vec<_> = corners.iter().zip(&results).filter(|(_, r)| r.is_valid()).collect();
        assert!(!valid.is_empty());
        for (start, r) in valid {
            assert_relative_eq!(r.position.x - start.x, 3.0, epsilon = 0.5);
            assert_relative_eq!(r.position.y - start.y, 2.0, epsilon = 0.5);
            assert!(r.confidence >= 0.0 && r.confidence <= 1.0);
            assert!(r.error <= 1.0);
        }
    }

    #[test]
    fn test_results_preserve_input_order() {
        let prev = textured_gray(0, 0);
        let curr = textured_gray(2, 0);
        let mut corners = ShiTomasiDetector::default().detect(&prev, &[], 50).unwrap();
        // A point in a flat region and one off the frame, interleaved with real corners
        corners.insert(1, Point2::new(5.0, 5.0));
        corners.push(Point2::new(-40.0, 10.0));

        let results = lk().propagate(&prev, &curr, &corners).unwrap();
        assert_eq!(results.len(), corners.len());
        for (start, r) in corners.iter().zip(&results) {
            if r.is_valid() {
                assert!(distance(start, &r.position) < 5.0);
            }
        }
        assert!(!results.last().unwrap().is_valid());
    }

    #[test]
    fn test_points_pushed_past_border_are_never_valid_outside() {
        // Rightmost column of blocks ends at x=313, then slides partly out of the frame
        let prev = textured_gray(60, 0);
        let curr = textured_gray(70, 0);
        let size = Size::new(WIDTH, HEIGHT);
        let corners = ShiTomasiDetector::default().detect(&prev, &[], 100).unwrap();
        assert!(corners.iter().any(|c| c.x > (WIDTH - 12) as f32));

        let results = lk().propagate(&prev, &curr, &corners).unwrap();
        assert_eq!(results.len(), corners.len());
        for r in &results {
            if r.is_valid() {
                assert!(in_bounds(&r.position, size));
            } else {
                assert_eq!(r.confidence, 0.0);
            }
        }
    }

    #[test]
    fn test_textureless_points_fail() {
        let frame = uniform_gray(WIDTH, HEIGHT);
        let positions = vec![Point2::new(100.0, 100.0), Point2::new(10.0, 200.0)];
        let results = lk().propagate(&frame, &frame, &positions).unwrap();

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| !r.is_valid() && r.confidence == 0.0));
    }

    #[test]
    fn test_size_mismatch_is_rejected() {
        let prev = textured_gray(0, 0);
        let curr = uniform_gray(WIDTH / 2, HEIGHT / 2);
        let err = lk().propagate(&prev, &curr, &[Point2::new(10.0, 10.0)]).unwrap_err();
        assert!(matches!(err, TrackerError::ResolutionMismatch { .. }));
    }
}
