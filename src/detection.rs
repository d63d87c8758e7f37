use nalgebra::{distance, Point2};
use opencv::{
    core::{Mat, Point2f, Scalar, Vector, CV_8UC1},
    imgproc,
    prelude::*,
};

use crate::config::DetectorConfig;
use crate::error::Result;
use crate::utils::{clamp_to_frame, from_cv_point, to_gray};

/// Source of fresh trackable points.
pub trait FeatureDetector {
    /// Find up to `limit` candidates in `frame`, strongest first, each at least the
    /// detector's minimum distance away from every position in `exclude` and from each other.
    ///
    /// A frame without usable texture yields an empty list.
    fn detect(&self, frame: &Mat, exclude: &[Point2<f32>], limit: usize)
        -> Result<Vec<Point2<f32>>>;
}

/// Corner detector built on `goodFeaturesToTrack` (Shi-Tomasi, or Harris when configured).
#[derive(Debug, Clone)]
pub struct ShiTomasiDetector {
    config: DetectorConfig,
}

impl ShiTomasiDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Mask that blanks a disc of radius `min_distance` around every excluded position.
    fn exclusion_mask(&self, gray: &Mat, exclude: &[Point2<f32>]) -> Result<Mat> {
        if exclude.is_empty() {
            return Ok(Mat::default());
        }
        let size = gray.size()?;
        let mut mask = Mat::new_size_with_default(size, CV_8UC1, Scalar::all(255.0))?;
        let radius = self.config.min_distance.ceil().max(1.0) as i32;
        for p in exclude {
            imgproc::circle(
                &mut mask,
                clamp_to_frame(p, size),
                radius,
                Scalar::all(0.0),
                -1,
                imgproc::LINE_8,
                0,
            )?;
        }
        Ok(mask)
    }
}

impl Default for ShiTomasiDetector {
    fn default() -> Self {
        Self::new(DetectorConfig::default())
    }
}

impl FeatureDetector for ShiTomasiDetector {
    fn detect(
        &self,
        frame: &Mat,
        exclude: &[Point2<f32>],
        limit: usize,
    ) -> Result<Vec<Point2<f32>>> {
        let max_corners = limit.min(self.config.max_corners);
        // goodFeaturesToTrack treats a non-positive count as "unbounded"
        if max_corners == 0 {
            return Ok(Vec::new());
        }

        let gray = to_gray(frame)?;
        let mask = self.exclusion_mask(&gray, exclude)?;

        let mut corners = Vector::<Point2f>::new();
        imgproc::good_features_to_track(
            &*gray,
            &mut corners,
            max_corners as i32,
            self.config.quality_level,
            self.config.min_distance,
            &mask,
            self.config.block_size,
            self.config.use_harris,
            self.config.harris_k,
        )?;

        // The mask works on whole pixels, so re-check sub-pixel distances
        let min_distance = self.config.min_distance as f32;
        let candidates = corners
            .iter()
            .map(|c| from_cv_point(&c))
            .filter(|c| exclude.iter().all(|e| distance(c, e) >= min_distance))
            .take(max_corners)
            .collect();
        Ok(candidates)
    }
}
