use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{Result, TrackerError};

/// Corner detection parameters for the feature initializer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Upper bound on candidates returned per detection pass
    pub max_corners: usize,
    /// Minimum corner strength relative to the strongest corner, in (0, 1]
    pub quality_level: f64,
    /// Minimum pixel distance between candidates and to existing tracks
    pub min_distance: f64,
    /// Neighbourhood size for the corner response
    pub block_size: i32,
    /// Use the Harris response instead of the minimum eigenvalue
    pub use_harris: bool,
    /// Harris free parameter
    pub harris_k: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            max_corners: 100,
            quality_level: 0.3,
            min_distance: 7.0,
            block_size: 7,
            use_harris: false,
            harris_k: 0.04,
        }
    }
}

/// Pyramidal Lucas-Kanade parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Side of the square search window, odd
    pub window_size: i32,
    /// Number of pyramid levels above the base image
    pub pyramid_levels: i32,
    pub max_iterations: i32,
    /// Stop refining once the update is below this many pixels
    pub epsilon: f64,
    pub min_eig_threshold: f64,
    /// Maximum forward-backward round-trip error in pixels
    pub fb_threshold: f32,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            window_size: 15,
            pyramid_levels: 2,
            max_iterations: 10,
            epsilon: 0.03,
            min_eig_threshold: 1e-4,
            fb_threshold: 1.0,
        }
    }
}

/// Track bookkeeping parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Re-detect when fewer live tracks than this remain
    pub min_tracks: usize,
    /// Hard cap on live tracks
    pub max_tracks: usize,
    /// Consecutive failed propagations that retire a track
    pub failure_threshold: u32,
    /// Positions kept per track for the trail
    pub trail_length: usize,
    /// Also top up every N frames; 0 disables
    pub redetect_interval: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            min_tracks: 20,
            max_tracks: 100,
            failure_threshold: 3,
            trail_length: 10,
            redetect_interval: 0,
        }
    }
}

/// Overlay style.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotationConfig {
    pub marker_radius: i32,
    pub trail_thickness: i32,
    pub font_scale: f64,
    pub show_ids: bool,
    pub show_track_count: bool,
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        Self {
            marker_radius: 3,
            trail_thickness: 2,
            font_scale: 0.6,
            show_ids: false,
            show_track_count: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub detector: DetectorConfig,
    pub flow: FlowConfig,
    pub lifecycle: LifecycleConfig,
    pub annotation: AnnotationConfig,
    /// Reset and re-initialize on a resolution change instead of failing
    pub reset_on_resolution_change: bool,
}

impl Config {
    /// Load from a JSON file. Missing keys take their default value.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = fs::read_to_string(path)?;
        let cfg: Config = serde_json::from_str(&data)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(TrackerError::InvalidConfig(msg));

        let lc = &self.lifecycle;
        if lc.max_tracks == 0 {
            return invalid("lifecycle.max_tracks must be positive".into());
        }
        if lc.min_tracks > lc.max_tracks {
            return invalid(format!(
                "lifecycle.min_tracks ({}) exceeds lifecycle.max_tracks ({})",
                lc.min_tracks, lc.max_tracks
            ));
        }
        if lc.failure_threshold == 0 {
            return invalid("lifecycle.failure_threshold must be at least 1".into());
        }
        if lc.trail_length == 0 {
            return invalid("lifecycle.trail_length must be at least 1".into());
        }

        let det = &self.detector;
        if !(det.quality_level > 0.0 && det.quality_level <= 1.0) {
            return invalid(format!(
                "detector.quality_level must be in (0, 1], got {}",
                det.quality_level
            ));
        }
        if det.min_distance < 0.0 || det.block_size < 1 {
            return invalid("detector.min_distance and detector.block_size out of range".into());
        }

        let flow = &self.flow;
        if flow.window_size < 3 || flow.window_size % 2 == 0 {
            return invalid(format!(
                "flow.window_size must be odd and at least 3, got {}",
                flow.window_size
            ));
        }
        if flow.pyramid_levels < 0 || flow.max_iterations < 1 {
            return invalid("flow.pyramid_levels and flow.max_iterations out of range".into());
        }
        if !(flow.fb_threshold > 0.0) {
            return invalid("flow.fb_threshold must be positive".into());
        }
        Ok(())
    }
}
