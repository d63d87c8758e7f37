pub mod config;
pub mod detection;
pub mod error;
pub mod flow;
pub mod io;
pub mod lifecycle;
pub mod track;
pub mod tracker;
pub mod utils;
pub mod visualization;

#[cfg(test)]
mod test_util;

// Re-export main types
pub use crate::config::Config;
pub use crate::detection::{FeatureDetector, ShiTomasiDetector};
pub use crate::error::TrackerError;
pub use crate::flow::{FlowResult, FlowStatus, MotionEstimator, PyramidalLk};
pub use crate::lifecycle::{LifecycleManager, ReconcileReport, TrackSet};
pub use crate::track::{Track, TrackId, TrackState};
pub use crate::tracker::FlowTracker;
