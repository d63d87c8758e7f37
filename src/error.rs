use opencv::core::Size;
use thiserror::Error;

/// Errors surfaced by the tracker and its frame adapters.
///
/// Only input-contract violations and backend failures cross this boundary;
/// lost tracks or texture-less frames are ordinary tracking outcomes.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("frame is empty")]
    EmptyFrame,

    #[error("unsupported frame format: {channels} channel(s), depth {depth}")]
    UnsupportedFormat { channels: i32, depth: i32 },

    #[error(
        "frame resolution changed from {}x{} to {}x{}",
        .expected.width, .expected.height, .actual.width, .actual.height
    )]
    ResolutionMismatch { expected: Size, actual: Size },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("frame source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("frame sink unavailable: {0}")]
    SinkUnavailable(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    OpenCv(#[from] opencv::Error),
}

impl TrackerError {
    /// True for errors caused by the caller handing over a bad frame.
    pub fn is_input_violation(&self) -> bool {
        matches!(
            self,
            TrackerError::EmptyFrame
                | TrackerError::UnsupportedFormat { .. }
                | TrackerError::ResolutionMismatch { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, TrackerError>;
