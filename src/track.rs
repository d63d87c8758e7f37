use std::collections::VecDeque;

use nalgebra::Point2;

/// Identity of a track. Unique and never reused within one tracker.
pub type TrackId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    Active,
    Retired,
}

/// A single followed point.
#[derive(Debug, Clone)]
pub struct Track {
    id: TrackId,
    position: Point2<f32>,
    /// Recent positions, oldest first, current position last
    history: VecDeque<Point2<f32>>,
    trail_length: usize,
    /// Frames survived since creation
    age: u64,
    /// Consecutive failed propagations
    failures: u32,
    /// Confidence of the last propagation (1.0 on creation)
    confidence: f32,
}

impl Track {
    pub fn new(id: TrackId, position: Point2<f32>, trail_length: usize) -> Self {
        let trail_length = trail_length.max(1);
        let mut history = VecDeque::with_capacity(trail_length);
        history.push_back(position);
        Track {
            id,
            position,
            history,
            trail_length,
            age: 0,
            failures: 0,
            confidence: 1.0,
        }
    }

    pub fn id(&self) -> TrackId {
        self.id
    }

    pub fn position(&self) -> Point2<f32> {
        self.position
    }

    pub fn history(&self) -> &VecDeque<Point2<f32>> {
        &self.history
    }

    pub fn age(&self) -> u64 {
        self.age
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn state(&self, failure_threshold: u32) -> TrackState {
        if self.failures >= failure_threshold {
            TrackState::Retired
        } else {
            TrackState::Active
        }
    }

    /// Accept a successful propagation.
    pub(crate) fn update(&mut self, position: Point2<f32>, confidence: f32) {
        self.position = position;
        self.history.push_back(position);
        while self.history.len() > self.trail_length {
            self.history.pop_front();
        }
        self.failures = 0;
        self.confidence = confidence;
        self.age += 1;
    }

    /// Record a failed propagation. Position and trail stay where they were.
    pub(crate) fn mark_missed(&mut self) {
        self.failures = self.failures.saturating_add(1);
        self.confidence = 0.0;
        self.age += 1;
    }
}
