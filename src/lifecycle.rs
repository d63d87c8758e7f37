use std::collections::BTreeMap;

use nalgebra::Point2;
use opencv::core::Size;
use tracing::debug;

use crate::config::LifecycleConfig;
use crate::error::Result;
use crate::flow::FlowResult;
use crate::track::{Track, TrackId, TrackState};
use crate::utils::in_bounds;

/// Live tracks keyed by identity, iterated in identity order.
#[derive(Debug, Clone, Default)]
pub struct TrackSet {
    tracks: BTreeMap<TrackId, Track>,
}

impl TrackSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn get(&self, id: TrackId) -> Option<&Track> {
        self.tracks.get(&id)
    }

    pub fn contains(&self, id: TrackId) -> bool {
        self.tracks.contains_key(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Track> {
        self.tracks.values()
    }

    pub fn ids(&self) -> Vec<TrackId> {
        self.tracks.keys().copied().collect()
    }

    pub fn positions(&self) -> Vec<Point2<f32>> {
        self.tracks.values().map(Track::position).collect()
    }

    fn insert(&mut self, track: Track) {
        self.tracks.insert(track.id(), track);
    }
}

/// Summary of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub updated: Vec<TrackId>,
    pub missed: Vec<TrackId>,
    pub retired: Vec<TrackId>,
    pub spawned: Vec<TrackId>,
    /// Whether new candidates were requested this pass
    pub reinitialized: bool,
}

/// Owns the track set and decides which tracks live, die, or get created.
#[derive(Debug, Clone)]
pub struct LifecycleManager {
    config: LifecycleConfig,
    tracks: TrackSet,
    next_id: TrackId,
    passes: u64,
}

impl LifecycleManager {
    pub fn new(config: LifecycleConfig) -> Self {
        LifecycleManager {
            config,
            tracks: TrackSet::new(),
            next_id: 1,
            passes: 0,
        }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub fn tracks(&self) -> &TrackSet {
        &self.tracks
    }

    /// Identity the next spawned track will receive.
    pub fn next_id(&self) -> TrackId {
        self.next_id
    }

    /// Drop every track. The identity counter keeps counting.
    pub fn clear(&mut self) {
        self.tracks = TrackSet::new();
        self.passes = 0;
    }

    /// Reconcile the track set with this frame's propagation results.
    ///
    /// `ids[i]` is the track `results[i]` was computed for. Tracks are updated,
    /// retired once their failure counter reaches the threshold or they leave
    /// `bounds`, and, when fewer than `min_tracks` remain (or a periodic refresh
    /// is due), `request` is called exactly once with the surviving positions and
    /// the number of free slots. Candidates are spawned in the order returned.
    ///
    /// Changes are committed only if the whole pass succeeds.
    pub fn update<F>(
        &mut self,
        ids: &[TrackId],
        results: &[FlowResult],
        bounds: Size,
        request: F,
    ) -> Result<ReconcileReport>
    where
        F: FnOnce(&[Point2<f32>], usize) -> Result<Vec<Point2<f32>>>,
    {
        debug_assert_eq!(ids.len(), results.len());
        let mut staged = self.tracks.clone();
        let mut next_id = self.next_id;
        let mut report = ReconcileReport::default();

        // 1. apply propagation
        for (id, result) in ids.iter().zip(results) {
            // Lost because the point moved off the frame
            if !result.is_valid() && !in_bounds(&result.position, bounds) {
                if staged.tracks.remove(id).is_some() {
                    report.retired.push(*id);
                }
                continue;
            }
            let Some(track) = staged.tracks.get_mut(id) else {
                continue;
            };
            if result.is_valid() {
                track.update(result.position, result.confidence);
                report.updated.push(*id);
            } else {
                track.mark_missed();
                report.missed.push(*id);
            }
        }

        // 2. retire
        let threshold = self.config.failure_threshold;
        staged.tracks.retain(|id, track| {
            let keep = track.state(threshold) == TrackState::Active
                && in_bounds(&track.position(), bounds);
            if !keep {
                report.retired.push(*id);
            }
            keep
        });

        // 3. top up
        let pass = self.passes + 1;
        let refresh_due = self.config.redetect_interval > 0
            && pass % self.config.redetect_interval == 0;
        let free = self.config.max_tracks.saturating_sub(staged.len());
        if free > 0 && (staged.len() < self.config.min_tracks || refresh_due) {
            report.reinitialized = true;
            let candidates = request(&staged.positions(), free)?;
            for candidate in candidates {
                if staged.len() >= self.config.max_tracks {
                    break;
                }
                if !in_bounds(&candidate, bounds) {
                    continue;
                }
                staged.insert(Track::new(next_id, candidate, self.config.trail_length));
                report.spawned.push(next_id);
                next_id += 1;
            }
        }

        debug!(
            updated = report.updated.len(),
            missed = report.missed.len(),
            retired = report.retired.len(),
            spawned = report.spawned.len(),
            live = staged.len(),
            "reconciled tracks"
        );

        self.tracks = staged;
        self.next_id = next_id;
        self.passes = pass;
        Ok(report)
    }
}
