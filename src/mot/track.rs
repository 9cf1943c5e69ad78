use serde::{Deserialize, Serialize};

use crate::speed::SpeedMeasurement;
use crate::utils::{Point, Rect};

/// Lifecycle of a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrackState {
    /// Spawned, not yet matched `min_hits` consecutive times
    Tentative,
    Confirmed,
    /// Was confirmed, missed on the latest frame(s)
    Lost,
    /// Terminal. Removed tracks leave the tracker and their ids are never reused
    Removed,
}

/// One entry of the bounding box history
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrackPoint {
    pub frame_index: u64,
    pub bbox: Rect,
}

impl TrackPoint {
    pub fn anchor(&self) -> Point {
        self.bbox.center()
    }
}

/// Where the track is relative to the measurement region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RegionState {
    NotEntered,
    Inside,
    Exited,
}

/// Region boundary event. `frame` is fractional when interpolated between samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegionMark {
    pub frame: f64,
    pub position: Point,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Traversal {
    pub state: RegionState,
    pub entry: Option<RegionMark>,
    pub exit: Option<RegionMark>,
    /// Completed traversals
    pub completed: u32,
}

impl Default for Traversal {
    fn default() -> Self {
        Traversal {
            state: RegionState::NotEntered,
            entry: None,
            exit: None,
            completed: 0,
        }
    }
}

/// Identity of a single vehicle across frames
#[derive(Debug, Clone, Serialize)]
pub struct Track {
    id: u64,
    state: TrackState,
    class_label: String,
    confidence: f32,
    history: Vec<TrackPoint>,
    max_history: usize,
    last_matched_frame: u64,
    no_match_times: usize,
    hits: usize,
    traversal: Traversal,
    speed: Option<SpeedMeasurement>,
    violations: u32,
}

impl Track {
    pub(crate) fn new(
        id: u64,
        frame_index: u64,
        bbox: Rect,
        class_label: String,
        confidence: f32,
        max_history: usize,
        min_hits: usize,
    ) -> Self {
        let mut history = Vec::with_capacity(max_history.min(150));
        history.push(TrackPoint { frame_index, bbox });
        Track {
            id,
            state: if min_hits <= 1 {
                TrackState::Confirmed
            } else {
                TrackState::Tentative
            },
            class_label,
            confidence,
            history,
            max_history,
            last_matched_frame: frame_index,
            no_match_times: 0,
            hits: 1,
            traversal: Traversal::default(),
            speed: None,
            violations: 0,
        }
    }
    pub fn get_id(&self) -> u64 {
        self.id
    }
    pub fn state(&self) -> TrackState {
        self.state
    }
    pub fn class_label(&self) -> &str {
        &self.class_label
    }
    pub fn confidence(&self) -> f32 {
        self.confidence
    }
    pub fn get_bbox(&self) -> Rect {
        self.last_point().bbox
    }
    pub fn get_center(&self) -> Point {
        self.last_point().anchor()
    }
    pub fn last_point(&self) -> &TrackPoint {
        // History is never empty: it starts with the spawning detection and trimming keeps the tail
        &self.history[self.history.len() - 1]
    }
    /// Sample preceding the latest one, if any
    pub fn previous_point(&self) -> Option<&TrackPoint> {
        self.history.iter().rev().nth(1)
    }
    pub fn get_history(&self) -> &[TrackPoint] {
        &self.history
    }
    pub fn last_matched_frame(&self) -> u64 {
        self.last_matched_frame
    }
    pub fn get_no_match_times(&self) -> usize {
        self.no_match_times
    }
    pub fn get_hits(&self) -> usize {
        self.hits
    }
    pub fn traversal(&self) -> &Traversal {
        &self.traversal
    }
    pub fn speed(&self) -> Option<&SpeedMeasurement> {
        self.speed.as_ref()
    }
    pub fn violations(&self) -> u32 {
        self.violations
    }

    /* Tracker-owned mutation */

    pub(crate) fn register_hit(
        &mut self,
        frame_index: u64,
        bbox: Rect,
        class_label: &str,
        confidence: f32,
        min_hits: usize,
    ) {
        self.history.push(TrackPoint { frame_index, bbox });
        if self.history.len() > self.max_history {
            let excess = self.history.len() - self.max_history;
            self.history.drain(..excess);
        }
        if self.class_label != class_label {
            self.class_label = class_label.to_string();
        }
        self.confidence = confidence;
        self.last_matched_frame = frame_index;
        self.no_match_times = 0;
        self.hits += 1;
        self.state = match self.state {
            TrackState::Tentative if self.hits >= min_hits => TrackState::Confirmed,
            TrackState::Lost => TrackState::Confirmed,
            other => other,
        };
    }
    pub(crate) fn register_miss(&mut self) {
        self.no_match_times += 1;
        self.hits = 0;
        if self.state == TrackState::Confirmed {
            self.state = TrackState::Lost;
        }
    }
    pub(crate) fn mark_removed(&mut self) {
        self.state = TrackState::Removed;
    }

    /* Speed estimator annotations */

    pub(crate) fn traversal_mut(&mut self) -> &mut Traversal {
        &mut self.traversal
    }
    pub(crate) fn set_speed(&mut self, speed: SpeedMeasurement) {
        self.speed = Some(speed);
    }
    pub(crate) fn mark_violation(&mut self) {
        self.violations += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(i: u64) -> Rect {
        Rect::new(10.0 * i as f32, 0.0, 40.0, 20.0)
    }

    #[test]
    fn test_confirmation_and_loss() {
        let mut track = Track::new(1, 0, bbox(0), "car".to_string(), 0.9, 150, 3);
        assert_eq!(track.state(), TrackState::Tentative);
        track.register_hit(1, bbox(1), "car", 0.8, 3);
        assert_eq!(track.state(), TrackState::Tentative);
        track.register_hit(2, bbox(2), "car", 0.8, 3);
        assert_eq!(track.state(), TrackState::Confirmed);

        track.register_miss();
        assert_eq!(track.state(), TrackState::Lost);
        assert_eq!(track.get_hits(), 0);
        track.register_hit(4, bbox(4), "car", 0.7, 3);
        assert_eq!(track.state(), TrackState::Confirmed);
        assert_eq!(track.get_no_match_times(), 0);
        assert_eq!(track.last_matched_frame(), 4);
    }

    #[test]
    fn test_tentative_miss_resets_hits() {
        let mut track = Track::new(7, 0, bbox(0), "car".to_string(), 0.9, 150, 3);
        track.register_hit(1, bbox(1), "car", 0.8, 3);
        track.register_miss();
        assert_eq!(track.state(), TrackState::Tentative);
        track.register_hit(3, bbox(3), "car", 0.8, 3);
        track.register_hit(4, bbox(4), "car", 0.8, 3);
        assert_eq!(track.state(), TrackState::Tentative);
        track.register_hit(5, bbox(5), "car", 0.8, 3);
        assert_eq!(track.state(), TrackState::Confirmed);
    }

    #[test]
    fn test_history_keeps_tail_in_order() {
        let mut track = Track::new(1, 0, bbox(0), "car".to_string(), 0.9, 4, 1);
        for i in 1..10 {
            track.register_hit(i, bbox(i), "car", 0.9, 1);
        }
        let frames: Vec<u64> = track.get_history().iter().map(|p| p.frame_index).collect();
        assert_eq!(frames, vec![6, 7, 8, 9]);
        assert_eq!(track.previous_point().map(|p| p.frame_index), Some(8));
    }
}
