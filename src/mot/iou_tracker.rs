use std::collections::{BTreeMap, BinaryHeap, HashSet};
use std::fmt;

use itertools::iproduct;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::mot::candidate_queue::MatchCandidate;
use crate::mot::detection::{sanitize_detections, Detection};
use crate::mot::mot_errors::TrackerError;
use crate::mot::track::{Track, TrackState};
use crate::utils::iou;

/// Tracker parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Track is removed once its consecutive misses exceed this value. Default is 20
    pub max_age: usize,
    /// Consecutive hits needed to confirm a track. Default is 3
    pub min_hits: usize,
    /// Minimal IoU for a track/detection pair to be matched. Default is 0.3
    pub iou_threshold: f32,
    /// Bounding boxes kept per track. Default is 150
    pub max_history: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        TrackerConfig {
            max_age: 20,
            min_hits: 3,
            iou_threshold: 0.3,
            max_history: 150,
        }
    }
}

impl TrackerConfig {
    pub fn validate(&self) -> Result<(), TrackerError> {
        if self.min_hits == 0 {
            return Err(TrackerError::bad("min_hits", "must be at least 1"));
        }
        if !(self.iou_threshold > 0.0 && self.iou_threshold <= 1.0) {
            return Err(TrackerError::bad(
                "iou_threshold",
                format!("must be in (0, 1], got {}", self.iou_threshold),
            ));
        }
        if self.max_history < 2 {
            return Err(TrackerError::bad("max_history", "must keep at least 2 boxes"));
        }
        Ok(())
    }
}

/// Outcome of a single [`Tracker::update`] call
#[derive(Debug, Default)]
pub struct FrameUpdate {
    pub frame_index: u64,
    /// Existing tracks matched on this frame, ascending id
    pub matched: Vec<u64>,
    /// Tracks spawned on this frame, ascending id
    pub spawned: Vec<u64>,
    /// Tracks that went from Confirmed to Lost on this frame
    pub lost: Vec<u64>,
    /// Tracks removed on this frame, in their final state
    pub removed: Vec<Track>,
    /// Degenerate detections dropped at the input boundary
    pub dropped_detections: usize,
    /// Frame index was not newer than the last processed one, nothing was touched
    pub stale: bool,
}

impl FrameUpdate {
    /// Ids that received a new position on this frame
    pub fn updated_ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.matched.iter().chain(self.spawned.iter()).copied()
    }
}

/// Multi-object tracker (MOT) with greedy IoU association
pub struct Tracker {
    config: TrackerConfig,
    next_id: u64,
    last_frame: Option<u64>,
    frame_bounds: Option<(f32, f32)>,
    tracks: BTreeMap<u64, Track>,
}

impl Tracker {
    /// Creates default instance of Tracker
    ///
    /// Basic usage:
    ///
    /// ```
    /// use speedtrap_rs::mot::Tracker;
    /// let mut tracker = Tracker::default();
    /// ```
    pub fn default() -> Self {
        Tracker {
            config: TrackerConfig::default(),
            next_id: 1,
            last_frame: None,
            frame_bounds: None,
            tracks: BTreeMap::new(),
        }
    }
    /// Creates new instance of Tracker
    ///
    /// Basic usage:
    ///
    /// ```
    /// use speedtrap_rs::mot::{Tracker, TrackerConfig};
    /// let config = TrackerConfig { max_age: 10, min_hits: 2, iou_threshold: 0.3, max_history: 50 };
    /// let tracker = Tracker::new(config).unwrap();
    /// ```
    pub fn new(config: TrackerConfig) -> Result<Self, TrackerError> {
        config.validate()?;
        Ok(Tracker {
            config,
            ..Tracker::default()
        })
    }
    /// Starts id assignment from `next_id` (must be positive)
    pub fn with_next_id(mut self, next_id: u64) -> Result<Self, TrackerError> {
        if next_id == 0 {
            return Err(TrackerError::bad("next_id", "ids start at 1"));
        }
        self.next_id = next_id;
        Ok(self)
    }
    /// Clips every incoming box to `[0, width] x [0, height]`
    pub fn with_frame_bounds(mut self, width: f32, height: f32) -> Self {
        self.set_frame_bounds(width, height);
        self
    }
    /// Changes the clip bounds for subsequent frames, e.g. after a resolution change
    pub fn set_frame_bounds(&mut self, width: f32, height: f32) {
        self.frame_bounds = Some((width, height));
        debug!(width, height, "tracker frame bounds updated");
    }
    pub fn frame_bounds(&self) -> Option<(f32, f32)> {
        self.frame_bounds
    }
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }
    pub fn next_id(&self) -> u64 {
        self.next_id
    }
    pub fn last_frame(&self) -> Option<u64> {
        self.last_frame
    }
    pub fn tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.values()
    }
    pub fn get(&self, id: u64) -> Option<&Track> {
        self.tracks.get(&id)
    }
    pub(crate) fn get_mut(&mut self, id: u64) -> Option<&mut Track> {
        self.tracks.get_mut(&id)
    }
    pub fn len(&self) -> usize {
        self.tracks.len()
    }
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
    /// Drops every track. Id counter keeps going so ids are never reused.
    pub fn reset(&mut self) {
        self.tracks.clear();
        self.last_frame = None;
        debug!(next_id = self.next_id, "tracker reset");
    }

    /// Associates detections of frame `frame_index` with existing tracks
    pub fn update(&mut self, frame_index: u64, detections: &[Detection]) -> FrameUpdate {
        let mut result = FrameUpdate {
            frame_index,
            ..FrameUpdate::default()
        };
        if let Some(last) = self.last_frame {
            if frame_index <= last {
                debug!(frame_index, last, "stale frame ignored");
                result.stale = true;
                return result;
            }
        }
        self.last_frame = Some(frame_index);

        let (detections, dropped) = match self.frame_bounds {
            Some((width, height)) => sanitize_detections(detections, width, height),
            None => sanitize_detections(detections, f32::INFINITY, f32::INFINITY),
        };
        result.dropped_detections = dropped;

        // Pairwise IoU between last known boxes and new detections
        let mut priority_queue: BinaryHeap<MatchCandidate> = BinaryHeap::new();
        for ((track_id, track), (detection_idx, detection)) in
            iproduct!(self.tracks.iter(), detections.iter().enumerate())
        {
            let iou_value = iou(&track.get_bbox(), &detection.bbox);
            if iou_value > 0.0 && iou_value >= self.config.iou_threshold {
                priority_queue.push(MatchCandidate {
                    iou: iou_value,
                    track_id: *track_id,
                    detection_idx,
                });
            }
        }

        // Prevent double update of tracks and double use of detections
        let mut reserved_tracks: HashSet<u64> = HashSet::new();
        let mut used_detections: HashSet<usize> = HashSet::new();
        while let Some(candidate) = priority_queue.pop() {
            if reserved_tracks.contains(&candidate.track_id)
                || used_detections.contains(&candidate.detection_idx)
            {
                continue;
            }
            let detection = &detections[candidate.detection_idx];
            if let Some(track) = self.tracks.get_mut(&candidate.track_id) {
                trace!(track_id = candidate.track_id, iou = candidate.iou, "matched");
                track.register_hit(
                    frame_index,
                    detection.bbox,
                    &detection.class_label,
                    detection.confidence,
                    self.config.min_hits,
                );
                reserved_tracks.insert(candidate.track_id);
                used_detections.insert(candidate.detection_idx);
            }
        }

        // Unmatched tracks
        let mut to_remove = Vec::new();
        for (id, track) in self.tracks.iter_mut() {
            if reserved_tracks.contains(id) {
                result.matched.push(*id);
                continue;
            }
            let was_confirmed = track.state() == TrackState::Confirmed;
            track.register_miss();
            if was_confirmed {
                result.lost.push(*id);
            }
            if track.get_no_match_times() > self.config.max_age {
                to_remove.push(*id);
            }
        }
        for id in to_remove {
            if let Some(mut track) = self.tracks.remove(&id) {
                track.mark_removed();
                debug!(track_id = id, last_frame = track.last_matched_frame(), "track removed");
                result.removed.push(track);
            }
        }

        // Unmatched detections register as new tracks
        for (detection_idx, detection) in detections.iter().enumerate() {
            if used_detections.contains(&detection_idx) {
                continue;
            }
            let id = self.next_id;
            self.next_id = match id.checked_add(1) {
                Some(next) => next,
                None => {
                    // u64::MAX stays unassigned so no id is ever handed out twice
                    warn!(frame_index, class = %detection.class_label, "track ids exhausted, detection not tracked");
                    result.dropped_detections += 1;
                    continue;
                }
            };
            let track = Track::new(
                id,
                frame_index,
                detection.bbox,
                detection.class_label.clone(),
                detection.confidence,
                self.config.max_history,
                self.config.min_hits,
            );
            debug!(track_id = id, frame_index, class = %detection.class_label, "track spawned");
            self.tracks.insert(id, track);
            result.spawned.push(id);
        }
        result
    }
}

impl fmt::Display for Tracker {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Maximum age: {}\n\tMinimum hits: {}\n\tIoU threshold: {}",
            self.config.max_age, self.config.min_hits, self.config.iou_threshold
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mot::test_data::{passing_pair, get_spread_data, moving_box};
    use crate::utils::Rect;

    fn detections(frame_index: u64, boxes: &[Rect]) -> Vec<Detection> {
        boxes
            .iter()
            .map(|b| Detection::new(*b, "car", 0.9, frame_index))
            .collect()
    }

    #[test]
    fn test_identity_stable_for_single_object() {
        let mut tracker = Tracker::default();
        let mut ids = HashSet::new();
        for frame in 0..60u64 {
            let update = tracker.update(frame, &detections(frame, &[moving_box(frame)]));
            for id in update.updated_ids() {
                ids.insert(id);
            }
        }
        assert_eq!(ids.len(), 1);
        let track = tracker.get(1).unwrap();
        assert_eq!(track.state(), TrackState::Confirmed);
        assert_eq!(track.get_history().len(), 60);
        assert!(track
            .get_history()
            .windows(2)
            .all(|w| w[0].frame_index < w[1].frame_index));
    }

    #[test]
    fn test_match_objects_spread() {
        let mut tracker = Tracker::new(TrackerConfig {
            max_age: 5,
            ..TrackerConfig::default()
        })
        .unwrap();
        for (frame, boxes) in get_spread_data().into_iter().enumerate() {
            tracker.update(frame as u64, &detections(frame as u64, &boxes));
        }
        assert_eq!(tracker.len(), 4);
        assert_eq!(tracker.next_id(), 5);
        assert!(tracker.tracks().all(|t| t.state() == TrackState::Confirmed));
    }

    #[test]
    fn test_passing_objects_keep_ids() {
        let mut tracker = Tracker::default();
        let (left, right) = passing_pair();
        for (frame, (a, b)) in itertools::izip!(left, right).enumerate() {
            tracker.update(frame as u64, &detections(frame as u64, &[a, b]));
        }
        assert_eq!(tracker.len(), 2);
        let first = tracker.get(1).unwrap();
        let second = tracker.get(2).unwrap();
        // Object 1 started on the left and moves right
        assert!(first.get_center().x > first.get_history()[0].anchor().x);
        assert!(second.get_center().x < second.get_history()[0].anchor().x);
    }

    #[test]
    fn test_removal_after_max_age_misses() {
        let mut tracker = Tracker::default();
        for frame in 0..5u64 {
            tracker.update(frame, &detections(frame, &[moving_box(frame)]));
        }
        // last hit at frame 4
        let mut removed_at = None;
        for frame in 5..30u64 {
            let update = tracker.update(frame, &[]);
            if !update.removed.is_empty() {
                assert_eq!(update.removed[0].get_id(), 1);
                assert_eq!(update.removed[0].state(), TrackState::Removed);
                removed_at = Some(frame);
            }
            if frame == 5 {
                assert_eq!(update.lost, vec![1]);
            }
        }
        // 21 consecutive misses with max_age = 20
        assert_eq!(removed_at, Some(4 + 21));
        assert!(tracker.is_empty());

        // Same object shows up again: new id
        let update = tracker.update(30, &detections(30, &[moving_box(4)]));
        assert_eq!(update.spawned, vec![2]);
    }

    #[test]
    fn test_min_hits_confirmation() {
        let mut tracker = Tracker::default();
        tracker.update(0, &detections(0, &[moving_box(0)]));
        assert_eq!(tracker.get(1).unwrap().state(), TrackState::Tentative);
        tracker.update(1, &detections(1, &[moving_box(1)]));
        assert_eq!(tracker.get(1).unwrap().state(), TrackState::Tentative);
        tracker.update(2, &detections(2, &[moving_box(2)]));
        assert_eq!(tracker.get(1).unwrap().state(), TrackState::Confirmed);
    }

    #[test]
    fn test_below_threshold_spawns_new_track() {
        let mut tracker = Tracker::default();
        tracker.update(0, &detections(0, &[Rect::new(0.0, 0.0, 10.0, 10.0)]));
        // IoU = 50 / 150
        let update = tracker.update(1, &detections(1, &[Rect::new(5.0, 0.0, 10.0, 10.0)]));
        assert_eq!(update.matched, vec![1]);
        // IoU = 20 / 180
        let update = tracker.update(2, &detections(2, &[Rect::new(13.0, 0.0, 10.0, 10.0)]));
        assert!(update.matched.is_empty());
        assert_eq!(update.spawned, vec![2]);
    }

    #[test]
    fn test_tie_break_prefers_lower_track_id() {
        let mut tracker = Tracker::default();
        // Two identical boxes spawn tracks 1 and 2
        let b = Rect::new(0.0, 0.0, 10.0, 10.0);
        tracker.update(0, &detections(0, &[b, b]));
        let update = tracker.update(1, &detections(1, &[b]));
        assert_eq!(update.matched, vec![1]);
        assert_eq!(tracker.get(2).unwrap().get_no_match_times(), 1);
    }

    #[test]
    fn test_stale_and_degenerate_frames() {
        let mut tracker = Tracker::default().with_frame_bounds(640.0, 480.0);
        let update = tracker.update(
            3,
            &detections(3, &[Rect::new(10.0, 10.0, 0.0, 5.0), Rect::new(630.0, 470.0, 40.0, 40.0)]),
        );
        assert_eq!(update.dropped_detections, 1);
        assert_eq!(tracker.get(1).unwrap().get_bbox(), Rect::new(630.0, 470.0, 10.0, 10.0));

        let update = tracker.update(3, &detections(3, &[Rect::new(630.0, 470.0, 40.0, 40.0)]));
        assert!(update.stale);
        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.get(1).unwrap().get_history().len(), 1);
    }

    #[test]
    fn test_injected_next_id_and_reset() {
        let mut tracker = Tracker::default().with_next_id(100).unwrap();
        tracker.update(0, &detections(0, &[moving_box(0)]));
        assert!(tracker.get(100).is_some());
        tracker.reset();
        let update = tracker.update(0, &detections(0, &[moving_box(0)]));
        assert_eq!(update.spawned, vec![101]);
        assert!(Tracker::default().with_next_id(0).is_err());
    }

    #[test]
    fn test_exhausted_ids_are_not_reused() {
        let mut tracker = Tracker::default().with_next_id(u64::MAX - 1).unwrap();
        let far_apart = [Rect::new(0.0, 0.0, 10.0, 10.0), Rect::new(500.0, 500.0, 10.0, 10.0)];
        let update = tracker.update(0, &detections(0, &far_apart));
        assert_eq!(update.spawned, vec![u64::MAX - 1]);
        assert_eq!(update.dropped_detections, 1);
        assert_eq!(tracker.next_id(), u64::MAX);
        // Existing track keeps matching, nothing new is spawned
        let update = tracker.update(1, &detections(1, &far_apart));
        assert_eq!(update.matched, vec![u64::MAX - 1]);
        assert!(update.spawned.is_empty());
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_frame_bounds_can_grow() {
        let mut tracker = Tracker::default().with_frame_bounds(1920.0, 1080.0);
        let far = Rect::new(2500.0, 1500.0, 80.0, 40.0);
        assert_eq!(tracker.update(0, &detections(0, &[far])).dropped_detections, 1);
        tracker.set_frame_bounds(3840.0, 2160.0);
        let update = tracker.update(1, &detections(1, &[far]));
        assert_eq!(update.dropped_detections, 0);
        assert_eq!(update.spawned, vec![1]);
        assert_eq!(tracker.frame_bounds(), Some((3840.0, 2160.0)));
    }

    #[test]
    fn test_bad_config() {
        let bad = TrackerConfig {
            iou_threshold: 0.0,
            ..TrackerConfig::default()
        };
        assert!(Tracker::new(bad).is_err());
        let bad = TrackerConfig {
            min_hits: 0,
            ..TrackerConfig::default()
        };
        assert!(Tracker::new(bad).is_err());
    }
}
