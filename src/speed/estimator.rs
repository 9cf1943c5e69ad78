use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::mot::{RegionMark, Track};
use crate::speed::calibration::CalibrationModel;
use crate::speed::region::{CrossingPolicy, MeasurementRegion};
use crate::utils::{euclidean_distance, CoordinateManager};

/// Speed of a single completed region traversal
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SpeedMeasurement {
    pub entry: RegionMark,
    pub exit: RegionMark,
    /// Native pixels, rescaled to the calibration reference width
    pub pixel_distance: f64,
    pub elapsed_secs: f64,
    pub pixel_speed: f64,
    pub speed_kmh: f64,
}

/// Traversal completed but no speed could be derived from it
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EstimationFailure {
    #[error("track {track_id} entered and exited the region on the same frame")]
    ZeroElapsed { track_id: u64 },
    #[error("track {track_id} produced a non-finite speed")]
    NonFinite { track_id: u64 },
}

/// Converts region traversals into calibrated speeds
#[derive(Debug, Clone)]
pub struct SpeedEstimator {
    region: MeasurementRegion,
    policy: CrossingPolicy,
    calibration: CalibrationModel,
    fps: f64,
    max_plausible_speed_kmh: f64,
    allow_reentry: bool,
}

impl SpeedEstimator {
    pub fn new(region: MeasurementRegion, calibration: CalibrationModel, fps: f64) -> Self {
        SpeedEstimator {
            region,
            policy: CrossingPolicy::default(),
            calibration,
            fps,
            max_plausible_speed_kmh: 300.0,
            allow_reentry: false,
        }
    }
    pub fn with_policy(mut self, policy: CrossingPolicy) -> Self {
        self.policy = policy;
        self
    }
    pub fn with_max_plausible_speed(mut self, kmh: f64) -> Self {
        self.max_plausible_speed_kmh = kmh;
        self
    }
    pub fn with_reentry(mut self, allow: bool) -> Self {
        self.allow_reentry = allow;
        self
    }
    pub fn region(&self) -> &MeasurementRegion {
        &self.region
    }
    pub fn calibration(&self) -> &CalibrationModel {
        &self.calibration
    }

    /// Factor turning native pixels into pixels of the calibration reference frame
    pub fn distance_scale(&self, coords: &CoordinateManager) -> f64 {
        match self.calibration.reference_width {
            Some(reference) => {
                let (native_width, _) = coords.native_size();
                reference as f64 / native_width as f64
            }
            None => 1.0,
        }
    }

    /// Calibrated speed for a displacement of `pixel_distance` over `elapsed_secs`
    pub fn speed_kmh(&self, pixel_distance: f64, elapsed_secs: f64) -> f64 {
        let pixel_speed = pixel_distance / elapsed_secs;
        self.calibration
            .apply(pixel_speed)
            .clamp(0.0, self.max_plausible_speed_kmh)
    }

    /// Feeds the latest sample of `track` into its region traversal.
    /// Must be called once per frame on which the track received a new position.
    /// Returns the outcome when a traversal has just completed.
    pub fn observe(
        &self,
        track: &mut Track,
        coords: &CoordinateManager,
    ) -> Option<Result<SpeedMeasurement, EstimationFailure>> {
        let track_id = track.get_id();
        let current = *track.last_point();
        let previous = track.previous_point().copied();
        let was_entered = track.traversal().entry;
        let marks = self.region.advance(
            self.policy,
            track.traversal_mut(),
            previous.as_ref(),
            &current,
            self.allow_reentry,
        );
        if track.traversal().entry != was_entered {
            if let Some(entry) = track.traversal().entry {
                debug!(track_id, frame = entry.frame, x = entry.position.x, y = entry.position.y, "entered region");
            }
        }
        let (entry, exit) = marks?;
        debug!(track_id, frame = exit.frame, x = exit.position.x, y = exit.position.y, "exited region");

        let elapsed_secs = (exit.frame - entry.frame) / self.fps;
        if elapsed_secs <= 0.0 {
            return Some(Err(EstimationFailure::ZeroElapsed { track_id }));
        }
        let pixel_distance = euclidean_distance(&entry.position, &exit.position) as f64
            * self.distance_scale(coords);
        let pixel_speed = pixel_distance / elapsed_secs;
        let speed_kmh = self.speed_kmh(pixel_distance, elapsed_secs);
        if !speed_kmh.is_finite() {
            return Some(Err(EstimationFailure::NonFinite { track_id }));
        }
        let measurement = SpeedMeasurement {
            entry,
            exit,
            pixel_distance,
            elapsed_secs,
            pixel_speed,
            speed_kmh,
        };
        track.set_speed(measurement);
        Some(Ok(measurement))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mot::test_data::box_around;
    use crate::mot::{Detection, Tracker, TrackerConfig};

    fn estimator() -> SpeedEstimator {
        let calibration = CalibrationModel::from_pixels_per_meter(34.3).unwrap();
        SpeedEstimator::new(MeasurementRegion::default(), calibration, 30.0)
    }

    // Small boxes move far between frames, keep them associated
    fn tracker() -> Tracker {
        Tracker::new(TrackerConfig {
            iou_threshold: 0.01,
            ..TrackerConfig::default()
        })
        .unwrap()
    }

    // Straight line from (110, 60) at frame 10 to (390, 240) at frame 40, then out
    fn scenario_path() -> Vec<(u64, f32, f32)> {
        let mut path: Vec<(u64, f32, f32)> = (10..=40u64)
            .map(|f| {
                let t = (f - 10) as f32 / 30.0;
                (f, 110.0 + 280.0 * t, 60.0 + 180.0 * t)
            })
            .collect();
        path.insert(0, (9, 101.0, 49.0));
        path.push((41, 399.0, 251.0));
        path
    }

    // Drives a single object through `path`, observing `repeat` times per update
    fn drive(
        estimator: &SpeedEstimator,
        path: &[(u64, f32, f32)],
        repeat: usize,
    ) -> (Tracker, Vec<Result<SpeedMeasurement, EstimationFailure>>) {
        let coords = CoordinateManager::default();
        let mut tracker = tracker();
        let mut outcomes = vec![];
        for &(frame, x, y) in path {
            let detection = Detection::new(box_around(x, y), "car", 0.9, frame);
            let update = tracker.update(frame, &[detection]);
            for id in update.updated_ids().collect::<Vec<_>>() {
                let track = tracker.get_mut(id).unwrap();
                for _ in 0..repeat {
                    if let Some(outcome) = estimator.observe(track, &coords) {
                        outcomes.push(outcome);
                    }
                }
            }
        }
        (tracker, outcomes)
    }

    #[test]
    fn test_scenario_speed() {
        let (tracker, outcomes) = drive(&estimator(), &scenario_path(), 1);
        assert_eq!(tracker.next_id(), 2);
        assert_eq!(outcomes.len(), 1);
        let m = outcomes[0].clone().unwrap();
        assert_eq!(m.entry.frame, 10.0);
        assert_eq!(m.exit.frame, 40.0);
        assert!((m.elapsed_secs - 1.0).abs() < 1e-9);
        // hypot(280, 180)
        assert!((m.pixel_distance - 332.866).abs() < 0.01);
        assert!((m.speed_kmh - 332.866 / 34.3 * 3.6).abs() < 0.01);
    }

    #[test]
    fn test_speed_monotonic_in_displacement() {
        let e = estimator();
        let mut last = f64::MIN;
        for d in (0..2000).step_by(7) {
            let speed = e.speed_kmh(d as f64, 1.0);
            assert!(speed >= last);
            last = speed;
        }
        // 396.7 px over 1 s
        assert!((e.speed_kmh(396.7, 1.0) - 41.64).abs() < 0.01);
    }

    #[test]
    fn test_plausibility_clamp() {
        let e = estimator().with_max_plausible_speed(180.0);
        assert_eq!(e.speed_kmh(100_000.0, 1.0), 180.0);
    }

    #[test]
    fn test_zero_elapsed_is_failure() {
        let e = estimator().with_policy(CrossingPolicy::Boundary);
        let coords = CoordinateManager::default();
        // Path between the two samples touches the region only at its (100, 50) corner
        let mut track = Track::new(1, 0, box_around(90.0, 60.0), "car".to_string(), 0.9, 150, 1);
        assert!(e.observe(&mut track, &coords).is_none());
        track.register_hit(1, box_around(110.0, 40.0), "car", 0.9, 1);
        assert_eq!(
            e.observe(&mut track, &coords),
            Some(Err(EstimationFailure::ZeroElapsed { track_id: 1 }))
        );
        assert!(track.speed().is_none());
    }

    #[test]
    fn test_repeated_observe_does_not_recompute() {
        let (tracker, outcomes) = drive(&estimator(), &scenario_path(), 3);
        assert_eq!(outcomes.len(), 1);
        assert!(tracker.get(1).unwrap().speed().is_some());
    }

    #[test]
    fn test_reference_width_rescales_distance() {
        let calibration = CalibrationModel::from_pixels_per_meter(34.3)
            .unwrap()
            .with_reference_width(960);
        let e = SpeedEstimator::new(MeasurementRegion::default(), calibration, 30.0);
        let coords = CoordinateManager::default();
        assert_eq!(e.distance_scale(&coords), 0.5);
        let (_, outcomes) = drive(&e, &scenario_path(), 1);
        let m = outcomes[0].clone().unwrap();
        assert!((m.pixel_distance - 332.866 / 2.0).abs() < 0.01);
    }
}
