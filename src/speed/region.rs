use serde::{Deserialize, Serialize};

use crate::mot::{RegionMark, RegionState, TrackPoint, Traversal};
use crate::utils::{euclidean_distance, Point, Rect};

/// How a track is judged to enter and leave the measurement region
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossingPolicy {
    /// Anchor point inside the rectangle. Entry is the first inside sample,
    /// exit is the last inside sample (observed once the anchor leaves).
    #[default]
    Containment,
    /// The path between consecutive samples is clipped against the rectangle.
    /// Entry and exit are interpolated boundary points with fractional frames.
    Boundary,
    /// Region is not consulted. Entry is the first sample of the track, exit is
    /// the first sample at least `min_pixels` away from it.
    Displacement { min_pixels: f32 },
}

/// Axis-aligned measurement rectangle in native frame coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRegion {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl Default for MeasurementRegion {
    fn default() -> Self {
        MeasurementRegion {
            x1: 100.0,
            y1: 50.0,
            x2: 400.0,
            y2: 250.0,
        }
    }
}

impl MeasurementRegion {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        MeasurementRegion { x1, y1, x2, y2 }
    }
    pub fn rect(&self) -> Rect {
        Rect::from_corners(self.x1, self.y1, self.x2, self.y2)
    }
    /// Non-empty and inside a `width` x `height` frame
    pub fn validate(&self, width: u32, height: u32) -> Result<(), String> {
        let r = self.rect();
        if r.is_degenerate() {
            return Err(format!(
                "region ({}, {})-({}, {}) has no area",
                self.x1, self.y1, self.x2, self.y2
            ));
        }
        if self.x1 < 0.0 || self.y1 < 0.0 || self.x2 > width as f32 || self.y2 > height as f32 {
            return Err(format!(
                "region ({}, {})-({}, {}) exceeds {}x{} frame",
                self.x1, self.y1, self.x2, self.y2, width, height
            ));
        }
        Ok(())
    }
    pub fn contains(&self, p: &Point) -> bool {
        self.rect().contains(p)
    }

    /// Liang-Barsky clipping of segment `p0 -> p1`.
    /// Returns parameters `(t_in, t_out)` in [0, 1] of the part inside the region.
    pub fn clip_segment(&self, p0: &Point, p1: &Point) -> Option<(f32, f32)> {
        let dx = p1.x - p0.x;
        let dy = p1.y - p0.y;
        let checks = [
            (-dx, p0.x - self.x1),
            (dx, self.x2 - p0.x),
            (-dy, p0.y - self.y1),
            (dy, self.y2 - p0.y),
        ];
        let mut t_in: f32 = 0.0;
        let mut t_out: f32 = 1.0;
        for (p, q) in checks {
            if p == 0.0 {
                if q < 0.0 {
                    return None;
                }
                continue;
            }
            let r = q / p;
            if p < 0.0 {
                t_in = t_in.max(r);
            } else {
                t_out = t_out.min(r);
            }
            if t_in > t_out {
                return None;
            }
        }
        Some((t_in, t_out))
    }

    /// Advances the traversal state with the newest sample of a track.
    /// Returns `(entry, exit)` once a traversal completes.
    pub fn advance(
        &self,
        policy: CrossingPolicy,
        traversal: &mut Traversal,
        previous: Option<&TrackPoint>,
        current: &TrackPoint,
        allow_reentry: bool,
    ) -> Option<(RegionMark, RegionMark)> {
        let can_enter = match traversal.state {
            RegionState::NotEntered => true,
            RegionState::Exited => allow_reentry,
            RegionState::Inside => false,
        };
        let current_anchor = current.anchor();
        let current_inside = self.contains(&current_anchor);
        let current_mark = mark(current, current_anchor);

        let previous = match (policy, previous) {
            (CrossingPolicy::Displacement { min_pixels }, _) => {
                return displace(traversal, current_mark, min_pixels, can_enter);
            }
            (CrossingPolicy::Boundary, Some(prev)) => prev,
            // Containment ignores the path, Boundary without a previous sample
            // (first sighting) can only notice the track already being inside.
            (CrossingPolicy::Containment, _) | (CrossingPolicy::Boundary, None) => {
                if can_enter && current_inside {
                    enter(traversal, current_mark);
                } else if traversal.state == RegionState::Inside && !current_inside {
                    let last_inside = previous
                        .map(|p| mark(p, p.anchor()))
                        .unwrap_or(current_mark);
                    return complete(traversal, last_inside);
                }
                return None;
            }
        };

        let p0 = previous.anchor();
        let segment_at = |t: f32| RegionMark {
            frame: previous.frame_index as f64
                + t as f64 * (current.frame_index as f64 - previous.frame_index as f64),
            position: p0.lerp(&current_anchor, t),
        };
        let clipped = self.clip_segment(&p0, &current_anchor);
        match traversal.state {
            RegionState::Inside => {
                if current_inside {
                    return None;
                }
                let t_out = clipped.map(|(_, t_out)| t_out).unwrap_or(0.0);
                complete(traversal, segment_at(t_out))
            }
            _ if can_enter => {
                let (t_in, t_out) = clipped?;
                enter(traversal, segment_at(t_in));
                if current_inside {
                    None
                } else {
                    // Passed through the whole region between two samples
                    complete(traversal, segment_at(t_out))
                }
            }
            _ => None,
        }
    }
}

fn mark(point: &TrackPoint, position: Point) -> RegionMark {
    RegionMark {
        frame: point.frame_index as f64,
        position,
    }
}

fn displace(
    traversal: &mut Traversal,
    current: RegionMark,
    min_pixels: f32,
    can_enter: bool,
) -> Option<(RegionMark, RegionMark)> {
    if can_enter {
        enter(traversal, current);
        return None;
    }
    let entry = traversal.entry.filter(|_| traversal.state == RegionState::Inside)?;
    if euclidean_distance(&entry.position, &current.position) >= min_pixels {
        complete(traversal, current)
    } else {
        None
    }
}

fn enter(traversal: &mut Traversal, entry: RegionMark) {
    traversal.state = RegionState::Inside;
    traversal.entry = Some(entry);
    traversal.exit = None;
}

fn complete(traversal: &mut Traversal, exit: RegionMark) -> Option<(RegionMark, RegionMark)> {
    traversal.state = RegionState::Exited;
    traversal.exit = Some(exit);
    traversal.completed += 1;
    traversal.entry.map(|entry| (entry, exit))
}
