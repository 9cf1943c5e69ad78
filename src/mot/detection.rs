use serde::{Deserialize, Serialize};

use crate::utils::Rect;

/// Single object found by the detector on a single frame.
/// Bounding box is expressed in native frame coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: Rect,
    pub class_label: String,
    pub confidence: f32,
    #[serde(default)]
    pub frame_index: u64,
}

impl Detection {
    pub fn new(bbox: Rect, class_label: impl Into<String>, confidence: f32, frame_index: u64) -> Self {
        Detection {
            bbox,
            class_label: class_label.into(),
            confidence,
            frame_index,
        }
    }
}

/// Clips boxes to the frame and drops the ones left without area.
/// Returns kept detections together with the number of dropped ones.
pub fn sanitize_detections(
    detections: &[Detection],
    frame_width: f32,
    frame_height: f32,
) -> (Vec<Detection>, usize) {
    let mut kept = Vec::with_capacity(detections.len());
    let mut dropped = 0;
    for detection in detections {
        if detection.bbox.is_degenerate() {
            dropped += 1;
            continue;
        }
        let clipped = detection.bbox.clip_to(frame_width, frame_height);
        if clipped.is_degenerate() {
            dropped += 1;
            continue;
        }
        kept.push(Detection {
            bbox: clipped,
            ..detection.clone()
        });
    }
    (kept, dropped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_clips_and_drops() {
        let detections = vec![
            Detection::new(Rect::new(-10.0, -10.0, 50.0, 50.0), "car", 0.9, 0),
            Detection::new(Rect::new(10.0, 10.0, 0.0, 50.0), "car", 0.9, 0),
            Detection::new(Rect::new(700.0, 10.0, 50.0, 50.0), "car", 0.9, 0),
            Detection::new(Rect::new(600.0, 400.0, 100.0, 200.0), "bus", 0.5, 0),
        ];
        let (kept, dropped) = sanitize_detections(&detections, 640.0, 480.0);
        assert_eq!(dropped, 2);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].bbox, Rect::new(0.0, 0.0, 40.0, 40.0));
        assert_eq!(kept[1].bbox, Rect::from_corners(600.0, 400.0, 640.0, 480.0));
        assert_eq!(kept[1].class_label, "bus");
    }
}
