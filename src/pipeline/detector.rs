use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use tracing::info;

use crate::mot::Detection;
use crate::pipeline::frame::Frame;
use crate::pipeline::pipeline_errors::DetectorError;

/// Object detector capability: given a frame, produce detections.
/// Failures are reported, never retried by the pipeline.
pub trait Detector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, DetectorError>;
}

impl<F> Detector for F
where
    F: FnMut(&Frame) -> Result<Vec<Detection>, DetectorError>,
{
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
        self(frame)
    }
}

/// Replays detections recorded as JSON lines, one [`Detection`] per line
/// with its `frame_index`.
#[derive(Debug, Default, Clone)]
pub struct ReplayDetector {
    frames: BTreeMap<u64, Vec<Detection>>,
}

impl ReplayDetector {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DetectorError> {
        let path = path.as_ref();
        let replay = Self::from_reader(BufReader::new(File::open(path)?))?;
        info!(
            path = %path.display(),
            frames = replay.frames.len(),
            last_frame = replay.last_frame(),
            "loaded detection replay"
        );
        Ok(replay)
    }
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self, DetectorError> {
        let mut frames: BTreeMap<u64, Vec<Detection>> = BTreeMap::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let detection: Detection = serde_json::from_str(&line)
                .map_err(|source| DetectorError::Parse { line: idx + 1, source })?;
            frames.entry(detection.frame_index).or_default().push(detection);
        }
        Ok(ReplayDetector { frames })
    }
    /// Index of the last frame carrying detections
    pub fn last_frame(&self) -> Option<u64> {
        self.frames.keys().next_back().copied()
    }
    pub fn len(&self) -> usize {
        self.frames.values().map(|d| d.len()).sum()
    }
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl Detector for ReplayDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
        Ok(self.frames.get(&frame.index).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replay_groups_by_frame() {
        let data = r#"
{"bbox": {"x": 10, "y": 10, "width": 40, "height": 20}, "class_label": "car", "confidence": 0.9, "frame_index": 3}
{"bbox": {"x": 80, "y": 10, "width": 40, "height": 20}, "class_label": "bus", "confidence": 0.8, "frame_index": 3}

{"bbox": {"x": 12, "y": 11, "width": 40, "height": 20}, "class_label": "car", "confidence": 0.9, "frame_index": 4}
"#;
        let mut replay = ReplayDetector::from_reader(data.as_bytes()).unwrap();
        assert_eq!(replay.len(), 3);
        assert_eq!(replay.last_frame(), Some(4));
        assert_eq!(replay.detect(&Frame::without_image(3)).unwrap().len(), 2);
        assert!(replay.detect(&Frame::without_image(0)).unwrap().is_empty());
    }

    #[test]
    fn test_replay_reports_bad_line() {
        let data = "{\"bbox\": {\"x\": 1, \"y\": 1, \"width\": 4, \"height\": 2}, \"class_label\": \"car\", \"confidence\": 0.9}\nnot json\n";
        match ReplayDetector::from_reader(data.as_bytes()) {
            Err(DetectorError::Parse { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected parse error, got {:?}", other),
        }
    }
}
