use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::mot::TrackerConfig;
use crate::pipeline::pipeline_errors::ConfigError;
use crate::speed::{CrossingPolicy, MeasurementRegion};
use crate::utils::{
    CoordinateManager, DEFAULT_NATIVE_HEIGHT, DEFAULT_NATIVE_WIDTH, DEFAULT_PROCESSING_HEIGHT,
    DEFAULT_PROCESSING_WIDTH,
};

/// Coordinate space the detector reports boxes in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionSpace {
    #[default]
    Native,
    /// Boxes are mapped back to native coordinates before tracking
    Processing,
}

/// What happens when the violation queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum BackpressurePolicy {
    /// Evict the oldest pending violation to make room
    DropOldest,
    /// Wait for room; the newest violation is dropped on timeout
    Block { timeout_ms: u64 },
}

impl Default for BackpressurePolicy {
    fn default() -> Self {
        BackpressurePolicy::DropOldest
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub capacity: usize,
    pub backpressure: BackpressurePolicy,
    /// Time given to the worker to drain pending violations on shutdown
    pub shutdown_grace_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig {
            capacity: 32,
            backpressure: BackpressurePolicy::default(),
            shutdown_grace_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    /// Analysis service URL. Enrichment is disabled when absent
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub max_requests_per_minute: u32,
    /// Longest wait for a free request slot
    pub max_wait_ms: u64,
    pub max_attempts: u32,
    /// First retry delay, doubled on every further attempt
    pub backoff_ms: u64,
    pub timeout_ms: u64,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        EnrichmentConfig {
            endpoint: None,
            api_key: None,
            max_requests_per_minute: 10,
            max_wait_ms: 10_000,
            max_attempts: 3,
            backoff_ms: 500,
            timeout_ms: 30_000,
        }
    }
}

/// Per-stream startup configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub stream_id: String,
    pub fps: f64,
    pub native: Dimensions,
    pub processing: Dimensions,
    pub detection_space: DetectionSpace,
    pub tracker: TrackerConfig,
    pub region: MeasurementRegion,
    pub crossing_policy: CrossingPolicy,
    pub allow_reentry: bool,
    /// Distance-per-pixel constant the calibration model is fitted from
    pub pixels_per_meter: f64,
    pub calibration_path: PathBuf,
    pub speed_threshold_kmh: f64,
    /// Named thresholds the running pipeline can switch to
    pub speed_limits: BTreeMap<String, f64>,
    pub max_plausible_speed_kmh: f64,
    pub vehicle_classes: Vec<String>,
    pub min_confidence: f32,
    /// Evidence crops are written here when set
    pub crop_dir: Option<PathBuf>,
    /// Wall-clock time of frame 0. Defaults to the moment the pipeline starts
    pub start_time: Option<DateTime<Utc>>,
    pub enrichment: EnrichmentConfig,
    pub queue: QueueConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            stream_id: "camera-0".to_string(),
            fps: 30.0,
            native: Dimensions {
                width: DEFAULT_NATIVE_WIDTH,
                height: DEFAULT_NATIVE_HEIGHT,
            },
            processing: Dimensions {
                width: DEFAULT_PROCESSING_WIDTH,
                height: DEFAULT_PROCESSING_HEIGHT,
            },
            detection_space: DetectionSpace::default(),
            tracker: TrackerConfig::default(),
            region: MeasurementRegion::default(),
            crossing_policy: CrossingPolicy::default(),
            allow_reentry: false,
            pixels_per_meter: 34.3,
            calibration_path: PathBuf::from("models/speed_calibration.json"),
            speed_threshold_kmh: 40.0,
            speed_limits: [("urban", 50.0), ("rural", 90.0), ("highway", 120.0)]
                .iter()
                .map(|(name, kmh)| (name.to_string(), *kmh))
                .collect(),
            max_plausible_speed_kmh: 300.0,
            vehicle_classes: ["car", "truck", "bus", "motorcycle"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            min_confidence: 0.25,
            crop_dir: None,
            start_time: None,
            enrichment: EnrichmentConfig::default(),
            queue: QueueConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Reads YAML config. Missing fields take their default values.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_yaml(&contents)?;
        info!(path = %path.display(), stream_id = %config.stream_id, "loaded pipeline config");
        Ok(config)
    }
    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.fps.is_finite() && self.fps > 0.0) {
            return Err(ConfigError::invalid("fps", format!("must be positive, got {}", self.fps)));
        }
        self.coordinate_manager()?;
        self.tracker.validate()?;
        self.region
            .validate(self.native.width, self.native.height)
            .map_err(|reason| ConfigError::invalid("region", reason))?;
        if !(self.pixels_per_meter.is_finite() && self.pixels_per_meter > 0.0) {
            return Err(ConfigError::invalid(
                "pixels_per_meter",
                format!("must be positive, got {}", self.pixels_per_meter),
            ));
        }
        self.check_threshold(self.speed_threshold_kmh)
            .map_err(|reason| ConfigError::invalid("speed_threshold_kmh", reason))?;
        for (name, kmh) in &self.speed_limits {
            self.check_threshold(*kmh)
                .map_err(|reason| ConfigError::invalid("speed_limits", format!("preset {}: {}", name, reason)))?;
        }
        if let CrossingPolicy::Displacement { min_pixels } = self.crossing_policy {
            if !(min_pixels.is_finite() && min_pixels > 0.0) {
                return Err(ConfigError::invalid(
                    "crossing_policy.min_pixels",
                    format!("must be positive, got {}", min_pixels),
                ));
            }
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(ConfigError::invalid(
                "min_confidence",
                format!("must be in [0, 1], got {}", self.min_confidence),
            ));
        }
        if self.queue.capacity == 0 {
            return Err(ConfigError::invalid("queue.capacity", "must be at least 1"));
        }
        if self.enrichment.max_requests_per_minute == 0 {
            return Err(ConfigError::invalid(
                "enrichment.max_requests_per_minute",
                "must be at least 1",
            ));
        }
        if self.enrichment.max_attempts == 0 {
            return Err(ConfigError::invalid("enrichment.max_attempts", "must be at least 1"));
        }
        Ok(())
    }
    /// Threshold must be positive and below the plausibility ceiling
    pub fn check_threshold(&self, kmh: f64) -> Result<(), String> {
        if !(kmh.is_finite() && kmh > 0.0) {
            return Err(format!("must be positive, got {}", kmh));
        }
        if !(self.max_plausible_speed_kmh > kmh) {
            return Err(format!(
                "{} must stay below max_plausible_speed_kmh {}",
                kmh, self.max_plausible_speed_kmh
            ));
        }
        Ok(())
    }
    pub fn speed_limit(&self, name: &str) -> Option<f64> {
        self.speed_limits.get(name).copied()
    }
    pub fn coordinate_manager(&self) -> Result<CoordinateManager, ConfigError> {
        Ok(CoordinateManager::new(
            self.native.width,
            self.native.height,
            self.processing.width,
            self.processing.height,
        )?)
    }
    /// Empty whitelist accepts every class
    pub fn accepts_class(&self, class_label: &str) -> bool {
        self.vehicle_classes.is_empty()
            || self
                .vehicle_classes
                .iter()
                .any(|c| c.eq_ignore_ascii_case(class_label))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tracker.max_age, 20);
        assert_eq!(config.tracker.min_hits, 3);
        assert_eq!(config.enrichment.max_requests_per_minute, 10);
        assert_eq!(config.region, MeasurementRegion::new(100.0, 50.0, 400.0, 250.0));
        assert!(config.accepts_class("Truck"));
        assert_eq!(config.speed_limit("urban"), Some(50.0));
        assert_eq!(config.speed_limit("highway"), Some(120.0));
        assert_eq!(config.speed_limit("school"), None);
        assert!(!config.accepts_class("person"));
    }

    #[test]
    fn test_partial_yaml() {
        let yaml = r#"
stream_id: gate-2
fps: 25
tracker:
  max_age: 10
crossing_policy: boundary
queue:
  capacity: 4
  backpressure:
    policy: block
    timeout_ms: 250
"#;
        let config = PipelineConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.stream_id, "gate-2");
        assert_eq!(config.fps, 25.0);
        assert_eq!(config.tracker.max_age, 10);
        assert_eq!(config.tracker.min_hits, 3);
        assert_eq!(config.crossing_policy, CrossingPolicy::Boundary);
        assert_eq!(config.queue.backpressure, BackpressurePolicy::Block { timeout_ms: 250 });
        assert_eq!(config.queue.shutdown_grace_ms, 5000);
    }

    #[test]
    fn test_yaml_presets_and_displacement() {
        let yaml = r#"
speed_limits:
  school: 25
crossing_policy:
  displacement:
    min_pixels: 100
"#;
        let config = PipelineConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.speed_limit("school"), Some(25.0));
        // Replaces the default presets
        assert_eq!(config.speed_limit("urban"), None);
        assert_eq!(config.crossing_policy, CrossingPolicy::Displacement { min_pixels: 100.0 });
    }

    #[test]
    fn test_rejects_invalid() {
        let cases = [
            "fps: 0",
            "native: {width: 1, height: 1080}",
            "region: {x1: 100, y1: 50, x2: 5000, y2: 250}",
            "tracker: {iou_threshold: 0}",
            "min_confidence: 1.5",
            "queue: {capacity: 0}",
            "speed_threshold_kmh: 400",
            "speed_limits: {autobahn: 350}",
            "speed_limits: {parking: 0}",
            "crossing_policy: {displacement: {min_pixels: 0}}",
        ];
        for yaml in cases {
            assert!(PipelineConfig::from_yaml(yaml).is_err(), "accepted {}", yaml);
        }
    }

    #[test]
    fn test_load_missing_file() {
        let path = std::env::temp_dir().join(format!("speedtrap-{}.yaml", uuid::Uuid::new_v4()));
        assert!(matches!(PipelineConfig::load(&path), Err(ConfigError::Io { .. })));
    }
}
