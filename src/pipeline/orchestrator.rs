use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::mot::{Detection, Track, Tracker};
use crate::pipeline::config::{DetectionSpace, PipelineConfig};
use crate::pipeline::detector::Detector;
use crate::pipeline::dispatcher::{DispatchJob, Dispatcher, Submission};
use crate::pipeline::enrichment::{Enricher, HttpAnalyzer, VehicleAnalyzer};
use crate::pipeline::frame::{encode_jpeg, Frame};
use crate::pipeline::metrics::{MetricsSummary, PipelineMetrics};
use crate::pipeline::pipeline_errors::ConfigError;
use crate::pipeline::sink::ViolationSink;
use crate::pipeline::violation::{EnrichmentOutcome, Severity, Violation};
use crate::speed::{CalibrationModel, SpeedEstimator, SpeedMeasurement};
use crate::utils::{CoordinateError, CoordinateManager};

/// What a single frame produced
#[derive(Debug, Default)]
pub struct FrameReport {
    pub frame_index: u64,
    /// Frame was not newer than the last one and was skipped
    pub stale: bool,
    pub active_tracks: usize,
    pub dropped_detections: usize,
    pub measurements: Vec<(u64, SpeedMeasurement)>,
    /// Violations handed to the dispatcher, before enrichment
    pub violations: Vec<Violation>,
}

/// Per-stream orchestrator: detector, tracker, speed estimation, thresholding
/// and hand-off to the enrichment/persistence worker
pub struct ViolationPipeline {
    config: PipelineConfig,
    coords: CoordinateManager,
    tracker: Tracker,
    estimator: SpeedEstimator,
    detector: Box<dyn Detector>,
    dispatcher: Dispatcher,
    metrics: PipelineMetrics,
    start_time: DateTime<Utc>,
}

impl ViolationPipeline {
    /// Loads the calibration model from `config.calibration_path` and sets up
    /// the HTTP analyzer when an endpoint is configured.
    pub fn from_config(
        config: PipelineConfig,
        detector: Box<dyn Detector>,
        sink: Box<dyn ViolationSink>,
    ) -> Result<Self, ConfigError> {
        let calibration = CalibrationModel::load(&config.calibration_path)?;
        let analyzer = HttpAnalyzer::from_config(&config.enrichment)
            .map(|analyzer| Box::new(analyzer) as Box<dyn VehicleAnalyzer>);
        Self::new(config, calibration, detector, sink, analyzer)
    }

    pub fn new(
        config: PipelineConfig,
        calibration: CalibrationModel,
        detector: Box<dyn Detector>,
        sink: Box<dyn ViolationSink>,
        analyzer: Option<Box<dyn VehicleAnalyzer>>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        calibration.validate()?;
        let coords = config.coordinate_manager()?;
        let tracker = Tracker::new(config.tracker.clone())?
            .with_frame_bounds(config.native.width as f32, config.native.height as f32);
        let estimator = SpeedEstimator::new(config.region, calibration, config.fps)
            .with_policy(config.crossing_policy)
            .with_max_plausible_speed(config.max_plausible_speed_kmh)
            .with_reentry(config.allow_reentry);
        if let Some(dir) = &config.crop_dir {
            fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
                path: dir.clone(),
                source,
            })?;
        }
        let metrics = PipelineMetrics::new();
        let enricher = analyzer.map(|analyzer| Enricher::new(analyzer, &config.enrichment));
        let enrichment_enabled = enricher.is_some();
        let dispatcher = Dispatcher::spawn(&config.queue, enricher, sink, metrics.clone());
        let start_time = config.start_time.unwrap_or_else(Utc::now);
        info!(
            stream_id = %config.stream_id,
            fps = config.fps,
            threshold_kmh = config.speed_threshold_kmh,
            policy = ?config.crossing_policy,
            enrichment_enabled,
            "violation pipeline started"
        );
        Ok(ViolationPipeline {
            config,
            coords,
            tracker,
            estimator,
            detector,
            dispatcher,
            metrics,
            start_time,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }
    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }
    pub fn coordinates(&self) -> &CoordinateManager {
        &self.coords
    }
    pub fn estimator(&self) -> &SpeedEstimator {
        &self.estimator
    }
    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }
    pub fn pending_violations(&self) -> usize {
        self.dispatcher.pending()
    }
    /// Threshold applied to the next measurements
    pub fn speed_threshold(&self) -> f64 {
        self.config.speed_threshold_kmh
    }

    /// Switches the threshold for violations raised from now on.
    /// Violations already raised keep the threshold they were judged against.
    pub fn set_speed_threshold(&mut self, kmh: f64) -> Result<(), ConfigError> {
        self.config
            .check_threshold(kmh)
            .map_err(|reason| ConfigError::invalid("speed_threshold_kmh", reason))?;
        let previous_kmh = std::mem::replace(&mut self.config.speed_threshold_kmh, kmh);
        info!(
            stream_id = %self.config.stream_id,
            previous_kmh,
            threshold_kmh = kmh,
            "speed threshold changed"
        );
        Ok(())
    }

    /// Switches to a named preset from `speed_limits`
    pub fn select_speed_limit(&mut self, name: &str) -> Result<f64, ConfigError> {
        let kmh = self
            .config
            .speed_limit(name)
            .ok_or_else(|| ConfigError::invalid("speed_limits", format!("no preset named `{}`", name)))?;
        self.set_speed_threshold(kmh)?;
        debug!(preset = name, threshold_kmh = kmh, "speed limit preset selected");
        Ok(kmh)
    }

    /// Resizes the processing canvas detections may be reported in
    pub fn update_processing_size(&mut self, width: u32, height: u32) -> Result<(), CoordinateError> {
        self.coords.update_processing_size(width, height)
    }

    /// Adopts the resolution of `frame` as the native size when it differs
    fn follow_frame_size(&mut self, frame: &Frame) {
        let (width, height) = match frame.dimensions() {
            Some(size) if size != self.coords.native_size() => size,
            _ => return,
        };
        if let Err(err) = self.coords.update_native_size(width, height) {
            warn!(frame_index = frame.index, "frame size ignored: {}", err);
            return;
        }
        self.tracker.set_frame_bounds(width as f32, height as f32);
        info!(frame_index = frame.index, width, height, "native frame size changed");
        if let Err(reason) = self.estimator.region().validate(width, height) {
            warn!(frame_index = frame.index, "measurement region no longer fits: {}", reason);
        }
    }

    /// Wall-clock time of a (possibly fractional) frame index
    pub fn frame_time(&self, frame: f64) -> DateTime<Utc> {
        let micros = (frame / self.config.fps * 1_000_000.0).round() as i64;
        self.start_time + ChronoDuration::microseconds(micros)
    }

    /// Runs the detector on `frame` and processes its output.
    /// Detector failures count as a frame without detections.
    pub fn process_frame(&mut self, frame: &Frame) -> FrameReport {
        let detections = match self.detector.detect(frame) {
            Ok(detections) => detections,
            Err(err) => {
                self.metrics.inc(&self.metrics.detector_failures);
                warn!(frame_index = frame.index, "detector failed: {}", err);
                vec![]
            }
        };
        self.process_detections(frame, detections)
    }

    pub fn process_detections(&mut self, frame: &Frame, detections: Vec<Detection>) -> FrameReport {
        let mut report = FrameReport {
            frame_index: frame.index,
            ..FrameReport::default()
        };
        let total = detections.len();
        let detections: Vec<Detection> = detections
            .into_iter()
            .filter(|d| d.confidence >= self.config.min_confidence && self.config.accepts_class(&d.class_label))
            .collect();
        let filtered = total - detections.len();

        self.follow_frame_size(frame);
        let detections: Vec<Detection> = detections
            .into_iter()
            .map(|mut d| {
                if self.config.detection_space == DetectionSpace::Processing {
                    d.bbox = self.coords.rect_to_native(&d.bbox);
                }
                d.frame_index = frame.index;
                d
            })
            .collect();

        let update = self.tracker.update(frame.index, &detections);
        report.active_tracks = self.tracker.len();
        if update.stale {
            self.metrics.inc(&self.metrics.stale_frames);
            report.stale = true;
            return report;
        }
        self.metrics.inc(&self.metrics.frames);
        self.metrics.add(&self.metrics.detections, total as u64);
        self.metrics.add(&self.metrics.filtered_detections, filtered as u64);
        report.dropped_detections = update.dropped_detections;
        self.metrics
            .add(&self.metrics.dropped_detections, update.dropped_detections as u64);
        self.metrics
            .add(&self.metrics.vehicles_tracked, update.spawned.len() as u64);
        self.metrics
            .add(&self.metrics.tracks_removed, update.removed.len() as u64);
        for removed in &update.removed {
            debug!(track_id = removed.get_id(), class = removed.class_label(), "track removed");
        }

        let updated: Vec<u64> = update.updated_ids().collect();
        for track_id in updated {
            let speed_threshold = self.speed_threshold();
            let track = match self.tracker.get_mut(track_id) {
                Some(track) => track,
                None => continue,
            };
            let measurement = match self.estimator.observe(track, &self.coords) {
                Some(Ok(measurement)) => measurement,
                Some(Err(failure)) => {
                    self.metrics.inc(&self.metrics.estimation_failures);
                    warn!(track_id, "speed estimation skipped: {}", failure);
                    continue;
                }
                None => continue,
            };
            self.metrics.record_speed(measurement.speed_kmh);
            info!(
                track_id,
                class = track.class_label(),
                speed_kmh = measurement.speed_kmh,
                elapsed_secs = measurement.elapsed_secs,
                "speed measured"
            );
            report.measurements.push((track_id, measurement));
            if measurement.speed_kmh > speed_threshold {
                track.mark_violation();
                let track = track.clone();
                let violation = self.raise_violation(frame, &track, &measurement);
                report.violations.push(violation);
            }
        }
        report
    }

    fn raise_violation(
        &self,
        frame: &Frame,
        track: &Track,
        measurement: &SpeedMeasurement,
    ) -> Violation {
        let id = Uuid::new_v4();
        let exit_time = self.frame_time(measurement.exit.frame);
        let bbox = track.get_bbox();
        let crop = frame.crop(&bbox);
        let crop_path = crop
            .as_ref()
            .and_then(|crop| self.save_crop(crop, track.get_id(), exit_time));
        let jpeg = crop.as_ref().and_then(|crop| match encode_jpeg(crop) {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                warn!(track_id = track.get_id(), "can't encode evidence crop: {}", err);
                None
            }
        });
        let violation = Violation {
            id,
            stream_id: self.config.stream_id.clone(),
            track_id: track.get_id(),
            class_label: track.class_label().to_string(),
            speed_kmh: measurement.speed_kmh,
            threshold_kmh: self.speed_threshold(),
            severity: Severity::classify(measurement.speed_kmh, self.speed_threshold()),
            entry: measurement.entry,
            exit: measurement.exit,
            entry_time: self.frame_time(measurement.entry.frame),
            exit_time,
            bbox,
            crop_path,
            enrichment: EnrichmentOutcome::Pending,
        };
        self.metrics.inc(&self.metrics.violations);
        warn!(
            violation_id = %id,
            track_id = violation.track_id,
            speed_kmh = violation.speed_kmh,
            threshold_kmh = violation.threshold_kmh,
            severity = ?violation.severity,
            "speed violation"
        );
        let submission = self.dispatcher.submit(DispatchJob {
            violation: violation.clone(),
            jpeg,
        });
        if submission == Submission::Closed {
            warn!(violation_id = %id, "dispatcher closed, violation not persisted");
        }
        violation
    }

    fn save_crop(
        &self,
        crop: &image::RgbImage,
        track_id: u64,
        at: DateTime<Utc>,
    ) -> Option<PathBuf> {
        let dir = self.config.crop_dir.as_ref()?;
        let path = dir.join(format!("{}_{}.jpg", track_id, at.format("%Y%m%d_%H%M%S_%3f")));
        match crop.save(&path) {
            Ok(()) => {
                debug!(track_id, path = %path.display(), "evidence crop saved");
                Some(path)
            }
            Err(err) => {
                warn!(track_id, path = %path.display(), "can't save evidence crop: {}", err);
                None
            }
        }
    }

    /// Runs every frame through the pipeline in order
    pub fn run<I>(&mut self, frames: I) -> usize
    where
        I: IntoIterator<Item = Frame>,
    {
        frames
            .into_iter()
            .map(|frame| self.process_frame(&frame).violations.len())
            .sum()
    }

    /// Forgets all tracks. Ids keep increasing and pending violations stay queued.
    pub fn reset(&mut self) {
        self.tracker.reset();
        info!(stream_id = %self.config.stream_id, "pipeline reset");
    }

    /// Drains the violation queue within the grace period and returns run statistics
    pub fn shutdown(&mut self) -> MetricsSummary {
        let abandoned = self.dispatcher.shutdown();
        let summary = self.metrics.summary();
        info!(
            stream_id = %self.config.stream_id,
            frames = summary.frames,
            violations = summary.violations,
            persisted = summary.persisted,
            abandoned,
            "violation pipeline stopped"
        );
        summary
    }
}
