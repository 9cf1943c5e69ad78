use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

/// Run counters shared between the frame loop and the dispatch worker
#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    pub frames: Arc<AtomicU64>,
    pub stale_frames: Arc<AtomicU64>,
    pub detector_failures: Arc<AtomicU64>,
    pub detections: Arc<AtomicU64>,
    pub filtered_detections: Arc<AtomicU64>,
    pub dropped_detections: Arc<AtomicU64>,
    pub vehicles_tracked: Arc<AtomicU64>,
    pub tracks_removed: Arc<AtomicU64>,
    pub speed_measurements: Arc<AtomicU64>,
    pub estimation_failures: Arc<AtomicU64>,
    pub violations: Arc<AtomicU64>,
    pub enrichment_successes: Arc<AtomicU64>,
    pub enrichment_failures: Arc<AtomicU64>,
    pub persisted: Arc<AtomicU64>,
    pub persistence_failures: Arc<AtomicU64>,
    pub queue_dropped: Arc<AtomicU64>,
    pub abandoned_on_shutdown: Arc<AtomicU64>,
    /// Sum of measured speeds in milli-km/h
    speed_sum_millis: Arc<AtomicU64>,
    max_speed_millis: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            frames: Arc::new(AtomicU64::new(0)),
            stale_frames: Arc::new(AtomicU64::new(0)),
            detector_failures: Arc::new(AtomicU64::new(0)),
            detections: Arc::new(AtomicU64::new(0)),
            filtered_detections: Arc::new(AtomicU64::new(0)),
            dropped_detections: Arc::new(AtomicU64::new(0)),
            vehicles_tracked: Arc::new(AtomicU64::new(0)),
            tracks_removed: Arc::new(AtomicU64::new(0)),
            speed_measurements: Arc::new(AtomicU64::new(0)),
            estimation_failures: Arc::new(AtomicU64::new(0)),
            violations: Arc::new(AtomicU64::new(0)),
            enrichment_successes: Arc::new(AtomicU64::new(0)),
            enrichment_failures: Arc::new(AtomicU64::new(0)),
            persisted: Arc::new(AtomicU64::new(0)),
            persistence_failures: Arc::new(AtomicU64::new(0)),
            queue_dropped: Arc::new(AtomicU64::new(0)),
            abandoned_on_shutdown: Arc::new(AtomicU64::new(0)),
            speed_sum_millis: Arc::new(AtomicU64::new(0)),
            max_speed_millis: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }

    pub fn inc(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self, counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    pub fn record_speed(&self, speed_kmh: f64) {
        let millis = (speed_kmh.max(0.0) * 1000.0).round() as u64;
        self.speed_measurements.fetch_add(1, Ordering::Relaxed);
        self.speed_sum_millis.fetch_add(millis, Ordering::Relaxed);
        self.max_speed_millis.fetch_max(millis, Ordering::Relaxed);
    }

    pub fn avg_speed_kmh(&self) -> f64 {
        let n = self.speed_measurements.load(Ordering::Relaxed);
        if n == 0 {
            return 0.0;
        }
        self.speed_sum_millis.load(Ordering::Relaxed) as f64 / 1000.0 / n as f64
    }

    pub fn max_speed_kmh(&self) -> f64 {
        self.max_speed_millis.load(Ordering::Relaxed) as f64 / 1000.0
    }

    pub fn fps(&self) -> f64 {
        let frames = self.frames.load(Ordering::Relaxed);
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed > 0.01 {
            frames as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            frames: self.get(&self.frames),
            stale_frames: self.get(&self.stale_frames),
            fps: self.fps(),
            detector_failures: self.get(&self.detector_failures),
            detections: self.get(&self.detections),
            filtered_detections: self.get(&self.filtered_detections),
            dropped_detections: self.get(&self.dropped_detections),
            vehicles_tracked: self.get(&self.vehicles_tracked),
            tracks_removed: self.get(&self.tracks_removed),
            speed_measurements: self.get(&self.speed_measurements),
            estimation_failures: self.get(&self.estimation_failures),
            avg_speed_kmh: self.avg_speed_kmh(),
            max_speed_kmh: self.max_speed_kmh(),
            violations: self.get(&self.violations),
            enrichment_successes: self.get(&self.enrichment_successes),
            enrichment_failures: self.get(&self.enrichment_failures),
            persisted: self.get(&self.persisted),
            persistence_failures: self.get(&self.persistence_failures),
            queue_dropped: self.get(&self.queue_dropped),
            abandoned_on_shutdown: self.get(&self.abandoned_on_shutdown),
            elapsed_secs: self.started_at.elapsed().as_secs_f64(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub frames: u64,
    pub stale_frames: u64,
    pub fps: f64,
    pub detector_failures: u64,
    pub detections: u64,
    pub filtered_detections: u64,
    pub dropped_detections: u64,
    pub vehicles_tracked: u64,
    pub tracks_removed: u64,
    pub speed_measurements: u64,
    pub estimation_failures: u64,
    pub avg_speed_kmh: f64,
    pub max_speed_kmh: f64,
    pub violations: u64,
    pub enrichment_successes: u64,
    pub enrichment_failures: u64,
    pub persisted: u64,
    pub persistence_failures: u64,
    pub queue_dropped: u64,
    pub abandoned_on_shutdown: u64,
    pub elapsed_secs: f64,
}
