use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender, TrySendError};
use tracing::{debug, error, info, warn};

use crate::pipeline::config::{BackpressurePolicy, QueueConfig};
use crate::pipeline::enrichment::Enricher;
use crate::pipeline::metrics::PipelineMetrics;
use crate::pipeline::sink::ViolationSink;
use crate::pipeline::violation::{EnrichmentOutcome, Evidence, Violation};

/// Violation waiting for enrichment and persistence
#[derive(Debug, Clone)]
pub struct DispatchJob {
    pub violation: Violation,
    /// JPEG crop handed to the analyzer
    pub jpeg: Option<Vec<u8>>,
}

/// What happened to a job handed to [`Dispatcher::submit`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    Queued,
    /// Queued after evicting this many older jobs
    QueuedWithEviction(usize),
    /// Queue stayed full for the whole block timeout
    Dropped,
    /// Dispatcher already shut down
    Closed,
}

/// Bounded queue between the frame loop and a single enrichment/persistence worker.
/// Jobs are handled in submission order.
pub struct Dispatcher {
    tx: Option<Sender<DispatchJob>>,
    // Producer-side handle on the queue, used for eviction and shutdown draining
    queue: Receiver<DispatchJob>,
    done: Receiver<()>,
    abandon: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    policy: BackpressurePolicy,
    grace: Duration,
    metrics: PipelineMetrics,
}

impl Dispatcher {
    pub fn spawn(
        config: &QueueConfig,
        enricher: Option<Enricher>,
        sink: Box<dyn ViolationSink>,
        metrics: PipelineMetrics,
    ) -> Self {
        let (tx, rx) = bounded::<DispatchJob>(config.capacity.max(1));
        let (done_tx, done_rx) = bounded::<()>(1);
        let abandon = Arc::new(AtomicBool::new(false));
        let worker = {
            let rx = rx.clone();
            let abandon = abandon.clone();
            let metrics = metrics.clone();
            thread::spawn(move || {
                run_worker(rx, enricher, sink, metrics, abandon);
                let _ = done_tx.send(());
            })
        };
        info!(
            capacity = config.capacity,
            policy = ?config.backpressure,
            "violation dispatcher started"
        );
        Dispatcher {
            tx: Some(tx),
            queue: rx,
            done: done_rx,
            abandon,
            worker: Some(worker),
            policy: config.backpressure,
            grace: Duration::from_millis(config.shutdown_grace_ms),
            metrics,
        }
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Enqueues a job according to the backpressure policy. Never blocks longer
    /// than the configured timeout.
    pub fn submit(&self, job: DispatchJob) -> Submission {
        let tx = match &self.tx {
            Some(tx) => tx,
            None => return Submission::Closed,
        };
        match self.policy {
            BackpressurePolicy::DropOldest => {
                let mut job = job;
                let mut evicted = 0;
                loop {
                    match tx.try_send(job) {
                        Ok(()) if evicted == 0 => return Submission::Queued,
                        Ok(()) => return Submission::QueuedWithEviction(evicted),
                        Err(TrySendError::Full(back)) => {
                            job = back;
                            if let Ok(oldest) = self.queue.try_recv() {
                                evicted += 1;
                                self.metrics.inc(&self.metrics.queue_dropped);
                                warn!(
                                    violation_id = %oldest.violation.id,
                                    track_id = oldest.violation.track_id,
                                    "violation queue full, oldest pending violation dropped"
                                );
                            }
                        }
                        Err(TrySendError::Disconnected(_)) => return Submission::Closed,
                    }
                }
            }
            BackpressurePolicy::Block { timeout_ms } => {
                match tx.send_timeout(job, Duration::from_millis(timeout_ms)) {
                    Ok(()) => Submission::Queued,
                    Err(SendTimeoutError::Timeout(job)) => {
                        self.metrics.inc(&self.metrics.queue_dropped);
                        warn!(
                            violation_id = %job.violation.id,
                            track_id = job.violation.track_id,
                            timeout_ms,
                            "violation queue stayed full, newest violation dropped"
                        );
                        Submission::Dropped
                    }
                    Err(SendTimeoutError::Disconnected(_)) => Submission::Closed,
                }
            }
        }
    }

    /// Stops accepting jobs and lets the worker drain for the grace period.
    /// Returns the number of jobs abandoned afterwards.
    pub fn shutdown(&mut self) -> u64 {
        let tx = match self.tx.take() {
            Some(tx) => tx,
            None => return 0,
        };
        drop(tx);
        info!(pending = self.queue.len(), grace_ms = self.grace.as_millis() as u64, "draining violation queue");
        match self.done.recv_timeout(self.grace) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(worker) = self.worker.take() {
                    if worker.join().is_err() {
                        error!("violation worker panicked");
                    }
                }
                debug!("violation queue drained");
                0
            }
            Err(RecvTimeoutError::Timeout) => {
                self.abandon.store(true, Ordering::SeqCst);
                let mut abandoned = 0;
                while self.queue.try_recv().is_ok() {
                    abandoned += 1;
                }
                self.metrics.add(&self.metrics.abandoned_on_shutdown, abandoned);
                warn!(abandoned, "grace period elapsed, queued violations abandoned");
                // In-flight job is left to finish on its own
                self.worker.take();
                abandoned
            }
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(
    rx: Receiver<DispatchJob>,
    mut enricher: Option<Enricher>,
    mut sink: Box<dyn ViolationSink>,
    metrics: PipelineMetrics,
    abandon: Arc<AtomicBool>,
) {
    for job in rx.iter() {
        if abandon.load(Ordering::SeqCst) {
            metrics.inc(&metrics.abandoned_on_shutdown);
            continue;
        }
        let DispatchJob { mut violation, jpeg } = job;
        let outcome = match enricher.as_mut() {
            Some(enricher) => {
                let evidence = Evidence {
                    violation_id: violation.id,
                    track_id: violation.track_id,
                    class_label: violation.class_label.clone(),
                    speed_kmh: violation.speed_kmh,
                    captured_at: violation.exit_time,
                    jpeg,
                };
                let outcome = enricher.enrich(&evidence);
                match outcome {
                    EnrichmentOutcome::Enriched { .. } => metrics.inc(&metrics.enrichment_successes),
                    _ => metrics.inc(&metrics.enrichment_failures),
                }
                outcome
            }
            None => EnrichmentOutcome::Disabled,
        };
        violation.attach_enrichment(outcome);
        match sink.store(&violation) {
            Ok(()) => {
                metrics.inc(&metrics.persisted);
                info!(
                    violation_id = %violation.id,
                    track_id = violation.track_id,
                    speed_kmh = violation.speed_kmh,
                    "violation persisted"
                );
            }
            Err(err) => {
                metrics.inc(&metrics.persistence_failures);
                error!(
                    violation_id = %violation.id,
                    track_id = violation.track_id,
                    "can't persist violation: {}",
                    err
                );
            }
        }
    }
    if let Err(err) = sink.flush() {
        error!("can't flush violation sink: {}", err);
    }
}
