use std::collections::VecDeque;
use std::thread;
use std::time::{Duration, Instant};

use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::pipeline::config::EnrichmentConfig;
use crate::pipeline::pipeline_errors::EnrichmentError;
use crate::pipeline::violation::{EnrichmentOutcome, Evidence, VehicleInfo};

const RATE_WINDOW: Duration = Duration::from_secs(60);

const ANALYSIS_PROMPT: &str = "Extract ONLY these details from this vehicle image:\n\
| Vehicle Model | Color | Company | Number Plate |\n\
|--------------|--------|---------|--------------|";

/// External vehicle analysis capability
pub trait VehicleAnalyzer: Send {
    fn analyze(&self, evidence: &Evidence) -> Result<VehicleInfo, EnrichmentError>;
}

/// Sliding-window limiter: at most `max_requests` within any `window`.
/// Callers wait for a free slot instead of being dropped.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    issued: VecDeque<Instant>,
}

impl RateLimiter {
    pub fn per_minute(max_requests: u32) -> Self {
        Self::new(max_requests as usize, RATE_WINDOW)
    }
    pub fn new(max_requests: usize, window: Duration) -> Self {
        RateLimiter {
            max_requests: max_requests.max(1),
            window,
            issued: VecDeque::new(),
        }
    }
    fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.issued.front() {
            if now.duration_since(oldest) >= self.window {
                self.issued.pop_front();
            } else {
                break;
            }
        }
    }
    /// Takes a request slot, sleeping up to `max_wait` for one to free up.
    /// Returns the time spent waiting.
    pub fn acquire(&mut self, max_wait: Duration) -> Result<Duration, EnrichmentError> {
        let started = Instant::now();
        loop {
            let now = Instant::now();
            self.prune(now);
            if self.issued.len() < self.max_requests {
                self.issued.push_back(now);
                return Ok(now.duration_since(started));
            }
            let oldest = match self.issued.front() {
                Some(oldest) => *oldest,
                None => continue,
            };
            let free_at = oldest + self.window;
            if free_at.duration_since(started) > max_wait {
                return Err(EnrichmentError::RateLimited {
                    waited_ms: now.duration_since(started).as_millis() as u64,
                });
            }
            let pause = free_at.saturating_duration_since(now);
            debug!(pause_ms = pause.as_millis() as u64, "rate limit reached, waiting for a slot");
            thread::sleep(pause);
        }
    }
    pub fn in_window(&self) -> usize {
        self.issued.len()
    }
}

/// Drives an analyzer under the rate limit with bounded retries
pub struct Enricher {
    analyzer: Box<dyn VehicleAnalyzer>,
    limiter: RateLimiter,
    max_wait: Duration,
    max_attempts: u32,
    backoff: Duration,
}

impl Enricher {
    pub fn new(analyzer: Box<dyn VehicleAnalyzer>, config: &EnrichmentConfig) -> Self {
        Enricher {
            analyzer,
            limiter: RateLimiter::per_minute(config.max_requests_per_minute),
            max_wait: Duration::from_millis(config.max_wait_ms),
            max_attempts: config.max_attempts.max(1),
            backoff: Duration::from_millis(config.backoff_ms),
        }
    }
    pub fn with_limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = limiter;
        self
    }

    /// Never fails: the outcome records either the vehicle info or the last error
    pub fn enrich(&mut self, evidence: &Evidence) -> EnrichmentOutcome {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = self
                .limiter
                .acquire(self.max_wait)
                .and_then(|_| self.analyzer.analyze(evidence));
            match result {
                Ok(info) => {
                    info!(
                        violation_id = %evidence.violation_id,
                        track_id = evidence.track_id,
                        attempt,
                        "vehicle analyzed: {} {} {} [{}]",
                        info.color,
                        info.company,
                        info.model,
                        info.number_plate
                    );
                    return EnrichmentOutcome::Enriched {
                        info,
                        attempts: attempt,
                    };
                }
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.backoff * 2u32.saturating_pow(attempt - 1);
                    warn!(
                        violation_id = %evidence.violation_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "analysis failed, retrying: {}",
                        err
                    );
                    thread::sleep(delay);
                }
                Err(err) => {
                    warn!(
                        violation_id = %evidence.violation_id,
                        attempt,
                        "analysis abandoned: {}",
                        err
                    );
                    return EnrichmentOutcome::Failed {
                        reason: err.to_string(),
                        attempts: attempt,
                    };
                }
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct AnalysisRequest<'a> {
    violation_id: String,
    track_id: u64,
    class_label: &'a str,
    speed_kmh: f64,
    captured_at: String,
    prompt: &'a str,
    image_mime: &'a str,
    base64_image: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AnalysisResponse {
    Structured(VehicleInfo),
    Text { text: String },
}

/// JSON-over-HTTP analysis service client
pub struct HttpAnalyzer {
    agent: ureq::Agent,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpAnalyzer {
    pub fn new(endpoint: &str, api_key: Option<String>, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        HttpAnalyzer {
            agent,
            endpoint: endpoint.to_string(),
            api_key,
        }
    }
    pub fn from_config(config: &EnrichmentConfig) -> Option<Self> {
        let endpoint = config.endpoint.as_deref()?;
        Some(Self::new(
            endpoint,
            config.api_key.clone(),
            Duration::from_millis(config.timeout_ms),
        ))
    }
}

/// Accepts structured JSON, `{"text": ...}` or the bare markdown table
pub fn parse_analysis(body: &str) -> Result<VehicleInfo, EnrichmentError> {
    match serde_json::from_str::<AnalysisResponse>(body) {
        Ok(AnalysisResponse::Structured(info)) => Ok(info.normalized()),
        Ok(AnalysisResponse::Text { text }) => VehicleInfo::parse_table(&text)
            .ok_or_else(|| EnrichmentError::Malformed("no table row in response text".to_string())),
        Err(_) => VehicleInfo::parse_table(body)
            .ok_or_else(|| EnrichmentError::Malformed("neither JSON nor table".to_string())),
    }
}

impl VehicleAnalyzer for HttpAnalyzer {
    fn analyze(&self, evidence: &Evidence) -> Result<VehicleInfo, EnrichmentError> {
        let jpeg = evidence.jpeg.as_ref().ok_or(EnrichmentError::NoEvidence)?;
        let request = AnalysisRequest {
            violation_id: evidence.violation_id.to_string(),
            track_id: evidence.track_id,
            class_label: &evidence.class_label,
            speed_kmh: evidence.speed_kmh,
            captured_at: evidence.captured_at.to_rfc3339(),
            prompt: ANALYSIS_PROMPT,
            image_mime: "image/jpeg",
            base64_image: base64::engine::general_purpose::STANDARD.encode(jpeg),
        };
        let mut call = self.agent.post(&self.endpoint);
        if let Some(key) = &self.api_key {
            call = call.set("Authorization", &format!("Bearer {}", key));
        }
        let response = match call.send_json(&request) {
            Ok(response) => response,
            Err(ureq::Error::Status(status, response)) => {
                let message = response.into_string().unwrap_or_default();
                return Err(EnrichmentError::Service { status, message });
            }
            Err(ureq::Error::Transport(transport)) => {
                return Err(EnrichmentError::Transport(transport.to_string()));
            }
        };
        let body = response
            .into_string()
            .map_err(|err| EnrichmentError::Transport(err.to_string()))?;
        parse_analysis(&body)
    }
}
