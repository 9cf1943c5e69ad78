//! Per-stream violation pipeline: detector input, thresholding, enrichment and persistence
mod config;
mod detector;
mod dispatcher;
mod enrichment;
mod frame;
mod metrics;
mod orchestrator;
mod pipeline_errors;
mod sink;
mod violation;

pub use self::{
    config::*,
    detector::*,
    dispatcher::*,
    enrichment::*,
    frame::*,
    metrics::*,
    orchestrator::*,
    pipeline_errors::*,
    sink::*,
    violation::*,
};
