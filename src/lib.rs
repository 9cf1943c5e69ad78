//! Vehicle tracking and speed-violation detection over per-frame detections
pub mod mot;
pub mod pipeline;
pub mod speed;
pub mod utils;
