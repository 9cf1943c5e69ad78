//! Export contents of `mot` folder
mod candidate_queue;
mod detection;
mod iou_tracker;
mod mot_errors;
mod track;
#[cfg(test)]
pub(crate) mod test_data;

pub use self::{
    detection::*,
    iou_tracker::*,
    mot_errors::*,
    track::*,
};
