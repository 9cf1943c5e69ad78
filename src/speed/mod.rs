//! Region crossing, calibration and speed estimation
mod calibration;
mod estimator;
mod region;

pub use self::{
    calibration::*,
    estimator::*,
    region::*,
};
