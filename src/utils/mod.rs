//! Geometry primitives and coordinate mapping
mod utils;
mod coordinates;

pub use self::{
    utils::*,
    coordinates::*,
};
