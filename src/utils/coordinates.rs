use thiserror::Error;
use tracing::debug;

use crate::utils::{Point, Rect};

pub const DEFAULT_NATIVE_WIDTH: u32 = 1920;
pub const DEFAULT_NATIVE_HEIGHT: u32 = 1080;
pub const DEFAULT_PROCESSING_WIDTH: u32 = 1280;
pub const DEFAULT_PROCESSING_HEIGHT: u32 = 720;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoordinateError {
    #[error("{space} dimensions must both be greater than 1, got {width}x{height}")]
    BadDimensions {
        space: &'static str,
        width: u32,
        height: u32,
    },
}

/// Maps points between the video's native frame space and a processing (display) canvas.
///
/// The native image is scaled uniformly to fit the canvas and centered (letterbox / pillarbox),
/// so one scale factor serves both axes and both offsets are non-negative.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinateManager {
    native_width: u32,
    native_height: u32,
    processing_width: u32,
    processing_height: u32,
    scale: f64,
    offset_x: i32,
    offset_y: i32,
}

impl Default for CoordinateManager {
    fn default() -> Self {
        let (scale, offset_x, offset_y) = fit(
            DEFAULT_NATIVE_WIDTH,
            DEFAULT_NATIVE_HEIGHT,
            DEFAULT_PROCESSING_WIDTH,
            DEFAULT_PROCESSING_HEIGHT,
        );
        CoordinateManager {
            native_width: DEFAULT_NATIVE_WIDTH,
            native_height: DEFAULT_NATIVE_HEIGHT,
            processing_width: DEFAULT_PROCESSING_WIDTH,
            processing_height: DEFAULT_PROCESSING_HEIGHT,
            scale,
            offset_x,
            offset_y,
        }
    }
}

// Uniform scale and centering offsets for native (nw, nh) inside canvas (pw, ph)
fn fit(nw: u32, nh: u32, pw: u32, ph: u32) -> (f64, i32, i32) {
    let scale = f64::min(pw as f64 / nw as f64, ph as f64 / nh as f64);
    let scaled_w = nw as f64 * scale;
    let scaled_h = nh as f64 * scale;
    let offset_x = ((pw as f64 - scaled_w) / 2.0).max(0.0).floor() as i32;
    let offset_y = ((ph as f64 - scaled_h) / 2.0).max(0.0).floor() as i32;
    (scale, offset_x, offset_y)
}

fn check(space: &'static str, width: u32, height: u32) -> Result<(), CoordinateError> {
    if width <= 1 || height <= 1 {
        return Err(CoordinateError::BadDimensions { space, width, height });
    }
    Ok(())
}

impl CoordinateManager {
    /// Creates manager for given native and processing sizes
    ///
    /// Basic usage:
    ///
    /// ```
    /// use speedtrap_rs::utils::CoordinateManager;
    /// let coords = CoordinateManager::new(1920, 1080, 1280, 720).unwrap();
    /// assert_eq!(coords.scale(), 1280.0 / 1920.0);
    /// ```
    pub fn new(
        native_width: u32,
        native_height: u32,
        processing_width: u32,
        processing_height: u32,
    ) -> Result<Self, CoordinateError> {
        let mut manager = CoordinateManager::default();
        manager.update_native_size(native_width, native_height)?;
        manager.update_processing_size(processing_width, processing_height)?;
        Ok(manager)
    }
    /// Sets native frame size. Rejected (state untouched) when a dimension is <= 1.
    pub fn update_native_size(&mut self, width: u32, height: u32) -> Result<(), CoordinateError> {
        check("native", width, height)?;
        self.native_width = width;
        self.native_height = height;
        self.recompute();
        debug!(width, height, "native dimensions updated");
        Ok(())
    }
    /// Sets processing canvas size. Rejected (state untouched) when a dimension is <= 1.
    pub fn update_processing_size(&mut self, width: u32, height: u32) -> Result<(), CoordinateError> {
        check("processing", width, height)?;
        self.processing_width = width;
        self.processing_height = height;
        self.recompute();
        debug!(width, height, "processing dimensions updated");
        Ok(())
    }
    fn recompute(&mut self) {
        let (scale, offset_x, offset_y) = fit(
            self.native_width,
            self.native_height,
            self.processing_width,
            self.processing_height,
        );
        self.scale = scale;
        self.offset_x = offset_x;
        self.offset_y = offset_y;
        debug!(scale, offset_x, offset_y, "scaling factors updated");
    }
    pub fn native_size(&self) -> (u32, u32) {
        (self.native_width, self.native_height)
    }
    pub fn processing_size(&self) -> (u32, u32) {
        (self.processing_width, self.processing_height)
    }
    pub fn scale(&self) -> f64 {
        self.scale
    }
    /// Per-axis scale. Always equal, kept for consumers that expect a pair.
    pub fn scale_xy(&self) -> (f64, f64) {
        (self.scale, self.scale)
    }
    pub fn offsets(&self) -> (i32, i32) {
        (self.offset_x, self.offset_y)
    }
    pub fn to_processing(&self, p: &Point) -> Point {
        Point::new(
            (p.x as f64 * self.scale + self.offset_x as f64) as f32,
            (p.y as f64 * self.scale + self.offset_y as f64) as f32,
        )
    }
    pub fn to_native(&self, p: &Point) -> Point {
        Point::new(
            ((p.x as f64 - self.offset_x as f64) / self.scale) as f32,
            ((p.y as f64 - self.offset_y as f64) / self.scale) as f32,
        )
    }
    /// Integer pixel variant of [`CoordinateManager::to_processing`], rounds to nearest
    pub fn to_processing_px(&self, x: i32, y: i32) -> (i32, i32) {
        (
            (x as f64 * self.scale).round() as i32 + self.offset_x,
            (y as f64 * self.scale).round() as i32 + self.offset_y,
        )
    }
    /// Integer pixel variant of [`CoordinateManager::to_native`], rounds to nearest
    pub fn to_native_px(&self, x: i32, y: i32) -> (i32, i32) {
        (
            ((x - self.offset_x) as f64 / self.scale).round() as i32,
            ((y - self.offset_y) as f64 / self.scale).round() as i32,
        )
    }
    pub fn rect_to_processing(&self, r: &Rect) -> Rect {
        let top_left = self.to_processing(&Point::new(r.x, r.y));
        Rect::new(
            top_left.x,
            top_left.y,
            self.scale_length(r.width as f64) as f32,
            self.scale_length(r.height as f64) as f32,
        )
    }
    pub fn rect_to_native(&self, r: &Rect) -> Rect {
        let top_left = self.to_native(&Point::new(r.x, r.y));
        Rect::new(
            top_left.x,
            top_left.y,
            (r.width as f64 / self.scale) as f32,
            (r.height as f64 / self.scale) as f32,
        )
    }
    pub fn scale_length(&self, length: f64) -> f64 {
        length * self.scale
    }
    /// Line thickness in processing space, never below 1
    pub fn scale_thickness(&self, thickness: f64) -> i32 {
        i32::max(1, (thickness * self.scale) as i32)
    }
    /// Font size in processing space, never below 1. Unlike thickness it stays fractional.
    pub fn scale_font_size(&self, size: f64) -> f64 {
        f64::max(1.0, size * self.scale)
    }
    pub fn scale_dimensions(&self, width: u32, height: u32) -> (u32, u32) {
        (
            (width as f64 * self.scale) as u32,
            (height as f64 * self.scale) as u32,
        )
    }
}
