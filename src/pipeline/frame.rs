use std::io::Cursor;

use image::{imageops, ImageResult, RgbImage};

use crate::utils::Rect;

const CROP_JPEG_QUALITY: u8 = 85;

/// Single decoded video frame. The image is optional: replayed detection
/// streams carry only the index.
#[derive(Debug, Clone)]
pub struct Frame {
    pub index: u64,
    pub image: Option<RgbImage>,
}

impl Frame {
    pub fn new(index: u64, image: RgbImage) -> Self {
        Frame {
            index,
            image: Some(image),
        }
    }
    pub fn without_image(index: u64) -> Self {
        Frame { index, image: None }
    }
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.image.as_ref().map(|img| img.dimensions())
    }
    /// Crops `bbox` (native coordinates) out of the frame, clamped to the image.
    /// None without an image or when nothing is left after clamping.
    pub fn crop(&self, bbox: &Rect) -> Option<RgbImage> {
        let image = self.image.as_ref()?;
        let (width, height) = image.dimensions();
        let clipped = bbox.clip_to(width as f32, height as f32);
        let x = clipped.x.floor().max(0.0) as u32;
        let y = clipped.y.floor().max(0.0) as u32;
        let w = (clipped.right().ceil() as u32).min(width).saturating_sub(x);
        let h = (clipped.bottom().ceil() as u32).min(height).saturating_sub(y);
        if w == 0 || h == 0 {
            return None;
        }
        Some(imageops::crop_imm(image, x, y, w, h).to_image())
    }
}

/// Encodes RGB image to JPEG bytes
pub fn encode_jpeg(image: &RgbImage) -> ImageResult<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, CROP_JPEG_QUALITY);
    image.write_with_encoder(encoder)?;
    Ok(buf.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_crop_is_clamped() {
        let frame = Frame::new(0, RgbImage::from_pixel(100, 80, Rgb([10, 20, 30])));
        let crop = frame.crop(&Rect::new(90.0, 70.0, 40.0, 40.0)).unwrap();
        assert_eq!(crop.dimensions(), (10, 10));
        assert!(frame.crop(&Rect::new(200.0, 200.0, 10.0, 10.0)).is_none());
        assert!(Frame::without_image(0).crop(&Rect::new(0.0, 0.0, 10.0, 10.0)).is_none());
    }

    #[test]
    fn test_encode_jpeg() {
        let image = RgbImage::from_pixel(16, 16, Rgb([200, 0, 0]));
        let bytes = encode_jpeg(&image).unwrap();
        // JPEG SOI marker
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }
}
