//! Frames and regions.
//!
//! - `Frame`: owned pixel buffer handed over by a frame source.
//! - `BoundingRegion`: pixel rectangle reported by the detector, clamped to frame bounds
//!   before any crop is taken.
//!
//! Crops passed to the recognizer are always RGB24; `prepare_for_recognition` applies the
//! minimum-size and upscale rules the recognizer expects.

use anyhow::{anyhow, Result};
use image::{imageops::FilterType, RgbImage};
use std::borrow::Cow;
use serde::{Deserialize, Serialize};

use crate::ingest::normalize::normalize_to_rgb;
pub use crate::ingest::normalize::PixelFormat;

/// Crops below this height are too small to read.
pub const MIN_READABLE_HEIGHT: u32 = 20;
/// Crops below this width are too small to read.
pub const MIN_READABLE_WIDTH: u32 = 60;
/// Crops below `UPSCALE_BELOW_HEIGHT` x `UPSCALE_BELOW_WIDTH` are upscaled before recognition.
pub const UPSCALE_BELOW_HEIGHT: u32 = 50;
pub const UPSCALE_BELOW_WIDTH: u32 = 100;
/// Target height/width the upscale factor is derived from.
pub const UPSCALE_TARGET_HEIGHT: f32 = 96.0;
pub const UPSCALE_TARGET_WIDTH: f32 = 320.0;

// ----------------------------------------------------------------------------
// BoundingRegion
// ----------------------------------------------------------------------------

/// Pixel rectangle `(x1, y1)`..`(x2, y2)`, exclusive on the far edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingRegion {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingRegion {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> u32 {
        (self.x2 - self.x1).max(0) as u32
    }

    pub fn height(&self) -> u32 {
        (self.y2 - self.y1).max(0) as u32
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// Clamp to `[0, width] x [0, height]`. Returns `None` when nothing is left.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<BoundingRegion> {
        let w = width.min(i32::MAX as u32) as i32;
        let h = height.min(i32::MAX as u32) as i32;
        let clamped = BoundingRegion {
            x1: self.x1.clamp(0, w),
            y1: self.y1.clamp(0, h),
            x2: self.x2.clamp(0, w),
            y2: self.y2.clamp(0, h),
        };
        if clamped.is_empty() {
            None
        } else {
            Some(clamped)
        }
    }
}

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// One decoded frame. Pixel data is private; length is validated on construction.
#[derive(Clone)]
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, format: PixelFormat) -> Result<Self> {
        let expected = format.expected_len(width, height)?;
        if data.len() != expected {
            return Err(anyhow!(
                "{:?} frame {}x{} needs {} bytes, got {}",
                format,
                width,
                height,
                expected,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            format,
        })
    }

    pub fn rgb(data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        Self::new(data, width, height, PixelFormat::Rgb24)
    }

    /// Solid-colour RGB frame. Handy for synthetic sources and tests.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let data = rgb.repeat((width as usize) * (height as usize));
        Self {
            data,
            width,
            height,
            format: PixelFormat::Rgb24,
        }
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// Convert to packed RGB24. Cheap clone when already RGB.
    pub fn to_rgb(&self) -> Result<Frame> {
        if self.format == PixelFormat::Rgb24 {
            return Ok(self.clone());
        }
        let data = normalize_to_rgb(&self.data, self.width, self.height, self.format)?;
        Frame::rgb(data, self.width, self.height)
    }

    /// Copy out the clamped region. Planar input is converted to RGB first;
    /// packed input is read in place and keeps its format.
    pub fn crop(&self, region: &BoundingRegion) -> Result<Frame> {
        let region = region
            .clamp_to(self.width, self.height)
            .ok_or_else(|| anyhow!("crop region {:?} is empty after clamping", region))?;
        let source: Cow<'_, Frame> = match self.format.bytes_per_pixel() {
            Some(_) => Cow::Borrowed(self),
            None => Cow::Owned(self.to_rgb()?),
        };
        let bpp = source.format.bytes_per_pixel().unwrap_or(3);
        let row_bytes = source.width as usize * bpp;
        let out_w = region.width() as usize;
        let out_h = region.height() as usize;

        let mut data = Vec::with_capacity(out_w * out_h * bpp);
        for row in region.y1 as usize..region.y2 as usize {
            let start = row * row_bytes + region.x1 as usize * bpp;
            let end = start + out_w * bpp;
            data.extend_from_slice(
                source
                    .data
                    .get(start..end)
                    .ok_or_else(|| anyhow!("crop row {} out of bounds", row))?,
            );
        }
        Frame::new(data, out_w as u32, out_h as u32, source.format)
    }

    pub fn to_rgb_image(&self) -> Result<RgbImage> {
        let rgb = self.to_rgb()?;
        RgbImage::from_raw(rgb.width, rgb.height, rgb.data)
            .ok_or_else(|| anyhow!("RGB buffer does not match {}x{}", self.width, self.height))
    }

    pub fn from_rgb_image(image: RgbImage) -> Frame {
        let (width, height) = image.dimensions();
        Frame {
            data: image.into_raw(),
            width,
            height,
            format: PixelFormat::Rgb24,
        }
    }

    /// Resize to exactly `width` x `height` (RGB output).
    pub fn resized(&self, width: u32, height: u32) -> Result<Frame> {
        let image = self.to_rgb_image()?;
        let resized = image::imageops::resize(&image, width, height, FilterType::Triangle);
        Ok(Frame::from_rgb_image(resized))
    }
}

/// Apply the recognizer input contract to a crop.
///
/// Returns `Ok(None)` when the crop is too small to read. Small-but-readable crops are
/// upscaled by `max(96 / h, 320 / w)`, and the result is always RGB24.
pub fn prepare_for_recognition(crop: &Frame) -> Result<Option<Frame>> {
    if crop.height < MIN_READABLE_HEIGHT || crop.width < MIN_READABLE_WIDTH {
        return Ok(None);
    }
    let rgb = crop.to_rgb()?;
    if rgb.height >= UPSCALE_BELOW_HEIGHT && rgb.width >= UPSCALE_BELOW_WIDTH {
        return Ok(Some(rgb));
    }
    let scale = (UPSCALE_TARGET_HEIGHT / rgb.height as f32)
        .max(UPSCALE_TARGET_WIDTH / rgb.width as f32);
    let width = (rgb.width as f32 * scale) as u32;
    let height = (rgb.height as f32 * scale) as u32;
    Ok(Some(rgb.resized(width, height)?))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> Frame {
        let mut data = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&[x as u8, y as u8, 0]);
            }
        }
        Frame::rgb(data, width, height).unwrap()
    }

    #[test]
    fn frame_rejects_wrong_length() {
        assert!(Frame::rgb(vec![0u8; 10], 2, 2).is_err());
    }

    #[test]
    fn region_is_clamped_to_frame_bounds() {
        let region = BoundingRegion::new(-10, -5, 700, 300);
        let clamped = region.clamp_to(640, 480).unwrap();
        assert_eq!(clamped, BoundingRegion::new(0, 0, 640, 300));
    }

    #[test]
    fn region_outside_frame_clamps_to_none() {
        let region = BoundingRegion::new(700, 10, 800, 50);
        assert!(region.clamp_to(640, 480).is_none());
    }

    #[test]
    fn crop_copies_expected_pixels() -> Result<()> {
        let frame = gradient(8, 6);
        let crop = frame.crop(&BoundingRegion::new(2, 1, 5, 4))?;
        assert_eq!((crop.width, crop.height), (3, 3));
        assert_eq!(&crop.pixels()[..3], &[2, 1, 0]);
        Ok(())
    }

    #[test]
    fn packed_crop_keeps_its_format() -> Result<()> {
        let data: Vec<u8> = (0..8 * 4).map(|i| i as u8).collect();
        let frame = Frame::new(data, 8, 4, PixelFormat::Gray8)?;
        let crop = frame.crop(&BoundingRegion::new(1, 2, 4, 4))?;
        assert_eq!(crop.format, PixelFormat::Gray8);
        assert_eq!((crop.width, crop.height), (3, 2));
        assert_eq!(crop.pixels(), &[17, 18, 19, 25, 26, 27]);
        assert_eq!(frame.byte_len(), 32);
        Ok(())
    }

    #[test]
    fn planar_crop_is_converted_to_rgb() -> Result<()> {
        let frame = Frame::new(vec![128u8; 8 * 4 * 3 / 2], 8, 4, PixelFormat::Nv12)?;
        let crop = frame.crop(&BoundingRegion::new(2, 0, 6, 2))?;
        assert_eq!(crop.format, PixelFormat::Rgb24);
        assert_eq!((crop.width, crop.height), (4, 2));
        assert_eq!(crop.byte_len(), 4 * 2 * 3);
        assert_eq!(frame.format, PixelFormat::Nv12);
        Ok(())
    }

    #[test]
    fn tiny_crop_is_not_readable() -> Result<()> {
        let crop = Frame::filled(40, 10, [0, 0, 0]);
        assert!(prepare_for_recognition(&crop)?.is_none());
        Ok(())
    }

    #[test]
    fn small_crop_is_upscaled() -> Result<()> {
        let crop = Frame::filled(80, 25, [1, 2, 3]);
        let prepared = prepare_for_recognition(&crop)?.unwrap();
        // max(96/25, 320/80) = 4.0
        assert_eq!((prepared.width, prepared.height), (320, 100));
        Ok(())
    }

    #[test]
    fn gray_crop_becomes_rgb() -> Result<()> {
        let crop = Frame::new(vec![50u8; 120 * 60], 120, 60, PixelFormat::Gray8)?;
        let prepared = prepare_for_recognition(&crop)?.unwrap();
        assert_eq!(prepared.format, PixelFormat::Rgb24);
        assert_eq!(prepared.byte_len(), 120 * 60 * 3);
        Ok(())
    }
}
