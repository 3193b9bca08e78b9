use anyhow::{anyhow, Result};

/// Pixel layouts a frame source may hand over.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    Gray8,
    Rgb24,
    Rgba8,
    Nv12,
}

impl PixelFormat {
    /// Bytes per pixel for packed formats. `None` for planar layouts.
    pub fn bytes_per_pixel(self) -> Option<usize> {
        match self {
            PixelFormat::Gray8 => Some(1),
            PixelFormat::Rgb24 => Some(3),
            PixelFormat::Rgba8 => Some(4),
            PixelFormat::Nv12 => None,
        }
    }

    pub(crate) fn expected_len(self, width: u32, height: u32) -> Result<usize> {
        let area = (width as usize)
            .checked_mul(height as usize)
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        let len = match self.bytes_per_pixel() {
            Some(bpp) => area.checked_mul(bpp),
            None => area.checked_add(area / 2),
        };
        len.ok_or_else(|| anyhow!("frame dimensions overflow"))
    }
}

/// Convert any supported layout into tightly packed RGB24.
///
/// The recognizer only accepts 3-channel input, so single-channel and
/// 4-channel crops pass through here before recognition.
pub(crate) fn normalize_to_rgb(
    pixels: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<Vec<u8>> {
    let expected = format.expected_len(width, height)?;
    if pixels.len() != expected {
        return Err(anyhow!(
            "{:?} frame length mismatch: expected {}, got {}",
            format,
            expected,
            pixels.len()
        ));
    }
    match format {
        PixelFormat::Rgb24 => Ok(pixels.to_vec()),
        PixelFormat::Gray8 => Ok(pixels.iter().flat_map(|&g| [g, g, g]).collect()),
        PixelFormat::Rgba8 => Ok(pixels
            .chunks_exact(4)
            .flat_map(|px| [px[0], px[1], px[2]])
            .collect()),
        PixelFormat::Nv12 => Ok(nv12_to_rgb(pixels, width, height)),
    }
}

fn nv12_to_rgb(pixels: &[u8], width: u32, height: u32) -> Vec<u8> {
    let w = width as usize;
    let h = height as usize;
    let y_plane = w * h;

    let mut rgb = vec![0u8; y_plane * 3];
    for j in 0..h {
        for i in 0..w {
            let y = pixels[j * w + i] as f32;
            let uv_index = y_plane + (j / 2) * w + (i / 2) * 2;
            let u = pixels[uv_index] as f32 - 128.0;
            let v = pixels[uv_index + 1] as f32 - 128.0;

            let r = y + 1.402_f32 * v;
            let g = y - 0.344_136_f32 * u - 0.714_136_f32 * v;
            let b = y + 1.772_f32 * u;

            let offset = (j * w + i) * 3;
            rgb[offset] = clamp_to_u8(r);
            rgb[offset + 1] = clamp_to_u8(g);
            rgb[offset + 2] = clamp_to_u8(b);
        }
    }
    rgb
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nv12_conversion_produces_gray() -> Result<()> {
        let y_plane = vec![128u8; 4];
        let uv_plane = vec![128u8; 2];
        let nv12 = [y_plane, uv_plane].concat();

        let rgb = normalize_to_rgb(&nv12, 2, 2, PixelFormat::Nv12)?;
        assert_eq!(rgb, vec![128u8; 12]);
        Ok(())
    }

    #[test]
    fn gray_expands_to_three_channels() -> Result<()> {
        let rgb = normalize_to_rgb(&[10, 200], 2, 1, PixelFormat::Gray8)?;
        assert_eq!(rgb, vec![10, 10, 10, 200, 200, 200]);
        Ok(())
    }

    #[test]
    fn rgba_drops_alpha() -> Result<()> {
        let rgb = normalize_to_rgb(&[1, 2, 3, 255, 4, 5, 6, 0], 2, 1, PixelFormat::Rgba8)?;
        assert_eq!(rgb, vec![1, 2, 3, 4, 5, 6]);
        Ok(())
    }

    #[test]
    fn length_mismatch_is_rejected() {
        assert!(normalize_to_rgb(&[0u8; 5], 1, 3, PixelFormat::Rgb24).is_err());
    }
}
