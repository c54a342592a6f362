//! Foreground alpha mask image.
//!
//! Edited masks travel and are stored as 8-bit grayscale PNGs whose gray value
//! is the foreground alpha. Other PNG color types are accepted on decode.

use std::io::Cursor;

use anyhow::{Context, Result, ensure};

use crate::DecodeError;

/// Encode a `resolution²` alpha buffer as a grayscale PNG.
pub fn encode_mask(alpha: &[u8], resolution: u32) -> Result<Vec<u8>> {
    let expected = (resolution as usize) * (resolution as usize);
    ensure!(
        alpha.len() == expected,
        "mask has {} samples, resolution {} needs {}",
        alpha.len(),
        resolution,
        expected
    );

    let mut out = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut out, resolution, resolution);
        encoder.set_color(png::ColorType::Grayscale);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder.write_header().context("Failed to write mask PNG header")?;
        writer
            .write_image_data(alpha)
            .context("Failed to write mask PNG data")?;
        writer.finish().context("Failed to finish mask PNG")?;
    }
    Ok(out)
}

/// Decode a mask image into a `resolution²` alpha buffer.
pub fn decode_mask(bytes: &[u8], resolution: u32) -> Result<Vec<u8>, DecodeError> {
    let mut decoder = png::Decoder::new(Cursor::new(bytes));
    decoder.set_transformations(png::Transformations::EXPAND | png::Transformations::STRIP_16);
    let mut reader = decoder
        .read_info()
        .map_err(|e| DecodeError::Image(e.to_string()))?;

    let mut raw = vec![0u8; reader.output_buffer_size()];
    let info = reader
        .next_frame(&mut raw)
        .map_err(|e| DecodeError::Image(e.to_string()))?;

    if info.width != resolution || info.height != resolution {
        return Err(DecodeError::MaskSize {
            width: info.width,
            height: info.height,
            resolution,
        });
    }

    let pixels = (resolution as usize) * (resolution as usize);
    let raw = &raw[..info.buffer_size()];

    let alpha = match info.color_type {
        png::ColorType::Grayscale => raw.to_vec(),
        png::ColorType::GrayscaleAlpha => raw.chunks_exact(2).map(|p| p[1]).collect(),
        png::ColorType::Rgba => raw.chunks_exact(4).map(|p| p[3]).collect(),
        // No alpha channel: every pixel is opaque wall.
        png::ColorType::Rgb | png::ColorType::Indexed => vec![255u8; pixels],
    };

    if alpha.len() != pixels {
        return Err(DecodeError::Image(format!(
            "decoded {} pixels, expected {}",
            alpha.len(),
            pixels
        )));
    }
    Ok(alpha)
}

/// Read only the image header and return its edge length. Masks must be
/// square.
pub fn mask_resolution(bytes: &[u8]) -> Result<u32, DecodeError> {
    let reader = png::Decoder::new(Cursor::new(bytes))
        .read_info()
        .map_err(|e| DecodeError::Image(e.to_string()))?;
    let info = reader.info();
    if info.width != info.height {
        return Err(DecodeError::MaskSize {
            width: info.width,
            height: info.height,
            resolution: info.width.min(info.height),
        });
    }
    Ok(info.width)
}
