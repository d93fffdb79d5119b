use std::path::PathBuf;

use anyhow::{Context, Result};
use image::{imageops, Rgba, RgbaImage};
use tracing::debug;

use crate::commands::DrawCommand;
use crate::source::resize_rgba;

use super::{OverlayRenderer, RenderRequest};

/// Warning surfaced when the session degrades to corner markers.
pub const CORNER_FALLBACK_WARNING: &str = "overlay rendering is unavailable; \
showing corner markers only (crop boundary and highlight dimming are not \
supported in this mode)";

/// Legacy fallback: instead of rasterizing the draw list, lay four tinted
/// corner-bracket sprites over each selected focal length's rectangle.
///
/// Only `StrokeRect` commands are honored; dim masks and the crop-boundary
/// polygon have no counterpart here, which is exactly the limitation
/// `CORNER_FALLBACK_WARNING` tells the user about.
pub struct CornerMarkerBackend {
    /// Bracket arm length as a fraction of the marked rectangle's width.
    arm_fraction: f32,
}

impl CornerMarkerBackend {
    pub fn new(arm_fraction: f32) -> Self {
        Self { arm_fraction }
    }
}

impl OverlayRenderer for CornerMarkerBackend {
    fn name(&self) -> &'static str {
        "corner-marker"
    }

    fn render(&self, request: &RenderRequest<'_>) -> Result<PathBuf> {
        let base = image::ImageReader::open(request.base_image)?
            .with_guessed_format()?
            .decode()
            .with_context(|| format!("failed to decode {}", request.base_image.display()))?
            .to_rgba8();
        let mut canvas = resize_rgba(&base, request.canvas_width, request.canvas_height)?;

        for command in request.commands {
            let DrawCommand::StrokeRect {
                left,
                top,
                width,
                height,
                rgb,
                alpha,
                line_width,
            } = *command
            else {
                continue;
            };

            let arm = (width * self.arm_fraction)
                .min(width / 2.0)
                .min(height / 2.0)
                .max(4.0);
            let thickness = line_width.max(2.0);
            let bracket = bracket_sprite(arm, thickness, rgb, alpha);
            overlay_corners(&mut canvas, &bracket, left, top, width, height);
        }

        let rgb = image::DynamicImage::ImageRgba8(canvas).to_rgb8();
        rgb.save_with_format(&request.output, image::ImageFormat::Jpeg)
            .with_context(|| format!("failed to write {}", request.output.display()))?;
        debug!(output = %request.output.display(), "corner-marker composite written");
        Ok(request.output.clone())
    }
}

/// Top-left L bracket; the other three corners are mirror flips.
fn bracket_sprite(arm: f32, thickness: f32, rgb: [u8; 3], alpha: f32) -> RgbaImage {
    let size = arm.ceil().max(1.0) as u32;
    let t = thickness.ceil().max(1.0) as u32;
    let a = (alpha.clamp(0.0, 1.0) * 255.0) as u8;
    let mut sprite = RgbaImage::from_pixel(size, size, Rgba([0, 0, 0, 0]));
    let ink = Rgba([rgb[0], rgb[1], rgb[2], a]);
    for y in 0..size {
        for x in 0..size {
            if x < t || y < t {
                sprite.put_pixel(x, y, ink);
            }
        }
    }
    sprite
}

fn overlay_corners(
    canvas: &mut RgbaImage,
    bracket: &RgbaImage,
    left: f32,
    top: f32,
    width: f32,
    height: f32,
) {
    let size = i64::from(bracket.width());
    let l = left.round() as i64;
    let t = top.round() as i64;
    let r = (left + width).round() as i64 - size;
    let b = (top + height).round() as i64 - size;

    imageops::overlay(canvas, bracket, l, t);
    imageops::overlay(canvas, &imageops::flip_horizontal(bracket), r, t);
    imageops::overlay(canvas, &imageops::flip_vertical(bracket), l, b);
    let flipped_both = imageops::flip_horizontal(&imageops::flip_vertical(bracket));
    imageops::overlay(canvas, &flipped_both, r, b);
}
