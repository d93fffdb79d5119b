use std::path::PathBuf;

use anyhow::{Context, Result};
use image::RgbaImage;
use tracing::debug;

use crate::commands::DrawCommand;
use crate::source::resize_rgba;

use super::{OverlayRenderer, RenderRequest};

/// In-process CPU compositor: decodes the base image, scales it to the
/// canvas, rasterizes the draw list, and re-encodes to JPEG.
pub struct CanvasBackend;

impl OverlayRenderer for CanvasBackend {
    fn name(&self) -> &'static str {
        "canvas"
    }

    fn render(&self, request: &RenderRequest<'_>) -> Result<PathBuf> {
        let base = image::ImageReader::open(request.base_image)?
            .with_guessed_format()?
            .decode()
            .with_context(|| format!("failed to decode {}", request.base_image.display()))?
            .to_rgba8();
        let mut canvas = resize_rgba(&base, request.canvas_width, request.canvas_height)?;

        for command in request.commands {
            apply(&mut canvas, command);
        }

        let rgb = image::DynamicImage::ImageRgba8(canvas).to_rgb8();
        rgb.save_with_format(&request.output, image::ImageFormat::Jpeg)
            .with_context(|| format!("failed to write {}", request.output.display()))?;
        debug!(output = %request.output.display(), "canvas composite written");
        Ok(request.output.clone())
    }
}

fn apply(canvas: &mut RgbaImage, command: &DrawCommand) {
    match *command {
        DrawCommand::StrokeRect {
            left,
            top,
            width,
            height,
            rgb,
            alpha,
            line_width,
        } => stroke_rect(canvas, left, top, width, height, rgb, alpha, line_width),
        DrawCommand::DimOutsidePolygon { corners, alpha } => {
            dim_outside_polygon(canvas, &corners, alpha)
        }
        DrawCommand::StrokePolygon {
            corners,
            rgb,
            alpha,
            line_width,
        } => {
            for i in 0..4 {
                let a = corners[i];
                let b = corners[(i + 1) % 4];
                stroke_segment(canvas, a, b, rgb, alpha, line_width);
            }
        }
        DrawCommand::DimRect {
            left,
            top,
            width,
            height,
            alpha,
        } => fill_rect(canvas, left, top, width, height, [0, 0, 0], alpha),
    }
}

/// Source-over blend of a constant color at `alpha` onto one pixel.
fn blend(canvas: &mut RgbaImage, x: u32, y: u32, rgb: [u8; 3], alpha: f32) {
    let pixel = canvas.get_pixel_mut(x, y);
    for c in 0..3 {
        let src = f32::from(rgb[c]);
        let dst = f32::from(pixel.0[c]);
        pixel.0[c] = (src * alpha + dst * (1.0 - alpha)).round().clamp(0.0, 255.0) as u8;
    }
    pixel.0[3] = 255;
}

/// Pixel span of `[start, start+len)` clamped to `0..max`, as integer
/// coordinates.
fn clamped_span(start: f32, len: f32, max: u32) -> (u32, u32) {
    let lo = start.floor().max(0.0) as u32;
    let hi = ((start + len).ceil().max(0.0) as u32).min(max);
    (lo.min(max), hi)
}

fn fill_rect(canvas: &mut RgbaImage, left: f32, top: f32, width: f32, height: f32, rgb: [u8; 3], alpha: f32) {
    if alpha <= 0.0 || width <= 0.0 || height <= 0.0 {
        return;
    }
    let (x0, x1) = clamped_span(left, width, canvas.width());
    let (y0, y1) = clamped_span(top, height, canvas.height());
    for y in y0..y1 {
        for x in x0..x1 {
            blend(canvas, x, y, rgb, alpha);
        }
    }
}

/// Rectangle outline stroked as four non-overlapping bands centered on the
/// edges, so no pixel is blended twice.
#[allow(clippy::too_many_arguments)]
fn stroke_rect(
    canvas: &mut RgbaImage,
    left: f32,
    top: f32,
    width: f32,
    height: f32,
    rgb: [u8; 3],
    alpha: f32,
    line_width: f32,
) {
    let half = line_width / 2.0;
    let right = left + width;
    let bottom = top + height;

    // Top and bottom bands span the full outline width.
    fill_rect(canvas, left - half, top - half, width + line_width, line_width, rgb, alpha);
    fill_rect(canvas, left - half, bottom - half, width + line_width, line_width, rgb, alpha);
    // Side bands cover only the rows between the horizontal bands.
    let side_top = top + half;
    let side_height = (height - line_width).max(0.0);
    fill_rect(canvas, left - half, side_top, line_width, side_height, rgb, alpha);
    fill_rect(canvas, right - half, side_top, line_width, side_height, rgb, alpha);
}

/// Thick line segment via distance-to-segment coverage inside the segment's
/// bounding box. Each pixel blends at most once per segment.
fn stroke_segment(
    canvas: &mut RgbaImage,
    a: (f32, f32),
    b: (f32, f32),
    rgb: [u8; 3],
    alpha: f32,
    line_width: f32,
) {
    let half = line_width / 2.0;
    let min_x = a.0.min(b.0) - half;
    let min_y = a.1.min(b.1) - half;
    let max_x = a.0.max(b.0) + half;
    let max_y = a.1.max(b.1) + half;
    let (x0, x1) = clamped_span(min_x, max_x - min_x, canvas.width());
    let (y0, y1) = clamped_span(min_y, max_y - min_y, canvas.height());

    let dx = b.0 - a.0;
    let dy = b.1 - a.1;
    let len_sq = dx * dx + dy * dy;

    for y in y0..y1 {
        for x in x0..x1 {
            let px = x as f32 + 0.5;
            let py = y as f32 + 0.5;
            let t = if len_sq > 0.0 {
                (((px - a.0) * dx + (py - a.1) * dy) / len_sq).clamp(0.0, 1.0)
            } else {
                0.0
            };
            let cx = a.0 + t * dx;
            let cy = a.1 + t * dy;
            let dist_sq = (px - cx) * (px - cx) + (py - cy) * (py - cy);
            if dist_sq <= half * half {
                blend(canvas, x, y, rgb, alpha);
            }
        }
    }
}

/// Dims everything outside the polygon: per scanline, edge crossings are
/// collected and sorted, and the spans with even crossing parity (outside
/// under the even-odd rule) are darkened.
fn dim_outside_polygon(canvas: &mut RgbaImage, corners: &[(f32, f32); 4], alpha: f32) {
    if alpha <= 0.0 {
        return;
    }
    let width = canvas.width();
    let height = canvas.height();
    let mut crossings: Vec<f32> = Vec::with_capacity(4);

    for y in 0..height {
        let yc = y as f32 + 0.5;
        crossings.clear();
        for i in 0..4 {
            let (x1, y1) = corners[i];
            let (x2, y2) = corners[(i + 1) % 4];
            if (y1 <= yc) != (y2 <= yc) {
                let t = (yc - y1) / (y2 - y1);
                crossings.push(x1 + t * (x2 - x1));
            }
        }
        crossings.sort_by(|a, b| a.partial_cmp(b).expect("finite crossings"));

        // Walk the row; parity flips at each crossing. Outside spans (even
        // parity) get the dim.
        let mut outside_from = 0.0_f32;
        let mut inside = false;
        for &cx in crossings.iter() {
            if !inside {
                dim_row_span(canvas, y, outside_from, cx, alpha, width);
            }
            inside = !inside;
            if !inside {
                outside_from = cx;
            }
        }
        if !inside {
            dim_row_span(canvas, y, outside_from, width as f32, alpha, width);
        }
    }
}

fn dim_row_span(canvas: &mut RgbaImage, y: u32, from: f32, to: f32, alpha: f32, width: u32) {
    if to <= from {
        return;
    }
    let (x0, x1) = clamped_span(from, to - from, width);
    for x in x0..x1 {
        blend(canvas, x, y, [0, 0, 0], alpha);
    }
}
