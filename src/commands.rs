use crate::config::OverlayStyle;
use crate::geometry::{CropPolygon, CropRect, FocalLength};
use crate::palette;

/// Border color for the applied-crop boundary stroke.
const CROP_BORDER_RGB: [u8; 3] = [255, 255, 255];

/// One backend-agnostic draw primitive, already in canvas coordinates.
///
/// Commands are emitted bottom-to-top; backends execute them in order on
/// top of the base image.
#[derive(Debug, Clone, PartialEq)]
pub enum DrawCommand {
    /// Axis-aligned rectangle outline.
    StrokeRect {
        left: f32,
        top: f32,
        width: f32,
        height: f32,
        rgb: [u8; 3],
        alpha: f32,
        line_width: f32,
    },
    /// Dim the region outside the polygon: even-odd fill of the whole
    /// canvas against the polygon.
    DimOutsidePolygon {
        corners: [(f32, f32); 4],
        alpha: f32,
    },
    /// Closed polygon border.
    StrokePolygon {
        corners: [(f32, f32); 4],
        rgb: [u8; 3],
        alpha: f32,
        line_width: f32,
    },
    /// Filled dimming rectangle (highlight strips).
    DimRect {
        left: f32,
        top: f32,
        width: f32,
        height: f32,
        alpha: f32,
    },
}

/// Everything the builder needs for one frame: the active rect sequence
/// (already matching the view mode), the selection, and the source frame
/// the rect coordinates are expressed in.
#[derive(Debug, Clone)]
pub struct OverlayScene<'a> {
    pub rects: &'a [CropRect],
    pub selected: &'a [FocalLength],
    pub highlight: Option<FocalLength>,
    /// Applied-crop boundary; present only in the full-frame view.
    pub crop_polygon: Option<&'a CropPolygon>,
    pub source_width: u32,
    pub source_height: u32,
}

/// Translates geometry + view state into an ordered draw list scaled onto a
/// `canvas_width` x `canvas_height` target.
///
/// X and Y scale independently; when the canvas was derived from the same
/// frame the ratios agree and the scaling is effectively uniform.
pub fn build_draw_commands(
    scene: &OverlayScene<'_>,
    canvas_width: u32,
    canvas_height: u32,
    style: &OverlayStyle,
) -> Vec<DrawCommand> {
    let sx = canvas_width as f32 / scene.source_width as f32;
    let sy = canvas_height as f32 / scene.source_height as f32;
    let line_width = style.line_width_for(canvas_width);
    let mut commands = Vec::new();

    // Applied-crop boundary sits directly above the base image.
    if let Some(polygon) = scene.crop_polygon {
        let corners = polygon.corners.map(|p| {
            (
                p.x as f32 * canvas_width as f32,
                p.y as f32 * canvas_height as f32,
            )
        });
        commands.push(DrawCommand::DimOutsidePolygon {
            corners,
            alpha: style.crop_dim_alpha,
        });
        commands.push(DrawCommand::StrokePolygon {
            corners,
            rgb: CROP_BORDER_RGB,
            alpha: style.stroke_alpha,
            line_width,
        });
    }

    // One outline per selected focal length, outermost first.
    for rect in scene.rects {
        if !scene.selected.contains(&rect.focal_length) {
            continue;
        }
        commands.push(DrawCommand::StrokeRect {
            left: rect.left as f32 * sx,
            top: rect.top as f32 * sy,
            width: rect.width as f32 * sx,
            height: rect.height as f32 * sy,
            rgb: palette::swatch(rect.color_index).rgb,
            alpha: style.stroke_alpha,
            line_width,
        });
    }

    // A highlight that does not resolve to a rect in the active set (it may
    // belong to the other view mode) emits nothing.
    if let Some(fl) = scene.highlight {
        if let Some(rect) = scene.rects.iter().find(|r| r.focal_length == fl) {
            commands.extend(highlight_strips(
                rect,
                sx,
                sy,
                canvas_width as f32,
                canvas_height as f32,
                style.highlight_dim_alpha,
            ));
        }
    }

    commands
}

/// Four dimming strips covering the canvas outside the highlighted rect:
/// full-width top and bottom, then the remaining left and right bands.
fn highlight_strips(
    rect: &CropRect,
    sx: f32,
    sy: f32,
    canvas_w: f32,
    canvas_h: f32,
    alpha: f32,
) -> Vec<DrawCommand> {
    let left = rect.left as f32 * sx;
    let top = rect.top as f32 * sy;
    let right = rect.right as f32 * sx;
    let bottom = rect.bottom as f32 * sy;

    let candidates = [
        (0.0, 0.0, canvas_w, top),
        (0.0, bottom, canvas_w, canvas_h - bottom),
        (0.0, top, left, bottom - top),
        (right, top, canvas_w - right, bottom - top),
    ];

    candidates
        .into_iter()
        .filter(|&(_, _, w, h)| w > 0.0 && h > 0.0)
        .map(|(l, t, w, h)| DrawCommand::DimRect {
            left: l,
            top: t,
            width: w,
            height: h,
            alpha,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{all_crop_rects, crop_polygon, CropSettings, FOCAL_LENGTHS};
    use crate::palette::assign_colors;

    fn scene_rects() -> Vec<CropRect> {
        assign_colors(all_crop_rects(300.0, &FOCAL_LENGTHS, 6000, 4000))
    }

    #[test]
    fn emits_outlines_for_selected_only_in_order() {
        let rects = scene_rects();
        let selected = [FocalLength(400), FocalLength(600)];
        let scene = OverlayScene {
            rects: &rects,
            selected: &selected,
            highlight: None,
            crop_polygon: None,
            source_width: 6000,
            source_height: 4000,
        };
        let commands = build_draw_commands(&scene, 1500, 1000, &OverlayStyle::default());
        assert_eq!(commands.len(), 2);
        // Outermost (smallest focal length) first.
        let DrawCommand::StrokeRect { width, .. } = &commands[0] else {
            panic!("expected stroke rect");
        };
        // 400mm on a 300mm base: 4500px wide at quarter scale.
        assert_eq!(*width, 1125.0);
    }

    #[test]
    fn scales_independently_per_axis() {
        let rects = scene_rects();
        let selected = [FocalLength(600)];
        let scene = OverlayScene {
            rects: &rects,
            selected: &selected,
            highlight: None,
            crop_polygon: None,
            source_width: 6000,
            source_height: 4000,
        };
        let commands = build_draw_commands(&scene, 3000, 1000, &OverlayStyle::default());
        let DrawCommand::StrokeRect { left, top, width, height, .. } = &commands[0] else {
            panic!("expected stroke rect");
        };
        assert_eq!(*left, 750.0);
        assert_eq!(*top, 250.0);
        assert_eq!(*width, 1500.0);
        assert_eq!(*height, 500.0);
    }

    #[test]
    fn crop_polygon_draws_below_outlines() {
        let rects = scene_rects();
        let selected = [FocalLength(400)];
        let crop = CropSettings {
            left: 0.1,
            top: 0.1,
            right: 0.9,
            bottom: 0.9,
            angle_deg: 5.0,
        };
        let polygon = crop_polygon(&crop);
        let scene = OverlayScene {
            rects: &rects,
            selected: &selected,
            highlight: None,
            crop_polygon: Some(&polygon),
            source_width: 6000,
            source_height: 4000,
        };
        let commands = build_draw_commands(&scene, 1500, 1000, &OverlayStyle::default());
        assert!(matches!(commands[0], DrawCommand::DimOutsidePolygon { .. }));
        assert!(matches!(commands[1], DrawCommand::StrokePolygon { .. }));
        assert!(matches!(commands[2], DrawCommand::StrokeRect { .. }));
    }

    #[test]
    fn highlight_adds_four_strips_at_distinct_alpha() {
        let rects = scene_rects();
        let selected = [FocalLength(600)];
        let style = OverlayStyle::default();
        let scene = OverlayScene {
            rects: &rects,
            selected: &selected,
            highlight: Some(FocalLength(600)),
            crop_polygon: None,
            source_width: 6000,
            source_height: 4000,
        };
        let commands = build_draw_commands(&scene, 1500, 1000, &style);
        let strips: Vec<_> = commands
            .iter()
            .filter(|c| matches!(c, DrawCommand::DimRect { .. }))
            .collect();
        assert_eq!(strips.len(), 4);
        for strip in strips {
            let DrawCommand::DimRect { alpha, .. } = strip else {
                unreachable!()
            };
            assert_eq!(*alpha, style.highlight_dim_alpha);
            assert_ne!(*alpha, style.crop_dim_alpha);
        }
    }

    #[test]
    fn foreign_highlight_emits_no_strips() {
        let rects = scene_rects();
        let selected = [FocalLength(600)];
        let scene = OverlayScene {
            rects: &rects,
            selected: &selected,
            // 350mm is not in the active rect set.
            highlight: Some(FocalLength(350)),
            crop_polygon: None,
            source_width: 6000,
            source_height: 4000,
        };
        let commands = build_draw_commands(&scene, 1500, 1000, &OverlayStyle::default());
        assert!(commands
            .iter()
            .all(|c| !matches!(c, DrawCommand::DimRect { .. })));
    }
}
