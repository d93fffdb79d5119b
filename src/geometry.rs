use std::fmt;

/// Focal length in whole millimeters.
///
/// The overlay works from a fixed catalog of standard telephoto values; a
/// `FocalLength` is cheap to copy and orders numerically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FocalLength(pub u32);

impl FocalLength {
    pub fn millimeters(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for FocalLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}mm", self.0)
    }
}

/// The 20 standard focal lengths offered as overlay candidates.
pub const FOCAL_LENGTHS: [FocalLength; 20] = [
    FocalLength(24),
    FocalLength(28),
    FocalLength(35),
    FocalLength(40),
    FocalLength(50),
    FocalLength(70),
    FocalLength(85),
    FocalLength(100),
    FocalLength(135),
    FocalLength(150),
    FocalLength(200),
    FocalLength(250),
    FocalLength(300),
    FocalLength(400),
    FocalLength(500),
    FocalLength(600),
    FocalLength(700),
    FocalLength(800),
    FocalLength(1000),
    FocalLength(1200),
];

/// Crop edges below this delta from the full [0,1] extent count as "no crop".
pub const CROP_EPSILON: f64 = 0.001;

/// A simulated field-of-view crop for one target focal length, in sensor
/// pixels of the frame it was computed against.
#[derive(Debug, Clone, PartialEq)]
pub struct CropRect {
    pub focal_length: FocalLength,
    pub crop_ratio: f64,
    pub width: u32,
    pub height: u32,
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    /// Remaining resolution, truncated to one decimal.
    pub megapixels: f64,
    /// Linear share of the frame that survives the crop, floored percent.
    pub percentage: u32,
    /// 1-based palette slot; assigned from the full-frame ordering and
    /// carried unchanged into the cropped-frame variant.
    pub color_index: usize,
}

impl CropRect {
    /// True when `other` lies fully inside `self` (shared edges allowed).
    pub fn contains(&self, other: &CropRect) -> bool {
        other.left >= self.left
            && other.top >= self.top
            && other.right <= self.right
            && other.bottom <= self.bottom
    }
}

/// Centered crop rectangle simulating `target` on a frame captured at
/// `base` millimeters. `None` when the target does not narrow the view.
pub fn crop_rect(base: f64, target: FocalLength, width: u32, height: u32) -> Option<CropRect> {
    let target_mm = f64::from(target.millimeters());
    if base <= 0.0 || target_mm <= base || width == 0 || height == 0 {
        return None;
    }

    let crop_ratio = target_mm / base;
    let crop_width = (f64::from(width) / crop_ratio).floor() as u32;
    let crop_height = (f64::from(height) / crop_ratio).floor() as u32;
    if crop_width == 0 || crop_height == 0 {
        return None;
    }
    let left = (width - crop_width) / 2;
    let top = (height - crop_height) / 2;

    let megapixels =
        (f64::from(crop_width) * f64::from(crop_height) / 1_000_000.0 * 10.0).floor() / 10.0;
    let percentage = (100.0 / crop_ratio).floor() as u32;

    Some(CropRect {
        focal_length: target,
        crop_ratio,
        width: crop_width,
        height: crop_height,
        left,
        top,
        right: left + crop_width,
        bottom: top + crop_height,
        megapixels,
        percentage,
        // Callers assign the palette slot from the full-frame ordering.
        color_index: 0,
    })
}

/// All crop rectangles for the candidates longer than `base`, sorted
/// ascending by focal length (smallest focal length = outermost rectangle).
/// Candidates at or below `base` are skipped, not errored.
pub fn all_crop_rects(
    base: f64,
    candidates: &[FocalLength],
    width: u32,
    height: u32,
) -> Vec<CropRect> {
    let mut rects: Vec<CropRect> = candidates
        .iter()
        .filter_map(|&fl| crop_rect(base, fl, width, height))
        .collect();
    rects.sort_by_key(|r| r.focal_length);
    rects
}

/// 35mm-equivalent focal length implied by an applied width crop.
///
/// A degenerate crop width (host data error), including inverted edges, is
/// treated as "no crop" rather than letting the division blow up or
/// produce a nonsense negative quotient.
pub fn effective_focal_length(original: f64, crop_left: f64, crop_right: f64) -> u32 {
    let crop_width = crop_right - crop_left;
    if crop_width < CROP_EPSILON {
        return original.round() as u32;
    }
    (original / crop_width).round() as u32
}

/// Picks the session's base focal length for a possibly crop-sensor photo.
///
/// The 35mm-equivalent hint wins when it exceeds the lens focal length by
/// more than rounding noise; otherwise the lens value stands and the photo
/// is treated as full frame.
pub fn crop_sensor_equivalent(lens_fl: f64, hint_35mm: Option<f64>) -> (f64, bool) {
    match hint_35mm {
        Some(hint) if hint > lens_fl + 0.5 => (hint, true),
        _ => (lens_fl, false),
    }
}

/// A point in normalized [0,1] image-space coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// The applied develop crop, as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropSettings {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
    pub angle_deg: f64,
}

impl Default for CropSettings {
    fn default() -> Self {
        Self {
            left: 0.0,
            top: 0.0,
            right: 1.0,
            bottom: 1.0,
            angle_deg: 0.0,
        }
    }
}

impl CropSettings {
    /// True when every edge sits on the full [0,1] extent within epsilon.
    pub fn is_trivial(&self) -> bool {
        self.left.abs() < CROP_EPSILON
            && self.top.abs() < CROP_EPSILON
            && (self.right - 1.0).abs() < CROP_EPSILON
            && (self.bottom - 1.0).abs() < CROP_EPSILON
    }
}

/// Corners of the applied crop mapped back into the unrotated original
/// frame, in normalized coordinates. Winding: TL, TR, BR, BL.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropPolygon {
    pub corners: [Point; 4],
}

/// Rotated-crop corner polygon.
///
/// The host stores crop edges in the rotated frame; to draw the boundary on
/// the unrotated original each raw corner is rotated by the negated crop
/// angle about the image center (0.5, 0.5).
pub fn crop_polygon(crop: &CropSettings) -> CropPolygon {
    let raw = [
        Point { x: crop.left, y: crop.top },
        Point { x: crop.right, y: crop.top },
        Point { x: crop.right, y: crop.bottom },
        Point { x: crop.left, y: crop.bottom },
    ];
    let theta = -crop.angle_deg.to_radians();
    let (sin, cos) = theta.sin_cos();
    let corners = raw.map(|p| {
        let dx = p.x - 0.5;
        let dy = p.y - 0.5;
        Point {
            x: 0.5 + dx * cos - dy * sin,
            y: 0.5 + dx * sin + dy * cos,
        }
    });
    CropPolygon { corners }
}

/// Polygon for the host crop, or `None` when the crop is trivial.
pub fn crop_polygon_if_cropped(crop: &CropSettings) -> Option<CropPolygon> {
    if crop.is_trivial() {
        None
    } else {
        Some(crop_polygon(crop))
    }
}
