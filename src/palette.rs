/// RGB swatch for an overlay outline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Swatch {
    pub name: &'static str,
    pub rgb: [u8; 3],
}

/// The fixed overlay palette. Indexing is 1-based to match the palette
/// slots carried on `CropRect`; the order never changes between sessions.
const PALETTE: [Swatch; 10] = [
    Swatch { name: "red", rgb: [230, 57, 54] },
    Swatch { name: "green", rgb: [67, 181, 73] },
    Swatch { name: "blue", rgb: [48, 113, 229] },
    Swatch { name: "yellow", rgb: [240, 200, 48] },
    Swatch { name: "cyan", rgb: [52, 200, 212] },
    Swatch { name: "magenta", rgb: [221, 64, 192] },
    Swatch { name: "orange", rgb: [243, 146, 41] },
    Swatch { name: "purple", rgb: [142, 68, 219] },
    Swatch { name: "teal", rgb: [38, 166, 154] },
    Swatch { name: "pink", rgb: [244, 143, 177] },
];

/// Palette slot for the focal length at 1-based `position` in the
/// full-frame ordering of selectable focal lengths. Colors wrap after ten.
pub fn color_index_for(position: usize) -> usize {
    debug_assert!(position >= 1);
    (position - 1) % PALETTE.len() + 1
}

/// Swatch for a 1-based palette slot.
pub fn swatch(color_index: usize) -> Swatch {
    debug_assert!((1..=PALETTE.len()).contains(&color_index));
    PALETTE[(color_index - 1) % PALETTE.len()]
}

/// Assigns palette slots to a full-frame rect sequence in place, then
/// returns it. Position is 1-based order by ascending focal length, which
/// `all_crop_rects` already guarantees.
pub fn assign_colors(mut rects: Vec<crate::geometry::CropRect>) -> Vec<crate::geometry::CropRect> {
    for (i, rect) in rects.iter_mut().enumerate() {
        rect.color_index = color_index_for(i + 1);
    }
    rects
}
