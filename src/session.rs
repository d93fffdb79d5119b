use tracing::{debug, info};

use crate::error::Error;
use crate::geometry::{
    all_crop_rects, crop_polygon_if_cropped, crop_sensor_equivalent, effective_focal_length,
    CropPolygon, CropRect, FOCAL_LENGTHS,
};
use crate::meta::{parse_dimensions, parse_focal_length, HostPhoto, MetadataTool};
use crate::palette::assign_colors;
use crate::state::{SessionInfo, ViewState};

/// Everything derived from host metadata when the overlay session opens:
/// the session facts, both rect sequences, and the crop boundary polygon.
/// Immutable for the life of the session.
#[derive(Debug, Clone)]
pub struct PhotoSession {
    pub info: SessionInfo,
    /// Rects against the full sensor frame, palette slots assigned.
    pub full_rects: Vec<CropRect>,
    /// Rects against the cropped frame, palette slots carried over from the
    /// full-frame ordering.
    pub cropped_rects: Vec<CropRect>,
    pub crop_polygon: Option<CropPolygon>,
}

impl PhotoSession {
    /// Validates metadata and computes the session geometry.
    ///
    /// Missing focal length or dimensions is fatal to opening; everything
    /// downstream degrades instead of failing. The external metadata tool
    /// is only consulted when the host has no 35mm-equivalent value.
    pub fn open(host: &dyn HostPhoto, tool: &dyn MetadataTool) -> Result<Self, Error> {
        let lens_fl = host
            .focal_length_text()
            .as_deref()
            .and_then(parse_focal_length)
            .ok_or_else(|| {
                Error::MetadataMissing("the photo does not report a focal length".to_string())
            })?;
        let (full_width, full_height) = host
            .dimensions_text()
            .as_deref()
            .and_then(parse_dimensions)
            .ok_or_else(|| {
                Error::MetadataMissing("the photo does not report its dimensions".to_string())
            })?;

        let hint = match host.focal_length_35mm().filter(|v| *v > 0.0) {
            Some(value) => Some(value),
            None => tool.focal_length_35mm(host.path()).unwrap_or_else(|err| {
                debug!(error = %err, "35mm-equivalent lookup failed; assuming full frame");
                None
            }),
        };
        let (original_fl, is_crop_sensor) = crop_sensor_equivalent(lens_fl, hint);

        let crop = host.crop();
        let crop_polygon = crop_polygon_if_cropped(&crop);
        let has_crop = crop_polygon.is_some();
        let effective_fl = if has_crop {
            effective_focal_length(original_fl, crop.left, crop.right)
        } else {
            original_fl.round() as u32
        };

        let (cropped_width, cropped_height) = if has_crop {
            (
                ((f64::from(full_width) * (crop.right - crop.left)).round() as u32).max(1),
                ((f64::from(full_height) * (crop.bottom - crop.top)).round() as u32).max(1),
            )
        } else {
            (full_width, full_height)
        };

        let full_rects = assign_colors(all_crop_rects(
            original_fl,
            &FOCAL_LENGTHS,
            full_width,
            full_height,
        ));
        let mut cropped_rects = all_crop_rects(
            f64::from(effective_fl),
            &FOCAL_LENGTHS,
            cropped_width,
            cropped_height,
        );
        // Color identity belongs to the focal length: the cropped variant
        // reuses the slot assigned in the full-frame ordering.
        for rect in &mut cropped_rects {
            if let Some(full) = full_rects
                .iter()
                .find(|f| f.focal_length == rect.focal_length)
            {
                rect.color_index = full.color_index;
            }
        }

        let info = SessionInfo {
            lens_fl,
            original_fl,
            is_crop_sensor,
            effective_fl,
            full_width,
            full_height,
            cropped_width,
            cropped_height,
            has_crop,
        };
        info!(
            lens_fl,
            original_fl,
            is_crop_sensor,
            effective_fl,
            has_crop,
            candidates = full_rects.len(),
            "overlay session opened"
        );
        Ok(Self {
            info,
            full_rects,
            cropped_rects,
            crop_polygon,
        })
    }

    pub fn initial_state(&self) -> ViewState {
        ViewState::new(self.info.clone())
    }
}
