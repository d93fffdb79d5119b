use std::path::PathBuf;

use crate::geometry::FocalLength;
use crate::state::ViewMode;

/// Discrete view-state change, sent by the UI to the render scheduler.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StateEvent {
    ViewModeChanged(ViewMode),
    SelectionToggled(FocalLength),
    HighlightChanged(Option<FocalLength>),
}

/// Published to the UI after a render job survives its staleness checks.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayUpdate {
    pub generation: u64,
    /// Path of the freshly composited image.
    pub path: PathBuf,
    /// Header line matching the state the image was rendered from.
    pub header: String,
    /// Dismissible degradation notice, when a fallback was taken.
    pub warning: Option<String>,
}
