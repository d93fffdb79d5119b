use std::collections::BTreeSet;

use crate::geometry::{FocalLength, FOCAL_LENGTHS};

/// Which frame the overlays are computed against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewMode {
    Full,
    Cropped,
}

/// How many focal lengths are auto-selected after a view-mode change.
///
/// Mode changes always replace the selection with the smallest enabled
/// focal lengths; prior manual selection is deliberately discarded (see
/// DESIGN.md for the rationale and the flagged alternative).
const AUTO_SELECT_COUNT: usize = 4;

/// Immutable per-session facts derived from host metadata at open time.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Focal length reported by the lens, millimeters.
    pub lens_fl: f64,
    /// Full-frame-equivalent base focal length (lens value, or the 35mm
    /// hint when the sensor is a crop sensor).
    pub original_fl: f64,
    pub is_crop_sensor: bool,
    /// 35mm-equivalent focal length implied by the applied crop.
    pub effective_fl: u32,
    pub full_width: u32,
    pub full_height: u32,
    pub cropped_width: u32,
    pub cropped_height: u32,
    /// Whether the host reports a non-trivial applied crop.
    pub has_crop: bool,
}

/// Mutable per-session view state. Created when the overlay session opens,
/// dropped when it closes; nothing persists across sessions.
#[derive(Debug, Clone)]
pub struct ViewState {
    info: SessionInfo,
    mode: ViewMode,
    selected: BTreeSet<FocalLength>,
    highlight: Option<FocalLength>,
    /// Cleared when full-frame pixels cannot be resolved; the full view is
    /// then unreachable for the rest of the session.
    full_frame_available: bool,
}

/// Immutable capture of the fields a render job needs.
#[derive(Debug, Clone, PartialEq)]
pub struct StateSnapshot {
    pub mode: ViewMode,
    pub selected: Vec<FocalLength>,
    pub highlight: Option<FocalLength>,
}

impl ViewState {
    pub fn new(info: SessionInfo) -> Self {
        let mut state = Self {
            info,
            mode: ViewMode::Full,
            selected: BTreeSet::new(),
            highlight: None,
            full_frame_available: true,
        };
        state.auto_select();
        state
    }

    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    pub fn mode(&self) -> ViewMode {
        self.mode
    }

    pub fn highlight(&self) -> Option<FocalLength> {
        self.highlight
    }

    pub fn selected(&self) -> impl Iterator<Item = FocalLength> + '_ {
        self.selected.iter().copied()
    }

    /// Base focal length the enabled set is computed against in the
    /// current mode.
    pub fn active_base_fl(&self) -> f64 {
        match self.mode {
            ViewMode::Full => self.info.original_fl,
            ViewMode::Cropped => f64::from(self.info.effective_fl),
        }
    }

    pub fn active_dimensions(&self) -> (u32, u32) {
        match self.mode {
            ViewMode::Full => (self.info.full_width, self.info.full_height),
            ViewMode::Cropped => (self.info.cropped_width, self.info.cropped_height),
        }
    }

    pub fn is_enabled(&self, fl: FocalLength) -> bool {
        f64::from(fl.millimeters()) > self.active_base_fl()
    }

    /// Catalog focal lengths selectable in the current mode, ascending.
    pub fn enabled(&self) -> Vec<FocalLength> {
        FOCAL_LENGTHS
            .iter()
            .copied()
            .filter(|&fl| self.is_enabled(fl))
            .collect()
    }

    /// Whether the cropped view is offered at all.
    pub fn cropped_view_offered(&self) -> bool {
        self.info.has_crop
    }

    pub fn full_view_offered(&self) -> bool {
        self.full_frame_available
    }

    /// Takes the full view off the table after a base-image degradation and
    /// forces the cropped view. Returns true when the mode flipped.
    pub fn disable_full_view(&mut self) -> bool {
        self.full_frame_available = false;
        if self.mode == ViewMode::Full {
            self.apply_mode(ViewMode::Cropped);
            true
        } else {
            false
        }
    }

    /// Switches view mode. Returns false when the request is a no-op or the
    /// target mode is not offered.
    pub fn set_mode(&mut self, mode: ViewMode) -> bool {
        if mode == self.mode {
            return false;
        }
        match mode {
            ViewMode::Cropped if !self.cropped_view_offered() => return false,
            ViewMode::Full if !self.full_frame_available => return false,
            _ => {}
        }
        self.apply_mode(mode);
        true
    }

    fn apply_mode(&mut self, mode: ViewMode) {
        self.mode = mode;
        // Deselect anything that the new base focal length disables, then
        // replace the selection with the smallest enabled focal lengths.
        self.auto_select();
        self.sanitize_highlight();
    }

    fn auto_select(&mut self) {
        self.selected = self
            .enabled()
            .into_iter()
            .take(AUTO_SELECT_COUNT)
            .collect();
    }

    /// Flips one focal length's membership in the selection. Disabled focal
    /// lengths cannot be selected; returns false when nothing changed.
    pub fn toggle(&mut self, fl: FocalLength) -> bool {
        if self.selected.contains(&fl) {
            self.selected.remove(&fl);
            self.sanitize_highlight();
            true
        } else if self.is_enabled(fl) {
            self.selected.insert(fl);
            true
        } else {
            false
        }
    }

    /// Sets the highlight dropdown. `None` is always legal; a focal length
    /// is legal only while selected and enabled. Returns false on an illegal
    /// or no-op request.
    pub fn set_highlight(&mut self, highlight: Option<FocalLength>) -> bool {
        if highlight == self.highlight {
            return false;
        }
        if let Some(fl) = highlight {
            if !self.selected.contains(&fl) || !self.is_enabled(fl) {
                return false;
            }
        }
        self.highlight = highlight;
        true
    }

    fn sanitize_highlight(&mut self) {
        if let Some(fl) = self.highlight {
            if !self.selected.contains(&fl) || !self.is_enabled(fl) {
                self.highlight = None;
            }
        }
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            mode: self.mode,
            selected: self.selected.iter().copied().collect(),
            highlight: self.highlight,
        }
    }

    /// Header line shown above the overlay. Pure function of the session
    /// facts and the current mode; recomputed on every transition.
    pub fn header_text(&self) -> String {
        let (w, h) = self.active_dimensions();
        let lens = if self.info.is_crop_sensor {
            format!(
                "{:.0}mm lens ({:.0}mm full-frame equivalent)",
                self.info.lens_fl, self.info.original_fl
            )
        } else {
            format!("{:.0}mm lens", self.info.lens_fl)
        };
        match self.mode {
            ViewMode::Full => format!("{lens} | full frame {w}x{h}"),
            ViewMode::Cropped => format!(
                "{lens} | cropped frame {w}x{h}, effective {}mm",
                self.info.effective_fl
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info_with_crop() -> SessionInfo {
        SessionInfo {
            lens_fl: 300.0,
            original_fl: 300.0,
            is_crop_sensor: false,
            effective_fl: 450,
            full_width: 6000,
            full_height: 4000,
            cropped_width: 4000,
            cropped_height: 2667,
            has_crop: true,
        }
    }

    #[test]
    fn initial_selection_is_four_smallest_enabled() {
        let state = ViewState::new(info_with_crop());
        let selected: Vec<_> = state.selected().collect();
        assert_eq!(
            selected,
            vec![
                FocalLength(400),
                FocalLength(500),
                FocalLength(600),
                FocalLength(700)
            ]
        );
    }

    #[test]
    fn mode_change_recomputes_enabled_and_reselects() {
        let mut state = ViewState::new(info_with_crop());
        assert!(state.toggle(FocalLength(1200)));
        assert!(state.set_mode(ViewMode::Cropped));

        // 450mm base disables 400mm; manual selection is replaced.
        assert!(!state.is_enabled(FocalLength(400)));
        let selected: Vec<_> = state.selected().collect();
        assert_eq!(
            selected,
            vec![
                FocalLength(500),
                FocalLength(600),
                FocalLength(700),
                FocalLength(800)
            ]
        );
    }

    #[test]
    fn cropped_mode_unreachable_without_crop() {
        let mut info = info_with_crop();
        info.has_crop = false;
        info.effective_fl = 300;
        let mut state = ViewState::new(info);
        assert!(!state.set_mode(ViewMode::Cropped));
        assert_eq!(state.mode(), ViewMode::Full);
    }

    #[test]
    fn disabled_focal_length_cannot_be_selected() {
        let mut state = ViewState::new(info_with_crop());
        assert!(!state.toggle(FocalLength(200)));
        assert!(!state.selected().any(|fl| fl == FocalLength(200)));
    }

    #[test]
    fn highlight_resets_when_it_becomes_illegal() {
        let mut state = ViewState::new(info_with_crop());
        assert!(state.set_highlight(Some(FocalLength(400))));
        assert!(state.toggle(FocalLength(400)));
        assert_eq!(state.highlight(), None);
    }

    #[test]
    fn highlight_rejects_unselected_focal_length() {
        let mut state = ViewState::new(info_with_crop());
        assert!(!state.set_highlight(Some(FocalLength(1200))));
        assert_eq!(state.highlight(), None);
    }

    #[test]
    fn degradation_forces_cropped_and_disables_full() {
        let mut state = ViewState::new(info_with_crop());
        assert!(state.disable_full_view());
        assert_eq!(state.mode(), ViewMode::Cropped);
        assert!(!state.set_mode(ViewMode::Full));
    }

    #[test]
    fn header_reflects_mode_and_crop_sensor() {
        let mut info = info_with_crop();
        info.lens_fl = 300.0;
        info.original_fl = 450.0;
        info.is_crop_sensor = true;
        let mut state = ViewState::new(info);
        let header = state.header_text();
        assert!(header.contains("300mm lens"));
        assert!(header.contains("450mm full-frame equivalent"));
        assert!(header.contains("6000x4000"));

        state.set_mode(ViewMode::Cropped);
        let header = state.header_text();
        assert!(header.contains("cropped frame 4000x2667"));
    }
}
