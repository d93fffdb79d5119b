use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use serde::Deserialize;

/// Top-level YAML configuration.
///
/// Every field has a sensible default so a missing or empty file still
/// yields a working session.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Configuration {
    /// Where composited overlay images (and extracted previews) are written.
    #[serde(default = "Configuration::default_output_dir")]
    pub output_dir: PathBuf,

    /// Delay coalescing bursts of UI toggles into one render.
    #[serde(default = "Configuration::default_debounce", with = "humantime_serde")]
    pub debounce: Duration,

    /// Bounded wait for the host to deliver a requested thumbnail.
    #[serde(
        default = "Configuration::default_thumbnail_timeout",
        with = "humantime_serde"
    )]
    pub thumbnail_timeout: Duration,

    /// Upper bound on a single render job, including external processes.
    #[serde(
        default = "Configuration::default_render_timeout",
        with = "humantime_serde"
    )]
    pub render_timeout: Duration,

    /// Which draw-command backend to try first.
    #[serde(default)]
    pub backend: BackendPreference,

    /// ImageMagick binary used by the script backend.
    #[serde(default = "Configuration::default_magick_binary")]
    pub magick_binary: String,

    /// External metadata tool used for 35mm-equivalent recovery and
    /// embedded preview extraction.
    #[serde(default = "Configuration::default_exiftool_binary")]
    pub exiftool_binary: String,

    /// Longest canvas edge for composited output.
    #[serde(default = "Configuration::default_canvas_long_edge")]
    pub canvas_long_edge: u32,

    #[serde(default)]
    pub overlay: OverlayStyle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendPreference {
    #[default]
    Canvas,
    Script,
}

/// Visual constants for the overlay drawing.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct OverlayStyle {
    /// Alpha of the colored rectangle outlines.
    #[serde(default = "OverlayStyle::default_stroke_alpha")]
    pub stroke_alpha: f32,
    /// Alpha of the dim laid over the area outside the applied crop.
    #[serde(default = "OverlayStyle::default_crop_dim_alpha")]
    pub crop_dim_alpha: f32,
    /// Alpha of the dim strips outside the highlighted focal length.
    #[serde(default = "OverlayStyle::default_highlight_dim_alpha")]
    pub highlight_dim_alpha: f32,
    /// Outline width at the reference display width, scaled with the canvas.
    #[serde(default = "OverlayStyle::default_base_line_width")]
    pub base_line_width: f32,
    /// Canvas width the base line width is calibrated against.
    #[serde(default = "OverlayStyle::default_reference_display_width")]
    pub reference_display_width: u32,
    /// Corner bracket arm length, as a fraction of the rectangle's width.
    #[serde(default = "OverlayStyle::default_corner_arm_fraction")]
    pub corner_arm_fraction: f32,
}

impl OverlayStyle {
    fn default_stroke_alpha() -> f32 {
        0.5
    }
    fn default_crop_dim_alpha() -> f32 {
        0.5
    }
    fn default_highlight_dim_alpha() -> f32 {
        0.35
    }
    fn default_base_line_width() -> f32 {
        3.0
    }
    fn default_reference_display_width() -> u32 {
        1440
    }
    fn default_corner_arm_fraction() -> f32 {
        0.12
    }

    /// Outline width for a canvas of `canvas_width` pixels, never below 1px.
    pub fn line_width_for(&self, canvas_width: u32) -> f32 {
        let scaled =
            self.base_line_width * canvas_width as f32 / self.reference_display_width as f32;
        scaled.max(1.0)
    }
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            stroke_alpha: Self::default_stroke_alpha(),
            crop_dim_alpha: Self::default_crop_dim_alpha(),
            highlight_dim_alpha: Self::default_highlight_dim_alpha(),
            base_line_width: Self::default_base_line_width(),
            reference_display_width: Self::default_reference_display_width(),
            corner_arm_fraction: Self::default_corner_arm_fraction(),
        }
    }
}

impl Configuration {
    fn default_output_dir() -> PathBuf {
        std::env::temp_dir().join("focal-frame")
    }
    fn default_debounce() -> Duration {
        Duration::from_millis(150)
    }
    fn default_thumbnail_timeout() -> Duration {
        Duration::from_secs(10)
    }
    fn default_render_timeout() -> Duration {
        Duration::from_secs(20)
    }
    fn default_magick_binary() -> String {
        "magick".to_string()
    }
    fn default_exiftool_binary() -> String {
        "exiftool".to_string()
    }
    fn default_canvas_long_edge() -> u32 {
        1440
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let cfg: Configuration = serde_yaml::from_str(&text)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(cfg)
    }

    /// Consuming validation pass; call once after loading.
    pub fn validated(self) -> Result<Self> {
        ensure!(
            self.debounce >= Duration::from_millis(10),
            "debounce must be at least 10ms"
        );
        ensure!(
            self.thumbnail_timeout > Duration::ZERO,
            "thumbnail-timeout must be positive"
        );
        ensure!(
            self.render_timeout > Duration::ZERO,
            "render-timeout must be positive"
        );
        ensure!(self.canvas_long_edge >= 256, "canvas-long-edge too small");
        for (name, alpha) in [
            ("stroke-alpha", self.overlay.stroke_alpha),
            ("crop-dim-alpha", self.overlay.crop_dim_alpha),
            ("highlight-dim-alpha", self.overlay.highlight_dim_alpha),
        ] {
            ensure!((0.0..=1.0).contains(&alpha), "{name} must be in [0,1]");
        }
        ensure!(
            self.overlay.base_line_width > 0.0,
            "base-line-width must be positive"
        );
        ensure!(
            self.overlay.reference_display_width > 0,
            "reference-display-width must be positive"
        );
        ensure!(
            (0.01..=0.5).contains(&self.overlay.corner_arm_fraction),
            "corner-arm-fraction must be in [0.01, 0.5]"
        );
        Ok(self)
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            output_dir: Self::default_output_dir(),
            debounce: Self::default_debounce(),
            thumbnail_timeout: Self::default_thumbnail_timeout(),
            render_timeout: Self::default_render_timeout(),
            backend: BackendPreference::default(),
            magick_binary: Self::default_magick_binary(),
            exiftool_binary: Self::default_exiftool_binary(),
            canvas_long_edge: Self::default_canvas_long_edge(),
            overlay: OverlayStyle::default(),
        }
    }
}
