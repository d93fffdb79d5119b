use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use image::RgbaImage;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::Error;
use crate::geometry::CropSettings;
use crate::meta::MetadataTool;
use crate::state::ViewMode;

/// Host thumbnail-rendering callback. One call, one reply channel; the
/// provider awaits the receiver with a bounded timeout instead of polling.
pub trait ThumbnailSource: Send + Sync {
    /// Requests an encoded thumbnail no larger than `width` x `height`.
    fn request(&self, width: u32, height: u32) -> oneshot::Receiver<Result<Vec<u8>, String>>;
}

/// Resolved pixel source for one view mode.
#[derive(Debug, Clone, PartialEq)]
pub struct BaseImage {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    /// False when the full view had to fall back to the cropped thumbnail.
    pub is_uncropped: bool,
}

/// Resolves the base pixels for each view mode and owns the "full frame
/// unavailable" degradation.
pub struct BaseImageProvider {
    original: PathBuf,
    out_dir: PathBuf,
    thumbnails: Arc<dyn ThumbnailSource>,
    metadata: Arc<dyn MetadataTool>,
    thumbnail_timeout: Duration,
    cropped_width: u32,
    cropped_height: u32,
}

impl BaseImageProvider {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        original: PathBuf,
        out_dir: PathBuf,
        thumbnails: Arc<dyn ThumbnailSource>,
        metadata: Arc<dyn MetadataTool>,
        thumbnail_timeout: Duration,
        cropped_width: u32,
        cropped_height: u32,
    ) -> Self {
        Self {
            original,
            out_dir,
            thumbnails,
            metadata,
            thumbnail_timeout,
            cropped_width,
            cropped_height,
        }
    }

    /// Resolves the pixel source for `mode`.
    ///
    /// The cropped view reports hard errors (the host thumbnail is the one
    /// source that is supposed to always work). The full view never errors:
    /// when no uncropped pixels can be had it degrades to the cropped
    /// thumbnail with `is_uncropped = false` and lets the caller downgrade
    /// the session.
    pub async fn resolve(&self, mode: ViewMode) -> Result<BaseImage, Error> {
        match mode {
            ViewMode::Cropped => self.resolve_cropped().await,
            ViewMode::Full => self.resolve_full().await,
        }
    }

    async fn resolve_cropped(&self) -> Result<BaseImage, Error> {
        let reply = self
            .thumbnails
            .request(self.cropped_width, self.cropped_height);
        let bytes = match tokio::time::timeout(self.thumbnail_timeout, reply).await {
            Ok(Ok(Ok(bytes))) => bytes,
            Ok(Ok(Err(message))) => {
                return Err(Error::Render(format!("thumbnail render failed: {message}")));
            }
            Ok(Err(_)) => {
                return Err(Error::Render("thumbnail callback dropped".to_string()));
            }
            Err(_) => {
                return Err(Error::Render(format!(
                    "thumbnail not delivered within {:?}",
                    self.thumbnail_timeout
                )));
            }
        };

        let path = self.out_dir.join("base-cropped.jpg");
        let (width, height) = write_and_measure(&path, &bytes)
            .map_err(|err| Error::Render(format!("bad thumbnail bytes: {err}")))?;
        debug!(path = %path.display(), width, height, "cropped base image ready");
        Ok(BaseImage {
            path,
            width,
            height,
            is_uncropped: false,
        })
    }

    async fn resolve_full(&self) -> Result<BaseImage, Error> {
        // The original file already is the full frame when it is a JPEG.
        if is_jpeg_path(&self.original) {
            if let Ok((width, height)) = image::image_dimensions(&self.original) {
                return Ok(BaseImage {
                    path: self.original.clone(),
                    width,
                    height,
                    is_uncropped: true,
                });
            }
        } else {
            match self.extract_preview().await {
                Ok(Some(base)) => return Ok(base),
                Ok(None) => {
                    debug!(path = %self.original.display(), "no embedded preview found");
                }
                Err(err) => {
                    warn!(path = %self.original.display(), error = %err, "preview extraction failed");
                }
            }
        }

        warn!("full frame unavailable; degrading to cropped thumbnail");
        let mut fallback = self.resolve_cropped().await?;
        fallback.is_uncropped = false;
        Ok(fallback)
    }

    async fn extract_preview(&self) -> Result<Option<BaseImage>> {
        let metadata = Arc::clone(&self.metadata);
        let original = self.original.clone();
        let bytes = tokio::task::spawn_blocking(move || metadata.preview_jpeg(&original))
            .await
            .context("preview extraction task panicked")??;
        let Some(bytes) = bytes else {
            return Ok(None);
        };

        let (width, height) = jpeg_dimensions(&bytes)?;
        let path = self.out_dir.join("base-full.jpg");
        std::fs::write(&path, &bytes)
            .with_context(|| format!("failed to write {}", path.display()))?;
        debug!(path = %path.display(), width, height, "embedded preview extracted");
        Ok(Some(BaseImage {
            path,
            width: u32::from(width),
            height: u32::from(height),
            is_uncropped: true,
        }))
    }
}

fn is_jpeg_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"))
}

/// Header-only probe of preview bytes; rejects non-JPEG payloads without a
/// full decode.
fn jpeg_dimensions(bytes: &[u8]) -> Result<(u16, u16)> {
    let mut decoder = jpeg_decoder::Decoder::new(Cursor::new(bytes));
    decoder
        .read_info()
        .context("embedded preview is not a decodable JPEG")?;
    let info = decoder
        .info()
        .ok_or_else(|| anyhow!("preview JPEG reports no dimensions"))?;
    Ok((info.width, info.height))
}

fn write_and_measure(path: &Path, bytes: &[u8]) -> Result<(u32, u32)> {
    let decoded = image::load_from_memory(bytes).context("thumbnail bytes failed to decode")?;
    std::fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
    Ok((decoded.width(), decoded.height()))
}

/// High-quality RGBA resize shared by the base-image path and the canvas
/// backend.
pub fn resize_rgba(src: &RgbaImage, dst_width: u32, dst_height: u32) -> Result<RgbaImage> {
    if src.width() == dst_width && src.height() == dst_height {
        return Ok(src.clone());
    }
    let src_view = fast_image_resize::images::Image::from_vec_u8(
        src.width(),
        src.height(),
        src.as_raw().clone(),
        fast_image_resize::PixelType::U8x4,
    )
    .context("source buffer rejected by resizer")?;
    let mut dst_view =
        fast_image_resize::images::Image::new(dst_width, dst_height, fast_image_resize::PixelType::U8x4);
    let mut resizer = fast_image_resize::Resizer::new();
    resizer
        .resize(&src_view, &mut dst_view, None)
        .context("resize failed")?;
    RgbaImage::from_raw(dst_width, dst_height, dst_view.into_vec())
        .ok_or_else(|| anyhow!("resized buffer has unexpected length"))
}

/// Stand-in for the host's catalog renderer: decodes the original file,
/// applies the fractional crop, resizes, and replies with encoded JPEG
/// bytes. Used by the CLI binary and the integration tests.
pub struct FileThumbnailSource {
    original: PathBuf,
    crop: CropSettings,
}

impl FileThumbnailSource {
    pub fn new(original: PathBuf, crop: CropSettings) -> Self {
        Self { original, crop }
    }
}

impl ThumbnailSource for FileThumbnailSource {
    fn request(&self, width: u32, height: u32) -> oneshot::Receiver<Result<Vec<u8>, String>> {
        let (tx, rx) = oneshot::channel();
        let original = self.original.clone();
        let crop = self.crop;
        std::thread::spawn(move || {
            let result = render_cropped_thumbnail(&original, &crop, width, height)
                .map_err(|err| format!("{err:#}"));
            let _ = tx.send(result);
        });
        rx
    }
}

fn render_cropped_thumbnail(
    original: &Path,
    crop: &CropSettings,
    max_width: u32,
    max_height: u32,
) -> Result<Vec<u8>> {
    let decoded = image::ImageReader::open(original)?
        .with_guessed_format()?
        .decode()
        .context("failed to decode original for thumbnail")?
        .to_rgba8();

    // Axis-aligned approximation of the develop crop; the host's own
    // renderer honors the rotation.
    let (w, h) = (decoded.width(), decoded.height());
    let left = (crop.left.clamp(0.0, 1.0) * f64::from(w)) as u32;
    let top = (crop.top.clamp(0.0, 1.0) * f64::from(h)) as u32;
    let right = ((crop.right.clamp(0.0, 1.0) * f64::from(w)) as u32).max(left + 1);
    let bottom = ((crop.bottom.clamp(0.0, 1.0) * f64::from(h)) as u32).max(top + 1);
    let cropped = image::imageops::crop_imm(
        &decoded,
        left,
        top,
        (right - left).min(w - left),
        (bottom - top).min(h - top),
    )
    .to_image();

    let scale = f64::min(
        f64::from(max_width) / f64::from(cropped.width()),
        f64::from(max_height) / f64::from(cropped.height()),
    )
    .min(1.0);
    let out_w = ((f64::from(cropped.width()) * scale) as u32).max(1);
    let out_h = ((f64::from(cropped.height()) * scale) as u32).max(1);
    let resized = resize_rgba(&cropped, out_w, out_h)?;

    let mut bytes = Vec::new();
    let rgb = image::DynamicImage::ImageRgba8(resized).to_rgb8();
    rgb.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Jpeg)
        .context("failed to encode thumbnail")?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    struct StaticThumbs {
        bytes: Option<Vec<u8>>,
    }

    impl ThumbnailSource for StaticThumbs {
        fn request(&self, _w: u32, _h: u32) -> oneshot::Receiver<Result<Vec<u8>, String>> {
            let (tx, rx) = oneshot::channel();
            match &self.bytes {
                Some(bytes) => {
                    let _ = tx.send(Ok(bytes.clone()));
                }
                None => {
                    // Never reply; the sender leaks until the test ends so
                    // the receiver sees a timeout rather than a closure.
                    std::mem::forget(tx);
                }
            }
            rx
        }
    }

    struct NoPreviewTool;

    impl MetadataTool for NoPreviewTool {
        fn focal_length_35mm(&self, _path: &Path) -> Result<Option<f64>> {
            Ok(None)
        }
        fn preview_jpeg(&self, _path: &Path) -> Result<Option<Vec<u8>>> {
            Ok(None)
        }
    }

    struct StaticPreviewTool {
        bytes: Vec<u8>,
    }

    impl MetadataTool for StaticPreviewTool {
        fn focal_length_35mm(&self, _path: &Path) -> Result<Option<f64>> {
            Ok(None)
        }
        fn preview_jpeg(&self, _path: &Path) -> Result<Option<Vec<u8>>> {
            Ok(Some(self.bytes.clone()))
        }
    }

    fn tiny_jpeg(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbImage::from_pixel(width, height, image::Rgb([40, 90, 160]));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Jpeg)
            .unwrap();
        bytes
    }

    fn provider(
        original: PathBuf,
        out_dir: PathBuf,
        thumbs: Arc<dyn ThumbnailSource>,
        tool: Arc<dyn MetadataTool>,
        timeout: Duration,
    ) -> BaseImageProvider {
        BaseImageProvider::new(original, out_dir, thumbs, tool, timeout, 400, 267)
    }

    #[tokio::test]
    async fn cropped_view_writes_thumbnail_bytes() {
        let dir = tempdir().unwrap();
        let p = provider(
            dir.path().join("photo.nef"),
            dir.path().to_path_buf(),
            Arc::new(StaticThumbs {
                bytes: Some(tiny_jpeg(40, 30)),
            }),
            Arc::new(NoPreviewTool),
            Duration::from_secs(1),
        );
        let base = p.resolve(ViewMode::Cropped).await.unwrap();
        assert_eq!((base.width, base.height), (40, 30));
        assert!(base.path.exists());
        assert!(!base.is_uncropped);
    }

    #[tokio::test]
    async fn thumbnail_timeout_reports_render_failure() {
        let dir = tempdir().unwrap();
        let p = provider(
            dir.path().join("photo.nef"),
            dir.path().to_path_buf(),
            Arc::new(StaticThumbs { bytes: None }),
            Arc::new(NoPreviewTool),
            Duration::from_millis(50),
        );
        let err = p.resolve(ViewMode::Cropped).await.unwrap_err();
        assert!(matches!(err, Error::Render(_)));
    }

    #[tokio::test]
    async fn full_view_uses_jpeg_original_directly() {
        let dir = tempdir().unwrap();
        let original = dir.path().join("photo.jpg");
        std::fs::write(&original, tiny_jpeg(60, 40)).unwrap();
        let p = provider(
            original.clone(),
            dir.path().to_path_buf(),
            Arc::new(StaticThumbs { bytes: None }),
            Arc::new(NoPreviewTool),
            Duration::from_secs(1),
        );
        let base = p.resolve(ViewMode::Full).await.unwrap();
        assert_eq!(base.path, original);
        assert!(base.is_uncropped);
        assert_eq!((base.width, base.height), (60, 40));
    }

    #[tokio::test]
    async fn full_view_extracts_embedded_preview_for_raw() {
        let dir = tempdir().unwrap();
        let p = provider(
            dir.path().join("photo.nef"),
            dir.path().to_path_buf(),
            Arc::new(StaticThumbs { bytes: None }),
            Arc::new(StaticPreviewTool {
                bytes: tiny_jpeg(80, 50),
            }),
            Duration::from_secs(1),
        );
        let base = p.resolve(ViewMode::Full).await.unwrap();
        assert!(base.is_uncropped);
        assert_eq!((base.width, base.height), (80, 50));
        assert!(base.path.ends_with("base-full.jpg"));
    }

    #[tokio::test]
    async fn full_view_degrades_to_cropped_thumbnail() {
        let dir = tempdir().unwrap();
        let p = provider(
            dir.path().join("photo.nef"),
            dir.path().to_path_buf(),
            Arc::new(StaticThumbs {
                bytes: Some(tiny_jpeg(40, 30)),
            }),
            Arc::new(NoPreviewTool),
            Duration::from_secs(1),
        );
        let base = p.resolve(ViewMode::Full).await.unwrap();
        assert!(!base.is_uncropped);
        assert!(base.path.ends_with("base-cropped.jpg"));
    }

    #[test]
    fn resize_preserves_dimensions_request() {
        let src = RgbaImage::from_pixel(100, 60, image::Rgba([10, 20, 30, 255]));
        let out = resize_rgba(&src, 50, 30).unwrap();
        assert_eq!(out.dimensions(), (50, 30));
        // Solid-color input stays solid through the filter.
        assert_eq!(out.get_pixel(25, 15).0[..3], [10, 20, 30]);
    }
}
