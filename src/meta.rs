use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::debug;

use crate::geometry::CropSettings;

/// Read-only queries the host application answers for the selected photo.
///
/// The host formats values for display, so focal length and dimensions
/// arrive as strings ("300mm", "6000x4000") and are parsed here.
pub trait HostPhoto: Send + Sync {
    fn focal_length_text(&self) -> Option<String>;
    fn dimensions_text(&self) -> Option<String>;
    /// Raw 35mm-equivalent focal length; absent or zero when the host does
    /// not know it.
    fn focal_length_35mm(&self) -> Option<f64>;
    fn crop(&self) -> CropSettings;
    fn path(&self) -> &Path;
}

/// Parses a host-formatted focal length such as "300mm", "300 mm" or
/// "105.5mm".
pub fn parse_focal_length(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    let number: String = trimmed
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let value: f64 = number.parse().ok()?;
    (value > 0.0).then_some(value)
}

/// Parses a host-formatted dimension string such as "6000x4000".
pub fn parse_dimensions(text: &str) -> Option<(u32, u32)> {
    let (w, h) = text
        .trim()
        .split_once(|c: char| matches!(c, 'x' | 'X' | '\u{d7}'))?;
    let width: u32 = w.trim().parse().ok()?;
    let height: u32 = h.trim().parse().ok()?;
    (width > 0 && height > 0).then_some((width, height))
}

/// Optional external metadata-extraction capability. Consulted when the
/// host does not report a 35mm-equivalent focal length, and for pulling the
/// embedded full-resolution preview out of raw files.
pub trait MetadataTool: Send + Sync {
    fn focal_length_35mm(&self, path: &Path) -> Result<Option<f64>>;
    fn preview_jpeg(&self, path: &Path) -> Result<Option<Vec<u8>>>;
}

/// Output of one external tool invocation.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub success: bool,
    pub stdout: Vec<u8>,
    pub stderr: String,
}

/// Injectable process runner, so tests never shell out.
pub type ToolRunner = Arc<dyn Fn(&str, &[String]) -> Result<ToolOutput> + Send + Sync>;

pub fn system_tool_runner() -> ToolRunner {
    Arc::new(|binary: &str, args: &[String]| {
        let output = Command::new(binary)
            .args(args)
            .output()
            .with_context(|| format!("failed to run {binary}"))?;
        Ok(ToolOutput {
            success: output.status.success(),
            stdout: output.stdout,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    })
}

/// `MetadataTool` backed by exiftool.
#[derive(Clone)]
pub struct ExiftoolMetadataTool {
    binary: String,
    runner: ToolRunner,
}

impl ExiftoolMetadataTool {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            runner: system_tool_runner(),
        }
    }

    pub fn with_runner(binary: impl Into<String>, runner: ToolRunner) -> Self {
        Self {
            binary: binary.into(),
            runner,
        }
    }

    fn run(&self, args: &[String]) -> Result<ToolOutput> {
        (self.runner)(&self.binary, args)
    }
}

/// Preview tags tried in order; cameras embed under either name.
const PREVIEW_TAGS: [&str; 2] = ["JpgFromRaw", "PreviewImage"];

impl MetadataTool for ExiftoolMetadataTool {
    fn focal_length_35mm(&self, path: &Path) -> Result<Option<f64>> {
        let args = vec![
            "-s3".to_string(),
            "-n".to_string(),
            "-FocalLengthIn35mmFormat".to_string(),
            path.display().to_string(),
        ];
        let output = self.run(&args)?;
        if !output.success {
            debug!(stderr = %output.stderr, "exiftool tag query failed");
            return Ok(None);
        }
        let text = String::from_utf8_lossy(&output.stdout);
        let value = text.trim().parse::<f64>().ok().filter(|v| *v > 0.0);
        Ok(value)
    }

    fn preview_jpeg(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        for tag in PREVIEW_TAGS {
            let args = vec![
                "-b".to_string(),
                format!("-{tag}"),
                path.display().to_string(),
            ];
            let output = self.run(&args)?;
            // JPEG SOI marker; exiftool prints nothing for a missing tag.
            if output.success && output.stdout.starts_with(&[0xFF, 0xD8]) {
                debug!(tag, bytes = output.stdout.len(), "extracted embedded preview");
                return Ok(Some(output.stdout));
            }
        }
        Ok(None)
    }
}

/// `HostPhoto` backed by the file's own EXIF block. Stands in for the host
/// catalog when the binary is driven directly against a photo on disk.
pub struct ExifFileHost {
    path: PathBuf,
    crop: CropSettings,
    focal_length: Option<f64>,
    focal_length_35mm: Option<f64>,
    dimensions: Option<(u32, u32)>,
}

impl ExifFileHost {
    pub fn open(path: &Path, crop: CropSettings) -> Result<Self> {
        let dimensions = image::image_dimensions(path).ok();
        let (focal_length, focal_length_35mm) = read_exif_focal_lengths(path);
        Ok(Self {
            path: path.to_path_buf(),
            crop,
            focal_length,
            focal_length_35mm,
            dimensions,
        })
    }
}

fn read_exif_focal_lengths(path: &Path) -> (Option<f64>, Option<f64>) {
    let Ok(file) = File::open(path) else {
        return (None, None);
    };
    let mut buf = BufReader::new(file);
    let Ok(reader) = exif::Reader::new().read_from_container(&mut buf) else {
        return (None, None);
    };

    let lens = reader
        .get_field(exif::Tag::FocalLength, exif::In::PRIMARY)
        .and_then(|field| match &field.value {
            exif::Value::Rational(values) if !values.is_empty() => Some(values[0].to_f64()),
            _ => None,
        })
        .filter(|v| *v > 0.0);
    let equiv = reader
        .get_field(exif::Tag::FocalLengthIn35mmFilm, exif::In::PRIMARY)
        .and_then(|field| field.value.get_uint(0))
        .map(f64::from)
        .filter(|v| *v > 0.0);
    (lens, equiv)
}

impl HostPhoto for ExifFileHost {
    fn focal_length_text(&self) -> Option<String> {
        self.focal_length.map(|fl| format!("{fl:.0}mm"))
    }

    fn dimensions_text(&self) -> Option<String> {
        self.dimensions.map(|(w, h)| format!("{w}x{h}"))
    }

    fn focal_length_35mm(&self) -> Option<f64> {
        self.focal_length_35mm
    }

    fn crop(&self) -> CropSettings {
        self.crop
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_focal_length_strings() {
        assert_eq!(parse_focal_length("300mm"), Some(300.0));
        assert_eq!(parse_focal_length(" 105.5 mm"), Some(105.5));
        assert_eq!(parse_focal_length("mm"), None);
        assert_eq!(parse_focal_length("0mm"), None);
    }

    #[test]
    fn parses_host_dimension_strings() {
        assert_eq!(parse_dimensions("6000x4000"), Some((6000, 4000)));
        assert_eq!(parse_dimensions("6000 X 4000"), Some((6000, 4000)));
        assert_eq!(parse_dimensions("6000"), None);
        assert_eq!(parse_dimensions("0x4000"), None);
    }

    fn fake_runner(outputs: Vec<ToolOutput>) -> ToolRunner {
        let outputs = std::sync::Mutex::new(outputs.into_iter());
        Arc::new(move |_, _| {
            Ok(outputs
                .lock()
                .unwrap()
                .next()
                .expect("unexpected extra tool invocation"))
        })
    }

    #[test]
    fn reads_numeric_tag_from_tool_output() {
        let tool = ExiftoolMetadataTool::with_runner(
            "exiftool",
            fake_runner(vec![ToolOutput {
                success: true,
                stdout: b"450\n".to_vec(),
                stderr: String::new(),
            }]),
        );
        let value = tool.focal_length_35mm(Path::new("photo.nef")).unwrap();
        assert_eq!(value, Some(450.0));
    }

    #[test]
    fn missing_tag_yields_none() {
        let tool = ExiftoolMetadataTool::with_runner(
            "exiftool",
            fake_runner(vec![ToolOutput {
                success: true,
                stdout: Vec::new(),
                stderr: String::new(),
            }]),
        );
        let value = tool.focal_length_35mm(Path::new("photo.nef")).unwrap();
        assert_eq!(value, None);
    }

    #[test]
    fn preview_falls_through_tags_and_validates_soi() {
        let tool = ExiftoolMetadataTool::with_runner(
            "exiftool",
            fake_runner(vec![
                // JpgFromRaw missing
                ToolOutput {
                    success: true,
                    stdout: Vec::new(),
                    stderr: String::new(),
                },
                // PreviewImage present
                ToolOutput {
                    success: true,
                    stdout: vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00],
                    stderr: String::new(),
                },
            ]),
        );
        let bytes = tool.preview_jpeg(Path::new("photo.nef")).unwrap().unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn garbage_preview_bytes_are_rejected() {
        let tool = ExiftoolMetadataTool::with_runner(
            "exiftool",
            fake_runner(vec![
                ToolOutput {
                    success: true,
                    stdout: b"not a jpeg".to_vec(),
                    stderr: String::new(),
                },
                ToolOutput {
                    success: false,
                    stdout: Vec::new(),
                    stderr: "boom".to_string(),
                },
            ]),
        );
        assert!(tool.preview_jpeg(Path::new("photo.nef")).unwrap().is_none());
    }
}
