use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use tracing::debug;

use crate::commands::DrawCommand;
use crate::meta::{system_tool_runner, ToolRunner};

use super::{OverlayRenderer, RenderRequest};

/// Script-generation backend: translates the draw list into an ImageMagick
/// invocation, writes it out as a shell script next to the output image,
/// and executes it through an injectable runner.
pub struct ScriptBackend {
    magick_binary: String,
    runner: ToolRunner,
}

impl ScriptBackend {
    pub fn new(magick_binary: impl Into<String>) -> Self {
        Self {
            magick_binary: magick_binary.into(),
            runner: system_tool_runner(),
        }
    }

    pub fn with_runner(magick_binary: impl Into<String>, runner: ToolRunner) -> Self {
        Self {
            magick_binary: magick_binary.into(),
            runner,
        }
    }
}

impl OverlayRenderer for ScriptBackend {
    fn name(&self) -> &'static str {
        "script"
    }

    fn render(&self, request: &RenderRequest<'_>) -> Result<PathBuf> {
        let script = generate_script(&self.magick_binary, request);
        let script_path = request.output.with_extension("sh");
        std::fs::write(&script_path, &script)
            .with_context(|| format!("failed to write {}", script_path.display()))?;
        debug!(script = %script_path.display(), "generated render script");

        let args = vec![script_path.display().to_string()];
        let output = (self.runner)("sh", &args)?;
        if !output.success {
            bail!("render script failed: {}", output.stderr.trim());
        }

        // A zero-byte or missing output means the tool quietly did nothing.
        let produced = std::fs::metadata(&request.output)
            .with_context(|| format!("render script wrote no {}", request.output.display()))?;
        if produced.len() == 0 {
            bail!("render script produced an empty {}", request.output.display());
        }
        Ok(request.output.clone())
    }
}

/// Pure translation of a render request into a shell script. Split out so
/// tests can assert on the generated draw operations without executing
/// anything.
pub fn generate_script(magick_binary: &str, request: &RenderRequest<'_>) -> String {
    let mut lines = vec![
        "#!/bin/sh".to_string(),
        "set -e".to_string(),
        format!(
            "{} {} -resize {}x{}! \\",
            magick_binary,
            shell_quote(&request.base_image.display().to_string()),
            request.canvas_width,
            request.canvas_height
        ),
    ];

    for command in request.commands {
        lines.push(format!("  {} \\", draw_operation(command, request)));
    }
    lines.push(format!(
        "  {}",
        shell_quote(&request.output.display().to_string())
    ));
    lines.join("\n") + "\n"
}

fn draw_operation(command: &DrawCommand, request: &RenderRequest<'_>) -> String {
    match *command {
        DrawCommand::StrokeRect {
            left,
            top,
            width,
            height,
            rgb,
            alpha,
            line_width,
        } => format!(
            "-fill none -stroke '{}' -strokewidth {:.2} -draw 'rectangle {:.1},{:.1} {:.1},{:.1}'",
            rgba_css(rgb, alpha),
            line_width,
            left,
            top,
            left + width,
            top + height
        ),
        DrawCommand::DimOutsidePolygon { corners, alpha } => {
            // Even-odd path: the canvas rectangle plus the polygon as a
            // second subpath leaves the polygon interior undimmed.
            let (w, h) = (request.canvas_width, request.canvas_height);
            format!(
                "-stroke none -fill '{}' -fill-rule evenodd -draw 'path \"M 0,0 L {w},0 L {w},{h} L 0,{h} Z {}\"'",
                rgba_css([0, 0, 0], alpha),
                polygon_subpath(&corners)
            )
        }
        DrawCommand::StrokePolygon {
            corners,
            rgb,
            alpha,
            line_width,
        } => format!(
            "-fill none -stroke '{}' -strokewidth {:.2} -draw 'polygon {}'",
            rgba_css(rgb, alpha),
            line_width,
            corners
                .iter()
                .map(|(x, y)| format!("{x:.1},{y:.1}"))
                .collect::<Vec<_>>()
                .join(" ")
        ),
        DrawCommand::DimRect {
            left,
            top,
            width,
            height,
            alpha,
        } => format!(
            "-stroke none -fill '{}' -draw 'rectangle {:.1},{:.1} {:.1},{:.1}'",
            rgba_css([0, 0, 0], alpha),
            left,
            top,
            left + width,
            top + height
        ),
    }
}

fn polygon_subpath(corners: &[(f32, f32); 4]) -> String {
    let mut path = String::new();
    for (i, (x, y)) in corners.iter().enumerate() {
        let verb = if i == 0 { "M" } else { "L" };
        path.push_str(&format!("{verb} {x:.1},{y:.1} "));
    }
    path.push('Z');
    path
}

fn rgba_css(rgb: [u8; 3], alpha: f32) -> String {
    format!("rgba({},{},{},{:.3})", rgb[0], rgb[1], rgb[2], alpha)
}

fn shell_quote(raw: &str) -> String {
    format!("'{}'", raw.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::ToolOutput;
    use std::path::Path;
    use std::sync::{Arc, Mutex};
    use tempfile::tempdir;

    fn request<'a>(commands: &'a [DrawCommand], output: PathBuf) -> RenderRequest<'a> {
        RenderRequest {
            base_image: Path::new("/photos/base.jpg"),
            commands,
            canvas_width: 1500,
            canvas_height: 1000,
            output,
        }
    }

    #[test]
    fn script_scales_base_and_draws_in_order() {
        let commands = vec![
            DrawCommand::DimOutsidePolygon {
                corners: [(100.0, 100.0), (1400.0, 100.0), (1400.0, 900.0), (100.0, 900.0)],
                alpha: 0.5,
            },
            DrawCommand::StrokeRect {
                left: 375.0,
                top: 250.0,
                width: 750.0,
                height: 500.0,
                rgb: [230, 57, 54],
                alpha: 0.5,
                line_width: 3.0,
            },
        ];
        let script = generate_script("magick", &request(&commands, PathBuf::from("/tmp/out.jpg")));

        assert!(script.contains("-resize 1500x1000!"));
        assert!(script.contains("fill-rule evenodd"));
        assert!(script.contains("rectangle 375.0,250.0 1125.0,750.0"));
        assert!(script.contains("rgba(230,57,54,0.500)"));
        // Dim comes before the outline.
        let dim_at = script.find("evenodd").unwrap();
        let stroke_at = script.find("rectangle 375.0").unwrap();
        assert!(dim_at < stroke_at);
    }

    #[test]
    fn run_validates_output_file() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("out.jpg");

        // Runner reports success but writes nothing.
        let lying_runner: ToolRunner = Arc::new(|_, _| {
            Ok(ToolOutput {
                success: true,
                stdout: Vec::new(),
                stderr: String::new(),
            })
        });
        let backend = ScriptBackend::with_runner("magick", lying_runner);
        let commands = [];
        let err = backend.render(&request(&commands, output.clone())).unwrap_err();
        assert!(err.to_string().contains("wrote no"));
    }

    #[test]
    fn run_executes_generated_script() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("out.jpg");
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

        let recording_runner: ToolRunner = {
            let seen = Arc::clone(&seen);
            let output = output.clone();
            Arc::new(move |binary, args| {
                seen.lock().unwrap().push(format!("{binary} {}", args.join(" ")));
                std::fs::write(&output, b"jpeg").unwrap();
                Ok(ToolOutput {
                    success: true,
                    stdout: Vec::new(),
                    stderr: String::new(),
                })
            })
        };
        let backend = ScriptBackend::with_runner("magick", recording_runner);
        let commands = [];
        let produced = backend.render(&request(&commands, output.clone())).unwrap();
        assert_eq!(produced, output);

        let invocations = seen.lock().unwrap();
        assert_eq!(invocations.len(), 1);
        assert!(invocations[0].starts_with("sh "));
        assert!(invocations[0].ends_with(".sh"));
        // The script itself landed next to the output.
        assert!(output.with_extension("sh").exists());
    }

    #[test]
    fn failing_process_surfaces_stderr() {
        let dir = tempdir().unwrap();
        let failing_runner: ToolRunner = Arc::new(|_, _| {
            Ok(ToolOutput {
                success: false,
                stdout: Vec::new(),
                stderr: "magick: not found".to_string(),
            })
        });
        let backend = ScriptBackend::with_runner("magick", failing_runner);
        let commands = [];
        let err = backend
            .render(&request(&commands, dir.path().join("out.jpg")))
            .unwrap_err();
        assert!(err.to_string().contains("magick: not found"));
    }
}
