use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::select;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use focal_frame::config::{BackendPreference, Configuration};
use focal_frame::events::{OverlayUpdate, StateEvent};
use focal_frame::geometry::{CropSettings, FocalLength};
use focal_frame::meta::{ExifFileHost, ExiftoolMetadataTool};
use focal_frame::render::canvas::CanvasBackend;
use focal_frame::render::corners::CornerMarkerBackend;
use focal_frame::render::script::ScriptBackend;
use focal_frame::render::{OutputNamer, OverlayRenderer, RendererChain};
use focal_frame::session::PhotoSession;
use focal_frame::source::{BaseImageProvider, FileThumbnailSource};
use focal_frame::state::ViewMode;
use focal_frame::tasks::scheduler::{self, SchedulerDeps};

/// Focal-length overlay renderer for a single photo.
///
/// Reads metadata from the photo itself, composites crop-rectangle overlays
/// for the selected focal lengths, and re-renders on commands read from
/// stdin: `mode full|cropped`, `toggle <mm>`, `highlight <mm>|none`, `quit`.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Photo to analyze (JPEG, or a raw file with an embedded preview).
    photo: PathBuf,

    /// Optional YAML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Applied crop, as fractions of the frame.
    #[arg(long, default_value_t = 0.0)]
    crop_left: f64,
    #[arg(long, default_value_t = 0.0)]
    crop_top: f64,
    #[arg(long, default_value_t = 1.0)]
    crop_right: f64,
    #[arg(long, default_value_t = 1.0)]
    crop_bottom: f64,
    /// Crop rotation in degrees, counterclockwise.
    #[arg(long, default_value_t = 0.0)]
    crop_angle: f64,
}

impl Args {
    fn crop(&self) -> CropSettings {
        CropSettings {
            left: self.crop_left,
            top: self.crop_top,
            right: self.crop_right,
            bottom: self.crop_bottom,
            angle_deg: self.crop_angle,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .compact()
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => Configuration::from_yaml_file(path)?,
        None => Configuration::default(),
    }
    .validated()?;
    std::fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("failed to create {}", config.output_dir.display()))?;

    let crop = args.crop();
    let host = ExifFileHost::open(&args.photo, crop)?;
    let tool = ExiftoolMetadataTool::new(&config.exiftool_binary);
    let session = Arc::new(PhotoSession::open(&host, &tool)?);

    let provider = Arc::new(BaseImageProvider::new(
        args.photo.clone(),
        config.output_dir.clone(),
        Arc::new(FileThumbnailSource::new(args.photo.clone(), crop)),
        Arc::new(tool),
        config.thumbnail_timeout,
        session.info.cropped_width,
        session.info.cropped_height,
    ));
    let chain = build_chain(&config);
    let namer = Arc::new(OutputNamer::new(config.output_dir.clone()));

    let (events_tx, events_rx) = mpsc::channel::<StateEvent>(16);
    let (published_tx, published_rx) = watch::channel::<Option<OverlayUpdate>>(None);
    let cancel = CancellationToken::new();

    let scheduler_handle = tokio::spawn(scheduler::run(
        SchedulerDeps {
            session,
            provider,
            chain,
            namer,
            config,
        },
        events_rx,
        published_tx,
        cancel.child_token(),
    ));
    let display_handle = tokio::spawn(display_updates(published_rx, cancel.child_token()));

    command_loop(events_tx, &cancel).await?;

    cancel.cancel();
    scheduler_handle.await??;
    display_handle.await?;
    Ok(())
}

fn build_chain(config: &Configuration) -> RendererChain {
    let canvas: Arc<dyn OverlayRenderer> = Arc::new(CanvasBackend);
    let script: Arc<dyn OverlayRenderer> = Arc::new(ScriptBackend::new(&config.magick_binary));
    let corners: Arc<dyn OverlayRenderer> =
        Arc::new(CornerMarkerBackend::new(config.overlay.corner_arm_fraction));
    let ordered = match config.backend {
        BackendPreference::Canvas => vec![canvas, script, corners],
        BackendPreference::Script => vec![script, canvas, corners],
    };
    RendererChain::new(ordered)
}

/// Prints each published overlay to stdout until cancelled.
async fn display_updates(
    mut published_rx: watch::Receiver<Option<OverlayUpdate>>,
    cancel: CancellationToken,
) {
    loop {
        select! {
            _ = cancel.cancelled() => break,
            changed = published_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let Some(update) = published_rx.borrow_and_update().clone() else {
                    continue;
                };
                println!("{}", update.header);
                println!("  overlay: {}", update.path.display());
                if let Some(warning) = &update.warning {
                    println!("  warning: {warning}");
                }
            }
        }
    }
}

/// Reads stdin commands until quit, EOF, or Ctrl-C.
async fn command_loop(
    events_tx: mpsc::Sender<StateEvent>,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received; shutting down");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                match parse_command(&line) {
                    Ok(Some(Command::Quit)) => break,
                    Ok(Some(Command::Event(event))) => {
                        if events_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(message) => warn!(input = %line.trim(), "{message}"),
                }
            }
        }
    }
    cancel.cancel();
    Ok(())
}

#[derive(Debug, PartialEq)]
enum Command {
    Event(StateEvent),
    Quit,
}

/// Parses one stdin line. `Ok(None)` is a blank line; `Err` carries a
/// message for the user.
fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let mut parts = line.split_whitespace();
    let Some(verb) = parts.next() else {
        return Ok(None);
    };
    let arg = parts.next();
    let command = match (verb, arg) {
        ("quit", None) => Command::Quit,
        ("mode", Some("full")) => Command::Event(StateEvent::ViewModeChanged(ViewMode::Full)),
        ("mode", Some("cropped")) => {
            Command::Event(StateEvent::ViewModeChanged(ViewMode::Cropped))
        }
        ("toggle", Some(mm)) => {
            let fl = parse_millimeters(mm)?;
            Command::Event(StateEvent::SelectionToggled(fl))
        }
        ("highlight", Some("none")) => Command::Event(StateEvent::HighlightChanged(None)),
        ("highlight", Some(mm)) => {
            let fl = parse_millimeters(mm)?;
            Command::Event(StateEvent::HighlightChanged(Some(fl)))
        }
        _ => {
            return Err(
                "commands: mode full|cropped, toggle <mm>, highlight <mm>|none, quit".to_string(),
            );
        }
    };
    if parts.next().is_some() {
        return Err("trailing input after command".to_string());
    }
    Ok(Some(command))
}

fn parse_millimeters(text: &str) -> Result<FocalLength, String> {
    text.trim_end_matches("mm")
        .parse::<u32>()
        .map(FocalLength)
        .map_err(|_| format!("not a focal length: {text}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mode_and_toggle_commands() {
        assert_eq!(
            parse_command("mode cropped"),
            Ok(Some(Command::Event(StateEvent::ViewModeChanged(
                ViewMode::Cropped
            ))))
        );
        assert_eq!(
            parse_command("toggle 600"),
            Ok(Some(Command::Event(StateEvent::SelectionToggled(
                FocalLength(600)
            ))))
        );
        assert_eq!(
            parse_command("toggle 600mm"),
            Ok(Some(Command::Event(StateEvent::SelectionToggled(
                FocalLength(600)
            ))))
        );
    }

    #[test]
    fn parses_highlight_variants() {
        assert_eq!(
            parse_command("highlight none"),
            Ok(Some(Command::Event(StateEvent::HighlightChanged(None))))
        );
        assert_eq!(
            parse_command("highlight 400"),
            Ok(Some(Command::Event(StateEvent::HighlightChanged(Some(
                FocalLength(400)
            )))))
        );
    }

    #[test]
    fn blank_lines_and_garbage() {
        assert_eq!(parse_command("   "), Ok(None));
        assert!(parse_command("mode sideways").is_err());
        assert!(parse_command("toggle abc").is_err());
        assert!(parse_command("quit now").is_err());
    }
}
