use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tokio::select;
use tokio::sync::mpsc::Receiver;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::commands::{build_draw_commands, DrawCommand, OverlayScene};
use crate::config::{Configuration, OverlayStyle};
use crate::error::Error;
use crate::events::{OverlayUpdate, StateEvent};
use crate::render::corners::CORNER_FALLBACK_WARNING;
use crate::render::{OutputNamer, RenderRequest, RendererChain};
use crate::session::PhotoSession;
use crate::source::{BaseImage, BaseImageProvider};
use crate::state::{StateSnapshot, ViewMode, ViewState};

/// Everything the scheduler needs beyond its channels.
pub struct SchedulerDeps {
    pub session: Arc<PhotoSession>,
    pub provider: Arc<BaseImageProvider>,
    pub chain: RendererChain,
    pub namer: Arc<OutputNamer>,
    pub config: Configuration,
}

/// Drives the debounced re-render loop.
///
/// The task is the single owner of the mutable `ViewState`. Every incoming
/// event bumps the generation counter and arms the debounce timer; when the
/// timer fires, a render job is spawned with a captured snapshot. A job
/// checks the counter before doing work and again before its result is
/// published, so a superseded job simply never reaches the watch channel.
pub async fn run(
    deps: SchedulerDeps,
    mut events_rx: Receiver<StateEvent>,
    published_tx: watch::Sender<Option<OverlayUpdate>>,
    cancel: CancellationToken,
) -> Result<()> {
    let SchedulerDeps {
        session,
        provider,
        chain,
        namer,
        config,
    } = deps;
    let chain = Arc::new(chain);

    let mut state = session.initial_state();
    let mut session_warnings: Vec<String> = Vec::new();

    // Base pixels are session constants; resolve them once up front.
    let bases = resolve_bases(&session, &provider, &mut state, &mut session_warnings).await;

    // First-render bootstrap: the scheduler waits on this render so it
    // knows immediately whether the primary backend works. If it does not,
    // the session locks onto whichever fallback produced the image instead
    // of retrying the broken backend on every toggle.
    let current_gen = Arc::new(AtomicU64::new(0));
    bootstrap_render(
        &session,
        &chain,
        &namer,
        &config,
        &state,
        &bases,
        &mut session_warnings,
        &published_tx,
    )
    .await;

    let mut deadline: Option<Instant> = None;
    let mut jobs: JoinSet<(u64, Result<Option<OverlayUpdate>, Error>)> = JoinSet::new();

    loop {
        select! {
            _ = cancel.cancelled() => break,

            maybe_event = events_rx.recv() => {
                match maybe_event {
                    Some(event) => {
                        if apply_event(&mut state, event) {
                            let generation = current_gen.fetch_add(1, Ordering::SeqCst) + 1;
                            deadline = Some(Instant::now() + config.debounce);
                            debug!(generation, ?event, "state changed; render scheduled");
                        } else {
                            debug!(?event, "event was a no-op");
                        }
                    }
                    None => break,
                }
            }

            // Debounce expiry: spawn exactly one job for the newest state.
            _ = async {
                match deadline {
                    Some(at) => sleep_until(at).await,
                    None => std::future::pending().await,
                }
            } => {
                deadline = None;
                let generation = current_gen.load(Ordering::SeqCst);
                match bases.for_mode(state.mode()) {
                    Some(base) => {
                        jobs.spawn(render_job(JobInput {
                            generation,
                            snapshot: state.snapshot(),
                            header: state.header_text(),
                            base: base.clone(),
                            session: Arc::clone(&session),
                            chain: Arc::clone(&chain),
                            namer: Arc::clone(&namer),
                            current_gen: Arc::clone(&current_gen),
                            style: config.overlay,
                            canvas_long_edge: config.canvas_long_edge,
                            render_timeout: config.render_timeout,
                            warnings: session_warnings.clone(),
                        }));
                    }
                    None => warn!(mode = ?state.mode(), "no base image for mode; skipping render"),
                }
            }

            Some(joined) = jobs.join_next(), if !jobs.is_empty() => {
                match joined {
                    Ok((generation, Ok(Some(update)))) => {
                        // Final staleness gate: only the latest generation
                        // may touch the published path.
                        if generation == current_gen.load(Ordering::SeqCst) {
                            debug!(generation, path = %update.path.display(), "overlay published");
                            published_tx.send_replace(Some(update));
                        } else {
                            debug!(generation, "discarding stale render result");
                        }
                    }
                    Ok((generation, Ok(None))) => {
                        debug!(generation, "render superseded before completion");
                    }
                    Ok((generation, Err(err))) => {
                        warn!(generation, error = %err, "render job failed; will retry on next change");
                    }
                    Err(err) => warn!("render task join error: {err}"),
                }
            }
        }
    }

    Ok(())
}

fn apply_event(state: &mut ViewState, event: StateEvent) -> bool {
    match event {
        StateEvent::ViewModeChanged(mode) => state.set_mode(mode),
        StateEvent::SelectionToggled(fl) => state.toggle(fl),
        StateEvent::HighlightChanged(highlight) => state.set_highlight(highlight),
    }
}

/// Per-mode base images, resolved once at session start.
struct ModeBases {
    full: Option<BaseImage>,
    cropped: Option<BaseImage>,
}

impl ModeBases {
    fn for_mode(&self, mode: ViewMode) -> Option<&BaseImage> {
        match mode {
            ViewMode::Full => self.full.as_ref(),
            ViewMode::Cropped => self.cropped.as_ref(),
        }
    }
}

async fn resolve_bases(
    session: &PhotoSession,
    provider: &BaseImageProvider,
    state: &mut ViewState,
    warnings: &mut Vec<String>,
) -> ModeBases {
    let full = match provider.resolve(ViewMode::Full).await {
        Ok(base) => Some(base),
        Err(err) => {
            warn!(error = %err, "full-frame base image unavailable");
            None
        }
    };
    let cropped = if session.info.has_crop {
        match provider.resolve(ViewMode::Cropped).await {
            Ok(base) => Some(base),
            Err(err) => {
                warn!(error = %err, "cropped base image unavailable");
                None
            }
        }
    } else {
        None
    };

    let full_degraded = full.as_ref().is_none_or(|base| !base.is_uncropped);
    if full_degraded && state.cropped_view_offered() {
        state.disable_full_view();
        warnings.push(
            "full-resolution frame unavailable; showing the cropped view only".to_string(),
        );
        info!("forced cropped view: full frame could not be resolved");
    }

    ModeBases { full, cropped }
}

/// Draw list plus canvas size for one snapshot.
fn plan_commands(
    session: &PhotoSession,
    snapshot: &StateSnapshot,
    style: &OverlayStyle,
    canvas_long_edge: u32,
) -> (Vec<DrawCommand>, u32, u32) {
    let (rects, polygon, source_w, source_h) = match snapshot.mode {
        ViewMode::Full => (
            &session.full_rects,
            session.crop_polygon.as_ref(),
            session.info.full_width,
            session.info.full_height,
        ),
        ViewMode::Cropped => (
            &session.cropped_rects,
            None,
            session.info.cropped_width,
            session.info.cropped_height,
        ),
    };
    let (canvas_w, canvas_h) = canvas_size(source_w, source_h, canvas_long_edge);
    let commands = build_draw_commands(
        &OverlayScene {
            rects,
            selected: &snapshot.selected,
            highlight: snapshot.highlight,
            crop_polygon: polygon,
            source_width: source_w,
            source_height: source_h,
        },
        canvas_w,
        canvas_h,
        style,
    );
    (commands, canvas_w, canvas_h)
}

/// Canvas dimensions: the source frame fit to `long_edge`, never upscaled.
fn canvas_size(source_w: u32, source_h: u32, long_edge: u32) -> (u32, u32) {
    let scale = (f64::from(long_edge) / f64::from(source_w.max(source_h))).min(1.0);
    (
        ((f64::from(source_w) * scale).round() as u32).max(1),
        ((f64::from(source_h) * scale).round() as u32).max(1),
    )
}

/// First-render bootstrap. Runs through the same timeout-guarded blocking
/// path as regular jobs; a timed-out primary is demoted and the render is
/// retried with the rest of the chain, so a wedged external process at
/// startup can never hang the scheduler task.
#[allow(clippy::too_many_arguments)]
async fn bootstrap_render(
    session: &PhotoSession,
    chain: &Arc<RendererChain>,
    namer: &OutputNamer,
    config: &Configuration,
    state: &ViewState,
    bases: &ModeBases,
    session_warnings: &mut Vec<String>,
    published_tx: &watch::Sender<Option<OverlayUpdate>>,
) {
    let Some(base) = bases.for_mode(state.mode()) else {
        warn!("no base image at startup; skipping bootstrap render");
        return;
    };
    let snapshot = state.snapshot();
    let preferred = chain.primary_name();

    loop {
        let (commands, canvas_w, canvas_h) =
            plan_commands(session, &snapshot, &config.overlay, config.canvas_long_edge);
        let outcome = run_chain(
            Arc::clone(chain),
            base.path.clone(),
            commands,
            canvas_w,
            canvas_h,
            namer.next(),
            config.render_timeout,
        )
        .await;
        match outcome {
            Ok((path, used)) => {
                if used != preferred {
                    warn!(
                        backend = used,
                        "preferred render backend failed on first use; locking fallback for this session"
                    );
                    chain.lock_to(used);
                    if used == "corner-marker" {
                        session_warnings.push(CORNER_FALLBACK_WARNING.to_string());
                    }
                }
                info!(backend = used, path = %path.display(), "initial overlay rendered");
                published_tx.send_replace(Some(OverlayUpdate {
                    generation: 0,
                    path,
                    header: state.header_text(),
                    warning: join_warnings(session_warnings),
                }));
                return;
            }
            Err(ChainError::TimedOut) => {
                warn!(
                    backend = chain.primary_name(),
                    timeout = ?config.render_timeout,
                    "render backend timed out at startup; dropping it for this session"
                );
                if !chain.demote_primary() {
                    warn!("every render backend is unusable; no initial overlay");
                    return;
                }
            }
            Err(ChainError::Failed(err)) => {
                warn!(error = %err, "initial render failed; will retry on the next state change");
                return;
            }
        }
    }
}

enum ChainError {
    /// The blocking render did not finish within the configured limit. The
    /// abandoned task keeps its own snapshot of the chain and is ignored.
    TimedOut,
    Failed(anyhow::Error),
}

/// Runs the fallback chain once, off the async thread and under the render
/// timeout. Shared by the bootstrap render and regular jobs.
async fn run_chain(
    chain: Arc<RendererChain>,
    base_image: PathBuf,
    commands: Vec<DrawCommand>,
    canvas_width: u32,
    canvas_height: u32,
    output: PathBuf,
    limit: Duration,
) -> Result<(PathBuf, &'static str), ChainError> {
    let rendered = tokio::time::timeout(
        limit,
        tokio::task::spawn_blocking(move || {
            let request = RenderRequest {
                base_image: &base_image,
                commands: &commands,
                canvas_width,
                canvas_height,
                output,
            };
            chain.render(&request)
        }),
    )
    .await;
    match rendered {
        Err(_) => Err(ChainError::TimedOut),
        Ok(Err(join_err)) => Err(ChainError::Failed(anyhow!(
            "render task panicked: {join_err}"
        ))),
        Ok(Ok(Err(err))) => Err(ChainError::Failed(err)),
        Ok(Ok(Ok(done))) => Ok(done),
    }
}

struct JobInput {
    generation: u64,
    snapshot: StateSnapshot,
    header: String,
    base: BaseImage,
    session: Arc<PhotoSession>,
    chain: Arc<RendererChain>,
    namer: Arc<OutputNamer>,
    current_gen: Arc<AtomicU64>,
    style: OverlayStyle,
    canvas_long_edge: u32,
    render_timeout: Duration,
    warnings: Vec<String>,
}

/// One render job. `Ok(None)` means the job noticed it was superseded and
/// bowed out without publishing.
async fn render_job(input: JobInput) -> (u64, Result<Option<OverlayUpdate>, Error>) {
    let generation = input.generation;
    let result = render_job_inner(input).await;
    (generation, result)
}

async fn render_job_inner(input: JobInput) -> Result<Option<OverlayUpdate>, Error> {
    if input.current_gen.load(Ordering::SeqCst) != input.generation {
        return Ok(None);
    }

    let (commands, canvas_w, canvas_h) = plan_commands(
        &input.session,
        &input.snapshot,
        &input.style,
        input.canvas_long_edge,
    );
    let rendered = run_chain(
        Arc::clone(&input.chain),
        input.base.path.clone(),
        commands,
        canvas_w,
        canvas_h,
        input.namer.next(),
        input.render_timeout,
    )
    .await;

    let (path, used) = match rendered {
        Ok(done) => done,
        Err(ChainError::TimedOut) => {
            return Err(Error::Render(format!(
                "render exceeded {:?}",
                input.render_timeout
            )));
        }
        Err(ChainError::Failed(err)) => return Err(Error::Render(format!("{err:#}"))),
    };

    if input.current_gen.load(Ordering::SeqCst) != input.generation {
        // A newer generation exists; the uniquely named file is simply left
        // behind rather than racing it for the published slot.
        return Ok(None);
    }

    let mut warnings = input.warnings;
    if used == "corner-marker" && input.chain.primary_name() != "corner-marker" {
        warnings.push(CORNER_FALLBACK_WARNING.to_string());
    }
    Ok(Some(OverlayUpdate {
        generation: input.generation,
        path,
        header: input.header,
        warning: join_warnings(&warnings),
    }))
}

fn join_warnings(warnings: &[String]) -> Option<String> {
    if warnings.is_empty() {
        None
    } else {
        Some(warnings.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canvas_never_upscales() {
        assert_eq!(canvas_size(6000, 4000, 1500), (1500, 1000));
        assert_eq!(canvas_size(800, 600, 1440), (800, 600));
    }

    #[test]
    fn canvas_keeps_aspect_for_portrait() {
        assert_eq!(canvas_size(4000, 6000, 1500), (1000, 1500));
    }

    #[test]
    fn warnings_join_or_vanish() {
        assert_eq!(join_warnings(&[]), None);
        assert_eq!(
            join_warnings(&["a".to_string(), "b".to_string()]),
            Some("a; b".to_string())
        );
    }
}
