pub mod canvas;
pub mod corners;
pub mod script;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;
use tracing::warn;

use crate::commands::DrawCommand;

/// One render invocation. The output path is pre-assigned by the caller so
/// overlapping jobs can never race on the same file.
#[derive(Debug, Clone)]
pub struct RenderRequest<'a> {
    pub base_image: &'a Path,
    pub commands: &'a [DrawCommand],
    pub canvas_width: u32,
    pub canvas_height: u32,
    pub output: PathBuf,
}

/// A strategy that composites draw commands onto a base image and writes
/// the result to `request.output`.
///
/// Implementations return errors instead of panicking so the scheduler can
/// walk the fallback chain. A successful render of the same input tuple
/// must produce the same pixels (idempotence); uniqueness of the output
/// file is the caller's job via `OutputNamer`.
pub trait OverlayRenderer: Send + Sync {
    fn name(&self) -> &'static str;
    fn render(&self, request: &RenderRequest<'_>) -> Result<PathBuf>;
}

/// Hands out uniquely numbered output paths. The counter is monotonic for
/// the process lifetime, so an in-flight previous render can never collide
/// with a newer one.
pub struct OutputNamer {
    dir: PathBuf,
    counter: AtomicU64,
}

impl OutputNamer {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            counter: AtomicU64::new(0),
        }
    }

    pub fn next(&self) -> PathBuf {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        self.dir.join(format!("overlay-{n:05}.jpg"))
    }
}

/// Ordered fallback chain. Each render walks the strategies front to back
/// and returns the first success together with the strategy that produced
/// it, so the caller can notice (and lock in) a degradation.
///
/// The list sits behind a mutex so the scheduler can demote or lock in a
/// strategy while a timed-out render still holds a reference to the chain.
/// Renders snapshot the list up front; a hung backend never holds the lock.
pub struct RendererChain {
    renderers: Mutex<Vec<Arc<dyn OverlayRenderer>>>,
}

impl RendererChain {
    pub fn new(renderers: Vec<Arc<dyn OverlayRenderer>>) -> Self {
        debug_assert!(!renderers.is_empty());
        Self {
            renderers: Mutex::new(renderers),
        }
    }

    fn active(&self) -> Vec<Arc<dyn OverlayRenderer>> {
        self.renderers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn primary_name(&self) -> &'static str {
        self.active()[0].name()
    }

    /// Drops every strategy before `name`, making it the new primary.
    pub fn lock_to(&self, name: &str) {
        let mut renderers = self
            .renderers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(pos) = renderers.iter().position(|r| r.name() == name) {
            renderers.drain(..pos);
        }
    }

    /// Removes the current primary after it proved unusable (for example a
    /// timed-out external process). Refuses to empty the chain; returns
    /// whether a strategy was removed.
    pub fn demote_primary(&self) -> bool {
        let mut renderers = self
            .renderers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if renderers.len() <= 1 {
            return false;
        }
        renderers.remove(0);
        true
    }

    pub fn render(&self, request: &RenderRequest<'_>) -> Result<(PathBuf, &'static str)> {
        let renderers = self.active();
        let mut last_err = None;
        for renderer in &renderers {
            match renderer.render(request) {
                Ok(path) => return Ok((path, renderer.name())),
                Err(err) => {
                    warn!(
                        backend = renderer.name(),
                        error = %err,
                        "render backend failed; trying next"
                    );
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.expect("renderer chain is never empty"))
    }
}
