use crate::{Error, RenderConfig, Renderer, Result};
use log::{debug, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::{oneshot, Semaphore};

/// An async-friendly render facade over a blocking [`Renderer`].
///
/// Each render runs on its own worker thread and reports back over a oneshot
/// channel, so async tasks never block on the browser. A semaphore caps how
/// many browsers are alive at once and every render is bounded by
/// `RenderConfig::timeout_ms`.
#[derive(Clone)]
pub struct RenderService {
    renderer: Arc<dyn Renderer>,
    config: RenderConfig,
    permits: Arc<Semaphore>,
}

impl RenderService {
    pub fn new(renderer: Arc<dyn Renderer>, config: RenderConfig, max_concurrent: usize) -> Self {
        Self {
            renderer,
            config,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Render `markup` to `out`.
    ///
    /// On timeout the worker thread is abandoned; if it finishes later it
    /// removes whatever it wrote to `out`.
    pub async fn render(&self, markup: &str, out: PathBuf) -> Result<()> {
        // The permit travels with the worker so an abandoned browser still
        // counts against the cap until it actually exits.
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| Error::Other(format!("Render queue closed: {}", e)))?;

        let (tx, rx) = oneshot::channel();
        let renderer = self.renderer.clone();
        let markup = markup.to_string();
        let viewport = self.config.viewport;

        thread::Builder::new()
            .name("snapscore-render".into())
            .spawn(move || {
                let res = renderer.render_to_file(&markup, viewport, &out);
                // Nobody is waiting any more (timeout or cancelled request),
                // so the output would be orphaned.
                if tx.send(res).is_err() {
                    let _ = std::fs::remove_file(&out);
                }
                drop(permit);
            })
            .map_err(|e| Error::InitializationError(format!("Failed to spawn render worker: {}", e)))?;

        let timeout_ms = self.config.timeout_ms;
        let res = match tokio::time::timeout(Duration::from_millis(timeout_ms), rx).await {
            Ok(Ok(res)) => res,
            Ok(Err(e)) => Err(Error::RenderError(format!("Render worker exited early: {}", e))),
            Err(_) => {
                warn!("render exceeded {}ms, abandoning worker", timeout_ms);
                Err(Error::Timeout(timeout_ms))
            }
        };
        debug!("render finished (ok: {})", res.is_ok());
        res
    }
}
