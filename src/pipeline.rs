//! Render-then-compare orchestration
//!
//! A request is rendered to its own ephemeral PNG, compared against the
//! challenge's reference image, and the ephemeral file is removed again no
//! matter how the first two steps went.

use crate::compare::{self, Comparison};
use crate::{CompareOptions, Error, RenderService, Renderer, Result, ServiceConfig};
use log::{debug, info, warn};
use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static RENDER_SEQ: AtomicU64 = AtomicU64::new(0);

/// Markup to render and the challenge whose reference it is scored against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderRequest {
    #[serde(rename = "html")]
    pub markup: String,
    #[serde(rename = "challenge", default, deserialize_with = "challenge_id")]
    pub challenge_id: String,
}

/// Clients send challenge identifiers as any JSON scalar. Every scalar is
/// kept as text so `validate_challenge_id` decides; `null` becomes empty.
fn challenge_id<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error as _;

    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::Bool(b) => Ok(b.to_string()),
        serde_json::Value::Null => Ok(String::new()),
        other => Err(D::Error::custom(format!("challenge must be a scalar, got {}", other))),
    }
}

/// Resolves challenge identifiers to `expected_<id>.png` files
#[derive(Debug, Clone)]
pub struct ReferenceStore {
    dir: PathBuf,
}

impl ReferenceStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path a reference for `challenge_id` would live at, without checking
    /// that it exists.
    pub fn path_for(&self, challenge_id: &str) -> Result<PathBuf> {
        validate_challenge_id(challenge_id)?;
        Ok(self.dir.join(format!("expected_{}.png", challenge_id)))
    }

    /// Path of an existing reference image
    pub async fn resolve(&self, challenge_id: &str) -> Result<PathBuf> {
        let path = self.path_for(challenge_id)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(path),
            _ => Err(Error::ReferenceNotFound(path)),
        }
    }
}

/// Identifiers become part of a file name, so only `[A-Za-z0-9_-]` is allowed.
pub fn validate_challenge_id(id: &str) -> Result<()> {
    let ok = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if ok {
        Ok(())
    } else {
        Err(Error::InvalidChallenge(id.to_string()))
    }
}

/// A per-request render output path.
///
/// The file is removed by [`EphemeralImage::discard`], or on drop if the
/// owning request never got that far.
#[derive(Debug)]
pub struct EphemeralImage {
    path: PathBuf,
    discarded: bool,
}

impl EphemeralImage {
    /// Reserve a unique path in `scratch_dir`. Nothing is created on disk.
    pub fn allocate(scratch_dir: &Path, markup: &str) -> Self {
        let seq = RENDER_SEQ.fetch_add(1, Ordering::Relaxed);
        let digest = Sha256::digest(markup.as_bytes());
        let tag = hex::encode(&digest[..6]);
        let name = format!("rendered-{}-{}-{}.png", std::process::id(), seq, tag);
        Self {
            path: scratch_dir.join(name),
            discarded: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the file. A file that was never written is not an error.
    pub async fn discard(mut self) -> Result<()> {
        self.discarded = true;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::CleanupError {
                path: self.path.clone(),
                reason: e.to_string(),
            }),
        }
    }
}

impl Drop for EphemeralImage {
    fn drop(&mut self) {
        if self.discarded {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("removed abandoned render {}", self.path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("Error cleaning up rendered image {}: {}", self.path.display(), e),
        }
    }
}

/// Render, compare, clean up
pub struct Pipeline {
    renderer: RenderService,
    references: ReferenceStore,
    scratch_dir: PathBuf,
    compare: CompareOptions,
}

impl Pipeline {
    pub fn new(renderer: Arc<dyn Renderer>, config: ServiceConfig) -> Self {
        let service = RenderService::new(renderer, config.render, config.max_concurrent_renders);
        Self {
            renderer: service,
            references: ReferenceStore::new(config.challenge_dir),
            scratch_dir: config.scratch_dir,
            compare: config.compare,
        }
    }

    /// Score `req.markup` against the reference for `req.challenge_id`.
    ///
    /// All-or-nothing: any render or comparison failure is returned as is.
    /// Cleanup failures are logged and never change the outcome.
    pub async fn execute(&self, req: &RenderRequest) -> Result<Comparison> {
        validate_challenge_id(&req.challenge_id)?;

        let image = EphemeralImage::allocate(&self.scratch_dir, &req.markup);
        let outcome = self.render_and_compare(req, image.path()).await;

        if let Err(e) = image.discard().await {
            warn!("Error cleaning up rendered image: {}", e);
        }

        if let Ok(cmp) = &outcome {
            info!(
                "challenge {} scored {:.2} ({} of {} pixels differ)",
                req.challenge_id,
                cmp.score,
                cmp.diff_pixels,
                u64::from(cmp.width) * u64::from(cmp.height)
            );
        }
        outcome
    }

    async fn render_and_compare(&self, req: &RenderRequest, out: &Path) -> Result<Comparison> {
        self.renderer.render(&req.markup, out.to_path_buf()).await?;
        let reference = self.references.resolve(&req.challenge_id).await?;
        compare::compare_files(out, &reference, &self.compare).await
    }
}
