//! Snapscore
//!
//! Renders a snippet of markup to a fixed-size raster image and scores its
//! visual similarity against a pre-provisioned reference image.
//!
//! # Features
//!
//! - **CDP Backend** (default): Uses Chrome DevTools Protocol via headless Chrome,
//!   with a fresh browser per render
//! - **Perceptual comparison**: YIQ colour distance with a tunable tolerance
//!   and anti-aliasing detection
//! - **Safe concurrency**: every request renders to its own ephemeral file
//!
//! # Example
//!
//! ```no_run
//! use snapscore::{pipeline::{Pipeline, RenderRequest}, ServiceConfig};
//!
//! # async fn run() -> snapscore::Result<()> {
//! let config = ServiceConfig::default();
//! let renderer = snapscore::new_renderer(&config.render)?;
//! let pipeline = Pipeline::new(renderer, config);
//!
//! let req = RenderRequest {
//!     markup: r#"<body style="background:red"></body>"#.to_string(),
//!     challenge_id: "1".to_string(),
//! };
//! let result = pipeline.execute(&req).await?;
//! println!("score: {:.2}", result.score);
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

pub mod error;
pub use error::{Error, Result};

#[cfg(feature = "cdp")]
pub mod cdp;

// Async render facade (worker thread per call, timeout, concurrency bound)
pub mod async_api;

pub mod compare;
pub mod counter;
pub mod pipeline;
pub mod server;

pub use async_api::RenderService;
pub use compare::{compare_images, Comparison};

/// Viewport dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 400,
            height: 300,
        }
    }
}

/// Configuration for a single render
///
/// Every render launches its own browser, so these settings apply to each
/// launch independently. Nothing (cookies, cache, storage) is carried from
/// one render to the next.
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Viewport dimensions; the captured image has exactly this size
    pub viewport: Viewport,
    /// Upper bound on launch + load + capture, in milliseconds
    pub timeout_ms: u64,
    /// Explicit Chrome binary; auto-detected when `None`
    pub chrome_path: Option<PathBuf>,
    /// Whether to keep Chrome's sandbox enabled
    pub sandbox: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            viewport: Viewport::default(),
            timeout_ms: 30000,
            chrome_path: None,
            sandbox: true,
        }
    }
}

/// Tuning for the pixel comparator
///
/// ```
/// let opts = snapscore::CompareOptions::default();
/// assert_eq!(opts.threshold, 0.1);
/// assert!(!opts.include_aa);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompareOptions {
    /// Maximum normalized colour distance (0..=1) at which two pixels still match
    pub threshold: f64,
    /// Count anti-aliased pixels as differences instead of ignoring them
    pub include_aa: bool,
}

impl Default for CompareOptions {
    fn default() -> Self {
        Self {
            threshold: 0.1,
            include_aa: false,
        }
    }
}

/// Configuration for the render-then-compare service
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Directory holding `expected_<challenge>.png` reference images
    pub challenge_dir: PathBuf,
    /// Directory where ephemeral renders are written
    pub scratch_dir: PathBuf,
    /// Maximum number of browsers alive at once
    pub max_concurrent_renders: usize,
    pub render: RenderConfig,
    pub compare: CompareOptions,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            challenge_dir: PathBuf::from("./challenge"),
            scratch_dir: PathBuf::from("."),
            max_concurrent_renders: num_cpus::get(),
            render: RenderConfig::default(),
            compare: CompareOptions::default(),
        }
    }
}

impl ServiceConfig {
    /// Reject settings the pipeline cannot honour
    pub fn validate(&self) -> Result<()> {
        if self.render.viewport.width == 0 || self.render.viewport.height == 0 {
            return Err(Error::ConfigError("viewport must be non-empty".into()));
        }
        if self.render.timeout_ms == 0 {
            return Err(Error::ConfigError("render timeout must be positive".into()));
        }
        if self.max_concurrent_renders == 0 {
            return Err(Error::ConfigError("max_concurrent_renders must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.compare.threshold) {
            return Err(Error::ConfigError(format!(
                "threshold {} outside 0..=1",
                self.compare.threshold
            )));
        }
        Ok(())
    }
}

/// Core trait for rendering backends
///
/// Implementations are blocking; `RenderService` moves each call onto its
/// own worker thread and bounds it with a timeout.
pub trait Renderer: Send + Sync {
    /// Render `markup` at `viewport` and write a PNG to `out`, replacing any
    /// existing file there. Must either write a complete image or fail.
    fn render_to_file(&self, markup: &str, viewport: Viewport, out: &Path) -> Result<()>;
}

/// Create the default rendering backend
#[cfg(feature = "cdp")]
pub fn new_renderer(config: &RenderConfig) -> Result<Arc<dyn Renderer>> {
    Ok(Arc::new(cdp::CdpRenderer::new(config.clone())))
}

#[cfg(not(feature = "cdp"))]
pub fn new_renderer(_config: &RenderConfig) -> Result<Arc<dyn Renderer>> {
    Err(Error::InitializationError(
        "no rendering backend compiled in (enable the `cdp` feature)".into(),
    ))
}
