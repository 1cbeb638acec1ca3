//! Chrome DevTools Protocol renderer implementation

use crate::{compare, Error, RenderConfig, Renderer, Result, Viewport};
use base64::Engine as Base64Engine;
use headless_chrome::browser::tab::Tab;
use headless_chrome::protocol::cdp::Page;
use headless_chrome::{Browser, LaunchOptions};
use log::debug;
use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// CDP-based renderer (uses the `headless_chrome` crate)
///
/// Every call to [`Renderer::render_to_file`] launches a brand new headless
/// Chrome, renders into a single tab and tears the browser down again, so
/// no state leaks between renders.
pub struct CdpRenderer {
    config: RenderConfig,
}

impl CdpRenderer {
    pub fn new(config: RenderConfig) -> Self {
        Self { config }
    }
}

impl Renderer for CdpRenderer {
    fn render_to_file(&self, markup: &str, viewport: Viewport, out: &Path) -> Result<()> {
        let session = CdpSession::launch(&self.config, viewport)?;
        let png = session
            .load_markup(markup)
            .and_then(|_| session.capture_png());
        // Browser goes away whether or not the capture worked.
        session.close();
        let png = png?;

        let decoded = compare::load_png(&png)
            .map_err(|e| Error::RenderError(format!("Screenshot is not a valid PNG: {}", e)))?;
        if decoded.dimensions() != (viewport.width, viewport.height) {
            return Err(Error::RenderError(format!(
                "Screenshot is {}x{}, expected {}x{}",
                decoded.width(),
                decoded.height(),
                viewport.width,
                viewport.height
            )));
        }

        std::fs::write(out, &png)
            .map_err(|e| Error::RenderError(format!("Failed to write {}: {}", out.display(), e)))?;
        debug!("rendered {} bytes of markup to {}", markup.len(), out.display());
        Ok(())
    }
}

/// One isolated browser with a single tab, alive for one render
struct CdpSession {
    browser: Browser,
    tab: Arc<Tab>,
    viewport: Viewport,
}

impl CdpSession {
    fn launch(config: &RenderConfig, viewport: Viewport) -> Result<Self> {
        let timeout = Duration::from_millis(config.timeout_ms);

        let launch_options = LaunchOptions::default_builder()
            .headless(true)
            .sandbox(config.sandbox)
            .window_size(Some((viewport.width, viewport.height)))
            .path(config.chrome_path.clone())
            .idle_browser_timeout(timeout)
            .args(vec![
                OsStr::new("--hide-scrollbars"),
                OsStr::new("--force-device-scale-factor=1"),
            ])
            .build()
            .map_err(|e| Error::InitializationError(format!("Failed to build launch options: {}", e)))?;

        let browser = Browser::new(launch_options)
            .map_err(|e| Error::InitializationError(format!("Failed to launch browser: {}", e)))?;

        let tab = browser
            .new_tab()
            .map_err(|e| Error::InitializationError(format!("Failed to create tab: {}", e)))?;
        tab.set_default_timeout(timeout);

        Ok(Self {
            browser,
            tab,
            viewport,
        })
    }

    fn load_markup(&self, markup: &str) -> Result<()> {
        let url = markup_data_url(markup);

        self.tab
            .navigate_to(&url)
            .map_err(|e| Error::LoadError(format!("Navigation failed: {}", e)))?;

        self.tab
            .wait_until_navigated()
            .map_err(|e| Error::LoadError(format!("Wait for navigation failed: {}", e)))?;

        Ok(())
    }

    fn capture_png(&self) -> Result<Vec<u8>> {
        let clip = Page::Viewport {
            x: 0.0,
            y: 0.0,
            width: f64::from(self.viewport.width),
            height: f64::from(self.viewport.height),
            scale: 1.0,
        };

        self.tab
            .capture_screenshot(Page::CaptureScreenshotFormatOption::Png, None, Some(clip), true)
            .map_err(|e| Error::RenderError(format!("Screenshot failed: {}", e)))
    }

    fn close(self) {
        // Dropping the browser terminates the child process.
        drop(self.tab);
        drop(self.browser);
    }
}

/// Encode markup as a `data:` URL so it loads without touching the network
/// or the filesystem.
fn markup_data_url(markup: &str) -> String {
    let b64 = base64::engine::general_purpose::STANDARD.encode(markup.as_bytes());
    format!("data:text/html;charset=utf-8;base64,{}", b64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_url_round_trips_markup() {
        let markup = r#"<body style="background:red">ünïcode & "quotes"</body>"#;
        let url = markup_data_url(markup);
        let payload = url
            .strip_prefix("data:text/html;charset=utf-8;base64,")
            .expect("prefix");
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(payload)
            .expect("base64");
        assert_eq!(decoded, markup.as_bytes());
    }

    #[test]
    fn test_cdp_render_creates_viewport_sized_png() {
        // This test requires Chrome to be installed, so we skip it in CI
        if std::env::var("CI").is_ok() {
            return;
        }
        let dir = tempfile::tempdir().expect("tempdir");
        let out = dir.path().join("rendered.png");
        let renderer = CdpRenderer::new(RenderConfig::default());
        let viewport = Viewport::default();
        if let Err(e) = renderer.render_to_file("<body style=\"background:red\"></body>", viewport, &out) {
            eprintln!("Skipping CDP render test because Chrome is not available or failed to launch: {}", e);
            return;
        }
        let img = compare::load_png(&std::fs::read(&out).expect("read")).expect("decode");
        assert_eq!(img.dimensions(), (400, 300));
    }
}
