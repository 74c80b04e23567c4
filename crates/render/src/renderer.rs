//! Turns a merged unit of markdown into deliverable fragments.

use std::{path::PathBuf, process::Stdio, sync::Arc};

use {
    async_trait::async_trait,
    bytes::Bytes,
    parley_common::types::{ImageData, RenderedFragment},
    parley_config::RenderMode,
    tokio::{io::AsyncWriteExt, process::Command},
    tracing::{debug, warn},
};

use crate::{
    error::{Error, Result},
    markdown::{self, Piece},
};

#[async_trait]
pub trait Renderer: Send + Sync {
    fn mode(&self) -> RenderMode;
    async fn render(&self, unit: &str) -> Result<Vec<RenderedFragment>>;
}

/// Converts an HTML page into image bytes.
#[async_trait]
pub trait Rasterizer: Send + Sync {
    async fn rasterize(&self, html: &str) -> Result<Bytes>;
}

// ── Plain text ──────────────────────────────────────────────────────────────

pub struct PlainTextRenderer;

#[async_trait]
impl Renderer for PlainTextRenderer {
    fn mode(&self) -> RenderMode {
        RenderMode::Text
    }

    async fn render(&self, unit: &str) -> Result<Vec<RenderedFragment>> {
        Ok(vec![RenderedFragment::text(unit)])
    }
}

// ── Markdown → image ────────────────────────────────────────────────────────

pub struct MarkdownImageRenderer {
    rasterizer: Option<Arc<dyn Rasterizer>>,
}

impl MarkdownImageRenderer {
    #[must_use]
    pub fn new(rasterizer: Option<Arc<dyn Rasterizer>>) -> Self {
        Self { rasterizer }
    }
}

#[async_trait]
impl Renderer for MarkdownImageRenderer {
    fn mode(&self) -> RenderMode {
        RenderMode::Image
    }

    async fn render(&self, unit: &str) -> Result<Vec<RenderedFragment>> {
        let Some(rasterizer) = &self.rasterizer else {
            debug!("no rasterizer configured, sending text");
            return Ok(vec![RenderedFragment::text(unit)]);
        };
        match rasterizer.rasterize(&markdown::to_html_page(unit)).await {
            Ok(bytes) => {
                let mime = markdown::sniff_mime(&bytes);
                Ok(vec![RenderedFragment::Image(ImageData::from_bytes(
                    bytes, mime,
                ))])
            },
            Err(e) => {
                warn!(error = %e, "rasterizing failed, sending text");
                Ok(vec![RenderedFragment::text(unit)])
            },
        }
    }
}

// ── Mixed ───────────────────────────────────────────────────────────────────

/// Text stays text; embedded image references become image fragments.
pub struct MixedContentRenderer;

#[async_trait]
impl Renderer for MixedContentRenderer {
    fn mode(&self) -> RenderMode {
        RenderMode::Mixed
    }

    async fn render(&self, unit: &str) -> Result<Vec<RenderedFragment>> {
        Ok(markdown::extract_images(unit)
            .into_iter()
            .map(|piece| match piece {
                Piece::Text(text) => RenderedFragment::Text(text),
                Piece::Image(image) => RenderedFragment::Image(image),
            })
            .collect())
    }
}

// ── wkhtmltoimage ───────────────────────────────────────────────────────────

/// Rasterizes through an external `wkhtmltoimage` binary (HTML on stdin, PNG on stdout).
pub struct WkhtmlRasterizer {
    binary: PathBuf,
    width: u32,
}

impl WkhtmlRasterizer {
    #[must_use]
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            width: 1000,
        }
    }
}

#[async_trait]
impl Rasterizer for WkhtmlRasterizer {
    async fn rasterize(&self, html: &str) -> Result<Bytes> {
        let width = self.width.to_string();
        let mut child = Command::new(&self.binary)
            .args(["--quiet", "--format", "png", "--width", &width, "-", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(html.as_bytes()).await?;
        }
        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Rasterize(format!(
                "{} exited with {}: {}",
                self.binary.display(),
                output.status,
                stderr.trim()
            )));
        }
        Ok(Bytes::from(output.stdout))
    }
}
