// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PDF page rasterisation.
//
// No pure-Rust PDF renderer handles the fonts and vector content real
// shipping labels contain, so pages are drawn by poppler's `pdftoppm`, one
// page per invocation, into a scratch directory.

use std::path::{Path, PathBuf};
use std::process::Command;

use image::DynamicImage;
use printbridge_core::error::{PrintBridgeError, Result};
use tracing::{debug, instrument, warn};

/// Draws a single PDF page to pixels.
pub trait PdfRasterizer: Send + Sync {
    /// Render 1-indexed `page` of the PDF at `path` at `dpi`, greyscale
    /// unless `color` is set.
    fn rasterize_page(&self, path: &Path, page: u32, dpi: u32, color: bool)
    -> Result<DynamicImage>;
}

/// `pdftoppm`-backed rasteriser.
#[derive(Debug, Clone)]
pub struct PopplerRasterizer {
    program: PathBuf,
}

impl PopplerRasterizer {
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("pdftoppm"),
        }
    }

    /// Use a specific `pdftoppm` binary instead of the one on `PATH`.
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for PopplerRasterizer {
    fn default() -> Self {
        Self::new()
    }
}

impl PdfRasterizer for PopplerRasterizer {
    #[instrument(skip(self, path), fields(page, dpi))]
    fn rasterize_page(
        &self,
        path: &Path,
        page: u32,
        dpi: u32,
        color: bool,
    ) -> Result<DynamicImage> {
        let scratch = tempfile::tempdir()
            .map_err(|err| PrintBridgeError::RenderFailure(format!("scratch dir: {err}")))?;
        let out_root = scratch.path().join("page");

        let page_arg = page.to_string();
        let dpi_arg = dpi.to_string();
        let mut command = Command::new(&self.program);
        command
            .args(["-f", &page_arg, "-l", &page_arg, "-r", &dpi_arg])
            .args(["-png", "-singlefile"]);
        if !color {
            command.arg("-gray");
        }
        command.arg(path).arg(&out_root);

        let output = command.output().map_err(|err| {
            PrintBridgeError::RenderFailure(format!(
                "could not run {}: {err}",
                self.program.display()
            ))
        })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(status = %output.status, %stderr, "pdftoppm failed");
            return Err(PrintBridgeError::RenderFailure(format!(
                "pdftoppm exited with {} on page {page}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let png = out_root.with_extension("png");
        let image = image::open(&png).map_err(|err| {
            PrintBridgeError::RenderFailure(format!("page {page} produced no image: {err}"))
        })?;
        debug!(width = image.width(), height = image.height(), "Page rasterised");
        Ok(image)
    }
}
