// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Document renderer: turns a submitted document into a lazy sequence of
// device-sized pages.

use std::path::PathBuf;
use std::sync::Arc;

use image::{GrayImage, RgbImage};
use printbridge_core::error::{PrintBridgeError, Result};
use printbridge_core::{Capabilities, Dots, DocumentType, MediaSize};
use tempfile::TempDir;
use tracing::{debug, info, instrument};

use crate::image::processor::ImageProcessor;
use crate::pdf::rasterizer::{PdfRasterizer, PopplerRasterizer};
use crate::pdf::reader::{PageBox, PdfReader};

/// Pixel buffer of one rendered page.
#[derive(Debug, Clone)]
pub enum PagePixels {
    Gray(GrayImage),
    Rgb(RgbImage),
}

/// One page, already at the target medium's pixel dimensions.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    /// 0-based position in the document.
    pub index: u32,
    pub dpi: u32,
    pub pixels: PagePixels,
}

impl RenderedPage {
    pub fn width(&self) -> u32 {
        match &self.pixels {
            PagePixels::Gray(img) => img.width(),
            PagePixels::Rgb(img) => img.width(),
        }
    }

    pub fn height(&self) -> u32 {
        match &self.pixels {
            PagePixels::Gray(img) => img.height(),
            PagePixels::Rgb(img) => img.height(),
        }
    }

    pub fn into_processor(self) -> ImageProcessor {
        let image = match self.pixels {
            PagePixels::Gray(img) => image::DynamicImage::ImageLuma8(img),
            PagePixels::Rgb(img) => image::DynamicImage::ImageRgb8(img),
        };
        ImageProcessor::from_dynamic(image)
    }
}

/// Pages are produced on demand; a consumer that stops early never pays
/// for the rest.
pub type PageStream = Box<dyn Iterator<Item = Result<RenderedPage>> + Send>;

/// What the pages must look like.
#[derive(Debug, Clone, Copy)]
pub struct RenderRequest<'a> {
    /// Requested medium. Must match one the printer advertises.
    pub media: &'a MediaSize,
    pub capabilities: &'a Capabilities,
}

pub trait DocumentRenderer: Send + Sync {
    /// Validate the request against the printer and start rendering.
    ///
    /// Format, media and page-count problems are reported here, before
    /// the first page is drawn. Per-page failures surface from the stream.
    fn render(
        &self,
        document: &[u8],
        document_type: DocumentType,
        request: RenderRequest<'_>,
    ) -> Result<PageStream>;
}

/// Resolution bounds handed to the PDF rasteriser.
const MIN_RASTER_DPI: u32 = 36;
const MAX_RASTER_DPI: u32 = 1200;

/// The production renderer: PDFs through a [`PdfRasterizer`], raster images
/// through the `image` crate.
#[derive(Clone)]
pub struct Renderer {
    rasterizer: Arc<dyn PdfRasterizer>,
}

impl Renderer {
    pub fn new(rasterizer: Arc<dyn PdfRasterizer>) -> Self {
        Self { rasterizer }
    }

    /// A renderer that draws PDF pages with poppler.
    pub fn poppler() -> Self {
        Self::new(Arc::new(PopplerRasterizer::new()))
    }

    fn render_image(&self, document: &[u8], target: Target) -> Result<PageStream> {
        let processor = ImageProcessor::from_bytes(document)?;
        if processor.width() == 0 || processor.height() == 0 {
            return Err(PrintBridgeError::RenderFailure("image has no pixels".into()));
        }
        let page = target.finish(0, processor);
        Ok(Box::new(std::iter::once(Ok(page))))
    }

    fn render_pdf(&self, document: &[u8], target: Target) -> Result<PageStream> {
        let reader = PdfReader::from_bytes(document)?;
        let page_count = reader.page_count() as u32;
        if page_count == 0 {
            return Err(PrintBridgeError::RenderFailure("PDF has no pages".into()));
        }
        let boxes = reader.page_boxes();

        // The scratch dir lives as long as the stream and is removed on drop.
        let scratch = tempfile::tempdir()
            .map_err(|err| PrintBridgeError::RenderFailure(format!("scratch dir: {err}")))?;
        let path = scratch.path().join("document.pdf");
        std::fs::write(&path, document)?;

        Ok(Box::new(PdfPages {
            rasterizer: Arc::clone(&self.rasterizer),
            _scratch: scratch,
            path,
            boxes,
            next: 0,
            page_count,
            target,
        }))
    }
}

impl DocumentRenderer for Renderer {
    #[instrument(skip(self, document, request), fields(bytes = document.len(), media = %request.media.name))]
    fn render(
        &self,
        document: &[u8],
        document_type: DocumentType,
        request: RenderRequest<'_>,
    ) -> Result<PageStream> {
        let capabilities = request.capabilities;
        let medium = capabilities.match_media(request.media).ok_or_else(|| {
            PrintBridgeError::MediaSizeMismatch(format!(
                "{} ({} x {} mm)",
                request.media.name, request.media.width_mm, request.media.length_mm
            ))
        })?;
        let dots = medium.dots_at(capabilities.resolution_dpi);
        if dots.width == 0 || dots.height == 0 {
            return Err(PrintBridgeError::RenderFailure(format!(
                "medium {} has no printable area",
                medium.name
            )));
        }

        let target = Target {
            dots,
            dpi: capabilities.resolution_dpi,
            color: capabilities.color,
        };
        info!(
            medium = %medium.name,
            width = dots.width,
            height = dots.height,
            dpi = target.dpi,
            "Rendering document"
        );

        match document_type {
            DocumentType::Pdf => self.render_pdf(document, target),
            _ => self.render_image(document, target),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Target {
    dots: Dots,
    dpi: u32,
    color: bool,
}

impl Target {
    fn finish(&self, index: u32, processor: ImageProcessor) -> RenderedPage {
        let fitted = processor
            .flatten_alpha()
            .fit_to_canvas(self.dots.width, self.dots.height);
        let pixels = if self.color {
            PagePixels::Rgb(fitted.into_rgb())
        } else {
            PagePixels::Gray(fitted.into_gray())
        };
        RenderedPage {
            index,
            dpi: self.dpi,
            pixels,
        }
    }

    /// Rasterisation resolution at which `page` just covers the target.
    fn raster_dpi(&self, page: Option<PageBox>) -> u32 {
        match page {
            Some(b) if b.width_pt > 0.0 && b.height_pt > 0.0 => {
                let by_width = self.dots.width as f32 * 72.0 / b.width_pt;
                let by_height = self.dots.height as f32 * 72.0 / b.height_pt;
                (by_width.max(by_height).ceil() as u32).clamp(MIN_RASTER_DPI, MAX_RASTER_DPI)
            }
            _ => self.dpi,
        }
    }
}

struct PdfPages {
    rasterizer: Arc<dyn PdfRasterizer>,
    _scratch: TempDir,
    path: PathBuf,
    boxes: Vec<Option<PageBox>>,
    next: u32,
    page_count: u32,
    target: Target,
}

impl Iterator for PdfPages {
    type Item = Result<RenderedPage>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.page_count {
            return None;
        }
        let index = self.next;
        self.next += 1;

        let page_box = self.boxes.get(index as usize).copied().flatten();
        let dpi = self.target.raster_dpi(page_box);
        debug!(page = index + 1, dpi, "Rasterising PDF page");
        let result = self
            .rasterizer
            .rasterize_page(&self.path, index + 1, dpi, self.target.color)
            .map(|image| self.target.finish(index, ImageProcessor::from_dynamic(image)));
        if result.is_err() {
            // A failed page ends the stream.
            self.next = self.page_count;
        }
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = (self.page_count - self.next) as usize;
        (0, Some(left))
    }
}
