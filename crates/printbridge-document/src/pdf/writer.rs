// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PDF writer: wrap rendered pages as a print-ready PDF using `printpdf` 0.8.
//
// printpdf 0.8 uses a data-oriented API: documents are built by constructing
// `PdfPage` structs containing `Vec<Op>` operation lists, then serialised via
// `PdfDocument::save()`.

use printbridge_core::MediaSize;
use printbridge_core::error::Result;
use printpdf::{
    Mm, Op, PdfDocument, PdfPage, PdfSaveOptions, PdfWarnMsg, Pt, RawImage, RawImageData,
    RawImageFormat, XObjectTransform,
};
use tracing::{debug, info, instrument};

use crate::render::{PagePixels, RenderedPage};

/// Builds a PDF whose every page is one full-bleed rendered image.
pub struct PdfWriter {
    media: MediaSize,
    title: Option<String>,
}

impl PdfWriter {
    pub fn new(media: MediaSize) -> Self {
        Self { media, title: None }
    }

    /// Set a title for the PDF metadata.
    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = Some(title.into());
    }

    /// Consume rendered pages one at a time and serialise the document.
    ///
    /// Each page's pixels are handed to printpdf and dropped before the next
    /// page is pulled, so only the encoded document grows with page count.
    #[instrument(skip(self, pages), fields(media = %self.media.name))]
    pub fn write_pages<I>(&self, pages: I) -> Result<Vec<u8>>
    where
        I: IntoIterator<Item = Result<RenderedPage>>,
    {
        let title = self.title.as_deref().unwrap_or("PrintBridge Job");
        let (page_w, page_h) = (Mm(self.media.width_mm), Mm(self.media.length_mm));

        let mut doc = PdfDocument::new(title);
        let mut pdf_pages = Vec::new();
        for page in pages {
            let page = page?;
            let (width, height) = (page.width() as usize, page.height() as usize);
            let dpi = page.dpi as f32;
            let raw = match page.pixels {
                PagePixels::Gray(gray) => RawImage {
                    pixels: RawImageData::U8(gray.into_raw()),
                    width,
                    height,
                    data_format: RawImageFormat::R8,
                    tag: Vec::new(),
                },
                PagePixels::Rgb(rgb) => RawImage {
                    pixels: RawImageData::U8(rgb.into_raw()),
                    width,
                    height,
                    data_format: RawImageFormat::RGB8,
                    tag: Vec::new(),
                },
            };
            let xobject_id = doc.add_image(&raw);

            // Stretch to the page box; pixel size already matches at `dpi`.
            let native_w_pt = width as f32 / dpi * 72.0;
            let native_h_pt = height as f32 / dpi * 72.0;
            let ops = vec![Op::UseXobject {
                id: xobject_id,
                transform: XObjectTransform {
                    translate_x: Some(Pt(0.0)),
                    translate_y: Some(Pt(0.0)),
                    scale_x: Some(page_w.into_pt().0 / native_w_pt),
                    scale_y: Some(page_h.into_pt().0 / native_h_pt),
                    dpi: Some(dpi),
                    rotate: None,
                },
            }];
            pdf_pages.push(PdfPage::new(page_w, page_h, ops));
            debug!(index = page.index, width, height, "Page added to PDF");
        }

        let page_count = pdf_pages.len();
        doc.with_pages(pdf_pages);

        let mut warnings: Vec<PdfWarnMsg> = Vec::new();
        let output = doc.save(&PdfSaveOptions::default(), &mut warnings);
        info!(pages = page_count, bytes = output.len(), "Print-ready PDF written");
        Ok(output)
    }
}
