// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// printbridge-document: Document rendering for the PrintBridge daemon.
//
// Turns a PDF or raster image into device-sized pages: PDF inspection via
// lopdf, page rasterisation via poppler, deterministic crop/letterbox fitting
// of images, and re-wrapping rendered pages as a print-ready PDF for the
// spooler.

pub mod image;
pub mod pdf;
pub mod render;

pub use crate::image::processor::ImageProcessor;
pub use crate::pdf::rasterizer::{PdfRasterizer, PopplerRasterizer};
pub use crate::pdf::reader::PdfReader;
pub use crate::pdf::writer::PdfWriter;
pub use crate::render::{DocumentRenderer, PagePixels, PageStream, RenderRequest, RenderedPage, Renderer};
