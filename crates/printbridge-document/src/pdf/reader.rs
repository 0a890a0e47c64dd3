// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PDF reader: structural inspection of submitted PDFs using `lopdf`.

use lopdf::{Document, Object};
use printbridge_core::error::{PrintBridgeError, Result};
use tracing::{debug, instrument};

/// Page size in PDF points (1/72 inch).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageBox {
    pub width_pt: f32,
    pub height_pt: f32,
}

/// Read-only view of a PDF's page tree.
pub struct PdfReader {
    document: Document,
}

impl PdfReader {
    /// Parse raw PDF bytes. A body that is not a PDF at all is an
    /// unsupported format rather than a render failure.
    #[instrument(skip_all, fields(bytes_len = data.len()))]
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let document = Document::load_mem(data).map_err(|err| {
            PrintBridgeError::UnsupportedFormat(format!("failed to parse PDF: {err}"))
        })?;
        debug!(pages = document.get_pages().len(), "PDF loaded from bytes");
        Ok(Self { document })
    }

    /// Number of pages in the document.
    pub fn page_count(&self) -> usize {
        self.document.get_pages().len()
    }

    /// The MediaBox of each page, in page order.
    ///
    /// Pages whose box cannot be read (inherited from a broken parent, or
    /// non-numeric) are reported as `None`.
    pub fn page_boxes(&self) -> Vec<Option<PageBox>> {
        self.document
            .get_pages()
            .values()
            .map(|&page_id| {
                let dict = self.document.get_dictionary(page_id).ok()?;
                let media_box = dict.get(b"MediaBox").ok()?.as_array().ok()?;
                let coords: Vec<f32> = media_box.iter().filter_map(as_number).collect();
                if coords.len() != 4 {
                    return None;
                }
                Some(PageBox {
                    width_pt: (coords[2] - coords[0]).abs(),
                    height_pt: (coords[3] - coords[1]).abs(),
                })
            })
            .collect()
    }
}

fn as_number(object: &Object) -> Option<f32> {
    match object {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r),
        _ => None,
    }
}
