// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Protocol encoder: turns rendered pages into what a printer class accepts:
// a print-ready PDF for spooler queues, or a bit-exact raster command stream
// for label printers.

use std::collections::BTreeMap;

use image::GrayImage;
use printbridge_core::error::{PrintBridgeError, Result};
use printbridge_core::{
    Capabilities, CutPolicy, MediaSize, PrintOptions, Printer, PrinterClass, Threshold,
    TransportHandle,
};
use printbridge_document::{PageStream, PdfWriter, RenderedPage};
use tracing::{debug, info, instrument};

use crate::raster::labels::{self, Label};
use crate::raster::models::{self, Model};
use crate::raster::RasterCommands;
use crate::transport::{QueueSubmission, RasterPayload};

/// Output of the encoder, tagged by the transport that carries it.
#[derive(Debug, Clone, PartialEq)]
pub enum EncodedJob {
    Queue {
        document: Vec<u8>,
        submission: QueueSubmission,
    },
    Raster(RasterPayload),
}

impl EncodedJob {
    pub fn len(&self) -> usize {
        match self {
            Self::Queue { document, .. } => document.len(),
            Self::Raster(payload) => payload.bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ProtocolEncoder {
    pub cut_policy: CutPolicy,
    pub high_quality: bool,
    pub threshold: Threshold,
}

impl ProtocolEncoder {
    /// Consume `pages` and encode them for `printer`.
    ///
    /// `media` is the medium already matched against the printer's
    /// capabilities.
    #[instrument(skip_all, fields(printer = %printer.id, media = %media.name))]
    pub fn encode(
        &self,
        printer: &Printer,
        media: &MediaSize,
        options: &PrintOptions,
        pages: PageStream,
    ) -> Result<EncodedJob> {
        match printer.class {
            PrinterClass::QueueManaged => self.encode_queue(printer, media, options, pages),
            PrinterClass::DirectRaster => self.encode_raster(printer, media, options, pages),
        }
    }

    fn encode_queue(
        &self,
        printer: &Printer,
        media: &MediaSize,
        options: &PrintOptions,
        pages: PageStream,
    ) -> Result<EncodedJob> {
        let title = options
            .job_title
            .clone()
            .unwrap_or_else(|| "PrintBridge Job".to_string());
        let mut writer = PdfWriter::new(media.clone());
        writer.set_title(title.clone());
        let document = writer.write_pages(pages)?;

        let (kept, _dropped) = filter_options(&printer.capabilities, &options.extra);
        Ok(EncodedJob::Queue {
            document,
            submission: QueueSubmission {
                job_title: title,
                document_format: "application/pdf",
                media: Some(media.name.clone()),
                copies: options.copies.max(1),
                options: kept,
            },
        })
    }

    fn encode_raster(
        &self,
        printer: &Printer,
        media: &MediaSize,
        options: &PrintOptions,
        pages: PageStream,
    ) -> Result<EncodedJob> {
        let model = model_for(printer).ok_or_else(|| {
            PrintBridgeError::EncodingFailure(format!("unknown raster model '{}'", printer.model))
        })?;
        let label = labels::for_media(media)
            .filter(|l| l.supported_by(model))
            .ok_or_else(|| {
                PrintBridgeError::EncodingFailure(format!(
                    "{} cannot print on {} media",
                    model.name, media.name
                ))
            })?;

        // Pack each page to device rows as it arrives; the greyscale buffer
        // is dropped before the next page is rendered.
        let mut packed = Vec::new();
        for page in pages {
            packed.push(self.pack_page(model, label, page?)?);
        }
        if packed.is_empty() {
            return Err(PrintBridgeError::RenderFailure(
                "document produced no pages".into(),
            ));
        }

        let copies = options.copies.max(1) as usize;
        let total = packed.len() * copies;
        let mut cmds = RasterCommands::new(model);
        cmds.invalidate();
        cmds.initialize();
        cmds.switch_to_raster();

        for (n, rows) in packed.iter().cycle().take(total).enumerate() {
            self.emit_page(&mut cmds, label, rows, n + 1 == total);
        }

        info!(
            model = model.name,
            label = label.identifier,
            pages = total,
            bytes = cmds.len(),
            "Raster stream encoded"
        );
        Ok(EncodedJob::Raster(RasterPayload {
            bytes: cmds.into_bytes(),
            pages: total as u32,
        }))
    }

    fn emit_page(&self, cmds: &mut RasterCommands, label: &Label, rows: &[Vec<u8>], last: bool) {
        cmds.status_request();
        cmds.print_information(label, rows.len() as u32, self.high_quality);
        match self.cut_policy {
            CutPolicy::EachLabel => {
                cmds.autocut(true);
                cmds.cut_every(1);
                cmds.expanded_mode(true);
            }
            CutPolicy::EndOfJob => {
                cmds.autocut(false);
                cmds.expanded_mode(true);
            }
            CutPolicy::None => {
                cmds.autocut(false);
                cmds.expanded_mode(false);
            }
        }
        cmds.margins(label.feed_margin);
        cmds.compression(cmds.model().compression);
        for row in rows {
            cmds.raster_line(row);
        }
        cmds.print(last);
    }

    /// Check a page against the label and pack it into device raster rows.
    fn pack_page(&self, model: &Model, label: &Label, page: RenderedPage) -> Result<Vec<Vec<u8>>> {
        let (width, height) = (page.width(), page.height());
        let (label_w, label_h) = label.dots_printable;
        if width != label_w {
            return Err(PrintBridgeError::EncodingFailure(format!(
                "page {} is {width} dots wide, {} label needs exactly {label_w}",
                page.index, label.identifier
            )));
        }
        if label.is_continuous() {
            if height < model.min_length_dots || height > model.max_length_dots {
                return Err(PrintBridgeError::EncodingFailure(format!(
                    "page {} is {height} dots long, {} accepts {}..={}",
                    page.index, model.name, model.min_length_dots, model.max_length_dots
                )));
            }
        } else if height != label_h {
            return Err(PrintBridgeError::EncodingFailure(format!(
                "page {} is {height} dots long, {} label needs exactly {label_h}",
                page.index, label.identifier
            )));
        }

        let bilevel = page.into_processor().bilevel(self.threshold);
        let rows = pack_rows(&bilevel, model, label);
        debug!(rows = rows.len(), "Page packed");
        Ok(rows)
    }
}

/// Place a bilevel page on the head and pack it one bit per dot.
///
/// The page sits `right_margin` dots from the right edge of the head and is
/// mirrored, because the head's first pin is at the label's right edge.
/// Black is 1, most significant bit first, rows top to bottom.
pub fn pack_rows(page: &GrayImage, model: &Model, label: &Label) -> Vec<Vec<u8>> {
    let device_width = model.pixel_width();
    let right_margin = label.right_margin_dots + model.additional_offset_r;
    let offset = device_width - page.width() - right_margin;

    page.rows()
        .map(|row| {
            let mut line = vec![0u8; model.bytes_per_row];
            for (x, pixel) in row.enumerate() {
                if pixel.0[0] == 0 {
                    let mirrored = device_width - 1 - (offset + x as u32);
                    line[(mirrored / 8) as usize] |= 0x80 >> (mirrored % 8);
                }
            }
            line
        })
        .collect()
}

/// Split client options into those the printer advertises and those it
/// does not.
pub fn filter_options(
    capabilities: &Capabilities,
    requested: &BTreeMap<String, String>,
) -> (BTreeMap<String, String>, Vec<String>) {
    let mut kept = BTreeMap::new();
    let mut dropped = Vec::new();
    for (key, value) in requested {
        match capabilities.supported_options.get(key) {
            Some(option) if option.choices.is_empty() || option.choices.contains(value) => {
                kept.insert(key.clone(), value.clone());
            }
            _ => dropped.push(key.clone()),
        }
    }
    (kept, dropped)
}

fn model_for(printer: &Printer) -> Option<&'static Model> {
    models::by_name(&printer.model).or_else(|| match &printer.handle {
        TransportHandle::Usb { product_id, .. } => models::by_product_id(*product_id),
        TransportHandle::Queue { .. } => None,
    })
}

#[cfg(test)]
mod tests {
    use image::Luma;
    use printbridge_core::{PrintOption, PrinterId, Reachability};
    use printbridge_document::PagePixels;

    use super::*;
    use crate::raster;

    fn ql(model_name: &str) -> Printer {
        let model = models::by_name(model_name).unwrap();
        Printer {
            id: PrinterId::usb(0x04f9, model.product_id, Some("A1B2")),
            class: PrinterClass::DirectRaster,
            label: format!("Brother {model_name}"),
            model: model_name.into(),
            capabilities: raster::capabilities(model),
            reachability: Reachability::Online,
            state_reasons: Vec::new(),
            handle: TransportHandle::Usb {
                vendor_id: 0x04f9,
                product_id: model.product_id,
                serial: Some("A1B2".into()),
            },
            epoch: 0,
        }
    }

    fn page(index: u32, width: u32, height: u32, fill: u8) -> Result<RenderedPage> {
        Ok(RenderedPage {
            index,
            dpi: 300,
            pixels: PagePixels::Gray(GrayImage::from_pixel(width, height, Luma([fill]))),
        })
    }

    fn encoder(cut_policy: CutPolicy) -> ProtocolEncoder {
        ProtocolEncoder {
            cut_policy,
            high_quality: true,
            threshold: Threshold::default(),
        }
    }

    fn media(name: &str) -> MediaSize {
        let label = labels::by_identifier(name).unwrap();
        label.media_size().unwrap()
    }

    #[test]
    fn die_cut_stream_layout() {
        let printer = ql("QL-820NWB");
        let pages: PageStream = Box::new(vec![page(0, 696, 271, 255)].into_iter());
        let job = encoder(CutPolicy::EachLabel)
            .encode(&printer, &media("62x29"), &PrintOptions::default(), pages)
            .unwrap();
        let EncodedJob::Raster(payload) = job else {
            panic!("raster printer got a queue job");
        };
        let bytes = payload.bytes;
        assert_eq!(payload.pages, 1);

        // 400 invalidate bytes, ESC @, ESC i a 01, ESC i S
        assert!(bytes[..400].iter().all(|&b| b == 0));
        assert_eq!(&bytes[400..402], &[0x1b, 0x40]);
        assert_eq!(&bytes[402..406], &[0x1b, 0x69, 0x61, 0x01]);
        assert_eq!(&bytes[406..409], &[0x1b, 0x69, 0x53]);
        // ESC i z: die-cut 62x29, 271 lines, first page
        assert_eq!(
            &bytes[409..422],
            &[0x1b, 0x69, 0x7a, 0xce, 0x0b, 62, 29, 0x0f, 0x01, 0, 0, 0x00, 0x00]
        );
        // autocut, cut every 1, cut at end, zero margin, compression
        assert_eq!(
            &bytes[422..439],
            &[
                0x1b, 0x69, 0x4d, 0x40, 0x1b, 0x69, 0x41, 0x01, 0x1b, 0x69, 0x4b, 0x08, 0x1b,
                0x69, 0x64, 0x00, 0x00
            ]
        );
        assert_eq!(&bytes[439..441], &[b'M', 0x02]);
        // A white page compresses to one run per line.
        assert_eq!(&bytes[441..446], &[b'g', 0x00, 0x02, 0xa7, 0x00]);
        assert_eq!(bytes.len(), 441 + 271 * 5 + 1);
        assert_eq!(*bytes.last().unwrap(), 0x1a);
    }

    #[test]
    fn width_mismatch_is_rejected() {
        let printer = ql("QL-700");
        let pages: PageStream = Box::new(vec![page(0, 700, 271, 255)].into_iter());
        let err = encoder(CutPolicy::EachLabel)
            .encode(&printer, &media("62x29"), &PrintOptions::default(), pages)
            .unwrap_err();
        assert!(matches!(err, PrintBridgeError::EncodingFailure(_)));
    }

    #[test]
    fn pages_end_with_form_feed_until_last() {
        let printer = ql("QL-1050");
        let pages: PageStream = Box::new(
            vec![page(0, 1164, 1660, 255), page(1, 1164, 1660, 255)].into_iter(),
        );
        let options = PrintOptions {
            copies: 2,
            ..Default::default()
        };
        let EncodedJob::Raster(payload) = encoder(CutPolicy::EndOfJob)
            .encode(&printer, &media("103x164"), &options, pages)
            .unwrap()
        else {
            panic!("raster printer got a queue job");
        };
        assert_eq!(payload.pages, 4);
        let ends: Vec<u8> = payload
            .bytes
            .iter()
            .copied()
            .filter(|&b| b == 0x0c || b == 0x1a)
            .collect();
        // White rows on a wide head never contain 0x0c or 0x1a.
        assert_eq!(ends, vec![0x0c, 0x0c, 0x0c, 0x1a]);
    }

    #[test]
    fn black_dot_is_mirrored_into_place() {
        let model = models::by_name("QL-700").unwrap();
        let label = labels::by_identifier("62").unwrap();
        let mut img = GrayImage::from_pixel(696, 1, Luma([255]));
        img.put_pixel(0, 0, Luma([0]));
        let rows = pack_rows(&img, model, label);
        // offset = 720 - 696 - 12 = 12; mirrored column = 719 - 12 = 707
        assert_eq!(rows[0][707 / 8], 0x80 >> (707 % 8));
        assert_eq!(rows[0].iter().filter(|&&b| b != 0).count(), 1);
    }

    #[test]
    fn unadvertised_options_are_dropped() {
        let mut caps = raster::capabilities(models::by_name("QL-700").unwrap());
        caps.supported_options.insert(
            "print-quality".into(),
            PrintOption {
                display_name: "Print quality".into(),
                default_choice: Some("4".into()),
                choices: vec!["3".into(), "4".into(), "5".into()],
            },
        );
        let requested = BTreeMap::from([
            ("print-quality".to_string(), "5".to_string()),
            ("sides".to_string(), "two-sided-long-edge".to_string()),
        ]);
        let (kept, dropped) = filter_options(&caps, &requested);
        assert_eq!(kept.len(), 1);
        assert_eq!(dropped, vec!["sides".to_string()]);
    }
}
