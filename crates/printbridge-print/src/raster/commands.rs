// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Byte-level QL raster command stream.
//
// Commands a model does not implement are skipped silently: older heads
// reject unknown escape sequences by printing garbage.

use super::labels::Label;
use super::models::Model;
use super::packbits;

const ESC: u8 = 0x1b;

/// Accumulates the command stream for one job.
pub struct RasterCommands {
    model: &'static Model,
    data: Vec<u8>,
    page_number: u32,
    compression: bool,
}

impl RasterCommands {
    pub fn new(model: &'static Model) -> Self {
        Self {
            model,
            data: Vec::new(),
            page_number: 0,
            compression: false,
        }
    }

    pub fn model(&self) -> &'static Model {
        self.model
    }

    /// Zero bytes that flush any half-received command.
    pub fn invalidate(&mut self) {
        self.data
            .extend(std::iter::repeat_n(0u8, self.model.invalidate_bytes));
    }

    /// ESC @
    pub fn initialize(&mut self) {
        self.data.extend_from_slice(&[ESC, b'@']);
    }

    /// ESC i S
    pub fn status_request(&mut self) {
        self.data.extend_from_slice(&[ESC, b'i', b'S']);
    }

    /// ESC i a 01: switch from ESC/P to raster mode.
    pub fn switch_to_raster(&mut self) {
        if self.model.mode_setting {
            self.data.extend_from_slice(&[ESC, b'i', b'a', 0x01]);
        }
    }

    /// ESC i z: media type, size and line count of the next page.
    pub fn print_information(&mut self, label: &Label, raster_lines: u32, high_quality: bool) {
        let mut valid = 0x80u8;
        valid |= 1 << 1; // media type
        valid |= 1 << 2; // width
        valid |= 1 << 3; // length
        if high_quality {
            valid |= 1 << 6;
        }
        self.data.extend_from_slice(&[ESC, b'i', b'z', valid]);
        self.data.push(label.form_factor.media_type());
        self.data.push(label.tape_size.0);
        self.data.push(label.tape_size.1);
        self.data.extend_from_slice(&raster_lines.to_le_bytes());
        self.data.push(if self.page_number == 0 { 0 } else { 1 });
        self.data.push(0x00);
    }

    /// ESC i M: cut after each label (bit 6).
    pub fn autocut(&mut self, enabled: bool) {
        if self.model.cutting {
            self.data
                .extend_from_slice(&[ESC, b'i', b'M', if enabled { 0x40 } else { 0x00 }]);
        }
    }

    /// ESC i A n: with autocut on, cut every `n` labels.
    pub fn cut_every(&mut self, n: u8) {
        if self.model.cutting {
            self.data.extend_from_slice(&[ESC, b'i', b'A', n]);
        }
    }

    /// ESC i K: expanded mode; bit 3 cuts after the last page.
    pub fn expanded_mode(&mut self, cut_at_end: bool) {
        if self.model.expanded_mode {
            let flags = if cut_at_end { 0x08 } else { 0x00 };
            self.data.extend_from_slice(&[ESC, b'i', b'K', flags]);
        }
    }

    /// ESC i d: feed margin in dots.
    pub fn margins(&mut self, dots: u16) {
        self.data.extend_from_slice(&[ESC, b'i', b'd']);
        self.data.extend_from_slice(&dots.to_le_bytes());
    }

    /// M 02: PackBits-compressed raster lines.
    pub fn compression(&mut self, enabled: bool) {
        if self.model.compression {
            self.data
                .extend_from_slice(&[b'M', if enabled { 0x02 } else { 0x00 }]);
            self.compression = enabled;
        }
    }

    /// g 00 n: one raster line of exactly `bytes_per_row` bytes.
    pub fn raster_line(&mut self, row: &[u8]) {
        debug_assert_eq!(row.len(), self.model.bytes_per_row);
        if self.compression {
            let packed = packbits::encode(row);
            self.data.extend_from_slice(&[b'g', 0x00, packed.len() as u8]);
            self.data.extend_from_slice(&packed);
        } else {
            self.data.extend_from_slice(&[b'g', 0x00, row.len() as u8]);
            self.data.extend_from_slice(row);
        }
    }

    /// End the page: FF (0x0c) between pages, Control-Z (0x1a) after the
    /// last.
    pub fn print(&mut self, last_page: bool) {
        self.data.push(if last_page { 0x1a } else { 0x0c });
        self.page_number += 1;
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}
