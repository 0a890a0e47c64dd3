// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Brother DK label stock and its printable geometry at 300 dpi.

use printbridge_core::{Dots, MediaRange, MediaSize};

use super::models::Model;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormFactor {
    /// Roll cut to any length.
    Continuous,
    /// Pre-cut labels of fixed length.
    DieCut,
}

impl FormFactor {
    /// Media-type byte of the print-information command.
    pub fn media_type(&self) -> u8 {
        match self {
            Self::Continuous => 0x0a,
            Self::DieCut => 0x0b,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label {
    pub identifier: &'static str,
    /// Tape width and length in mm; length is 0 for continuous rolls.
    pub tape_size: (u8, u8),
    pub form_factor: FormFactor,
    /// Printable area in dots; height is 0 for continuous rolls.
    pub dots_printable: (u32, u32),
    /// Dots between the printable area and the right edge of the head.
    pub right_margin_dots: u32,
    /// Feed margin for the margin command.
    pub feed_margin: u16,
    /// Models this stock fits; empty means every model whose head is wide
    /// enough.
    pub restricted_to: &'static [&'static str],
}

const WIDE_ONLY: &[&str] = &["QL-1050", "QL-1060N"];

const fn continuous(identifier: &'static str, width: u8, printable: u32, margin: u32) -> Label {
    Label {
        identifier,
        tape_size: (width, 0),
        form_factor: FormFactor::Continuous,
        dots_printable: (printable, 0),
        right_margin_dots: margin,
        feed_margin: 35,
        restricted_to: &[],
    }
}

const fn die_cut(
    identifier: &'static str,
    tape_size: (u8, u8),
    dots_printable: (u32, u32),
    margin: u32,
) -> Label {
    Label {
        identifier,
        tape_size,
        form_factor: FormFactor::DieCut,
        dots_printable,
        right_margin_dots: margin,
        feed_margin: 0,
        restricted_to: &[],
    }
}

pub const LABELS: &[Label] = &[
    continuous("29", 29, 306, 6),
    continuous("38", 38, 413, 12),
    continuous("50", 50, 554, 12),
    continuous("62", 62, 696, 12),
    Label {
        restricted_to: WIDE_ONLY,
        ..continuous("102", 102, 1164, 12)
    },
    die_cut("17x54", (17, 54), (165, 566), 0),
    die_cut("29x42", (29, 42), (306, 425), 6),
    die_cut("29x90", (29, 90), (306, 991), 6),
    die_cut("39x90", (38, 90), (413, 991), 12),
    die_cut("62x29", (62, 29), (696, 271), 12),
    die_cut("62x100", (62, 100), (696, 1109), 12),
    Label {
        restricted_to: WIDE_ONLY,
        ..die_cut("102x51", (102, 51), (1164, 526), 12)
    },
    // Shipping-label stock sold as 103x164; the tape itself is 104 mm.
    Label {
        restricted_to: WIDE_ONLY,
        ..die_cut("103x164", (104, 164), (1164, 1660), 12)
    },
];

impl Label {
    pub fn is_continuous(&self) -> bool {
        self.form_factor == FormFactor::Continuous
    }

    /// Whether `model` can print on this stock.
    pub fn supported_by(&self, model: &Model) -> bool {
        if !self.restricted_to.is_empty() {
            return self.restricted_to.contains(&model.name);
        }
        model.fits_width(self.dots_printable.0 + self.right_margin_dots)
    }

    /// The advertised die-cut medium, named after the stock.
    pub fn media_size(&self) -> Option<MediaSize> {
        if self.is_continuous() {
            return None;
        }
        let (width, length) = self.identifier.split_once('x')?;
        Some(MediaSize {
            printable_dots: Some(Dots {
                width: self.dots_printable.0,
                height: self.dots_printable.1,
            }),
            ..MediaSize::new(
                self.identifier,
                width.parse().ok()?,
                length.parse().ok()?,
            )
        })
    }

    /// The advertised continuous roll, bounded by the model's length limits.
    pub fn media_range(&self, model: &Model, dpi: u32) -> Option<MediaRange> {
        if !self.is_continuous() {
            return None;
        }
        let dots_to_mm = |dots: u32| dots as f32 * printbridge_core::MM_PER_INCH / dpi as f32;
        Some(MediaRange {
            name: self.identifier.to_string(),
            width_mm: self.tape_size.0 as f32,
            min_length_mm: dots_to_mm(model.min_length_dots),
            max_length_mm: dots_to_mm(model.max_length_dots),
            printable_width_dots: Some(self.dots_printable.0),
        })
    }
}

pub fn by_identifier(identifier: &str) -> Option<&'static Label> {
    LABELS.iter().find(|l| l.identifier == identifier)
}

/// Find the stock a resolved medium was advertised from.
///
/// Die-cut media carry the stock identifier as their name; continuous media
/// are named `<roll>x<length>` and are matched on their roll width.
pub fn for_media(media: &MediaSize) -> Option<&'static Label> {
    if let Some(label) = by_identifier(&media.name).filter(|l| !l.is_continuous()) {
        return Some(label);
    }
    LABELS.iter().find(|l| {
        l.is_continuous() && (l.tape_size.0 as f32 - media.width_mm).abs() <= 0.5
    })
}

/// Every stock `model` can take.
pub fn for_model(model: &Model) -> impl Iterator<Item = &'static Label> + '_ {
    LABELS.iter().filter(move |l| l.supported_by(model))
}
