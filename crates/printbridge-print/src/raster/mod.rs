// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Brother QL raster protocol: device models, label stock, command stream
// construction, PackBits line compression, and status frame parsing.

use std::collections::BTreeMap;

use printbridge_core::{Capabilities, MediaSize};

pub mod commands;
pub mod labels;
pub mod models;
pub mod packbits;
pub mod status;

pub use commands::RasterCommands;
pub use labels::{FormFactor, Label};
pub use models::Model;
pub use status::{PrinterStatus, StatusType};

/// USB vendor id of Brother Industries.
pub const BROTHER_VENDOR_ID: u16 = 0x04f9;

/// Native head resolution of every QL model.
pub const QL_DPI: u32 = 300;

/// Everything a model can print on, with its usual stock first so it is
/// the default medium.
pub fn capabilities(model: &Model) -> Capabilities {
    let mut media_sizes: Vec<MediaSize> = labels::for_model(model)
        .filter_map(|l| l.media_size())
        .collect();
    let preferred = if model.pixel_width() > 720 {
        "103x164"
    } else {
        "62x29"
    };
    if let Some(pos) = media_sizes.iter().position(|m| m.name == preferred) {
        let media = media_sizes.remove(pos);
        media_sizes.insert(0, media);
    }

    Capabilities {
        media_sizes,
        continuous_media: labels::for_model(model)
            .filter_map(|l| l.media_range(model, QL_DPI))
            .collect(),
        resolution_dpi: QL_DPI,
        color: false,
        supported_options: BTreeMap::new(),
    }
}
