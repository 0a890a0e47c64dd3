// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Parsing of the 32-byte status frame QL printers return on the bulk-in
// endpoint, both in reply to ESC i S and unsolicited during printing.

use printbridge_core::error::{PrintBridgeError, Result};

pub const STATUS_FRAME_LEN: usize = 32;

const ERROR_INFO_1: [(u8, &str); 7] = [
    (0x01, "no media"),
    (0x02, "end of media"),
    (0x04, "cutter jam"),
    (0x10, "printer in use"),
    (0x20, "printer turned off"),
    (0x40, "high-voltage adapter"),
    (0x80, "fan motor error"),
];

const ERROR_INFO_2: [(u8, &str); 8] = [
    (0x01, "replace media"),
    (0x02, "expansion buffer full"),
    (0x04, "communication error"),
    (0x08, "communication buffer full"),
    (0x10, "cover open"),
    (0x20, "overheating"),
    (0x40, "black marking not detected"),
    (0x80, "system error"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusType {
    Reply,
    PrintingCompleted,
    ErrorOccurred,
    TurnedOff,
    Notification,
    PhaseChange,
    Other(u8),
}

impl From<u8> for StatusType {
    fn from(value: u8) -> Self {
        match value {
            0x00 => Self::Reply,
            0x01 => Self::PrintingCompleted,
            0x02 => Self::ErrorOccurred,
            0x04 => Self::TurnedOff,
            0x05 => Self::Notification,
            0x06 => Self::PhaseChange,
            other => Self::Other(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrinterStatus {
    pub errors: Vec<&'static str>,
    /// Loaded tape width in mm; 0 when no media is detected.
    pub media_width_mm: u8,
    /// 0x0a continuous, 0x0b die-cut, 0x00 none.
    pub media_type: u8,
    pub media_length_mm: u8,
    pub status_type: StatusType,
    /// 0 waiting to receive, 1 printing.
    pub phase: u8,
}

impl PrinterStatus {
    pub fn parse(frame: &[u8]) -> Result<Self> {
        if frame.len() < STATUS_FRAME_LEN || frame[0] != 0x80 || frame[1] != 0x20 || frame[2] != b'B'
        {
            return Err(PrintBridgeError::TransmissionFailure(format!(
                "malformed status frame ({} bytes)",
                frame.len()
            )));
        }
        let mut errors = Vec::new();
        errors.extend(flags(frame[8], &ERROR_INFO_1));
        errors.extend(flags(frame[9], &ERROR_INFO_2));
        Ok(Self {
            errors,
            media_width_mm: frame[10],
            media_type: frame[11],
            media_length_mm: frame[17],
            status_type: StatusType::from(frame[18]),
            phase: frame[19],
        })
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty() || self.status_type == StatusType::ErrorOccurred
    }

    /// Errors joined for a job's failure reason.
    pub fn error_summary(&self) -> String {
        if self.errors.is_empty() {
            format!("printer reported {:?}", self.status_type)
        } else {
            self.errors.join(", ")
        }
    }
}

fn flags(byte: u8, table: &'static [(u8, &'static str)]) -> impl Iterator<Item = &'static str> {
    table
        .iter()
        .filter(move |(mask, _)| byte & mask != 0)
        .map(|(_, name)| *name)
}
