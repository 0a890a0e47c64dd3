// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Backend transport seams. Each backend both enumerates its printers and
// carries encoded jobs to them; the registry and dispatcher only ever see
// these traits, so tests swap in recording mocks.

use std::collections::BTreeMap;

use async_trait::async_trait;
use printbridge_core::error::Result;
use printbridge_core::{Printer, TransportHandle};

use crate::raster::PrinterStatus;

/// Spooler-side metadata sent with a print-ready document.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueSubmission {
    pub job_title: String,
    pub document_format: &'static str,
    /// Spooler media keyword.
    pub media: Option<String>,
    pub copies: u32,
    /// Options the printer advertises, already filtered.
    pub options: BTreeMap<String, String>,
}

/// What the spooler said when it accepted a job.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueReceipt {
    pub remote_job_id: Option<i32>,
    pub state_reasons: Vec<String>,
}

/// A complete raster command stream.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterPayload {
    pub bytes: Vec<u8>,
    /// Labels the stream prints, for completion tracking.
    pub pages: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransferReport {
    pub bytes_written: usize,
    /// Last status frame read back, if the device sent one.
    pub final_status: Option<PrinterStatus>,
}

/// A print spooler (CUPS over IPP).
#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Enumerate the spooler's queues.
    async fn discover(&self) -> Result<Vec<Printer>>;

    /// Hand a print-ready document to a queue. Rejections come back as
    /// `TransmissionFailure` carrying the spooler's reason.
    async fn submit(
        &self,
        handle: &TransportHandle,
        document: Vec<u8>,
        submission: &QueueSubmission,
    ) -> Result<QueueReceipt>;
}

/// Directly attached raster printers (USB bulk).
#[async_trait]
pub trait RasterTransport: Send + Sync {
    /// Enumerate attached devices with known vendor/product ids.
    async fn discover(&self) -> Result<Vec<Printer>>;

    /// Write a raw command stream and wait for the device to finish it.
    async fn transmit(&self, handle: &TransportHandle, payload: RasterPayload)
    -> Result<TransferReport>;
}
