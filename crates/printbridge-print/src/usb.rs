// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// USB bulk transport for Brother QL label printers.
//
// Devices are matched by vendor/product id and serial number, never by bus
// address, so a replugged printer keeps its registry id. Every transmission
// starts by querying status: a printer left mid-job by an earlier failure
// reports its errors here instead of silently eating a second stream.

use std::time::Duration;

use async_trait::async_trait;
use nusb::transfer::RequestBuffer;
use tracing::{debug, info, instrument, warn};

use printbridge_core::error::{PrintBridgeError, Result};
use printbridge_core::{Printer, PrinterClass, PrinterId, Reachability, TransportHandle};

use crate::raster::{self, BROTHER_VENDOR_ID, PrinterStatus, RasterCommands, StatusType, models};
use crate::transport::{RasterPayload, RasterTransport, TransferReport};

const ENDPOINT_OUT: u8 = 0x02;
const ENDPOINT_IN: u8 = 0x81;

/// Bulk write size.
const CHUNK_SIZE: usize = 16 * 1024;

/// Per-read wait for a status frame.
const STATUS_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause between empty status reads.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Default)]
pub struct UsbTransport;

impl UsbTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RasterTransport for UsbTransport {
    #[instrument(skip(self))]
    async fn discover(&self) -> Result<Vec<Printer>> {
        let printers = tokio::task::spawn_blocking(|| -> Result<Vec<Printer>> {
            let devices = nusb::list_devices()
                .map_err(|e| PrintBridgeError::Discovery(format!("USB enumeration: {e}")))?;
            Ok(devices
                .filter_map(|dev| {
                    printer_for(
                        dev.vendor_id(),
                        dev.product_id(),
                        dev.serial_number(),
                        dev.manufacturer_string(),
                        dev.product_string(),
                    )
                })
                .collect())
        })
        .await
        .map_err(|e| PrintBridgeError::Discovery(format!("USB enumeration task: {e}")))??;

        debug!(count = printers.len(), "USB label printers enumerated");
        Ok(printers)
    }

    #[instrument(skip(self, payload), fields(bytes = payload.bytes.len(), pages = payload.pages))]
    async fn transmit(&self, handle: &TransportHandle, payload: RasterPayload) -> Result<TransferReport> {
        let TransportHandle::Usb {
            vendor_id,
            product_id,
            serial,
        } = handle
        else {
            return Err(PrintBridgeError::TransmissionFailure(
                "USB transport cannot reach a spooler queue".into(),
            ));
        };
        let model = models::by_product_id(*product_id).ok_or_else(|| {
            PrintBridgeError::TransmissionFailure(format!("unknown product id {product_id:04x}"))
        })?;
        let interface = open_interface(*vendor_id, *product_id, serial.as_deref())?;

        // Reset the printer and make sure it is ready before sending labels.
        let mut preflight = RasterCommands::new(model);
        preflight.invalidate();
        preflight.initialize();
        preflight.status_request();
        write(&interface, preflight.into_bytes()).await?;
        let status = read_status(&interface).await?.ok_or_else(|| {
            PrintBridgeError::TransmissionFailure("printer did not answer status request".into())
        })?;
        if status.has_errors() {
            return Err(PrintBridgeError::TransmissionFailure(status.error_summary()));
        }
        debug!(media_width_mm = status.media_width_mm, "printer ready");

        let mut bytes_written = 0;
        for chunk in payload.bytes.chunks(CHUNK_SIZE) {
            bytes_written += write(&interface, chunk.to_vec()).await?;
            debug!(bytes_written, total = payload.bytes.len(), "USB progress");
        }

        // Bounded by the dispatcher's per-label transmit window, not here.
        let mut completed = 0;
        let mut last = Some(status);
        while completed < payload.pages {
            let Some(status) = read_status(&interface).await? else {
                continue;
            };
            if status.has_errors() {
                return Err(PrintBridgeError::TransmissionFailure(status.error_summary()));
            }
            if status.status_type == StatusType::PrintingCompleted {
                completed += 1;
                debug!(completed, pages = payload.pages, "label printed");
            }
            last = Some(status);
        }

        info!(bytes_written, pages = payload.pages, "raster job printed");
        Ok(TransferReport {
            bytes_written,
            final_status: last,
        })
    }
}

/// Registry record for an attached device, if it is a supported QL model.
fn printer_for(
    vendor_id: u16,
    product_id: u16,
    serial: Option<&str>,
    manufacturer: Option<&str>,
    product: Option<&str>,
) -> Option<Printer> {
    if vendor_id != BROTHER_VENDOR_ID {
        return None;
    }
    let model = models::by_product_id(product_id)?;
    let manufacturer = manufacturer.unwrap_or("Brother");
    let product = product.unwrap_or(model.name);
    let label = match serial {
        Some(serial) if !serial.is_empty() => format!("{manufacturer} {product} ({serial})"),
        _ => format!("{manufacturer} {product}"),
    };

    Some(Printer {
        id: PrinterId::usb(vendor_id, product_id, serial),
        class: PrinterClass::DirectRaster,
        label,
        model: model.name.to_owned(),
        capabilities: raster::capabilities(model),
        reachability: Reachability::Online,
        state_reasons: Vec::new(),
        handle: TransportHandle::Usb {
            vendor_id,
            product_id,
            serial: serial.map(str::to_owned),
        },
        epoch: 0,
    })
}

fn open_interface(vendor_id: u16, product_id: u16, serial: Option<&str>) -> Result<nusb::Interface> {
    let info = nusb::list_devices()
        .map_err(|e| PrintBridgeError::TransmissionFailure(format!("USB enumeration: {e}")))?
        .find(|dev| {
            dev.vendor_id() == vendor_id
                && dev.product_id() == product_id
                && (serial.is_none() || dev.serial_number() == serial)
        })
        .ok_or_else(|| {
            PrintBridgeError::TransmissionFailure(format!(
                "USB device {vendor_id:04x}:{product_id:04x} not attached"
            ))
        })?;

    let device = info
        .open()
        .map_err(|e| PrintBridgeError::TransmissionFailure(format!("USB open: {e}")))?;
    device
        .detach_and_claim_interface(0)
        .map_err(|e| PrintBridgeError::TransmissionFailure(format!("USB claim interface: {e}")))
}

async fn write(interface: &nusb::Interface, data: Vec<u8>) -> Result<usize> {
    let completion = interface
        .bulk_out(ENDPOINT_OUT, data)
        .await
        .into_result()
        .map_err(|e| PrintBridgeError::TransmissionFailure(format!("USB write: {e}")))?;
    Ok(completion.actual_length())
}

/// Read one status frame. `None` when the printer stayed silent.
async fn read_status(interface: &nusb::Interface) -> Result<Option<PrinterStatus>> {
    let read = interface.bulk_in(ENDPOINT_IN, RequestBuffer::new(64));
    let data = match tokio::time::timeout(STATUS_READ_TIMEOUT, read).await {
        Ok(completion) => completion
            .into_result()
            .map_err(|e| PrintBridgeError::TransmissionFailure(format!("USB read: {e}")))?,
        Err(_) => {
            warn!("no status frame within read timeout");
            return Ok(None);
        }
    };
    if data.is_empty() {
        tokio::time::sleep(POLL_INTERVAL).await;
        return Ok(None);
    }
    PrinterStatus::parse(&data).map(Some)
}
