// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PrintBridge print pipeline: device registry, protocol encoders, backend
// transports (CUPS over IPP, USB bulk), job history and the job dispatcher.

pub mod cups;
pub mod dispatcher;
pub mod encode;
pub mod locks;
pub mod queue;
pub mod raster;
pub mod registry;
pub mod transport;
pub mod usb;

pub use cups::CupsTransport;
pub use dispatcher::{DispatcherConfig, JobDispatcher};
pub use encode::{EncodedJob, ProtocolEncoder, filter_options};
pub use locks::{PrinterLocks, TransmitGuard};
pub use queue::JobQueue;
pub use registry::{DeviceRegistry, RefreshSummary, RegistryConfig};
pub use transport::{
    QueueReceipt, QueueSubmission, QueueTransport, RasterPayload, RasterTransport, TransferReport,
};
pub use usb::UsbTransport;
