// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Print service: the inbound operations the HTTP layer exposes: list
// printers, submit a document, query a job. Request and response types
// serialise with the camelCase keys browser clients already use.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use printbridge_core::error::{PrintBridgeError, Result};
use printbridge_core::{
    Capabilities, DaemonConfig, DocumentType, FailureKind, JobId, JobState, JobStatus, MediaRange,
    MediaSize, PrintOption, PrintOptions, Printer, PrinterId, PrinterSelector, Reachability,
};
use printbridge_document::{DocumentRenderer, Renderer};
use printbridge_print::{
    CupsTransport, DeviceRegistry, DispatcherConfig, JobDispatcher, JobQueue, QueueTransport,
    RasterTransport, RefreshSummary, RegistryConfig, UsbTransport, filter_options,
};

/// How long a synchronous submission waits for a terminal state. Kept
/// under the 30 s request timeout most HTTP front ends apply.
pub const SYNC_WAIT: Duration = Duration::from_secs(25);

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaSizeInfo {
    pub name: String,
    pub width: f32,
    pub height: f32,
    pub units: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrinterInfo {
    pub id: PrinterId,
    pub name: String,
    pub model: String,
    pub print_system: &'static str,
    pub printer_state: Reachability,
    pub state_reasons: Vec<String>,
    pub media_sizes: Vec<MediaSizeInfo>,
    pub continuous_media: Vec<MediaRange>,
    pub resolution_dpi: u32,
    pub color: bool,
    pub supported_options: BTreeMap<String, PrintOption>,
}

impl From<&Printer> for PrinterInfo {
    fn from(printer: &Printer) -> Self {
        let Capabilities {
            media_sizes,
            continuous_media,
            resolution_dpi,
            color,
            supported_options,
        } = printer.capabilities.clone();
        Self {
            id: printer.id.clone(),
            name: printer.label.clone(),
            model: printer.model.clone(),
            print_system: printer.class.print_system(),
            printer_state: printer.reachability,
            state_reasons: printer.state_reasons.clone(),
            media_sizes: media_sizes
                .into_iter()
                .map(|m| MediaSizeInfo {
                    name: m.name,
                    width: m.width_mm,
                    height: m.length_mm,
                    units: "mm",
                })
                .collect(),
            continuous_media,
            resolution_dpi,
            color,
            supported_options,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ListPrintersResponse {
    pub printers: Vec<PrinterInfo>,
}

/// Submission metadata; the document bytes travel separately.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PrintRequest {
    /// Exact registry id. Takes precedence over `printer_selector`.
    pub printer_id: Option<String>,
    pub printer_selector: PrinterSelector,
    pub content_type: String,
    pub job_title: Option<String>,
    pub media: Option<MediaSize>,
    pub copies: Option<u32>,
    pub options: BTreeMap<String, String>,
    /// Return as soon as the job is accepted instead of waiting for it.
    #[serde(rename = "async")]
    pub is_async: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintResponse {
    pub job_id: JobId,
    pub job_state: JobState,
    pub job_state_reasons: Vec<String>,
    pub result_code: Option<FailureKind>,
    pub remote_job_id: Option<String>,
    /// Options the printer does not offer; they were not sent.
    pub warnings: Vec<String>,
}

impl PrintResponse {
    fn new(status: JobStatus, warnings: Vec<String>) -> Self {
        Self {
            job_id: status.job_id,
            job_state: status.job_state,
            job_state_reasons: status.job_state_reasons,
            result_code: status.result_code,
            remote_job_id: status.remote_job_id,
            warnings,
        }
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// Cheap to clone; clones share the registry and job table.
#[derive(Clone)]
pub struct PrintService {
    dispatcher: JobDispatcher,
    config: Arc<DaemonConfig>,
    sync_wait: Duration,
}

impl PrintService {
    /// Wire the real backends: CUPS at `config.cups_uri`, USB label
    /// printers, poppler for PDFs.
    pub fn init(config: DaemonConfig) -> Result<Self> {
        config.validate()?;
        let jobs = match &config.job_history_path {
            Some(path) => JobQueue::open(path)?,
            None => JobQueue::open_in_memory()?,
        };
        let queue: Arc<dyn QueueTransport> = Arc::new(CupsTransport::new(config.cups_uri.clone()));
        let raster: Arc<dyn RasterTransport> = Arc::new(UsbTransport::new());
        Self::from_parts(config, queue, raster, Arc::new(Renderer::poppler()), jobs)
    }

    pub fn from_parts(
        config: DaemonConfig,
        queue: Arc<dyn QueueTransport>,
        raster: Arc<dyn RasterTransport>,
        renderer: Arc<dyn DocumentRenderer>,
        jobs: JobQueue,
    ) -> Result<Self> {
        let registry = Arc::new(DeviceRegistry::new(
            Arc::clone(&queue),
            Arc::clone(&raster),
            RegistryConfig::from(&config),
        ));
        let dispatcher = JobDispatcher::new(
            registry,
            renderer,
            queue,
            raster,
            jobs,
            DispatcherConfig::from(&config),
        )?;
        info!("print service initialised");
        Ok(Self {
            dispatcher,
            config: Arc::new(config),
            sync_wait: SYNC_WAIT,
        })
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    fn registry(&self) -> &DeviceRegistry {
        self.dispatcher.registry()
    }

    /// Force a discovery pass.
    pub async fn refresh(&self) -> RefreshSummary {
        self.registry().refresh().await
    }

    /// Drop expired jobs. Returns how many were removed.
    pub fn prune(&self) -> Result<usize> {
        self.dispatcher.prune()
    }

    pub async fn list_printers(&self, selector: &PrinterSelector) -> Result<ListPrintersResponse> {
        selector.validate()?;
        self.registry().ensure_fresh().await;
        let printers = self
            .registry()
            .list_matching(selector)
            .iter()
            .map(PrinterInfo::from)
            .collect();
        Ok(ListPrintersResponse { printers })
    }

    /// Submit a document. Unless the request is async, waits up to
    /// [`SYNC_WAIT`] for the job to finish.
    #[instrument(skip(self, request, document), fields(content_type = %request.content_type, doc_len = document.len()))]
    pub async fn print(&self, request: PrintRequest, document: Vec<u8>) -> Result<PrintResponse> {
        let document_type = DocumentType::from_mime(&request.content_type).ok_or_else(|| {
            PrintBridgeError::UnsupportedFormat(format!("content type '{}'", request.content_type))
        })?;
        if document.is_empty() {
            return Err(PrintBridgeError::UnsupportedFormat("empty document".into()));
        }

        self.registry().ensure_fresh().await;
        let (printer_id, capabilities) = match request.printer_id.as_deref() {
            // An unknown id still becomes a job, which fails as NotFound.
            Some(id) => {
                let id = PrinterId::from(id);
                let capabilities = self.registry().resolve(&id).ok().map(|p| p.capabilities);
                (id, capabilities)
            }
            None => {
                request.printer_selector.validate()?;
                let printer = self.registry().select(&request.printer_selector).map_err(|_| {
                    PrintBridgeError::NotFound(if request.printer_selector.is_empty() {
                        "no printer is attached".into()
                    } else {
                        "no matching printer is attached".into()
                    })
                })?;
                (printer.id, Some(printer.capabilities))
            }
        };

        let warnings = match &capabilities {
            Some(caps) => {
                let (_, dropped) = filter_options(caps, &request.options);
                dropped
                    .into_iter()
                    .map(|key| format!("option '{key}' is not supported by {printer_id} and was ignored"))
                    .collect()
            }
            None => Vec::new(),
        };

        let options = PrintOptions {
            media: request.media,
            copies: request.copies.unwrap_or(1).max(1),
            job_title: request.job_title,
            extra: request.options,
        };
        let job_id = self
            .dispatcher
            .submit(printer_id, document, document_type, options)?;

        let status = if request.is_async {
            self.dispatcher.status(&job_id)?
        } else {
            self.dispatcher.wait_for_timeout(&job_id, self.sync_wait).await?
        };
        Ok(PrintResponse::new(status, warnings))
    }

    pub fn job_status(&self, job_id: &str) -> Result<JobStatus> {
        let id = JobId::parse(job_id)
            .ok_or_else(|| PrintBridgeError::NotFound(format!("unrecognized job id: {job_id}")))?;
        self.dispatcher.status(&id)
    }
}
