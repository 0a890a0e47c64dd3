// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Job dispatcher: owns every print job from submission to a terminal state.
//
// `submit` records the job and returns at once; a spawned task then walks it
// through validate -> render -> encode -> transmit. Cheap registry checks run
// before any rasterisation. Rendering and encoding share a bounded blocking
// pool; transmission holds the target printer's lock and is cut off by a
// timeout. Nothing is retried.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::sync::{Semaphore, watch};
use tracing::{debug, error, info, instrument, warn};

use printbridge_core::error::{PrintBridgeError, Result};
use printbridge_core::{
    DaemonConfig, DocumentType, JobFailure, JobId, JobState, JobStatus, MediaSize, PrintJob,
    PrintOptions, Printer, PrinterClass, PrinterId, Reachability,
};
use printbridge_document::{DocumentRenderer, PageStream, RenderRequest};

use crate::encode::{EncodedJob, ProtocolEncoder};
use crate::locks::PrinterLocks;
use crate::queue::JobQueue;
use crate::registry::DeviceRegistry;
use crate::transport::{QueueTransport, RasterTransport};

#[derive(Debug, Clone, Copy)]
pub struct DispatcherConfig {
    pub transmit_timeout: Duration,
    pub render_workers: usize,
    /// Take the per-printer lock for spooler queues as well as USB devices.
    pub serialize_queue_printers: bool,
    pub job_retention: Duration,
    pub encoder: ProtocolEncoder,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self::from(&DaemonConfig::default())
    }
}

impl From<&DaemonConfig> for DispatcherConfig {
    fn from(config: &DaemonConfig) -> Self {
        Self {
            transmit_timeout: config.transmit_timeout(),
            render_workers: config.render_workers.max(1),
            serialize_queue_printers: config.serialize_queue_printers,
            job_retention: config.job_retention(),
            encoder: ProtocolEncoder {
                cut_policy: config.cut_policy,
                high_quality: config.high_quality,
                threshold: config.raster_threshold,
            },
        }
    }
}

/// Cheap to clone; all clones drive the same job table.
#[derive(Clone)]
pub struct JobDispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    registry: Arc<DeviceRegistry>,
    renderer: Arc<dyn DocumentRenderer>,
    queue_transport: Arc<dyn QueueTransport>,
    raster_transport: Arc<dyn RasterTransport>,
    jobs: Mutex<JobQueue>,
    locks: PrinterLocks,
    workers: Arc<Semaphore>,
    config: DispatcherConfig,
    /// Bumped after every job update so waiters can re-check.
    updates: watch::Sender<u64>,
}

impl JobDispatcher {
    /// Jobs a previous process left unfinished are failed here, before any
    /// new submission can reach their printers.
    pub fn new(
        registry: Arc<DeviceRegistry>,
        renderer: Arc<dyn DocumentRenderer>,
        queue_transport: Arc<dyn QueueTransport>,
        raster_transport: Arc<dyn RasterTransport>,
        jobs: JobQueue,
        config: DispatcherConfig,
    ) -> Result<Self> {
        jobs.fail_interrupted()?;
        let (updates, _) = watch::channel(0);
        Ok(Self {
            inner: Arc::new(Inner {
                registry,
                renderer,
                queue_transport,
                raster_transport,
                jobs: Mutex::new(jobs),
                locks: PrinterLocks::new(),
                workers: Arc::new(Semaphore::new(config.render_workers.max(1))),
                config,
                updates,
            }),
        })
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.inner.registry
    }

    /// Record a job and start processing it in the background.
    ///
    /// Must be called from within a Tokio runtime.
    #[instrument(skip(self, document, options), fields(printer = %printer_id, doc_len = document.len()))]
    pub fn submit(
        &self,
        printer_id: PrinterId,
        document: Vec<u8>,
        document_type: DocumentType,
        options: PrintOptions,
    ) -> Result<JobId> {
        let hash = hex::encode(Sha256::digest(&document));
        let job = PrintJob::new(
            printer_id,
            document_type,
            hash,
            document.len() as u64,
            options,
        );
        let job_id = job.id;
        self.inner.with_jobs(|jobs| jobs.insert_job(&job))?;
        self.inner.notify();
        info!(job_id = %job_id, hash = %job.document_hash, "job submitted");

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.run(job, document).await;
        });
        Ok(job_id)
    }

    /// Read-only snapshot of a job.
    pub fn status(&self, job_id: &JobId) -> Result<JobStatus> {
        self.job(job_id).map(|job| job.status())
    }

    pub fn job(&self, job_id: &JobId) -> Result<PrintJob> {
        self.inner
            .with_jobs(|jobs| jobs.get_job(job_id))?
            .ok_or_else(|| PrintBridgeError::NotFound(format!("job {job_id}")))
    }

    /// All retained jobs, newest first.
    pub fn jobs(&self) -> Result<Vec<PrintJob>> {
        self.inner.with_jobs(|jobs| jobs.get_all_jobs())
    }

    /// Wait until the job reaches a terminal state.
    pub async fn wait_for(&self, job_id: &JobId) -> Result<JobStatus> {
        let mut updates = self.inner.updates.subscribe();
        loop {
            let status = self.status(job_id)?;
            if status.job_state.is_terminal() || updates.changed().await.is_err() {
                return Ok(status);
            }
        }
    }

    /// Like [`wait_for`](Self::wait_for), but gives up after `limit` and
    /// returns whatever state the job is in by then.
    pub async fn wait_for_timeout(&self, job_id: &JobId, limit: Duration) -> Result<JobStatus> {
        match tokio::time::timeout(limit, self.wait_for(job_id)).await {
            Ok(status) => status,
            Err(_) => self.status(job_id),
        }
    }

    /// Whether a transmission to `printer_id` currently holds its lock.
    pub fn is_transmitting(&self, printer_id: &PrinterId) -> bool {
        self.inner.locks.is_held(printer_id)
    }

    /// Drop terminal jobs past the retention window and locks of printers
    /// that left the registry.
    pub fn prune(&self) -> Result<usize> {
        let retention = chrono::Duration::from_std(self.inner.config.job_retention)
            .unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(retention)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);
        let removed = self.inner.with_jobs(|jobs| jobs.prune_terminal(cutoff))?;

        let registry = &self.inner.registry;
        self.inner.locks.retain(|id| registry.resolve(id).is_ok());
        Ok(removed)
    }
}

impl Inner {
    fn with_jobs<T>(&self, f: impl FnOnce(&JobQueue) -> Result<T>) -> Result<T> {
        let jobs = self.jobs.lock().expect("job table lock poisoned");
        f(&jobs)
    }

    fn notify(&self) {
        self.updates.send_modify(|n| *n = n.wrapping_add(1));
    }

    fn advance(&self, job_id: &JobId, next: JobState) -> Result<()> {
        self.with_jobs(|jobs| jobs.transition(job_id, next, None))?;
        self.notify();
        debug!(job_id = %job_id, state = next.as_str(), "job advanced");
        Ok(())
    }

    async fn run(self: Arc<Self>, job: PrintJob, document: Vec<u8>) {
        let job_id = job.id;
        match self.process(&job, document).await {
            Ok(remote_job_id) => self.complete(&job_id, remote_job_id),
            Err(e) => self.fail(&job_id, &e),
        }
    }

    fn complete(&self, job_id: &JobId, remote_job_id: Option<String>) {
        let result = self.with_jobs(|jobs| {
            if let Some(remote) = remote_job_id.as_deref() {
                jobs.set_remote_job_id(job_id, remote)?;
            }
            jobs.transition(job_id, JobState::Completed, None)
        });
        match result {
            Ok(_) => info!(job_id = %job_id, remote_job_id = ?remote_job_id, "job completed"),
            Err(e) => error!(job_id = %job_id, error = %e, "failed to record job completion"),
        }
        self.notify();
    }

    fn fail(&self, job_id: &JobId, err: &PrintBridgeError) {
        let failure = JobFailure {
            kind: err.kind(),
            reason: err.to_string(),
        };
        warn!(job_id = %job_id, kind = ?failure.kind, reason = %failure.reason, "job failed");
        if let Err(e) = self.with_jobs(|jobs| jobs.transition(job_id, JobState::Failed, Some(&failure))) {
            error!(job_id = %job_id, error = %e, "failed to record job failure");
        }
        self.notify();
    }

    /// Drive one job to the point of a transport result. Returns the
    /// spooler's job id, if it assigned one.
    async fn process(self: &Arc<Self>, job: &PrintJob, document: Vec<u8>) -> Result<Option<String>> {
        let job_id = &job.id;

        self.advance(job_id, JobState::Validating)?;
        let printer = self.registry.resolve(&job.printer_id)?;
        ensure_online(&printer)?;
        let media = select_media(&printer, &job.options)?;

        self.advance(job_id, JobState::Rendering)?;
        let encoded = self
            .render_and_encode(job_id, printer.clone(), media.clone(), document, job)
            .await?;
        debug!(job_id = %job_id, bytes = encoded.len(), "job encoded");

        let _guard = if printer.class == PrinterClass::DirectRaster
            || self.config.serialize_queue_printers
        {
            Some(self.locks.acquire(&printer.id).await)
        } else {
            None
        };

        // Reachability may have changed while this job waited.
        let printer = self.registry.resolve(&printer.id)?;
        ensure_online(&printer)?;
        if !printer.capabilities.supports_media(&media) {
            return Err(PrintBridgeError::MediaSizeMismatch(format!(
                "{} no longer offers {}",
                printer.id, media.name
            )));
        }

        self.advance(job_id, JobState::Transmitting)?;
        let limit = transmit_window(self.config.transmit_timeout, &encoded);
        match tokio::time::timeout(limit, self.transmit(&printer, encoded)).await {
            Ok(Ok(remote_job_id)) => Ok(remote_job_id),
            Ok(Err(e @ PrintBridgeError::TransmissionFailure(_))) => Err(e),
            Ok(Err(e)) => Err(PrintBridgeError::TransmissionFailure(e.to_string())),
            Err(_) => Err(PrintBridgeError::TransmissionFailure(format!(
                "transmission timed out after {limit:?}"
            ))),
        }
    }

    /// Render and encode on the blocking pool, at most `render_workers`
    /// jobs at a time.
    async fn render_and_encode(
        self: &Arc<Self>,
        job_id: &JobId,
        printer: Printer,
        media: MediaSize,
        document: Vec<u8>,
        job: &PrintJob,
    ) -> Result<EncodedJob> {
        let permit = Arc::clone(&self.workers)
            .acquire_owned()
            .await
            .map_err(|_| PrintBridgeError::RenderFailure("render pool closed".into()))?;

        let inner = Arc::clone(self);
        let job_id = *job_id;
        let document_type = job.document_type;
        let options = job.options.clone();
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let request = RenderRequest {
                media: &media,
                capabilities: &printer.capabilities,
            };
            // Pages are drawn lazily; the job stays in Rendering until the
            // first one exists. Later pages render as the encoder pulls them.
            let mut pages = inner.renderer.render(&document, document_type, request)?;
            let first = pages.next().transpose()?;
            inner.advance(&job_id, JobState::Encoding)?;
            let pages: PageStream = Box::new(first.map(Ok).into_iter().chain(pages));
            inner.config.encoder.encode(&printer, &media, &options, pages)
        })
        .await
        .map_err(|e| PrintBridgeError::RenderFailure(format!("render worker: {e}")))?
    }

    async fn transmit(&self, printer: &Printer, job: EncodedJob) -> Result<Option<String>> {
        match job {
            EncodedJob::Queue {
                document,
                submission,
            } => {
                let receipt = self
                    .queue_transport
                    .submit(&printer.handle, document, &submission)
                    .await?;
                Ok(receipt.remote_job_id.map(|id| id.to_string()))
            }
            EncodedJob::Raster(payload) => {
                let report = self.raster_transport.transmit(&printer.handle, payload).await?;
                debug!(bytes_written = report.bytes_written, "raster stream delivered");
                Ok(None)
            }
        }
    }
}

/// Time allowed for one transmission. Label printers report completion
/// per label, so a raster job gets the base window once per page.
fn transmit_window(base: Duration, job: &EncodedJob) -> Duration {
    match job {
        EncodedJob::Queue { .. } => base,
        EncodedJob::Raster(payload) => base.saturating_mul(payload.pages.max(1)),
    }
}

fn ensure_online(printer: &Printer) -> Result<()> {
    match printer.reachability {
        Reachability::Online => Ok(()),
        other => Err(PrintBridgeError::PrinterOffline(format!(
            "{} is {}",
            printer.id,
            match other {
                Reachability::Offline => "offline",
                _ => "not yet confirmed reachable",
            }
        ))),
    }
}

/// The requested medium (or the printer's default) as the printer
/// advertises it.
fn select_media(printer: &Printer, options: &PrintOptions) -> Result<MediaSize> {
    let caps = &printer.capabilities;
    let requested = match &options.media {
        Some(media) => media,
        None => caps.default_media().ok_or_else(|| {
            PrintBridgeError::MediaSizeMismatch(format!("{} advertises no media", printer.id))
        })?,
    };
    caps.match_media(requested).ok_or_else(|| {
        PrintBridgeError::MediaSizeMismatch(format!(
            "{} ({}x{} mm) on {}",
            requested.name, requested.width_mm, requested.length_mm, printer.id
        ))
    })
}
