// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// End-to-end dispatcher behaviour against recording transports and a
// counting renderer.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use image::{GrayImage, Luma};

use printbridge_core::error::{PrintBridgeError, Result};
use printbridge_core::{
    DocumentType, FailureKind, JobState, MediaSize, PrintOptions, Printer, PrinterClass, PrinterId,
    Reachability, TransportHandle,
};
use printbridge_document::{DocumentRenderer, PagePixels, PageStream, RenderRequest, RenderedPage};
use printbridge_print::raster::{self, BROTHER_VENDOR_ID, models};
use printbridge_print::{
    DeviceRegistry, DispatcherConfig, JobDispatcher, JobQueue, QueueReceipt, QueueSubmission,
    QueueTransport, RasterPayload, RasterTransport, RegistryConfig, TransferReport,
};

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

/// Renders one white page sized to the requested medium. The page is
/// drawn lazily, after `page_delay`.
#[derive(Default)]
struct CountingRenderer {
    calls: AtomicUsize,
    page_delay: Mutex<Duration>,
}

impl DocumentRenderer for CountingRenderer {
    fn render(
        &self,
        _document: &[u8],
        _document_type: DocumentType,
        request: RenderRequest<'_>,
    ) -> Result<PageStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let dpi = request.capabilities.resolution_dpi;
        let dots = request.media.dots_at(dpi);
        let delay = *self.page_delay.lock().unwrap();
        Ok(Box::new(std::iter::once_with(move || {
            std::thread::sleep(delay);
            Ok(RenderedPage {
                index: 0,
                dpi,
                pixels: PagePixels::Gray(GrayImage::from_pixel(
                    dots.width,
                    dots.height,
                    Luma([255]),
                )),
            })
        })))
    }
}

/// One transmission as seen by the fake USB transport.
#[derive(Debug, Clone)]
struct Window {
    printer: TransportHandle,
    start: Instant,
    end: Instant,
}

#[derive(Default)]
struct FakeUsb {
    printers: Mutex<Vec<Printer>>,
    windows: Mutex<Vec<Window>>,
    delay: Mutex<Duration>,
    hang_next: AtomicBool,
    fail_with: Mutex<Option<String>>,
}

#[async_trait]
impl RasterTransport for FakeUsb {
    async fn discover(&self) -> Result<Vec<Printer>> {
        Ok(self.printers.lock().unwrap().clone())
    }

    async fn transmit(&self, handle: &TransportHandle, payload: RasterPayload) -> Result<TransferReport> {
        if self.hang_next.swap(false, Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        let failure = self.fail_with.lock().unwrap().clone();
        if let Some(reason) = failure {
            return Err(PrintBridgeError::TransmissionFailure(reason));
        }
        let start = Instant::now();
        let delay = *self.delay.lock().unwrap();
        tokio::time::sleep(delay).await;
        self.windows.lock().unwrap().push(Window {
            printer: handle.clone(),
            start,
            end: Instant::now(),
        });
        Ok(TransferReport {
            bytes_written: payload.bytes.len(),
            final_status: None,
        })
    }
}

#[derive(Default)]
struct FakeCups {
    printers: Mutex<Vec<Printer>>,
    submissions: Mutex<Vec<QueueSubmission>>,
}

#[async_trait]
impl QueueTransport for FakeCups {
    async fn discover(&self) -> Result<Vec<Printer>> {
        Ok(self.printers.lock().unwrap().clone())
    }

    async fn submit(
        &self,
        _handle: &TransportHandle,
        document: Vec<u8>,
        submission: &QueueSubmission,
    ) -> Result<QueueReceipt> {
        assert!(document.starts_with(b"%PDF"));
        self.submissions.lock().unwrap().push(submission.clone());
        Ok(QueueReceipt {
            remote_job_id: Some(42),
            state_reasons: Vec::new(),
        })
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn label_printer(serial: &str) -> Printer {
    let model = models::by_name("QL-820NWB").unwrap();
    Printer {
        id: PrinterId::usb(BROTHER_VENDOR_ID, model.product_id, Some(serial)),
        class: PrinterClass::DirectRaster,
        label: format!("Brother QL-820NWB ({serial})"),
        model: model.name.into(),
        capabilities: raster::capabilities(model),
        reachability: Reachability::Online,
        state_reasons: Vec::new(),
        handle: TransportHandle::Usb {
            vendor_id: BROTHER_VENDOR_ID,
            product_id: model.product_id,
            serial: Some(serial.into()),
        },
        epoch: 0,
    }
}

fn office_printer() -> Printer {
    Printer {
        id: PrinterId::queue("Office"),
        class: PrinterClass::QueueManaged,
        label: "Office Laser".into(),
        model: "HP LaserJet 4000".into(),
        capabilities: printbridge_core::Capabilities {
            media_sizes: vec![MediaSize::new("iso_a6_105x148mm", 105.0, 148.0)],
            continuous_media: Vec::new(),
            resolution_dpi: 72,
            color: false,
            supported_options: BTreeMap::new(),
        },
        reachability: Reachability::Online,
        state_reasons: Vec::new(),
        handle: TransportHandle::Queue {
            queue_name: "Office".into(),
            uri: "ipp://localhost:631/printers/Office".into(),
        },
        epoch: 0,
    }
}

struct Harness {
    dispatcher: JobDispatcher,
    renderer: Arc<CountingRenderer>,
    usb: Arc<FakeUsb>,
    cups: Arc<FakeCups>,
}

async fn harness(queued: Vec<Printer>, attached: Vec<Printer>, transmit_timeout: Duration) -> Harness {
    let usb = Arc::new(FakeUsb::default());
    let cups = Arc::new(FakeCups::default());
    *usb.printers.lock().unwrap() = attached;
    *cups.printers.lock().unwrap() = queued;

    let registry = Arc::new(DeviceRegistry::new(
        cups.clone(),
        usb.clone(),
        RegistryConfig {
            grace_scans: 2,
            recovery_scans: 2,
            discovery_timeout: Duration::from_secs(1),
            refresh_interval: Duration::from_secs(60),
        },
    ));
    registry.refresh().await;

    let renderer = Arc::new(CountingRenderer::default());
    let config = DispatcherConfig {
        transmit_timeout,
        render_workers: 4,
        ..Default::default()
    };
    let dispatcher = JobDispatcher::new(
        registry,
        renderer.clone(),
        cups.clone(),
        usb.clone(),
        JobQueue::open_in_memory().unwrap(),
        config,
    )
    .unwrap();

    Harness {
        dispatcher,
        renderer,
        usb,
        cups,
    }
}

fn submit(h: &Harness, printer: &PrinterId) -> printbridge_core::JobId {
    h.dispatcher
        .submit(
            printer.clone(),
            b"fake image".to_vec(),
            DocumentType::Png,
            PrintOptions::default(),
        )
        .unwrap()
}

const WAIT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_printer_fails_without_rendering() {
    let h = harness(Vec::new(), vec![label_printer("A1")], Duration::from_secs(5)).await;

    let job = submit(&h, &PrinterId::from("usb:04f9:ffff:NOPE"));
    let status = h.dispatcher.wait_for_timeout(&job, WAIT).await.unwrap();

    assert_eq!(status.job_state, JobState::Failed);
    assert_eq!(status.result_code, Some(FailureKind::NotFound));
    assert_eq!(h.renderer.calls.load(Ordering::SeqCst), 0);
    assert!(h.usb.windows.lock().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn job_stays_rendering_until_first_page_is_drawn() {
    let h = harness(Vec::new(), vec![label_printer("A1")], Duration::from_secs(5)).await;
    *h.renderer.page_delay.lock().unwrap() = Duration::from_millis(400);

    let job = submit(&h, &label_printer("A1").id);
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(h.dispatcher.status(&job).unwrap().job_state, JobState::Rendering);

    let status = h.dispatcher.wait_for_timeout(&job, WAIT).await.unwrap();
    assert_eq!(status.job_state, JobState::Completed);
}

#[tokio::test]
async fn offline_printer_fails_without_rendering() {
    let mut stopped = office_printer();
    stopped.reachability = Reachability::Offline;
    let h = harness(vec![stopped], Vec::new(), Duration::from_secs(5)).await;

    let job = submit(&h, &PrinterId::queue("Office"));
    let status = h.dispatcher.wait_for_timeout(&job, WAIT).await.unwrap();

    assert_eq!(status.result_code, Some(FailureKind::PrinterOffline));
    assert_eq!(h.renderer.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unsupported_media_fails_without_rendering() {
    let h = harness(Vec::new(), vec![label_printer("A1")], Duration::from_secs(5)).await;
    let printer = label_printer("A1");

    let job = h
        .dispatcher
        .submit(
            printer.id.clone(),
            b"fake image".to_vec(),
            DocumentType::Png,
            PrintOptions {
                media: Some(MediaSize::new("iso_a4_210x297mm", 210.0, 297.0)),
                ..Default::default()
            },
        )
        .unwrap();
    let status = h.dispatcher.wait_for_timeout(&job, WAIT).await.unwrap();

    assert_eq!(status.result_code, Some(FailureKind::MediaSizeMismatch));
    assert_eq!(h.renderer.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn same_printer_transmissions_never_overlap() {
    let printer = label_printer("A1");
    let h = harness(Vec::new(), vec![printer.clone()], Duration::from_secs(5)).await;
    *h.usb.delay.lock().unwrap() = Duration::from_millis(100);

    let jobs: Vec<_> = (0..3).map(|_| submit(&h, &printer.id)).collect();
    for job in &jobs {
        let status = h.dispatcher.wait_for_timeout(job, WAIT).await.unwrap();
        assert_eq!(status.job_state, JobState::Completed, "{status:?}");
    }

    let mut windows = h.usb.windows.lock().unwrap().clone();
    assert_eq!(windows.len(), 3);
    windows.sort_by_key(|w| w.start);
    for pair in windows.windows(2) {
        assert!(pair[1].start >= pair[0].end, "overlapping transmissions: {pair:?}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn different_printers_transmit_in_parallel() {
    let a = label_printer("A1");
    let b = label_printer("B2");
    let h = harness(Vec::new(), vec![a.clone(), b.clone()], Duration::from_secs(5)).await;
    *h.usb.delay.lock().unwrap() = Duration::from_millis(500);

    let job_a = submit(&h, &a.id);
    let job_b = submit(&h, &b.id);
    for job in [&job_a, &job_b] {
        let status = h.dispatcher.wait_for_timeout(job, WAIT).await.unwrap();
        assert_eq!(status.job_state, JobState::Completed, "{status:?}");
    }

    let windows = h.usb.windows.lock().unwrap().clone();
    assert_eq!(windows.len(), 2);
    let (first, second) = (&windows[0], &windows[1]);
    assert_ne!(first.printer, second.printer);
    assert!(
        first.start < second.end && second.start < first.end,
        "transmissions to different printers were serialised: {windows:?}"
    );
}

#[tokio::test]
async fn transmission_timeout_fails_and_releases_lock() {
    let printer = label_printer("A1");
    let h = harness(Vec::new(), vec![printer.clone()], Duration::from_millis(200)).await;
    h.usb.hang_next.store(true, Ordering::SeqCst);

    let stuck = submit(&h, &printer.id);
    let status = h.dispatcher.wait_for_timeout(&stuck, WAIT).await.unwrap();
    assert_eq!(status.job_state, JobState::Failed);
    assert_eq!(status.result_code, Some(FailureKind::TransmissionFailure));
    assert!(status.job_state_reasons[0].contains("timed out"));
    assert!(!h.dispatcher.is_transmitting(&printer.id));

    let next = submit(&h, &printer.id);
    let status = h.dispatcher.wait_for_timeout(&next, WAIT).await.unwrap();
    assert_eq!(status.job_state, JobState::Completed);
}

#[tokio::test]
async fn backend_error_is_kept_as_reason() {
    let printer = label_printer("A1");
    let h = harness(Vec::new(), vec![printer.clone()], Duration::from_secs(5)).await;
    *h.usb.fail_with.lock().unwrap() = Some("cover open, no media".into());

    let job = submit(&h, &printer.id);
    let status = h.dispatcher.wait_for_timeout(&job, WAIT).await.unwrap();

    assert_eq!(status.result_code, Some(FailureKind::TransmissionFailure));
    assert!(status.job_state_reasons[0].contains("cover open, no media"));
    assert_eq!(h.renderer.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn queue_job_records_spooler_job_id() {
    let h = harness(vec![office_printer()], Vec::new(), Duration::from_secs(5)).await;

    let job = h
        .dispatcher
        .submit(
            PrinterId::queue("Office"),
            b"fake image".to_vec(),
            DocumentType::Png,
            PrintOptions {
                copies: 2,
                job_title: Some("Invoice 17".into()),
                ..Default::default()
            },
        )
        .unwrap();
    let status = h.dispatcher.wait_for_timeout(&job, WAIT).await.unwrap();

    assert_eq!(status.job_state, JobState::Completed, "{status:?}");
    assert_eq!(status.remote_job_id.as_deref(), Some("42"));
    let submissions = h.cups.submissions.lock().unwrap();
    assert_eq!(submissions[0].copies, 2);
    assert_eq!(submissions[0].job_title, "Invoice 17");
    assert_eq!(submissions[0].media.as_deref(), Some("iso_a6_105x148mm"));
}

#[tokio::test]
async fn listing_merges_both_backends() {
    let h = harness(vec![office_printer()], vec![label_printer("A1")], Duration::from_secs(5)).await;

    let printers = h.dispatcher.registry().list_printers();
    assert_eq!(printers.len(), 2);
    let classes: Vec<_> = printers.iter().map(|p| (p.id.as_str().to_owned(), p.class)).collect();
    assert!(classes.contains(&("queue:Office".into(), PrinterClass::QueueManaged)));
    assert!(classes.contains(&(label_printer("A1").id.0, PrinterClass::DirectRaster)));
}

#[tokio::test]
async fn vanished_printer_recovers_without_duplicate() {
    let printer = label_printer("A1");
    let h = harness(Vec::new(), vec![printer.clone()], Duration::from_secs(5)).await;
    let registry = h.dispatcher.registry();

    h.usb.printers.lock().unwrap().clear();
    registry.refresh().await;
    assert_eq!(registry.resolve(&printer.id).unwrap().reachability, Reachability::Offline);

    // A job for an offline printer fails fast.
    let job = submit(&h, &printer.id);
    let status = h.dispatcher.wait_for_timeout(&job, WAIT).await.unwrap();
    assert_eq!(status.result_code, Some(FailureKind::PrinterOffline));

    h.usb.printers.lock().unwrap().push(printer.clone());
    registry.refresh().await;
    registry.refresh().await;
    assert_eq!(registry.resolve(&printer.id).unwrap().reachability, Reachability::Online);
    assert_eq!(registry.list_printers().len(), 1);
}

#[tokio::test]
async fn unknown_job_is_not_found() {
    let h = harness(Vec::new(), Vec::new(), Duration::from_secs(5)).await;
    let err = h.dispatcher.status(&printbridge_core::JobId::new()).unwrap_err();
    assert!(matches!(err, PrintBridgeError::NotFound(_)));
}
