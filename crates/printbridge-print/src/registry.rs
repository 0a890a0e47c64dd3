// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Device registry: the live set of spooler queues and USB label printers.
//
// Each discovery pass enumerates both backends and merges the result into
// per-printer tracking state keyed by stable printer id. A printer missing
// from a scan goes offline and is only dropped after `grace_scans` misses;
// a returning printer needs `recovery_scans` consecutive sightings before it
// is trusted again. Readers always see a complete snapshot: the map is
// rebuilt off to the side and swapped in behind an `Arc`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, warn};

use printbridge_core::error::{PrintBridgeError, Result};
use printbridge_core::{DaemonConfig, Printer, PrinterClass, PrinterId, PrinterSelector, Reachability};

use crate::transport::{QueueTransport, RasterTransport};

/// Discovery policy knobs.
#[derive(Debug, Clone, Copy)]
pub struct RegistryConfig {
    pub grace_scans: u32,
    pub recovery_scans: u32,
    pub discovery_timeout: Duration,
    pub refresh_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self::from(&DaemonConfig::default())
    }
}

impl From<&DaemonConfig> for RegistryConfig {
    fn from(config: &DaemonConfig) -> Self {
        Self {
            grace_scans: config.grace_scans.max(1),
            recovery_scans: config.recovery_scans.max(1),
            discovery_timeout: config.discovery_timeout(),
            refresh_interval: config.refresh_interval(),
        }
    }
}

/// A printer plus the counters that drive its reachability.
#[derive(Debug, Clone)]
struct Tracked {
    printer: Printer,
    /// Consecutive scans the printer was not reported.
    missed: u32,
    /// Consecutive scans the printer was reported reachable.
    streak: u32,
}

type Snapshot = Arc<HashMap<PrinterId, Tracked>>;

/// Outcome of one discovery pass, for logging and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub queue_found: usize,
    pub raster_found: usize,
    pub online: usize,
    pub offline: usize,
    pub removed: usize,
}

pub struct DeviceRegistry {
    queue: Arc<dyn QueueTransport>,
    raster: Arc<dyn RasterTransport>,
    config: RegistryConfig,
    snapshot: RwLock<Snapshot>,
    /// Serialises discovery passes; readers never take it.
    refresh_lock: tokio::sync::Mutex<()>,
    last_refresh: Mutex<Option<Instant>>,
}

impl DeviceRegistry {
    pub fn new(
        queue: Arc<dyn QueueTransport>,
        raster: Arc<dyn RasterTransport>,
        config: RegistryConfig,
    ) -> Self {
        Self {
            queue,
            raster,
            config,
            snapshot: RwLock::new(Arc::new(HashMap::new())),
            refresh_lock: tokio::sync::Mutex::new(()),
            last_refresh: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    fn current(&self) -> Snapshot {
        Arc::clone(&self.snapshot.read().expect("registry snapshot lock poisoned"))
    }

    /// Every known printer, ordered by id.
    pub fn list_printers(&self) -> Vec<Printer> {
        let snapshot = self.current();
        let mut printers: Vec<Printer> = snapshot.values().map(|t| t.printer.clone()).collect();
        printers.sort_by(|a, b| a.id.cmp(&b.id));
        printers
    }

    pub fn list_matching(&self, selector: &PrinterSelector) -> Vec<Printer> {
        self.list_printers()
            .into_iter()
            .filter(|printer| selector.matches(printer))
            .collect()
    }

    /// The first printer (by id) matching `selector`.
    pub fn select(&self, selector: &PrinterSelector) -> Result<Printer> {
        self.list_matching(selector)
            .into_iter()
            .next()
            .ok_or_else(|| PrintBridgeError::NotFound(format!("no printer matches {selector:?}")))
    }

    /// Look up a printer with its latest known reachability.
    pub fn resolve(&self, printer_id: &PrinterId) -> Result<Printer> {
        self.current()
            .get(printer_id)
            .map(|t| t.printer.clone())
            .ok_or_else(|| PrintBridgeError::NotFound(format!("printer {printer_id}")))
    }

    /// Refresh only if the last pass is older than the refresh interval.
    pub async fn ensure_fresh(&self) -> Option<RefreshSummary> {
        let stale = {
            let last = self.last_refresh.lock().expect("refresh clock lock poisoned");
            last.is_none_or(|at| at.elapsed() >= self.config.refresh_interval)
        };
        if stale {
            Some(self.refresh().await)
        } else {
            None
        }
    }

    /// Run discovery against both backends and merge the results.
    ///
    /// A backend that errors or exceeds the discovery timeout contributes
    /// zero printers to this pass; the other backend is unaffected.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> RefreshSummary {
        let _pass = self.refresh_lock.lock().await;

        let (queued, raster) = tokio::join!(
            self.scan(PrinterClass::QueueManaged, self.queue.discover()),
            self.scan(PrinterClass::DirectRaster, self.raster.discover()),
        );

        let mut summary = RefreshSummary {
            queue_found: queued.len(),
            raster_found: raster.len(),
            ..Default::default()
        };

        let previous = self.current();
        let found = queued.into_iter().chain(raster);
        let (next, removed) = merge(&previous, found, &self.config);
        summary.removed = removed;
        for tracked in next.values() {
            match tracked.printer.reachability {
                Reachability::Online => summary.online += 1,
                Reachability::Offline => summary.offline += 1,
                Reachability::Unknown => {}
            }
        }

        *self.snapshot.write().expect("registry snapshot lock poisoned") = Arc::new(next);
        *self.last_refresh.lock().expect("refresh clock lock poisoned") = Some(Instant::now());

        debug!(?summary, "discovery pass complete");
        summary
    }

    async fn scan<F>(&self, class: PrinterClass, discovery: F) -> Vec<Printer>
    where
        F: Future<Output = Result<Vec<Printer>>>,
    {
        let system = class.print_system();
        match tokio::time::timeout(self.config.discovery_timeout, discovery).await {
            Ok(Ok(mut printers)) => {
                for printer in &mut printers {
                    printer.class = class;
                }
                debug!(system, count = printers.len(), "backend enumerated");
                printers
            }
            Ok(Err(e)) => {
                warn!(system, error = %e, "printer discovery failed, treating as empty");
                Vec::new()
            }
            Err(_) => {
                warn!(
                    system,
                    timeout_ms = self.config.discovery_timeout.as_millis() as u64,
                    "printer discovery timed out, treating as empty"
                );
                Vec::new()
            }
        }
    }
}

/// Fold one scan into the previous tracking state. Returns the new map and
/// the number of printers dropped after exhausting their grace window.
fn merge(
    previous: &HashMap<PrinterId, Tracked>,
    found: impl IntoIterator<Item = Printer>,
    config: &RegistryConfig,
) -> (HashMap<PrinterId, Tracked>, usize) {
    let mut next: HashMap<PrinterId, Tracked> = HashMap::new();

    for mut printer in found {
        if next.contains_key(&printer.id) {
            debug!(printer = %printer.id, "duplicate printer in scan ignored");
            continue;
        }
        let reported_offline = printer.reachability == Reachability::Offline;

        let tracked = match previous.get(&printer.id) {
            None => {
                let streak = if reported_offline { 0 } else { config.recovery_scans };
                printer.reachability = if reported_offline {
                    Reachability::Offline
                } else {
                    Reachability::Online
                };
                printer.epoch = 0;
                info!(printer = %printer.id, label = %printer.label, "printer discovered");
                Tracked {
                    printer,
                    missed: 0,
                    streak,
                }
            }
            Some(prev) => {
                printer.epoch = prev.printer.epoch;
                if printer.capabilities != prev.printer.capabilities {
                    printer.epoch += 1;
                    info!(printer = %printer.id, epoch = printer.epoch, "printer capabilities changed");
                }

                let streak = if reported_offline {
                    0
                } else {
                    prev.streak.saturating_add(1)
                };
                printer.reachability = if reported_offline {
                    Reachability::Offline
                } else if streak >= config.recovery_scans {
                    Reachability::Online
                } else {
                    Reachability::Unknown
                };
                if printer.reachability != prev.printer.reachability {
                    info!(
                        printer = %printer.id,
                        from = ?prev.printer.reachability,
                        to = ?printer.reachability,
                        "printer reachability changed"
                    );
                }
                Tracked {
                    printer,
                    missed: 0,
                    streak,
                }
            }
        };
        next.insert(tracked.printer.id.clone(), tracked);
    }

    let mut removed = 0;
    for (id, prev) in previous {
        if next.contains_key(id) {
            continue;
        }
        let missed = prev.missed + 1;
        if missed > config.grace_scans {
            info!(printer = %id, missed, "printer removed after grace window");
            removed += 1;
            continue;
        }
        let mut printer = prev.printer.clone();
        if printer.reachability != Reachability::Offline {
            info!(printer = %id, "printer missing from scan, marking offline");
        }
        printer.reachability = Reachability::Offline;
        next.insert(
            id.clone(),
            Tracked {
                printer,
                missed,
                streak: 0,
            },
        );
    }

    (next, removed)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use printbridge_core::{Capabilities, MediaSize, TransportHandle};

    use super::*;
    use crate::transport::{QueueReceipt, QueueSubmission, RasterPayload, TransferReport};

    fn caps(media: &str) -> Capabilities {
        Capabilities {
            media_sizes: vec![MediaSize::new(media, 62.0, 29.0)],
            continuous_media: Vec::new(),
            resolution_dpi: 300,
            color: false,
            supported_options: BTreeMap::new(),
        }
    }

    fn printer(id: &str, class: PrinterClass) -> Printer {
        Printer {
            id: PrinterId::from(id),
            class,
            label: id.to_owned(),
            model: "test".into(),
            capabilities: caps("62x29"),
            reachability: Reachability::Online,
            state_reasons: Vec::new(),
            handle: TransportHandle::Queue {
                queue_name: id.to_owned(),
                uri: format!("ipp://localhost:631/printers/{id}"),
            },
            epoch: 0,
        }
    }

    /// Backend returning whatever printers are currently loaded into it.
    #[derive(Default)]
    struct Scripted {
        printers: Mutex<Vec<Printer>>,
        fail: AtomicBool,
        hang: AtomicBool,
    }

    impl Scripted {
        fn set(&self, printers: Vec<Printer>) {
            *self.printers.lock().unwrap() = printers;
        }

        async fn enumerate(&self) -> Result<Vec<Printer>> {
            if self.hang.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(PrintBridgeError::Discovery("backend down".into()));
            }
            Ok(self.printers.lock().unwrap().clone())
        }
    }

    #[async_trait]
    impl QueueTransport for Scripted {
        async fn discover(&self) -> Result<Vec<Printer>> {
            self.enumerate().await
        }

        async fn submit(
            &self,
            _handle: &TransportHandle,
            _document: Vec<u8>,
            _submission: &QueueSubmission,
        ) -> Result<QueueReceipt> {
            Ok(QueueReceipt::default())
        }
    }

    #[async_trait]
    impl RasterTransport for Scripted {
        async fn discover(&self) -> Result<Vec<Printer>> {
            self.enumerate().await
        }

        async fn transmit(
            &self,
            _handle: &TransportHandle,
            payload: RasterPayload,
        ) -> Result<TransferReport> {
            Ok(TransferReport {
                bytes_written: payload.bytes.len(),
                final_status: None,
            })
        }
    }

    fn registry(grace_scans: u32) -> (DeviceRegistry, Arc<Scripted>, Arc<Scripted>) {
        let queue = Arc::new(Scripted::default());
        let raster = Arc::new(Scripted::default());
        let config = RegistryConfig {
            grace_scans,
            recovery_scans: 2,
            discovery_timeout: Duration::from_millis(100),
            refresh_interval: Duration::from_secs(60),
        };
        let registry = DeviceRegistry::new(queue.clone(), raster.clone(), config);
        (registry, queue, raster)
    }

    #[tokio::test]
    async fn both_backends_merge_with_their_class() {
        let (registry, queue, raster) = registry(2);
        queue.set(vec![printer("queue:Office", PrinterClass::DirectRaster)]);
        raster.set(vec![printer("usb:04f9:209d:A1", PrinterClass::DirectRaster)]);

        let summary = registry.refresh().await;
        assert_eq!((summary.queue_found, summary.raster_found), (1, 1));

        let listed = registry.list_printers();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id.as_str(), "queue:Office");
        assert_eq!(listed[0].class, PrinterClass::QueueManaged);
        assert_eq!(listed[1].class, PrinterClass::DirectRaster);
        assert!(listed.iter().all(|p| p.reachability == Reachability::Online));
    }

    #[tokio::test]
    async fn missing_printer_goes_offline_then_recovers() {
        let (registry, _queue, raster) = registry(2);
        let id = PrinterId::from("usb:04f9:209d:A1");
        raster.set(vec![printer(id.as_str(), PrinterClass::DirectRaster)]);
        registry.refresh().await;

        raster.set(Vec::new());
        registry.refresh().await;
        assert_eq!(registry.resolve(&id).unwrap().reachability, Reachability::Offline);

        raster.set(vec![printer(id.as_str(), PrinterClass::DirectRaster)]);
        registry.refresh().await;
        assert_eq!(registry.resolve(&id).unwrap().reachability, Reachability::Unknown);

        registry.refresh().await;
        assert_eq!(registry.resolve(&id).unwrap().reachability, Reachability::Online);
        assert_eq!(registry.list_printers().len(), 1);
    }

    #[tokio::test]
    async fn printer_removed_after_grace_window() {
        let (registry, queue, _raster) = registry(2);
        queue.set(vec![printer("queue:Office", PrinterClass::QueueManaged)]);
        registry.refresh().await;

        queue.set(Vec::new());
        registry.refresh().await;
        registry.refresh().await;
        assert_eq!(registry.list_printers().len(), 1);

        let summary = registry.refresh().await;
        assert_eq!(summary.removed, 1);
        let err = registry.resolve(&PrinterId::from("queue:Office")).unwrap_err();
        assert!(matches!(err, PrintBridgeError::NotFound(_)));
    }

    #[tokio::test]
    async fn zero_grace_still_keeps_printer_for_one_scan() {
        let config = RegistryConfig::from(&DaemonConfig {
            grace_scans: 0,
            ..Default::default()
        });
        assert_eq!(config.grace_scans, 1);

        let queue = Arc::new(Scripted::default());
        let raster = Arc::new(Scripted::default());
        let registry = DeviceRegistry::new(queue.clone(), raster.clone(), config);
        let id = PrinterId::from("queue:Office");
        queue.set(vec![printer(id.as_str(), PrinterClass::QueueManaged)]);
        registry.refresh().await;

        queue.set(Vec::new());
        let summary = registry.refresh().await;
        assert_eq!(summary.removed, 0);
        assert_eq!(registry.resolve(&id).unwrap().reachability, Reachability::Offline);

        let summary = registry.refresh().await;
        assert_eq!(summary.removed, 1);
    }

    #[tokio::test]
    async fn failing_backend_does_not_hide_the_other() {
        let (registry, queue, raster) = registry(2);
        queue.set(vec![printer("queue:Office", PrinterClass::QueueManaged)]);
        raster.set(vec![printer("usb:04f9:209d:A1", PrinterClass::DirectRaster)]);
        raster.fail.store(true, Ordering::SeqCst);

        let summary = registry.refresh().await;
        assert_eq!((summary.queue_found, summary.raster_found), (1, 0));
        assert_eq!(registry.list_printers().len(), 1);
    }

    #[tokio::test]
    async fn hung_backend_times_out() {
        let (registry, queue, raster) = registry(2);
        queue.set(vec![printer("queue:Office", PrinterClass::QueueManaged)]);
        queue.hang.store(true, Ordering::SeqCst);
        raster.set(vec![printer("usb:04f9:209d:A1", PrinterClass::DirectRaster)]);

        let summary = registry.refresh().await;
        assert_eq!((summary.queue_found, summary.raster_found), (0, 1));
    }

    #[tokio::test]
    async fn backend_offline_report_keeps_printer() {
        let (registry, queue, _raster) = registry(2);
        let mut stopped = printer("queue:Office", PrinterClass::QueueManaged);
        stopped.reachability = Reachability::Offline;
        queue.set(vec![stopped]);

        registry.refresh().await;
        registry.refresh().await;
        registry.refresh().await;
        registry.refresh().await;
        let listed = registry.list_printers();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].reachability, Reachability::Offline);
    }

    #[tokio::test]
    async fn capability_change_bumps_epoch() {
        let (registry, queue, _raster) = registry(2);
        queue.set(vec![printer("queue:Office", PrinterClass::QueueManaged)]);
        registry.refresh().await;
        registry.refresh().await;
        let id = PrinterId::from("queue:Office");
        assert_eq!(registry.resolve(&id).unwrap().epoch, 0);

        let mut changed = printer("queue:Office", PrinterClass::QueueManaged);
        changed.capabilities = caps("a4");
        queue.set(vec![changed]);
        registry.refresh().await;
        assert_eq!(registry.resolve(&id).unwrap().epoch, 1);
    }

    #[tokio::test]
    async fn ensure_fresh_respects_interval() {
        let (registry, _queue, _raster) = registry(2);
        assert!(registry.ensure_fresh().await.is_some());
        assert!(registry.ensure_fresh().await.is_none());
    }

    #[tokio::test]
    async fn selector_picks_first_match() {
        let (registry, queue, raster) = registry(2);
        queue.set(vec![printer("queue:Office", PrinterClass::QueueManaged)]);
        raster.set(vec![printer("usb:04f9:209d:A1", PrinterClass::DirectRaster)]);
        registry.refresh().await;

        let selector = PrinterSelector {
            print_system: Some("brother_ql".into()),
            ..Default::default()
        };
        let picked = registry.select(&selector).unwrap();
        assert_eq!(picked.class, PrinterClass::DirectRaster);
    }
}
