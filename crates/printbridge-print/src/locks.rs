// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// One transmission lock per printer id.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use printbridge_core::PrinterId;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Guard held for the whole of a transmission. Dropping it, on any path,
/// lets the next job for the same printer through.
pub type TransmitGuard = OwnedMutexGuard<()>;

#[derive(Default)]
pub struct PrinterLocks {
    locks: Mutex<HashMap<PrinterId, Arc<AsyncMutex<()>>>>,
}

impl PrinterLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, printer_id: &PrinterId) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().expect("printer lock map poisoned");
        Arc::clone(
            locks
                .entry(printer_id.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        )
    }

    /// Wait for exclusive use of `printer_id`. Waiters are served in
    /// arrival order.
    pub async fn acquire(&self, printer_id: &PrinterId) -> TransmitGuard {
        self.lock_for(printer_id).lock_owned().await
    }

    pub fn is_held(&self, printer_id: &PrinterId) -> bool {
        self.lock_for(printer_id).try_lock().is_err()
    }

    /// Drop locks for printers that left the registry and are not in use.
    pub fn retain(&self, mut keep: impl FnMut(&PrinterId) -> bool) {
        let mut locks = self.locks.lock().expect("printer lock map poisoned");
        locks.retain(|id, lock| keep(id) || Arc::strong_count(lock) > 1);
    }
}
