// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PrintBridge: Core types and error definitions shared across all crates.

pub mod config;
pub mod error;
pub mod selector;
pub mod types;

pub use config::DaemonConfig;
pub use error::PrintBridgeError;
pub use selector::PrinterSelector;
pub use types::*;
