// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PrintBridge daemon services, shared by the binary and any HTTP front end
// embedding them.

pub mod services;

pub use services::print_service::{
    ListPrintersResponse, PrintRequest, PrintResponse, PrintService, PrinterInfo,
};
