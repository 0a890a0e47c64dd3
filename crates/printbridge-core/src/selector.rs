// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Printer selection by name, print system, or label/model prefix.

use serde::{Deserialize, Serialize};

use crate::error::{PrintBridgeError, Result};
use crate::types::{Printer, PrinterClass};

/// Filter applied to printer listings and to submissions that do not name
/// an exact printer id. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PrinterSelector {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub print_system: Option<String>,
    #[serde(default)]
    pub name_prefix: String,
    #[serde(default)]
    pub model_prefix: String,
}

impl PrinterSelector {
    /// Reject selectors naming a print system this daemon does not have.
    pub fn validate(&self) -> Result<()> {
        if let Some(system) = self.print_system.as_deref() {
            if PrinterClass::from_print_system(system).is_none() {
                return Err(PrintBridgeError::NotFound(format!(
                    "print system '{system}' (expected one of: cups, brother_ql)"
                )));
            }
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.print_system.is_none()
            && self.name_prefix.is_empty()
            && self.model_prefix.is_empty()
    }

    pub fn matches(&self, printer: &Printer) -> bool {
        if let Some(name) = self.name.as_deref() {
            if printer.label != name && printer.id.as_str() != name {
                return false;
            }
        }
        if let Some(system) = self.print_system.as_deref() {
            if printer.class.print_system() != system {
                return false;
            }
        }
        starts_with_ignore_case(&printer.label, &self.name_prefix)
            && starts_with_ignore_case(&printer.model, &self.model_prefix)
    }
}

fn starts_with_ignore_case(value: &str, prefix: &str) -> bool {
    value.to_lowercase().starts_with(&prefix.to_lowercase())
}
