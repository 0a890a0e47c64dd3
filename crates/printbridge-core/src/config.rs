// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Daemon configuration, read once at startup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PrintBridgeError, Result};
use crate::types::{CutPolicy, Threshold};

/// Default port of the browser-facing HTTP listener.
pub const DEFAULT_PORT: u16 = 3888;

/// Startup settings. Not mutable while the daemon runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Port for the HTTP listener.
    pub listen_port: u16,
    /// Bind to all interfaces instead of loopback only.
    pub enable_external_access: bool,
    /// Seconds between periodic discovery passes.
    pub refresh_interval_secs: u64,
    /// Upper bound on a single backend enumeration call.
    pub discovery_timeout_secs: u64,
    /// Upper bound on a single transmission attempt. Label printer jobs
    /// get this window once per label, since the transfer waits for each
    /// label to finish printing.
    pub transmit_timeout_secs: u64,
    /// When direct-raster printers cut labels.
    pub cut_policy: CutPolicy,
    /// Consecutive missed scans a printer stays offline before removal.
    pub grace_scans: u32,
    /// Consecutive present scans needed to bring an offline printer back.
    pub recovery_scans: u32,
    /// Size of the shared render/encode worker pool.
    pub render_workers: usize,
    /// How long terminal jobs stay queryable.
    pub job_retention_secs: u64,
    /// SQLite file for job history; in-memory when unset.
    pub job_history_path: Option<PathBuf>,
    /// Serialise transmissions to spooler printers as well as USB ones.
    pub serialize_queue_printers: bool,
    /// Spooler endpoint used for queue-managed printers.
    pub cups_uri: String,
    /// Request the high-quality raster mode on label printers.
    pub high_quality: bool,
    /// Black/white cut-off for label printers.
    pub raster_threshold: Threshold,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen_port: DEFAULT_PORT,
            enable_external_access: false,
            refresh_interval_secs: 30,
            discovery_timeout_secs: 5,
            transmit_timeout_secs: 30,
            cut_policy: CutPolicy::EachLabel,
            grace_scans: 2,
            recovery_scans: 2,
            render_workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            job_retention_secs: 3600,
            job_history_path: None,
            serialize_queue_printers: true,
            cups_uri: "ipp://localhost:631/".into(),
            high_quality: true,
            raster_threshold: Threshold::default(),
        }
    }
}

impl DaemonConfig {
    /// Load from a JSON file. A missing file yields the defaults; a file
    /// that exists but does not parse is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let data = match std::fs::read_to_string(path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(err.into()),
        };
        let config: Self = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.transmit_timeout_secs == 0 {
            return Err(PrintBridgeError::Config(
                "transmit_timeout_secs must be positive".into(),
            ));
        }
        if self.render_workers == 0 {
            return Err(PrintBridgeError::Config(
                "render_workers must be at least 1".into(),
            ));
        }
        if self.grace_scans == 0 {
            return Err(PrintBridgeError::Config(
                "grace_scans must be at least 1".into(),
            ));
        }
        if self.recovery_scans == 0 {
            return Err(PrintBridgeError::Config(
                "recovery_scans must be at least 1".into(),
            ));
        }
        if let Threshold::Percent(p) = self.raster_threshold {
            if p > 100 {
                return Err(PrintBridgeError::Config(format!(
                    "raster_threshold percent {p} out of range"
                )));
            }
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        let host = if self.enable_external_access {
            "0.0.0.0"
        } else {
            "127.0.0.1"
        };
        format!("{host}:{}", self.listen_port)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery_timeout_secs)
    }

    pub fn transmit_timeout(&self) -> Duration {
        Duration::from_secs(self.transmit_timeout_secs)
    }

    pub fn job_retention(&self) -> Duration {
        Duration::from_secs(self.job_retention_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_fills_defaults() {
        let config: DaemonConfig =
            serde_json::from_str(r#"{"cut_policy":"end_of_job","grace_scans":4}"#).unwrap();
        assert_eq!(config.cut_policy, CutPolicy::EndOfJob);
        assert_eq!(config.grace_scans, 4);
        assert_eq!(config.listen_port, DEFAULT_PORT);
    }

    #[test]
    fn missing_file_is_default() {
        let config = DaemonConfig::load(Path::new("/nonexistent/printbridge.json")).unwrap();
        assert_eq!(config.transmit_timeout_secs, 30);
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let config = DaemonConfig {
            transmit_timeout_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_grace_scans_is_rejected() {
        let config = DaemonConfig {
            grace_scans: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, PrintBridgeError::Config(ref msg) if msg.contains("grace_scans")));
    }

    #[test]
    fn threshold_is_tagged() {
        let config: DaemonConfig =
            serde_json::from_str(r#"{"raster_threshold":{"mode":"otsu"}}"#).unwrap();
        assert_eq!(config.raster_threshold, Threshold::Otsu);
        let config: DaemonConfig =
            serde_json::from_str(r#"{"raster_threshold":{"mode":"percent","value":50}}"#)
                .unwrap();
        assert_eq!(config.raster_threshold, Threshold::Percent(50));
    }

    #[test]
    fn loopback_unless_external() {
        assert_eq!(DaemonConfig::default().bind_address(), "127.0.0.1:3888");
    }
}
