// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// CUPS backend over IPP.
//
// Discovery uses CUPS-Get-Printers against the local scheduler; submission
// sends a Print-Job straight to the queue's printer URI. Both go through the
// `ipp` crate's async client.

use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;

use async_trait::async_trait;
use ipp::prelude::*;
use tracing::{debug, error, info, instrument};

use printbridge_core::error::{PrintBridgeError, Result};
use printbridge_core::{
    Capabilities, MM_PER_INCH, MediaSize, PrintOption, Printer, PrinterClass, PrinterId,
    Reachability, TransportHandle,
};

use crate::transport::{QueueReceipt, QueueSubmission, QueueTransport};

/// IPP printer-state enum value for a stopped queue.
const PRINTER_STATE_STOPPED: i32 = 5;

const DEFAULT_RESOLUTION_DPI: u32 = 300;

/// Attribute view of one printer group, keyed by attribute name.
type AttributeMap<'a> = HashMap<&'a str, &'a IppValue>;

pub struct CupsTransport {
    /// Scheduler endpoint, e.g. `ipp://localhost:631/`.
    server: String,
}

impl CupsTransport {
    pub fn new(server: impl Into<String>) -> Self {
        let mut server = server.into();
        if !server.ends_with('/') {
            server.push('/');
        }
        Self { server }
    }

    pub fn server(&self) -> &str {
        &self.server
    }
}

#[async_trait]
impl QueueTransport for CupsTransport {
    #[instrument(skip(self), fields(server = %self.server))]
    async fn discover(&self) -> Result<Vec<Printer>> {
        let uri: Uri = self.server.parse().map_err(|e| {
            PrintBridgeError::Discovery(format!("invalid CUPS URI '{}': {e}", self.server))
        })?;

        let operation = IppOperationBuilder::cups().get_printers();
        let client = AsyncIppClient::new(uri);

        debug!("sending CUPS-Get-Printers");
        let response = client
            .send(operation)
            .await
            .map_err(|e| PrintBridgeError::Discovery(format!("CUPS-Get-Printers: {e}")))?;

        if !response.header().status_code().is_success() {
            let code = response.header().status_code();
            error!(status = ?code, "CUPS-Get-Printers failed");
            return Err(PrintBridgeError::Discovery(format!(
                "CUPS-Get-Printers returned status {code:?}"
            )));
        }

        let printers: Vec<Printer> = response
            .attributes()
            .groups_of(DelimiterTag::PrinterAttributes)
            .filter_map(|group| {
                let attrs: AttributeMap<'_> = group
                    .attributes()
                    .iter()
                    .map(|(name, attr)| (name.as_str(), attr.value()))
                    .collect();
                printer_from_attributes(&attrs, &self.server)
            })
            .collect();

        debug!(count = printers.len(), "received CUPS queues");
        Ok(printers)
    }

    #[instrument(skip(self, document, submission), fields(doc_len = document.len(), title = %submission.job_title))]
    async fn submit(
        &self,
        handle: &TransportHandle,
        document: Vec<u8>,
        submission: &QueueSubmission,
    ) -> Result<QueueReceipt> {
        let TransportHandle::Queue { queue_name, uri } = handle else {
            return Err(PrintBridgeError::TransmissionFailure(
                "CUPS cannot reach a USB device handle".into(),
            ));
        };
        let uri: Uri = uri.parse().map_err(|e| {
            PrintBridgeError::TransmissionFailure(format!("invalid printer URI '{uri}': {e}"))
        })?;

        let payload = IppPayload::new(Cursor::new(document));
        let mut builder = IppOperationBuilder::print_job(uri.clone(), payload)
            .job_title(submission.job_title.as_str())
            .document_format(submission.document_format)
            .attribute(IppAttribute::new(
                "copies",
                IppValue::Integer(submission.copies.max(1) as i32),
            ));
        if let Some(media) = &submission.media {
            builder = builder.attribute(IppAttribute::new("media", IppValue::Keyword(media.clone())));
        }
        for (key, value) in &submission.options {
            builder = builder.attribute(IppAttribute::new(key.as_str(), option_value(value)));
        }

        let client = AsyncIppClient::new(uri);
        info!(queue = %queue_name, "sending Print-Job");
        let response = client
            .send(builder.build())
            .await
            .map_err(|e| PrintBridgeError::TransmissionFailure(format!("Print-Job: {e}")))?;

        if !response.header().status_code().is_success() {
            let code = response.header().status_code();
            let message = status_message(response.attributes());
            error!(status = ?code, message = ?message, "Print-Job rejected");
            return Err(PrintBridgeError::TransmissionFailure(match message {
                Some(message) => format!("Print-Job returned status {code:?}: {message}"),
                None => format!("Print-Job returned status {code:?}"),
            }));
        }

        let remote_job_id = extract_job_id(response.attributes());
        let state_reasons = job_state_reasons(response.attributes());
        info!(remote_job_id = ?remote_job_id, "print job accepted by CUPS");
        Ok(QueueReceipt {
            remote_job_id,
            state_reasons,
        })
    }
}

// ---------------------------------------------------------------------------
// Attribute helpers
// ---------------------------------------------------------------------------

/// Flatten a possibly multi-valued attribute.
fn values(value: &IppValue) -> Vec<&IppValue> {
    match value {
        IppValue::Array(items) => items.iter().collect(),
        other => vec![other],
    }
}

fn text(value: &IppValue) -> String {
    match value {
        IppValue::Keyword(s)
        | IppValue::TextWithoutLanguage(s)
        | IppValue::NameWithoutLanguage(s)
        | IppValue::Uri(s)
        | IppValue::MimeMediaType(s) => s.to_string(),
        other => other.to_string(),
    }
}

fn first_text(attrs: &AttributeMap<'_>, name: &str) -> Option<String> {
    attrs
        .get(name)
        .and_then(|v| values(v).first().map(|v| text(v)))
        .filter(|s| !s.is_empty())
}

fn all_text(attrs: &AttributeMap<'_>, name: &str) -> Vec<String> {
    attrs
        .get(name)
        .map(|v| values(v).into_iter().map(text).collect())
        .unwrap_or_default()
}

/// Build a registry record from one printer attribute group. Groups
/// without a `printer-name` are skipped.
fn printer_from_attributes(attrs: &AttributeMap<'_>, server: &str) -> Option<Printer> {
    let name = first_text(attrs, "printer-name")?;
    let label = first_text(attrs, "printer-info").unwrap_or_else(|| name.clone());
    let model = first_text(attrs, "printer-make-and-model").unwrap_or_default();

    let state_reasons: Vec<String> = all_text(attrs, "printer-state-reasons")
        .into_iter()
        .filter(|r| r != "none")
        .collect();
    let stopped = matches!(
        attrs.get("printer-state"),
        Some(IppValue::Enum(PRINTER_STATE_STOPPED))
    );
    let reachability = if stopped || state_reasons.iter().any(|r| r.starts_with("offline-report")) {
        Reachability::Offline
    } else {
        Reachability::Online
    };

    let uri = first_text(attrs, "printer-uri-supported")
        .unwrap_or_else(|| format!("{server}printers/{name}"));

    Some(Printer {
        id: PrinterId::queue(&name),
        class: PrinterClass::QueueManaged,
        label,
        model,
        capabilities: capabilities_from_attributes(attrs),
        reachability,
        state_reasons,
        handle: TransportHandle::Queue {
            queue_name: name,
            uri,
        },
        epoch: 0,
    })
}

fn capabilities_from_attributes(attrs: &AttributeMap<'_>) -> Capabilities {
    let mut media_sizes: Vec<MediaSize> = all_text(attrs, "media-supported")
        .iter()
        .filter_map(|keyword| parse_pwg_media(keyword))
        .collect();
    if let Some(default) = first_text(attrs, "media-default") {
        if let Some(pos) = media_sizes.iter().position(|m| m.name == default) {
            let media = media_sizes.remove(pos);
            media_sizes.insert(0, media);
        }
    }

    let color = matches!(attrs.get("color-supported"), Some(IppValue::Boolean(true)));
    let resolution_dpi = first_text(attrs, "printer-resolution-default")
        .and_then(|r| leading_number(&r))
        .unwrap_or(DEFAULT_RESOLUTION_DPI);

    Capabilities {
        media_sizes,
        continuous_media: Vec::new(),
        resolution_dpi,
        color,
        supported_options: supported_options(attrs),
    }
}

/// Job options the queue both lists in `job-creation-attributes-supported`
/// and publishes `-supported` / `-default` values for.
fn supported_options(attrs: &AttributeMap<'_>) -> BTreeMap<String, PrintOption> {
    all_text(attrs, "job-creation-attributes-supported")
        .into_iter()
        .filter_map(|key| {
            let supported = attrs.get(format!("{key}-supported").as_str())?;
            let default = attrs.get(format!("{key}-default").as_str())?;
            let option = PrintOption {
                display_name: key.clone(),
                default_choice: values(default).first().map(|v| text(v)),
                choices: values(supported).into_iter().map(text).collect(),
            };
            Some((key, option))
        })
        .collect()
}

/// Parse a PWG 5101.1 self-describing media name such as
/// `iso_a4_210x297mm` or `na_letter_8.5x11in`. Custom ranges and names
/// without dimensions yield `None`.
pub fn parse_pwg_media(keyword: &str) -> Option<MediaSize> {
    if keyword.starts_with("custom_") {
        return None;
    }
    let dims = keyword.rsplit('_').next()?;
    let (dims, scale) = if let Some(d) = dims.strip_suffix("mm") {
        (d, 1.0)
    } else if let Some(d) = dims.strip_suffix("in") {
        (d, MM_PER_INCH)
    } else {
        return None;
    };
    let (w, h) = dims.split_once('x')?;
    let width: f32 = w.parse().ok()?;
    let length: f32 = h.parse().ok()?;
    if width <= 0.0 || length <= 0.0 {
        return None;
    }
    Some(MediaSize::new(keyword, width * scale, length * scale))
}

fn leading_number(value: &str) -> Option<u32> {
    let digits: String = value.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// Type a client option string the way IPP expects it.
fn option_value(value: &str) -> IppValue {
    match value {
        "true" => IppValue::Boolean(true),
        "false" => IppValue::Boolean(false),
        _ => match value.parse::<i32>() {
            Ok(n) => IppValue::Integer(n),
            Err(_) => IppValue::Keyword(value.to_owned()),
        },
    }
}

/// Extract the `job-id` integer from a response's Job Attributes group.
fn extract_job_id(attrs: &IppAttributes) -> Option<i32> {
    for group in attrs.groups_of(DelimiterTag::JobAttributes) {
        if let Some(attr) = group.attributes().get("job-id") {
            if let IppValue::Integer(id) = attr.value() {
                return Some(*id);
            }
        }
    }
    None
}

fn job_state_reasons(attrs: &IppAttributes) -> Vec<String> {
    attrs
        .groups_of(DelimiterTag::JobAttributes)
        .filter_map(|group| group.attributes().get("job-state-reasons"))
        .flat_map(|attr| values(attr.value()).into_iter().map(text).collect::<Vec<_>>())
        .filter(|r| r != "none")
        .collect()
}

fn status_message(attrs: &IppAttributes) -> Option<String> {
    attrs
        .groups_of(DelimiterTag::OperationAttributes)
        .find_map(|group| group.attributes().get("status-message"))
        .map(|attr| text(attr.value()))
}
