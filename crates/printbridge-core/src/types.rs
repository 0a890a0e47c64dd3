// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the PrintBridge daemon.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Millimetres per inch, used for every mm <-> dot conversion.
pub const MM_PER_INCH: f32 = 25.4;

/// Tolerance when comparing requested media against advertised media.
const MEDIA_TOLERANCE_MM: f32 = 0.5;

/// Unique identifier for a print job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a job id from its hyphenated string form.
    pub fn parse(value: &str) -> Option<Self> {
        Uuid::parse_str(value).ok().map(Self)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable printer identity.
///
/// Queue printers are keyed by spooler queue name, USB printers by
/// vendor/product id plus serial number. Bus addresses are never part of
/// the id because they change across replugs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrinterId(pub String);

impl PrinterId {
    pub fn queue(queue_name: &str) -> Self {
        Self(format!("queue:{queue_name}"))
    }

    pub fn usb(vendor_id: u16, product_id: u16, serial: Option<&str>) -> Self {
        match serial {
            Some(serial) if !serial.is_empty() => {
                Self(format!("usb:{vendor_id:04x}:{product_id:04x}:{serial}"))
            }
            _ => Self(format!("usb:{vendor_id:04x}:{product_id:04x}")),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PrinterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PrinterId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// The two printer models the daemon unifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PrinterClass {
    /// Reached through the OS spooler, accepts whole documents.
    QueueManaged,
    /// Reached over USB bulk transfer, accepts a raster command stream.
    DirectRaster,
}

impl PrinterClass {
    /// Name of the print system backing this class, as reported to clients.
    pub fn print_system(&self) -> &'static str {
        match self {
            Self::QueueManaged => "cups",
            Self::DirectRaster => "brother_ql",
        }
    }

    pub fn from_print_system(name: &str) -> Option<Self> {
        match name {
            "cups" => Some(Self::QueueManaged),
            "brother_ql" => Some(Self::DirectRaster),
            _ => None,
        }
    }
}

/// Registry view of whether a printer can currently be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reachability {
    Online,
    Offline,
    /// Seen again after being offline, not yet confirmed by enough scans.
    Unknown,
}

/// Supported input document types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentType {
    Pdf,
    Png,
    Jpeg,
    Gif,
    Bmp,
    Tiff,
}

impl DocumentType {
    /// MIME type string, as used for IPP `document-format`.
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Pdf => "application/pdf",
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Gif => "image/gif",
            Self::Bmp => "image/bmp",
            Self::Tiff => "image/tiff",
        }
    }

    /// Parse a declared content type. Parameters such as `; charset=` are
    /// ignored, matching is case-insensitive.
    pub fn from_mime(content_type: &str) -> Option<Self> {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "application/pdf" => Some(Self::Pdf),
            "image/png" => Some(Self::Png),
            "image/jpeg" | "image/jpg" => Some(Self::Jpeg),
            "image/gif" => Some(Self::Gif),
            "image/bmp" | "image/x-bmp" => Some(Self::Bmp),
            "image/tiff" => Some(Self::Tiff),
            _ => None,
        }
    }

    pub fn is_raster_image(&self) -> bool {
        !matches!(self, Self::Pdf)
    }
}

/// Explicit pixel dimensions of a medium's printable area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dots {
    pub width: u32,
    pub height: u32,
}

/// A physical media size.
///
/// `printable_dots` is set for device-defined media (label stock) whose
/// printable area is not a plain mm-to-dot conversion of the stock size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaSize {
    pub name: String,
    pub width_mm: f32,
    pub length_mm: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub printable_dots: Option<Dots>,
}

impl MediaSize {
    pub fn new(name: impl Into<String>, width_mm: f32, length_mm: f32) -> Self {
        Self {
            name: name.into(),
            width_mm,
            length_mm,
            printable_dots: None,
        }
    }

    /// Whether two sizes describe the same stock, ignoring the name.
    pub fn same_dimensions(&self, other: &MediaSize) -> bool {
        (self.width_mm - other.width_mm).abs() <= MEDIA_TOLERANCE_MM
            && (self.length_mm - other.length_mm).abs() <= MEDIA_TOLERANCE_MM
    }

    /// Pixel dimensions of this medium at `dpi`.
    pub fn dots_at(&self, dpi: u32) -> Dots {
        if let Some(dots) = self.printable_dots.filter(|d| d.height > 0) {
            return dots;
        }
        let width = self
            .printable_dots
            .map(|d| d.width)
            .unwrap_or_else(|| mm_to_dots(self.width_mm, dpi));
        Dots {
            width,
            height: mm_to_dots(self.length_mm, dpi),
        }
    }
}

/// Convert millimetres to device dots, rounding to the nearest dot.
pub fn mm_to_dots(mm: f32, dpi: u32) -> u32 {
    (mm * dpi as f32 / MM_PER_INCH).round().max(0.0) as u32
}

/// A continuous roll: fixed width, variable cut length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaRange {
    pub name: String,
    pub width_mm: f32,
    pub min_length_mm: f32,
    pub max_length_mm: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub printable_width_dots: Option<u32>,
}

impl MediaRange {
    pub fn contains(&self, media: &MediaSize) -> bool {
        (self.width_mm - media.width_mm).abs() <= MEDIA_TOLERANCE_MM
            && media.length_mm + MEDIA_TOLERANCE_MM >= self.min_length_mm
            && media.length_mm - MEDIA_TOLERANCE_MM <= self.max_length_mm
    }
}

/// One selectable option of a queue printer (e.g. `print-quality`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintOption {
    pub display_name: String,
    pub default_choice: Option<String>,
    pub choices: Vec<String>,
}

/// Declared physical and printing limits of a printer.
///
/// Fixed for the lifetime of a discovery epoch: a capability change shows
/// up as a new `Printer` record on the next scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub media_sizes: Vec<MediaSize>,
    #[serde(default)]
    pub continuous_media: Vec<MediaRange>,
    pub resolution_dpi: u32,
    pub color: bool,
    #[serde(default)]
    pub supported_options: BTreeMap<String, PrintOption>,
}

impl Capabilities {
    /// Find the advertised medium matching a requested size.
    ///
    /// Fixed sizes win over continuous rolls. A continuous match carries
    /// the roll's printable width and the requested length.
    pub fn match_media(&self, requested: &MediaSize) -> Option<MediaSize> {
        if let Some(fixed) = self
            .media_sizes
            .iter()
            .find(|m| m.same_dimensions(requested))
        {
            return Some(fixed.clone());
        }
        self.continuous_media
            .iter()
            .find(|range| range.contains(requested))
            .map(|range| MediaSize {
                name: format!("{}x{}", range.name, requested.length_mm.round() as u32),
                width_mm: range.width_mm,
                length_mm: requested.length_mm,
                printable_dots: range.printable_width_dots.map(|width| Dots {
                    width,
                    height: mm_to_dots(requested.length_mm, self.resolution_dpi),
                }),
            })
    }

    pub fn supports_media(&self, requested: &MediaSize) -> bool {
        self.match_media(requested).is_some()
    }

    /// The medium used when a request names none.
    pub fn default_media(&self) -> Option<&MediaSize> {
        self.media_sizes.first()
    }
}

/// How the transport reaches a printer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportHandle {
    /// A spooler queue.
    Queue { queue_name: String, uri: String },
    /// A USB device, matched by ids and serial rather than bus address.
    Usb {
        vendor_id: u16,
        product_id: u16,
        serial: Option<String>,
    },
}

/// A printer known to the device registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Printer {
    pub id: PrinterId,
    pub class: PrinterClass,
    pub label: String,
    pub model: String,
    pub capabilities: Capabilities,
    pub reachability: Reachability,
    pub state_reasons: Vec<String>,
    pub handle: TransportHandle,
    /// Incremented whenever re-discovery reports different capabilities.
    pub epoch: u64,
}

/// Label cutting behaviour for direct-raster printers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CutPolicy {
    /// Feed only, never cut.
    None,
    /// Cut after every label.
    EachLabel,
    /// Cut once after the last label of the job.
    EndOfJob,
}

/// How greyscale pages are reduced to one bit per pixel for thermal heads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode", content = "value")]
pub enum Threshold {
    /// Pixels at least this percent dark are printed.
    Percent(u8),
    /// Per-page level chosen by Otsu's method.
    Otsu,
}

impl Default for Threshold {
    fn default() -> Self {
        Self::Percent(70)
    }
}

/// Client-supplied print options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintOptions {
    #[serde(default)]
    pub media: Option<MediaSize>,
    #[serde(default = "one")]
    pub copies: u32,
    #[serde(default)]
    pub job_title: Option<String>,
    /// Spooler options (IPP keyword -> value), filtered against the
    /// printer's advertised options before submission.
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

fn one() -> u32 {
    1
}

impl Default for PrintOptions {
    fn default() -> Self {
        Self {
            media: None,
            copies: 1,
            job_title: None,
            extra: BTreeMap::new(),
        }
    }
}

/// Lifecycle states of a print job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Submitted,
    Validating,
    /// Until the first page has been drawn.
    Rendering,
    /// Remaining pages are drawn lazily while the encoder consumes them.
    Encoding,
    Transmitting,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// The single forward successor of a non-terminal state.
    pub fn successor(&self) -> Option<JobState> {
        match self {
            Self::Submitted => Some(Self::Validating),
            Self::Validating => Some(Self::Rendering),
            Self::Rendering => Some(Self::Encoding),
            Self::Encoding => Some(Self::Transmitting),
            Self::Transmitting => Some(Self::Completed),
            Self::Completed | Self::Failed => None,
        }
    }

    /// Forward-only transitions, plus `Failed` from any non-terminal state.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == Self::Failed || self.successor() == Some(next)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Validating => "validating",
            Self::Rendering => "rendering",
            Self::Encoding => "encoding",
            Self::Transmitting => "transmitting",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Result code recorded on a failed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NotFound,
    UnsupportedFormat,
    RenderFailure,
    MediaSizeMismatch,
    EncodingFailure,
    PrinterOffline,
    TransmissionFailure,
    Internal,
}

/// Why a job ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub kind: FailureKind,
    pub reason: String,
}

/// A submitted print job.
///
/// The document bytes travel with the dispatch task; the record keeps
/// only the declared type, size and fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrintJob {
    pub id: JobId,
    /// Weak reference: re-resolved against the registry at dispatch time.
    pub printer_id: PrinterId,
    pub document_type: DocumentType,
    /// SHA-256 of the document bytes.
    pub document_hash: String,
    pub document_len: u64,
    pub options: PrintOptions,
    pub state: JobState,
    pub failure: Option<JobFailure>,
    /// Job id assigned by the spooler, when the backend has one.
    pub remote_job_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PrintJob {
    pub fn new(
        printer_id: PrinterId,
        document_type: DocumentType,
        document_hash: String,
        document_len: u64,
        options: PrintOptions,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            printer_id,
            document_type,
            document_hash,
            document_len,
            options,
            state: JobState::Submitted,
            failure: None,
            remote_job_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn status(&self) -> JobStatus {
        JobStatus {
            job_id: self.id,
            job_state: self.state,
            result_code: self.failure.as_ref().map(|f| f.kind),
            job_state_reasons: self
                .failure
                .iter()
                .map(|f| f.reason.clone())
                .collect(),
            remote_job_id: self.remote_job_id.clone(),
            updated_at: self.updated_at,
        }
    }
}

/// Read-only snapshot of a job, as returned by status queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub job_id: JobId,
    pub job_state: JobState,
    pub result_code: Option<FailureKind>,
    pub job_state_reasons: Vec<String>,
    pub remote_job_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn continuous_62() -> Capabilities {
        Capabilities {
            media_sizes: vec![MediaSize {
                name: "29x90".into(),
                width_mm: 29.0,
                length_mm: 90.0,
                printable_dots: Some(Dots {
                    width: 306,
                    height: 991,
                }),
            }],
            continuous_media: vec![MediaRange {
                name: "62".into(),
                width_mm: 62.0,
                min_length_mm: 12.7,
                max_length_mm: 1000.0,
                printable_width_dots: Some(696),
            }],
            resolution_dpi: 300,
            color: false,
            supported_options: BTreeMap::new(),
        }
    }

    #[test]
    fn forward_transitions_only() {
        assert!(JobState::Submitted.can_transition_to(JobState::Validating));
        assert!(!JobState::Submitted.can_transition_to(JobState::Rendering));
        assert!(!JobState::Encoding.can_transition_to(JobState::Rendering));
        assert!(JobState::Rendering.can_transition_to(JobState::Failed));
    }

    #[test]
    fn terminal_states_never_move() {
        for next in [JobState::Validating, JobState::Completed, JobState::Failed] {
            assert!(!JobState::Completed.can_transition_to(next));
            assert!(!JobState::Failed.can_transition_to(next));
        }
    }

    #[test]
    fn mime_parsing_ignores_parameters() {
        assert_eq!(
            DocumentType::from_mime("application/PDF; charset=binary"),
            Some(DocumentType::Pdf)
        );
        assert_eq!(DocumentType::from_mime("image/jpg"), Some(DocumentType::Jpeg));
        assert_eq!(DocumentType::from_mime("text/plain"), None);
    }

    #[test]
    fn usb_id_ignores_missing_serial() {
        assert_eq!(
            PrinterId::usb(0x04f9, 0x2020, Some("A1B2")).as_str(),
            "usb:04f9:2020:A1B2"
        );
        assert_eq!(PrinterId::usb(0x04f9, 0x2020, Some("")).as_str(), "usb:04f9:2020");
    }

    #[test]
    fn fixed_media_keeps_device_dots() {
        let caps = continuous_62();
        let media = caps
            .match_media(&MediaSize::new("label", 29.2, 90.0))
            .expect("29x90 advertised");
        assert_eq!(media.dots_at(300), Dots { width: 306, height: 991 });
    }

    #[test]
    fn continuous_roll_accepts_length_in_range() {
        let caps = continuous_62();
        let media = caps
            .match_media(&MediaSize::new("custom", 62.0, 100.0))
            .expect("62mm roll advertised");
        assert_eq!(media.dots_at(300), Dots { width: 696, height: 1181 });
        assert!(!caps.supports_media(&MediaSize::new("custom", 62.0, 2000.0)));
        assert!(!caps.supports_media(&MediaSize::new("a4", 210.0, 297.0)));
    }

    #[test]
    fn failed_status_exposes_reason() {
        let mut job = PrintJob::new(
            PrinterId::queue("office"),
            DocumentType::Pdf,
            "abc".into(),
            3,
            PrintOptions::default(),
        );
        job.state = JobState::Failed;
        job.failure = Some(JobFailure {
            kind: FailureKind::PrinterOffline,
            reason: "printer offline: queue:office".into(),
        });
        let status = job.status();
        assert_eq!(status.result_code, Some(FailureKind::PrinterOffline));
        assert_eq!(status.job_state_reasons, vec!["printer offline: queue:office"]);
    }
}
