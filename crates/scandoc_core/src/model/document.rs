//! Document aggregate model.
//!
//! # Responsibility
//! - Define the nested document shape written and read by the repository.
//! - Keep the JSON wire shape of the external scanning service stable.
//!
//! # Invariants
//! - `scan_response` is `Some` iff the document has been scanned.
//! - `id` is assigned by storage; it is ignored on write.
//! - Absent optional fields are omitted from JSON, never `null`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// External identity of a stored document (string form of the numeric key).
pub type DocumentId = String;

/// Root aggregate: one scanned document and everything derived from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<DocumentId>,
    /// Display name shown in document lists.
    pub name: String,
    /// Captured pages, in capture order.
    #[serde(default, alias = "documemtImages")]
    pub document_images: Vec<DocumentImage>,
    /// Structured scan output; `None` until the document has been scanned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scan_response: Option<ScanResponse>,
}

/// One captured page image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentImage {
    /// Location of the image file on the device.
    pub uri: String,
    pub width: u32,
    pub height: u32,
    /// Opaque camera metadata, stored as JSON text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exif: Option<Value>,
}

/// Output of the external scanning service for one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResponse {
    /// Line items as printed on the invoice.
    pub original: Vec<TarmedPosition>,
    pub summaries: Vec<TarmedSummary>,
    pub overall_summary: OverallSummary,
}

/// One invoice line item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TarmedPosition {
    #[serde(rename = "datum")]
    pub date: String,
    #[serde(rename = "tarif")]
    pub tariff: String,
    #[serde(rename = "tarifziffer")]
    pub tariff_code: String,
    #[serde(
        rename = "bezugsziffer",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub reference_code: Option<String>,
    #[serde(rename = "beschreibung")]
    pub description: String,
    #[serde(rename = "anzahl")]
    pub quantity: f64,
    #[serde(rename = "betrag")]
    pub amount: f64,
}

/// Categorized summary over a subset of positions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TarmedSummary {
    #[serde(rename = "datum")]
    pub date: String,
    pub emoji: String,
    #[serde(rename = "titel")]
    pub title: String,
    #[serde(rename = "beschreibung")]
    pub description: String,
    pub operation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// References to the positions this summary was derived from.
    /// Not checked against stored positions.
    #[serde(default)]
    pub relevant_ids: Vec<i64>,
    #[serde(rename = "betrag")]
    pub amount: f64,
}

/// Grand total of a scanned document. Its presence marks the document as scanned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverallSummary {
    #[serde(rename = "datum")]
    pub date: String,
    #[serde(rename = "titel")]
    pub title: String,
    #[serde(rename = "gesamtbetrag")]
    pub total_amount: f64,
}

/// Validation errors for document write invariants.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentValidationError {
    BlankImageUri { index: usize },
    NonFiniteNumber { field: &'static str, index: usize, value: f64 },
}

impl Display for DocumentValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BlankImageUri { index } => {
                write!(f, "document image #{index} has a blank uri")
            }
            Self::NonFiniteNumber {
                field,
                index,
                value,
            } => write!(f, "{field} #{index} must be a finite number, got {value}"),
        }
    }
}

impl Error for DocumentValidationError {}

impl Document {
    /// Creates an unscanned document with no images.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            document_images: Vec::new(),
            scan_response: None,
        }
    }

    /// Returns whether scan processing has completed for this document.
    pub fn is_scanned(&self) -> bool {
        self.scan_response.is_some()
    }

    /// Checks invariants that storage cannot express.
    ///
    /// SQLite stores NaN as NULL, so non-finite numbers would not survive a
    /// write/read cycle.
    pub fn validate(&self) -> Result<(), DocumentValidationError> {
        for (index, image) in self.document_images.iter().enumerate() {
            if image.uri.trim().is_empty() {
                return Err(DocumentValidationError::BlankImageUri { index });
            }
        }

        let Some(scan) = self.scan_response.as_ref() else {
            return Ok(());
        };

        for (index, position) in scan.original.iter().enumerate() {
            ensure_finite("position.quantity", index, position.quantity)?;
            ensure_finite("position.amount", index, position.amount)?;
        }
        for (index, summary) in scan.summaries.iter().enumerate() {
            ensure_finite("summary.amount", index, summary.amount)?;
        }
        ensure_finite(
            "overall_summary.total_amount",
            0,
            scan.overall_summary.total_amount,
        )
    }
}

fn ensure_finite(
    field: &'static str,
    index: usize,
    value: f64,
) -> Result<(), DocumentValidationError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(DocumentValidationError::NonFiniteNumber {
            field,
            index,
            value,
        })
    }
}
