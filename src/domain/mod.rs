use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::constants;

/// Provenance tag for an input source. Never discarded once attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// Bulk auction listing file (one JSON array, nested `respData` objects).
    Baanknet,
    /// Per-property detail files (one JSON object per file, nested `data`).
    PropertyDetails,
    /// Ad-hoc record built from an inbound prediction request.
    Request,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Baanknet => constants::BAANKNET_SOURCE,
            Source::PropertyDetails => constants::PROPERTY_DETAILS_SOURCE,
            Source::Request => constants::REQUEST_SOURCE,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a field's value came from. `Absent` pairs with a `None` value and is
/// the explicit missing marker; zero is a legitimate value, missing is not zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueOrigin {
    /// The value existed in a typed source field.
    Structured,
    /// The value was mined from free text.
    Extracted,
    /// The value was filled in from frozen training statistics.
    Imputed,
    /// No value is known.
    Absent,
}

/// A nullable attribute together with its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observed<T> {
    pub value: Option<T>,
    pub origin: ValueOrigin,
}

impl<T> Observed<T> {
    pub fn absent() -> Self {
        Self {
            value: None,
            origin: ValueOrigin::Absent,
        }
    }

    pub fn structured(value: T) -> Self {
        Self {
            value: Some(value),
            origin: ValueOrigin::Structured,
        }
    }

    pub fn extracted(value: T) -> Self {
        Self {
            value: Some(value),
            origin: ValueOrigin::Extracted,
        }
    }

    pub fn imputed(value: T) -> Self {
        Self {
            value: Some(value),
            origin: ValueOrigin::Imputed,
        }
    }

    pub fn is_missing(&self) -> bool {
        self.value.is_none()
    }
}

impl<T> Default for Observed<T> {
    fn default() -> Self {
        Self::absent()
    }
}

/// One free-text fragment with the source field it came from, so concatenated
/// description text keeps per-span provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextSpan {
    pub field: String,
    pub text: String,
}

/// All free-text source fields of a record, concatenated on demand.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DescriptionText {
    pub spans: Vec<TextSpan>,
}

impl DescriptionText {
    pub fn push(&mut self, field: &str, text: &str) {
        let text = text.trim();
        if !text.is_empty() {
            self.spans.push(TextSpan {
                field: field.to_string(),
                text: text.to_string(),
            });
        }
    }

    /// Concatenation of all spans, used as extractor input.
    pub fn concatenated(&self) -> String {
        self.spans
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }
}

/// Audit trail entry attached to a record as it moves through the pipeline.
/// Signals are never model input; they exist so nothing is silently dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QualitySignal {
    /// A structured field and a text-extracted value disagreed; the
    /// structured value won.
    ExtractionConflict {
        field: String,
        structured: String,
        extracted: String,
    },
    /// A numeric value fell outside the frozen robust bounds. `capped` is
    /// the winsorized value, or `None` when the value was only flagged.
    OutOfRange {
        field: String,
        original: f64,
        capped: Option<f64>,
    },
    /// A raw categorical value was not in the frozen vocabulary.
    UnseenCategory { field: String, raw: String },
    /// A missing value was replaced from frozen training statistics.
    Imputed { field: String },
    /// An area unit annotation was not in the conversion table; the field
    /// was marked missing rather than guessed.
    UnknownUnit { raw: String },
}

/// The canonical, source-agnostic record all downstream stages consume.
///
/// Created once per ingestion pass (batch) or once per inbound request
/// (serving); never mutated after the sanitizer completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyRecord {
    /// Globally unique; derived deterministically from source + local id.
    pub id: String,
    pub source: Source,
    /// Target variable; null only pre-auction.
    pub price: Option<f64>,
    pub city: Observed<String>,
    pub property_type: Observed<String>,
    /// Always square feet once the sanitizer has run.
    pub area_value: Observed<f64>,
    /// Raw unit annotation carried between extraction and sanitization.
    /// Must be `None` on any sanitized record.
    pub area_unit: Option<String>,
    pub floor_count: Observed<i64>,
    pub bedroom_count: Observed<i64>,
    pub bathroom_count: Observed<i64>,
    /// Canonical amenity tokens. Absence of a token is evidence of absence.
    pub amenities: BTreeSet<String>,
    pub description: DescriptionText,
    pub auction_date: Option<NaiveDate>,

    // Auxiliary identity fields carried for audit and reporting; never fed
    // to the model unless listed in the frozen feature configuration.
    pub borrower_name: Option<String>,
    pub bank_name: Option<String>,
    pub address: Option<String>,
    pub locality: Option<String>,
    pub state: Option<String>,
    pub pincode: Option<u32>,
    /// Earnest money deposit.
    pub emd: Option<f64>,
    pub possession: Option<String>,
    pub application_deadline: Option<NaiveDate>,

    /// Data-quality audit trail.
    pub quality: Vec<QualitySignal>,
    /// Set once the normalizer has produced canonical shape; renormalizing a
    /// canonical record is a no-op.
    pub canonical: bool,
    /// Original source record, retained verbatim for audit/debug.
    /// Immutable once ingested; never fed to the model.
    pub raw_payload: serde_json::Value,
}

impl PropertyRecord {
    /// Empty canonical shell with all fields explicitly missing.
    pub fn empty(id: String, source: Source, raw_payload: serde_json::Value) -> Self {
        Self {
            id,
            source,
            price: None,
            city: Observed::absent(),
            property_type: Observed::absent(),
            area_value: Observed::absent(),
            area_unit: None,
            floor_count: Observed::absent(),
            bedroom_count: Observed::absent(),
            bathroom_count: Observed::absent(),
            amenities: BTreeSet::new(),
            description: DescriptionText::default(),
            auction_date: None,
            borrower_name: None,
            bank_name: None,
            address: None,
            locality: None,
            state: None,
            pincode: None,
            emd: None,
            possession: None,
            application_deadline: None,
            quality: Vec::new(),
            canonical: false,
            raw_payload,
        }
    }

    pub fn push_signal(&mut self, signal: QualitySignal) {
        self.quality.push(signal);
    }
}

/// Derive the globally unique record id from the source tag and the
/// source-local identifier. Stable across runs.
pub fn record_id(source: Source, local_id: &str) -> String {
    let name = format!("{}:{}", source.as_str(), local_id);
    uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_id_is_deterministic() {
        let a = record_id(Source::Baanknet, "12345");
        let b = record_id(Source::Baanknet, "12345");
        assert_eq!(a, b);

        let c = record_id(Source::PropertyDetails, "12345");
        assert_ne!(a, c, "same local id from another source must differ");
    }

    #[test]
    fn test_observed_missing_is_not_zero() {
        let missing: Observed<i64> = Observed::absent();
        let zero = Observed::structured(0i64);
        assert!(missing.is_missing());
        assert!(!zero.is_missing());
        assert_ne!(missing, zero);
    }

    #[test]
    fn test_description_concatenation_preserves_spans() {
        let mut desc = DescriptionText::default();
        desc.push("summaryDesc", "LAND AND BUILDING");
        desc.push("name", "  3 Shops in Yogi Plaza  ");
        desc.push("possession", "");

        assert_eq!(desc.spans.len(), 2);
        assert_eq!(desc.concatenated(), "LAND AND BUILDING\n3 Shops in Yogi Plaza");
        assert_eq!(desc.spans[1].field, "name");
    }
}
