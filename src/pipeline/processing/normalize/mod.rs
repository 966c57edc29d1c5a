use chrono::NaiveDate;
use tracing::debug;

use crate::domain::{record_id, Observed, PropertyRecord, Source};
use crate::error::{PricerError, Result};
use crate::pipeline::ingestion::{BaanknetRespData, IntermediateRecord, PropertyDetailsData};

/// Static mapping audit table for the bulk listing source:
/// canonical field → source field path. The actual transforms are the pure
/// functions below; this table is what regression tests and reviewers check
/// the dispatch against.
pub const BAANKNET_FIELD_MAP: &[(&str, &str)] = &[
    ("id", "$.property_id"),
    ("price", "$.respData.propertyPrice"),
    ("city", "$.respData.city"),
    ("state", "$.respData.state"),
    ("property_type", "$.respData.propertyType"),
    ("description_text", "$.respData.summaryDesc"),
    ("auction_date", "$.respData.auctionDate"),
    ("bank_name", "$.respData.bankName"),
];

/// Static mapping audit table for the per-property detail source.
pub const PROPERTY_DETAILS_FIELD_MAP: &[(&str, &str)] = &[
    ("id", "$.data.id"),
    ("price", "$.data.reserve_price"),
    ("city", "$.data.city"),
    ("state", "$.data.state"),
    ("property_type", "$.data.property_type"),
    ("description_text", "$.data.name + $.data.description + $.data.dimensions"),
    ("auction_date", "$.data.auction_date"),
    ("application_deadline", "$.data.application_deadline"),
    ("borrower_name", "$.data.borrower_name"),
    ("bank_name", "$.data.bank_name"),
    ("address", "$.data.address"),
    ("locality", "$.data.locality"),
    ("pincode", "$.data.pincode"),
    ("emd", "$.data.emd"),
    ("possession", "$.data.possession"),
];

/// Trim a raw string field; empty and whitespace-only become missing.
fn clean_string(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Accept a numeric field that arrives as a JSON number or numeric string.
/// Anything else is missing, never a guess.
fn clean_number(value: Option<&serde_json::Value>) -> Option<f64> {
    match value {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => {
            let cleaned: String = s
                .trim()
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
                .collect();
            cleaned.parse::<f64>().ok()
        }
        _ => None,
    }
}

/// Pincode 0 is a scrape artifact, not a place.
fn clean_pincode(value: Option<&serde_json::Value>) -> Option<u32> {
    clean_number(value)
        .map(|n| n as u32)
        .filter(|p| *p != 0)
}

/// Dates arrive in several formats depending on scrape vintage.
/// Unparseable dates are missing, not errors.
fn clean_date(value: Option<&str>) -> Option<NaiveDate> {
    let s = clean_string(value)?;
    // Timestamps like "2024-03-15 10:30:00" reduce to their date part.
    let date_part = s.split_whitespace().next().unwrap_or(&s);
    const FORMATS: &[&str] = &["%Y-%m-%d", "%d-%m-%Y", "%d/%m/%Y", "%d-%b-%Y"];
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(date_part, fmt).ok())
}

/// Maps each intermediate representation into the canonical record.
/// Every transform is pure; fields a source does not carry stay explicitly
/// missing, never a fabricated default. No imputation happens here.
pub struct SchemaNormalizer;

impl SchemaNormalizer {
    pub fn new() -> Self {
        Self
    }

    /// Normalize a source-tagged intermediate record. A record without a
    /// source-local id cannot be addressed downstream and is a mapping error
    /// (skipped and counted by the caller).
    pub fn normalize(&self, record: &IntermediateRecord) -> Result<PropertyRecord> {
        let normalized = match record {
            IntermediateRecord::Baanknet { item, raw, .. } => {
                let local_id = item.local_id().ok_or(PricerError::SchemaMapping {
                    field: "id",
                    reason: "property_id missing or blank".to_string(),
                })?;
                let resp = item.resp_data.as_ref().ok_or(PricerError::SchemaMapping {
                    field: "id",
                    reason: "respData container missing".to_string(),
                })?;
                self.from_baanknet(&local_id, resp, raw.clone())
            }
            IntermediateRecord::PropertyDetails { data, raw, .. } => {
                let local_id = data.local_id().ok_or(PricerError::SchemaMapping {
                    field: "id",
                    reason: "data.id missing or blank".to_string(),
                })?;
                self.from_property_details(&local_id, data, raw.clone())
            }
        };
        debug!(id = %normalized.id, source = %normalized.source, "normalized record");
        Ok(normalized)
    }

    /// Idempotent re-entry point: a record already in canonical shape passes
    /// through unchanged. Serving-path records built from request payloads
    /// arrive here un-tagged and get their string fields cleaned.
    pub fn normalize_canonical(&self, mut record: PropertyRecord) -> PropertyRecord {
        if record.canonical {
            return record;
        }
        record.city = clean_observed_string(record.city);
        record.property_type = clean_observed_string(record.property_type);
        record.address = record.address.as_deref().and_then(|s| clean_string(Some(s)));
        record.locality = record.locality.as_deref().and_then(|s| clean_string(Some(s)));
        record.state = record.state.as_deref().and_then(|s| clean_string(Some(s)));
        record.pincode = record.pincode.filter(|p| *p != 0);
        record.canonical = true;
        record
    }

    fn from_baanknet(
        &self,
        local_id: &str,
        resp: &BaanknetRespData,
        raw: serde_json::Value,
    ) -> PropertyRecord {
        let id = record_id(Source::Baanknet, local_id);
        let mut rec = PropertyRecord::empty(id, Source::Baanknet, raw);

        rec.price = clean_number(resp.property_price.as_ref());
        rec.city = clean_string(resp.city.as_deref())
            .map(Observed::structured)
            .unwrap_or_default();
        rec.state = clean_string(resp.state.as_deref());
        rec.property_type = clean_string(resp.property_type.as_deref())
            .map(Observed::structured)
            .unwrap_or_default();
        rec.auction_date = clean_date(resp.auction_date.as_deref());
        rec.bank_name = clean_string(resp.bank_name.as_deref());
        if let Some(desc) = clean_string(resp.summary_desc.as_deref()) {
            rec.description.push("summaryDesc", &desc);
        }
        rec.canonical = true;
        rec
    }

    fn from_property_details(
        &self,
        local_id: &str,
        data: &PropertyDetailsData,
        raw: serde_json::Value,
    ) -> PropertyRecord {
        let id = record_id(Source::PropertyDetails, local_id);
        let mut rec = PropertyRecord::empty(id, Source::PropertyDetails, raw);

        rec.price = clean_number(data.reserve_price.as_ref());
        rec.city = clean_string(data.city.as_deref())
            .map(Observed::structured)
            .unwrap_or_default();
        rec.state = clean_string(data.state.as_deref());
        rec.property_type = clean_string(data.property_type.as_deref())
            .map(Observed::structured)
            .unwrap_or_default();
        rec.auction_date = clean_date(data.auction_date.as_deref());
        rec.application_deadline = clean_date(data.application_deadline.as_deref());
        rec.borrower_name = clean_string(data.borrower_name.as_deref());
        rec.bank_name = clean_string(data.bank_name.as_deref());
        rec.address = clean_string(data.address.as_deref());
        rec.locality = clean_string(data.locality.as_deref());
        rec.pincode = clean_pincode(data.pincode.as_ref());
        rec.emd = clean_number(data.emd.as_ref());
        rec.possession = clean_string(data.possession.as_deref());

        // Free text, span-tagged in source order: listing name, prose
        // description, then the dimension string the extractor mines.
        if let Some(name) = clean_string(data.name.as_deref()) {
            rec.description.push("name", &name);
        }
        if let Some(desc) = clean_string(data.description.as_deref()) {
            rec.description.push("description", &desc);
        }
        if let Some(dims) = clean_string(data.dimensions.as_deref()) {
            rec.description.push("dimensions", &dims);
        }
        rec.canonical = true;
        rec
    }
}

impl Default for SchemaNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

fn clean_observed_string(observed: Observed<String>) -> Observed<String> {
    match observed.value.as_deref().and_then(|s| clean_string(Some(s))) {
        Some(cleaned) => Observed {
            value: Some(cleaned),
            origin: observed.origin,
        },
        None => Observed::absent(),
    }
}
