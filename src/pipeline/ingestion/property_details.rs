use serde::Deserialize;
use tracing::{debug, info};

use super::{AdapterBatch, IntermediateRecord, SourceAdapter};
use crate::domain::Source;

/// One property-details file: a success flag wrapping a `data` object.
#[derive(Debug, Clone, Deserialize)]
pub struct PropertyDetailsFile {
    #[serde(default)]
    pub success: bool,
    pub data: Option<PropertyDetailsData>,
}

/// The nested detail object. Numeric fields arrive as numbers or numeric
/// strings depending on the scrape vintage, so they stay loose here.
#[derive(Debug, Clone, Deserialize)]
pub struct PropertyDetailsData {
    pub id: Option<serde_json::Value>,
    pub borrower_name: Option<String>,
    pub bank_name: Option<String>,
    pub address: Option<String>,
    pub name: Option<String>,
    pub reserve_price: Option<serde_json::Value>,
    /// Free-text dimension string, e.g. "471.50 SQ.FT." or "120 sq. mtrs".
    pub dimensions: Option<String>,
    pub emd: Option<serde_json::Value>,
    pub possession: Option<String>,
    pub auction_date: Option<String>,
    pub application_deadline: Option<String>,
    pub locality: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub pincode: Option<serde_json::Value>,
    pub property_type: Option<String>,
    pub description: Option<String>,
}

impl PropertyDetailsData {
    /// Source-local identifier as a plain string.
    pub fn local_id(&self) -> Option<String> {
        match &self.id {
            Some(serde_json::Value::String(s)) if !s.trim().is_empty() => {
                Some(s.trim().to_string())
            }
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Adapter for per-property detail files. Each payload is one JSON object;
/// the batch offset is threaded in by the caller walking the directory.
pub struct PropertyDetailsAdapter {
    pub offset: usize,
}

impl PropertyDetailsAdapter {
    pub fn new(offset: usize) -> Self {
        Self { offset }
    }
}

impl SourceAdapter for PropertyDetailsAdapter {
    fn source(&self) -> Source {
        Source::PropertyDetails
    }

    fn parse(&self, bytes: &[u8]) -> anyhow::Result<AdapterBatch> {
        debug!("property_details adapter: start bytes_len={}", bytes.len());
        let raw: serde_json::Value = serde_json::from_slice(bytes)?;
        let file: PropertyDetailsFile =
            serde_json::from_value(raw.clone()).map_err(|e| crate::error::PricerError::Adapter {
                input_source: Source::PropertyDetails,
                offset: self.offset,
                reason: e.to_string(),
            })?;

        let mut batch = AdapterBatch::default();
        if !file.success {
            batch.skip(Source::PropertyDetails, self.offset, "success flag not set");
            return Ok(batch);
        }
        let data = match file.data {
            Some(data) => data,
            None => {
                batch.skip(Source::PropertyDetails, self.offset, "missing data container");
                return Ok(batch);
            }
        };

        batch.records.push(IntermediateRecord::PropertyDetails {
            data,
            raw,
            offset: self.offset,
        });
        info!("property_details adapter: parsed 1 record at offset={}", self.offset);
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_successful_file() {
        let payload = json!({
            "success": true,
            "data": {
                "id": "PD-881",
                "reserve_price": 7000000,
                "city": "Surat",
                "name": "3 Shops in Yogi Plaza, Puna, Surat"
            }
        });

        let batch = PropertyDetailsAdapter::new(4)
            .parse(serde_json::to_vec(&payload).unwrap().as_slice())
            .unwrap();

        assert_eq!(batch.records.len(), 1);
        assert!(batch.skipped.is_empty());
        match &batch.records[0] {
            IntermediateRecord::PropertyDetails { data, offset, .. } => {
                assert_eq!(*offset, 4);
                assert_eq!(data.local_id().as_deref(), Some("PD-881"));
                assert_eq!(data.city.as_deref(), Some("Surat"));
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_parse_skips_unsuccessful_file() {
        let payload = json!({ "success": false, "data": { "id": 1 } });
        let batch = PropertyDetailsAdapter::new(0)
            .parse(serde_json::to_vec(&payload).unwrap().as_slice())
            .unwrap();
        assert!(batch.records.is_empty());
        assert_eq!(batch.skipped.len(), 1);
    }

    #[test]
    fn test_parse_skips_missing_data_container() {
        let payload = json!({ "success": true });
        let batch = PropertyDetailsAdapter::new(0)
            .parse(serde_json::to_vec(&payload).unwrap().as_slice())
            .unwrap();
        assert!(batch.records.is_empty());
        assert_eq!(batch.skipped.len(), 1);
        assert!(batch.skipped[0].reason.contains("data container"));
    }
}
