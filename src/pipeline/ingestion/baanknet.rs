use serde::Deserialize;
use tracing::{debug, info};

use super::{AdapterBatch, IntermediateRecord, SourceAdapter};
use crate::domain::Source;

/// One element of the bulk auction listing array. Elements with `status != 1`
/// are placeholders for listings the portal could not resolve.
#[derive(Debug, Clone, Deserialize)]
pub struct BaanknetItem {
    pub status: Option<i64>,
    /// Listing id; numeric in some dumps, string in others.
    pub property_id: Option<serde_json::Value>,
    #[serde(rename = "respData")]
    pub resp_data: Option<BaanknetRespData>,
}

/// The nested response object carrying the listing attributes.
#[derive(Debug, Clone, Deserialize)]
pub struct BaanknetRespData {
    #[serde(rename = "propertyPrice")]
    pub property_price: Option<serde_json::Value>,
    pub city: Option<String>,
    pub state: Option<String>,
    #[serde(rename = "summaryDesc")]
    pub summary_desc: Option<String>,
    #[serde(rename = "propertyType")]
    pub property_type: Option<String>,
    #[serde(rename = "auctionDate")]
    pub auction_date: Option<String>,
    #[serde(rename = "bankName")]
    pub bank_name: Option<String>,
}

impl BaanknetItem {
    /// Source-local identifier as a plain string.
    pub fn local_id(&self) -> Option<String> {
        match &self.property_id {
            Some(serde_json::Value::String(s)) if !s.trim().is_empty() => {
                Some(s.trim().to_string())
            }
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Adapter for the bulk listing file: one JSON array, each usable element
/// carrying a `respData` object.
pub struct BaanknetAdapter;

impl SourceAdapter for BaanknetAdapter {
    fn source(&self) -> Source {
        Source::Baanknet
    }

    fn parse(&self, bytes: &[u8]) -> anyhow::Result<AdapterBatch> {
        debug!("baanknet adapter: start bytes_len={}", bytes.len());
        let doc: serde_json::Value = serde_json::from_slice(bytes)?;
        let elements = doc.as_array().ok_or(crate::error::PricerError::Adapter {
            input_source: Source::Baanknet,
            offset: 0,
            reason: "payload is not a JSON array".to_string(),
        })?;

        let mut batch = AdapterBatch::default();
        for (offset, element) in elements.iter().enumerate() {
            let item: BaanknetItem = match serde_json::from_value(element.clone()) {
                Ok(item) => item,
                Err(e) => {
                    batch.skip(Source::Baanknet, offset, format!("malformed element: {e}"));
                    continue;
                }
            };
            if item.status != Some(1) {
                batch.skip(
                    Source::Baanknet,
                    offset,
                    format!("unusable status {:?}", item.status),
                );
                continue;
            }
            if item.resp_data.is_none() {
                batch.skip(Source::Baanknet, offset, "missing respData container");
                continue;
            }
            batch.records.push(IntermediateRecord::Baanknet {
                item,
                raw: element.clone(),
                offset,
            });
        }

        info!(
            "baanknet adapter: parsed records={} skipped={}",
            batch.records.len(),
            batch.skipped.len()
        );
        Ok(batch)
    }
}
