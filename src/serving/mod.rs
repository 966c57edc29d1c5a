// Prediction service: revalidates an inbound payload, replays the champion
// bundle's frozen transformation path on one ad-hoc record, and scores it.
// The request pipeline is RECEIVE → VALIDATE → NORMALIZE → EXTRACT →
// SANITIZE → ASSEMBLE → INFER → RESPOND, with errors possible at every step.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::domain::{Observed, PropertyRecord, QualitySignal, Source};
use crate::error::{PricerError, Result};
use crate::pipeline::processing::extract::TextAttributeExtractor;
use crate::pipeline::processing::normalize::SchemaNormalizer;
use crate::pipeline::processing::sanitize::fold_category;
use crate::registry::ModelRegistry;

/// The subset of record-shaped fields a caller may supply. `price` is not a
/// field here on purpose: predictions are for unsold lots, and unknown keys
/// (including "price") are rejected at validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PredictRequest {
    pub city: Option<String>,
    pub property_type: Option<String>,
    /// Square feet unless `area_unit` says otherwise.
    pub area_value: Option<f64>,
    pub area_unit: Option<String>,
    pub floor_count: Option<i64>,
    pub bedroom_count: Option<i64>,
    pub bathroom_count: Option<i64>,
    pub amenities: Option<Vec<String>>,
    pub description_text: Option<String>,
    pub auction_date: Option<NaiveDate>,
    pub address: Option<String>,
    pub locality: Option<String>,
    pub state: Option<String>,
    pub pincode: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictResponse {
    pub predicted_price: f64,
    pub schema_version: String,
    pub warnings: Vec<String>,
}

/// Structured error body returned to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error_kind: String,
    pub message: String,
}

/// Request pipeline step, used for tracing and error context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeStage {
    Receive,
    Validate,
    Normalize,
    Extract,
    Sanitize,
    Assemble,
    Infer,
    Respond,
}

impl fmt::Display for ServeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServeStage::Receive => "receive",
            ServeStage::Validate => "validate",
            ServeStage::Normalize => "normalize",
            ServeStage::Extract => "extract",
            ServeStage::Sanitize => "sanitize",
            ServeStage::Assemble => "assemble",
            ServeStage::Infer => "infer",
            ServeStage::Respond => "respond",
        };
        f.write_str(s)
    }
}

/// Stateless per-request scorer. The champion snapshot is taken once at the
/// head of each request and carried through every stage, so a concurrent
/// promotion cannot mix old normalization with a new model mid-request.
pub struct PredictionService {
    registry: Arc<ModelRegistry>,
    normalizer: SchemaNormalizer,
    extractor: TextAttributeExtractor,
    infer_timeout: Duration,
}

impl PredictionService {
    pub fn new(registry: Arc<ModelRegistry>, infer_timeout: Duration) -> Self {
        Self {
            registry,
            normalizer: SchemaNormalizer::new(),
            extractor: TextAttributeExtractor::new(),
            infer_timeout,
        }
    }

    pub async fn predict(&self, payload: serde_json::Value) -> Result<PredictResponse> {
        let started = std::time::Instant::now();
        let result = self.predict_inner(payload).await;
        crate::observability::serving::duration(started.elapsed().as_secs_f64());
        match &result {
            Ok(_) => crate::observability::serving::request("success"),
            Err(PricerError::Validation(_)) => crate::observability::serving::request("rejected"),
            Err(_) => crate::observability::serving::request("error"),
        }
        result
    }

    async fn predict_inner(&self, payload: serde_json::Value) -> Result<PredictResponse> {
        // RECEIVE: pin the champion for the whole request.
        let champion = self
            .registry
            .champion()
            .ok_or(PricerError::ModelUnavailable)?;
        debug!(
            stage = %ServeStage::Receive,
            schema_version = %champion.schema_version,
            "pinned champion for request"
        );

        // VALIDATE
        let request = Self::validate(payload.clone())?;
        debug!(stage = %ServeStage::Validate, "request accepted");

        // NORMALIZE: the same canonical-shaping rules as the batch path.
        let record = self.build_record(&request, payload);
        let mut record = self.normalizer.normalize_canonical(record);

        // EXTRACT
        self.extractor.enrich(&mut record);

        // SANITIZE + ASSEMBLE, both under the champion's frozen configuration.
        let (record, vector, assembly_warnings) = champion.transform(record)?;

        // INFER, bounded by the service-level deadline.
        let timeout_ms = self.infer_timeout.as_millis() as u64;
        let champion_for_infer = champion.clone();
        let predicted = tokio::time::timeout(self.infer_timeout, async move {
            champion_for_infer.predict(&vector)
        })
        .await
        .map_err(|_| {
            warn!(stage = %ServeStage::Infer, "inference deadline exceeded");
            PricerError::InferenceTimeout(timeout_ms)
        })??;

        // RESPOND: surface every non-fatal signal the record accumulated.
        let mut warnings: Vec<String> = record
            .quality
            .iter()
            .map(signal_warning)
            .collect();
        warnings.extend(assembly_warnings.iter().map(|w| w.to_string()));

        Ok(PredictResponse {
            predicted_price: predicted,
            schema_version: champion.schema_version.clone(),
            warnings,
        })
    }

    /// Typed validation of the raw payload. Wrong types and unknown fields
    /// (notably `price`) are client errors, as is a payload without enough
    /// identifying content to describe a property.
    fn validate(payload: serde_json::Value) -> Result<PredictRequest> {
        let request: PredictRequest = serde_json::from_value(payload)
            .map_err(|e| PricerError::Validation(e.to_string()))?;

        let city_known = request
            .city
            .as_deref()
            .map(|c| !c.trim().is_empty())
            .unwrap_or(false);
        if !city_known {
            return Err(PricerError::Validation(
                "field 'city' is mandatory".to_string(),
            ));
        }
        let has_content = request.description_text.is_some()
            || request.area_value.is_some()
            || request.property_type.is_some()
            || request.bedroom_count.is_some();
        if !has_content {
            return Err(PricerError::Validation(
                "at least one of description_text, area_value, property_type or bedroom_count is required"
                    .to_string(),
            ));
        }
        Ok(request)
    }

    /// Shape the request into a canonical record. The payload itself becomes
    /// the record's raw payload, and the record id is derived from it, so an
    /// identical request always maps to an identical record.
    fn build_record(&self, request: &PredictRequest, payload: serde_json::Value) -> PropertyRecord {
        let local_id = payload.to_string();
        let id = crate::domain::record_id(Source::Request, &local_id);
        let mut rec = PropertyRecord::empty(id, Source::Request, payload);

        rec.city = request
            .city
            .clone()
            .map(Observed::structured)
            .unwrap_or_default();
        rec.property_type = request
            .property_type
            .clone()
            .map(Observed::structured)
            .unwrap_or_default();
        rec.area_value = request
            .area_value
            .map(Observed::structured)
            .unwrap_or_default();
        rec.area_unit = request.area_unit.clone();
        rec.floor_count = request
            .floor_count
            .map(Observed::structured)
            .unwrap_or_default();
        rec.bedroom_count = request
            .bedroom_count
            .map(Observed::structured)
            .unwrap_or_default();
        rec.bathroom_count = request
            .bathroom_count
            .map(Observed::structured)
            .unwrap_or_default();
        if let Some(amenities) = &request.amenities {
            for amenity in amenities {
                let token = fold_category(amenity).replace(' ', "_");
                if !token.is_empty() {
                    rec.amenities.insert(token);
                }
            }
        }
        if let Some(text) = &request.description_text {
            rec.description.push("description_text", text);
        }
        rec.auction_date = request.auction_date;
        rec.address = request.address.clone();
        rec.locality = request.locality.clone();
        rec.state = request.state.clone();
        rec.pincode = request.pincode;
        rec
    }
}

/// Human-readable warning line for a record-level quality signal.
fn signal_warning(signal: &QualitySignal) -> String {
    match signal {
        QualitySignal::ExtractionConflict {
            field,
            structured,
            extracted,
        } => format!(
            "'{field}': text-extracted value '{extracted}' disagreed with structured value '{structured}'; structured value used"
        ),
        QualitySignal::OutOfRange {
            field,
            original,
            capped: Some(capped),
        } => format!("'{field}': value {original} outside training range, capped to {capped}"),
        QualitySignal::OutOfRange {
            field, original, ..
        } => format!("'{field}': value {original} outside training range"),
        QualitySignal::UnseenCategory { field, raw } => {
            format!("'{field}': category '{raw}' was not seen at training time; fallback applied")
        }
        QualitySignal::Imputed { field } => {
            format!("'{field}': missing value imputed from training statistics")
        }
        QualitySignal::UnknownUnit { raw } => {
            format!("area unit '{raw}' not recognized; area treated as missing")
        }
    }
}

/// Map a service error to an HTTP status category plus a structured body.
/// Client-input errors and server-unavailable errors are distinguished.
pub fn error_response(err: &PricerError) -> (u16, ErrorResponse) {
    match err {
        PricerError::Validation(msg) => (
            400,
            ErrorResponse {
                error_kind: "validation".to_string(),
                message: msg.clone(),
            },
        ),
        PricerError::ModelUnavailable => (
            503,
            ErrorResponse {
                error_kind: "model_unavailable".to_string(),
                message: err.to_string(),
            },
        ),
        PricerError::InferenceTimeout(_) => (
            503,
            ErrorResponse {
                error_kind: "inference_timeout".to_string(),
                message: err.to_string(),
            },
        ),
        PricerError::PromotionRejected(msg) => (
            409,
            ErrorResponse {
                error_kind: "promotion_rejected".to_string(),
                message: msg.clone(),
            },
        ),
        other => (
            500,
            ErrorResponse {
                error_kind: "internal".to_string(),
                message: other.to_string(),
            },
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validate_rejects_missing_city() {
        let err = PredictionService::validate(json!({"area_value": 500.0})).unwrap_err();
        assert!(matches!(err, PricerError::Validation(_)));
    }

    #[test]
    fn test_validate_rejects_price_field() {
        let err = PredictionService::validate(json!({
            "city": "Chennai",
            "area_value": 500.0,
            "price": 100.0
        }))
        .unwrap_err();
        assert!(matches!(err, PricerError::Validation(_)));
    }

    #[test]
    fn test_validate_rejects_wrong_types() {
        let err = PredictionService::validate(json!({
            "city": "Chennai",
            "area_value": "five hundred"
        }))
        .unwrap_err();
        assert!(matches!(err, PricerError::Validation(_)));
    }

    #[test]
    fn test_validate_accepts_minimal_payload() {
        let request = PredictionService::validate(json!({
            "city": "Chennai",
            "description_text": "2 BHK flat with parking"
        }))
        .unwrap();
        assert_eq!(request.city.as_deref(), Some("Chennai"));
    }

    #[test]
    fn test_error_response_distinguishes_client_and_server_errors() {
        let (status, body) = error_response(&PricerError::Validation("bad".to_string()));
        assert_eq!(status, 400);
        assert_eq!(body.error_kind, "validation");

        let (status, body) = error_response(&PricerError::ModelUnavailable);
        assert_eq!(status, 503);
        assert_eq!(body.error_kind, "model_unavailable");
    }
}
