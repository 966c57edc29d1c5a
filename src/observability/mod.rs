// Observability: counters and histograms for pipeline monitoring, exported
// in Prometheus format via the server's /metrics route.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::PrometheusHandle;
use tracing::info;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder and register the metric catalog.
/// Safe to call once per process; later calls are no-ops.
pub fn init_metrics() {
    if METRICS_HANDLE.get().is_some() {
        return;
    }
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    match builder.install_recorder() {
        Ok(handle) => {
            describe_catalog();
            let _ = METRICS_HANDLE.set(handle);
            info!("metrics system initialized");
        }
        Err(e) => {
            // Tests and library embedders may have installed a recorder
            // already; metrics then flow to that recorder instead.
            info!("metrics recorder not installed: {e}");
        }
    }
}

/// Render the current metrics snapshot for the /metrics route.
pub fn render() -> Option<String> {
    METRICS_HANDLE.get().map(|h| h.render())
}

fn describe_catalog() {
    describe_counter!(
        "ingest_records_skipped_total",
        "Records skipped by a source adapter"
    );
    describe_counter!(
        "ingest_records_parsed_total",
        "Records parsed into the intermediate representation"
    );
    describe_counter!(
        "ingest_mapping_failures_total",
        "Records dropped by the schema normalizer"
    );
    describe_counter!(
        "sanitize_unknown_unit_total",
        "Area values dropped for an unrecognized unit"
    );
    describe_counter!(
        "sanitize_unseen_category_total",
        "Categorical values routed to the OTHER bucket"
    );
    describe_counter!("sanitize_outliers_total", "Values outside frozen bounds");
    describe_counter!(
        "sanitize_imputed_total",
        "Missing values filled from frozen statistics"
    );
    describe_counter!(
        "features_fallback_encoding_total",
        "Serving-time categories encoded with the fallback prior"
    );
    describe_counter!("registry_promotions_total", "Champion swaps");
    describe_counter!("predict_requests_total", "Prediction requests by outcome");
    describe_histogram!(
        "predict_duration_seconds",
        "End-to-end prediction request duration"
    );
}

pub mod ingest {
    use super::*;
    use crate::domain::Source;

    pub fn record_skipped(source: Source) {
        counter!("ingest_records_skipped_total", "source" => source.as_str()).increment(1);
    }

    pub fn records_parsed(source: Source, n: u64) {
        counter!("ingest_records_parsed_total", "source" => source.as_str()).increment(n);
    }

    pub fn mapping_failed(source: Source) {
        counter!("ingest_mapping_failures_total", "source" => source.as_str()).increment(1);
    }
}

pub mod sanitize {
    use super::*;

    pub fn unknown_unit() {
        counter!("sanitize_unknown_unit_total").increment(1);
    }

    pub fn unseen_category(field: &str) {
        counter!("sanitize_unseen_category_total", "field" => field.to_string()).increment(1);
    }

    pub fn outlier(field: &str) {
        counter!("sanitize_outliers_total", "field" => field.to_string()).increment(1);
    }

    pub fn imputed(field: &str) {
        counter!("sanitize_imputed_total", "field" => field.to_string()).increment(1);
    }
}

pub mod features {
    use super::*;

    pub fn fallback_encoding(feature: &str) {
        counter!("features_fallback_encoding_total", "feature" => feature.to_string())
            .increment(1);
    }
}

pub mod registry {
    use super::*;

    pub fn promotion() {
        counter!("registry_promotions_total").increment(1);
    }
}

pub mod serving {
    use super::*;

    pub fn request(outcome: &'static str) {
        counter!("predict_requests_total", "outcome" => outcome).increment(1);
    }

    pub fn duration(seconds: f64) {
        histogram!("predict_duration_seconds").record(seconds);
    }
}
