// Idempotent batch tasks exposed to the CLI and the admin endpoints. Each
// task takes explicit inputs and produces a named artifact; given the same
// input and frozen configuration the output is deterministic, so a re-run
// replaces an artifact with identical content.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::Config;
use crate::domain::PropertyRecord;
use crate::error::PricerError;
use crate::pipeline::ingestion::{
    BaanknetAdapter, PropertyDetailsAdapter, SourceAdapter, SkippedRecord,
};
use crate::pipeline::processing::extract::TextAttributeExtractor;
use crate::pipeline::processing::features::{FeatureAssembler, FeatureConfig};
use crate::pipeline::processing::normalize::SchemaNormalizer;
use crate::pipeline::processing::sanitize::{Sanitizer, SanitizerConfig};
use crate::registry::estimator::{EstimatorModel, RidgeRegressor};
use crate::registry::{EvalMetrics, ModelBundle, ModelRegistry, PromotionReport};

#[derive(Debug, Default, Deserialize)]
pub struct IngestParams {
    pub baanknet_file: Option<String>,
    pub property_details_dir: Option<String>,
    pub output: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct IngestSummary {
    pub baanknet_records: usize,
    pub property_details_records: usize,
    pub skipped: usize,
    pub mapping_failures: usize,
    pub written_records: usize,
    pub output_file: String,
    /// Per-column missing counts over the written records.
    pub missing_by_field: BTreeMap<String, usize>,
}

/// Parse both sources, normalize into the canonical schema, mine text
/// attributes, and write the normalized NDJSON snapshot. Per-record failures
/// are counted, never fatal.
pub async fn ingest_run(config: &Config, params: IngestParams) -> anyhow::Result<IngestSummary> {
    let baanknet_file = params
        .baanknet_file
        .unwrap_or_else(|| config.data.baanknet_file.clone());
    let details_dir = params
        .property_details_dir
        .unwrap_or_else(|| config.data.property_details_dir.clone());
    let output = params
        .output
        .unwrap_or_else(|| config.data.normalized_file());

    let normalizer = SchemaNormalizer::new();
    let extractor = TextAttributeExtractor::new();
    let mut records: Vec<PropertyRecord> = Vec::new();
    let mut skipped: Vec<SkippedRecord> = Vec::new();
    let mut mapping_failures = 0usize;
    let mut baanknet_records = 0usize;
    let mut property_details_records = 0usize;

    // Source A: one bulk file.
    let baanknet_path = Path::new(&baanknet_file);
    if baanknet_path.exists() {
        let bytes = std::fs::read(baanknet_path)?;
        let batch = BaanknetAdapter.parse(&bytes)?;
        crate::observability::ingest::records_parsed(
            crate::domain::Source::Baanknet,
            batch.records.len() as u64,
        );
        skipped.extend(batch.skipped);
        for intermediate in &batch.records {
            match normalizer.normalize(intermediate) {
                Ok(mut rec) => {
                    extractor.enrich(&mut rec);
                    baanknet_records += 1;
                    records.push(rec);
                }
                Err(e) => {
                    warn!("ingest: dropping baanknet record: {e}");
                    crate::observability::ingest::mapping_failed(crate::domain::Source::Baanknet);
                    mapping_failures += 1;
                }
            }
        }
    } else {
        warn!("ingest: baanknet file '{baanknet_file}' not found, skipping source");
    }

    // Source B: one file per property. Directory order is not stable across
    // platforms, so sort for a deterministic snapshot.
    let details_path = Path::new(&details_dir);
    if details_path.is_dir() {
        let mut files: Vec<PathBuf> = std::fs::read_dir(details_path)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        files.sort();

        for (offset, file) in files.iter().enumerate() {
            let bytes = match std::fs::read(file) {
                Ok(b) => b,
                Err(e) => {
                    warn!("ingest: unreadable file {}: {e}", file.display());
                    continue;
                }
            };
            let batch = match PropertyDetailsAdapter::new(offset).parse(&bytes) {
                Ok(batch) => batch,
                Err(e) => {
                    warn!("ingest: unparseable file {}: {e}", file.display());
                    skipped.push(SkippedRecord {
                        source: crate::domain::Source::PropertyDetails,
                        offset,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            crate::observability::ingest::records_parsed(
                crate::domain::Source::PropertyDetails,
                batch.records.len() as u64,
            );
            skipped.extend(batch.skipped);
            for intermediate in &batch.records {
                match normalizer.normalize(intermediate) {
                    Ok(mut rec) => {
                        extractor.enrich(&mut rec);
                        property_details_records += 1;
                        records.push(rec);
                    }
                    Err(e) => {
                        warn!("ingest: dropping property_details record: {e}");
                        crate::observability::ingest::mapping_failed(
                            crate::domain::Source::PropertyDetails,
                        );
                        mapping_failures += 1;
                    }
                }
            }
        }
    } else {
        warn!("ingest: property details dir '{details_dir}' not found, skipping source");
    }

    let missing_by_field = missingness_report(&records);
    write_normalized(Path::new(&output), &records)?;
    info!(
        "ingest: wrote {} records ({} baanknet, {} property_details), skipped {}, mapping failures {}",
        records.len(),
        baanknet_records,
        property_details_records,
        skipped.len(),
        mapping_failures
    );

    Ok(IngestSummary {
        baanknet_records,
        property_details_records,
        skipped: skipped.len(),
        mapping_failures,
        written_records: records.len(),
        output_file: output,
        missing_by_field,
    })
}

#[derive(Debug, Default, Deserialize)]
pub struct TrainParams {
    /// Normalized NDJSON snapshot; defaults to the ingest output.
    pub input: Option<String>,
    /// Bundle artifact path; defaults under the output dir.
    pub output: Option<String>,
    pub l2: Option<f64>,
    pub holdout_fraction: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct TrainSummary {
    pub bundle_id: String,
    pub schema_version: String,
    pub train_rows: usize,
    pub holdout_rows: usize,
    pub rmse: f64,
    pub mae: f64,
    pub bundle_file: String,
}

/// Fit the frozen sanitizer statistics and feature configuration on the
/// training split, train the estimator, evaluate on the held-out split, and
/// write the self-contained bundle artifact.
pub async fn train_run(config: &Config, params: TrainParams) -> anyhow::Result<TrainSummary> {
    let input = params.input.unwrap_or_else(|| config.data.normalized_file());
    let output = params.output.unwrap_or_else(|| config.data.bundle_file());
    let l2 = params.l2.unwrap_or(config.training.l2);
    let holdout_fraction = params
        .holdout_fraction
        .unwrap_or(config.training.holdout_fraction);

    let records = read_normalized(Path::new(&input))?;
    let priced: Vec<PropertyRecord> = records.into_iter().filter(|r| r.price.is_some()).collect();
    if priced.is_empty() {
        anyhow::bail!("no records with a price in '{input}'");
    }
    let (train, holdout) = holdout_split(priced, holdout_fraction);
    info!(
        "train: {} training rows, {} held-out rows",
        train.len(),
        holdout.len()
    );

    // Corpus-wide statistics: the single synchronization point. Everything
    // is fit on the training split only and frozen from here on.
    let sanitizer_config = SanitizerConfig {
        iqr_k: config.sanitizer.iqr_k,
        winsorize: config.sanitizer.winsorize,
    };
    let sanitizer = Sanitizer::new(sanitizer_config);
    let stats = sanitizer.fit(&train);

    let sanitized: Vec<PropertyRecord> = train
        .iter()
        .map(|record| {
            let mut rec = record.clone();
            sanitizer.apply(&mut rec, &stats);
            rec
        })
        .collect();
    let feature_config = FeatureConfig::fit(&sanitized);
    let schema_version =
        ModelBundle::schema_version_for(&sanitizer_config, &stats, &feature_config);
    let stamped = feature_config
        .clone()
        .with_schema_version(schema_version.clone());

    let assembler = FeatureAssembler::new();
    let mut rows = Vec::new();
    let mut targets = Vec::new();
    for rec in &sanitized {
        let (vector, _) = assembler.assemble(rec, &stamped)?;
        rows.push(vector);
        targets.push(rec.price.expect("training rows are priced"));
    }
    let estimator = EstimatorModel::Ridge(RidgeRegressor::fit(&rows, &targets, l2)?);

    // Held-out evaluation through the exact frozen path.
    let metrics = evaluate(&estimator, &sanitizer, &stats, &stamped, &holdout)?;
    let bundle = ModelBundle::seal(
        estimator,
        sanitizer_config,
        stats,
        feature_config,
        metrics,
        chrono::Utc::now(),
    );
    if let Some(parent) = Path::new(&output).parent() {
        std::fs::create_dir_all(parent)?;
    }
    bundle.save(Path::new(&output))?;
    info!(
        "train: sealed bundle {} schema {} rmse {:.2}",
        bundle.bundle_id, bundle.schema_version, metrics.rmse
    );

    Ok(TrainSummary {
        bundle_id: bundle.bundle_id,
        schema_version: bundle.schema_version,
        train_rows: rows.len(),
        holdout_rows: metrics.n_rows,
        rmse: metrics.rmse,
        mae: metrics.mae,
        bundle_file: output,
    })
}

#[derive(Debug, Deserialize)]
pub struct PromoteParams {
    /// Challenger bundle artifact.
    pub bundle: String,
    /// Normalized NDJSON the held-out set is derived from; defaults to the
    /// ingest output. The same deterministic split as training applies.
    pub input: Option<String>,
    pub holdout_fraction: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct PromoteSummary {
    pub challenger_id: String,
    pub previous_champion_id: Option<String>,
    pub challenger_rmse: f64,
    pub champion_rmse: Option<f64>,
}

impl From<PromotionReport> for PromoteSummary {
    fn from(report: PromotionReport) -> Self {
        Self {
            challenger_id: report.challenger_id,
            previous_champion_id: report.previous_champion_id,
            challenger_rmse: report.challenger_rmse,
            champion_rmse: report.champion_rmse,
        }
    }
}

/// Evaluate a challenger bundle on the shared held-out set and promote it
/// through the gate. Rejection (margin not met, promotion in flight) comes
/// back as `PromotionRejected` with the registry unchanged.
pub async fn promote_run(
    registry: &ModelRegistry,
    config: &Config,
    params: PromoteParams,
) -> crate::error::Result<PromoteSummary> {
    let input = params.input.unwrap_or_else(|| config.data.normalized_file());
    let holdout_fraction = params
        .holdout_fraction
        .unwrap_or(config.training.holdout_fraction);

    let challenger = ModelBundle::load(Path::new(&params.bundle))?;
    let records = read_normalized(Path::new(&input))?;
    let priced: Vec<PropertyRecord> = records.into_iter().filter(|r| r.price.is_some()).collect();
    let (_, holdout) = holdout_split(priced, holdout_fraction);
    if holdout.is_empty() {
        return Err(PricerError::Config(format!(
            "no held-out records derived from '{input}'"
        )));
    }

    let report = registry.promote(challenger, &holdout)?;
    Ok(report.into())
}

fn evaluate(
    estimator: &EstimatorModel,
    sanitizer: &Sanitizer,
    stats: &crate::pipeline::processing::sanitize::SanitizerStats,
    stamped_config: &FeatureConfig,
    holdout: &[PropertyRecord],
) -> crate::error::Result<EvalMetrics> {
    use crate::registry::estimator::Estimator;

    let assembler = FeatureAssembler::new();
    let mut squared = 0.0;
    let mut absolute = 0.0;
    let mut n = 0usize;
    for record in holdout {
        let Some(target) = record.price else { continue };
        let mut rec = record.clone();
        sanitizer.apply(&mut rec, stats);
        let (vector, _) = assembler.assemble(&rec, stamped_config)?;
        let err = estimator.predict(&vector) - target;
        squared += err * err;
        absolute += err.abs();
        n += 1;
    }
    if n == 0 {
        return Err(PricerError::Config(
            "held-out split is empty; lower holdout_fraction or add data".to_string(),
        ));
    }
    Ok(EvalMetrics {
        rmse: (squared / n as f64).sqrt(),
        mae: absolute / n as f64,
        n_rows: n,
    })
}

/// Deterministic split on the record id hash: the same corpus always yields
/// the same held-out set, so champion and challenger are compared on
/// identical records run after run.
pub fn holdout_split(
    records: Vec<PropertyRecord>,
    fraction: f64,
) -> (Vec<PropertyRecord>, Vec<PropertyRecord>) {
    let threshold = (fraction.clamp(0.0, 1.0) * 256.0) as u16;
    let mut train = Vec::new();
    let mut holdout = Vec::new();
    for record in records {
        let digest = Sha256::digest(record.id.as_bytes());
        if u16::from(digest[0]) < threshold {
            holdout.push(record);
        } else {
            train.push(record);
        }
    }
    (train, holdout)
}

pub fn write_normalized(path: &Path, records: &[PropertyRecord]) -> crate::error::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut out = std::fs::File::create(path)?;
    for record in records {
        let line = serde_json::to_string(record)?;
        writeln!(out, "{line}")?;
    }
    Ok(())
}

pub fn read_normalized(path: &Path) -> crate::error::Result<Vec<PropertyRecord>> {
    let content = std::fs::read_to_string(path)?;
    let mut records = Vec::new();
    for (lineno, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<PropertyRecord>(line) {
            Ok(record) => records.push(record),
            Err(e) => warn!("skipping invalid record on line {}: {e}", lineno + 1),
        }
    }
    Ok(records)
}

fn missingness_report(records: &[PropertyRecord]) -> BTreeMap<String, usize> {
    let mut missing: BTreeMap<String, usize> = BTreeMap::new();
    let mut bump = |field: &str, is_missing: bool| {
        if is_missing {
            *missing.entry(field.to_string()).or_insert(0) += 1;
        }
    };
    for rec in records {
        bump("price", rec.price.is_none());
        bump("city", rec.city.is_missing());
        bump("property_type", rec.property_type.is_missing());
        bump("area_value", rec.area_value.is_missing());
        bump("bedroom_count", rec.bedroom_count.is_missing());
        bump("bathroom_count", rec.bathroom_count.is_missing());
        bump("floor_count", rec.floor_count.is_missing());
        bump("auction_date", rec.auction_date.is_none());
    }
    missing
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Observed, Source};
    use serde_json::json;

    fn record(id: &str, price: Option<f64>) -> PropertyRecord {
        let mut rec = PropertyRecord::empty(id.to_string(), Source::Baanknet, json!({}));
        rec.price = price;
        rec.city = Observed::structured("Chennai".to_string());
        rec.canonical = true;
        rec
    }

    #[test]
    fn test_holdout_split_is_deterministic_and_disjoint() {
        let records: Vec<PropertyRecord> =
            (0..100).map(|i| record(&format!("id-{i}"), Some(1.0))).collect();

        let (train_a, holdout_a) = holdout_split(records.clone(), 0.2);
        let (train_b, holdout_b) = holdout_split(records.clone(), 0.2);
        assert_eq!(train_a.len(), train_b.len());
        assert_eq!(holdout_a.len(), holdout_b.len());
        assert_eq!(train_a.len() + holdout_a.len(), records.len());
        assert!(!holdout_a.is_empty(), "expected a non-trivial held-out set");

        let holdout_ids: std::collections::HashSet<_> =
            holdout_a.iter().map(|r| r.id.clone()).collect();
        assert!(train_a.iter().all(|r| !holdout_ids.contains(&r.id)));
    }

    #[test]
    fn test_normalized_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("normalized.ndjson");
        let records = vec![record("a", Some(10.0)), record("b", None)];

        write_normalized(&path, &records).unwrap();
        let reloaded = read_normalized(&path).unwrap();
        assert_eq!(records, reloaded);
    }

    #[test]
    fn test_missingness_report_counts_explicit_missing() {
        let mut with_area = record("a", Some(10.0));
        with_area.area_value = Observed::structured(500.0);
        let without_area = record("b", None);

        let report = missingness_report(&[with_area, without_area]);
        assert_eq!(report.get("area_value"), Some(&1));
        assert_eq!(report.get("price"), Some(&1));
    }
}
