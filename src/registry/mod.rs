// Model registry: the champion/challenger bundle store and the promotion
// gate. A bundle is always manipulated whole; the serving path must never
// observe an estimator paired with another bundle's frozen configuration.

pub mod estimator;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{info, warn};

use crate::domain::PropertyRecord;
use crate::error::{PricerError, Result};
use crate::pipeline::processing::features::{
    AssemblyWarning, FeatureAssembler, FeatureConfig, FeatureVector,
};
use crate::pipeline::processing::sanitize::{Sanitizer, SanitizerConfig, SanitizerStats};
use estimator::{Estimator, EstimatorModel};

/// Evaluation metrics computed on a held-out set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvalMetrics {
    pub rmse: f64,
    pub mae: f64,
    pub n_rows: usize,
}

/// Self-contained model artifact: the estimator plus every frozen statistic
/// and configuration it was trained against. The promotion gate only ever
/// moves these as a unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelBundle {
    /// Content hash over the sealed bundle.
    pub bundle_id: String,
    /// Binds vectors to the exact transformation configuration.
    pub schema_version: String,
    pub estimator: EstimatorModel,
    pub sanitizer_config: SanitizerConfig,
    pub sanitizer_stats: SanitizerStats,
    pub feature_config: FeatureConfig,
    pub metrics: EvalMetrics,
    pub trained_at: DateTime<Utc>,
}

impl ModelBundle {
    /// Derive the schema version from the frozen transformation content.
    /// Two trainings with identical statistics and feature tables agree.
    pub fn schema_version_for(
        sanitizer_config: &SanitizerConfig,
        sanitizer_stats: &SanitizerStats,
        feature_config: &FeatureConfig,
    ) -> String {
        let mut hasher = Sha256::new();
        hasher.update(serde_json::to_vec(sanitizer_config).unwrap_or_default());
        hasher.update(serde_json::to_vec(sanitizer_stats).unwrap_or_default());
        hasher.update(serde_json::to_vec(&feature_config.features).unwrap_or_default());
        format!("v1-{}", &hex::encode(hasher.finalize())[..12])
    }

    /// Seal a trained bundle: stamp the schema version into the feature
    /// configuration and derive the content-addressed bundle id.
    pub fn seal(
        estimator: EstimatorModel,
        sanitizer_config: SanitizerConfig,
        sanitizer_stats: SanitizerStats,
        feature_config: FeatureConfig,
        metrics: EvalMetrics,
        trained_at: DateTime<Utc>,
    ) -> Self {
        let schema_version =
            Self::schema_version_for(&sanitizer_config, &sanitizer_stats, &feature_config);
        let feature_config = feature_config.with_schema_version(schema_version.clone());

        let mut hasher = Sha256::new();
        hasher.update(schema_version.as_bytes());
        hasher.update(serde_json::to_vec(&estimator).unwrap_or_default());
        hasher.update(serde_json::to_vec(&metrics).unwrap_or_default());
        let bundle_id = hex::encode(&hasher.finalize()[..16]);

        Self {
            bundle_id,
            schema_version,
            estimator,
            sanitizer_config,
            sanitizer_stats,
            feature_config,
            metrics,
            trained_at,
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Apply this bundle's frozen sanitize + assemble path to one normalized,
    /// extracted record. This is the single transformation path shared by
    /// training-time evaluation and serving.
    pub fn transform(
        &self,
        mut record: PropertyRecord,
    ) -> Result<(PropertyRecord, FeatureVector, Vec<AssemblyWarning>)> {
        let sanitizer = Sanitizer::new(self.sanitizer_config);
        sanitizer.apply(&mut record, &self.sanitizer_stats);
        let (vector, warnings) = FeatureAssembler::new().assemble(&record, &self.feature_config)?;
        Ok((record, vector, warnings))
    }

    /// Score one record through the frozen path. Rejects vectors whose
    /// schema version does not match this bundle.
    pub fn predict(&self, vector: &FeatureVector) -> Result<f64> {
        if vector.schema_version != self.schema_version {
            return Err(PricerError::SchemaVersionMismatch {
                vector: vector.schema_version.clone(),
                model: self.schema_version.clone(),
            });
        }
        Ok(self.estimator.predict(vector))
    }

    /// Evaluate this bundle on held-out records. Targets are the raw prices
    /// as observed, taken before the bundle's own winsorization runs.
    pub fn evaluate(&self, heldout: &[PropertyRecord]) -> Result<EvalMetrics> {
        let mut squared = 0.0;
        let mut absolute = 0.0;
        let mut n = 0usize;
        for record in heldout {
            let Some(target) = record.price else { continue };
            let (_, vector, _) = self.transform(record.clone())?;
            let predicted = self.predict(&vector)?;
            let err = predicted - target;
            squared += err * err;
            absolute += err.abs();
            n += 1;
        }
        if n == 0 {
            return Err(PricerError::Config(
                "held-out set has no records with a price".to_string(),
            ));
        }
        Ok(EvalMetrics {
            rmse: (squared / n as f64).sqrt(),
            mae: absolute / n as f64,
            n_rows: n,
        })
    }
}

/// Promotion gate settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PromotionConfig {
    /// Required fractional RMSE improvement over the champion, e.g. 0.01
    /// demands the challenger beat the champion by more than 1%.
    pub min_rmse_margin: f64,
}

impl Default for PromotionConfig {
    fn default() -> Self {
        Self {
            min_rmse_margin: 0.01,
        }
    }
}

/// Outcome of a successful promotion decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromotionReport {
    pub challenger_id: String,
    pub previous_champion_id: Option<String>,
    pub challenger_rmse: f64,
    pub champion_rmse: Option<f64>,
}

/// Holds the currently-served bundle and decides atomic promotion.
///
/// Readers take an `Arc` snapshot and keep using it for a whole request; a
/// concurrent promotion can never mix an old configuration with a new model
/// mid-request. Promotions are single-flight: a second attempt while one is
/// in progress is rejected, not queued.
pub struct ModelRegistry {
    champion: RwLock<Option<Arc<ModelBundle>>>,
    promotion_gate: Mutex<()>,
    config: PromotionConfig,
}

impl ModelRegistry {
    pub fn new(config: PromotionConfig) -> Self {
        Self {
            champion: RwLock::new(None),
            promotion_gate: Mutex::new(()),
            config,
        }
    }

    /// Snapshot of the currently-served bundle, or `None` before the first
    /// promotion.
    pub fn champion(&self) -> Option<Arc<ModelBundle>> {
        self.champion.read().unwrap().clone()
    }

    /// Install a previously-sealed bundle as the champion at startup. Only
    /// valid while the registry is empty; replacing a live champion must go
    /// through the promotion gate.
    pub fn install_champion(&self, bundle: ModelBundle) -> Result<()> {
        let mut champion = self.champion.write().unwrap();
        if champion.is_some() {
            return Err(PricerError::PromotionRejected(
                "a champion is already installed; use the promotion gate".to_string(),
            ));
        }
        info!(bundle_id = %bundle.bundle_id, "installed champion at startup");
        *champion = Some(Arc::new(bundle));
        Ok(())
    }

    /// Evaluate a challenger against the current champion on the same
    /// held-out set and promote iff it clears the margin. The first bundle
    /// promotes unconditionally (there is nothing to beat).
    pub fn promote(
        &self,
        challenger: ModelBundle,
        heldout: &[PropertyRecord],
    ) -> Result<PromotionReport> {
        let _gate = self.promotion_gate.try_lock().map_err(|_| {
            warn!("promotion attempt rejected: another promotion is in flight");
            PricerError::PromotionRejected("another promotion is in flight".to_string())
        })?;

        let incumbent = self.champion();
        let challenger_metrics = challenger.evaluate(heldout)?;

        let report = match &incumbent {
            None => {
                info!(
                    bundle_id = %challenger.bundle_id,
                    rmse = challenger_metrics.rmse,
                    "installing first champion"
                );
                PromotionReport {
                    challenger_id: challenger.bundle_id.clone(),
                    previous_champion_id: None,
                    challenger_rmse: challenger_metrics.rmse,
                    champion_rmse: None,
                }
            }
            Some(champion) => {
                let champion_metrics = champion.evaluate(heldout)?;
                let required = champion_metrics.rmse * (1.0 - self.config.min_rmse_margin);
                if challenger_metrics.rmse >= required {
                    return Err(PricerError::PromotionRejected(format!(
                        "challenger rmse {:.2} did not beat champion rmse {:.2} by margin {:.4}",
                        challenger_metrics.rmse, champion_metrics.rmse, self.config.min_rmse_margin
                    )));
                }
                info!(
                    old = %champion.bundle_id,
                    new = %challenger.bundle_id,
                    old_rmse = champion_metrics.rmse,
                    new_rmse = challenger_metrics.rmse,
                    "promoting challenger"
                );
                PromotionReport {
                    challenger_id: challenger.bundle_id.clone(),
                    previous_champion_id: Some(champion.bundle_id.clone()),
                    challenger_rmse: challenger_metrics.rmse,
                    champion_rmse: Some(champion_metrics.rmse),
                }
            }
        };

        // The swap itself is the only instant readers can be affected, and
        // they either see the complete old pair or the complete new one.
        *self.champion.write().unwrap() = Some(Arc::new(challenger));
        crate::observability::registry::promotion();
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Observed, Source};
    use crate::pipeline::processing::features::FeatureConfig;
    use crate::registry::estimator::RidgeRegressor;
    use serde_json::json;

    fn training_record(city: &str, area: f64, price: f64) -> PropertyRecord {
        let mut rec =
            PropertyRecord::empty(format!("r-{city}-{area}"), Source::Baanknet, json!({}));
        rec.price = Some(price);
        rec.city = Observed::structured(city.to_string());
        rec.property_type = Observed::structured("flat".to_string());
        rec.area_value = Observed::structured(area);
        rec.bedroom_count = Observed::structured(2);
        rec.bathroom_count = Observed::structured(1);
        rec.floor_count = Observed::structured(1);
        rec.canonical = true;
        rec
    }

    fn corpus() -> Vec<PropertyRecord> {
        (0..20)
            .map(|i| {
                let area = 400.0 + 50.0 * i as f64;
                training_record(
                    if i % 2 == 0 { "Chennai" } else { "Mumbai" },
                    area,
                    area * 2000.0,
                )
            })
            .collect()
    }

    fn bundle_with_noise(corpus: &[PropertyRecord], l2: f64) -> ModelBundle {
        let sanitizer_config = SanitizerConfig::default();
        let sanitizer = Sanitizer::new(sanitizer_config);
        let stats = sanitizer.fit(corpus);

        let sanitized: Vec<PropertyRecord> = corpus
            .iter()
            .map(|r| {
                let mut rec = r.clone();
                sanitizer.apply(&mut rec, &stats);
                rec
            })
            .collect();
        let feature_config = FeatureConfig::fit(&sanitized);
        let version =
            ModelBundle::schema_version_for(&sanitizer_config, &stats, &feature_config);
        let stamped = feature_config.clone().with_schema_version(version);

        let assembler = FeatureAssembler::new();
        let mut rows = Vec::new();
        let mut targets = Vec::new();
        for rec in &sanitized {
            let (v, _) = assembler.assemble(rec, &stamped).unwrap();
            rows.push(v);
            targets.push(rec.price.unwrap());
        }
        let model = RidgeRegressor::fit(&rows, &targets, l2).unwrap();

        ModelBundle::seal(
            EstimatorModel::Ridge(model),
            sanitizer_config,
            stats,
            feature_config,
            EvalMetrics {
                rmse: 0.0,
                mae: 0.0,
                n_rows: targets.len(),
            },
            Utc::now(),
        )
    }

    #[test]
    fn test_first_bundle_installs_unconditionally() {
        let registry = ModelRegistry::new(PromotionConfig::default());
        assert!(registry.champion().is_none());

        let data = corpus();
        let bundle = bundle_with_noise(&data, 1e-6);
        let report = registry.promote(bundle, &data).unwrap();
        assert!(report.previous_champion_id.is_none());
        assert!(registry.champion().is_some());
    }

    #[test]
    fn test_promotion_rejected_below_margin_leaves_champion_unchanged() {
        let registry = ModelRegistry::new(PromotionConfig {
            min_rmse_margin: 0.05,
        });
        let data = corpus();

        let good = bundle_with_noise(&data, 1e-6);
        registry.promote(good, &data).unwrap();
        let champion_before = registry.champion().unwrap();

        // Heavier regularization fits the same data strictly worse.
        let worse = bundle_with_noise(&data, 1e9);
        let err = registry.promote(worse, &data).unwrap_err();
        assert!(matches!(err, PricerError::PromotionRejected(_)));

        // Re-query the registry: the champion must be the identical bundle.
        let champion_after = registry.champion().unwrap();
        assert_eq!(champion_before.bundle_id, champion_after.bundle_id);
    }

    #[test]
    fn test_reader_snapshot_survives_promotion() {
        let registry = ModelRegistry::new(PromotionConfig {
            min_rmse_margin: 0.0,
        });
        let data = corpus();
        registry.promote(bundle_with_noise(&data, 1e9), &data).unwrap();

        // A request takes its snapshot, then a promotion lands mid-request.
        let snapshot = registry.champion().unwrap();
        registry.promote(bundle_with_noise(&data, 1e-6), &data).unwrap();

        // The snapshot still carries its own consistent (model, config) pair.
        let probe = data[0].clone();
        let (_, vector, _) = snapshot.transform(probe).unwrap();
        assert!(snapshot.predict(&vector).is_ok());
        assert_ne!(
            snapshot.bundle_id,
            registry.champion().unwrap().bundle_id
        );
    }

    #[test]
    fn test_schema_version_mismatch_is_rejected() {
        let data = corpus();
        let bundle = bundle_with_noise(&data, 1e-6);
        let (_, mut vector, _) = bundle.transform(data[0].clone()).unwrap();
        vector.schema_version = "v1-deadbeef0000".to_string();

        let err = bundle.predict(&vector).unwrap_err();
        assert!(matches!(err, PricerError::SchemaVersionMismatch { .. }));
    }

    #[test]
    fn test_bundle_round_trip_predicts_identically() {
        let data = corpus();
        let bundle = bundle_with_noise(&data, 0.5);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bundle.json");

        bundle.save(&path).unwrap();
        let reloaded = ModelBundle::load(&path).unwrap();

        let (_, vector, _) = bundle.transform(data[3].clone()).unwrap();
        assert_eq!(
            bundle.predict(&vector).unwrap(),
            reloaded.predict(&vector).unwrap()
        );
        assert_eq!(bundle.schema_version, reloaded.schema_version);
    }
}
