use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::debug;

use crate::constants::{MISSING_CATEGORY, OTHER_CATEGORY};
use crate::domain::PropertyRecord;
use crate::error::{PricerError, Result};

/// Which canonical record field a feature reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeatureField {
    AreaSqft,
    BedroomCount,
    BathroomCount,
    FloorCount,
    AmenityCount,
    HasAmenity { amenity: String },
    City,
    PropertyType,
}

/// Encoding rule for one feature. Every spec yields exactly one slot in the
/// vector, so feature order is the config order with no hidden expansion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Encoding {
    /// Numeric passthrough.
    Numeric,
    /// 1.0 when the field equals this category, else 0.0.
    OneHot { category: String },
    /// Smoothed target mean fit on training data; unseen categories fall
    /// back to the prior, never to training-time leakage.
    TargetMean {
        table: BTreeMap<String, f64>,
        prior: f64,
        smoothing: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSpec {
    pub name: String,
    pub field: FeatureField,
    pub encoding: Encoding,
}

/// Frozen, versioned assembler configuration: the ordered feature list and
/// each feature's encoding rule. Fit once on training data, then immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// Binds every produced vector to the exact transformation configuration.
    /// Stamped by the training task once the full bundle content is known.
    pub schema_version: String,
    pub features: Vec<FeatureSpec>,
}

/// Additive smoothing weight for the city target encoding.
const CITY_SMOOTHING: f64 = 10.0;

impl FeatureConfig {
    /// Fit encoding tables over sanitized training records. Deterministic:
    /// identical corpus yields an identical config regardless of record
    /// iteration order (all aggregation goes through ordered maps).
    pub fn fit(records: &[PropertyRecord]) -> Self {
        let mut features = Vec::new();

        // A numeric feature only earns a slot when the sanitized corpus
        // populates it; a field whose imputation statistic could not be fit
        // stays missing on every record and has nothing to contribute.
        if records.iter().any(|r| !r.area_value.is_missing()) {
            features.push(FeatureSpec {
                name: "area_sqft".to_string(),
                field: FeatureField::AreaSqft,
                encoding: Encoding::Numeric,
            });
        }
        if records.iter().any(|r| !r.bedroom_count.is_missing()) {
            features.push(FeatureSpec {
                name: "bedroom_count".to_string(),
                field: FeatureField::BedroomCount,
                encoding: Encoding::Numeric,
            });
        }
        if records.iter().any(|r| !r.bathroom_count.is_missing()) {
            features.push(FeatureSpec {
                name: "bathroom_count".to_string(),
                field: FeatureField::BathroomCount,
                encoding: Encoding::Numeric,
            });
        }
        if records.iter().any(|r| !r.floor_count.is_missing()) {
            features.push(FeatureSpec {
                name: "floor_count".to_string(),
                field: FeatureField::FloorCount,
                encoding: Encoding::Numeric,
            });
        }
        features.push(FeatureSpec {
            name: "amenity_count".to_string(),
            field: FeatureField::AmenityCount,
            encoding: Encoding::Numeric,
        });

        let mut amenities = BTreeSet::new();
        let mut property_types = BTreeSet::new();
        for record in records {
            amenities.extend(record.amenities.iter().cloned());
            if let Some(pt) = record.property_type.value.clone() {
                property_types.insert(pt);
            }
        }
        property_types.insert(OTHER_CATEGORY.to_string());
        property_types.insert(MISSING_CATEGORY.to_string());

        for amenity in amenities {
            features.push(FeatureSpec {
                name: format!("has_{amenity}"),
                field: FeatureField::HasAmenity {
                    amenity: amenity.clone(),
                },
                encoding: Encoding::Numeric,
            });
        }
        for category in &property_types {
            features.push(FeatureSpec {
                name: format!("property_type={category}"),
                field: FeatureField::PropertyType,
                encoding: Encoding::OneHot {
                    category: category.clone(),
                },
            });
        }

        features.push(FeatureSpec {
            name: "city_price_level".to_string(),
            field: FeatureField::City,
            encoding: Self::fit_city_target(records),
        });

        Self {
            schema_version: String::new(),
            features,
        }
    }

    fn fit_city_target(records: &[PropertyRecord]) -> Encoding {
        let mut sums: BTreeMap<String, (f64, usize)> = BTreeMap::new();
        let mut total = 0.0;
        let mut n = 0usize;
        for record in records {
            let (Some(city), Some(price)) = (record.city.value.clone(), record.price) else {
                continue;
            };
            let entry = sums.entry(city).or_insert((0.0, 0));
            entry.0 += price;
            entry.1 += 1;
            total += price;
            n += 1;
        }
        let prior = if n > 0 { total / n as f64 } else { 0.0 };
        let table = sums
            .into_iter()
            .map(|(city, (sum, count))| {
                let smoothed =
                    (sum + CITY_SMOOTHING * prior) / (count as f64 + CITY_SMOOTHING);
                (city, smoothed)
            })
            .collect();
        Encoding::TargetMean {
            table,
            prior,
            smoothing: CITY_SMOOTHING,
        }
    }

    pub fn with_schema_version(mut self, version: impl Into<String>) -> Self {
        self.schema_version = version.into();
        self
    }

    pub fn feature_names(&self) -> Vec<String> {
        self.features.iter().map(|f| f.name.clone()).collect()
    }
}

/// Fixed-order mapping from feature name to encoded value, tagged with the
/// schema version that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub schema_version: String,
    pub names: Vec<String>,
    pub values: Vec<f64>,
}

/// Non-fatal assembly outcome surfaced to callers (and, at serving time, to
/// the response warnings list).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AssemblyWarning {
    UnseenCategory { feature: String, raw: String },
}

impl fmt::Display for AssemblyWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssemblyWarning::UnseenCategory { feature, raw } => {
                write!(f, "category '{raw}' was not seen at training time for '{feature}'; fallback encoding applied")
            }
        }
    }
}

/// Pure function from a sanitized record to a feature vector. No shared
/// mutable state: identical record + identical frozen config produce an
/// identical vector regardless of call order or concurrency.
pub struct FeatureAssembler;

impl FeatureAssembler {
    pub fn new() -> Self {
        Self
    }

    pub fn assemble(
        &self,
        record: &PropertyRecord,
        config: &FeatureConfig,
    ) -> Result<(FeatureVector, Vec<AssemblyWarning>)> {
        let mut values = Vec::with_capacity(config.features.len());
        let mut warnings = Vec::new();
        // Categories covered by one-hot specs, per field, so a value no spec
        // matches is reported once instead of encoding silently as all-zero.
        let mut onehot_matched: BTreeMap<&str, bool> = BTreeMap::new();

        for spec in &config.features {
            let value = match (&spec.field, &spec.encoding) {
                (FeatureField::AreaSqft, Encoding::Numeric) => {
                    Self::required_numeric("area_value", record.area_value.value)?
                }
                (FeatureField::BedroomCount, Encoding::Numeric) => {
                    Self::required_count("bedroom_count", record.bedroom_count.value)?
                }
                (FeatureField::BathroomCount, Encoding::Numeric) => {
                    Self::required_count("bathroom_count", record.bathroom_count.value)?
                }
                (FeatureField::FloorCount, Encoding::Numeric) => {
                    Self::required_count("floor_count", record.floor_count.value)?
                }
                (FeatureField::AmenityCount, Encoding::Numeric) => record.amenities.len() as f64,
                (FeatureField::HasAmenity { amenity }, _) => {
                    if record.amenities.contains(amenity) {
                        1.0
                    } else {
                        0.0
                    }
                }
                (FeatureField::PropertyType, Encoding::OneHot { category }) => {
                    let current = Self::required_category(
                        "property_type",
                        record.property_type.value.as_deref(),
                    )?;
                    let hit = current == category;
                    let matched = onehot_matched.entry("property_type").or_insert(false);
                    *matched |= hit;
                    if hit {
                        1.0
                    } else {
                        0.0
                    }
                }
                (FeatureField::City, Encoding::TargetMean { table, prior, .. }) => {
                    let city =
                        Self::required_category("city", record.city.value.as_deref())?;
                    match table.get(city) {
                        Some(mean) => *mean,
                        None => {
                            warnings.push(AssemblyWarning::UnseenCategory {
                                feature: spec.name.clone(),
                                raw: city.to_string(),
                            });
                            crate::observability::features::fallback_encoding(&spec.name);
                            *prior
                        }
                    }
                }
                (field, encoding) => {
                    return Err(PricerError::Config(format!(
                        "unsupported feature spec '{}': {:?} with {:?}",
                        spec.name, field, encoding
                    )))
                }
            };
            values.push(value);
        }

        if let Some(false) = onehot_matched.get("property_type") {
            let raw = record
                .property_type
                .value
                .clone()
                .unwrap_or_else(|| MISSING_CATEGORY.to_string());
            warnings.push(AssemblyWarning::UnseenCategory {
                feature: "property_type".to_string(),
                raw,
            });
            crate::observability::features::fallback_encoding("property_type");
        }

        debug!(
            record_id = %record.id,
            features = values.len(),
            warnings = warnings.len(),
            "assembled feature vector"
        );
        Ok((
            FeatureVector {
                schema_version: config.schema_version.clone(),
                names: config.feature_names(),
                values,
            },
            warnings,
        ))
    }

    fn required_numeric(field: &'static str, value: Option<f64>) -> Result<f64> {
        value.ok_or(PricerError::SchemaMapping {
            field,
            reason: "missing after sanitize; assembler requires sanitized records".to_string(),
        })
    }

    fn required_count(field: &'static str, value: Option<i64>) -> Result<f64> {
        Self::required_numeric(field, value.map(|v| v as f64))
    }

    fn required_category<'a>(field: &'static str, value: Option<&'a str>) -> Result<&'a str> {
        value.ok_or(PricerError::SchemaMapping {
            field,
            reason: "missing after sanitize; assembler requires sanitized records".to_string(),
        })
    }
}

impl Default for FeatureAssembler {
    fn default() -> Self {
        Self::new()
    }
}
