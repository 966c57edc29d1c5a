use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::constants::{
    MISSING_CATEGORY, OTHER_CATEGORY, SQFT_PER_ACRE, SQFT_PER_HECTARE, SQFT_PER_SQM, SQFT_PER_SQYD,
};
use crate::domain::{Observed, PropertyRecord, QualitySignal};

/// Static area unit conversion table to square feet. Unit tokens come from
/// the extractor or from request payloads; unrecognized tokens mark the
/// field missing rather than guessing.
static UNIT_TO_SQFT: Lazy<BTreeMap<&'static str, f64>> = Lazy::new(|| {
    BTreeMap::from([
        ("sqft", 1.0),
        ("sft", 1.0),
        ("sqm", SQFT_PER_SQM),
        ("sqyd", SQFT_PER_SQYD),
        ("acre", SQFT_PER_ACRE),
        ("hectare", SQFT_PER_HECTARE),
    ])
});

/// City spelling aliases applied after folding, before the vocabulary lookup.
static CITY_ALIASES: &[(&str, &str)] = &[
    ("bombay", "mumbai"),
    ("bengaluru", "bangalore"),
    ("madras", "chennai"),
    ("calcutta", "kolkata"),
    ("gurugram", "gurgaon"),
    ("poona", "pune"),
];

/// Ordered property-type normalization table: folded raw value → canonical
/// category. Exact match first; otherwise the first entry whose key occurs
/// in the folded string wins. Raw values matching nothing route to `OTHER`.
static PROPERTY_TYPE_TABLE: &[(&str, &str)] = &[
    ("land", "land"),
    ("plot", "land"),
    ("agricultural", "land"),
    ("shop", "shop"),
    ("showroom", "shop"),
    ("commercial", "shop"),
    ("office", "office"),
    ("factory", "industrial"),
    ("industrial", "industrial"),
    ("warehouse", "industrial"),
    ("godown", "industrial"),
    ("flat", "flat"),
    ("apartment", "flat"),
    ("house", "house"),
    ("villa", "house"),
    ("bungalow", "house"),
];

/// Lowercase, trim, fold common diacritics, collapse inner whitespace.
pub fn fold_category(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.trim().to_lowercase().chars() {
        let folded = match c {
            'á' | 'à' | 'â' | 'ä' | 'ã' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'í' | 'ì' | 'î' | 'ï' => 'i',
            'ó' | 'ò' | 'ô' | 'ö' | 'õ' => 'o',
            'ú' | 'ù' | 'û' | 'ü' => 'u',
            'ñ' => 'n',
            'ç' => 'c',
            other => other,
        };
        out.push(folded);
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Title-case display form for a folded category value.
fn title_case(folded: &str) -> String {
    folded
        .split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Robust numeric bounds: `[Q1 − k·IQR, Q3 + k·IQR]` over the training corpus.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RobustBounds {
    pub lower: f64,
    pub upper: f64,
}

impl RobustBounds {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower && value <= self.upper
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.lower, self.upper)
    }
}

/// Sanitizer behavior knobs. These travel with the frozen statistics inside
/// a model bundle so serving replays the exact training-time behavior.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SanitizerConfig {
    /// IQR multiplier for the robust bounds.
    pub iqr_k: f64,
    /// Cap out-of-range values instead of only flagging them.
    pub winsorize: bool,
}

impl Default for SanitizerConfig {
    fn default() -> Self {
        Self {
            iqr_k: 1.5,
            winsorize: true,
        }
    }
}

/// Statistics fit once on the training corpus and frozen. Serving reuses
/// these unmodified; they are never recomputed per request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SanitizerStats {
    pub price_bounds: Option<RobustBounds>,
    pub area_bounds: Option<RobustBounds>,
    pub area_median: Option<f64>,
    pub bedroom_mode: Option<i64>,
    pub bathroom_mode: Option<i64>,
    pub floor_mode: Option<i64>,
    /// Folded city → canonical display form, built from the training corpus.
    pub city_vocabulary: BTreeMap<String, String>,
    pub property_type_mode: Option<String>,
}

/// Quantile with linear interpolation over a sorted slice.
fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Some(sorted[lo] + frac * (sorted[hi] - sorted[lo]))
}

fn robust_bounds(values: &mut Vec<f64>, k: f64) -> Option<RobustBounds> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let q1 = quantile(values, 0.25)?;
    let q3 = quantile(values, 0.75)?;
    let iqr = q3 - q1;
    Some(RobustBounds {
        lower: q1 - k * iqr,
        upper: q3 + k * iqr,
    })
}

fn median(values: &mut Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap());
    quantile(values, 0.5)
}

/// Mode with a deterministic tie-break: highest count wins, ties go to the
/// smallest value so repeated fits agree byte for byte.
fn mode<T: Ord + Clone>(values: impl Iterator<Item = T>) -> Option<T> {
    let mut counts: BTreeMap<T, usize> = BTreeMap::new();
    for v in values {
        *counts.entry(v).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .max_by(|(a_val, a_n), (b_val, b_n)| a_n.cmp(b_n).then(b_val.cmp(a_val)))
        .map(|(val, _)| val)
}

/// Applies unit normalization, categorical canonicalization, frozen outlier
/// bounds, and frozen imputation, in that order. The order is load-bearing:
/// bounds and medians are expressed in canonical units and categories.
pub struct Sanitizer {
    pub config: SanitizerConfig,
}

impl Sanitizer {
    pub fn new(config: SanitizerConfig) -> Self {
        Self { config }
    }

    /// Step 1, standalone: convert any annotated area to square feet.
    /// Also used during fitting so statistics see canonical units.
    pub fn convert_area_units(record: &mut PropertyRecord) {
        let Some(unit) = record.area_unit.take() else {
            return;
        };
        let folded = fold_category(&unit);
        match UNIT_TO_SQFT.get(folded.as_str()) {
            Some(factor) => {
                if let Some(value) = record.area_value.value {
                    record.area_value.value = Some(value * factor);
                }
            }
            None => {
                record.area_value = Observed::absent();
                record.push_signal(QualitySignal::UnknownUnit { raw: unit });
                crate::observability::sanitize::unknown_unit();
            }
        }
    }

    /// Fit the frozen statistics over the training corpus. This is the only
    /// corpus-wide synchronization point in the batch pipeline.
    pub fn fit(&self, corpus: &[PropertyRecord]) -> SanitizerStats {
        let mut prices = Vec::new();
        let mut areas = Vec::new();
        let mut bedrooms = Vec::new();
        let mut bathrooms = Vec::new();
        let mut floors = Vec::new();
        let mut city_vocabulary = BTreeMap::new();
        let mut property_types = Vec::new();

        for record in corpus {
            let mut rec = record.clone();
            Self::convert_area_units(&mut rec);
            if let Some(p) = rec.price {
                prices.push(p);
            }
            if let Some(a) = rec.area_value.value {
                areas.push(a);
            }
            if let Some(n) = rec.bedroom_count.value {
                bedrooms.push(n);
            }
            if let Some(n) = rec.bathroom_count.value {
                bathrooms.push(n);
            }
            if let Some(n) = rec.floor_count.value {
                floors.push(n);
            }
            if let Some(city) = rec.city.value.as_deref() {
                let folded = Self::fold_city(city);
                city_vocabulary
                    .entry(folded.clone())
                    .or_insert_with(|| title_case(&folded));
            }
            if let Some(pt) = rec.property_type.value.as_deref() {
                property_types.push(Self::fold_property_type(pt));
            }
        }

        let stats = SanitizerStats {
            price_bounds: robust_bounds(&mut prices, self.config.iqr_k),
            area_bounds: robust_bounds(&mut areas, self.config.iqr_k),
            area_median: median(&mut areas.clone()),
            bedroom_mode: mode(bedrooms.into_iter()),
            bathroom_mode: mode(bathrooms.into_iter()),
            floor_mode: mode(floors.into_iter()),
            city_vocabulary,
            property_type_mode: mode(property_types.into_iter()),
        };
        debug!(
            cities = stats.city_vocabulary.len(),
            "fitted sanitizer statistics"
        );
        stats
    }

    /// Apply all four steps with frozen statistics. After this call the
    /// record is final: no unit annotations remain, category fields hold
    /// canonical vocabulary values, and model-input fields are populated.
    pub fn apply(&self, record: &mut PropertyRecord, stats: &SanitizerStats) {
        // 1. unit normalization
        Self::convert_area_units(record);

        // 2. categorical canonicalization
        if let Some(raw) = record.city.value.clone() {
            let folded = Self::fold_city(&raw);
            match stats.city_vocabulary.get(&folded) {
                Some(display) => record.city.value = Some(display.clone()),
                None => {
                    record.city.value = Some(OTHER_CATEGORY.to_string());
                    record.push_signal(QualitySignal::UnseenCategory {
                        field: "city".to_string(),
                        raw,
                    });
                    crate::observability::sanitize::unseen_category("city");
                }
            }
        }
        if let Some(raw) = record.property_type.value.clone() {
            let canonical = Self::fold_property_type(&raw);
            if canonical == OTHER_CATEGORY {
                record.push_signal(QualitySignal::UnseenCategory {
                    field: "property_type".to_string(),
                    raw,
                });
                crate::observability::sanitize::unseen_category("property_type");
            }
            record.property_type.value = Some(canonical);
        }

        // 3. outlier handling against frozen bounds
        if let (Some(bounds), Some(price)) = (stats.price_bounds, record.price) {
            if !bounds.contains(price) {
                let capped = self.config.winsorize.then(|| bounds.clamp(price));
                if let Some(capped) = capped {
                    record.price = Some(capped);
                }
                record.push_signal(QualitySignal::OutOfRange {
                    field: "price".to_string(),
                    original: price,
                    capped,
                });
                crate::observability::sanitize::outlier("price");
            }
        }
        if let (Some(bounds), Some(area)) = (stats.area_bounds, record.area_value.value) {
            if !bounds.contains(area) {
                let capped = self.config.winsorize.then(|| bounds.clamp(area));
                if let Some(capped) = capped {
                    record.area_value.value = Some(capped);
                }
                record.push_signal(QualitySignal::OutOfRange {
                    field: "area_value".to_string(),
                    original: area,
                    capped,
                });
                crate::observability::sanitize::outlier("area_value");
            }
        }

        // 4. imputation from frozen statistics; the imputed-vs-observed
        // distinction stays on the record for audit.
        if record.area_value.is_missing() {
            if let Some(median) = stats.area_median {
                record.area_value = Observed::imputed(median);
                record.push_signal(QualitySignal::Imputed {
                    field: "area_value".to_string(),
                });
                crate::observability::sanitize::imputed("area_value");
            }
        }
        Self::impute_count(&mut record.bedroom_count, stats.bedroom_mode, "bedroom_count", &mut record.quality);
        Self::impute_count(&mut record.bathroom_count, stats.bathroom_mode, "bathroom_count", &mut record.quality);
        Self::impute_count(&mut record.floor_count, stats.floor_mode, "floor_count", &mut record.quality);

        // City is high-cardinality: missing becomes the explicit MISSING
        // category. Property type is low-cardinality: missing takes the mode.
        if record.city.is_missing() {
            record.city = Observed::imputed(MISSING_CATEGORY.to_string());
            record.push_signal(QualitySignal::Imputed {
                field: "city".to_string(),
            });
        }
        if record.property_type.is_missing() {
            let fallback = stats
                .property_type_mode
                .clone()
                .unwrap_or_else(|| MISSING_CATEGORY.to_string());
            record.property_type = Observed::imputed(fallback);
            record.push_signal(QualitySignal::Imputed {
                field: "property_type".to_string(),
            });
        }
    }

    fn impute_count(
        slot: &mut Observed<i64>,
        mode: Option<i64>,
        field: &str,
        quality: &mut Vec<QualitySignal>,
    ) {
        if slot.is_missing() {
            if let Some(m) = mode {
                *slot = Observed::imputed(m);
                quality.push(QualitySignal::Imputed {
                    field: field.to_string(),
                });
                crate::observability::sanitize::imputed(field);
            }
        }
    }

    fn fold_city(raw: &str) -> String {
        let folded = fold_category(raw);
        for (alias, canonical) in CITY_ALIASES {
            if folded == *alias {
                return (*canonical).to_string();
            }
        }
        folded
    }

    fn fold_property_type(raw: &str) -> String {
        let folded = fold_category(raw);
        for (key, canonical) in PROPERTY_TYPE_TABLE {
            if folded == *key {
                return (*canonical).to_string();
            }
        }
        for (key, canonical) in PROPERTY_TYPE_TABLE {
            if folded.contains(key) {
                return (*canonical).to_string();
            }
        }
        OTHER_CATEGORY.to_string()
    }
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self::new(SanitizerConfig::default())
    }
}
