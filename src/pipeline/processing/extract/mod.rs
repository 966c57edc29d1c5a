use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::domain::{Observed, PropertyRecord, QualitySignal, ValueOrigin};

/// One ordered extraction rule: the first rule whose pattern matches wins.
/// Ordering is a contract, not an implementation detail; overlapping patterns
/// ("3 BHK" vs "3 floors") must resolve the same way on every run.
struct AreaRule {
    re: Regex,
    /// Unit token handed to the sanitizer's conversion table.
    unit: &'static str,
}

static AREA_RULES: Lazy<Vec<AreaRule>> = Lazy::new(|| {
    // Most specific unit spelling first, generic fallback last.
    vec![
        AreaRule {
            re: Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*sq\.?\s*(?:ft|feet)\.?").unwrap(),
            unit: "sqft",
        },
        AreaRule {
            re: Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*(?:sqft|sft)\b").unwrap(),
            unit: "sqft",
        },
        AreaRule {
            re: Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*sq\.?\s*(?:mtrs?|metres?|meters?)\.?").unwrap(),
            unit: "sqm",
        },
        AreaRule {
            re: Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*sq\.?\s*m\b\.?").unwrap(),
            unit: "sqm",
        },
        AreaRule {
            re: Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*sq\.?\s*(?:yds?|yards?)\.?").unwrap(),
            unit: "sqyd",
        },
        AreaRule {
            re: Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*acres?\b").unwrap(),
            unit: "acre",
        },
        AreaRule {
            re: Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*hectares?\b").unwrap(),
            unit: "hectare",
        },
    ]
});

// "3 BHK" is a bedroom count, never a floor count; the bedroom rules own the
// BHK token and the floor rules never mention it.
static BEDROOM_RULES: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?i)\b(\d+)\s*bhk\b").unwrap(),
        Regex::new(r"(?i)\b(\d+)\s*bed\s?rooms?\b").unwrap(),
        Regex::new(r"(?i)\b(\d+)\s*beds?\b").unwrap(),
    ]
});

static BATHROOM_RULES: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?i)\b(\d+)\s*bath\s?rooms?\b").unwrap(),
        Regex::new(r"(?i)\b(\d+)\s*baths?\b").unwrap(),
        Regex::new(r"(?i)\b(\d+)\s*toilets?\b").unwrap(),
    ]
});

static FLOOR_RULES: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        // "G+2" means ground plus two, i.e. three floors; handled separately.
        Regex::new(r"(?i)\bg\s*\+\s*(\d+)\b").unwrap(),
        Regex::new(r"(?i)\b(\d+)\s*(?:floors?|storeys?|stories)\b").unwrap(),
    ]
});

/// Fixed amenity keyword/synonym lookup over lowercase text. Absence of a
/// keyword is evidence of absence, not of missingness.
static AMENITY_SYNONYMS: &[(&str, &[&str])] = &[
    ("parking", &["parking", "car park"]),
    ("lift", &["lift", "elevator"]),
    ("garden", &["garden", "lawn"]),
    ("swimming_pool", &["swimming pool", "pool"]),
    ("gym", &["gym", "gymnasium"]),
    ("security", &["security", "gated"]),
    ("borewell", &["borewell", "bore well"]),
    ("balcony", &["balcony", "balconies"]),
    ("power_backup", &["power backup", "generator"]),
    ("club_house", &["club house", "clubhouse"]),
];

/// Ordered property-type hints, first match wins. Used only when the source
/// carried no typed property_type; the sanitizer folds the hint through the
/// same canonical vocabulary as structured values.
static PROPERTY_TYPE_HINTS: &[(&str, &[&str])] = &[
    ("land", &["land", "plot"]),
    ("shop", &["shop", "showroom"]),
    ("office", &["office"]),
    ("industrial", &["factory", "industrial", "warehouse", "godown"]),
    ("flat", &["flat", "apartment", "bhk"]),
    ("house", &["house", "villa", "bungalow", "building"]),
];

/// Candidate area measurement mined from text, unit not yet canonical.
#[derive(Debug, Clone, PartialEq)]
pub struct AreaMeasurement {
    pub value: f64,
    pub unit: &'static str,
}

/// Mines free-text description fields for attributes the structured schema
/// did not carry. Structured values always win; disagreements are recorded
/// as data-quality signals, never silently dropped.
pub struct TextAttributeExtractor;

impl TextAttributeExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Enrich a normalized record in place. Runs before the sanitizer; the
    /// record is still mutable at this stage.
    pub fn enrich(&self, record: &mut PropertyRecord) {
        let text = record.description.concatenated();
        if text.is_empty() {
            return;
        }
        let lower = text.to_lowercase();

        self.enrich_area(record, &text);
        Self::enrich_count(
            &mut record.bedroom_count,
            &mut record.quality,
            "bedroom_count",
            &BEDROOM_RULES,
            &text,
        );
        Self::enrich_count(
            &mut record.bathroom_count,
            &mut record.quality,
            "bathroom_count",
            &BATHROOM_RULES,
            &text,
        );
        self.enrich_floors(record, &text);
        self.enrich_amenities(record, &lower);
        self.enrich_property_type(record, &lower);
    }

    fn enrich_area(&self, record: &mut PropertyRecord, text: &str) {
        let candidate = AREA_RULES.iter().find_map(|rule| {
            rule.re.captures(text).and_then(|caps| {
                caps[1].parse::<f64>().ok().map(|value| AreaMeasurement {
                    value,
                    unit: rule.unit,
                })
            })
        });
        let Some(found) = candidate else { return };
        debug!(value = found.value, unit = found.unit, "extracted area candidate");

        match record.area_value.value {
            Some(structured) if record.area_value.origin == ValueOrigin::Structured => {
                if (structured - found.value).abs() > f64::EPSILON {
                    record.push_signal(QualitySignal::ExtractionConflict {
                        field: "area_value".to_string(),
                        structured: structured.to_string(),
                        extracted: format!("{} {}", found.value, found.unit),
                    });
                }
            }
            _ => {
                record.area_value = Observed::extracted(found.value);
                record.area_unit = Some(found.unit.to_string());
            }
        }
    }

    fn enrich_count(
        slot: &mut Observed<i64>,
        quality: &mut Vec<QualitySignal>,
        field: &str,
        rules: &[Regex],
        text: &str,
    ) {
        let candidate = rules
            .iter()
            .find_map(|re| re.captures(text).and_then(|caps| caps[1].parse::<i64>().ok()));
        let Some(found) = candidate else { return };

        match slot.value {
            Some(structured) if slot.origin == ValueOrigin::Structured => {
                if structured != found {
                    quality.push(QualitySignal::ExtractionConflict {
                        field: field.to_string(),
                        structured: structured.to_string(),
                        extracted: found.to_string(),
                    });
                }
            }
            _ => *slot = Observed::extracted(found),
        }
    }

    fn enrich_floors(&self, record: &mut PropertyRecord, text: &str) {
        // G+N counts the ground floor; plain "N floors" does not need the +1.
        let candidate = FLOOR_RULES.iter().enumerate().find_map(|(idx, re)| {
            re.captures(text)
                .and_then(|caps| caps[1].parse::<i64>().ok())
                .map(|n| if idx == 0 { n + 1 } else { n })
        });
        let Some(found) = candidate else { return };

        match record.floor_count.value {
            Some(structured) if record.floor_count.origin == ValueOrigin::Structured => {
                if structured != found {
                    record.push_signal(QualitySignal::ExtractionConflict {
                        field: "floor_count".to_string(),
                        structured: structured.to_string(),
                        extracted: found.to_string(),
                    });
                }
            }
            _ => record.floor_count = Observed::extracted(found),
        }
    }

    fn enrich_amenities(&self, record: &mut PropertyRecord, lower: &str) {
        for (canonical, synonyms) in AMENITY_SYNONYMS {
            if synonyms.iter().any(|syn| lower.contains(syn)) {
                record.amenities.insert((*canonical).to_string());
            }
        }
    }

    fn enrich_property_type(&self, record: &mut PropertyRecord, lower: &str) {
        if !record.property_type.is_missing() {
            return;
        }
        for (canonical, keywords) in PROPERTY_TYPE_HINTS {
            if keywords.iter().any(|kw| lower.contains(kw)) {
                record.property_type = Observed::extracted((*canonical).to_string());
                return;
            }
        }
    }
}

impl Default for TextAttributeExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{PropertyRecord, Source};
    use serde_json::json;

    fn record_with_text(text: &str) -> PropertyRecord {
        let mut rec = PropertyRecord::empty(
            "test-id".to_string(),
            Source::Baanknet,
            json!({}),
        );
        rec.description.push("summaryDesc", text);
        rec.canonical = true;
        rec
    }

    #[test]
    fn test_area_sqft_extraction() {
        let mut rec = record_with_text("LAND AND BUILDING ... 471.50 SQ.FT.");
        TextAttributeExtractor::new().enrich(&mut rec);
        assert_eq!(rec.area_value.value, Some(471.50));
        assert_eq!(rec.area_value.origin, ValueOrigin::Extracted);
        assert_eq!(rec.area_unit.as_deref(), Some("sqft"));
    }

    #[test]
    fn test_area_unit_variants() {
        for (text, unit, value) in [
            ("plot of 120 sq. mtrs near station", "sqm", 120.0),
            ("admeasuring 250 sq yds", "sqyd", 250.0),
            ("agricultural land 2.5 acres", "acre", 2.5),
            ("warehouse 900 sqft total", "sqft", 900.0),
        ] {
            let mut rec = record_with_text(text);
            TextAttributeExtractor::new().enrich(&mut rec);
            assert_eq!(rec.area_value.value, Some(value), "text: {text}");
            assert_eq!(rec.area_unit.as_deref(), Some(unit), "text: {text}");
        }
    }

    #[test]
    fn test_sqft_rule_wins_over_sqm_when_both_present() {
        // First matching rule in the ordered list wins.
        let mut rec = record_with_text("880 sq.ft. (81.75 sq.mtr)");
        TextAttributeExtractor::new().enrich(&mut rec);
        assert_eq!(rec.area_value.value, Some(880.0));
        assert_eq!(rec.area_unit.as_deref(), Some("sqft"));
    }

    #[test]
    fn test_bhk_is_bedrooms_not_floors() {
        let mut rec = record_with_text("Spacious 3 BHK flat on 5th floor");
        TextAttributeExtractor::new().enrich(&mut rec);
        assert_eq!(rec.bedroom_count.value, Some(3));
        assert_eq!(rec.bedroom_count.origin, ValueOrigin::Extracted);
        // "5th floor" is a position, not a count; no floors rule matches.
        assert!(rec.floor_count.is_missing());
    }

    #[test]
    fn test_floor_count_and_g_plus_notation() {
        let mut rec = record_with_text("Building with 3 floors and 2 bathrooms");
        TextAttributeExtractor::new().enrich(&mut rec);
        assert_eq!(rec.floor_count.value, Some(3));
        assert_eq!(rec.bathroom_count.value, Some(2));

        let mut rec = record_with_text("Commercial building G+2 construction");
        TextAttributeExtractor::new().enrich(&mut rec);
        assert_eq!(rec.floor_count.value, Some(3));
    }

    #[test]
    fn test_structured_value_wins_and_conflict_is_recorded() {
        let mut rec = record_with_text("2 BHK flat");
        rec.bedroom_count = Observed::structured(3);
        TextAttributeExtractor::new().enrich(&mut rec);

        assert_eq!(rec.bedroom_count.value, Some(3));
        assert_eq!(rec.bedroom_count.origin, ValueOrigin::Structured);
        assert!(rec.quality.iter().any(|s| matches!(
            s,
            QualitySignal::ExtractionConflict { field, .. } if field == "bedroom_count"
        )));
    }

    #[test]
    fn test_amenity_keywords() {
        let mut rec = record_with_text("Flat with covered PARKING, lift and swimming pool");
        TextAttributeExtractor::new().enrich(&mut rec);
        assert!(rec.amenities.contains("parking"));
        assert!(rec.amenities.contains("lift"));
        assert!(rec.amenities.contains("swimming_pool"));
        // No keyword means absent, and absence is not recorded as missing.
        assert!(!rec.amenities.contains("gym"));
    }

    #[test]
    fn test_property_type_hint_when_structured_absent() {
        let mut rec = record_with_text("3 Shops in Yogi Plaza, Puna, Surat");
        TextAttributeExtractor::new().enrich(&mut rec);
        assert_eq!(rec.property_type.value.as_deref(), Some("shop"));
        assert_eq!(rec.property_type.origin, ValueOrigin::Extracted);

        // "land" outranks "house"/"building" in the ordered hint list.
        let mut rec = record_with_text("LAND AND BUILDING at site no 4");
        TextAttributeExtractor::new().enrich(&mut rec);
        assert_eq!(rec.property_type.value.as_deref(), Some("land"));
    }

    #[test]
    fn test_property_type_hint_does_not_override_structured() {
        let mut rec = record_with_text("Shop premises");
        rec.property_type = Observed::structured("Residential Flat".to_string());
        TextAttributeExtractor::new().enrich(&mut rec);
        assert_eq!(rec.property_type.value.as_deref(), Some("Residential Flat"));
    }

    #[test]
    fn test_no_text_leaves_record_untouched() {
        let mut rec = PropertyRecord::empty("x".to_string(), Source::Baanknet, json!({}));
        TextAttributeExtractor::new().enrich(&mut rec);
        assert!(rec.area_value.is_missing());
        assert!(rec.amenities.is_empty());
        assert!(rec.quality.is_empty());
    }
}
