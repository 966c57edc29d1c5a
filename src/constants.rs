/// Source name constants to ensure consistency across the codebase.
/// These constants define the mapping between CLI-facing source names and the
/// provenance tags carried on every record.

// Source names (used in CLI and provenance tags)
pub const BAANKNET_SOURCE: &str = "baanknet";
pub const PROPERTY_DETAILS_SOURCE: &str = "property_details";
pub const REQUEST_SOURCE: &str = "request";

/// Bucket for raw categorical values not present in the frozen vocabulary.
pub const OTHER_CATEGORY: &str = "OTHER";

/// Explicit category standing in for a missing high-cardinality value.
/// Distinct from `OTHER`: `MISSING` means the source said nothing at all.
pub const MISSING_CATEGORY: &str = "MISSING";

/// Canonical area unit conversion factors (to square feet).
pub const SQFT_PER_SQM: f64 = 10.764;
pub const SQFT_PER_SQYD: f64 = 9.0;
pub const SQFT_PER_ACRE: f64 = 43_560.0;
pub const SQFT_PER_HECTARE: f64 = 107_639.0;

/// Get all supported source names.
pub fn supported_sources() -> Vec<&'static str> {
    vec![BAANKNET_SOURCE, PROPERTY_DETAILS_SOURCE]
}
