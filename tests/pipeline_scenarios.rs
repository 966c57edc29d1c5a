use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::tempdir;

use auction_pricer::config::Config;
use auction_pricer::domain::{QualitySignal, Source, ValueOrigin};
use auction_pricer::pipeline::ingestion::{BaanknetAdapter, SourceAdapter};
use auction_pricer::pipeline::processing::extract::TextAttributeExtractor;
use auction_pricer::pipeline::processing::normalize::SchemaNormalizer;
use auction_pricer::pipeline::tasks::{
    ingest_run, read_normalized, train_run, IngestParams, TrainParams,
};
use auction_pricer::registry::{ModelBundle, ModelRegistry, PromotionConfig};
use auction_pricer::serving::PredictionService;

/// Bulk listing element in the source A shape.
fn baanknet_element(id: u64, price: f64, city: &str, desc: &str) -> serde_json::Value {
    json!({
        "status": 1,
        "property_id": id,
        "respData": {
            "propertyPrice": price,
            "city": city,
            "summaryDesc": desc
        }
    })
}

/// A small but varied training corpus: prices scale with area and city.
fn training_fixture() -> serde_json::Value {
    let mut elements = Vec::new();
    let cities = ["Chennai", "Mumbai", "Pune", "Surat"];
    for i in 0..24u64 {
        let city = cities[(i % 4) as usize];
        let area = 400.0 + 60.0 * i as f64;
        let city_premium = match city {
            "Mumbai" => 3000.0,
            "Pune" => 2200.0,
            "Chennai" => 2000.0,
            _ => 1500.0,
        };
        let desc = format!("RESIDENTIAL FLAT ADMEASURING {area:.2} SQ.FT. WITH PARKING");
        elements.push(baanknet_element(i + 1, area * city_premium, city, &desc));
    }
    json!(elements)
}

fn details_file(id: &str, price: f64, city: &str, name: &str) -> serde_json::Value {
    json!({
        "success": true,
        "data": {
            "id": id,
            "reserve_price": price,
            "city": city,
            "name": name
        }
    })
}

/// Run ingestion and training over fixture files, returning the sealed
/// bundle and the normalized snapshot path.
async fn train_fixture(dir: &Path) -> (ModelBundle, String) {
    let baanknet_path = dir.join("baanknet.json");
    std::fs::write(&baanknet_path, training_fixture().to_string()).unwrap();

    let details_dir = dir.join("property_details");
    std::fs::create_dir_all(&details_dir).unwrap();
    std::fs::write(
        details_dir.join("pd1.json"),
        details_file("PD-1", 7_000_000.0, "Surat", "3 Shops in Yogi Plaza, Puna, Surat")
            .to_string(),
    )
    .unwrap();

    let normalized = dir.join("normalized.ndjson").to_string_lossy().to_string();
    let bundle_path = dir.join("bundle.json").to_string_lossy().to_string();
    let config = Config::default();

    let summary = ingest_run(
        &config,
        IngestParams {
            baanknet_file: Some(baanknet_path.to_string_lossy().to_string()),
            property_details_dir: Some(details_dir.to_string_lossy().to_string()),
            output: Some(normalized.clone()),
        },
    )
    .await
    .unwrap();
    assert_eq!(summary.written_records, 25);

    train_run(
        &config,
        TrainParams {
            input: Some(normalized.clone()),
            output: Some(bundle_path.clone()),
            l2: Some(1.0),
            holdout_fraction: Some(0.2),
        },
    )
    .await
    .unwrap();

    (ModelBundle::load(Path::new(&bundle_path)).unwrap(), normalized)
}

#[test]
fn scenario_1_baanknet_record_normalizes_with_extracted_area() {
    let payload = json!([baanknet_element(
        9211,
        7545000.0,
        "Chennai",
        "LAND AND BUILDING ... 471.50 SQ.FT."
    )]);
    let batch = BaanknetAdapter
        .parse(payload.to_string().as_bytes())
        .unwrap();
    let mut record = SchemaNormalizer::new().normalize(&batch.records[0]).unwrap();
    TextAttributeExtractor::new().enrich(&mut record);

    assert_eq!(record.price, Some(7545000.0));
    assert_eq!(record.city.value.as_deref(), Some("Chennai"));
    assert_eq!(record.area_value.value, Some(471.50));
    assert_eq!(record.area_value.origin, ValueOrigin::Extracted);
    assert_eq!(record.area_unit.as_deref(), Some("sqft"));
}

#[tokio::test]
async fn scenario_2_property_details_record_infers_shop_category() {
    let dir = tempdir().unwrap();
    let (_, normalized) = train_fixture(dir.path()).await;

    let records = read_normalized(Path::new(&normalized)).unwrap();
    let shop = records
        .iter()
        .find(|r| r.source == Source::PropertyDetails)
        .expect("property_details record in snapshot");

    assert_eq!(shop.price, Some(7_000_000.0));
    assert_eq!(shop.city.value.as_deref(), Some("Surat"));
    assert_eq!(shop.property_type.value.as_deref(), Some("shop"));
    assert_eq!(shop.property_type.origin, ValueOrigin::Extracted);
}

#[tokio::test]
async fn scenario_3_missing_area_is_imputed_from_frozen_median() {
    let dir = tempdir().unwrap();
    let (bundle, _) = train_fixture(dir.path()).await;

    let payload = json!([baanknet_element(
        777,
        2_000_000.0,
        "Chennai",
        "RESIDENTIAL PREMISES, NO DIMENSIONS ON RECORD"
    )]);
    let batch = BaanknetAdapter
        .parse(payload.to_string().as_bytes())
        .unwrap();
    let mut record = SchemaNormalizer::new().normalize(&batch.records[0]).unwrap();
    TextAttributeExtractor::new().enrich(&mut record);
    assert!(record.area_value.is_missing(), "no area in any field");

    let (sanitized, _, _) = bundle.transform(record).unwrap();
    assert_eq!(sanitized.area_value.value, bundle.sanitizer_stats.area_median);
    assert_eq!(sanitized.area_value.origin, ValueOrigin::Imputed);
    assert!(sanitized
        .quality
        .iter()
        .any(|s| matches!(s, QualitySignal::Imputed { field } if field == "area_value")));
}

#[tokio::test]
async fn scenario_4_unseen_city_predicts_with_warning() {
    let dir = tempdir().unwrap();
    let (bundle, _) = train_fixture(dir.path()).await;

    let registry = Arc::new(ModelRegistry::new(PromotionConfig::default()));
    registry.install_champion(bundle).unwrap();
    let service = PredictionService::new(registry, Duration::from_secs(2));

    let response = service
        .predict(json!({
            "city": "Jaipur",
            "property_type": "flat",
            "area_value": 850.0,
            "description_text": "2 BHK flat with parking"
        }))
        .await
        .unwrap();

    assert!(response.predicted_price.is_finite());
    assert!(
        response
            .warnings
            .iter()
            .any(|w| w.contains("not seen at training")),
        "warnings: {:?}",
        response.warnings
    );
}

#[tokio::test]
async fn scenario_5_promotion_below_margin_is_rejected() {
    let dir = tempdir().unwrap();
    let (bundle, normalized) = train_fixture(dir.path()).await;

    let registry = ModelRegistry::new(PromotionConfig {
        min_rmse_margin: 0.05,
    });
    let records = read_normalized(Path::new(&normalized)).unwrap();
    let (_, holdout) =
        auction_pricer::pipeline::tasks::holdout_split(records, 0.2);

    registry.promote(bundle.clone(), &holdout).unwrap();
    let champion_before = registry.champion().unwrap();

    // An identical challenger cannot beat the champion by any margin.
    let err = registry.promote(bundle, &holdout).unwrap_err();
    assert!(err.to_string().contains("promotion rejected"));

    let champion_after = registry.champion().unwrap();
    assert_eq!(champion_before.bundle_id, champion_after.bundle_id);
}

#[tokio::test]
async fn serving_path_matches_batch_path_byte_for_byte() {
    let dir = tempdir().unwrap();
    let (bundle, _) = train_fixture(dir.path()).await;

    // Batch path: adapter → normalize → extract → frozen transform.
    let payload = json!([baanknet_element(
        4242,
        0.0,
        "Mumbai",
        "RESIDENTIAL FLAT ADMEASURING 910.00 SQ.FT. WITH PARKING"
    )]);
    let batch = BaanknetAdapter
        .parse(payload.to_string().as_bytes())
        .unwrap();
    let mut batch_record = SchemaNormalizer::new().normalize(&batch.records[0]).unwrap();
    batch_record.price = None;
    TextAttributeExtractor::new().enrich(&mut batch_record);
    let (_, batch_vector, _) = bundle.transform(batch_record).unwrap();
    let batch_prediction = bundle.predict(&batch_vector).unwrap();

    // Serving path: the same attributes arrive as an ad-hoc request.
    let registry = Arc::new(ModelRegistry::new(PromotionConfig::default()));
    registry.install_champion(bundle).unwrap();
    let service = PredictionService::new(registry, Duration::from_secs(2));
    let response = service
        .predict(json!({
            "city": "Mumbai",
            "description_text": "RESIDENTIAL FLAT ADMEASURING 910.00 SQ.FT. WITH PARKING"
        }))
        .await
        .unwrap();

    assert_eq!(
        response.predicted_price.to_bits(),
        batch_prediction.to_bits(),
        "train/serve transformation paths must agree exactly"
    );
}

#[tokio::test]
async fn sanitized_snapshot_carries_no_unit_annotations() {
    let dir = tempdir().unwrap();
    let (bundle, normalized) = train_fixture(dir.path()).await;

    for record in read_normalized(Path::new(&normalized)).unwrap() {
        let (sanitized, _, _) = bundle.transform(record).unwrap();
        assert!(
            sanitized.area_unit.is_none(),
            "unit annotation survived sanitize on {}",
            sanitized.id
        );
    }
}

#[tokio::test]
async fn ingest_is_idempotent_over_reruns() {
    let dir = tempdir().unwrap();
    let baanknet_path = dir.path().join("baanknet.json");
    std::fs::write(&baanknet_path, training_fixture().to_string()).unwrap();
    let out_a = dir.path().join("a.ndjson");
    let out_b = dir.path().join("b.ndjson");
    let config = Config::default();

    for out in [&out_a, &out_b] {
        ingest_run(
            &config,
            IngestParams {
                baanknet_file: Some(baanknet_path.to_string_lossy().to_string()),
                property_details_dir: Some("/nonexistent".to_string()),
                output: Some(out.to_string_lossy().to_string()),
            },
        )
        .await
        .unwrap();
    }

    let a = std::fs::read_to_string(&out_a).unwrap();
    let b = std::fs::read_to_string(&out_b).unwrap();
    assert_eq!(a, b, "re-running ingestion must reproduce the snapshot");
}
