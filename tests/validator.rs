use harvester::product::Product;
use harvester::validate::{completeness_score, Validator};

fn minimal_valid() -> Product {
    Product {
        url: "https://www.store.example/em3546-p-118033/".into(),
        name: "Baldor-Reliance EM3546 General Purpose Motor".into(),
        sku: "118033".into(),
        ..Product::default()
    }
}

#[test]
fn minimal_record_passes() {
    let validator = Validator::new();
    let report = validator.validate(&minimal_valid());
    assert!(report.is_valid, "issues: {:?}", report.issues);
    assert_eq!(report.score, 45.0);
}

#[test]
fn missing_required_fields_are_reported() {
    let validator = Validator::new();
    let report = validator.validate(&Product::default());

    assert!(!report.is_valid);
    assert!(report.issues.iter().any(|i| i.contains("missing url")));
    assert!(report.issues.iter().any(|i| i.contains("missing name")));
    assert!(report.issues.iter().any(|i| i.contains("missing sku")));
}

#[test]
fn short_names_fail() {
    let validator = Validator::new();
    let product = Product {
        name: "EM3546".into(),
        ..minimal_valid()
    };
    let report = validator.validate(&product);
    assert!(!report.is_valid);
    assert!(report.issues.iter().any(|i| i.contains("name shorter")));
}

#[test]
fn prices_need_digits() {
    let validator = Validator::new();
    let product = Product {
        price: "Call for quote".into(),
        ..minimal_valid()
    };
    let report = validator.validate(&product);
    assert!(!report.is_valid);
    assert!(report.issues.iter().any(|i| i.contains("no digits")));

    let product = Product {
        price: "$412.09".into(),
        ..minimal_valid()
    };
    assert!(validator.validate(&product).is_valid);
}

#[test]
fn completeness_weights_sum_to_100() {
    let full = Product {
        url: "https://www.store.example/p/1".into(),
        name: "A reasonably long product title".into(),
        brand: "Baldor".into(),
        mpn: "EM3546".into(),
        sku: "118033".into(),
        price: "$412.09".into(),
        category: "Motors".into(),
        description: "desc".into(),
        images: vec!["https://cdn.example/1.jpg".into()],
        specifications: [("Voltage".to_string(), "230 V".to_string())].into(),
        additional_description: String::new(),
        documents: Vec::new(),
        availability: "InStock".into(),
    };
    assert_eq!(completeness_score(&full), 100.0);
    assert_eq!(completeness_score(&Product::default()), 0.0);
}

#[test]
fn additional_description_counts_as_description() {
    let product = Product {
        additional_description: "Severe duty rated.".into(),
        ..minimal_valid()
    };
    assert_eq!(completeness_score(&product), 55.0);
}

#[test]
fn metrics_accumulate() {
    let validator = Validator::new();
    validator.validate(&minimal_valid());
    validator.validate(&Product::default());

    let metrics = validator.metrics();
    assert_eq!(metrics.checked, 2);
    assert_eq!(metrics.accepted, 1);
    assert_eq!(metrics.rejected, 1);
    assert!(metrics.mean_score > 0.0);
}
