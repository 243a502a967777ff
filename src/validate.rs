//! Data quality scoring for harvested products.
//!
//! A weighted completeness score over the record's fields plus a few hard
//! rules: url, name and sku must be present, the name must be a real title
//! and a price has to contain digits.

use std::sync::Mutex;

use serde::Serialize;

use crate::product::Product;

const MIN_NAME_LENGTH: usize = 10;
const MIN_COMPLETENESS_SCORE: f64 = 30.0;

/// Field weights for the completeness score; they sum to 100.
const FIELD_WEIGHTS: &[(&str, f64)] = &[
    ("url", 15.0),
    ("name", 15.0),
    ("sku", 15.0),
    ("price", 10.0),
    ("description", 10.0),
    ("brand", 8.0),
    ("category", 8.0),
    ("specifications", 7.0),
    ("images", 7.0),
    ("availability", 5.0),
];

#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub score: f64,
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QualityMetrics {
    pub checked: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub mean_score: f64,
}

#[derive(Debug, Default)]
struct Metrics {
    checked: usize,
    accepted: usize,
    rejected: usize,
    score_sum: f64,
}

#[derive(Debug, Default)]
pub struct Validator {
    metrics: Mutex<Metrics>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate(&self, product: &Product) -> ValidationReport {
        let score = completeness_score(product);
        let mut issues = Vec::new();

        if product.url.is_empty() {
            issues.push("missing url".to_string());
        }
        if product.name.is_empty() {
            issues.push("missing name".to_string());
        } else if product.name.chars().count() <= MIN_NAME_LENGTH {
            issues.push(format!(
                "name shorter than {} characters",
                MIN_NAME_LENGTH + 1
            ));
        }
        if product.sku.is_empty() {
            issues.push("missing sku".to_string());
        }
        if !product.price.is_empty() && !product.price.chars().any(|c| c.is_ascii_digit()) {
            issues.push(format!("price '{}' has no digits", product.price));
        }
        if score < MIN_COMPLETENESS_SCORE {
            issues.push(format!(
                "completeness score {score:.1} below {MIN_COMPLETENESS_SCORE}"
            ));
        }

        let is_valid = issues.is_empty();
        let mut metrics = self.metrics.lock().expect("validator lock poisoned");
        metrics.checked += 1;
        metrics.score_sum += score;
        if is_valid {
            metrics.accepted += 1;
        } else {
            metrics.rejected += 1;
        }

        ValidationReport {
            is_valid,
            score,
            issues,
        }
    }

    pub fn metrics(&self) -> QualityMetrics {
        let metrics = self.metrics.lock().expect("validator lock poisoned");
        QualityMetrics {
            checked: metrics.checked,
            accepted: metrics.accepted,
            rejected: metrics.rejected,
            mean_score: if metrics.checked > 0 {
                metrics.score_sum / metrics.checked as f64
            } else {
                0.0
            },
        }
    }
}

/// Weighted completeness of a record, 0–100.
pub fn completeness_score(product: &Product) -> f64 {
    FIELD_WEIGHTS
        .iter()
        .filter(|(field, _)| field_present(product, field))
        .map(|(_, weight)| weight)
        .sum()
}

fn field_present(product: &Product, field: &str) -> bool {
    match field {
        "url" => !product.url.is_empty(),
        "name" => !product.name.is_empty(),
        "sku" => !product.sku.is_empty(),
        "price" => !product.price.is_empty(),
        "description" => {
            !product.description.is_empty() || !product.additional_description.is_empty()
        }
        "brand" => !product.brand.is_empty(),
        "category" => !product.category.is_empty(),
        "specifications" => !product.specifications.is_empty(),
        "images" => !product.images.is_empty(),
        "availability" => !product.availability.is_empty(),
        _ => false,
    }
}
