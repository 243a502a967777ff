use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A datasheet or manual linked from a product page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentLink {
    pub name: String,
    pub url: String,
}

/// One harvested product record. Fields the page did not provide stay empty;
/// the validator decides whether the record is complete enough to keep.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Product {
    pub url: String,
    pub name: String,
    pub brand: String,
    pub mpn: String,
    pub sku: String,
    pub price: String,
    pub category: String,
    pub description: String,
    pub images: Vec<String>,
    pub specifications: BTreeMap<String, String>,
    pub additional_description: String,
    pub documents: Vec<DocumentLink>,
    pub availability: String,
}
