//! Final output files: JSON and CSV product dumps, failed-URL lists and the
//! run summary. Filenames are timestamped so consecutive runs never clobber
//! each other.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::crawler::Statistics;
use crate::error::Result;
use crate::product::Product;
use crate::retry::FailedUrl;

const CSV_COLUMNS: &[&str] = &[
    "url",
    "name",
    "brand",
    "mpn",
    "sku",
    "price",
    "category",
    "description",
    "images",
    "specifications",
    "additional_description",
    "documents",
    "availability",
];

fn timestamp() -> String {
    Local::now().format("%Y%m%d_%H%M%S").to_string()
}

pub fn write_json(dir: &Path, products: &[Product], label: &str) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(format!("products_{label}_{}.json", timestamp()));
    fs::write(&path, serde_json::to_vec_pretty(products)?)?;
    tracing::info!(products = products.len(), "saved '{}'", path.display());
    Ok(path)
}

/// One row per product; images joined with `|`, nested structures embedded
/// as JSON strings.
pub fn write_csv(dir: &Path, products: &[Product], label: &str) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(format!("products_{label}_{}.csv", timestamp()));
    let mut writer = csv::Writer::from_path(&path)?;
    writer.write_record(CSV_COLUMNS)?;
    for product in products {
        let images = product.images.join("|");
        let specifications = serde_json::to_string(&product.specifications)?;
        let documents = serde_json::to_string(&product.documents)?;
        writer.write_record([
            product.url.as_str(),
            product.name.as_str(),
            product.brand.as_str(),
            product.mpn.as_str(),
            product.sku.as_str(),
            product.price.as_str(),
            product.category.as_str(),
            product.description.as_str(),
            images.as_str(),
            specifications.as_str(),
            product.additional_description.as_str(),
            documents.as_str(),
            product.availability.as_str(),
        ])?;
    }
    writer.flush()?;
    tracing::info!(products = products.len(), "saved '{}'", path.display());
    Ok(path)
}

/// One URL per line, ready to feed back into a retry run.
pub fn write_failed_urls(dir: &Path, failed: &[FailedUrl]) -> Result<Option<PathBuf>> {
    if failed.is_empty() {
        return Ok(None);
    }
    fs::create_dir_all(dir)?;
    let path = dir.join(format!("failed_urls_{}.txt", timestamp()));
    let lines: Vec<&str> = failed.iter().map(|f| f.url.as_str()).collect();
    fs::write(&path, lines.join("\n"))?;
    tracing::warn!(failed = failed.len(), "saved '{}'", path.display());
    Ok(Some(path))
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub total_urls: usize,
    pub products_harvested: usize,
    pub scrape_attempts: usize,
    pub scrape_errors: usize,
    pub retries: usize,
    pub permanently_failed: usize,
    pub success_rate_percent: f64,
    pub total_time_seconds: f64,
    pub total_time_hours: f64,
    pub average_per_second: f64,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
}

impl RunSummary {
    pub fn new(
        stats: &Statistics,
        total_urls: usize,
        products_harvested: usize,
        elapsed: Duration,
        started_at: DateTime<Local>,
    ) -> Self {
        let secs = elapsed.as_secs_f64();
        Self {
            total_urls,
            products_harvested,
            scrape_attempts: stats.scrapings(),
            scrape_errors: stats.scrape_errors(),
            retries: stats.retries(),
            permanently_failed: stats.exhausted(),
            success_rate_percent: stats.success_rate().map(|r| r * 100.0).unwrap_or(0.0),
            total_time_seconds: secs,
            total_time_hours: secs / 3600.0,
            average_per_second: if secs > 0.0 {
                products_harvested as f64 / secs
            } else {
                0.0
            },
            started_at,
            finished_at: Local::now(),
        }
    }
}

pub fn write_summary(dir: &Path, summary: &RunSummary) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(format!("statistics_{}.json", timestamp()));
    fs::write(&path, serde_json::to_vec_pretty(summary)?)?;
    tracing::info!("saved '{}'", path.display());
    Ok(path)
}
