//! Product URL collection.
//!
//! Phase one of a harvest: paginate the search endpoint collecting product
//! links until a page comes back empty, then sweep the usual sitemap
//! locations for product URLs the listings missed. Listing pages are fetched
//! over the direct connection.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tokio::time::sleep;
use url::Url;

use crate::client::Fetcher;
use crate::config::HarvestConfig;
use crate::error::Result;
use crate::extract;

pub const SITEMAP_PATHS: &[&str] = &[
    "sitemap.xml",
    "sitemap_products.xml",
    "product-sitemap.xml",
];

/// Small pause between listing page fetches.
const PAGE_PAUSE: Duration = Duration::from_millis(300);

pub struct UrlCollector {
    fetcher: Arc<Fetcher>,
    base: Url,
    per_page: usize,
    max_pages: Option<usize>,
}

impl UrlCollector {
    pub fn new(config: &HarvestConfig, fetcher: Arc<Fetcher>) -> Result<Self> {
        Ok(Self {
            fetcher,
            base: config.base()?,
            per_page: config.per_page,
            max_pages: config.max_pages,
        })
    }

    pub fn listing_url(&self, page: usize) -> String {
        format!(
            "{}/search/?q=&per_page={}&page={}",
            self.base.as_str().trim_end_matches('/'),
            self.per_page,
            page
        )
    }

    /// Collect unique product URLs from listings, then sitemaps.
    pub async fn collect(&self) -> Result<Vec<String>> {
        let mut seen = HashSet::new();
        let mut urls = Vec::new();

        self.collect_from_search(&mut seen, &mut urls).await?;
        self.collect_from_sitemaps(&mut seen, &mut urls).await;

        tracing::info!(total = urls.len(), "unique product urls collected");
        Ok(urls)
    }

    async fn collect_from_search(
        &self,
        seen: &mut HashSet<String>,
        urls: &mut Vec<String>,
    ) -> Result<()> {
        let mut page = 1;
        loop {
            if self.max_pages.is_some_and(|max| page > max) {
                break;
            }

            let listing = self.listing_url(page);
            let html = match self.fetcher.fetch_direct(&listing, None).await {
                Ok(html) => html,
                Err(err) => {
                    tracing::warn!(page = page, "stopping pagination: {err}");
                    break;
                }
            };

            let base = self.base.clone();
            let links =
                tokio::task::spawn_blocking(move || extract::listing_links(&html, &base)).await??;
            if links.is_empty() {
                tracing::info!(page = page, "no more products");
                break;
            }

            let mut found = 0;
            for link in links {
                if seen.insert(link.clone()) {
                    urls.push(link);
                    found += 1;
                }
            }
            tracing::info!(page = page, found = found, total = urls.len(), "listing page");

            page += 1;
            sleep(PAGE_PAUSE).await;
        }
        Ok(())
    }

    async fn collect_from_sitemaps(&self, seen: &mut HashSet<String>, urls: &mut Vec<String>) {
        let base = self.base.as_str().trim_end_matches('/');
        for path in SITEMAP_PATHS {
            let sitemap_url = format!("{base}/{path}");
            let xml = match self.fetcher.fetch_direct(&sitemap_url, None).await {
                Ok(xml) => xml,
                Err(err) => {
                    tracing::debug!(url = sitemap_url, "sitemap not available: {err}");
                    continue;
                }
            };

            let extracted =
                match tokio::task::spawn_blocking(move || extract::sitemap_product_urls(&xml)).await
                {
                    Ok(Ok(extracted)) => extracted,
                    Ok(Err(err)) => {
                        tracing::warn!(url = sitemap_url, "sitemap parse failed: {err}");
                        continue;
                    }
                    Err(err) => {
                        tracing::warn!(url = sitemap_url, "sitemap parse task failed: {err}");
                        continue;
                    }
                };

            let mut found = 0;
            for url in extracted {
                if seen.insert(url.clone()) {
                    urls.push(url);
                    found += 1;
                }
            }
            if found > 0 {
                tracing::info!(url = sitemap_url, found = found, "sitemap products");
                break;
            }
        }
    }
}

/// Write one URL per line into a timestamped file under `dir`.
pub fn write_url_file(dir: &Path, urls: &[String]) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(format!(
        "all_product_urls_{}.txt",
        Local::now().format("%Y%m%d_%H%M%S")
    ));
    fs::write(&path, urls.join("\n"))?;
    tracing::info!(urls = urls.len(), "saved '{}'", path.display());
    Ok(path)
}

pub fn read_url_file(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}
