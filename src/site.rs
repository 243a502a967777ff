//! The store-specific spider.
//!
//! URL shape decides the behavior: listing pages yield product links plus
//! the next listing page, product pages yield one validated record. Records
//! that fail validation fail the scrape, which routes them through the
//! retry queue.

use std::sync::Arc;

use async_trait::async_trait;
use url::Url;

use crate::client::Fetcher;
use crate::config::HarvestConfig;
use crate::error::Error;
use crate::extract;
use crate::headers;
use crate::product::Product;
use crate::sink::ProductSink;
use crate::spider::Spider;
use crate::validate::Validator;

pub struct StoreSpider {
    name: String,
    base: Url,
    referer: String,
    fetcher: Arc<Fetcher>,
    sink: Arc<ProductSink>,
    validator: Arc<Validator>,
    seeds: Vec<String>,
    max_pages: Option<usize>,
}

impl StoreSpider {
    pub fn new(
        config: &HarvestConfig,
        fetcher: Arc<Fetcher>,
        sink: Arc<ProductSink>,
        validator: Arc<Validator>,
        seeds: Vec<String>,
    ) -> crate::Result<Self> {
        let base = config.base()?;
        let name = match base.host_str() {
            Some(host) => format!("harvester({host})"),
            None => "harvester".to_string(),
        };
        Ok(Self {
            name,
            referer: headers::product_referer(base.as_str()),
            base,
            fetcher,
            sink,
            validator,
            seeds,
            max_pages: config.max_pages,
        })
    }

    fn is_listing(&self, url: &str) -> bool {
        url.contains("/search")
    }

    /// The listing page after `url`, unless pagination is capped.
    fn next_listing_page(&self, url: &str) -> Option<String> {
        let parsed = Url::parse(url).ok()?;
        let page: usize = parsed
            .query_pairs()
            .find(|(key, _)| key == "page")
            .and_then(|(_, value)| value.parse().ok())
            .unwrap_or(1);
        if self.max_pages.is_some_and(|max| page >= max) {
            return None;
        }

        let mut next = parsed.clone();
        let kept: Vec<(String, String)> = parsed
            .query_pairs()
            .filter(|(key, _)| key != "page")
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        next.query_pairs_mut()
            .clear()
            .extend_pairs(kept)
            .append_pair("page", &(page + 1).to_string());
        Some(next.to_string())
    }
}

#[async_trait]
impl Spider for StoreSpider {
    type Item = Product;
    type Error = Error;

    fn name(&self) -> String {
        self.name.clone()
    }

    fn start_urls(&self) -> Vec<String> {
        self.seeds.clone()
    }

    async fn scrape(&self, url: String) -> Result<(Vec<Product>, Vec<String>), Error> {
        if self.is_listing(&url) {
            let html = self.fetcher.fetch_direct(&url, None).await?;
            let base = self.base.clone();
            let links =
                tokio::task::spawn_blocking(move || extract::listing_links(&html, &base)).await??;

            let mut new_urls = links;
            if !new_urls.is_empty() {
                if let Some(next) = self.next_listing_page(&url) {
                    new_urls.push(next);
                }
            }
            Ok((Vec::new(), new_urls))
        } else {
            let html = self.fetcher.fetch(&url, Some(&self.referer)).await?;
            let product_url = url.clone();
            let product = tokio::task::spawn_blocking(move || {
                extract::product_from_html(&html, &product_url)
            })
            .await??;

            // Validate here rather than at the sink: an incomplete record
            // usually means a half-rendered page, which is worth a re-fetch.
            let report = self.validator.validate(&product);
            if !report.is_valid {
                return Err(Error::Validation(report.issues.join("; ")));
            }
            Ok((vec![product], Vec::new()))
        }
    }

    async fn process(&self, url: String, item: Product) -> Result<String, Error> {
        let marker = if item.sku.is_empty() {
            url
        } else {
            item.sku.clone()
        };
        let total = self.sink.push(item)?;
        tracing::debug!(total = total, "product accepted");
        Ok(marker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Fetcher;

    fn spider(max_pages: Option<usize>) -> StoreSpider {
        let config = HarvestConfig {
            max_pages,
            ..Default::default()
        };
        let fetcher = Arc::new(Fetcher::new(&config, None).unwrap());
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(ProductSink::create(dir.path(), 50).unwrap());
        StoreSpider::new(&config, fetcher, sink, Arc::new(Validator::new()), Vec::new()).unwrap()
    }

    #[test]
    fn next_listing_page_increments() {
        let spider = spider(None);
        let next = spider
            .next_listing_page("https://www.mrosupply.com/search/?q=&per_page=120&page=3")
            .unwrap();
        assert!(next.contains("page=4"));
        assert!(next.contains("per_page=120"));
    }

    #[test]
    fn pagination_stops_at_max_pages() {
        let spider = spider(Some(3));
        assert!(spider
            .next_listing_page("https://www.mrosupply.com/search/?q=&page=3")
            .is_none());
    }

    #[test]
    fn listing_urls_are_recognized() {
        let spider = spider(None);
        assert!(spider.is_listing("https://www.mrosupply.com/search/?q=&page=1"));
        assert!(!spider.is_listing("https://www.mrosupply.com/hydraulics-pump-123/"));
    }
}
