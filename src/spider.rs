use std::error::Error as StdError;

use async_trait::async_trait;

use crate::retry::Retryable;

/// Scraping logic the crawl engine drives.
///
/// `scrape` turns a URL into extracted items plus newly discovered URLs;
/// `process` persists one item and returns a short outcome marker that is
/// recorded in the crawl state. Errors classify themselves for the retry
/// queue via [`Retryable`].
#[async_trait]
pub trait Spider: Send + Sync {
    type Item: Send;
    type Error: StdError + Retryable + Send;

    fn name(&self) -> String;
    fn start_urls(&self) -> Vec<String>;
    async fn scrape(&self, url: String) -> Result<(Vec<Self::Item>, Vec<String>), Self::Error>;
    async fn process(&self, url: String, item: Self::Item) -> Result<String, Self::Error>;
}
