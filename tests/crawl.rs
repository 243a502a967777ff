//! Crawl engine tests against in-memory spiders.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use harvester::crawler::unfinished_urls;
use harvester::{Crawler, CrawlerOptions, Error, Spider};

fn fast_options() -> CrawlerOptions {
    CrawlerOptions {
        delay: Duration::ZERO,
        crawling_concurrency: 4,
        processing_concurrency: 2,
        adjustment_interval: Duration::from_secs(300),
        max_retry_attempts: 5,
        state_checkpoint_every: Duration::from_secs(60),
    }
}

/// Visits `/n`, discovers `/n0`, which is a leaf.
struct ChainSpider {
    processed: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Spider for ChainSpider {
    type Item = String;
    type Error = Error;

    fn name(&self) -> String {
        "chain-spider".to_string()
    }

    fn start_urls(&self) -> Vec<String> {
        vec![
            "https://store.example/1".to_string(),
            "https://store.example/2".to_string(),
            "https://store.example/3".to_string(),
        ]
    }

    async fn scrape(&self, url: String) -> Result<(Vec<String>, Vec<String>), Error> {
        let mut new_urls = Vec::new();
        if !url.ends_with('0') {
            new_urls.push(format!("{url}0"));
        }
        Ok((vec![format!("item from {url}")], new_urls))
    }

    async fn process(&self, _url: String, item: String) -> Result<String, Error> {
        self.processed.lock().unwrap().push(item);
        Ok("stored".to_string())
    }
}

#[tokio::test]
async fn visits_discovered_urls_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let state_path = dir.path().join("crawl_state.json");
    let processed = Arc::new(Mutex::new(Vec::new()));

    let crawler = Crawler::new(Some(state_path.clone()), fast_options());
    let spider = Arc::new(ChainSpider {
        processed: processed.clone(),
    });
    let stats = crawler.run(spider).await;

    assert_eq!(stats.scrapings(), 6);
    assert_eq!(stats.scrape_errors(), 0);
    assert_eq!(stats.processings(), 6);
    assert_eq!(processed.lock().unwrap().len(), 6);

    // Final state checkpoint covers every visited URL.
    let state: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&state_path).unwrap()).unwrap();
    assert_eq!(state["visited_urls"].as_object().unwrap().len(), 6);
    assert!(unfinished_urls(&state_path).is_empty());
}

/// Always fails; with a single allowed attempt the URL exhausts right away.
struct BrokenSpider;

#[async_trait]
impl Spider for BrokenSpider {
    type Item = String;
    type Error = Error;

    fn name(&self) -> String {
        "broken-spider".to_string()
    }

    fn start_urls(&self) -> Vec<String> {
        vec!["https://store.example/broken".to_string()]
    }

    async fn scrape(&self, _url: String) -> Result<(Vec<String>, Vec<String>), Error> {
        Err(Error::Parse("page markup changed".to_string()))
    }

    async fn process(&self, _url: String, _item: String) -> Result<String, Error> {
        Ok(String::new())
    }
}

#[tokio::test]
async fn exhausted_urls_end_the_crawl() {
    let dir = tempfile::tempdir().unwrap();
    let state_path = dir.path().join("crawl_state.json");

    let crawler = Crawler::new(
        Some(state_path.clone()),
        CrawlerOptions {
            max_retry_attempts: 1,
            ..fast_options()
        },
    );
    let stats = crawler.run(Arc::new(BrokenSpider)).await;

    assert_eq!(stats.scrapings(), 1);
    assert_eq!(stats.scrape_errors(), 1);
    assert_eq!(stats.exhausted(), 1);
    assert_eq!(stats.processings(), 0);

    let failed = crawler.retries().exhausted();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].url, "https://store.example/broken");

    // Exhausted is terminal: a retry run has nothing to pick up.
    assert!(unfinished_urls(&state_path).is_empty());
}

/// Fails twice, then delivers. Exercises the retry queue end to end; the
/// paused clock fast-forwards the backoffs.
struct FlakySpider {
    attempts: AtomicUsize,
}

#[async_trait]
impl Spider for FlakySpider {
    type Item = String;
    type Error = Error;

    fn name(&self) -> String {
        "flaky-spider".to_string()
    }

    fn start_urls(&self) -> Vec<String> {
        vec!["https://store.example/flaky".to_string()]
    }

    async fn scrape(&self, url: String) -> Result<(Vec<String>, Vec<String>), Error> {
        if self.attempts.fetch_add(1, Ordering::SeqCst) < 2 {
            return Err(Error::Server(502));
        }
        Ok((vec![format!("item from {url}")], Vec::new()))
    }

    async fn process(&self, _url: String, _item: String) -> Result<String, Error> {
        Ok("stored".to_string())
    }
}

#[tokio::test(start_paused = true)]
async fn failed_urls_are_retried_with_backoff() {
    let dir = tempfile::tempdir().unwrap();
    let state_path = dir.path().join("crawl_state.json");

    let crawler = Crawler::new(Some(state_path), fast_options());
    let stats = crawler
        .run(Arc::new(FlakySpider {
            attempts: AtomicUsize::new(0),
        }))
        .await;

    assert_eq!(stats.scrapings(), 3);
    assert_eq!(stats.scrape_errors(), 2);
    assert_eq!(stats.retries(), 2);
    assert_eq!(stats.exhausted(), 0);
    assert_eq!(stats.processings(), 1);
    assert!(crawler.retries().exhausted().is_empty());
}

/// Counts scrapes; used to show resumed crawls skip completed URLs.
struct CountingSpider {
    scraped: Arc<AtomicUsize>,
    seeds: Vec<String>,
}

#[async_trait]
impl Spider for CountingSpider {
    type Item = String;
    type Error = Error;

    fn name(&self) -> String {
        "counting-spider".to_string()
    }

    fn start_urls(&self) -> Vec<String> {
        self.seeds.clone()
    }

    async fn scrape(&self, url: String) -> Result<(Vec<String>, Vec<String>), Error> {
        self.scraped.fetch_add(1, Ordering::SeqCst);
        Ok((vec![format!("item from {url}")], Vec::new()))
    }

    async fn process(&self, _url: String, _item: String) -> Result<String, Error> {
        Ok("stored".to_string())
    }
}

#[tokio::test]
async fn resumed_crawls_skip_completed_urls() {
    let dir = tempfile::tempdir().unwrap();
    let state_path = dir.path().join("crawl_state.json");
    let seeds = vec![
        "https://store.example/a".to_string(),
        "https://store.example/b".to_string(),
    ];

    let first_pass = Arc::new(AtomicUsize::new(0));
    let crawler = Crawler::new(Some(state_path.clone()), fast_options());
    crawler
        .run(Arc::new(CountingSpider {
            scraped: first_pass.clone(),
            seeds: seeds.clone(),
        }))
        .await;
    assert_eq!(first_pass.load(Ordering::SeqCst), 2);

    // Same state file: everything already processed, nothing to do.
    let second_pass = Arc::new(AtomicUsize::new(0));
    let crawler = Crawler::new(Some(state_path), fast_options());
    let stats = crawler
        .run(Arc::new(CountingSpider {
            scraped: second_pass.clone(),
            seeds,
        }))
        .await;
    assert_eq!(second_pass.load(Ordering::SeqCst), 0);
    assert_eq!(stats.scrapings(), 0);
}
