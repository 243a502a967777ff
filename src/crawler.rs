use std::error::Error as StdError;
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use futures::stream::StreamExt;
use tokio::signal;
use tokio::{
    sync::mpsc,
    time::{sleep, Instant},
};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::HarvestConfig;
use crate::rate::AdaptiveLimiter;
use crate::retry::{Retryable, RetryQueue, ScheduleOutcome};
use crate::Spider;

pub(crate) mod state;
pub mod statistics;

pub use state::{unfinished_urls, CrawledState, StateOutcome};
pub use statistics::Statistics;

use state::SharedProcessingState;

/// How many due retries to move back onto the crawl queue per tick.
const RETRY_BATCH: usize = 10;

pub struct Crawler {
    limiter: Arc<AdaptiveLimiter>,
    retries: Arc<RetryQueue>,
    processing_concurrency: usize,
    state_checkpoint_every: Duration,
    saved_state_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct CrawlerOptions {
    pub delay: Duration,
    pub crawling_concurrency: usize,
    pub processing_concurrency: usize,
    pub adjustment_interval: Duration,
    pub max_retry_attempts: u32,
    pub state_checkpoint_every: Duration,
}

impl Default for CrawlerOptions {
    fn default() -> Self {
        let config = HarvestConfig::default();
        Self::from(&config)
    }
}

impl From<&HarvestConfig> for CrawlerOptions {
    fn from(config: &HarvestConfig) -> Self {
        Self {
            delay: config.delay(),
            crawling_concurrency: config.workers,
            processing_concurrency: config.processing_workers,
            adjustment_interval: config.adjustment_interval(),
            max_retry_attempts: config.max_retry_attempts,
            state_checkpoint_every: config.state_checkpoint_every(),
        }
    }
}

impl Crawler {
    pub fn new(saved_state_path: Option<PathBuf>, options: CrawlerOptions) -> Self {
        Self {
            limiter: Arc::new(AdaptiveLimiter::new(
                options.delay,
                options.crawling_concurrency,
                options.adjustment_interval,
            )),
            retries: Arc::new(RetryQueue::new(options.max_retry_attempts)),
            processing_concurrency: options.processing_concurrency,
            state_checkpoint_every: options.state_checkpoint_every,
            saved_state_path,
        }
    }

    /// Shared limiter handle, e.g. for health monitoring.
    pub fn limiter(&self) -> Arc<AdaptiveLimiter> {
        self.limiter.clone()
    }

    /// Shared retry queue handle.
    pub fn retries(&self) -> Arc<RetryQueue> {
        self.retries.clone()
    }

    pub async fn run<T: Send + 'static, E: StdError + Retryable + Send + 'static>(
        &self,
        spider: Arc<dyn Spider<Item = T, Error = E>>,
    ) -> Statistics {
        tracing::info!("running spider '{}'", spider.name());
        let starting_time = Instant::now();
        let visited_urls = state::read_state(self.saved_state_path.as_deref());
        let crawling_concurrency = self.limiter.worker_cap();
        let crawling_queue_capacity = crawling_concurrency * 400;
        let processing_concurrency = self.processing_concurrency;
        let processing_queue_capacity = processing_concurrency * 10;
        let active_spiders = Arc::new(AtomicUsize::new(0));
        let stats = Statistics::default();

        let (urls_to_visit_tx, urls_to_visit_rx) = mpsc::channel(crawling_queue_capacity);
        let (items_tx, items_rx) = mpsc::channel(processing_queue_capacity);
        let (new_urls_tx, mut new_urls_rx) =
            mpsc::channel::<(String, Vec<String>)>(crawling_queue_capacity);
        let token = CancellationToken::new();
        let tracker = TaskTracker::new();

        self.launch_processors(
            &tracker,
            processing_concurrency,
            stats.clone(),
            visited_urls.clone(),
            spider.clone(),
            items_rx,
        );

        self.launch_scrapers(
            &tracker,
            crawling_concurrency,
            stats.clone(),
            visited_urls.clone(),
            spider.clone(),
            urls_to_visit_rx,
            new_urls_tx.clone(),
            items_tx,
            active_spiders.clone(),
            token.clone(),
        );

        // Seed lists can be far larger than the queue capacity, so feeding
        // happens on the tracker instead of blocking the setup path.
        let seeding_done = Arc::new(AtomicBool::new(false));
        {
            let mut seeds = spider.start_urls();
            let mut seen = std::collections::HashSet::new();
            seeds.retain(|url| seen.insert(url.clone()));

            let visited_urls = visited_urls.clone();
            let urls_to_visit_tx = urls_to_visit_tx.clone();
            let seeding_done = seeding_done.clone();
            let token = token.clone();
            tracker.spawn(async move {
                let mut seeded = 0usize;
                let mut skipped = 0usize;
                for url in seeds {
                    if token.is_cancelled() {
                        break;
                    }
                    {
                        let mut visited = visited_urls.write().await;
                        // Terminal states stay done across runs; errored
                        // states are seeded again.
                        if visited.get(&url).is_some_and(|state| state.is_terminal()) {
                            skipped += 1;
                            continue;
                        }
                        visited.insert(url.clone(), CrawledState::queued());
                    }
                    if urls_to_visit_tx.send(url).await.is_err() {
                        break;
                    }
                    seeded += 1;
                }
                tracing::info!(seeded = seeded, already_done = skipped, "seeding finished");
                seeding_done.store(true, Ordering::SeqCst);
            });
        }

        // Off the tracker: this task only ends once the token is cancelled,
        // which run() does after the crawl finishes.
        {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::select! {
                    result = signal::ctrl_c() => {
                        if let Err(error) = result {
                            tracing::error!("Failed to listen for event: {:?}", error);
                        }
                        token.cancel();
                    }
                    _ = token.cancelled() => {}
                }
            });
        }
        tracker.close();

        let mut last_state_checkpoint = Instant::now();
        loop {
            while let Ok((_visited_url, new_urls)) = new_urls_rx.try_recv() {
                for url in new_urls {
                    if !visited_urls.read().await.contains_key(&url) {
                        visited_urls
                            .write()
                            .await
                            .insert(url.clone(), CrawledState::queued());
                        tracing::debug!("queueing: {}", url);
                        let _ = urls_to_visit_tx.send(url).await;
                    }
                }
            }

            // Failed URLs whose backoff elapsed go back onto the queue,
            // best priority first. Dedup does not apply to retries.
            for item in self.retries.pop_ready(RETRY_BATCH) {
                match urls_to_visit_tx.try_send(item.url.clone()) {
                    Ok(()) => {
                        stats.num_retries.fetch_add(1, Ordering::SeqCst);
                        tracing::info!(
                            url = item.url,
                            attempt = item.attempt,
                            class = %item.class,
                            "retrying"
                        );
                    }
                    Err(_) => {
                        self.retries.requeue(item);
                        break;
                    }
                }
            }

            let _ = self.limiter.maybe_adjust();

            if last_state_checkpoint.elapsed() >= self.state_checkpoint_every {
                state::write_state(self.saved_state_path.as_deref(), visited_urls.clone()).await;
                last_state_checkpoint = Instant::now();
            }

            if token.is_cancelled() {
                tracing::warn!("crawler: cancelled, draining in-flight work");
                break;
            }

            if seeding_done.load(Ordering::SeqCst)
                && new_urls_tx.capacity() == crawling_queue_capacity // new_urls channel is empty
                && urls_to_visit_tx.capacity() == crawling_queue_capacity // urls_to_visit channel is empty
                && active_spiders.load(Ordering::SeqCst) == 0
                && self.retries.is_empty()
            {
                // no more work, we leave
                break;
            }

            sleep(Duration::from_millis(5)).await;
        }

        tracing::info!("crawler: control loop exited");

        // we drop the transmitter in order to close the stream; the receiver
        // goes too so workers never block on a full new-urls channel
        drop(urls_to_visit_tx);
        drop(new_urls_rx);
        drop(new_urls_tx);

        // and then we wait for the streams to complete
        tracker.wait().await;

        state::write_state(self.saved_state_path.as_deref(), visited_urls.clone()).await;
        token.cancel();

        stats.write_to_log(starting_time.elapsed());
        stats
    }

    fn launch_processors<T: Send + 'static, E: StdError + Retryable + Send + 'static>(
        &self,
        tracker: &TaskTracker,
        concurrency: usize,
        stats: Statistics,
        visited_urls: SharedProcessingState,
        spider: Arc<dyn Spider<Item = T, Error = E>>,
        items: mpsc::Receiver<(String, T)>,
    ) {
        tracker.spawn(async move {
            tokio_stream::wrappers::ReceiverStream::new(items)
                .for_each_concurrent(concurrency, |(url, item)| {
                    let stats = stats.clone();
                    let visited_urls = visited_urls.clone();
                    let spider = spider.clone();

                    async move {
                        stats.num_processings.fetch_add(1, Ordering::SeqCst);
                        match spider.process(url.clone(), item).await {
                            Err(err) => {
                                stats.num_process_errors.fetch_add(1, Ordering::SeqCst);
                                tracing::error!(url = url, "Processing error: {:?}", err);
                                visited_urls
                                    .write()
                                    .await
                                    .entry(url)
                                    .and_modify(|state| state.process_error(err.to_string()))
                                    .or_insert_with(|| {
                                        let mut state = CrawledState::default();
                                        state.process_error(err.to_string());
                                        state
                                    });
                            }
                            Ok(output) => {
                                visited_urls
                                    .write()
                                    .await
                                    .entry(url)
                                    .and_modify(|state| state.processed_ok(&output))
                                    .or_insert_with(|| {
                                        let mut state = CrawledState::default();
                                        state.processed_ok(&output);
                                        state
                                    });
                            }
                        }
                    }
                })
                .await;
        });
    }

    #[allow(clippy::too_many_arguments)]
    fn launch_scrapers<T: Send + 'static, E: StdError + Retryable + Send + 'static>(
        &self,
        tracker: &TaskTracker,
        concurrency: usize,
        stats: Statistics,
        visited_urls: SharedProcessingState,
        spider: Arc<dyn Spider<Item = T, Error = E>>,
        urls_to_visit: mpsc::Receiver<String>,
        new_urls_tx: mpsc::Sender<(String, Vec<String>)>,
        items_tx: mpsc::Sender<(String, T)>,
        active_spiders: Arc<AtomicUsize>,
        token: CancellationToken,
    ) {
        let limiter = self.limiter.clone();
        let retries = self.retries.clone();
        tracker.spawn(async move {
            tokio_stream::wrappers::ReceiverStream::new(urls_to_visit)
                .for_each_concurrent(concurrency, |queued_url| {
                    let limiter = limiter.clone();
                    let retries = retries.clone();
                    let stats = stats.clone();
                    let visited_urls = visited_urls.clone();
                    let spider = spider.clone();
                    let new_urls_tx = new_urls_tx.clone();
                    let items_tx = items_tx.clone();
                    let active_spiders = active_spiders.clone();
                    let token = token.clone();

                    async move {
                        active_spiders.fetch_add(1, Ordering::SeqCst);

                        if token.is_cancelled() {
                            // drain the queue without fetching during shutdown
                            let _ = new_urls_tx.send((queued_url, Vec::new())).await;
                            active_spiders.fetch_sub(1, Ordering::SeqCst);
                            return;
                        }

                        let permit = limiter.admit().await;
                        limiter.pause().await;

                        let mut urls = Vec::new();
                        stats.num_scrapings.fetch_add(1, Ordering::SeqCst);
                        match spider.scrape(queued_url.clone()).await {
                            Err(err) => {
                                limiter.record(false);
                                stats.num_scrape_errors.fetch_add(1, Ordering::SeqCst);
                                let class = err.retry_class();
                                tracing::error!(
                                    url = queued_url,
                                    class = %class,
                                    "Scraping error: {err}"
                                );
                                let exhausted = matches!(
                                    retries.schedule(&queued_url, class, &err.to_string()),
                                    ScheduleOutcome::Exhausted
                                );
                                if exhausted {
                                    stats.num_exhausted.fetch_add(1, Ordering::SeqCst);
                                }
                                visited_urls
                                    .write()
                                    .await
                                    .entry(queued_url.clone())
                                    .and_modify(|state| {
                                        state.scrape_error(err.to_string());
                                        if exhausted {
                                            state.mark_exhausted();
                                        }
                                    })
                                    .or_insert_with(|| {
                                        let mut state = CrawledState::default();
                                        state.scrape_error(err.to_string());
                                        if exhausted {
                                            state.mark_exhausted();
                                        }
                                        state
                                    });
                            }
                            Ok((items, new_urls)) => {
                                limiter.record(true);
                                retries.mark_success(&queued_url);
                                visited_urls
                                    .write()
                                    .await
                                    .entry(queued_url.clone())
                                    .and_modify(|state| state.scraped_ok())
                                    .or_insert_with(|| {
                                        let mut state = CrawledState::default();
                                        state.scraped_ok();
                                        state
                                    });
                                for item in items {
                                    let _ = items_tx.send((queued_url.clone(), item)).await;
                                }
                                urls = new_urls;
                            }
                        };

                        drop(permit);
                        let _ = new_urls_tx.send((queued_url, urls)).await;
                        active_spiders.fetch_sub(1, Ordering::SeqCst);
                    }
                })
                .await;

            drop(items_tx);
        });
    }
}
