use std::path::PathBuf;
use std::sync::Arc;

use chrono::Local;
use clap::{Args, Parser, Subcommand};
use tokio::time::{interval, Instant};
use tracing_subscriber::{prelude::*, EnvFilter};

use harvester::client::Fetcher;
use harvester::crawler::unfinished_urls;
use harvester::discover::{self, UrlCollector};
use harvester::error::Error;
use harvester::export;
use harvester::health::HealthMonitor;
use harvester::proxy::ProxyPool;
use harvester::sink::ProductSink;
use harvester::site::StoreSpider;
use harvester::validate::Validator;
use harvester::{Crawler, CrawlerOptions, HarvestConfig, Result};

const CRAWL_STATE_FILE: &str = "crawl_state.json";

/// Harvest product data from a single online store.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Collect product URLs from listings and sitemaps into a file
    Collect(CollectArgs),
    /// Crawl product pages and export the results
    Scrape(ScrapeArgs),
    /// Re-run URLs from a failed-URL file or the saved crawl state
    Retry(RetryArgs),
    /// Count collectable URLs and project the crawl duration
    Estimate(EstimateArgs),
    /// Load a proxy pool, validate a sample and print its health
    CheckProxies(CheckProxiesArgs),
}

#[derive(Debug, Args)]
struct CommonArgs {
    /// Store base URL
    #[arg(long)]
    base_url: Option<String>,
    /// Output directory for all generated files
    #[arg(long, short)]
    output_dir: Option<PathBuf>,
    /// Concurrent scrape workers
    #[arg(long, short)]
    workers: Option<usize>,
    /// Base delay between requests in milliseconds
    #[arg(long)]
    delay_ms: Option<u64>,
    /// Maximum listing pages to paginate
    #[arg(long)]
    max_pages: Option<usize>,
    /// Proxy list file (host:port:user:pass or scheme://host:port lines)
    #[arg(long)]
    proxy_file: Option<PathBuf>,
    /// URL of a plain-text proxy list to download
    #[arg(long)]
    proxy_list_url: Option<String>,
    /// Rotate product page requests through the proxy pool
    #[arg(long)]
    use_proxies: bool,
}

#[derive(Debug, Args)]
struct CollectArgs {
    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Debug, Args)]
struct ScrapeArgs {
    #[command(flatten)]
    common: CommonArgs,
    /// File of product URLs (one per line); collected on the fly when omitted
    #[arg(long)]
    urls: Option<PathBuf>,
    /// Scrape at most this many products
    #[arg(long)]
    max_products: Option<usize>,
    /// Resume from the saved crawl state and product checkpoint
    #[arg(long)]
    resume: bool,
}

#[derive(Debug, Args)]
struct RetryArgs {
    #[command(flatten)]
    common: CommonArgs,
    /// Failed-URL file from a previous run; defaults to the saved crawl state
    #[arg(long)]
    urls: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct EstimateArgs {
    #[command(flatten)]
    common: CommonArgs,
    /// Count URLs from this file instead of collecting
    #[arg(long)]
    urls: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct CheckProxiesArgs {
    #[command(flatten)]
    common: CommonArgs,
    /// How many pool entries to probe
    #[arg(long)]
    sample: Option<usize>,
    /// Probe against this URL instead of the store base URL
    #[arg(long)]
    test_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new("info"))
                .expect("telemetry: Creating EnvFilter"),
        )
        .init();

    match Cli::parse().cmd {
        Command::Collect(args) => collect(args).await,
        Command::Scrape(args) => scrape(args).await,
        Command::Retry(args) => retry(args).await,
        Command::Estimate(args) => estimate(args).await,
        Command::CheckProxies(args) => check_proxies(args).await,
    }
}

fn load_config(common: &CommonArgs) -> Result<HarvestConfig> {
    let mut config = HarvestConfig::from_env()?;
    if let Some(base_url) = &common.base_url {
        config.base_url = base_url.clone();
    }
    if let Some(output_dir) = &common.output_dir {
        config.output_dir = output_dir.clone();
    }
    if let Some(workers) = common.workers {
        config.workers = workers;
    }
    if let Some(delay_ms) = common.delay_ms {
        config.delay_ms = delay_ms;
    }
    if let Some(max_pages) = common.max_pages {
        config.max_pages = Some(max_pages);
    }
    if let Some(proxy_file) = &common.proxy_file {
        config.proxy_file = Some(proxy_file.clone());
    }
    if let Some(proxy_list_url) = &common.proxy_list_url {
        config.proxy_list_url = Some(proxy_list_url.clone());
    }
    config.validate()?;
    Ok(config)
}

/// Build the proxy pool from the first configured source. A missing or empty
/// pool is a warning, not an error: the harvest continues direct.
async fn build_pool(config: &HarvestConfig, use_proxies: bool) -> Result<Option<Arc<ProxyPool>>> {
    if !use_proxies {
        return Ok(None);
    }
    let pool = match load_pool(config).await? {
        Some(pool) => pool,
        None => {
            tracing::warn!("--use-proxies set but no proxy source configured, continuing direct");
            return Ok(None);
        }
    };
    if pool.is_empty() {
        tracing::warn!("no proxies available, continuing direct");
        return Ok(None);
    }
    let validated = pool.validate(&config.base_url, config.validate_sample).await;
    if validated == 0 {
        tracing::warn!("no proxies passed validation, rotation will cycle the full pool");
    }
    Ok(Some(Arc::new(pool)))
}

async fn load_pool(config: &HarvestConfig) -> Result<Option<ProxyPool>> {
    let timeout = config.timeout();
    let pool = if let Some(file) = &config.proxy_file {
        Some(ProxyPool::from_file(file, timeout)?)
    } else if let Some(list_url) = &config.proxy_list_url {
        Some(ProxyPool::fetch(list_url, timeout).await?)
    } else if let Some(host) = &config.proxy_host {
        Some(ProxyPool::gateway(
            host,
            config.proxy_port,
            &config.proxy_user,
            &config.proxy_pass,
            timeout,
        )?)
    } else {
        None
    };
    Ok(pool)
}

async fn collect(args: CollectArgs) -> Result<()> {
    let config = load_config(&args.common)?;
    let fetcher = Arc::new(Fetcher::new(&config, None)?);
    let collector = UrlCollector::new(&config, fetcher)?;

    let urls = collector.collect().await?;
    if urls.is_empty() {
        tracing::warn!("no product urls found");
        return Ok(());
    }
    discover::write_url_file(&config.output_dir, &urls)?;
    Ok(())
}

async fn scrape(args: ScrapeArgs) -> Result<()> {
    let config = load_config(&args.common)?;
    let pool = build_pool(&config, args.common.use_proxies).await?;

    let mut seeds = match &args.urls {
        Some(path) => discover::read_url_file(path)?,
        None => {
            // Phase 1 runs direct; the pool only carries product fetches.
            let fetcher = Arc::new(Fetcher::new(&config, None)?);
            let collector = UrlCollector::new(&config, fetcher)?;
            let urls = collector.collect().await?;
            if !urls.is_empty() {
                discover::write_url_file(&config.output_dir, &urls)?;
            }
            urls
        }
    };
    if let Some(max) = args.max_products {
        seeds.truncate(max);
        tracing::info!(limit = max, "product list truncated");
    }
    if seeds.is_empty() {
        tracing::error!("no product urls to scrape");
        return Ok(());
    }

    run_crawl(config, seeds, args.resume, pool).await
}

async fn retry(args: RetryArgs) -> Result<()> {
    let config = load_config(&args.common)?;
    let seeds = match &args.urls {
        Some(path) => discover::read_url_file(path)?,
        None => unfinished_urls(&config.output_dir.join(CRAWL_STATE_FILE)),
    };
    if seeds.is_empty() {
        tracing::info!("nothing to retry");
        return Ok(());
    }
    tracing::info!(urls = seeds.len(), "retrying previously failed urls");

    let pool = build_pool(&config, args.common.use_proxies).await?;
    run_crawl(config, seeds, true, pool).await
}

async fn estimate(args: EstimateArgs) -> Result<()> {
    let config = load_config(&args.common)?;
    let count = match &args.urls {
        Some(path) => discover::read_url_file(path)?.len(),
        None => {
            let fetcher = Arc::new(Fetcher::new(&config, None)?);
            UrlCollector::new(&config, fetcher)?.collect().await?.len()
        }
    };

    let delay_secs = config.delay().as_secs_f64();
    let paced = count as f64 * delay_secs / config.workers as f64;
    println!("Total products found: {count}");
    println!(
        "With {} workers at {:.1}s delay: {:.1} minutes ({:.2} hours)",
        config.workers,
        delay_secs,
        paced / 60.0,
        paced / 3600.0
    );
    println!(
        "At ~5 products/second: {:.1} minutes ({:.2} hours)",
        count as f64 / 5.0 / 60.0,
        count as f64 / 5.0 / 3600.0
    );
    println!(
        "At ~10 products/second (aggressive): {:.1} minutes ({:.2} hours)",
        count as f64 / 10.0 / 60.0,
        count as f64 / 10.0 / 3600.0
    );
    Ok(())
}

async fn check_proxies(args: CheckProxiesArgs) -> Result<()> {
    let config = load_config(&args.common)?;
    let pool = load_pool(&config).await?.ok_or_else(|| {
        Error::Config(
            "no proxy source configured; set --proxy-file, --proxy-list-url or HARVESTER_PROXY_HOST"
                .into(),
        )
    })?;
    if pool.is_empty() {
        return Err(Error::Config("proxy source yielded no usable entries".into()));
    }

    let sample = args.sample.unwrap_or(config.validate_sample);
    let test_url = args.test_url.as_deref().unwrap_or(&config.base_url);
    pool.validate(test_url, sample).await;

    println!("{}", serde_json::to_string_pretty(&pool.health())?);
    for stats in pool.stats() {
        if stats.success + stats.failed > 0 {
            println!(
                "{:<24} success={} failed={}",
                stats.address, stats.success, stats.failed
            );
        }
    }
    Ok(())
}

async fn run_crawl(
    config: HarvestConfig,
    seeds: Vec<String>,
    resume: bool,
    pool: Option<Arc<ProxyPool>>,
) -> Result<()> {
    let started_at = Local::now();
    let run_start = Instant::now();
    let total_urls = seeds.len();

    let fetcher = Arc::new(Fetcher::new(&config, pool)?);
    let state_path = config.output_dir.join(CRAWL_STATE_FILE);

    let sink = if resume {
        ProductSink::resume(&config.output_dir, config.checkpoint_interval)?
    } else {
        if state_path.exists() {
            tracing::info!(
                "starting fresh, discarding previous crawl state '{}'",
                state_path.display()
            );
            std::fs::remove_file(&state_path)?;
        }
        ProductSink::create(&config.output_dir, config.checkpoint_interval)?
    };
    let sink = Arc::new(sink);
    let validator = Arc::new(Validator::new());

    let spider = Arc::new(StoreSpider::new(
        &config,
        fetcher.clone(),
        sink.clone(),
        validator.clone(),
        seeds,
    )?);
    let crawler = Crawler::new(Some(state_path), CrawlerOptions::from(&config));
    let retries = crawler.retries();

    let monitor = HealthMonitor::new(&config, sink.checkpoint_path());
    let health_handle = {
        let limiter = crawler.limiter();
        let retries = retries.clone();
        let fetcher = fetcher.clone();
        let every = config.health_interval();
        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let status = monitor.check(&limiter, &fetcher, &retries);
                if !status.rate_limit.healthy {
                    // 429 storm: cool down before the site blocks harder.
                    limiter.force_slow();
                }
                if let Err(err) = monitor.write_status(&status) {
                    tracing::warn!("failed to write health status: {err}");
                }
            }
        })
    };

    let stats = crawler.run(spider).await;
    health_handle.abort();

    sink.snapshot()?;
    let products = sink.products();
    if !products.is_empty() {
        export::write_json(&config.output_dir, &products, "final")?;
        export::write_csv(&config.output_dir, &products, "final")?;
    }
    export::write_failed_urls(&config.output_dir, &retries.exhausted())?;
    let summary = export::RunSummary::new(
        &stats,
        total_urls,
        products.len(),
        run_start.elapsed(),
        started_at,
    );
    export::write_summary(&config.output_dir, &summary)?;

    let quality = validator.metrics();
    tracing::info!(
        products = products.len(),
        urls = total_urls,
        rejected = quality.rejected,
        mean_quality = format!("{:.1}", quality.mean_score),
        success_rate = format!("{:.1}%", summary.success_rate_percent),
        "harvest complete"
    );
    Ok(())
}
