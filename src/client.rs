//! HTTP fetch layer.
//!
//! Wraps reqwest with rotating browser headers, optional proxy rotation and
//! a short in-request retry loop. A 429 backs off `backoff_429 × attempt`
//! before retrying; transport errors pause briefly and retry with the next
//! proxy. Anything still failing is classified and handed to the crawl-level
//! retry queue by the caller.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio::time::sleep;

use crate::config::HarvestConfig;
use crate::error::{Error, Result};
use crate::headers;
use crate::proxy::ProxyPool;

#[derive(Debug)]
pub struct Fetcher {
    direct: Client,
    pool: Option<Arc<ProxyPool>>,
    quick_retries: u32,
    backoff_429: Duration,
    retry_pause: Duration,
    /// Consecutive 429 responses; reset by any success.
    rate_limit_streak: AtomicU32,
}

impl Fetcher {
    pub fn new(config: &HarvestConfig, pool: Option<Arc<ProxyPool>>) -> Result<Self> {
        let direct = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self {
            direct,
            pool,
            quick_retries: config.quick_retries.max(1),
            backoff_429: config.backoff_429(),
            retry_pause: config.quick_retry_pause(),
            rate_limit_streak: AtomicU32::new(0),
        })
    }

    pub fn has_pool(&self) -> bool {
        self.pool.is_some()
    }

    pub fn pool(&self) -> Option<&Arc<ProxyPool>> {
        self.pool.as_ref()
    }

    pub fn rate_limit_streak(&self) -> u32 {
        self.rate_limit_streak.load(Ordering::Relaxed)
    }

    /// Fetch through the proxy pool when one is configured.
    pub async fn fetch(&self, url: &str, referer: Option<&str>) -> Result<String> {
        self.fetch_inner(url, referer, true).await
    }

    /// Fetch over the direct connection, bypassing the pool. Listing pages
    /// are collected this way: one flaky exit IP can end pagination early.
    pub async fn fetch_direct(&self, url: &str, referer: Option<&str>) -> Result<String> {
        self.fetch_inner(url, referer, false).await
    }

    async fn fetch_inner(&self, url: &str, referer: Option<&str>, use_pool: bool) -> Result<String> {
        let mut attempt = 0;
        loop {
            attempt += 1;

            let lease = if use_pool {
                self.pool.as_ref().and_then(|pool| pool.next())
            } else {
                None
            };
            let client = lease.as_ref().map(|l| &l.client).unwrap_or(&self.direct);

            let sent = client
                .get(url)
                .headers(headers::request_headers(referer))
                .send()
                .await;

            match sent {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        if let (Some(pool), Some(lease)) = (&self.pool, &lease) {
                            pool.mark_success(lease.id);
                        }
                        self.rate_limit_streak.store(0, Ordering::Relaxed);
                        return Ok(response.text().await?);
                    }

                    if let (Some(pool), Some(lease)) = (&self.pool, &lease) {
                        pool.mark_failed(lease.id);
                    }

                    match status.as_u16() {
                        429 => {
                            let streak =
                                self.rate_limit_streak.fetch_add(1, Ordering::Relaxed) + 1;
                            if attempt >= self.quick_retries {
                                return Err(Error::RateLimited);
                            }
                            let wait = self.backoff_429.saturating_mul(attempt);
                            tracing::warn!(
                                url = url,
                                wait_ms = wait.as_millis() as u64,
                                streak = streak,
                                "rate limited, backing off"
                            );
                            sleep(wait).await;
                        }
                        404 => return Err(Error::NotFound),
                        code if status.is_server_error() => return Err(Error::Server(code)),
                        code => return Err(Error::Client(code)),
                    }
                }
                Err(err) => {
                    if let (Some(pool), Some(lease)) = (&self.pool, &lease) {
                        pool.mark_failed(lease.id);
                    }
                    let classified = if err.is_timeout() {
                        Error::Timeout
                    } else {
                        Error::Transport(err)
                    };
                    if attempt >= self.quick_retries {
                        return Err(classified);
                    }
                    tracing::debug!(url = url, attempt = attempt, "transport error: {classified}");
                    sleep(self.retry_pause).await;
                }
            }
        }
    }
}
