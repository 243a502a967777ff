//! Configuration, loaded from built-in defaults plus `HARVESTER_*`
//! environment variables. The CLI overrides individual fields on top.

use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};

pub const ENV_PREFIX: &str = "HARVESTER_";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    /// Store to harvest. All listing and product URLs live under it.
    pub base_url: String,
    pub output_dir: PathBuf,

    /// Concurrent scrape workers. Conservative by default; the adaptive
    /// limiter may raise it up to 150% when the site tolerates it.
    pub workers: usize,
    pub processing_workers: usize,
    /// Base delay between requests, jittered ±30% per request.
    pub delay_ms: u64,

    /// Listing page size for URL collection.
    pub per_page: usize,
    pub max_pages: Option<usize>,

    pub request_timeout_secs: u64,
    /// In-request retry attempts before the crawl-level retry queue takes over.
    pub quick_retries: u32,
    /// Base wait after an HTTP 429, multiplied by the attempt number.
    pub backoff_429_ms: u64,
    /// Wait before an in-request retry on a transport error.
    pub quick_retry_pause_ms: u64,

    pub max_retry_attempts: u32,

    /// Snapshot results every this many accepted products.
    pub checkpoint_interval: usize,
    pub state_checkpoint_secs: u64,

    pub adjustment_interval_secs: u64,
    /// Consecutive 429s before health turns critical.
    pub rate_limit_threshold: u32,
    pub stale_checkpoint_minutes: u64,
    pub health_interval_secs: u64,
    /// Health warns below this recent success rate.
    pub min_success_rate: f64,

    pub proxy_file: Option<PathBuf>,
    pub proxy_list_url: Option<String>,
    pub proxy_host: Option<String>,
    pub proxy_port: u16,
    pub proxy_user: String,
    pub proxy_pass: String,
    /// How many pool entries to probe when validating.
    pub validate_sample: usize,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.mrosupply.com".into(),
            output_dir: PathBuf::from("scraped_data"),
            workers: 2,
            processing_workers: 2,
            delay_ms: 1500,
            per_page: 120,
            max_pages: None,
            request_timeout_secs: 15,
            quick_retries: 3,
            backoff_429_ms: 5000,
            quick_retry_pause_ms: 500,
            max_retry_attempts: 5,
            checkpoint_interval: 50,
            state_checkpoint_secs: 60,
            adjustment_interval_secs: 300,
            rate_limit_threshold: 10,
            stale_checkpoint_minutes: 30,
            health_interval_secs: 300,
            min_success_rate: 0.85,
            proxy_file: None,
            proxy_list_url: None,
            proxy_host: None,
            proxy_port: 10000,
            proxy_user: String::new(),
            proxy_pass: String::new(),
            validate_sample: 50,
        }
    }
}

impl HarvestConfig {
    /// Defaults overridden by any `HARVESTER_*` environment variables set.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        read_env("BASE_URL", &mut config.base_url)?;
        read_env("OUTPUT_DIR", &mut config.output_dir)?;
        read_env("WORKERS", &mut config.workers)?;
        read_env("PROCESSING_WORKERS", &mut config.processing_workers)?;
        read_env("DELAY_MS", &mut config.delay_ms)?;
        read_env("PER_PAGE", &mut config.per_page)?;
        read_env_opt("MAX_PAGES", &mut config.max_pages)?;
        read_env("REQUEST_TIMEOUT_SECS", &mut config.request_timeout_secs)?;
        read_env("QUICK_RETRIES", &mut config.quick_retries)?;
        read_env("BACKOFF_429_MS", &mut config.backoff_429_ms)?;
        read_env("QUICK_RETRY_PAUSE_MS", &mut config.quick_retry_pause_ms)?;
        read_env("MAX_RETRY_ATTEMPTS", &mut config.max_retry_attempts)?;
        read_env("CHECKPOINT_INTERVAL", &mut config.checkpoint_interval)?;
        read_env("STATE_CHECKPOINT_SECS", &mut config.state_checkpoint_secs)?;
        read_env("ADJUSTMENT_INTERVAL_SECS", &mut config.adjustment_interval_secs)?;
        read_env("RATE_LIMIT_THRESHOLD", &mut config.rate_limit_threshold)?;
        read_env("STALE_CHECKPOINT_MINUTES", &mut config.stale_checkpoint_minutes)?;
        read_env("HEALTH_INTERVAL_SECS", &mut config.health_interval_secs)?;
        read_env("MIN_SUCCESS_RATE", &mut config.min_success_rate)?;
        read_env_opt("PROXY_FILE", &mut config.proxy_file)?;
        read_env_opt("PROXY_LIST_URL", &mut config.proxy_list_url)?;
        read_env_opt("PROXY_HOST", &mut config.proxy_host)?;
        read_env("PROXY_PORT", &mut config.proxy_port)?;
        read_env("PROXY_USER", &mut config.proxy_user)?;
        read_env("PROXY_PASS", &mut config.proxy_pass)?;
        read_env("VALIDATE_SAMPLE", &mut config.validate_sample)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::Config("workers must be greater than 0".into()));
        }
        if self.processing_workers == 0 {
            return Err(Error::Config(
                "processing_workers must be greater than 0".into(),
            ));
        }
        if self.per_page == 0 {
            return Err(Error::Config("per_page must be greater than 0".into()));
        }
        self.base()?;
        if self.proxy_host.is_some() && (self.proxy_user.is_empty() || self.proxy_pass.is_empty()) {
            return Err(Error::Config(
                "proxy_user and proxy_pass are required with proxy_host".into(),
            ));
        }
        Ok(())
    }

    pub fn base(&self) -> Result<Url> {
        Ok(Url::parse(&self.base_url)?)
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn backoff_429(&self) -> Duration {
        Duration::from_millis(self.backoff_429_ms)
    }

    pub fn quick_retry_pause(&self) -> Duration {
        Duration::from_millis(self.quick_retry_pause_ms)
    }

    pub fn adjustment_interval(&self) -> Duration {
        Duration::from_secs(self.adjustment_interval_secs)
    }

    pub fn state_checkpoint_every(&self) -> Duration {
        Duration::from_secs(self.state_checkpoint_secs)
    }

    pub fn stale_checkpoint_after(&self) -> Duration {
        Duration::from_secs(self.stale_checkpoint_minutes * 60)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }

    pub fn has_gateway(&self) -> bool {
        self.proxy_host.is_some()
    }
}

fn read_env<T>(name: &str, field: &mut T) -> Result<()>
where
    T: FromStr,
    T::Err: Display,
{
    if let Ok(raw) = std::env::var(format!("{ENV_PREFIX}{name}")) {
        *field = raw
            .parse()
            .map_err(|e| Error::Config(format!("{ENV_PREFIX}{name}: {e}")))?;
    }
    Ok(())
}

fn read_env_opt<T>(name: &str, field: &mut Option<T>) -> Result<()>
where
    T: FromStr,
    T::Err: Display,
{
    if let Ok(raw) = std::env::var(format!("{ENV_PREFIX}{name}")) {
        *field = Some(
            raw.parse()
                .map_err(|e| Error::Config(format!("{ENV_PREFIX}{name}: {e}")))?,
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        HarvestConfig::default().validate().unwrap();
    }

    #[test]
    fn zero_workers_rejected() {
        let config = HarvestConfig {
            workers: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn gateway_requires_credentials() {
        let config = HarvestConfig {
            proxy_host: Some("p.example.com".into()),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
