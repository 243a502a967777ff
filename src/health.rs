//! Run health checks.
//!
//! Each check yields a severity-tagged result; the aggregate status is
//! serialized next to the output data so an operator (or a cron probe) can
//! read the crawl's condition without attaching to the process.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::client::Fetcher;
use crate::config::HarvestConfig;
use crate::crawler::state::write_atomic;
use crate::error::Result;
use crate::rate::AdaptiveLimiter;
use crate::retry::RetryQueue;

pub const HEALTH_STATUS_FILE: &str = "health_status.json";

/// Retry backlogs beyond this size flag a warning.
const RETRY_BACKLOG_WARN: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub healthy: bool,
    pub severity: Severity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl CheckResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self::new(true, Severity::Info, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(true, Severity::Warning, message)
    }

    pub fn critical(message: impl Into<String>) -> Self {
        Self::new(false, Severity::Critical, message)
    }

    fn new(healthy: bool, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            healthy,
            severity,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub progress: CheckResult,
    pub success_rate: CheckResult,
    pub rate_limit: CheckResult,
    pub proxies: CheckResult,
    pub retry_backlog: CheckResult,
    pub is_healthy: bool,
    pub has_warnings: bool,
    pub has_criticals: bool,
    pub timestamp: DateTime<Utc>,
}

impl HealthStatus {
    fn from_checks(
        progress: CheckResult,
        success_rate: CheckResult,
        rate_limit: CheckResult,
        proxies: CheckResult,
        retry_backlog: CheckResult,
    ) -> Self {
        let all = [&progress, &success_rate, &rate_limit, &proxies, &retry_backlog];
        let has_warnings = all.iter().any(|c| c.severity == Severity::Warning);
        let has_criticals = all.iter().any(|c| c.severity == Severity::Critical);
        // Progress and success rate are the load-bearing checks.
        let is_healthy = progress.healthy && success_rate.healthy;
        Self {
            progress,
            success_rate,
            rate_limit,
            proxies,
            retry_backlog,
            is_healthy,
            has_warnings,
            has_criticals,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug)]
pub struct HealthMonitor {
    checkpoint_path: PathBuf,
    status_path: PathBuf,
    stale_after: Duration,
    rate_limit_threshold: u32,
    min_success_rate: f64,
}

impl HealthMonitor {
    pub fn new(config: &HarvestConfig, checkpoint_path: PathBuf) -> Self {
        Self {
            checkpoint_path,
            status_path: config.output_dir.join(HEALTH_STATUS_FILE),
            stale_after: config.stale_checkpoint_after(),
            rate_limit_threshold: config.rate_limit_threshold,
            min_success_rate: config.min_success_rate,
        }
    }

    pub fn check(
        &self,
        limiter: &AdaptiveLimiter,
        fetcher: &Fetcher,
        retries: &RetryQueue,
    ) -> HealthStatus {
        let status = HealthStatus::from_checks(
            self.check_progress(),
            self.check_success_rate(limiter),
            self.check_rate_limit(fetcher),
            check_proxies(fetcher),
            check_retry_backlog(retries),
        );
        if status.has_criticals {
            tracing::warn!(
                progress = status.progress.message,
                success_rate = status.success_rate.message,
                rate_limit = status.rate_limit.message,
                "health check critical"
            );
        } else {
            tracing::debug!(healthy = status.is_healthy, "health check");
        }
        status
    }

    /// Serialize the status next to the output data.
    pub fn write_status(&self, status: &HealthStatus) -> Result<()> {
        let json = serde_json::to_vec_pretty(status)?;
        write_atomic(&self.status_path, &json)?;
        Ok(())
    }

    pub fn status_path(&self) -> &Path {
        &self.status_path
    }

    fn check_progress(&self) -> CheckResult {
        if !self.checkpoint_path.exists() {
            return CheckResult::ok("no checkpoint file yet (starting up)");
        }
        let age = std::fs::metadata(&self.checkpoint_path)
            .and_then(|meta| meta.modified())
            .ok()
            .and_then(|modified| modified.elapsed().ok());
        match age {
            Some(age) if age > self.stale_after => CheckResult::critical(format!(
                "no progress for {:.1} minutes",
                age.as_secs_f64() / 60.0
            )),
            Some(age) => CheckResult::ok(format!(
                "progress normal (updated {:.1} min ago)",
                age.as_secs_f64() / 60.0
            )),
            None => CheckResult::warning("could not read checkpoint age"),
        }
    }

    fn check_success_rate(&self, limiter: &AdaptiveLimiter) -> CheckResult {
        match limiter.success_rate() {
            None => CheckResult::ok("not enough requests yet"),
            Some(rate) if rate < self.min_success_rate => CheckResult::warning(format!(
                "success rate {:.1}% below {:.1}%",
                rate * 100.0,
                self.min_success_rate * 100.0
            )),
            Some(rate) => CheckResult::ok(format!("success rate {:.1}%", rate * 100.0)),
        }
    }

    fn check_rate_limit(&self, fetcher: &Fetcher) -> CheckResult {
        let streak = fetcher.rate_limit_streak();
        if streak >= self.rate_limit_threshold {
            CheckResult::critical(format!("rate limited: {streak} consecutive 429s"))
        } else if streak > 0 {
            CheckResult::warning(format!("some rate limiting: {streak} recent 429s"))
        } else {
            CheckResult::ok("no rate limiting issues")
        }
    }
}

fn check_proxies(fetcher: &Fetcher) -> CheckResult {
    let Some(pool) = fetcher.pool() else {
        return CheckResult::ok("no proxy pool configured");
    };
    let health = pool.health();
    if health.total == 0 {
        return CheckResult::warning("proxy pool is empty");
    }
    if health.failed * 2 > health.total {
        CheckResult::warning(format!(
            "{} of {} proxies currently failed",
            health.failed, health.total
        ))
    } else {
        CheckResult::ok(format!(
            "{} proxies, {} failed, {} requests served",
            health.total, health.failed, health.served
        ))
    }
}

fn check_retry_backlog(retries: &RetryQueue) -> CheckResult {
    let stats = retries.stats();
    if stats.queued > RETRY_BACKLOG_WARN {
        CheckResult::warning(format!(
            "{} URLs waiting for retry ({} ready)",
            stats.queued, stats.ready
        ))
    } else if stats.queued > 0 {
        CheckResult::ok(format!(
            "{} URLs waiting for retry ({} ready)",
            stats.queued, stats.ready
        ))
    } else {
        CheckResult::ok("retry queue empty")
    }
}
