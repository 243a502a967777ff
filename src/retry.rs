//! Failure classification and the priority retry queue.
//!
//! Failed URLs are re-queued by error class: rate limits retry first with a
//! long backoff, missing pages retry last. Backoff doubles per attempt and a
//! URL is dropped after `max_attempts`.

use std::collections::{BinaryHeap, HashMap, HashSet};
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// How an error should be treated by the retry queue.
///
/// Lower priority values retry first. Base delays grow exponentially with
/// the attempt number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryClass {
    RateLimit,
    ServerError,
    Timeout,
    Connection,
    ClientError,
    ParseError,
    Validation,
    Unknown,
    NotFound,
}

impl RetryClass {
    pub fn priority(self) -> u8 {
        match self {
            RetryClass::RateLimit => 1,
            RetryClass::ServerError => 2,
            RetryClass::Timeout => 3,
            RetryClass::Connection => 4,
            RetryClass::ClientError => 5,
            RetryClass::ParseError => 6,
            RetryClass::Validation => 7,
            RetryClass::Unknown => 8,
            RetryClass::NotFound => 10,
        }
    }

    pub fn base_delay(self) -> Duration {
        let secs = match self {
            RetryClass::RateLimit => 60,
            RetryClass::ServerError => 30,
            RetryClass::Timeout => 30,
            RetryClass::Connection => 60,
            RetryClass::ClientError => 120,
            RetryClass::ParseError => 60,
            RetryClass::Validation => 120,
            RetryClass::Unknown => 60,
            RetryClass::NotFound => 300,
        };
        Duration::from_secs(secs)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RetryClass::RateLimit => "rate_limit",
            RetryClass::ServerError => "server_error",
            RetryClass::Timeout => "timeout",
            RetryClass::Connection => "connection",
            RetryClass::ClientError => "client_error",
            RetryClass::ParseError => "parse_error",
            RetryClass::Validation => "validation",
            RetryClass::Unknown => "unknown",
            RetryClass::NotFound => "not_found",
        }
    }
}

impl fmt::Display for RetryClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that know which retry class they belong to.
pub trait Retryable {
    fn retry_class(&self) -> RetryClass;
}

/// One scheduled retry. Ordered by (priority, due time).
#[derive(Debug, Clone)]
pub struct RetryItem {
    pub url: String,
    pub class: RetryClass,
    pub attempt: u32,
    pub due: Instant,
    pub error: String,
}

impl PartialEq for RetryItem {
    fn eq(&self, other: &Self) -> bool {
        self.class.priority() == other.class.priority() && self.due == other.due
    }
}

impl Eq for RetryItem {}

impl PartialOrd for RetryItem {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RetryItem {
    // BinaryHeap is a max-heap; invert so the smallest (priority, due) pops first.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (other.class.priority(), other.due).cmp(&(self.class.priority(), self.due))
    }
}

/// Outcome of scheduling a failed URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// Queued for another attempt after `delay`.
    Queued { attempt: u32, delay: Duration },
    /// Already waiting in the queue.
    Duplicate,
    /// Out of attempts; recorded as permanently failed.
    Exhausted,
}

/// A URL that ran out of retry attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedUrl {
    pub url: String,
    pub class: RetryClass,
    pub error: String,
    pub attempts: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetryStats {
    pub queued: usize,
    pub ready: usize,
    pub total_scheduled: usize,
    pub succeeded: usize,
    pub exhausted: usize,
}

#[derive(Debug, Default)]
struct Inner {
    heap: BinaryHeap<RetryItem>,
    waiting: HashSet<String>,
    attempts: HashMap<String, u32>,
    exhausted: Vec<FailedUrl>,
    total_scheduled: usize,
    succeeded: usize,
}

/// Priority retry queue with exponential backoff.
#[derive(Debug)]
pub struct RetryQueue {
    max_attempts: u32,
    inner: Mutex<Inner>,
}

impl RetryQueue {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
    /// Backoff never exceeds 30 minutes, regardless of class and attempt.
    pub const MAX_BACKOFF: Duration = Duration::from_secs(1800);

    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Schedule another attempt for `url`, or record it as exhausted.
    pub fn schedule(&self, url: &str, class: RetryClass, error: &str) -> ScheduleOutcome {
        let mut inner = self.inner.lock().expect("retry queue lock poisoned");

        if inner.waiting.contains(url) {
            return ScheduleOutcome::Duplicate;
        }

        let attempt = inner.attempts.get(url).copied().unwrap_or(0) + 1;
        if attempt >= self.max_attempts {
            tracing::warn!(url = url, attempts = attempt, "max retry attempts reached");
            inner.attempts.remove(url);
            inner.exhausted.push(FailedUrl {
                url: url.to_string(),
                class,
                error: error.to_string(),
                attempts: attempt,
            });
            return ScheduleOutcome::Exhausted;
        }

        let delay = backoff(class, attempt);
        let item = RetryItem {
            url: url.to_string(),
            class,
            attempt,
            due: Instant::now() + delay,
            error: error.to_string(),
        };
        inner.attempts.insert(url.to_string(), attempt);
        inner.waiting.insert(url.to_string());
        inner.heap.push(item);
        inner.total_scheduled += 1;

        tracing::info!(
            url = url,
            class = %class,
            attempt = attempt,
            delay_secs = delay.as_secs(),
            "queued for retry"
        );
        ScheduleOutcome::Queued { attempt, delay }
    }

    /// Put an item back untouched, e.g. when the crawl queue had no room.
    pub fn requeue(&self, item: RetryItem) {
        let mut inner = self.inner.lock().expect("retry queue lock poisoned");
        inner.waiting.insert(item.url.clone());
        inner.heap.push(item);
    }

    /// Pop up to `max` items whose backoff has elapsed, best priority first.
    pub fn pop_ready(&self, max: usize) -> Vec<RetryItem> {
        let now = Instant::now();
        let mut inner = self.inner.lock().expect("retry queue lock poisoned");
        let mut ready = Vec::new();

        while ready.len() < max {
            let due = inner.heap.peek().is_some_and(|item| item.due <= now);
            if !due {
                break;
            }
            if let Some(item) = inner.heap.pop() {
                inner.waiting.remove(&item.url);
                ready.push(item);
            }
        }
        ready
    }

    /// Forget a URL's attempt history after it finally succeeded.
    pub fn mark_success(&self, url: &str) {
        let mut inner = self.inner.lock().expect("retry queue lock poisoned");
        if inner.attempts.remove(url).is_some() {
            inner.succeeded += 1;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inner
            .lock()
            .expect("retry queue lock poisoned")
            .heap
            .is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .expect("retry queue lock poisoned")
            .heap
            .len()
    }

    /// Time until the earliest queued item is due, if any.
    pub fn next_due_in(&self) -> Option<Duration> {
        let inner = self.inner.lock().expect("retry queue lock poisoned");
        inner
            .heap
            .iter()
            .map(|item| item.due)
            .min()
            .map(|due| due.saturating_duration_since(Instant::now()))
    }

    pub fn exhausted(&self) -> Vec<FailedUrl> {
        self.inner
            .lock()
            .expect("retry queue lock poisoned")
            .exhausted
            .clone()
    }

    pub fn stats(&self) -> RetryStats {
        let now = Instant::now();
        let inner = self.inner.lock().expect("retry queue lock poisoned");
        RetryStats {
            queued: inner.heap.len(),
            ready: inner.heap.iter().filter(|item| item.due <= now).count(),
            total_scheduled: inner.total_scheduled,
            succeeded: inner.succeeded,
            exhausted: inner.exhausted.len(),
        }
    }
}

impl Default for RetryQueue {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_ATTEMPTS)
    }
}

fn backoff(class: RetryClass, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    let delay = class.base_delay().saturating_mul(factor);
    delay.min(RetryQueue::MAX_BACKOFF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff(RetryClass::RateLimit, 1), Duration::from_secs(60));
        assert_eq!(backoff(RetryClass::RateLimit, 2), Duration::from_secs(120));
        assert_eq!(backoff(RetryClass::RateLimit, 4), Duration::from_secs(480));
        assert_eq!(backoff(RetryClass::NotFound, 4), RetryQueue::MAX_BACKOFF);
    }

    #[test]
    fn rate_limits_outrank_missing_pages() {
        assert!(RetryClass::RateLimit.priority() < RetryClass::ServerError.priority());
        assert!(RetryClass::ServerError.priority() < RetryClass::NotFound.priority());
    }
}
