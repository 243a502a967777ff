//! Adaptive rate limiting.
//!
//! Watches the success rate of the most recent requests and adjusts both the
//! inter-request delay and the number of admitted workers: cautious
//! speed-ups, aggressive slowdowns. Worker admission is a semaphore gate;
//! shrinking parks permits, growing releases them again.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{sleep, Instant};

const SLOW_DOWN_THRESHOLD: f64 = 0.85;
const SPEED_UP_THRESHOLD: f64 = 0.95;

const SLOWDOWN_DELAY_INCREASE: f64 = 0.25;
const SLOWDOWN_WORKER_DECREASE: f64 = 0.10;
const SPEEDUP_DELAY_DECREASE: f64 = 0.10;
const SPEEDUP_WORKER_INCREASE: f64 = 0.05;

const MAX_WORKER_MULTIPLIER: f64 = 1.5;
const MIN_WORKER_COUNT: usize = 1;
const MIN_DELAY: Duration = Duration::from_millis(100);
const MAX_DELAY: Duration = Duration::from_secs(5);

const SAMPLE_SIZE: usize = 100;
const MIN_SAMPLE: usize = 10;

/// Requests pause at least this long whenever a positive delay is configured.
const MIN_PAUSE: Duration = Duration::from_millis(500);
const PAUSE_JITTER: f64 = 0.3;

/// Current pacing settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateSettings {
    pub delay: Duration,
    pub workers: usize,
}

/// What an adjustment pass decided, for logging.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Adjustment {
    SlowedDown {
        success_rate: f64,
        old: RateSettings,
        new: RateSettings,
    },
    SpedUp {
        success_rate: f64,
        old: RateSettings,
        new: RateSettings,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct RateSnapshot {
    pub delay_ms: u64,
    pub workers: usize,
    pub initial_delay_ms: u64,
    pub initial_workers: usize,
    pub recent_success_rate: Option<f64>,
    pub total_requests: usize,
    pub successful_requests: usize,
    pub failed_requests: usize,
    pub adjustments: usize,
    pub slowdowns: usize,
    pub speedups: usize,
}

#[derive(Debug)]
struct State {
    delay: Duration,
    workers: usize,
    /// Permits never yet added to the gate; bounded by the worker cap.
    reserve: usize,
    window: VecDeque<bool>,
    last_adjustment: Instant,
    adjustments: usize,
    slowdowns: usize,
    speedups: usize,
}

/// Success-rate driven limiter shared by all scrape workers.
#[derive(Debug)]
pub struct AdaptiveLimiter {
    initial_delay: Duration,
    initial_workers: usize,
    worker_cap: usize,
    adjustment_interval: Duration,
    gate: Arc<Semaphore>,
    parked: Arc<Mutex<Vec<OwnedSemaphorePermit>>>,
    state: Mutex<State>,
    total_requests: AtomicUsize,
    successful_requests: AtomicUsize,
    failed_requests: AtomicUsize,
}

impl AdaptiveLimiter {
    pub const DEFAULT_ADJUSTMENT_INTERVAL: Duration = Duration::from_secs(300);

    pub fn new(
        initial_delay: Duration,
        initial_workers: usize,
        adjustment_interval: Duration,
    ) -> Self {
        let initial_workers = initial_workers.max(MIN_WORKER_COUNT);
        let worker_cap =
            ((initial_workers as f64 * MAX_WORKER_MULTIPLIER) as usize).max(initial_workers);
        tracing::info!(
            delay_ms = initial_delay.as_millis() as u64,
            workers = initial_workers,
            worker_cap = worker_cap,
            "adaptive rate limiter initialized"
        );
        Self {
            initial_delay,
            initial_workers,
            worker_cap,
            adjustment_interval,
            gate: Arc::new(Semaphore::new(initial_workers)),
            parked: Arc::new(Mutex::new(Vec::new())),
            state: Mutex::new(State {
                delay: initial_delay,
                workers: initial_workers,
                reserve: worker_cap - initial_workers,
                window: VecDeque::with_capacity(SAMPLE_SIZE),
                last_adjustment: Instant::now(),
                adjustments: 0,
                slowdowns: 0,
                speedups: 0,
            }),
            total_requests: AtomicUsize::new(0),
            successful_requests: AtomicUsize::new(0),
            failed_requests: AtomicUsize::new(0),
        }
    }

    /// Upper bound on concurrent workers, 150% of the initial count.
    pub fn worker_cap(&self) -> usize {
        self.worker_cap
    }

    /// Wait for a worker slot.
    pub async fn admit(&self) -> OwnedSemaphorePermit {
        self.gate
            .clone()
            .acquire_owned()
            .await
            .expect("concurrency gate closed")
    }

    /// Sleep the current delay with ±30% jitter. A zero delay means no pacing.
    pub async fn pause(&self) {
        let delay = self.settings().delay;
        if delay.is_zero() {
            return;
        }
        let jitter = rand::thread_rng().gen_range(-PAUSE_JITTER..=PAUSE_JITTER);
        let paused = delay.mul_f64(1.0 + jitter).max(MIN_PAUSE);
        sleep(paused).await;
    }

    /// Record one request outcome into the rolling window.
    pub fn record(&self, success: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }

        let mut state = self.state.lock().expect("rate limiter lock poisoned");
        if state.window.len() == SAMPLE_SIZE {
            state.window.pop_front();
        }
        state.window.push_back(success);
    }

    /// Success rate over the rolling window, once it holds enough samples.
    pub fn success_rate(&self) -> Option<f64> {
        let state = self.state.lock().expect("rate limiter lock poisoned");
        window_rate(&state.window)
    }

    pub fn settings(&self) -> RateSettings {
        let state = self.state.lock().expect("rate limiter lock poisoned");
        RateSettings {
            delay: state.delay,
            workers: state.workers,
        }
    }

    /// Adjust pacing if the interval elapsed and the window is conclusive.
    pub fn maybe_adjust(&self) -> Option<Adjustment> {
        let mut state = self.state.lock().expect("rate limiter lock poisoned");

        if state.last_adjustment.elapsed() < self.adjustment_interval {
            return None;
        }
        let success_rate = window_rate(&state.window)?;
        let old = RateSettings {
            delay: state.delay,
            workers: state.workers,
        };

        if success_rate < SLOW_DOWN_THRESHOLD {
            state.delay = state.delay.mul_f64(1.0 + SLOWDOWN_DELAY_INCREASE).min(MAX_DELAY);
            let target = ((state.workers as f64) * (1.0 - SLOWDOWN_WORKER_DECREASE)) as usize;
            let target = target.max(MIN_WORKER_COUNT);
            self.resize_gate(&mut state, target);
            state.last_adjustment = Instant::now();
            state.adjustments += 1;
            state.slowdowns += 1;

            let new = RateSettings {
                delay: state.delay,
                workers: state.workers,
            };
            tracing::warn!(
                success_rate = format!("{:.1}%", success_rate * 100.0),
                old_delay_ms = old.delay.as_millis() as u64,
                new_delay_ms = new.delay.as_millis() as u64,
                old_workers = old.workers,
                new_workers = new.workers,
                "slowing down"
            );
            Some(Adjustment::SlowedDown {
                success_rate,
                old,
                new,
            })
        } else if success_rate > SPEED_UP_THRESHOLD {
            if state.workers >= self.worker_cap && state.delay <= MIN_DELAY {
                return None;
            }
            state.delay = state.delay.mul_f64(1.0 - SPEEDUP_DELAY_DECREASE).max(MIN_DELAY);
            let target = ((state.workers as f64) * (1.0 + SPEEDUP_WORKER_INCREASE)) as usize;
            let target = target.min(self.worker_cap);
            self.resize_gate(&mut state, target);
            state.last_adjustment = Instant::now();
            state.adjustments += 1;
            state.speedups += 1;

            let new = RateSettings {
                delay: state.delay,
                workers: state.workers,
            };
            tracing::info!(
                success_rate = format!("{:.1}%", success_rate * 100.0),
                old_delay_ms = old.delay.as_millis() as u64,
                new_delay_ms = new.delay.as_millis() as u64,
                old_workers = old.workers,
                new_workers = new.workers,
                "speeding up"
            );
            Some(Adjustment::SpedUp {
                success_rate,
                old,
                new,
            })
        } else {
            None
        }
    }

    /// Drop to maximum delay and a single worker, e.g. on a rate-limit storm.
    pub fn force_slow(&self) {
        let mut state = self.state.lock().expect("rate limiter lock poisoned");
        tracing::warn!("forcing slow mode");
        state.delay = MAX_DELAY;
        self.resize_gate(&mut state, MIN_WORKER_COUNT);
        state.last_adjustment = Instant::now();
    }

    pub fn snapshot(&self) -> RateSnapshot {
        let state = self.state.lock().expect("rate limiter lock poisoned");
        RateSnapshot {
            delay_ms: state.delay.as_millis() as u64,
            workers: state.workers,
            initial_delay_ms: self.initial_delay.as_millis() as u64,
            initial_workers: self.initial_workers,
            recent_success_rate: window_rate(&state.window),
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            adjustments: state.adjustments,
            slowdowns: state.slowdowns,
            speedups: state.speedups,
        }
    }

    fn resize_gate(&self, state: &mut State, target: usize) {
        while state.workers < target {
            let released = {
                let mut parked = self.parked.lock().expect("parked permits lock poisoned");
                parked.pop()
            };
            match released {
                // Dropping a parked permit returns it to the gate.
                Some(permit) => drop(permit),
                None if state.reserve > 0 => {
                    state.reserve -= 1;
                    self.gate.add_permits(1);
                }
                None => break,
            }
            state.workers += 1;
        }

        while state.workers > target {
            // Park asynchronously: the permit frees up whenever a worker
            // finishes, and must not stall the control loop until then.
            let gate = self.gate.clone();
            let parked = self.parked.clone();
            tokio::spawn(async move {
                if let Ok(permit) = gate.acquire_owned().await {
                    parked
                        .lock()
                        .expect("parked permits lock poisoned")
                        .push(permit);
                }
            });
            state.workers -= 1;
        }
    }
}

fn window_rate(window: &VecDeque<bool>) -> Option<f64> {
    if window.len() < MIN_SAMPLE {
        return None;
    }
    let successes = window.iter().filter(|ok| **ok).count();
    Some(successes as f64 / window.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_adjustment_without_samples() {
        let limiter = AdaptiveLimiter::new(Duration::from_millis(500), 4, Duration::ZERO);
        for _ in 0..MIN_SAMPLE - 1 {
            limiter.record(true);
        }
        assert!(limiter.maybe_adjust().is_none());
    }

    #[tokio::test]
    async fn window_is_bounded() {
        let limiter = AdaptiveLimiter::new(Duration::ZERO, 1, Duration::ZERO);
        for _ in 0..SAMPLE_SIZE + 50 {
            limiter.record(false);
        }
        let state = limiter.state.lock().unwrap();
        assert_eq!(state.window.len(), SAMPLE_SIZE);
    }
}
