use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

#[derive(Debug, Clone)]
pub struct Statistics {
    pub num_scrapings: Arc<AtomicUsize>,
    pub num_scrape_errors: Arc<AtomicUsize>,
    pub num_processings: Arc<AtomicUsize>,
    pub num_process_errors: Arc<AtomicUsize>,
    pub num_retries: Arc<AtomicUsize>,
    pub num_exhausted: Arc<AtomicUsize>,
}

impl Default for Statistics {
    fn default() -> Self {
        Self {
            num_scrapings: Arc::new(AtomicUsize::new(0)),
            num_scrape_errors: Arc::new(AtomicUsize::new(0)),
            num_processings: Arc::new(AtomicUsize::new(0)),
            num_process_errors: Arc::new(AtomicUsize::new(0)),
            num_retries: Arc::new(AtomicUsize::new(0)),
            num_exhausted: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Statistics {
    pub fn scrapings(&self) -> usize {
        self.num_scrapings.load(Ordering::Relaxed)
    }
    pub fn scrape_errors(&self) -> usize {
        self.num_scrape_errors.load(Ordering::Relaxed)
    }
    pub fn processings(&self) -> usize {
        self.num_processings.load(Ordering::Relaxed)
    }
    pub fn process_errors(&self) -> usize {
        self.num_process_errors.load(Ordering::Relaxed)
    }
    pub fn retries(&self) -> usize {
        self.num_retries.load(Ordering::Relaxed)
    }
    pub fn exhausted(&self) -> usize {
        self.num_exhausted.load(Ordering::Relaxed)
    }

    /// Fraction of scrape attempts that succeeded, if any were made.
    pub fn success_rate(&self) -> Option<f64> {
        let scrapings = self.scrapings();
        if scrapings == 0 {
            return None;
        }
        let successes = scrapings.saturating_sub(self.scrape_errors());
        Some(successes as f64 / scrapings as f64)
    }

    pub fn write_to_log(&self, running_time: Duration) {
        let num_procs = self.num_processings.load(Ordering::Relaxed);
        let num_proc_errors = self.num_process_errors.load(Ordering::Relaxed);
        let num_scrapes = self.num_scrapings.load(Ordering::Relaxed);
        let num_scrap_errors = self.num_scrape_errors.load(Ordering::Relaxed);
        let num_retries = self.num_retries.load(Ordering::Relaxed);
        let num_exhausted = self.num_exhausted.load(Ordering::Relaxed);
        tracing::info!(
            num_processings = num_procs,
            num_process_errors = num_proc_errors,
            num_scrapings = num_scrapes,
            num_scrape_errors = num_scrap_errors,
            num_retries = num_retries,
            num_exhausted = num_exhausted,
            running_time = ?running_time,
            "statistics"
        );
    }
}
