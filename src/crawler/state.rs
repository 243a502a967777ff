use std::{
    collections::HashMap,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::RwLock;

/// Per-URL crawl progress. A URL is terminal once it processed ok or ran out
/// of retry attempts; everything else is re-seeded on resume.
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct CrawledState {
    queued: DateTime<Utc>,
    scraped_at: Option<DateTime<Utc>>,
    scrape_result: Option<StateOutcome>,
    processed_at: Option<DateTime<Utc>>,
    process_result: Option<StateOutcome>,
    #[serde(default)]
    exhausted: bool,
}

#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
#[serde(tag = "status", content = "outcome")]
pub enum StateOutcome {
    Ok(String),
    Error(String),
}

impl Default for CrawledState {
    fn default() -> Self {
        Self {
            queued: Utc::now(),
            scraped_at: None,
            scrape_result: None,
            processed_at: None,
            process_result: None,
            exhausted: false,
        }
    }
}

impl CrawledState {
    pub fn queued() -> CrawledState {
        Self::default()
    }
    pub fn processed_ok<S: Into<String>>(&mut self, outcome: S) {
        self.processed_at = Some(Utc::now());
        self.process_result = Some(StateOutcome::Ok(outcome.into()));
    }
    pub fn scraped_ok(&mut self) {
        self.scraped_at = Some(Utc::now());
        self.scrape_result = Some(StateOutcome::Ok("".into()))
    }
    pub fn process_error<S: Into<String>>(&mut self, error: S) {
        self.processed_at = Some(Utc::now());
        self.process_result = Some(StateOutcome::Error(error.into()));
    }
    pub fn scrape_error<S: Into<String>>(&mut self, error: S) {
        self.scraped_at = Some(Utc::now());
        self.scrape_result = Some(StateOutcome::Error(error.into()))
    }
    /// No more retry attempts will be made for this URL.
    pub fn mark_exhausted(&mut self) {
        self.exhausted = true;
    }

    pub fn is_processed_ok(&self) -> bool {
        matches!(self.process_result, Some(StateOutcome::Ok(_)))
    }
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }
    /// Terminal states are skipped when seeding a resumed crawl.
    pub fn is_terminal(&self) -> bool {
        self.is_processed_ok() || self.exhausted
    }
    pub fn last_error(&self) -> Option<&str> {
        match (&self.process_result, &self.scrape_result) {
            (Some(StateOutcome::Error(e)), _) => Some(e),
            (_, Some(StateOutcome::Error(e))) => Some(e),
            _ => None,
        }
    }
}

pub(crate) type ProcessingState = HashMap<String, CrawledState>;
pub(crate) type SharedProcessingState = Arc<RwLock<ProcessingState>>;

pub(crate) async fn write_state(
    saved_state_path: Option<&Path>,
    visited_urls: SharedProcessingState,
) {
    let json = serde_json::json!({ "visited_urls": &*visited_urls.read().await });
    match serde_json::to_string(&json) {
        Ok(json_string) => {
            if let Some(state_path) = saved_state_path {
                tracing::debug!("crawler: writing state to '{}'", state_path.display());

                match write_atomic(state_path, json_string.as_bytes()) {
                    Ok(_) => {
                        tracing::debug!("crawler: wrote state to '{}'", state_path.display())
                    }
                    Err(err) => {
                        tracing::error!(
                            "failed write to '{}', error '{:?}'",
                            state_path.display(),
                            err
                        );
                        tracing::error!("visited_urls={:?}", json_string);
                    }
                }
            } else {
                tracing::info!("crawler: writing state to 'stdout'");
                let _ = io::stdout().lock().write_all(json_string.as_bytes());
            }
        }
        Err(err) => {
            tracing::error!("failed to serialize state, error '{:?}'", err);
            tracing::error!("visited_urls={:?}", json);
        }
    }
}

pub(crate) fn read_state(saved_state_path: Option<&Path>) -> SharedProcessingState {
    Arc::new(RwLock::new(load_state_map(saved_state_path)))
}

fn load_state_map(saved_state_path: Option<&Path>) -> ProcessingState {
    if let Some(saved_state_path) = saved_state_path {
        match fs::File::open(saved_state_path) {
            Ok(file) => {
                let reader = io::BufReader::new(file);
                match serde_json::from_reader::<io::BufReader<fs::File>, serde_json::Value>(reader)
                {
                    Ok(mut json) => {
                        match ProcessingState::deserialize(json["visited_urls"].take()) {
                            Ok(visited_urls) => {
                                tracing::info!(
                                    "read saved state from '{}'",
                                    saved_state_path.display()
                                );
                                visited_urls
                            }
                            Err(err) => {
                                tracing::error!(
                                    "Failed to read saved state from '{}' Error: '{:?}'. Ignoring",
                                    saved_state_path.display(),
                                    err
                                );
                                ProcessingState::new()
                            }
                        }
                    }
                    Err(err) => {
                        tracing::error!(
                            "Failed to read file '{}' Error: '{:?}'. Ignoring",
                            saved_state_path.display(),
                            err
                        );
                        ProcessingState::new()
                    }
                }
            }
            Err(err) => {
                tracing::warn!(
                    "Failed to open file from '{}' Error: '{:?}'. Ignoring",
                    saved_state_path.display(),
                    err
                );
                ProcessingState::new()
            }
        }
    } else {
        ProcessingState::new()
    }
}

/// URLs in a saved state file that never reached a terminal state, i.e. the
/// input for a follow-up retry run.
pub fn unfinished_urls(saved_state_path: &Path) -> Vec<String> {
    let mut urls: Vec<String> = load_state_map(Some(saved_state_path))
        .into_iter()
        .filter(|(_, state)| !state.is_terminal())
        .map(|(url, _)| url)
        .collect();
    urls.sort();
    urls
}

/// Write through a temp file then rename, so a crash mid-write never
/// truncates the previous checkpoint.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let tmp: PathBuf = match path.file_name() {
        Some(name) => {
            let mut tmp_name = name.to_os_string();
            tmp_name.push(".tmp");
            path.with_file_name(tmp_name)
        }
        None => return Err(io::Error::new(io::ErrorKind::InvalidInput, "not a file path")),
    };
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)
}
