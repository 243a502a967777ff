use thiserror::Error;

use crate::retry::{Retryable, RetryClass};

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("rate limited (HTTP 429)")]
    RateLimited,
    #[error("server error (HTTP {0})")]
    Server(u16),
    #[error("not found (HTTP 404)")]
    NotFound,
    #[error("client error (HTTP {0})")]
    Client(u16),
    #[error("request timed out")]
    Timeout,

    #[error("the selector you are trying to scrape for is invalid: {0}")]
    InvalidSelector(String),
    #[error("malformed page: {0}")]
    Parse(String),
    #[error("invalid record: {0}")]
    Validation(String),

    #[error("invalid proxy entry: {0}")]
    Proxy(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("couldn't await a task: {0}")]
    RuntimeJoin(#[from] tokio::task::JoinError),
    #[error("couldn't send through a channel")]
    ChannelSend,
}

impl Retryable for Error {
    fn retry_class(&self) -> RetryClass {
        match self {
            Error::RateLimited => RetryClass::RateLimit,
            Error::Server(_) => RetryClass::ServerError,
            Error::Timeout => RetryClass::Timeout,
            Error::Transport(e) if e.is_timeout() => RetryClass::Timeout,
            Error::Transport(_) => RetryClass::Connection,
            Error::NotFound => RetryClass::NotFound,
            Error::Client(_) => RetryClass::ClientError,
            Error::InvalidSelector(_) | Error::Parse(_) => RetryClass::ParseError,
            Error::Validation(_) => RetryClass::Validation,
            _ => RetryClass::Unknown,
        }
    }
}
