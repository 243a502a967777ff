//! A toolkit for harvesting product data from a single online store.
//!
//! The crawl engine (`crawler`) drives any [`Spider`]; everything
//! store-specific lives in [`site`] and [`extract`]. Around the engine sit
//! the proxy pool, the adaptive rate limiter, the retry queue, checkpointing
//! and the exporters.

pub mod client;
pub mod config;
pub mod crawler;
pub mod discover;
pub mod error;
pub mod export;
pub mod extract;
pub mod headers;
pub mod health;
pub mod product;
pub mod proxy;
pub mod rate;
pub mod retry;
pub mod sink;
pub mod site;
mod spider;
pub mod validate;

pub use config::HarvestConfig;
pub use crawler::{Crawler, CrawlerOptions, Statistics};
pub use error::{Error, Result};
pub use product::Product;
pub use spider::Spider;
