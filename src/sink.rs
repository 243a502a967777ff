//! Product sink with periodic checkpoints.
//!
//! Accepted products accumulate in memory and are snapshotted to
//! `checkpoint_products.json` every `interval` records and at shutdown, so a
//! crash loses at most one interval of work. Snapshots go through a temp
//! file then rename.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::crawler::state::write_atomic;
use crate::error::Result;
use crate::product::Product;

pub const PRODUCT_CHECKPOINT_FILE: &str = "checkpoint_products.json";

#[derive(Debug, Default)]
struct Inner {
    products: Vec<Product>,
    since_snapshot: usize,
}

#[derive(Debug)]
pub struct ProductSink {
    dir: PathBuf,
    interval: usize,
    inner: Mutex<Inner>,
}

impl ProductSink {
    /// Fresh sink writing under `dir`.
    pub fn create(dir: &Path, interval: usize) -> Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            interval: interval.max(1),
            inner: Mutex::new(Inner::default()),
        })
    }

    /// Sink preloaded from an existing product checkpoint, if one exists.
    pub fn resume(dir: &Path, interval: usize) -> Result<Self> {
        let sink = Self::create(dir, interval)?;
        let path = sink.checkpoint_path();
        if path.exists() {
            let content = fs::read_to_string(&path)?;
            match serde_json::from_str::<Vec<Product>>(&content) {
                Ok(products) => {
                    tracing::info!(
                        products = products.len(),
                        "resumed from '{}'",
                        path.display()
                    );
                    sink.inner.lock().expect("product sink lock poisoned").products = products;
                }
                Err(err) => {
                    tracing::error!(
                        "Failed to read product checkpoint '{}' Error: '{:?}'. Ignoring",
                        path.display(),
                        err
                    );
                }
            }
        }
        Ok(sink)
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.dir.join(PRODUCT_CHECKPOINT_FILE)
    }

    pub fn output_dir(&self) -> &Path {
        &self.dir
    }

    /// Accept one product; snapshots when the interval fills up.
    /// Returns the total number of accepted products.
    pub fn push(&self, product: Product) -> Result<usize> {
        let mut inner = self.inner.lock().expect("product sink lock poisoned");
        inner.products.push(product);
        inner.since_snapshot += 1;
        let total = inner.products.len();

        if inner.since_snapshot >= self.interval {
            write_snapshot(&self.checkpoint_path(), &inner.products)?;
            inner.since_snapshot = 0;
            tracing::info!(products = total, "checkpoint saved");
        }
        Ok(total)
    }

    /// Write a snapshot regardless of the interval, e.g. at shutdown.
    pub fn snapshot(&self) -> Result<()> {
        let mut inner = self.inner.lock().expect("product sink lock poisoned");
        write_snapshot(&self.checkpoint_path(), &inner.products)?;
        inner.since_snapshot = 0;
        Ok(())
    }

    pub fn products(&self) -> Vec<Product> {
        self.inner
            .lock()
            .expect("product sink lock poisoned")
            .products
            .clone()
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .expect("product sink lock poisoned")
            .products
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn write_snapshot(path: &Path, products: &[Product]) -> Result<()> {
    let json = serde_json::to_vec_pretty(products)?;
    write_atomic(path, &json)?;
    Ok(())
}
